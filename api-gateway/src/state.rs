// ==============================================================================
// state.rs - Application State Management
// ==============================================================================
// Description: Shared application state for API gateway
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use staphscope_jobs::{JobStore, Settings, TaskDispatcher, UploadIntake};
use std::sync::Arc;

use crate::queue::RedisDispatcher;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Filesystem job store shared with the worker
    store: Arc<dyn JobStore>,

    /// Hands staged jobs to the worker
    dispatcher: Arc<dyn TaskDispatcher>,

    intake: UploadIntake,

    /// Log lines returned by a status poll
    log_tail_lines: usize,
}

impl AppState {
    /// Create application state from settings (opens the store, connects Redis)
    pub async fn new(settings: &Settings, log_tail_lines: usize) -> Result<Self> {
        let store = settings
            .open_store()
            .await
            .context("Failed to initialize job store")?;

        let dispatcher = RedisDispatcher::connect(&settings.redis_url)
            .await
            .context("Failed to connect job queue")?;

        Ok(Self::from_parts(
            Arc::new(store),
            Arc::new(dispatcher),
            settings.intake(),
            log_tail_lines,
        ))
    }

    pub fn from_parts(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        intake: UploadIntake,
        log_tail_lines: usize,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                dispatcher,
                intake,
                log_tail_lines,
            }),
        }
    }

    pub fn store(&self) -> &dyn JobStore {
        self.inner.store.as_ref()
    }

    pub fn dispatcher(&self) -> &dyn TaskDispatcher {
        self.inner.dispatcher.as_ref()
    }

    pub fn intake(&self) -> &UploadIntake {
        &self.inner.intake
    }

    pub fn log_tail_lines(&self) -> usize {
        self.inner.log_tail_lines
    }
}
