// ==============================================================================
// dispatch.rs - Task Dispatch Contract
// ==============================================================================
// Description: Message format and dispatcher interface shared by the API
//              gateway (producer) and the worker (consumer)
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::job_store::JobId;

/// Redis list holding messages waiting for a worker
pub const QUEUE_KEY: &str = "staphscope:job_queue";

/// Prefix of the per-worker lists holding messages taken but not yet
/// acknowledged: `staphscope:processing:<worker-id>`
pub const PROCESSING_KEY: &str = "staphscope:processing";

pub fn processing_key(worker_id: &str) -> String {
    format!("{}:{}", PROCESSING_KEY, worker_id)
}

/// One unit of work: run StaphScope for a staged job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub job_id: JobId,
    #[serde(default)]
    pub skip_modules: Vec<String>,
}

impl DispatchMessage {
    pub fn new(job_id: JobId, skip_modules: Vec<String>) -> Self {
        Self {
            job_id,
            skip_modules,
        }
    }

    pub fn to_json(&self) -> Result<String, DispatchError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self, DispatchError> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid dispatch message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Dispatch channel unavailable: {0}")]
    Channel(String),
}

/// Hands a job to the asynchronous execution channel.
///
/// Delivery is at-least-once with no ordering across jobs; `enqueue` returns
/// as soon as the message is accepted by the channel.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn enqueue(&self, job_id: JobId, skip_modules: Vec<String>) -> Result<(), DispatchError>;
}

/// In-process dispatcher backed by a tokio channel
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<DispatchMessage>,
}

impl ChannelDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DispatchMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TaskDispatcher for ChannelDispatcher {
    async fn enqueue(&self, job_id: JobId, skip_modules: Vec<String>) -> Result<(), DispatchError> {
        self.tx
            .send(DispatchMessage::new(job_id, skip_modules))
            .map_err(|e| DispatchError::Channel(e.to_string()))
    }
}
