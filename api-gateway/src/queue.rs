// ==============================================================================
// queue.rs - Redis Job Queue Management
// ==============================================================================
// Description: Producer side of the StaphScope job queue
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use staphscope_jobs::dispatch::{DispatchError, DispatchMessage, TaskDispatcher, QUEUE_KEY};
use staphscope_jobs::JobId;
use tracing::info;

/// Job queue producer backed by a Redis list
#[derive(Clone)]
pub struct RedisDispatcher {
    conn: ConnectionManager,
}

impl RedisDispatcher {
    /// Connect and verify the server answers PING
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;

        let mut conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis PING failed")?;

        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl TaskDispatcher for RedisDispatcher {
    async fn enqueue(&self, job_id: JobId, skip_modules: Vec<String>) -> Result<(), DispatchError> {
        let payload = DispatchMessage::new(job_id, skip_modules).to_json()?;

        // Push to queue (LPUSH, consumer takes from the right)
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(|e| DispatchError::Channel(e.to_string()))?;

        info!("Job {} queued successfully", job_id);
        Ok(())
    }
}
