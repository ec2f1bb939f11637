// ==============================================================================
// queue.rs - Redis Job Queue Management (Worker Side)
// ==============================================================================
// Description: Reliable consumption of StaphScope jobs: messages move to the
//              worker's own in-flight list while running and are acknowledged
//              afterwards. Lists of workers whose heartbeat lapsed are requeued.
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use staphscope_jobs::dispatch::{processing_key, DispatchMessage, QUEUE_KEY};
use tracing::{info, warn};

/// Seconds a single BLMOVE waits for work before returning empty
const DEQUEUE_TIMEOUT_SECS: f64 = 1.0;

/// Set of worker ids that may own an in-flight list
const WORKERS_KEY: &str = "staphscope:workers";

/// Prefix of each worker's liveness key
const HEARTBEAT_KEY: &str = "staphscope:heartbeat";

/// Lifetime of a heartbeat; a worker silent for longer is presumed dead
pub const HEARTBEAT_TTL_SECS: u64 = 30;

fn heartbeat_key(worker_id: &str) -> String {
    format!("{}:{}", HEARTBEAT_KEY, worker_id)
}

/// A message taken from the queue and parked in the in-flight list
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: DispatchMessage,
    /// Exact payload as stored in Redis, needed to acknowledge it
    raw: String,
}

impl Delivery {
    pub fn parse(raw: String) -> Result<Self> {
        let message = DispatchMessage::from_json(&raw)
            .context("Failed to deserialize dispatch message")?;
        Ok(Self { message, raw })
    }
}

/// Job queue manager bound to one worker's in-flight list
#[derive(Clone)]
pub struct JobQueue {
    conn: ConnectionManager,
    worker_id: String,
    in_flight: String,
}

impl JobQueue {
    pub fn new(conn: ConnectionManager, worker_id: impl Into<String>) -> Self {
        let worker_id = worker_id.into();
        Self {
            conn,
            in_flight: processing_key(&worker_id),
            worker_id,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Wait up to a second for the next job
    pub async fn dequeue(&mut self) -> Result<Option<Delivery>> {
        let payload: Option<String> = redis::cmd("BLMOVE")
            .arg(QUEUE_KEY)
            .arg(&self.in_flight)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(DEQUEUE_TIMEOUT_SECS)
            .query_async(&mut self.conn)
            .await
            .context("Failed to move job from queue")?;

        let Some(raw) = payload else {
            return Ok(None);
        };

        match Delivery::parse(raw.clone()) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(e) => {
                // Unparseable messages can never succeed; drop them for good
                warn!("Discarding malformed queue message {:?}: {:#}", raw, e);
                self.remove_in_flight(&raw).await?;
                Ok(None)
            }
        }
    }

    /// Remove a finished delivery from the in-flight list
    pub async fn ack(&mut self, delivery: &Delivery) -> Result<()> {
        self.remove_in_flight(&delivery.raw).await
    }

    /// Put an unfinished delivery back at the head of the queue
    pub async fn retry(&mut self, delivery: &Delivery) -> Result<()> {
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.in_flight)
            .arg(1)
            .arg(&delivery.raw)
            .ignore()
            .cmd("RPUSH")
            .arg(QUEUE_KEY)
            .arg(&delivery.raw)
            .ignore()
            .query_async::<()>(&mut self.conn)
            .await
            .context("Failed to requeue job")?;
        Ok(())
    }

    async fn remove_in_flight(&mut self, raw: &str) -> Result<()> {
        self.conn
            .lrem::<_, _, ()>(&self.in_flight, 1, raw)
            .await
            .context("Failed to acknowledge job")?;
        Ok(())
    }

    /// Announce this worker and refresh its lease
    pub async fn heartbeat(&mut self) -> Result<()> {
        self.conn
            .sadd::<_, _, ()>(WORKERS_KEY, &self.worker_id)
            .await
            .context("Failed to register worker")?;
        self.conn
            .set_ex::<_, _, ()>(heartbeat_key(&self.worker_id), "alive", HEARTBEAT_TTL_SECS)
            .await
            .context("Failed to refresh worker heartbeat")?;
        Ok(())
    }

    /// Drop this worker's lease on clean shutdown
    pub async fn deregister(&mut self) -> Result<()> {
        self.conn
            .del::<_, ()>(heartbeat_key(&self.worker_id))
            .await
            .context("Failed to clear worker heartbeat")?;
        self.requeue_list(&self.in_flight.clone()).await?;
        self.conn
            .srem::<_, _, ()>(WORKERS_KEY, &self.worker_id)
            .await
            .context("Failed to deregister worker")?;
        Ok(())
    }

    /// Return messages held by workers whose heartbeat expired. Lists of
    /// live workers are never touched.
    pub async fn recover_abandoned(&mut self) -> Result<usize> {
        let workers: Vec<String> = self
            .conn
            .smembers(WORKERS_KEY)
            .await
            .context("Failed to list workers")?;

        let mut moved = 0;
        for worker_id in workers {
            if worker_id == self.worker_id {
                continue;
            }
            let alive: bool = self
                .conn
                .exists(heartbeat_key(&worker_id))
                .await
                .context("Failed to read worker heartbeat")?;
            if alive {
                continue;
            }

            let recovered = self.requeue_list(&processing_key(&worker_id)).await?;
            if recovered > 0 {
                info!(
                    "Requeued {} job(s) abandoned by worker {}",
                    recovered, worker_id
                );
            }
            moved += recovered;

            self.conn
                .srem::<_, _, ()>(WORKERS_KEY, &worker_id)
                .await
                .context("Failed to forget dead worker")?;
        }
        Ok(moved)
    }

    async fn requeue_list(&mut self, list: &str) -> Result<usize> {
        let mut moved = 0;
        loop {
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(list)
                .arg(QUEUE_KEY)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut self.conn)
                .await
                .context("Failed to requeue in-flight job")?;

            if payload.is_none() {
                break;
            }
            moved += 1;
        }
        Ok(moved)
    }
}
