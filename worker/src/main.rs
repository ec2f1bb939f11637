// ==============================================================================
// main.rs - StaphScope Worker Process
// ==============================================================================
// Description: Background worker that runs StaphScope for jobs taken from the
//              Redis queue
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::Parser;
use redis::aio::ConnectionManager;
use redis::Client as RedisClient;
use staphscope_jobs::supervisor::{DEFAULT_THREADS, DEFAULT_TIMEOUT_SECS};
use staphscope_jobs::{
    JobId, JobState, JobStore, JobStoreError, RunOutcome, Settings, Supervisor, SupervisorError,
    ToolConfig,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod queue;

use queue::{Delivery, JobQueue, HEARTBEAT_TTL_SECS};

/// Delay before a delivery that hit a transient error goes back to the queue
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    settings: Settings,

    /// StaphScope executable (resolved through PATH when not absolute)
    #[arg(long, env = "STAPHSCOPE_BIN", default_value = "staphscope")]
    staphscope_bin: PathBuf,

    /// Threads passed to StaphScope with -t
    #[arg(long, env = "STAPHSCOPE_THREADS", default_value_t = DEFAULT_THREADS)]
    threads: u32,

    /// Kill a run after this many seconds (0 disables the limit)
    #[arg(long, env = "STAPHSCOPE_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout_secs: u64,

    /// Jobs executed at the same time
    #[arg(long, env = "WORKER_CONCURRENCY", default_value_t = 1,
          value_parser = clap::value_parser!(u32).range(1..))]
    concurrency: u32,
}

impl Args {
    fn tool_config(&self) -> ToolConfig {
        let timeout = match self.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        ToolConfig::new(&self.staphscope_bin)
            .with_threads(self.threads)
            .with_timeout(timeout)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "staphscope_worker=info,staphscope_jobs=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).compact())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables before clap reads its env fallbacks
    dotenvy::dotenv().ok();

    init_tracing();
    let args = Args::parse();

    info!("Starting StaphScope Worker v{}", env!("CARGO_PKG_VERSION"));

    let store = args
        .settings
        .open_store()
        .await
        .context("Failed to initialize job store")?;

    // Initialize Redis connection
    let redis_client = RedisClient::open(args.settings.redis_url.as_str())
        .context("Failed to create Redis client")?;
    let redis_conn = ConnectionManager::new(redis_client)
        .await
        .context("Failed to create Redis connection manager")?;

    info!("Connected to Redis");

    let tool = args.tool_config();
    info!(
        "Running {:?} with {} thread(s), timeout {:?}, concurrency {}",
        tool.program, tool.threads, tool.timeout, args.concurrency
    );

    let store: Arc<dyn JobStore> = Arc::new(store);
    let worker_id = uuid::Uuid::new_v4().simple().to_string();
    let worker = Worker::new(
        store.clone(),
        Supervisor::new(store, tool),
        JobQueue::new(redis_conn, worker_id),
        args.concurrency,
    );

    worker
        .queue
        .clone()
        .heartbeat()
        .await
        .context("Failed to register worker")?;
    let heartbeat = tokio::spawn(keep_alive(worker.queue.clone()));

    info!("Worker {} ready, waiting for jobs...", worker.queue.worker_id());
    let result = worker.run(shutdown_signal()).await;

    heartbeat.abort();
    if let Err(e) = worker.queue.clone().deregister().await {
        warn!("Failed to deregister worker: {:#}", e);
    }
    result
}

/// Refresh this worker's lease and requeue jobs held by dead workers
async fn keep_alive(mut queue: JobQueue) {
    let mut ticker = tokio::time::interval(Duration::from_secs(HEARTBEAT_TTL_SECS / 3));
    loop {
        ticker.tick().await;
        if let Err(e) = queue.heartbeat().await {
            error!("Failed to refresh worker heartbeat: {:#}", e);
            continue;
        }
        if let Err(e) = queue.recover_abandoned().await {
            error!("Failed to recover abandoned jobs: {:#}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// What to do with a delivery once its run returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Ack,
    Retry,
}

/// Acknowledge only when nothing is left to do: the run finished, another
/// run owns the job, the job is gone or a terminal marker is on disk.
fn settle(
    result: &Result<RunOutcome, SupervisorError>,
    state: Result<JobState, JobStoreError>,
) -> Settlement {
    match result {
        Ok(_) => Settlement::Ack,
        Err(SupervisorError::Store(JobStoreError::NotFound(_))) => Settlement::Ack,
        Err(_) => match state {
            Ok(state) if state.is_terminal() => Settlement::Ack,
            Err(JobStoreError::NotFound(_)) => Settlement::Ack,
            _ => Settlement::Retry,
        },
    }
}

/// Main worker struct
#[derive(Clone)]
struct Worker {
    store: Arc<dyn JobStore>,
    supervisor: Arc<Supervisor>,
    queue: JobQueue,
    permits: Arc<Semaphore>,
    concurrency: u32,
}

impl Worker {
    fn new(
        store: Arc<dyn JobStore>,
        supervisor: Supervisor,
        queue: JobQueue,
        concurrency: u32,
    ) -> Self {
        Self {
            store,
            supervisor: Arc::new(supervisor),
            queue,
            permits: Arc::new(Semaphore::new(concurrency as usize)),
            concurrency,
        }
    }

    /// Main processing loop. Stops taking work once `shutdown` resolves and
    /// waits for running jobs before returning.
    async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut job_queue = self.queue.clone();

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = self.permits.clone().acquire_owned() => {
                    permit.context("Worker semaphore closed")?
                }
            };

            let delivery = tokio::select! {
                _ = &mut shutdown => break,
                delivery = job_queue.dequeue() => delivery,
            };

            match delivery {
                Ok(Some(delivery)) => {
                    info!("Received job: {}", delivery.message.job_id);

                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.process_job(delivery).await;
                        drop(permit);
                    });
                }
                // BLMOVE already waited; poll again
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to dequeue job: {:#}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }

        info!("Shutdown requested, waiting for running jobs to finish");
        let _all = self
            .permits
            .acquire_many(self.concurrency)
            .await
            .context("Worker semaphore closed")?;
        info!("Worker stopped");
        Ok(())
    }

    /// Run one job and settle its message. The supervisor logs the outcome
    /// and records it in the job store; a run that left the job pending goes
    /// back to the queue.
    async fn process_job(&self, delivery: Delivery) {
        let job_id = delivery.message.job_id;

        let result = self
            .supervisor
            .run(job_id, &delivery.message.skip_modules)
            .await;
        match &result {
            Ok(outcome) => debug!("Job {} finished: {:?}", job_id, outcome),
            Err(SupervisorError::Store(e)) => {
                warn!("Job {} could not be run: {}", job_id, e)
            }
            Err(_) => {}
        }

        let state = self.current_state(&job_id, &result).await;
        let mut job_queue = self.queue.clone();
        match settle(&result, state) {
            Settlement::Ack => {
                if let Err(e) = job_queue.ack(&delivery).await {
                    error!("Failed to acknowledge job {}: {:#}", job_id, e);
                }
            }
            Settlement::Retry => {
                warn!(
                    "Job {} is still pending, requeueing in {:?}",
                    job_id, RETRY_DELAY
                );
                tokio::time::sleep(RETRY_DELAY).await;
                if let Err(e) = job_queue.retry(&delivery).await {
                    error!("Failed to requeue job {}: {:#}", job_id, e);
                }
            }
        }
    }

    /// Job state after a failed run; successful runs need no lookup
    async fn current_state(
        &self,
        job_id: &JobId,
        result: &Result<RunOutcome, SupervisorError>,
    ) -> Result<JobState, JobStoreError> {
        match result {
            Ok(_) => Ok(JobState::Completed),
            Err(_) => self.store.read_state(job_id).await,
        }
    }
}
