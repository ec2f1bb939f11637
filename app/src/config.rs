// ==============================================================================
// config.rs - Shared Settings
// ==============================================================================
// Description: Settings common to the API gateway and the worker, flattened
//              into each binary's command line
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

use clap::Args;
use std::path::PathBuf;

use crate::intake::{UploadIntake, DEFAULT_MAX_FILES_PER_JOB};
use crate::job_store::{FsJobStore, JobStoreError};

#[derive(Args, Debug, Clone)]
pub struct Settings {
    /// Root directory holding one subdirectory per job
    #[arg(long, env = "JOBS_DIR", default_value = "./jobs")]
    pub jobs_dir: PathBuf,

    /// Redis instance backing the job queue
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Maximum sequence files accepted in one submission
    #[arg(long, env = "MAX_FILES_PER_JOB", default_value_t = DEFAULT_MAX_FILES_PER_JOB)]
    pub max_files_per_job: usize,
}

impl Settings {
    /// Open (creating if needed) the job store at `jobs_dir`
    pub async fn open_store(&self) -> Result<FsJobStore, JobStoreError> {
        FsJobStore::init(&self.jobs_dir).await
    }

    pub fn intake(&self) -> UploadIntake {
        UploadIntake::new(self.max_files_per_job)
    }
}
