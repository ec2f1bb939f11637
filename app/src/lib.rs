// ==============================================================================
// lib.rs - StaphScope Job Lifecycle Library
// ==============================================================================
// Description: Job store, upload intake, dispatch contract, process
//              supervision and result views shared by gateway and worker
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

pub mod config;
pub mod dispatch;
pub mod intake;
pub mod job_store;
pub mod results;
pub mod supervisor;

pub use config::Settings;
pub use dispatch::{ChannelDispatcher, DispatchError, DispatchMessage, TaskDispatcher};
pub use intake::{IntakeError, StagedSubmission, UploadIntake, UploadItem};
pub use job_store::{FsJobStore, JobId, JobState, JobStore, JobStoreError, RunClaim};
pub use results::ResultsError;
pub use supervisor::{RunOutcome, Supervisor, SupervisorError, ToolConfig};
