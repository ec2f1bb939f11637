// ==============================================================================
// job_store.rs - Filesystem-Backed Job Store
// ==============================================================================
// Description: Job identity, directory layout and terminal markers
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================
// Layout (must stay compatible with existing job trees):
//   <jobs-root>/<job-id>/
//       input/            staged FASTA files
//       output/           StaphScope results
//       tmp/              TMPDIR for the external process
//       staphscope.log    combined stdout/stderr, append-only
//       .done             completion marker
//       error.txt         failure marker
// ==============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const INPUT_DIR: &str = "input";
pub const OUTPUT_DIR: &str = "output";
pub const TMP_DIR: &str = "tmp";
pub const LOG_FILE: &str = "staphscope.log";
pub const DONE_MARKER: &str = ".done";
pub const ERROR_MARKER: &str = "error.txt";

const DONE_CONTENT: &str = "success";

/// FASTA extensions accepted as job inputs (case-insensitive suffix match)
pub const ALLOWED_EXTENSIONS: &[&str] = &[".fasta", ".fna", ".fa", ".fn", ".faa"];

/// Check if a file name carries one of the allowed FASTA extensions
pub fn is_allowed_sequence_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    ALLOWED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Opaque job identifier (UUIDv4 rendered as 32 lowercase hex characters)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(Uuid);

impl JobId {
    /// Allocate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for JobId {
    type Err = JobStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Only the canonical on-disk form is accepted, so an id can never
        // address anything but a direct child of the jobs root.
        let canonical = s.len() == 32
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !canonical {
            return Err(JobStoreError::InvalidJobId(s.to_string()));
        }

        Uuid::try_parse(s)
            .map(Self)
            .map_err(|_| JobStoreError::InvalidJobId(s.to_string()))
    }
}

impl TryFrom<String> for JobId {
    type Error = JobStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.to_string()
    }
}

/// Job lifecycle state, derived from the terminal markers on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Completed,
    Failed { error: String },
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Completed => "COMPLETED",
            JobState::Failed { .. } => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending)
    }
}

/// Resolved paths of a job's working tree
#[derive(Debug, Clone)]
pub struct JobWorkspace {
    pub root: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub tmp: PathBuf,
    pub log: PathBuf,
}

/// Exclusive right to execute one job, released on drop or process exit
pub struct RunClaim {
    _guard: Box<dyn Send + Sync>,
}

impl RunClaim {
    pub fn new(guard: impl Send + Sync + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for RunClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RunClaim")
    }
}

/// Append-only sink for the external process's output
pub type LogSink = Pin<Box<dyn AsyncWrite + Send>>;

/// Errors raised by job store operations
#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Invalid artifact name: {0}")]
    InvalidArtifact(String),

    #[error("Job {job_id} already carries a {existing} marker")]
    ConflictingMarker { job_id: JobId, existing: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistent job state shared by the gateway and the worker.
///
/// Every method is a pure function of the backing storage, so any process
/// holding a store over the same root observes the same state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Allocate a new job and its input area
    async fn create_job(&self) -> Result<JobId, JobStoreError>;

    /// Whether the job exists at all
    async fn exists(&self, job_id: &JobId) -> bool;

    /// Write one input artifact, replacing any file of the same name
    async fn stage_input(
        &self,
        job_id: &JobId,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, JobStoreError>;

    /// Staged inputs, sorted by file name
    async fn list_inputs(&self, job_id: &JobId) -> Result<Vec<PathBuf>, JobStoreError>;

    /// Remove a job entirely (intake rejection only)
    async fn discard_job(&self, job_id: &JobId) -> Result<(), JobStoreError>;

    /// Completion marker first, then failure marker, else pending
    async fn read_state(&self, job_id: &JobId) -> Result<JobState, JobStoreError>;

    /// Last `n` complete lines of the log
    async fn tail_log(&self, job_id: &JobId, n: usize) -> Result<Vec<String>, JobStoreError>;

    /// Take the job's execution lock, or `None` while another run holds it.
    /// Marker writes happen under this claim.
    async fn claim_run(&self, job_id: &JobId) -> Result<Option<RunClaim>, JobStoreError>;

    /// Ensure `output/` and `tmp/` exist and return the job's paths
    async fn prepare_workspace(&self, job_id: &JobId) -> Result<JobWorkspace, JobStoreError>;

    /// Open the log for appending, creating it if needed
    async fn open_log(&self, job_id: &JobId) -> Result<LogSink, JobStoreError>;

    async fn mark_completed(&self, job_id: &JobId) -> Result<(), JobStoreError>;

    async fn mark_failed(&self, job_id: &JobId, description: &str) -> Result<(), JobStoreError>;

    /// Root of the artifacts produced by the external tool
    fn output_root(&self, job_id: &JobId) -> PathBuf;
}

/// Job store rooted at a directory on the local filesystem
#[derive(Debug, Clone)]
pub struct FsJobStore {
    root: PathBuf,
}

impl FsJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the jobs root if it does not exist yet
    pub async fn init(root: impl Into<PathBuf>) -> Result<Self, JobStoreError> {
        let store = Self::new(root);
        tokio::fs::create_dir_all(&store.root).await?;
        info!("Job store ready at {:?}", store.root);
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &JobId) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    fn workspace(&self, job_id: &JobId) -> JobWorkspace {
        let root = self.job_dir(job_id);
        JobWorkspace {
            input: root.join(INPUT_DIR),
            output: root.join(OUTPUT_DIR),
            tmp: root.join(TMP_DIR),
            log: root.join(LOG_FILE),
            root,
        }
    }

    async fn require_job(&self, job_id: &JobId) -> Result<PathBuf, JobStoreError> {
        let dir = self.job_dir(job_id);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(JobStoreError::NotFound(*job_id)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(JobStoreError::NotFound(*job_id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a marker with create-new semantics. Returns false if it already existed.
    async fn write_marker(path: &Path, content: &str) -> Result<bool, JobStoreError> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await;

        let mut file = match file {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(true)
    }
}

/// Validate a name as a single plain path component
fn validate_artifact_name(file_name: &str) -> Result<(), JobStoreError> {
    let plain = !file_name.is_empty()
        && file_name != "."
        && file_name != ".."
        && !file_name.contains(['/', '\\', '\0']);

    if !plain || !is_allowed_sequence_file(file_name) {
        return Err(JobStoreError::InvalidArtifact(file_name.to_string()));
    }
    Ok(())
}

/// Split log bytes into lines, withholding a trailing line that has no
/// newline yet (it may still be mid-write).
fn complete_lines(data: &[u8], n: usize) -> Vec<String> {
    let complete = match data.iter().rposition(|&b| b == b'\n') {
        Some(last_newline) => &data[..=last_newline],
        None => return Vec::new(),
    };

    let text = String::from_utf8_lossy(complete);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].iter().map(|l| l.to_string()).collect()
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn create_job(&self) -> Result<JobId, JobStoreError> {
        let job_id = JobId::new();
        let workspace = self.workspace(&job_id);

        // create_dir (not create_dir_all) on the job root: a collision fails loudly
        tokio::fs::create_dir(&workspace.root).await?;
        tokio::fs::create_dir(&workspace.input).await?;

        info!("Created job {}", job_id);
        Ok(job_id)
    }

    async fn exists(&self, job_id: &JobId) -> bool {
        self.require_job(job_id).await.is_ok()
    }

    async fn stage_input(
        &self,
        job_id: &JobId,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, JobStoreError> {
        validate_artifact_name(file_name)?;
        self.require_job(job_id).await?;

        let input_dir = self.workspace(job_id).input;
        tokio::fs::create_dir_all(&input_dir).await?;

        let path = input_dir.join(file_name);
        tokio::fs::write(&path, bytes).await?;
        debug!("Staged {} for job {} ({} bytes)", file_name, job_id, bytes.len());
        Ok(path)
    }

    async fn list_inputs(&self, job_id: &JobId) -> Result<Vec<PathBuf>, JobStoreError> {
        self.require_job(job_id).await?;

        let mut inputs = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.workspace(job_id).input).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(inputs),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                inputs.push(entry.path());
            }
        }

        inputs.sort();
        Ok(inputs)
    }

    async fn discard_job(&self, job_id: &JobId) -> Result<(), JobStoreError> {
        let dir = self.job_dir(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!("Discarded job {}", job_id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_state(&self, job_id: &JobId) -> Result<JobState, JobStoreError> {
        let dir = self.require_job(job_id).await?;

        if tokio::fs::try_exists(dir.join(DONE_MARKER)).await? {
            return Ok(JobState::Completed);
        }

        match tokio::fs::read(dir.join(ERROR_MARKER)).await {
            Ok(bytes) => Ok(JobState::Failed {
                error: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(JobState::Pending),
            Err(e) => Err(e.into()),
        }
    }

    async fn tail_log(&self, job_id: &JobId, n: usize) -> Result<Vec<String>, JobStoreError> {
        let dir = self.require_job(job_id).await?;

        match tokio::fs::read(dir.join(LOG_FILE)).await {
            Ok(data) => Ok(complete_lines(&data, n)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn claim_run(&self, job_id: &JobId) -> Result<Option<RunClaim>, JobStoreError> {
        let dir = self.require_job(job_id).await?;

        let lock = tokio::task::spawn_blocking(move || lock_directory(&dir))
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))??;
        Ok(lock)
    }

    async fn prepare_workspace(&self, job_id: &JobId) -> Result<JobWorkspace, JobStoreError> {
        self.require_job(job_id).await?;

        let workspace = self.workspace(job_id);
        tokio::fs::create_dir_all(&workspace.output).await?;
        tokio::fs::create_dir_all(&workspace.tmp).await?;
        Ok(workspace)
    }

    async fn open_log(&self, job_id: &JobId) -> Result<LogSink, JobStoreError> {
        let dir = self.require_job(job_id).await?;

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(LOG_FILE))
            .await?;
        Ok(Box::pin(file))
    }

    async fn mark_completed(&self, job_id: &JobId) -> Result<(), JobStoreError> {
        let dir = self.require_job(job_id).await?;

        if tokio::fs::try_exists(dir.join(ERROR_MARKER)).await? {
            return Err(JobStoreError::ConflictingMarker {
                job_id: *job_id,
                existing: "failure",
            });
        }

        if !Self::write_marker(&dir.join(DONE_MARKER), DONE_CONTENT).await? {
            debug!("Completion marker for job {} already present", job_id);
        }
        Ok(())
    }

    async fn mark_failed(&self, job_id: &JobId, description: &str) -> Result<(), JobStoreError> {
        let dir = self.require_job(job_id).await?;

        if tokio::fs::try_exists(dir.join(DONE_MARKER)).await? {
            return Err(JobStoreError::ConflictingMarker {
                job_id: *job_id,
                existing: "completion",
            });
        }

        if !Self::write_marker(&dir.join(ERROR_MARKER), description).await? {
            warn!("Failure marker for job {} already present, keeping original", job_id);
        }
        Ok(())
    }

    fn output_root(&self, job_id: &JobId) -> PathBuf {
        self.workspace(job_id).output
    }
}

/// Non-blocking `flock` on the job directory. The kernel drops the lock when
/// the descriptor closes, so a crashed worker never leaves a stale claim.
#[cfg(unix)]
fn lock_directory(dir: &Path) -> std::io::Result<Option<RunClaim>> {
    use std::os::unix::io::AsRawFd;

    let file = std::fs::File::open(dir)?;
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc == 0 {
        return Ok(Some(RunClaim::new(file)));
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        Ok(None)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn lock_directory(dir: &Path) -> std::io::Result<Option<RunClaim>> {
    std::fs::metadata(dir)?;
    warn!("Job locks are not supported on this platform, running unguarded");
    Ok(Some(RunClaim::new(())))
}
