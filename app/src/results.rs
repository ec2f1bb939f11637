// ==============================================================================
// results.rs - Job Status & Result Views
// ==============================================================================
// Description: Read-only views over the job store: status polling, artifact
//              resolution, output listings and the results ZIP
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// Security: Artifact paths are confined to the job's output directory;
//           escaping paths are rejected, never rewritten
// ==============================================================================

use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{Cursor, ErrorKind};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::job_store::{JobId, JobState, JobStore, JobStoreError};

/// Log lines returned by a status poll unless configured otherwise
pub const DEFAULT_LOG_TAIL_LINES: usize = 20;

/// Output directory written by the FASTA QC module
pub const FASTA_QC_DIR: &str = "fasta_qc_results";

/// Output directory written by the visualization module
pub const VISUALIZATIONS_DIR: &str = "STAPHSCOPE_VISUALIZATIONS";

const SAMPLE_PREFIXES: &[&str] = &["GCA_", "GCF_"];

#[derive(Error, Debug)]
pub enum ResultsError {
    #[error("Results not found or job still processing")]
    NotCompleted(JobId),

    #[error("Artifact path rejected: {0}")]
    PathRejected(String),

    #[error("Artifact not found: {0}")]
    ArtifactMissing(String),

    #[error("Failed to build results archive: {0}")]
    Archive(String),

    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResultsError {
    /// Everything except internal faults answers as "not found"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ResultsError::NotCompleted(_)
                | ResultsError::PathRejected(_)
                | ResultsError::ArtifactMissing(_)
                | ResultsError::Store(JobStoreError::NotFound(_))
        )
    }
}

/// Snapshot returned to status pollers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub state: JobState,
    pub log: Vec<String>,
}

pub async fn job_status(
    store: &dyn JobStore,
    job_id: &JobId,
    tail_lines: usize,
) -> Result<StatusView, JobStoreError> {
    let state = store.read_state(job_id).await?;
    let log = store.tail_log(job_id, tail_lines).await?;
    Ok(StatusView { state, log })
}

/// Gate for every results view: returns the output root of a completed job
pub async fn completed_output(
    store: &dyn JobStore,
    job_id: &JobId,
) -> Result<PathBuf, ResultsError> {
    match store.read_state(job_id).await? {
        JobState::Completed => Ok(store.output_root(job_id)),
        _ => Err(ResultsError::NotCompleted(*job_id)),
    }
}

/// Lexically confine `relative` to `root`.
///
/// `..` is allowed only while it stays inside the root; absolute paths and
/// anything that climbs above the root are rejected.
pub fn contained_path(root: &Path, relative: &str) -> Result<PathBuf, ResultsError> {
    let rejected = || ResultsError::PathRejected(relative.to_string());

    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(rejected());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(rejected()),
        }
    }

    if parts.is_empty() {
        return Err(rejected());
    }

    Ok(parts.iter().fold(root.to_path_buf(), |path, part| path.join(part)))
}

/// Resolve an artifact to a regular file inside `output_root`, following
/// symlinks only as far as they stay inside it.
pub async fn resolve_artifact(output_root: &Path, relative: &str) -> Result<PathBuf, ResultsError> {
    let candidate = contained_path(output_root, relative)?;

    let canonical = match tokio::fs::canonicalize(&candidate).await {
        Ok(path) => path,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ResultsError::ArtifactMissing(relative.to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let canonical_root = tokio::fs::canonicalize(output_root).await?;

    if !canonical.starts_with(&canonical_root) {
        return Err(ResultsError::PathRejected(relative.to_string()));
    }

    if !tokio::fs::metadata(&canonical).await?.is_file() {
        return Err(ResultsError::ArtifactMissing(relative.to_string()));
    }

    Ok(canonical)
}

/// Archive name relative to the output root, always with `/` separators
fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn output_files(output_root: &Path) -> Result<Vec<(String, PathBuf)>, ResultsError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(output_root).sort_by_file_name() {
        let entry = entry.map_err(|e| ResultsError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = relative_name(output_root, entry.path()) {
            files.push((name, entry.into_path()));
        }
    }
    files.sort();
    Ok(files)
}

/// Every regular file under the output root, as sorted relative paths
pub fn list_artifacts(output_root: &Path) -> Result<Vec<String>, ResultsError> {
    if !output_root.is_dir() {
        return Ok(Vec::new());
    }
    Ok(output_files(output_root)?
        .into_iter()
        .map(|(name, _)| name)
        .collect())
}

/// ZIP (deflate) of the whole output tree, built in memory
pub fn build_archive(output_root: &Path) -> Result<Vec<u8>, ResultsError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    let files = if output_root.is_dir() {
        output_files(output_root)?
    } else {
        Vec::new()
    };

    for (name, path) in &files {
        debug!("Adding to ZIP: {}", name);
        zip.start_file(name.as_str(), options)
            .map_err(|e| ResultsError::Archive(e.to_string()))?;
        let mut file = std::fs::File::open(path)?;
        std::io::copy(&mut file, &mut zip)?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| ResultsError::Archive(e.to_string()))?;

    info!(
        "Results archive built with {} file(s) from {:?}",
        files.len(),
        output_root
    );
    Ok(cursor.into_inner())
}

/// Whether `relative` exists (file or directory) in the job's output
pub async fn output_file_exists(store: &dyn JobStore, job_id: &JobId, relative: &str) -> bool {
    match contained_path(&store.output_root(job_id), relative) {
        Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
        Err(_) => false,
    }
}

/// Sample folders (`GCA_*`, `GCF_*`) inside one module's output directory
pub async fn sample_folders(
    store: &dyn JobStore,
    job_id: &JobId,
    module: &str,
) -> Result<Vec<String>, ResultsError> {
    let module_dir = match contained_path(&store.output_root(job_id), module) {
        Ok(path) => path,
        Err(_) => return Ok(Vec::new()),
    };

    let mut entries = match tokio::fs::read_dir(&module_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut samples = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_sample = SAMPLE_PREFIXES.iter().any(|p| name.starts_with(p));
        if is_sample && entry.file_type().await?.is_dir() {
            samples.push(name);
        }
    }
    samples.sort();
    Ok(samples)
}

/// Data behind the results page of a completed job
#[derive(Debug, Clone, Serialize)]
pub struct ResultsView {
    pub job_id: JobId,
    pub fasta_qc_exists: bool,
    pub vis_exists: bool,
    /// Top-level module directory → sample folders inside it
    pub modules: BTreeMap<String, Vec<String>>,
    pub artifacts: Vec<String>,
}

pub async fn results_view(store: &dyn JobStore, job_id: &JobId) -> Result<ResultsView, ResultsError> {
    let output_root = completed_output(store, job_id).await?;

    let mut modules = BTreeMap::new();
    if let Ok(mut entries) = tokio::fs::read_dir(&output_root).await {
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                let module = entry.file_name().to_string_lossy().into_owned();
                let samples = sample_folders(store, job_id, &module).await?;
                modules.insert(module, samples);
            }
        }
    }

    let root = output_root.clone();
    let artifacts = tokio::task::spawn_blocking(move || list_artifacts(&root))
        .await
        .map_err(|e| ResultsError::Archive(e.to_string()))??;

    Ok(ResultsView {
        job_id: *job_id,
        fasta_qc_exists: output_file_exists(store, job_id, FASTA_QC_DIR).await,
        vis_exists: output_file_exists(store, job_id, VISUALIZATIONS_DIR).await,
        modules,
        artifacts,
    })
}

/// Archive of a completed job's outputs; fails like artifact serving otherwise
pub async fn download_archive(store: &dyn JobStore, job_id: &JobId) -> Result<Vec<u8>, ResultsError> {
    let output_root = completed_output(store, job_id).await?;
    tokio::task::spawn_blocking(move || build_archive(&output_root))
        .await
        .map_err(|e| ResultsError::Archive(e.to_string()))?
}
