// ==============================================================================
// intake.rs - Upload Intake
// ==============================================================================
// Description: Validates uploaded FASTA/ZIP items and stages them into a job
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// Security: Allowlist-only extensions, sanitized names, bounded ZIP expansion
// ==============================================================================

use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::job_store::{is_allowed_sequence_file, JobId, JobStore, JobStoreError};

/// Default maximum number of FASTA files per job
pub const DEFAULT_MAX_FILES_PER_JOB: usize = 10;

// ZIP expansion limits
const MAX_ZIP_ENTRIES: usize = 10_000;

/// Default cap on bytes extracted from one archive
pub const DEFAULT_MAX_EXTRACTED_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// One uploaded item from a submission
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub filename: String,
    pub data: Vec<u8>,
}

impl UploadItem {
    pub fn new(filename: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    pub fn is_archive(&self) -> bool {
        self.filename.to_lowercase().ends_with(".zip")
    }
}

/// A job whose inputs have been fully staged
#[derive(Debug, Clone)]
pub struct StagedSubmission {
    pub job_id: JobId,
    /// Staged file names, in order of first arrival
    pub files: Vec<String>,
}

impl StagedSubmission {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Errors raised while staging a submission
#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("No valid FASTA files found")]
    NoValidInput,

    #[error("File {0} must be FASTA or ZIP")]
    UnsupportedFormat(String),

    #[error("Maximum {max} FASTA files allowed per job. You uploaded {count} files.")]
    TooManyFiles { max: usize, count: usize },

    #[error("Invalid ZIP archive {name}: {reason}")]
    InvalidArchive { name: String, reason: String },

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

impl IntakeError {
    /// Validation errors are the submitter's fault (4xx); the rest are internal
    pub fn is_validation(&self) -> bool {
        !matches!(self, IntakeError::Store(_))
    }
}

enum ClassifiedItem {
    Sequence { name: String, data: Vec<u8> },
    Archive { name: String, data: Vec<u8> },
}

/// Stages submissions into the job store
#[derive(Debug, Clone)]
pub struct UploadIntake {
    max_files: usize,
    max_extracted_bytes: u64,
}

impl Default for UploadIntake {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FILES_PER_JOB)
    }
}

impl UploadIntake {
    pub fn new(max_files: usize) -> Self {
        Self {
            max_files,
            max_extracted_bytes: DEFAULT_MAX_EXTRACTED_BYTES,
        }
    }

    /// Cap the decompressed bytes taken from each archive
    pub fn with_max_extracted_bytes(mut self, limit: u64) -> Self {
        self.max_extracted_bytes = limit;
        self
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Validate and stage every item of a submission into a fresh job.
    ///
    /// Single files are validated before the job exists. Any failure after
    /// the job directory was created discards the whole job, so a rejected
    /// submission never leaves anything behind.
    pub async fn stage(
        &self,
        store: &dyn JobStore,
        items: Vec<UploadItem>,
    ) -> Result<StagedSubmission, IntakeError> {
        let classified = items
            .into_iter()
            .map(classify)
            .collect::<Result<Vec<_>, _>>()?;

        let job_id = store.create_job().await?;

        let result = self.stage_into(store, &job_id, classified).await;
        let files = match result {
            Ok(files) if files.is_empty() => Err(IntakeError::NoValidInput),
            Ok(files) if files.len() > self.max_files => Err(IntakeError::TooManyFiles {
                max: self.max_files,
                count: files.len(),
            }),
            other => other,
        };

        match files {
            Ok(files) => {
                info!("Job {} staged with {} FASTA file(s)", job_id, files.len());
                Ok(StagedSubmission { job_id, files })
            }
            Err(e) => {
                warn!("Rejecting submission for job {}: {}", job_id, e);
                if let Err(discard_err) = store.discard_job(&job_id).await {
                    warn!("Failed to discard rejected job {}: {}", job_id, discard_err);
                }
                Err(e)
            }
        }
    }

    async fn stage_into(
        &self,
        store: &dyn JobStore,
        job_id: &JobId,
        items: Vec<ClassifiedItem>,
    ) -> Result<Vec<String>, IntakeError> {
        let mut staged: Vec<String> = Vec::new();

        for item in items {
            match item {
                ClassifiedItem::Sequence { name, data } => {
                    stage_one(store, job_id, &name, &data).await?;
                    record(&mut staged, name);
                }
                ClassifiedItem::Archive { name, data } => {
                    let archive_name = name.clone();
                    let budget = self.max_extracted_bytes;
                    let entries = tokio::task::spawn_blocking(move || {
                        extract_sequence_files(&name, data, budget)
                    })
                    .await
                    .map_err(|e| IntakeError::InvalidArchive {
                        name: archive_name.clone(),
                        reason: format!("extraction task failed: {}", e),
                    })??;

                    info!(
                        "Archive {} yielded {} FASTA entr{}",
                        archive_name,
                        entries.len(),
                        if entries.len() == 1 { "y" } else { "ies" }
                    );

                    // Later entries with the same base name overwrite earlier ones
                    for (entry_name, entry_data) in entries {
                        stage_one(store, job_id, &entry_name, &entry_data).await?;
                        record(&mut staged, entry_name);
                    }
                }
            }
        }

        Ok(staged)
    }
}

fn record(staged: &mut Vec<String>, name: String) {
    if !staged.contains(&name) {
        staged.push(name);
    }
}

async fn stage_one(
    store: &dyn JobStore,
    job_id: &JobId,
    name: &str,
    data: &[u8],
) -> Result<(), IntakeError> {
    store.stage_input(job_id, name, data).await?;
    info!(
        "Staged {} for job {} ({} bytes, SHA256: {})",
        name,
        job_id,
        data.len(),
        &sha256_hex(data)[..16]
    );
    Ok(())
}

fn classify(item: UploadItem) -> Result<ClassifiedItem, IntakeError> {
    if item.is_archive() {
        return Ok(ClassifiedItem::Archive {
            name: item.filename,
            data: item.data,
        });
    }

    let name = sanitize_filename(&item.filename)
        .filter(|name| is_allowed_sequence_file(name))
        .ok_or_else(|| IntakeError::UnsupportedFormat(item.filename.clone()))?;

    Ok(ClassifiedItem::Sequence {
        name,
        data: item.data,
    })
}

/// Reduce an uploaded name to a safe single path component.
///
/// Only the final component is kept; anything outside `[A-Za-z0-9._-]` is
/// dropped (whitespace becomes `_`). Empty or dot-leading results are refused.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or("");

    let safe: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '.' || *c == '-')
        .take(255)
        .collect();

    if safe.is_empty() || safe.starts_with('.') {
        return None;
    }
    Some(safe)
}

/// Expand an archive in memory and collect its FASTA entries, flattened to
/// their base names, in archive order.
///
/// `budget` bounds the bytes actually decompressed; sizes declared in the
/// archive headers are not trusted.
fn extract_sequence_files(
    archive_name: &str,
    data: Vec<u8>,
    budget: u64,
) -> Result<Vec<(String, Vec<u8>)>, IntakeError> {
    let invalid = |reason: String| IntakeError::InvalidArchive {
        name: archive_name.to_string(),
        reason,
    };

    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(|e| invalid(e.to_string()))?;

    if archive.len() > MAX_ZIP_ENTRIES {
        return Err(invalid(format!(
            "{} entries, limit is {}",
            archive.len(),
            MAX_ZIP_ENTRIES
        )));
    }

    let mut extracted_bytes: u64 = 0;
    let mut extracted = Vec::new();

    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(|e| invalid(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }

        let Some(enclosed) = entry.enclosed_name() else {
            warn!("Skipping unsafe archive entry {:?} in {}", entry.name(), archive_name);
            continue;
        };

        let Some(name) = base_name(&enclosed).and_then(|n| sanitize_filename(&n)) else {
            continue;
        };
        if !is_allowed_sequence_file(&name) {
            debug!("Ignoring non-FASTA archive entry {}", entry.name());
            continue;
        }

        let remaining = budget - extracted_bytes;
        let mut contents = Vec::new();
        entry
            .take(remaining.saturating_add(1))
            .read_to_end(&mut contents)
            .map_err(|e| invalid(e.to_string()))?;

        if contents.len() as u64 > remaining {
            return Err(invalid(format!("extracted size exceeds {} bytes", budget)));
        }
        extracted_bytes += contents.len() as u64;

        extracted.push((name, contents));
    }

    Ok(extracted)
}

fn base_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
