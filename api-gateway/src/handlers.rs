// ==============================================================================
// handlers.rs - API Request Handlers
// ==============================================================================
// Description: HTTP request handlers for StaphScope job submission, status
//              polling and result retrieval
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use staphscope_jobs::results::{self, ResultsView};
use staphscope_jobs::{JobId, JobState, JobStoreError, ResultsError, UploadItem};
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::{models::*, state::AppState};

/// Root endpoint - API information
pub async fn root() -> Json<ApiInfoResponse> {
    Json(ApiInfoResponse {
        service: "StaphScope Web",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "/health - Health check",
            "/submit - Submit FASTA or ZIP files (POST, multipart)",
            "/status/{job_id} - Job status and log tail",
            "/results/{job_id} - Results overview of a completed job",
            "/results/{job_id}/download - ZIP of all outputs",
            "/results/{job_id}/{path} - Single result file",
        ],
    })
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now(),
    })
}

fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid job id: {}", raw)))
}

/// Submit job endpoint (file upload)
pub async fn submit_job(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobSubmitResponse>), AppError> {
    info!("Received job submission request");

    let mut saw_file_part = false;
    let mut items: Vec<UploadItem> = Vec::new();
    let mut skip_modules: Vec<String> = Vec::new();

    // Process multipart form fields
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Failed to read multipart field: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                saw_file_part = true;
                let filename = field.file_name().unwrap_or("").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file: {}", e)))?;

                // Browsers send an empty part when nothing was picked
                if filename.is_empty() {
                    continue;
                }
                items.push(UploadItem::new(filename, data.to_vec()));
            }

            "skip_modules" => {
                let module = field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read skip_modules: {}", e))
                })?;
                skip_modules.push(module);
            }

            other => {
                warn!("Ignoring unknown form field: {}", other);
            }
        }
    }

    if !saw_file_part {
        return Err(AppError::BadRequest("No file part".to_string()));
    }
    if items.is_empty() {
        return Err(AppError::BadRequest("No selected file".to_string()));
    }

    let staged = state
        .intake()
        .stage(state.store(), items)
        .await
        .map_err(|e| {
            if e.is_validation() {
                AppError::BadRequest(e.to_string())
            } else {
                AppError::Internal(format!("Failed to stage upload: {}", e))
            }
        })?;

    let job_id = staged.job_id;
    let file_count = staged.file_count();

    if let Err(e) = state.dispatcher().enqueue(job_id, skip_modules).await {
        // Without a queued message the job would stay PENDING forever
        if let Err(discard_err) = state.store().discard_job(&job_id).await {
            error!("Failed to discard unqueued job {}: {}", job_id, discard_err);
        }
        return Err(AppError::Internal(format!(
            "Failed to queue job {}: {}",
            job_id, e
        )));
    }

    info!("Job {} submitted with {} file(s)", job_id, file_count);

    Ok((
        StatusCode::ACCEPTED,
        Json(JobSubmitResponse {
            job_id,
            file_count,
            message: format!("Processing {} FASTA files", file_count),
        }),
    ))
}

/// Get job status endpoint
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, AppError> {
    let job_id = parse_job_id(&job_id)?;

    let view = results::job_status(state.store(), &job_id, state.log_tail_lines())
        .await
        .map_err(|e| match e {
            JobStoreError::NotFound(_) => AppError::NotFound("Job not found".to_string()),
            other => AppError::Internal(format!("Failed to read job status: {}", other)),
        })?;

    let error = match &view.state {
        JobState::Failed { error } => Some(error.clone()),
        _ => None,
    };

    Ok(Json(JobStatusResponse {
        status: JobStatus::from(&view.state),
        log: view.log,
        error,
    }))
}

/// Results overview of a completed job
pub async fn job_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ResultsView>, AppError> {
    let job_id = parse_job_id(&job_id)?;
    let view = results::results_view(state.store(), &job_id).await?;
    Ok(Json(view))
}

/// Download every output of a completed job as one ZIP
pub async fn download_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let job_id = parse_job_id(&job_id)?;
    let archive = results::download_archive(state.store(), &job_id).await?;

    info!("Serving results archive for job {} ({} bytes)", job_id, archive.len());

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"staphscope_results_{}.zip\"", job_id),
            ),
        ],
        Body::from(archive),
    )
        .into_response())
}

/// Serve a single file from a completed job's output directory
pub async fn result_file(
    State(state): State<AppState>,
    Path((job_id, path)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let job_id = parse_job_id(&job_id)?;
    let output_root = results::completed_output(state.store(), &job_id).await?;

    let file_path = results::resolve_artifact(&output_root, &path)
        .await
        .inspect_err(|e| {
            if matches!(e, ResultsError::PathRejected(_)) {
                warn!("Rejected artifact path for job {}: {:?}", job_id, path);
            }
        })?;

    let file = tokio::fs::File::open(&file_path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to open file: {}", e)))?;
    let file_size = file
        .metadata()
        .await
        .map_err(|e| AppError::Internal(format!("Failed to get file metadata: {}", e)))?
        .len();

    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, content_type(&path).to_string()),
            (header::CONTENT_LENGTH, file_size.to_string()),
        ],
        body,
    )
        .into_response())
}

/// MIME type from the file extension
fn content_type(path: &str) -> &'static str {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" => "text/javascript; charset=utf-8",
        "json" => "application/json",
        "tsv" | "tab" => "text/tab-separated-values; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "txt" | "log" | "fasta" | "fna" | "fa" | "fn" | "faa" | "gff" | "gbk" => {
            "text/plain; charset=utf-8"
        }
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        _ => "application/octet-stream",
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<ResultsError> for AppError {
    fn from(e: ResultsError) -> Self {
        if e.is_not_found() {
            AppError::NotFound(e.to_string())
        } else {
            AppError::Internal(e.to_string())
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(ErrorResponse::new(error_message));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type("summary.html"), "text/html; charset=utf-8");
        assert_eq!(content_type("mlst_results/GCA_1/mlst.TSV"), "text/tab-separated-values; charset=utf-8");
        assert_eq!(content_type("plots/tree.png"), "image/png");
        assert_eq!(content_type("README"), "application/octet-stream");
    }

    #[test]
    fn test_results_errors_map_to_not_found() {
        let job_id = JobId::new();
        assert!(matches!(
            AppError::from(ResultsError::NotCompleted(job_id)),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(ResultsError::PathRejected("../x".to_string())),
            AppError::NotFound(_)
        ));
        assert!(matches!(
            AppError::from(ResultsError::Archive("disk full".to_string())),
            AppError::Internal(_)
        ));
    }
}
