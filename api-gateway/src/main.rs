// ==============================================================================
// main.rs - StaphScope API Gateway Entry Point
// ==============================================================================
// Description: Axum web server accepting genome uploads and serving job
//              status and results
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method},
    routing::{get, post},
    Router,
};
use clap::Parser;
use staphscope_jobs::results::DEFAULT_LOG_TAIL_LINES;
use staphscope_jobs::Settings;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod handlers;
mod models;
mod queue;
mod state;

use state::AppState;

/// Upload size accepted by default (50 MiB)
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    settings: Settings,

    /// Port to listen on
    #[arg(long, env = "SERVER_PORT", default_value_t = 5000)]
    port: u16,

    /// Request body limit for uploads
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    max_upload_bytes: usize,

    /// Log lines returned by a status poll
    #[arg(long, env = "LOG_TAIL_LINES", default_value_t = DEFAULT_LOG_TAIL_LINES)]
    log_tail_lines: usize,

    /// Comma-separated origins allowed by CORS
    #[arg(long, env = "CORS_ALLOWED_ORIGINS", default_value = "http://localhost:3000")]
    cors_allowed_origins: String,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "staphscope_api_gateway=info,staphscope_jobs=info,tower_http=info".into());
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

    info!("Starting StaphScope API Gateway v{}", env!("CARGO_PKG_VERSION"));

    // Initialize application state
    let state = AppState::new(&args.settings, args.log_tail_lines)
        .await
        .context("Failed to initialize application state")?;

    // Build router with all endpoints
    let app = build_router(state, args.max_upload_bytes, &args.cors_allowed_origins);

    // Bind server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("API Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    // Run server
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown requested");
        })
        .await
        .context("Server error")?;

    Ok(())
}

fn build_router(state: AppState, max_upload_bytes: usize, cors_origins: &str) -> Router {
    let allowed_origins: Vec<_> = cors_origins
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_credentials(false)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .expose_headers([header::CONTENT_TYPE, header::CONTENT_DISPOSITION]);

    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        // Job submission (file upload)
        .route("/submit", post(handlers::submit_job))
        // Job status with log tail
        .route("/status/{job_id}", get(handlers::get_job_status))
        // Results of completed jobs; the static download segment wins over the wildcard
        .route("/results/{job_id}", get(handlers::job_results))
        .route("/results/{job_id}/download", get(handlers::download_results))
        .route("/results/{job_id}/{*path}", get(handlers::result_file))
        .layer(
            ServiceBuilder::new()
                // Request tracing
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode};
    use serde_json::Value;
    use staphscope_jobs::dispatch::DispatchMessage;
    use staphscope_jobs::{ChannelDispatcher, FsJobStore, JobId, JobStore, UploadIntake};
    use std::io::{Cursor, Read, Write};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;
    use tower::ServiceExt;

    const BOUNDARY: &str = "staphscope-test-boundary";

    struct Harness {
        _dir: TempDir,
        store: Arc<FsJobStore>,
        app: Router,
        rx: UnboundedReceiver<DispatchMessage>,
    }

    async fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FsJobStore::init(dir.path().join("jobs")).await.unwrap());
        let (dispatcher, rx) = ChannelDispatcher::channel();
        let state = AppState::from_parts(
            store.clone(),
            Arc::new(dispatcher),
            UploadIntake::default(),
            DEFAULT_LOG_TAIL_LINES,
        );
        Harness {
            _dir: dir,
            store,
            app: build_router(state, DEFAULT_MAX_UPLOAD_BYTES, "http://localhost:3000"),
            rx,
        }
    }

    enum Part<'a> {
        File(&'a str, &'a [u8]),
        Text(&'a str, &'a str),
    }

    fn submit_request(parts: &[Part<'_>]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            write!(body, "--{}\r\n", BOUNDARY).unwrap();
            match part {
                Part::File(filename, data) => {
                    write!(
                        body,
                        "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n",
                        filename
                    )
                    .unwrap();
                    body.extend_from_slice(data);
                }
                Part::Text(name, value) => {
                    write!(
                        body,
                        "Content-Disposition: form-data; name=\"{}\"\r\n\r\n{}",
                        name, value
                    )
                    .unwrap();
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        write!(body, "--{}--\r\n", BOUNDARY).unwrap();

        Request::builder()
            .method("POST")
            .uri("/submit")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(response: Response<Body>) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response<Body>) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    fn job_dirs(store: &FsJobStore) -> usize {
        std::fs::read_dir(store.root()).unwrap().count()
    }

    /// Submit one FASTA file and return the new job's id
    async fn submit_one(h: &Harness) -> JobId {
        let response = h
            .app
            .clone()
            .oneshot(submit_request(&[Part::File("a.fasta", b">a\nACGT\n")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        body_json(response).await["job_id"]
            .as_str()
            .unwrap()
            .parse()
            .unwrap()
    }

    /// Complete a job with a small output tree, as a successful run would
    async fn complete(h: &Harness, job_id: &JobId) {
        let ws = h.store.prepare_workspace(job_id).await.unwrap();
        std::fs::create_dir_all(ws.output.join("mlst_results/GCA_000013425.1")).unwrap();
        std::fs::write(ws.output.join("summary.html"), "<h1>StaphScope</h1>").unwrap();
        std::fs::write(
            ws.output.join("mlst_results/GCA_000013425.1/mlst.tsv"),
            "sample\tST\n",
        )
        .unwrap();
        h.store.mark_completed(job_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness().await;
        let response = h.app.clone().oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_submit_stages_and_enqueues() {
        let mut h = harness().await;
        let request = submit_request(&[
            Part::File("isolate one.fasta", b">one\nACGT\n"),
            Part::File("isolate2.fna", b">two\nTTGA\n"),
            Part::Text("skip_modules", "spa"),
            Part::Text("skip_modules", "amr"),
        ]);

        let response = h.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let json = body_json(response).await;
        assert_eq!(json["file_count"], 2);
        assert_eq!(json["message"], "Processing 2 FASTA files");
        let job_id: JobId = json["job_id"].as_str().unwrap().parse().unwrap();

        let message = h.rx.try_recv().unwrap();
        assert_eq!(message.job_id, job_id);
        assert_eq!(message.skip_modules, vec!["spa", "amr"]);

        let mut inputs: Vec<String> = h
            .store
            .list_inputs(&job_id)
            .await
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        inputs.sort();
        assert_eq!(inputs, vec!["isolate2.fna", "isolate_one.fasta"]);
    }

    #[tokio::test]
    async fn test_submit_archive() {
        let h = harness().await;

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        zip.start_file("genomes/GCA_1.fasta", options).unwrap();
        zip.write_all(b">x\nACGT\n").unwrap();
        zip.start_file("genomes/notes.txt", options).unwrap();
        zip.write_all(b"ignored").unwrap();
        let archive = zip.finish().unwrap().into_inner();

        let response = h
            .app
            .clone()
            .oneshot(submit_request(&[Part::File("batch.zip", &archive)]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["file_count"], 1);
    }

    #[tokio::test]
    async fn test_submit_validation_errors() {
        let h = harness().await;

        let cases: Vec<(Vec<Part<'_>>, &str)> = vec![
            (vec![Part::Text("skip_modules", "mlst")], "No file part"),
            (vec![Part::File("", b"")], "No selected file"),
            (
                vec![Part::File("reads.fastq", b"@r1\nACGT\n")],
                "File reads.fastq must be FASTA or ZIP",
            ),
        ];

        for (parts, expected) in cases {
            let response = h.app.clone().oneshot(submit_request(&parts)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{expected}");
            assert_eq!(body_json(response).await["error"], expected);
        }
        assert_eq!(job_dirs(&h.store), 0);
    }

    #[tokio::test]
    async fn test_submit_too_many_files_leaves_nothing() {
        let h = harness().await;
        let names: Vec<String> = (0..11).map(|i| format!("g{i}.fasta")).collect();
        let parts: Vec<Part<'_>> = names
            .iter()
            .map(|n| Part::File(n.as_str(), b">g\nA\n"))
            .collect();

        let response = h.app.clone().oneshot(submit_request(&parts)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(job_dirs(&h.store), 0);
    }

    #[tokio::test]
    async fn test_submit_discards_job_when_queue_unavailable() {
        let mut h = harness().await;
        h.rx.close();

        let response = h
            .app
            .clone()
            .oneshot(submit_request(&[Part::File("a.fasta", b">a\nA\n")]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "Internal server error");
        assert_eq!(job_dirs(&h.store), 0);
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let h = harness().await;

        let response = h
            .app
            .clone()
            .oneshot(get_request(&format!("/status/{}", JobId::new())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = h.app.clone().oneshot(get_request("/status/not-a-job")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let job_id = submit_one(&h).await;
        let response = h
            .app
            .clone()
            .oneshot(get_request(&format!("/status/{}", job_id)))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["status"], "PENDING");
        assert!(json.get("error").is_none());

        h.store
            .mark_failed(&job_id, "StaphScope exited with code 17")
            .await
            .unwrap();
        let response = h
            .app
            .clone()
            .oneshot(get_request(&format!("/status/{}", job_id)))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["status"], "FAILED");
        assert!(json["error"].as_str().unwrap().contains("17"));
    }

    #[tokio::test]
    async fn test_results_gated_on_completion() {
        let h = harness().await;
        let job_id = submit_one(&h).await;

        for uri in [
            format!("/results/{}", job_id),
            format!("/results/{}/download", job_id),
            format!("/results/{}/summary.html", job_id),
        ] {
            let response = h.app.clone().oneshot(get_request(&uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_results_of_completed_job() {
        let h = harness().await;
        let job_id = submit_one(&h).await;
        complete(&h, &job_id).await;

        let response = h
            .app
            .clone()
            .oneshot(get_request(&format!("/results/{}", job_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["fasta_qc_exists"], false);
        assert_eq!(json["modules"]["mlst_results"][0], "GCA_000013425.1");

        let response = h
            .app
            .clone()
            .oneshot(get_request(&format!(
                "/results/{}/mlst_results/GCA_000013425.1/mlst.tsv",
                job_id
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/tab-separated-values; charset=utf-8"
        );
        assert_eq!(body_bytes(response).await, b"sample\tST\n");

        let response = h
            .app
            .clone()
            .oneshot(get_request(&format!("/results/{}/..%2F.done", job_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_download_archive() {
        let h = harness().await;
        let job_id = submit_one(&h).await;
        complete(&h, &job_id).await;

        let response = h
            .app
            .clone()
            .oneshot(get_request(&format!("/results/{}/download", job_id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            format!("attachment; filename=\"staphscope_results_{}.zip\"", job_id).as_str()
        );

        let mut archive = zip::ZipArchive::new(Cursor::new(body_bytes(response).await)).unwrap();
        let mut names: Vec<String> = archive.file_names().map(|n| n.to_string()).collect();
        names.sort();
        assert_eq!(names, vec!["mlst_results/GCA_000013425.1/mlst.tsv", "summary.html"]);

        let mut summary = String::new();
        archive
            .by_name("summary.html")
            .unwrap()
            .read_to_string(&mut summary)
            .unwrap();
        assert_eq!(summary, "<h1>StaphScope</h1>");
    }
}
