//! End-to-end tests driving the HTTP surface directly, the same
//! `tower::ServiceExt::oneshot` harness the unit tests in `src/api` use,
//! but exercising a full upload-to-results round trip across real modules
//! rather than a single handler.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use riskpipe::analysis::{NullAnalyzer, NullReasoner};
use riskpipe::api::{api_router, AppState};
use riskpipe::blobstore::{BlobStore, FilesystemBlobStore};
use riskpipe::config::AppConfig;
use riskpipe::domain::PhaseName;
use riskpipe::orchestrator::AnalysisOrchestrator;
use riskpipe::progress::ProgressStore;
use riskpipe::queue::{InProcessQueue, QueueTask, TaskQueue};
use riskpipe::store::db::Db;
use riskpipe::store::JobStore;
use serde_json::Value;
use tower::ServiceExt;

async fn build_app() -> axum::Router {
    let store = JobStore::new(Db::new_in_memory().unwrap());
    let progress = Arc::new(ProgressStore::new(Duration::from_secs(3600)));
    let dir = tempfile::tempdir().unwrap();
    let blobs: Arc<dyn BlobStore> = Arc::new(FilesystemBlobStore::new(dir.path().to_path_buf()));

    let analyzers: Vec<Arc<dyn riskpipe::analysis::PerceptualAnalyzer>> = PhaseName::ANALYZER_PHASES
        .iter()
        .map(|p| Arc::new(NullAnalyzer::new(*p)) as Arc<dyn riskpipe::analysis::PerceptualAnalyzer>)
        .collect();
    let orchestrator = Arc::new(AnalysisOrchestrator::new(
        store.clone(),
        progress.clone(),
        blobs.clone(),
        analyzers,
        Arc::new(NullReasoner),
        3,
    ));

    let queue: Arc<dyn TaskQueue> = Arc::new(InProcessQueue::new(
        16,
        Arc::new(move |task: QueueTask| {
            let orchestrator = orchestrator.clone();
            Box::pin(async move {
                if let QueueTask::RunAnalysis { job_id } = task {
                    orchestrator.run_job(&job_id).await;
                }
            })
        }),
    ));

    let config = Arc::new(AppConfig {
        database_url: ":memory:".to_string(),
        bind_addr: "127.0.0.1:0".to_string(),
        blob_root: dir.path().to_path_buf(),
        queue_capacity: 16,
        max_upload_bytes: 10 * 1024 * 1024,
        allowed_extensions: vec!["mp4".to_string()],
        gcs_enabled: false,
        gcs_signing_account: None,
        media_processor_path: "ffmpeg".to_string(),
        font_path: "/dev/null".to_string(),
        progress_ttl_secs: 86400,
    });
    std::mem::forget(dir);

    api_router(Arc::new(AppState { store, progress, blobs, queue, config }))
}

fn multipart_body(boundary: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"clip.mp4\"\r\n");
    body.extend_from_slice(b"Content-Type: video/mp4\r\n\r\n");
    body.extend_from_slice(b"fake-mp4-bytes");
    body.extend_from_slice(b"\r\n");
    for (field, value) in [("purpose", "ad"), ("platform", "tiktok"), ("target_audience", "teens")] {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}\r\n").as_bytes());
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn upload_through_results_round_trip() {
    let app = build_app().await;
    let boundary = "X-TEST-BOUNDARY";
    let body = multipart_body(boundary);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/videos")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let job: Value = serde_json::from_slice(&bytes).unwrap();
    let job_id = job["id"].as_str().unwrap().to_string();
    assert_eq!(job["status"], "pending");

    // The in-process queue dispatches asynchronously; give the worker a
    // moment to drive the job through the null analyzers and reasoner.
    let mut completed = false;
    for _ in 0..20 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/jobs/{job_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let job: Value = serde_json::from_slice(&bytes).unwrap();
        if job["status"] == "completed" {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert!(completed, "job did not reach a completed status in time");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/jobs/{job_id}/results"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let results: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(results["risk_items"].as_array().unwrap().is_empty());
    assert!(!results["video_url"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn uploading_a_disallowed_extension_is_rejected() {
    let app = build_app().await;
    let boundary = "X-TEST-BOUNDARY";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"clip.mov\"\r\n\r\n");
    body.extend_from_slice(b"not-an-mp4");
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/videos")
                .header("content-type", format!("multipart/form-data; boundary={boundary}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn results_before_completion_is_rejected() {
    let app = build_app().await;
    // A job id that was never created: results should 404, not 500.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/jobs/does-not-exist/results")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
