//! HTTP surface: axum router, handlers, shared application state, and the
//! SSE progress stream.
//!
//! `AppState`/`SharedState`, the router assembly, and the
//! `tower::ServiceExt::oneshot` test-harness pattern used below all follow
//! the teacher's `factory::api`/`factory::server` shape.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::blobstore::BlobStore;
use crate::config::AppConfig;
use crate::domain::{
    EditAction, EditActionOptions, EditActionType, EditSessionStatus, ExportStatus, JobMetadata, JobStatus,
};
use crate::errors::ApiError;
use crate::progress::{ProgressStore, Snapshot};
use crate::queue::{QueueTask, TaskQueue};
use crate::store::JobStore;

pub struct AppState {
    pub store: JobStore,
    pub progress: Arc<ProgressStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub config: Arc<AppConfig>,
}

pub type SharedState = Arc<AppState>;

pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/videos", post(create_video))
        .route("/jobs", get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/progress", get(get_progress))
        .route("/jobs/{id}/events", get(job_events))
        .route("/jobs/{id}/results", get(get_results))
        .route("/jobs/{id}/video", get(stream_video))
        .route("/jobs/{id}/video-url", get(video_url))
        .route("/jobs/{id}/edit-session", get(get_edit_session).put(put_edit_session))
        .route("/jobs/{id}/export", post(create_export))
        .route("/jobs/{id}/export/status", get(export_status))
        .route("/jobs/{id}/export/download", get(export_download))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

// ── Videos / job creation ──────────────────────────────────────────────

async fn create_video(State(state): State<SharedState>, mut multipart: Multipart) -> Result<impl IntoResponse, ApiError> {
    let mut file_bytes: Option<Bytes> = None;
    let mut file_name = String::new();
    let mut purpose = None;
    let mut platform = None;
    let mut target_audience = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "file" => {
                file_name = field.file_name().unwrap_or("upload.mp4").to_string();
                file_bytes = Some(field.bytes().await.map_err(|e| ApiError::Validation(e.to_string()))?);
            }
            "purpose" => purpose = Some(field.text().await.map_err(|e| ApiError::Validation(e.to_string()))?),
            "platform" => platform = Some(field.text().await.map_err(|e| ApiError::Validation(e.to_string()))?),
            "target_audience" => {
                target_audience = Some(field.text().await.map_err(|e| ApiError::Validation(e.to_string()))?)
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| ApiError::Validation("missing file field".to_string()))?;
    let ext = file_name
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_lowercase();
    if !state.config.is_extension_allowed(&ext) {
        return Err(ApiError::UnsupportedMediaType(format!("extension .{ext} is not allowed")));
    }
    if bytes.len() as u64 > state.config.max_upload_bytes {
        return Err(ApiError::PayloadTooLarge(format!(
            "upload exceeds {} bytes",
            state.config.max_upload_bytes
        )));
    }

    let blob_key = format!("videos/{}.{ext}", uuid::Uuid::new_v4());
    state.blobs.put(&blob_key, bytes.clone()).await.map_err(ApiError::from)?;

    let video = state
        .store
        .create_video(blob_key, file_name, bytes.len() as i64)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let metadata = JobMetadata {
        purpose: purpose.unwrap_or_default(),
        platform: platform.unwrap_or_default(),
        target_audience: target_audience.unwrap_or_default(),
    };
    let job = state
        .store
        .create_analysis_job(video.id, metadata)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    state
        .queue
        .enqueue(QueueTask::RunAnalysis { job_id: job.id.clone() })
        .await
        .map_err(ApiError::from)?;

    Ok((axum::http::StatusCode::ACCEPTED, Json(job)))
}

async fn list_jobs(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let jobs = state.store.list_jobs().await.map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(jobs))
}

async fn get_job(State(state): State<SharedState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    Ok(Json(job))
}

async fn get_progress(State(state): State<SharedState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;

    let snapshot = state.progress.get(&id).await.unwrap_or_else(|| Snapshot::synthetic_pending(&id));
    Ok(Json(snapshot))
}

/// Emits the current snapshot immediately on connect (or `{}` if none
/// exists yet), then polls once per second and emits a `progress` event
/// only when the snapshot differs (structural equality) from the last one
/// emitted on this connection — suppressing any apparent regression in
/// `overall` unless the job has transitioned to `failed`. A final
/// `complete` event carrying just `{"status": ...}` closes the stream once
/// the job reaches a terminal state.
async fn job_events(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;

    let progress = state.progress.clone();
    let stream = stream::unfold(
        (progress, id, None::<Snapshot>, false, true),
        |(progress, id, last, done, first)| async move {
            if done {
                return None;
            }

            if first {
                let snapshot = progress.get(&id).await;
                let event = progress_event(snapshot.as_ref());
                return Some((Ok(event), (progress, id, snapshot, false, false)));
            }

            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                let snapshot = progress.get(&id).await;

                if let Some(s) = &snapshot {
                    if s.status.is_terminal() {
                        let event = Event::default()
                            .event("complete")
                            .json_data(json!({ "status": s.status }))
                            .unwrap_or_else(|_| Event::default());
                        return Some((Ok(event), (progress, id, snapshot, true, false)));
                    }
                }

                if snapshot == last {
                    continue;
                }
                if let (Some(new), Some(old)) = (&snapshot, &last) {
                    if new.overall < old.overall {
                        continue;
                    }
                }

                let event = progress_event(snapshot.as_ref());
                return Some((Ok(event), (progress, id, snapshot, false, false)));
            }
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn progress_event(snapshot: Option<&Snapshot>) -> Event {
    match snapshot {
        Some(s) => Event::default().event("progress").json_data(s).unwrap_or_else(|_| Event::default()),
        None => Event::default().event("progress").data("{}"),
    }
}

#[derive(Serialize)]
struct JobResults {
    job: crate::domain::AnalysisJob,
    risk_items: Vec<crate::domain::RiskItem>,
    video_url: String,
}

async fn get_results(State(state): State<SharedState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::Validation("job is not completed yet".to_string()));
    }
    let risk_items = state
        .store
        .list_risk_items(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let video = state
        .store
        .get_video(job.video_id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound("source video not found".to_string()))?;
    let video_url = state.blobs.presigned_url(&video.blob_path).await.map_err(ApiError::from)?;
    Ok(Json(JobResults { job, risk_items, video_url }))
}

async fn stream_video(State(state): State<SharedState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    let video = state
        .store
        .get_video(job.video_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound("source video not found".to_string()))?;
    let data = state.blobs.get(&video.blob_path).await.map_err(ApiError::from)?;
    let headers = [
        (axum::http::header::CONTENT_LENGTH, data.len().to_string()),
        (
            axum::http::header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", video.original_name),
        ),
    ];
    Ok((headers, data))
}

async fn video_url(State(state): State<SharedState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    let video = state
        .store
        .get_video(job.video_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound("source video not found".to_string()))?;
    let url = state.blobs.presigned_url(&video.blob_path).await.map_err(ApiError::from)?;
    Ok(Json(json!({ "url": url, "expires_in_seconds": 3600 })))
}

// ── Edit sessions ────────────────────────────────────────────────────

#[derive(Serialize)]
struct EditSessionView {
    session: crate::domain::EditSession,
    actions: Vec<EditAction>,
}

async fn get_edit_session(State(state): State<SharedState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    let session = state
        .store
        .get_or_create_session(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let actions = state
        .store
        .list_edit_actions(session.id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(EditSessionView { session, actions }))
}

#[derive(Debug, Deserialize)]
struct EditActionInput {
    id: Option<String>,
    action_type: EditActionType,
    start_sec: f64,
    end_sec: f64,
    risk_item_id: Option<String>,
    options: Option<EditActionOptions>,
}

fn validate_action_input(input: &EditActionInput) -> Result<(), ApiError> {
    if !(input.start_sec < input.end_sec) {
        return Err(ApiError::Validation("start_sec must be less than end_sec".to_string()));
    }
    match (&input.action_type, &input.options) {
        (EditActionType::Mosaic, Some(EditActionOptions::Mosaic { x, y, width, height, blur_strength })) => {
            if *x < 0.0 || *y < 0.0 || *width <= 0.0 || *height <= 0.0 {
                return Err(ApiError::Validation("mosaic geometry must be non-negative with positive size".to_string()));
            }
            if !(1..=100).contains(blur_strength) {
                return Err(ApiError::Validation("blur_strength must be in 1..=100".to_string()));
            }
        }
        (EditActionType::Telop, Some(EditActionOptions::Telop { text, x, y, font_size, font_color, .. })) => {
            if text.is_empty() || text.chars().count() > 500 {
                return Err(ApiError::Validation("telop text must be 1..500 characters".to_string()));
            }
            if *x < 0.0 || *y < 0.0 || *font_size <= 0.0 || *font_size > 200.0 {
                return Err(ApiError::Validation("telop geometry/font-size out of range".to_string()));
            }
            if !font_color.starts_with('#') || font_color.len() != 7 {
                return Err(ApiError::Validation("font_color must be formatted #RRGGBB".to_string()));
            }
        }
        (EditActionType::Cut | EditActionType::Mute | EditActionType::Skip, None) => {}
        (EditActionType::Mosaic | EditActionType::Telop, None) => {
            return Err(ApiError::Validation("mosaic/telop actions require options".to_string()));
        }
        _ => return Err(ApiError::Validation("options do not match action_type".to_string())),
    }
    Ok(())
}

async fn put_edit_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(inputs): Json<Vec<EditActionInput>>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    for input in &inputs {
        validate_action_input(input)?;
    }

    let session = state
        .store
        .get_or_create_session(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let existing = state
        .store
        .list_edit_actions(session.id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let existing_ids: std::collections::HashSet<String> = existing.iter().map(|a| a.id.clone()).collect();

    let mut kept = Vec::new();
    let mut new = Vec::new();
    let mut kept_ids = std::collections::HashSet::new();
    for input in inputs {
        match input.id {
            Some(existing_id) if existing_ids.contains(&existing_id) => {
                kept_ids.insert(existing_id.clone());
                kept.push(EditAction {
                    id: existing_id,
                    session_id: session.id.clone(),
                    action_type: input.action_type,
                    start_sec: input.start_sec,
                    end_sec: input.end_sec,
                    risk_item_id: input.risk_item_id,
                    options: input.options,
                });
            }
            Some(unknown_id) => {
                return Err(ApiError::Validation(format!("edit action {unknown_id} does not exist in this session")));
            }
            None => new.push(EditAction {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: session.id.clone(),
                action_type: input.action_type,
                start_sec: input.start_sec,
                end_sec: input.end_sec,
                risk_item_id: input.risk_item_id,
                options: input.options,
            }),
        }
    }
    let dropped_ids: Vec<String> = existing_ids.difference(&kept_ids).cloned().collect();

    state
        .store
        .replace_edit_actions(session.id.clone(), kept, new, dropped_ids)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let actions = state
        .store
        .list_edit_actions(session.id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(EditSessionView { session, actions }))
}

// ── Export ───────────────────────────────────────────────────────────

async fn create_export(State(state): State<SharedState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    let session = state
        .store
        .get_or_create_session(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if let Some(existing) = state
        .store
        .latest_export_job(session.id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        if existing.status.is_active() {
            return Err(ApiError::Conflict(format!(
                "export {} is already active for this session",
                existing.id
            )));
        }
    }

    let export = state
        .store
        .create_export_job(session.id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state
        .store
        .set_session_status(session.id, EditSessionStatus::Exporting)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    state
        .queue
        .enqueue(QueueTask::RunExport { export_id: export.id.clone() })
        .await
        .map_err(ApiError::from)?;

    Ok((axum::http::StatusCode::ACCEPTED, Json(export)))
}

async fn export_status(State(state): State<SharedState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    let session = state
        .store
        .get_or_create_session(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let export = state
        .store
        .latest_export_job(session.id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound("no export has been started for this session".to_string()))?;
    let progress = state.progress.get(&export.id).await;
    Ok(Json(json!({ "export": export, "progress": progress })))
}

async fn export_download(State(state): State<SharedState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    state
        .store
        .get_job(id.clone())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    let session = state
        .store
        .get_or_create_session(id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let export = state
        .store
        .latest_export_job(session.id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .ok_or_else(|| ApiError::NotFound("no export has been started for this session".to_string()))?;
    if export.status != ExportStatus::Completed {
        return Err(ApiError::Validation("export is not completed yet".to_string()));
    }
    let key = export
        .output_blob_path
        .ok_or_else(|| ApiError::Internal("completed export is missing an output path".to_string()))?;
    let url = state.blobs.presigned_url(&key).await.map_err(ApiError::from)?;
    Ok(Json(json!({ "url": url, "expires_in_seconds": 3600 })))
}
