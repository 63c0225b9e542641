//! Typed error hierarchies, one per subsystem, mirroring the teacher's
//! `OrchestratorError` / `PhaseError` / `FactoryError` split.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors from the Analysis Orchestrator and Export Runner: subprocess
/// spawning, blob I/O, and transient upstream failures.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to spawn media processor: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("subprocess timed out after {seconds}s")]
    SubprocessTimeout { seconds: u64 },

    #[error("subprocess exited with code {code}")]
    SubprocessNonZeroExit { code: i32 },

    #[error("blob operation failed: {0}")]
    BlobIo(String),

    #[error("analyzer phase {phase} failed: {message}")]
    AnalyzerFailed { phase: String, message: String },

    #[error("all analyzer phases failed for job {job_id}")]
    AllPhasesFailed { job_id: String },

    #[error("task queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the Job Record Store and Progress Store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("video {id} not found")]
    VideoNotFound { id: String },

    #[error("job {id} not found")]
    JobNotFound { id: String },

    #[error("edit session for job {job_id} not found")]
    SessionNotFound { job_id: String },

    #[error("export job {id} not found")]
    ExportNotFound { id: String },

    #[error("edit action {id} does not exist in session {session_id}")]
    UnknownEditAction { id: String, session_id: String },

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("lock poisoned")]
    LockPoisoned,

    #[error("database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced directly to HTTP clients, each mapped to a status code.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::VideoNotFound { .. }
            | StoreError::JobNotFound { .. }
            | StoreError::SessionNotFound { .. }
            | StoreError::ExportNotFound { .. } => ApiError::NotFound(e.to_string()),
            StoreError::UnknownEditAction { .. } | StoreError::Constraint(_) => {
                ApiError::Validation(e.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            ApiError::UnsupportedMediaType(msg) => (StatusCode::UNSUPPORTED_MEDIA_TYPE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_api_not_found() {
        let e: ApiError = StoreError::JobNotFound { id: "j1".into() }.into();
        assert!(matches!(e, ApiError::NotFound(_)));
    }

    #[test]
    fn store_unknown_action_maps_to_validation() {
        let e: ApiError = StoreError::UnknownEditAction {
            id: "a1".into(),
            session_id: "s1".into(),
        }
        .into();
        assert!(matches!(e, ApiError::Validation(_)));
    }

    #[test]
    fn store_lock_poisoned_maps_to_internal() {
        let e: ApiError = StoreError::LockPoisoned.into();
        assert!(matches!(e, ApiError::Internal(_)));
    }

    #[test]
    fn pipeline_error_messages_are_descriptive() {
        let e = PipelineError::SubprocessTimeout { seconds: 300 };
        assert!(e.to_string().contains("300"));
    }

    #[test]
    fn api_error_into_response_status_codes() {
        use axum::body::to_bytes;
        let responses = [
            (ApiError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (ApiError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in responses {
            let resp = err.into_response();
            assert_eq!(resp.status(), expected);
            let _ = to_bytes(resp.into_body(), usize::MAX);
        }
    }
}
