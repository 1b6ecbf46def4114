//! Submission endpoints
//!
//! `POST /api/v0/submissions` runs one orchestrator flow to completion and answers with
//! its outcome. Identity comes from the `x-owner-id` header set by the auth gateway.
//! Multipart parts carrying a filename are files; text parts named `metadata.<key>`
//! become submission metadata.
//!
//! One flow per owner at a time. `POST /api/v0/submissions/cancel` and
//! `POST /api/v0/submissions/reset` act on the owner's running flow.

use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use scribo_core::models::{Identity, SubmissionFile, SubmissionOutcome, SubmissionStatus};
use scribo_core::{AppError, ErrorMetadata, SubmissionError, ValidationError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub const OWNER_HEADER: &str = "x-owner-id";
const METADATA_PREFIX: &str = "metadata.";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub success: bool,
    pub submission_id: Option<Uuid>,
    pub queued: bool,
    pub status: SubmissionStatus,
    /// User-facing notice for the outcome.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&SubmissionOutcome> for SubmissionResponse {
    fn from(outcome: &SubmissionOutcome) -> Self {
        let code = outcome.error.clone().map(|e| match e {
            SubmissionError::Cancelled => "CANCELLED".to_string(),
            e => AppError::from(e).error_code().to_string(),
        });
        Self {
            success: outcome.success,
            submission_id: outcome.submission_id,
            queued: outcome.queued,
            status: outcome.status,
            message: outcome.user_message(),
            error: outcome.error.as_ref().map(ToString::to_string),
            code,
        }
    }
}

fn identity_from_headers(headers: &HeaderMap) -> Identity {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|owner| !owner.is_empty())
        .map(Identity::signed_in)
        .unwrap_or_else(Identity::anonymous)
}

async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(Vec<SubmissionFile>, BTreeMap<String, String>), AppError> {
    let mut files = Vec::new();
    let mut metadata = BTreeMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("Malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();

        if let Some(filename) = field.file_name().map(String::from) {
            let content_type = field
                .content_type()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::InvalidInput(format!("Failed to read '{}': {}", filename, e)))?;
            files.push(SubmissionFile::new(filename, content_type, data));
        } else if let Some(key) = name.strip_prefix(METADATA_PREFIX) {
            let value = field
                .text()
                .await
                .map_err(|e| AppError::InvalidInput(format!("Invalid metadata field '{}': {}", key, e)))?;
            if !key.is_empty() {
                metadata.insert(key.to_string(), value);
            }
        } else {
            tracing::debug!(field = %name, "Ignoring unknown multipart field");
        }
    }

    Ok((files, metadata))
}

#[tracing::instrument(skip(state, headers, multipart))]
pub async fn submit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, HttpAppError> {
    let identity = identity_from_headers(&headers);
    let (files, metadata) = read_multipart(multipart).await?;

    let orchestrator = state.orchestrator_for(&identity);
    let outcome = orchestrator.submit(&identity, files, metadata).await;
    state.release_orchestrator(&identity.owner_id, &orchestrator);

    match outcome.error {
        None | Some(SubmissionError::Cancelled) => {
            Ok((StatusCode::OK, Json(SubmissionResponse::from(&outcome))).into_response())
        }
        Some(SubmissionError::Validation(ref e)) => {
            Err(SubmissionError::Validation(e.clone()).into())
        }
        Some(ref e) => {
            let status = StatusCode::from_u16(AppError::from(e.clone()).http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Ok((status, Json(SubmissionResponse::from(&outcome))).into_response())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FlowControlResponse {
    /// Whether a running flow was stopped.
    pub cancelled: bool,
    pub status: SubmissionStatus,
}

fn signed_in(headers: &HeaderMap) -> Result<Identity, AppError> {
    let identity = identity_from_headers(headers);
    if identity.is_authenticated() {
        Ok(identity)
    } else {
        Err(SubmissionError::Validation(ValidationError::NotSignedIn).into())
    }
}

/// Cancel the caller's running flow. An already queued submission is still delivered.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<FlowControlResponse>, HttpAppError> {
    let identity = signed_in(&headers)?;
    let cancelled = state
        .active_orchestrator(&identity.owner_id)
        .is_some_and(|orchestrator| orchestrator.cancel());
    if cancelled {
        tracing::info!(owner_id = %identity.owner_id, "Submission flow cancelled by client");
    }
    Ok(Json(FlowControlResponse {
        cancelled,
        status: SubmissionStatus::Idle,
    }))
}

/// Return the caller's flow to `idle` from any state.
pub async fn reset(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<FlowControlResponse>, HttpAppError> {
    let identity = signed_in(&headers)?;
    let cancelled = match state.active_orchestrator(&identity.owner_id) {
        Some(orchestrator) => {
            let was_active = orchestrator.status().is_active();
            orchestrator.reset();
            was_active
        }
        None => false,
    };
    Ok(Json(FlowControlResponse {
        cancelled,
        status: SubmissionStatus::Idle,
    }))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let entry = state
        .queue
        .get_status(id)
        .await
        .map_err(|e| AppError::Internal(format!("Queue lookup failed: {}", e)))?
        .ok_or_else(|| AppError::NotFound(format!("Submission {} is not queued", id)))?;
    Ok(Json(entry))
}
