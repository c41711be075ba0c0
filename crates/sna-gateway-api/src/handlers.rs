use crate::coordinator::FetchReply;
use crate::{metrics, ApiError, ApiResult, AppState};
use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use sna_gateway_core::{IncomingStatus, ProjectKey};
use tracing::{error, info, warn};

impl<T: Serialize> IntoResponse for FetchReply<T> {
    fn into_response(self) -> Response {
        match self {
            FetchReply::Ready(payload) => (StatusCode::OK, Json(payload)).into_response(),
            FetchReply::Pending(code, status) => (code, Json(status)).into_response(),
        }
    }
}

fn project_key(path: Result<Path<(String, String)>, PathRejection>) -> ApiResult<ProjectKey> {
    let Path((owner, repo)) = path.map_err(|rejection| {
        warn!(error = %rejection, "Rejected route parameters");
        ApiError::BadRequest(rejection.body_text())
    })?;
    Ok(ProjectKey::new(&owner, &repo)?)
}

pub async fn project_metrics(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> ApiResult<Response> {
    let key = project_key(path)?;
    info!(project = %key, "Project metrics requested");
    Ok(state.coordinator.project_metrics(&key).await.into_response())
}

pub async fn artifact_metrics(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> ApiResult<Response> {
    let key = project_key(path)?;
    info!(project = %key, "Artifact metrics requested");
    Ok(state.coordinator.artifact_metrics(&key).await.into_response())
}

pub async fn update_status(
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
    body: Result<Json<IncomingStatus>, JsonRejection>,
) -> ApiResult<Response> {
    let key = project_key(path)?;
    let Json(incoming) = body.map_err(|rejection| {
        warn!(project = %key, error = %rejection, "Undecodable status update");
        ApiError::BadRequest(rejection.body_text())
    })?;
    match state.coordinator.apply_status_update(&key, incoming)? {
        Some(status) => Ok((StatusCode::OK, Json(status)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "in_flight": state.coordinator.pool().in_flight(),
    }))
}

pub async fn metrics_handler() -> ApiResult<Response> {
    let body = metrics::render().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        ApiError::Internal(format!("encoding metrics: {e}"))
    })?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}
