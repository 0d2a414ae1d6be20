//! Autoscaling endpoints

use super::{AckResponse, ApiError, AppState};
use crate::autoscaling::{
    AutoscalerJob, AutoscalerStatus, AutoscalingMetrics, AutoscalingRequest,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

/// Body returned when an autoscaler is created
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAutoscalerResponse {
    /// New autoscaler id
    pub id: String,
    /// Initial status
    pub status: AutoscalerStatus,
}

/// Autoscaler listing
#[derive(Debug, Serialize, Deserialize)]
pub struct AutoscalerListResponse {
    /// All registered autoscalers
    pub autoscalers: Vec<AutoscalerJob>,
    /// Number of entries
    pub count: usize,
}

/// POST /autoscaling
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<AutoscalingRequest>,
) -> Result<(StatusCode, Json<CreateAutoscalerResponse>), ApiError> {
    let id = state.autoscaling.create_autoscaler(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateAutoscalerResponse { id, status: AutoscalerStatus::Active }),
    ))
}

/// GET /autoscaling/:id
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AutoscalerJob>, ApiError> {
    Ok(Json(state.autoscaling.get(&id).await?))
}

/// GET /autoscaling
pub async fn list(State(state): State<AppState>) -> Json<AutoscalerListResponse> {
    let autoscalers = state.autoscaling.list().await;
    let count = autoscalers.len();
    Json(AutoscalerListResponse { autoscalers, count })
}

/// DELETE /autoscaling/:id
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    state.autoscaling.delete(&id).await?;
    Ok(Json(AckResponse { id, status: "deleted".to_string() }))
}

/// GET /autoscaling/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<AutoscalingMetrics> {
    Json(state.autoscaling.metrics().await)
}
