//! Provisioning endpoints

use super::{AckResponse, ApiError, AppState};
use crate::provisioning::{
    ProvisioningJob, ProvisioningMetrics, ProvisioningRequest, ProvisioningStatus,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

/// Body returned when a provisioning job is created
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateProvisioningResponse {
    /// New job id
    pub id: String,
    /// Initial status
    pub status: ProvisioningStatus,
}

/// Provisioning job listing
#[derive(Debug, Serialize, Deserialize)]
pub struct ProvisioningListResponse {
    /// All registered jobs
    pub jobs: Vec<ProvisioningJob>,
    /// Number of entries
    pub count: usize,
}

/// POST /provisioning
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<ProvisioningRequest>,
) -> Result<(StatusCode, Json<CreateProvisioningResponse>), ApiError> {
    let id = state.provisioning.create_provisioning(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateProvisioningResponse { id, status: ProvisioningStatus::Pending }),
    ))
}

/// GET /provisioning/:id
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ProvisioningJob>, ApiError> {
    Ok(Json(state.provisioning.get(&id).await?))
}

/// GET /provisioning
pub async fn list(State(state): State<AppState>) -> Json<ProvisioningListResponse> {
    let jobs = state.provisioning.list().await;
    let count = jobs.len();
    Json(ProvisioningListResponse { jobs, count })
}

/// DELETE /provisioning/:id
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    state.provisioning.delete(&id).await?;
    Ok(Json(AckResponse { id, status: "deleted".to_string() }))
}

/// GET /provisioning/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<ProvisioningMetrics> {
    Json(state.provisioning.metrics().await)
}
