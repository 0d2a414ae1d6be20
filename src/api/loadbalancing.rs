//! Load-balancing endpoints

use super::{AckResponse, ApiError, AppState};
use crate::loadbalancing::{
    LoadBalancingJob, LoadBalancingMetrics, LoadBalancingRequest, LoadBalancingStatus,
};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

/// Body returned when a load-balancing job is created
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateLoadBalancingResponse {
    /// New job id
    pub id: String,
    /// Initial status
    pub status: LoadBalancingStatus,
}

/// Load-balancing job listing
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadBalancingListResponse {
    /// All registered jobs
    pub jobs: Vec<LoadBalancingJob>,
    /// Number of entries
    pub count: usize,
}

/// POST /loadbalancing
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<LoadBalancingRequest>,
) -> Result<(StatusCode, Json<CreateLoadBalancingResponse>), ApiError> {
    let id = state.loadbalancing.start_loadbalancing(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateLoadBalancingResponse { id, status: LoadBalancingStatus::Pending }),
    ))
}

/// GET /loadbalancing/:id
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LoadBalancingJob>, ApiError> {
    Ok(Json(state.loadbalancing.get(&id).await?))
}

/// GET /loadbalancing
pub async fn list(State(state): State<AppState>) -> Json<LoadBalancingListResponse> {
    let jobs = state.loadbalancing.list().await;
    let count = jobs.len();
    Json(LoadBalancingListResponse { jobs, count })
}

/// DELETE /loadbalancing/:id cancels a running job
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    state.loadbalancing.cancel(&id).await?;
    Ok(Json(AckResponse { id, status: "cancelling".to_string() }))
}

/// GET /loadbalancing/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<LoadBalancingMetrics> {
    Json(state.loadbalancing.metrics().await)
}
