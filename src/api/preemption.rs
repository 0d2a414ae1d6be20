//! Preemption endpoints

use super::{ApiError, AppState};
use crate::preemption::{PreemptionJob, PreemptionMetrics, PreemptionRequest, PreemptionStatus};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

/// Body returned when a preemption is accepted
#[derive(Debug, Serialize, Deserialize)]
pub struct CreatePreemptionResponse {
    /// New preemption id
    pub id: String,
    /// Initial status
    pub status: PreemptionStatus,
}

/// Preemption job listing
#[derive(Debug, Serialize, Deserialize)]
pub struct PreemptionListResponse {
    /// All registered jobs
    pub jobs: Vec<PreemptionJob>,
    /// Number of entries
    pub count: usize,
}

/// POST /preemption
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<PreemptionRequest>,
) -> Result<(StatusCode, Json<CreatePreemptionResponse>), ApiError> {
    let id = state.preemption.start_preemption(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CreatePreemptionResponse { id, status: PreemptionStatus::Pending }),
    ))
}

/// GET /preemption/:id
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PreemptionJob>, ApiError> {
    Ok(Json(state.preemption.get(&id).await?))
}

/// GET /preemption
pub async fn list(State(state): State<AppState>) -> Json<PreemptionListResponse> {
    let jobs = state.preemption.list().await;
    let count = jobs.len();
    Json(PreemptionListResponse { jobs, count })
}

/// GET /preemption/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<PreemptionMetrics> {
    Json(state.preemption.metrics().await)
}
