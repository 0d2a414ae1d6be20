//! Workload-signature endpoints

use super::{ApiError, AppState};
use crate::insight::{InsightMetrics, SignatureRecord, WorkloadReport};
use axum::extract::{Path, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Acknowledgement for a received report
#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiveResponse {
    /// namespace/name key the report was stored under
    pub workload: String,
}

/// Signature listing
#[derive(Debug, Serialize, Deserialize)]
pub struct SignatureListResponse {
    /// All tracked signatures
    pub signatures: Vec<SignatureRecord>,
    /// Number of entries
    pub count: usize,
}

/// Body for the stale-cleanup action
#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupRequest {
    /// Entries older than this many seconds are dropped
    pub max_age_seconds: u64,
}

/// Cleanup outcome
#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    /// Number of entries dropped
    pub dropped: usize,
}

/// POST /insight/reports
pub async fn receive(
    State(state): State<AppState>,
    Json(report): Json<WorkloadReport>,
) -> Result<Json<ReceiveResponse>, ApiError> {
    let workload = format!("{}/{}", report.namespace, report.name);
    state.insight.receive(report).await?;
    Ok(Json(ReceiveResponse { workload }))
}

/// GET /insight/reports/:namespace/:name
pub async fn get_one(
    State(state): State<AppState>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<SignatureRecord>, ApiError> {
    Ok(Json(state.insight.get(&namespace, &name).await?))
}

/// GET /insight/reports
pub async fn list(State(state): State<AppState>) -> Json<SignatureListResponse> {
    let signatures = state.insight.list().await;
    let count = signatures.len();
    Json(SignatureListResponse { signatures, count })
}

/// GET /insight/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<InsightMetrics> {
    Json(state.insight.metrics().await)
}

/// POST /insight/cleanup
pub async fn cleanup(
    State(state): State<AppState>,
    Json(request): Json<CleanupRequest>,
) -> Json<CleanupResponse> {
    let dropped =
        state.insight.cleanup_stale(Duration::from_secs(request.max_age_seconds)).await;
    Json(CleanupResponse { dropped })
}
