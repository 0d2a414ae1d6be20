//! Migration endpoints

use super::{ApiError, AppState};
use crate::migration::{MigrationJob, MigrationMetrics, MigrationRequest, MigrationStatus};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

/// Body returned when a migration is accepted
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMigrationResponse {
    /// New migration id
    pub id: String,
    /// Initial status
    pub status: MigrationStatus,
}

/// Compact status body for the status endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct MigrationStatusResponse {
    /// Migration id
    pub id: String,
    /// Current status
    pub status: MigrationStatus,
    /// Last fatal error, if any
    pub error_message: Option<String>,
}

/// POST /migrations
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<MigrationRequest>,
) -> Result<(StatusCode, Json<CreateMigrationResponse>), ApiError> {
    let id = state.migrations.start_migration(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(CreateMigrationResponse { id, status: MigrationStatus::Pending }),
    ))
}

/// GET /migrations/:id
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MigrationJob>, ApiError> {
    Ok(Json(state.migrations.get(&id).await?))
}

/// GET /migrations/:id/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MigrationStatusResponse>, ApiError> {
    let job = state.migrations.get(&id).await?;
    Ok(Json(MigrationStatusResponse {
        id: job.id,
        status: job.status,
        error_message: job.details.error_message,
    }))
}

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> Json<MigrationMetrics> {
    Json(state.migrations.metrics().await)
}
