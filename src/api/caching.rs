//! Caching endpoints

use super::{AckResponse, ApiError, AppState};
use crate::caching::{CacheJob, CacheRequest, CacheStatus, CachingMetrics, PolicyDecision};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};

/// Body returned when a cache is created
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateCacheResponse {
    /// New cache id
    pub id: String,
    /// Initial status
    pub status: CacheStatus,
}

/// Cache listing
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheListResponse {
    /// All registered caches
    pub caches: Vec<CacheJob>,
    /// Number of entries
    pub count: usize,
}

/// Body for the tier migration action
#[derive(Debug, Serialize, Deserialize)]
pub struct MigrateTierRequest {
    /// Destination tier
    pub target_tier: String,
}

/// POST /caching
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CacheRequest>,
) -> Result<(StatusCode, Json<CreateCacheResponse>), ApiError> {
    let id = state.caching.create_cache(request).await?;
    Ok((StatusCode::CREATED, Json(CreateCacheResponse { id, status: CacheStatus::Pending })))
}

/// GET /caching/:id
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CacheJob>, ApiError> {
    Ok(Json(state.caching.get(&id).await?))
}

/// GET /caching
pub async fn list(State(state): State<AppState>) -> Json<CacheListResponse> {
    let caches = state.caching.list().await;
    let count = caches.len();
    Json(CacheListResponse { caches, count })
}

/// DELETE /caching/:id
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    state.caching.delete(&id).await?;
    Ok(Json(AckResponse { id, status: "deleted".to_string() }))
}

/// POST /caching/:id/evict
pub async fn evict(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    state.caching.evict_cache(&id).await?;
    Ok(Json(AckResponse { id, status: "evicted".to_string() }))
}

/// POST /caching/:id/warmup
pub async fn warmup(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    state.caching.warmup_cache(&id).await?;
    Ok(Json(AckResponse { id, status: "warmed".to_string() }))
}

/// POST /caching/:id/migrate
pub async fn migrate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MigrateTierRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    state.caching.migrate_tier(&id, &request.target_tier).await?;
    Ok(Json(AckResponse { id, status: "migrated".to_string() }))
}

/// POST /caching/policy
pub async fn policy(
    State(state): State<AppState>,
    Json(decision): Json<PolicyDecision>,
) -> Result<Json<AckResponse>, ApiError> {
    let action = decision.action.clone();
    state.caching.apply_policy_decision(decision).await?;
    Ok(Json(AckResponse { id: action, status: "applied".to_string() }))
}

/// GET /caching/metrics
pub async fn metrics(State(state): State<AppState>) -> Json<CachingMetrics> {
    Json(state.caching.metrics().await)
}
