//! REST API surface
//!
//! JSON endpoints under `/api/v1` for every controller. The router owns one
//! [`AppState`] with a handle to each controller; handlers translate between
//! HTTP and controller calls and map [`OrchestratorError`] onto status
//! codes.

pub mod autoscaling;
pub mod caching;
pub mod insight;
pub mod loadbalancing;
pub mod migrations;
pub mod preemption;
pub mod provisioning;

use crate::autoscaling::AutoscalingController;
use crate::caching::CachingController;
use crate::error::OrchestratorError;
use crate::insight::InsightIngestor;
use crate::loadbalancing::LoadBalancingController;
use crate::migration::MigrationController;
use crate::preemption::PreemptionController;
use crate::provisioning::ProvisioningController;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server bind address
    pub bind_address: SocketAddr,
    /// Enable CORS
    pub enable_cors: bool,
    /// API prefix path
    pub api_prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: ([0, 0, 0, 0], 8080).into(),
            enable_cors: true,
            api_prefix: "/api/v1".to_string(),
        }
    }
}

/// Handles to every controller, shared by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Migration controller
    pub migrations: MigrationController,
    /// Autoscaling controller
    pub autoscaling: AutoscalingController,
    /// Load-balancing controller
    pub loadbalancing: LoadBalancingController,
    /// Preemption controller
    pub preemption: PreemptionController,
    /// Caching controller
    pub caching: CachingController,
    /// Provisioning controller
    pub provisioning: ProvisioningController,
    /// Workload-signature ingestor
    pub insight: InsightIngestor,
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Short error class
    pub error: String,
    /// Human-readable detail
    pub details: String,
}

/// Controller error carried through an axum handler
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self.0 {
            OrchestratorError::Validation { .. } => (StatusCode::BAD_REQUEST, "validation"),
            OrchestratorError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            OrchestratorError::InvalidState { .. } => (StatusCode::BAD_REQUEST, "invalid_state"),
            OrchestratorError::Json(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            OrchestratorError::Cluster { .. }
            | OrchestratorError::Timeout(_)
            | OrchestratorError::Internal { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        let body = ErrorBody { error: error.to_string(), details: self.0.to_string() };
        (status, Json(body)).into_response()
    }
}

/// Health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok" while the process serves
    pub status: String,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "stratus-orchestrator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create the main API router
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // The top-level metrics endpoint reports the migration controller.
        .route("/metrics", get(migrations::metrics))
        .route("/migrations", post(migrations::create))
        .route("/migrations/:id", get(migrations::get_one))
        .route("/migrations/:id/status", get(migrations::get_status))
        .route("/autoscaling", post(autoscaling::create).get(autoscaling::list))
        .route("/autoscaling/metrics", get(autoscaling::metrics))
        .route("/autoscaling/:id", get(autoscaling::get_one).delete(autoscaling::remove))
        .route("/loadbalancing", post(loadbalancing::create).get(loadbalancing::list))
        .route("/loadbalancing/metrics", get(loadbalancing::metrics))
        .route("/loadbalancing/:id", get(loadbalancing::get_one).delete(loadbalancing::cancel))
        .route("/preemption", post(preemption::create).get(preemption::list))
        .route("/preemption/metrics", get(preemption::metrics))
        .route("/preemption/:id", get(preemption::get_one))
        .route("/caching", post(caching::create).get(caching::list))
        .route("/caching/metrics", get(caching::metrics))
        .route("/caching/policy", post(caching::policy))
        .route("/caching/:id", get(caching::get_one).delete(caching::remove))
        .route("/caching/:id/evict", post(caching::evict))
        .route("/caching/:id/warmup", post(caching::warmup))
        .route("/caching/:id/migrate", post(caching::migrate))
        .route("/provisioning", post(provisioning::create).get(provisioning::list))
        .route("/provisioning/metrics", get(provisioning::metrics))
        .route("/provisioning/:id", get(provisioning::get_one).delete(provisioning::remove))
        .route("/insight/reports", post(insight::receive).get(insight::list))
        .route("/insight/reports/:namespace/:name", get(insight::get_one))
        .route("/insight/metrics", get(insight::metrics))
        .route("/insight/cleanup", post(insight::cleanup))
        .with_state(state)
}

/// Build the application router with prefix and middleware applied
pub fn build_app(state: AppState, config: &ApiConfig) -> Router {
    let router = create_api_router(state);
    let router = if config.enable_cors {
        use tower_http::cors::{Any, CorsLayer};
        router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    } else {
        router
    };
    Router::new().nest(&config.api_prefix, router)
}

/// Start the API server and serve until the process exits
pub async fn start_api_server(state: AppState, config: ApiConfig) -> anyhow::Result<()> {
    let app = build_app(state, &config);
    info!("starting API server on {}", config.bind_address);
    let listener = TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Delete/cancel acknowledgement body
#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    /// Affected job id
    pub id: String,
    /// What happened to it
    pub status: String,
}
