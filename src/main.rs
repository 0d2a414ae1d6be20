use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stratus_orchestrator::api::{start_api_server, ApiConfig, AppState};
use stratus_orchestrator::autoscaling::AutoscalingController;
use stratus_orchestrator::caching::CachingController;
use stratus_orchestrator::cluster::sim::SimulatedCluster;
use stratus_orchestrator::cluster::ClusterProvider;
use stratus_orchestrator::config::Config;
use stratus_orchestrator::insight::InsightIngestor;
use stratus_orchestrator::loadbalancing::LoadBalancingController;
use stratus_orchestrator::migration::MigrationController;
use stratus_orchestrator::preemption::PreemptionController;
use stratus_orchestrator::provisioning::ProvisioningController;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    info!(port = config.port, "starting stratus orchestrator");

    if let Some(path) = &config.kubeconfig {
        warn!(
            kubeconfig = %path.display(),
            "cluster credentials supplied but no external adapter is wired; \
             serving the simulated cluster"
        );
    }
    let cluster: Arc<dyn ClusterProvider> =
        Arc::new(SimulatedCluster::new(config.simulated_nodes));
    info!(nodes = config.simulated_nodes, "simulated cluster adapter ready");

    let migrations = MigrationController::new(cluster.clone());
    let state = AppState {
        loadbalancing: LoadBalancingController::new(
            cluster.clone(),
            Arc::new(migrations.clone()),
        ),
        migrations,
        autoscaling: AutoscalingController::new(cluster.clone()),
        preemption: PreemptionController::new(cluster.clone()),
        caching: CachingController::new(),
        provisioning: ProvisioningController::new(cluster.clone()),
        insight: InsightIngestor::new(),
    };

    let api_config = ApiConfig {
        bind_address: ([0, 0, 0, 0], config.port).into(),
        enable_cors: !config.disable_cors,
        ..Default::default()
    };
    start_api_server(state, api_config).await
}
