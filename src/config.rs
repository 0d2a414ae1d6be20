//! Process configuration

use clap::Parser;
use std::path::PathBuf;

/// Stratus orchestrator configuration, from flags or environment
#[derive(Debug, Clone, Parser)]
#[command(name = "stratus-orchestrator", version, about = "Cluster control loops for AI/ML workloads")]
pub struct Config {
    /// Port the API server listens on
    #[arg(long, env = "STRATUS_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Path to cluster credentials, handed through to the cluster adapter
    #[arg(long, env = "STRATUS_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Node count for the simulated cluster adapter
    #[arg(long, env = "STRATUS_SIMULATED_NODES", default_value_t = 6)]
    pub simulated_nodes: usize,

    /// Disable the CORS layer on the API server
    #[arg(long, env = "STRATUS_DISABLE_CORS", default_value_t = false)]
    pub disable_cors: bool,
}
