//! Stratus Orchestration Layer
//!
//! Cluster-level control loops for AI/ML workloads: state-preserving pod
//! migration, multi-signal autoscaling, load balancing via targeted
//! migrations, resource-aware preemption, tier-aware caching and
//! workload-storage provisioning, plus the workload-signature ingestor they
//! share. All controllers run in one process against one
//! [`cluster::ClusterProvider`] and surface their registries over the REST
//! API in [`api`].

pub mod api;
pub mod autoscaling;
pub mod caching;
pub mod cluster;
pub mod config;
pub mod error;
pub mod insight;
pub mod loadbalancing;
pub mod migration;
pub mod preemption;
pub mod provisioning;

pub use error::{OrchestratorError, Result};

// Re-export the key types
pub use autoscaling::{AutoscalingController, AutoscalingRequest};
pub use caching::{CacheTier, CachingController};
pub use cluster::{ClusterProvider, NodeState, PodResourceInfo, WorkloadKind};
pub use insight::InsightIngestor;
pub use loadbalancing::{LoadBalancingController, LoadBalancingRequest};
pub use migration::{MigrationController, MigrationRequest};
pub use preemption::{PreemptionController, PreemptionRequest};
pub use provisioning::ProvisioningController;

/// Mint a stable job identifier of the form `<prefix>-<8-hex>`
pub fn mint_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_id_shape() {
        let id = mint_id("autoscaler");
        let (prefix, suffix) = id.split_once('-').unwrap();
        assert_eq!(prefix, "autoscaler");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_mint_id_unique() {
        assert_ne!(mint_id("lb"), mint_id("lb"));
    }
}
