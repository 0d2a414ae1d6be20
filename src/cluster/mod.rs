//! Cluster adapter boundary
//!
//! The orchestration controllers never talk to the cluster directly. Every
//! read (nodes, pods, utilization, capacities, storage I/O) and every
//! mutation (scale, evict, create/delete pod, create PVC) goes through the
//! [`ClusterProvider`] trait, so the control loops can run against the real
//! cluster, the in-process simulator, or a test fake interchangeably.

pub mod quantity;
pub mod sim;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Mount path for checkpoint volumes inside replacement pods
pub const CHECKPOINT_MOUNT_PATH: &str = "/checkpoint";

/// Replica-owning workload kinds the adapter can scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    ReplicaSet,
}

impl WorkloadKind {
    /// Parse a workload kind from its Kubernetes name
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "deployment" => Some(Self::Deployment),
            "statefulset" => Some(Self::StatefulSet),
            "replicaset" => Some(Self::ReplicaSet),
            _ => None,
        }
    }

    /// Kubernetes name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::ReplicaSet => "ReplicaSet",
        }
    }
}

/// Reference to a pod, namespace included
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodRef {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
}

impl PodRef {
    /// Create a new pod reference
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl std::fmt::Display for PodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Allocatable capacity of a node
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NodeCapacity {
    /// CPU capacity in millicores
    pub cpu_millis: i64,
    /// Memory capacity in bytes
    pub memory_bytes: i64,
    /// Number of GPUs
    pub gpu_count: i64,
}

/// Storage I/O figures for one node
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StorageMetrics {
    /// Read throughput in MB/s
    pub read_mbps: f64,
    /// Write throughput in MB/s
    pub write_mbps: f64,
    /// I/O operations per second
    pub iops: f64,
    /// Storage device utilization percentage
    pub utilization_percent: f64,
}

/// Averaged per-pod metrics for a workload
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkloadMetrics {
    /// Average CPU utilization percentage
    pub cpu_percent: f64,
    /// Average memory utilization percentage
    pub memory_percent: f64,
    /// Average GPU utilization percentage
    pub gpu_percent: f64,
    /// Average storage read throughput in MB/s
    pub storage_read_mbps: f64,
    /// Average storage write throughput in MB/s
    pub storage_write_mbps: f64,
    /// Average storage IOPS
    pub storage_iops: f64,
}

/// Observed state of one node in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    /// Node name
    pub name: String,
    /// CPU utilization percentage
    pub cpu_percent: f64,
    /// Memory utilization percentage
    pub memory_percent: f64,
    /// GPU utilization percentage (0 when the node has no GPUs)
    pub gpu_percent: f64,
    /// Running + Pending pod count
    pub pod_count: u32,
    /// Raw node capacity
    pub capacity: NodeCapacity,
    /// Value of the node layer label, empty when unset
    pub layer_label: String,
    /// Storage read throughput in MB/s
    pub storage_read_mbps: f64,
    /// Storage write throughput in MB/s
    pub storage_write_mbps: f64,
    /// Storage IOPS
    pub storage_iops: f64,
    /// Storage utilization percentage
    pub storage_utilization_percent: f64,
}

impl NodeState {
    /// Mean of CPU and memory utilization, the load figure used for
    /// overload/underload classification
    pub fn compute_load(&self) -> f64 {
        (self.cpu_percent + self.memory_percent) / 2.0
    }
}

/// Resource requests and storage pressure of one pod
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodResourceInfo {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
    /// Priority class name, empty when unset
    pub priority_class: String,
    /// Numeric priority, 0 when unspecified
    pub priority: i64,
    /// CPU request in millicores
    pub cpu_request_millis: i64,
    /// Memory request in bytes
    pub memory_request_bytes: i64,
    /// GPU request
    pub gpu_request: i64,
    /// Pod creation time
    pub created_at: DateTime<Utc>,
    /// Storage read throughput in MB/s
    pub storage_read_mbps: f64,
    /// Storage write throughput in MB/s
    pub storage_write_mbps: f64,
    /// Storage IOPS
    pub storage_iops: f64,
    /// Number of attached PVCs
    pub pvc_count: u32,
    /// Total requested PVC capacity in bytes
    pub pvc_total_bytes: i64,
}

/// Container entry of a pod manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodContainer {
    /// Container name
    pub name: String,
    /// Container image
    pub image: String,
}

/// Minimal pod manifest the migration workflow needs: identity, placement,
/// labels and the container list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodManifest {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
    /// Node the pod is currently bound to
    pub node: String,
    /// Pod labels
    pub labels: HashMap<String, String>,
    /// Containers in the pod
    pub containers: Vec<PodContainer>,
}

/// Raw container state as the cluster reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerObservation {
    /// Container has not started yet
    Waiting,
    /// Container is running
    Running,
    /// Container exited with the given code
    Terminated { exit_code: i32 },
}

/// Classified container state consumed by the migration workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStateInfo {
    /// Container name
    pub container: String,
    /// Classified state: waiting, running, completed or failed
    pub state: String,
    /// Exit code for terminated containers
    pub exit_code: Option<i32>,
    /// Whether the container carries state worth migrating
    pub should_migrate: bool,
}

impl ContainerStateInfo {
    /// Classify a raw container observation.
    ///
    /// Waiting containers have nothing to carry over; running containers and
    /// containers that terminated with a non-zero exit code are migrated;
    /// cleanly completed containers are left behind.
    pub fn classify(container: impl Into<String>, observed: ContainerObservation) -> Self {
        let container = container.into();
        match observed {
            ContainerObservation::Waiting => Self {
                container,
                state: "waiting".to_string(),
                exit_code: None,
                should_migrate: false,
            },
            ContainerObservation::Running => Self {
                container,
                state: "running".to_string(),
                exit_code: None,
                should_migrate: true,
            },
            ContainerObservation::Terminated { exit_code } => {
                let (state, should_migrate) = if exit_code == 0 {
                    ("completed", false)
                } else {
                    ("failed", true)
                };
                Self { container, state: state.to_string(), exit_code: Some(exit_code), should_migrate }
            }
        }
    }
}

/// The single boundary between the control loops and the cluster.
///
/// Implementations may return estimates or simulated values where a real
/// metrics source is unavailable; the controllers treat every number as
/// authoritative. All methods must be safe for concurrent use.
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    /// List node names in the cluster
    async fn list_nodes(&self) -> Result<Vec<String>>;

    /// CPU and memory utilization percentages for one node
    async fn node_metrics(&self, node: &str) -> Result<(f64, f64)>;

    /// Allocatable capacity of one node
    async fn node_capacity(&self, node: &str) -> Result<NodeCapacity>;

    /// Number of Running + Pending pods on the node
    async fn node_pod_count(&self, node: &str) -> Result<u32>;

    /// Value of a node label, empty string when the label is absent
    async fn node_label(&self, node: &str, key: &str) -> Result<String>;

    /// GPU utilization percentage; 0 when the node has no GPUs
    async fn node_gpu_utilization(&self, node: &str) -> Result<f64>;

    /// Storage throughput, IOPS and utilization for one node
    async fn node_storage_metrics(&self, node: &str) -> Result<StorageMetrics>;

    /// Running pods on the node
    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<PodRef>>;

    /// Resource requests, priority and storage pressure of one pod
    async fn pod_resource_info(&self, namespace: &str, name: &str) -> Result<PodResourceInfo>;

    /// Current replica count of a workload
    async fn workload_replicas(&self, namespace: &str, name: &str, kind: WorkloadKind)
        -> Result<i32>;

    /// Metrics averaged across the workload's Running pods that have metrics
    async fn workload_pod_metrics(&self, namespace: &str, name: &str) -> Result<WorkloadMetrics>;

    /// Set the replica count of a workload
    async fn scale_workload(
        &self,
        namespace: &str,
        name: &str,
        kind: WorkloadKind,
        replicas: i32,
    ) -> Result<()>;

    /// Evict one pod with the given grace period
    async fn evict_pod(&self, namespace: &str, name: &str, grace_period_seconds: i64)
        -> Result<()>;

    /// Read a pod manifest
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodManifest>;

    /// Classified container states of a pod
    async fn pod_container_states(&self, namespace: &str, name: &str)
        -> Result<Vec<ContainerStateInfo>>;

    /// Create a ReadWriteOnce persistent volume claim
    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
        size: &str,
    ) -> Result<()>;

    /// Create a replacement pod on the target node: same spec with identity
    /// and status erased, a fresh name suffix, labels linking back to the
    /// original, only the containers marked `should_migrate`, and the
    /// checkpoint PVC mounted at [`CHECKPOINT_MOUNT_PATH`] when given.
    /// Returns the new pod name.
    async fn create_optimized_pod(
        &self,
        original: &PodManifest,
        target_node: &str,
        state_filter: &[ContainerStateInfo],
        checkpoint_pvc: Option<&str>,
    ) -> Result<String>;

    /// Delete a pod with the given grace period
    async fn delete_pod(&self, namespace: &str, name: &str, grace_period_seconds: i64)
        -> Result<()>;

    /// Wait until the pod reports Ready, or fail after the timeout
    async fn wait_for_pod_ready(&self, namespace: &str, name: &str, timeout: Duration)
        -> Result<()>;
}

/// Gather the full [`NodeState`] for one node through the adapter
pub async fn gather_node_state(
    cluster: &dyn ClusterProvider,
    node: &str,
    layer_label_key: &str,
) -> Result<NodeState> {
    let (cpu_percent, memory_percent) = cluster.node_metrics(node).await?;
    let gpu_percent = cluster.node_gpu_utilization(node).await?;
    let pod_count = cluster.node_pod_count(node).await?;
    let capacity = cluster.node_capacity(node).await?;
    let layer_label = cluster.node_label(node, layer_label_key).await?;
    let storage = cluster.node_storage_metrics(node).await?;

    Ok(NodeState {
        name: node.to_string(),
        cpu_percent,
        memory_percent,
        gpu_percent,
        pod_count,
        capacity,
        layer_label,
        storage_read_mbps: storage.read_mbps,
        storage_write_mbps: storage.write_mbps,
        storage_iops: storage.iops,
        storage_utilization_percent: storage.utilization_percent,
    })
}

/// Node label key carrying the storage layer classification
pub const LAYER_LABEL_KEY: &str = "stratus.io/layer";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_kind_parse() {
        assert_eq!(WorkloadKind::parse("Deployment"), Some(WorkloadKind::Deployment));
        assert_eq!(WorkloadKind::parse("statefulset"), Some(WorkloadKind::StatefulSet));
        assert_eq!(WorkloadKind::parse("ReplicaSet"), Some(WorkloadKind::ReplicaSet));
        assert_eq!(WorkloadKind::parse("DaemonSet"), None);
    }

    #[test]
    fn test_container_classification() {
        let waiting = ContainerStateInfo::classify("init", ContainerObservation::Waiting);
        assert_eq!(waiting.state, "waiting");
        assert!(!waiting.should_migrate);

        let running = ContainerStateInfo::classify("main", ContainerObservation::Running);
        assert_eq!(running.state, "running");
        assert!(running.should_migrate);

        let done = ContainerStateInfo::classify(
            "sidecar",
            ContainerObservation::Terminated { exit_code: 0 },
        );
        assert_eq!(done.state, "completed");
        assert!(!done.should_migrate);

        let crashed = ContainerStateInfo::classify(
            "worker",
            ContainerObservation::Terminated { exit_code: 137 },
        );
        assert_eq!(crashed.state, "failed");
        assert_eq!(crashed.exit_code, Some(137));
        assert!(crashed.should_migrate);
    }

    #[test]
    fn test_node_compute_load() {
        let node = NodeState {
            name: "n1".to_string(),
            cpu_percent: 90.0,
            memory_percent: 70.0,
            gpu_percent: 0.0,
            pod_count: 3,
            capacity: NodeCapacity::default(),
            layer_label: String::new(),
            storage_read_mbps: 0.0,
            storage_write_mbps: 0.0,
            storage_iops: 0.0,
            storage_utilization_percent: 0.0,
        };
        assert!((node.compute_load() - 80.0).abs() < f64::EPSILON);
    }
}
