//! In-process simulated cluster
//!
//! [`SimulatedCluster`] is a full [`ClusterProvider`] backed by in-memory
//! state. Utilization figures are seeded per node/workload name with bounded
//! jitter so control loops see stable-but-alive numbers, while mutations
//! (scale, evict, create/delete pod, create PVC) are applied to the state
//! and visible to every later read. The binary runs against it when no
//! cluster credentials are supplied, and the integration tests drive the
//! controllers through it.

use super::{
    ClusterProvider, ContainerObservation, ContainerStateInfo, NodeCapacity, PodContainer,
    PodManifest, PodRef, PodResourceInfo, StorageMetrics, WorkloadKind, WorkloadMetrics,
    LAYER_LABEL_KEY,
};
use crate::error::{OrchestratorError, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tokio::sync::RwLock;

/// Pod phase tracked by the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimPodPhase {
    Running,
    Pending,
}

/// One simulated pod
#[derive(Debug, Clone)]
pub struct SimPod {
    /// Pod namespace
    pub namespace: String,
    /// Pod name
    pub name: String,
    /// Pod phase
    pub phase: SimPodPhase,
    /// Priority class name
    pub priority_class: String,
    /// Numeric priority
    pub priority: i64,
    /// CPU request in millicores
    pub cpu_request_millis: i64,
    /// Memory request in bytes
    pub memory_request_bytes: i64,
    /// GPU request
    pub gpu_request: i64,
    /// Age of the pod at simulator construction
    pub age_seconds: i64,
    /// Storage read throughput attributed to the pod in MB/s
    pub storage_read_mbps: f64,
    /// Storage write throughput attributed to the pod in MB/s
    pub storage_write_mbps: f64,
    /// Storage IOPS attributed to the pod
    pub storage_iops: f64,
    /// Containers with their observed states
    pub containers: Vec<(String, ContainerObservation)>,
}

impl SimPod {
    /// A running single-container pod with modest requests
    pub fn running(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            phase: SimPodPhase::Running,
            priority_class: String::new(),
            priority: 0,
            cpu_request_millis: 250,
            memory_request_bytes: 512 * 1024 * 1024,
            gpu_request: 0,
            age_seconds: 3600,
            storage_read_mbps: 0.0,
            storage_write_mbps: 0.0,
            storage_iops: 0.0,
            containers: vec![("main".to_string(), ContainerObservation::Running)],
        }
    }
}

#[derive(Debug, Clone)]
struct SimNode {
    labels: HashMap<String, String>,
    capacity: NodeCapacity,
    pods: Vec<SimPod>,
}

#[derive(Default)]
struct SimState {
    nodes: HashMap<String, SimNode>,
    node_order: Vec<String>,
    workload_replicas: HashMap<String, i32>,
    pvcs: Vec<(String, String, String)>,
    metric_overrides: HashMap<String, (f64, f64)>,
}

/// Simulated cluster adapter
pub struct SimulatedCluster {
    state: RwLock<SimState>,
    jitter: f64,
}

impl SimulatedCluster {
    /// Build a cluster of `node_count` nodes named `node-1..node-N`, each
    /// seeded with a handful of running pods. Every third node carries GPUs
    /// and every second node the `storage` layer label.
    pub fn new(node_count: usize) -> Self {
        let mut state = SimState::default();
        for i in 1..=node_count.max(1) {
            let name = format!("node-{i}");
            let mut labels = HashMap::new();
            if i % 2 == 0 {
                labels.insert(LAYER_LABEL_KEY.to_string(), "storage".to_string());
            }
            let gpu_count = if i % 3 == 0 { 2 } else { 0 };
            let pod_count = 2 + (seed_for(&name) % 4) as usize;
            let pods = (1..=pod_count)
                .map(|p| {
                    let mut pod = SimPod::running("default", format!("{name}-pod-{p}"));
                    pod.priority = ((seed_for(&pod.name) % 5) * 100) as i64;
                    pod.age_seconds = 600 + (seed_for(&pod.name) * 600) as i64;
                    pod
                })
                .collect();
            state.node_order.push(name.clone());
            state.nodes.insert(
                name,
                SimNode {
                    labels,
                    capacity: NodeCapacity {
                        cpu_millis: 16_000,
                        memory_bytes: 64 * 1024 * 1024 * 1024,
                        gpu_count,
                    },
                    pods,
                },
            );
        }
        Self { state: RwLock::new(state), jitter: 2.5 }
    }

    /// An empty cluster, populated through [`insert_node`](Self::insert_node)
    pub fn empty() -> Self {
        Self { state: RwLock::new(SimState::default()), jitter: 0.0 }
    }

    /// Add a node with explicit labels and capacity
    pub async fn insert_node(
        &self,
        name: impl Into<String>,
        labels: HashMap<String, String>,
        capacity: NodeCapacity,
    ) {
        let name = name.into();
        let mut state = self.state.write().await;
        state.node_order.push(name.clone());
        state.nodes.insert(name, SimNode { labels, capacity, pods: Vec::new() });
    }

    /// Place a pod on a node
    pub async fn insert_pod(&self, node: &str, pod: SimPod) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.nodes.get_mut(node) {
            entry.pods.push(pod);
        }
    }

    /// Seed a workload replica count
    pub async fn set_workload_replicas(&self, namespace: &str, name: &str, replicas: i32) {
        let mut state = self.state.write().await;
        state.workload_replicas.insert(workload_key(namespace, name), replicas);
    }

    /// Pin the CPU/memory utilization reported for a node
    pub async fn set_node_metrics(&self, node: &str, cpu_percent: f64, memory_percent: f64) {
        let mut state = self.state.write().await;
        state.metric_overrides.insert(node.to_string(), (cpu_percent, memory_percent));
    }

    /// PVCs created so far, as (namespace, name, size)
    pub async fn created_pvcs(&self) -> Vec<(String, String, String)> {
        self.state.read().await.pvcs.clone()
    }

    fn jittered(&self, base: f64) -> f64 {
        if self.jitter == 0.0 {
            return base;
        }
        let delta = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        (base + delta).clamp(0.0, 100.0)
    }

    async fn find_pod(&self, namespace: &str, name: &str) -> Result<(String, SimPod)> {
        let state = self.state.read().await;
        for (node_name, node) in &state.nodes {
            if let Some(pod) =
                node.pods.iter().find(|p| p.namespace == namespace && p.name == name)
            {
                return Ok((node_name.clone(), pod.clone()));
            }
        }
        Err(OrchestratorError::not_found("pod", format!("{namespace}/{name}")))
    }
}

fn workload_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn seed_for(name: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish() % 100
}

#[async_trait]
impl ClusterProvider for SimulatedCluster {
    async fn list_nodes(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.node_order.clone())
    }

    async fn node_metrics(&self, node: &str) -> Result<(f64, f64)> {
        let state = self.state.read().await;
        let entry = state
            .nodes
            .get(node)
            .ok_or_else(|| OrchestratorError::not_found("node", node))?;
        if let Some((cpu, memory)) = state.metric_overrides.get(node) {
            return Ok((*cpu, *memory));
        }
        // Base load from the node name seed, pushed up by pod density.
        let base = 20.0 + (seed_for(node) as f64) * 0.5;
        let pressure = entry.pods.len() as f64 * 3.0;
        let cpu = self.jittered((base + pressure).min(95.0));
        let memory = self.jittered((base * 0.9 + pressure).min(95.0));
        Ok((cpu, memory))
    }

    async fn node_capacity(&self, node: &str) -> Result<NodeCapacity> {
        let state = self.state.read().await;
        state
            .nodes
            .get(node)
            .map(|n| n.capacity)
            .ok_or_else(|| OrchestratorError::not_found("node", node))
    }

    async fn node_pod_count(&self, node: &str) -> Result<u32> {
        let state = self.state.read().await;
        let entry = state
            .nodes
            .get(node)
            .ok_or_else(|| OrchestratorError::not_found("node", node))?;
        Ok(entry.pods.len() as u32)
    }

    async fn node_label(&self, node: &str, key: &str) -> Result<String> {
        let state = self.state.read().await;
        let entry = state
            .nodes
            .get(node)
            .ok_or_else(|| OrchestratorError::not_found("node", node))?;
        Ok(entry.labels.get(key).cloned().unwrap_or_default())
    }

    async fn node_gpu_utilization(&self, node: &str) -> Result<f64> {
        let state = self.state.read().await;
        let entry = state
            .nodes
            .get(node)
            .ok_or_else(|| OrchestratorError::not_found("node", node))?;
        if entry.capacity.gpu_count == 0 {
            return Ok(0.0);
        }
        Ok(self.jittered(30.0 + (seed_for(node) as f64) * 0.6))
    }

    async fn node_storage_metrics(&self, node: &str) -> Result<StorageMetrics> {
        let state = self.state.read().await;
        if !state.nodes.contains_key(node) {
            return Err(OrchestratorError::not_found("node", node));
        }
        let seed = seed_for(node) as f64;
        Ok(StorageMetrics {
            read_mbps: 50.0 + seed * 4.0,
            write_mbps: 20.0 + seed * 2.0,
            iops: 500.0 + seed * 40.0,
            utilization_percent: self.jittered(20.0 + seed * 0.7),
        })
    }

    async fn list_pods_on_node(&self, node: &str) -> Result<Vec<PodRef>> {
        let state = self.state.read().await;
        let entry = state
            .nodes
            .get(node)
            .ok_or_else(|| OrchestratorError::not_found("node", node))?;
        Ok(entry
            .pods
            .iter()
            .filter(|p| p.phase == SimPodPhase::Running)
            .map(|p| PodRef::new(p.namespace.clone(), p.name.clone()))
            .collect())
    }

    async fn pod_resource_info(&self, namespace: &str, name: &str) -> Result<PodResourceInfo> {
        let (_, pod) = self.find_pod(namespace, name).await?;
        Ok(PodResourceInfo {
            namespace: pod.namespace,
            name: pod.name,
            priority_class: pod.priority_class,
            priority: pod.priority,
            cpu_request_millis: pod.cpu_request_millis,
            memory_request_bytes: pod.memory_request_bytes,
            gpu_request: pod.gpu_request,
            created_at: Utc::now() - ChronoDuration::seconds(pod.age_seconds),
            storage_read_mbps: pod.storage_read_mbps,
            storage_write_mbps: pod.storage_write_mbps,
            storage_iops: pod.storage_iops,
            pvc_count: if pod.gpu_request > 0 { 2 } else { 1 },
            pvc_total_bytes: 10 * 1024 * 1024 * 1024,
        })
    }

    async fn workload_replicas(
        &self,
        namespace: &str,
        name: &str,
        _kind: WorkloadKind,
    ) -> Result<i32> {
        let state = self.state.read().await;
        Ok(state.workload_replicas.get(&workload_key(namespace, name)).copied().unwrap_or(1))
    }

    async fn workload_pod_metrics(&self, namespace: &str, name: &str) -> Result<WorkloadMetrics> {
        let state = self.state.read().await;
        let replicas = state
            .workload_replicas
            .get(&workload_key(namespace, name))
            .copied()
            .unwrap_or(1)
            .max(1) as f64;
        // Per-pod load relaxes as replicas grow, so autoscalers converge.
        let seed = seed_for(name) as f64;
        let base = 40.0 + seed * 0.5;
        Ok(WorkloadMetrics {
            cpu_percent: self.jittered((base * 2.0 / replicas).min(98.0)),
            memory_percent: self.jittered((base * 1.6 / replicas).min(98.0)),
            gpu_percent: 0.0,
            storage_read_mbps: seed * 3.0 / replicas,
            storage_write_mbps: seed * 1.5 / replicas,
            storage_iops: seed * 30.0 / replicas,
        })
    }

    async fn scale_workload(
        &self,
        namespace: &str,
        name: &str,
        _kind: WorkloadKind,
        replicas: i32,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.workload_replicas.insert(workload_key(namespace, name), replicas);
        Ok(())
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        _grace_period_seconds: i64,
    ) -> Result<()> {
        self.delete_pod(namespace, name, 0).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodManifest> {
        let (node, pod) = self.find_pod(namespace, name).await?;
        Ok(PodManifest {
            namespace: pod.namespace,
            name: pod.name,
            node,
            labels: HashMap::new(),
            containers: pod
                .containers
                .iter()
                .map(|(c, _)| PodContainer { name: c.clone(), image: "registry/app:latest".to_string() })
                .collect(),
        })
    }

    async fn pod_container_states(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<ContainerStateInfo>> {
        let (_, pod) = self.find_pod(namespace, name).await?;
        Ok(pod
            .containers
            .iter()
            .map(|(c, observed)| ContainerStateInfo::classify(c.clone(), *observed))
            .collect())
    }

    async fn create_persistent_volume_claim(
        &self,
        namespace: &str,
        name: &str,
        size: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.pvcs.push((namespace.to_string(), name.to_string(), size.to_string()));
        Ok(())
    }

    async fn create_optimized_pod(
        &self,
        original: &PodManifest,
        target_node: &str,
        state_filter: &[ContainerStateInfo],
        _checkpoint_pvc: Option<&str>,
    ) -> Result<String> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let new_name = format!("{}-{}", original.name, &suffix[..6]);
        let containers: Vec<(String, ContainerObservation)> = state_filter
            .iter()
            .filter(|s| s.should_migrate)
            .map(|s| (s.container.clone(), ContainerObservation::Running))
            .collect();

        let mut state = self.state.write().await;
        let entry = state
            .nodes
            .get_mut(target_node)
            .ok_or_else(|| OrchestratorError::not_found("node", target_node))?;
        entry.pods.push(SimPod {
            namespace: original.namespace.clone(),
            name: new_name.clone(),
            phase: SimPodPhase::Running,
            priority_class: String::new(),
            priority: 0,
            cpu_request_millis: 250,
            memory_request_bytes: 512 * 1024 * 1024,
            gpu_request: 0,
            age_seconds: 0,
            storage_read_mbps: 0.0,
            storage_write_mbps: 0.0,
            storage_iops: 0.0,
            containers,
        });
        Ok(new_name)
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        _grace_period_seconds: i64,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        for node in state.nodes.values_mut() {
            let before = node.pods.len();
            node.pods.retain(|p| !(p.namespace == namespace && p.name == name));
            if node.pods.len() != before {
                return Ok(());
            }
        }
        Err(OrchestratorError::not_found("pod", format!("{namespace}/{name}")))
    }

    async fn wait_for_pod_ready(
        &self,
        namespace: &str,
        name: &str,
        _timeout: Duration,
    ) -> Result<()> {
        // A freshly created simulated pod is ready after a short settle.
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.find_pod(namespace, name).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mutations_are_visible() {
        let cluster = SimulatedCluster::empty();
        cluster
            .insert_node("node-a", HashMap::new(), NodeCapacity {
                cpu_millis: 8000,
                memory_bytes: 32 * 1024 * 1024 * 1024,
                gpu_count: 0,
            })
            .await;
        cluster.insert_pod("node-a", SimPod::running("default", "web-1")).await;

        assert_eq!(cluster.node_pod_count("node-a").await.unwrap(), 1);
        cluster.evict_pod("default", "web-1", 30).await.unwrap();
        assert_eq!(cluster.node_pod_count("node-a").await.unwrap(), 0);
        assert!(cluster.evict_pod("default", "web-1", 30).await.is_err());
    }

    #[tokio::test]
    async fn test_gpu_utilization_zero_without_gpus() {
        let cluster = SimulatedCluster::empty();
        cluster
            .insert_node("cpu-only", HashMap::new(), NodeCapacity {
                cpu_millis: 4000,
                memory_bytes: 8 * 1024 * 1024 * 1024,
                gpu_count: 0,
            })
            .await;
        assert_eq!(cluster.node_gpu_utilization("cpu-only").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_optimized_pod_filters_containers() {
        let cluster = SimulatedCluster::new(2);
        let manifest = PodManifest {
            namespace: "default".to_string(),
            name: "train".to_string(),
            node: "node-1".to_string(),
            labels: HashMap::new(),
            containers: vec![],
        };
        let filter = vec![
            ContainerStateInfo::classify("worker", ContainerObservation::Running),
            ContainerStateInfo::classify("init", ContainerObservation::Terminated { exit_code: 0 }),
        ];
        let new_name = cluster
            .create_optimized_pod(&manifest, "node-2", &filter, Some("ckpt"))
            .await
            .unwrap();
        let states = cluster.pod_container_states("default", &new_name).await.unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].container, "worker");
    }
}
