//! Cluster load balancing via targeted pod migrations
//!
//! A load-balancing job runs snapshot-and-plan cycles: gather per-node
//! state, score how evenly load is spread, pick migrations that move pods
//! off overloaded nodes, dispatch them through the migration controller
//! (or only record them in dry-run), then re-snapshot to measure the
//! improvement. Jobs are one-shot or periodic depending on the request
//! interval.

use crate::cluster::{gather_node_state, ClusterProvider, NodeState, PodRef, LAYER_LABEL_KEY};
use crate::error::{OrchestratorError, Result};
use crate::migration::{MigrationDispatch, MigrationRequest, MigrationStatus};
use crate::mint_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-migration timeout during the execute phase
const MIGRATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Nodes below this average load can receive migrated pods
const UNDERLOADED_THRESHOLD: f64 = 50.0;

/// Rebalancing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Move pods from the most loaded nodes to the least loaded
    LoadSpreading,
    /// Takes the spreading path
    LeastLoaded,
    /// Spreading restricted to nodes on the storage layer
    StorageAware,
    /// Takes the spreading path as its baseline
    Weighted,
    /// Takes the spreading path as its baseline
    StorageIoBalanced,
    /// Takes the spreading path as its baseline
    StorageAwareWeighted,
}

impl Strategy {
    /// Parse a strategy name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "load_spreading" => Some(Self::LoadSpreading),
            "least_loaded" => Some(Self::LeastLoaded),
            "storage_aware" => Some(Self::StorageAware),
            "weighted" => Some(Self::Weighted),
            "storage_io_balanced" => Some(Self::StorageIoBalanced),
            "storage_aware_weighted" => Some(Self::StorageAwareWeighted),
            _ => None,
        }
    }
}

/// Load-balancing request, immutable after validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancingRequest {
    /// Strategy name, defaults to `load_spreading`
    #[serde(default)]
    pub strategy: Option<String>,
    /// Only migrate pods from this namespace when set
    #[serde(default)]
    pub namespace: Option<String>,
    /// Restrict the cycle to these nodes when set
    #[serde(default)]
    pub target_nodes: Option<Vec<String>>,
    /// CPU overload threshold percentage, defaults to 80
    #[serde(default)]
    pub cpu_threshold: Option<f64>,
    /// Memory overload threshold percentage, defaults to 80
    #[serde(default)]
    pub memory_threshold: Option<f64>,
    /// GPU overload threshold percentage, defaults to 80
    #[serde(default)]
    pub gpu_threshold: Option<f64>,
    /// Storage read threshold in MB/s, defaults to 500
    #[serde(default)]
    pub storage_read_threshold_mbps: Option<f64>,
    /// Storage write threshold in MB/s, defaults to 200
    #[serde(default)]
    pub storage_write_threshold_mbps: Option<f64>,
    /// Storage IOPS threshold, defaults to 5000
    #[serde(default)]
    pub storage_iops_threshold: Option<f64>,
    /// Upper bound on migrations planned per cycle, defaults to 5
    #[serde(default)]
    pub max_migrations_per_cycle: Option<usize>,
    /// Cycle period in seconds; 0 runs a single cycle
    #[serde(default)]
    pub interval_seconds: u64,
    /// Plan and verify only, never dispatch migrations
    #[serde(default)]
    pub dry_run: bool,
    /// Forwarded to each dispatched migration
    #[serde(default)]
    pub preserve_pv: bool,
}

/// Request with all defaults resolved
#[derive(Debug, Clone, Copy)]
pub struct EffectiveSettings {
    /// Resolved strategy
    pub strategy: Strategy,
    /// CPU overload threshold percentage
    pub cpu_threshold: f64,
    /// Memory overload threshold percentage
    pub memory_threshold: f64,
    /// GPU overload threshold percentage
    pub gpu_threshold: f64,
    /// Storage read threshold in MB/s
    pub storage_read_threshold_mbps: f64,
    /// Storage write threshold in MB/s
    pub storage_write_threshold_mbps: f64,
    /// Storage IOPS threshold
    pub storage_iops_threshold: f64,
    /// Migration budget per cycle
    pub max_migrations_per_cycle: usize,
}

impl LoadBalancingRequest {
    /// Resolve defaults; fails on an unknown strategy name
    pub fn settings(&self) -> Result<EffectiveSettings> {
        let strategy = match &self.strategy {
            None => Strategy::LoadSpreading,
            Some(name) => Strategy::parse(name).ok_or_else(|| {
                OrchestratorError::validation("strategy", format!("unknown strategy '{name}'"))
            })?,
        };
        Ok(EffectiveSettings {
            strategy,
            cpu_threshold: self.cpu_threshold.unwrap_or(80.0),
            memory_threshold: self.memory_threshold.unwrap_or(80.0),
            gpu_threshold: self.gpu_threshold.unwrap_or(80.0),
            storage_read_threshold_mbps: self.storage_read_threshold_mbps.unwrap_or(500.0),
            storage_write_threshold_mbps: self.storage_write_threshold_mbps.unwrap_or(200.0),
            storage_iops_threshold: self.storage_iops_threshold.unwrap_or(5000.0),
            max_migrations_per_cycle: self.max_migrations_per_cycle.unwrap_or(5),
        })
    }
}

/// Load-balancing job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancingStatus {
    /// Accepted, cycle not started
    Pending,
    /// Cycles in progress
    Running,
    /// All cycles finished
    Completed,
    /// A phase failed; see `error_message`
    Failed,
    /// Cancelled between suspension points
    Cancelled,
}

impl LoadBalancingStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Snapshot of the cluster taken during a cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterState {
    /// Snapshot time
    pub snapshot_at: DateTime<Utc>,
    /// Per-node state
    pub nodes: Vec<NodeState>,
    /// Total pod count across the snapshot
    pub total_pods: u32,
    /// Balance score, 0 to 100, higher is more even
    pub balance_score: f64,
}

/// One planned migration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Pod to move
    pub pod: PodRef,
    /// Node the pod leaves
    pub source_node: String,
    /// Node the pod moves to
    pub target_node: String,
    /// Why the migration was planned
    pub reason: String,
    /// Execution priority, higher executes first
    pub priority: i32,
}

/// Outcome of one dispatched migration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// The executed plan
    pub plan: MigrationPlan,
    /// Whether the migration completed
    pub succeeded: bool,
    /// Error for failed migrations
    pub error: Option<String>,
    /// Dispatch time
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: u64,
}

/// Before/after comparison produced by the verify phase
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceImprovement {
    /// CPU coefficient of variation before the cycle
    pub cpu_cv_before: f64,
    /// CPU coefficient of variation after the cycle
    pub cpu_cv_after: f64,
    /// Memory coefficient of variation before the cycle
    pub memory_cv_before: f64,
    /// Memory coefficient of variation after the cycle
    pub memory_cv_after: f64,
    /// GPU coefficient of variation before the cycle
    pub gpu_cv_before: f64,
    /// GPU coefficient of variation after the cycle
    pub gpu_cv_after: f64,
    /// Balance score before the cycle
    pub balance_before: f64,
    /// Balance score after the cycle
    pub balance_after: f64,
    /// Balance score delta
    pub balance_delta: f64,
}

/// Accumulated observations of one load-balancing job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancingDetails {
    /// Cycles completed so far
    pub cycles_completed: u64,
    /// Last cluster snapshot
    pub last_state: Option<ClusterState>,
    /// Every migration planned over the job's lifetime
    pub planned_migrations: Vec<MigrationPlan>,
    /// Every migration executed over the job's lifetime
    pub executed_migrations: Vec<MigrationRecord>,
    /// Count of migrations that completed
    pub successful_migrations: u64,
    /// Count of migrations that failed
    pub failed_migrations: u64,
    /// Improvement measured by the latest verify phase
    pub improvement: Option<ResourceImprovement>,
    /// Last fatal error
    pub error_message: Option<String>,
}

/// One load-balancing job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingJob {
    /// Stable job identifier
    pub id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: LoadBalancingStatus,
    /// The validated request
    pub request: LoadBalancingRequest,
    /// Observations and outcomes
    pub details: LoadBalancingDetails,
}

/// Controller-wide load-balancing metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalancingMetrics {
    /// Registered jobs
    pub jobs: usize,
    /// Cycles executed across all jobs
    pub cycles_total: u64,
    /// Migrations planned across all jobs
    pub migrations_planned: u64,
    /// Migrations that completed
    pub migrations_succeeded: u64,
    /// Migrations that failed
    pub migrations_failed: u64,
    /// Rolling average of post-cycle balance scores
    pub average_balance_score: f64,
    /// Number of samples behind the rolling average
    pub balance_samples: u64,
}

/// Population coefficient of variation; 0 when the mean is 0
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if mean == 0.0 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    variance.sqrt() / mean
}

/// Balance score across nodes: 100 is perfectly even, 0 is fully skewed.
/// Weighted sum of per-dimension coefficients of variation with storage
/// (read, write, IOPS averaged) weighted heaviest.
pub fn balance_score(nodes: &[NodeState]) -> f64 {
    let cpu_cv = coefficient_of_variation(&collect(nodes, |n| n.cpu_percent));
    let memory_cv = coefficient_of_variation(&collect(nodes, |n| n.memory_percent));
    let gpu_cv = coefficient_of_variation(&collect(nodes, |n| n.gpu_percent));
    let pods_cv = coefficient_of_variation(&collect(nodes, |n| n.pod_count as f64));
    let read_cv = coefficient_of_variation(&collect(nodes, |n| n.storage_read_mbps));
    let write_cv = coefficient_of_variation(&collect(nodes, |n| n.storage_write_mbps));
    let iops_cv = coefficient_of_variation(&collect(nodes, |n| n.storage_iops));
    let storage_cv = (read_cv + write_cv + iops_cv) / 3.0;

    let combined =
        0.20 * cpu_cv + 0.20 * memory_cv + 0.15 * gpu_cv + 0.15 * pods_cv + 0.30 * storage_cv;
    (100.0 * (1.0 - combined)).max(0.0)
}

fn collect(nodes: &[NodeState], value: impl Fn(&NodeState) -> f64) -> Vec<f64> {
    nodes.iter().map(value).collect()
}

/// Build a cluster snapshot from gathered node states
pub fn cluster_state(nodes: Vec<NodeState>) -> ClusterState {
    let total_pods = nodes.iter().map(|n| n.pod_count).sum();
    let balance = balance_score(&nodes);
    ClusterState { snapshot_at: Utc::now(), nodes, total_pods, balance_score: balance }
}

/// Split nodes into overloaded (load above the CPU threshold, sorted most
/// loaded first) and underloaded (load below 50)
pub fn classify_nodes(nodes: &[NodeState], cpu_threshold: f64) -> (Vec<NodeState>, Vec<NodeState>) {
    let mut sorted: Vec<NodeState> = nodes.to_vec();
    sorted.sort_by(|a, b| {
        b.compute_load().partial_cmp(&a.compute_load()).unwrap_or(std::cmp::Ordering::Equal)
    });
    let overloaded =
        sorted.iter().filter(|n| n.compute_load() > cpu_threshold).cloned().collect();
    let underloaded = sorted
        .iter()
        .filter(|n| n.compute_load() < UNDERLOADED_THRESHOLD)
        .cloned()
        .collect();
    (overloaded, underloaded)
}

/// Load-balancing controller: registry of jobs plus the cycle driver
#[derive(Clone)]
pub struct LoadBalancingController {
    cluster: Arc<dyn ClusterProvider>,
    migrations: Arc<dyn MigrationDispatch>,
    jobs: Arc<RwLock<HashMap<String, LoadBalancingJob>>>,
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    metrics: Arc<RwLock<LoadBalancingMetrics>>,
}

impl LoadBalancingController {
    /// Create a new load-balancing controller
    pub fn new(cluster: Arc<dyn ClusterProvider>, migrations: Arc<dyn MigrationDispatch>) -> Self {
        Self {
            cluster,
            migrations,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(LoadBalancingMetrics::default())),
        }
    }

    /// Validate and register a job and start its cycles. Returns the job id.
    pub async fn start_loadbalancing(&self, request: LoadBalancingRequest) -> Result<String> {
        request.settings()?;
        if let Some(max) = request.max_migrations_per_cycle {
            if max == 0 {
                return Err(OrchestratorError::validation(
                    "max_migrations_per_cycle",
                    "must be at least 1",
                ));
            }
        }

        let id = mint_id("lb");
        let token = CancellationToken::new();
        let job = LoadBalancingJob {
            id: id.clone(),
            created_at: Utc::now(),
            status: LoadBalancingStatus::Pending,
            request,
            details: LoadBalancingDetails::default(),
        };
        self.jobs.write().await.insert(id.clone(), job);
        self.tokens.write().await.insert(id.clone(), token.clone());

        let controller = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            controller.run(&job_id, token).await;
        });
        Ok(id)
    }

    /// Get a job by id
    pub async fn get(&self, id: &str) -> Result<LoadBalancingJob> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found("loadbalancing job", id))
    }

    /// List all jobs
    pub async fn list(&self) -> Vec<LoadBalancingJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Cancel a running job; it stops at the next suspension point
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let jobs = self.jobs.read().await;
        let job =
            jobs.get(id).ok_or_else(|| OrchestratorError::not_found("loadbalancing job", id))?;
        if job.status.is_terminal() {
            return Err(OrchestratorError::invalid_state(id, "job is not running"));
        }
        drop(jobs);
        if let Some(token) = self.tokens.read().await.get(id) {
            token.cancel();
        }
        Ok(())
    }

    /// Controller-wide metrics, copied by value
    pub async fn metrics(&self) -> LoadBalancingMetrics {
        let mut metrics = self.metrics.read().await.clone();
        metrics.jobs = self.jobs.read().await.len();
        metrics
    }

    async fn run(&self, id: &str, token: CancellationToken) {
        let request = match self.get(id).await {
            Ok(job) => job.request,
            Err(_) => return,
        };
        let settings = match request.settings() {
            Ok(settings) => settings,
            // Validated at submission; a failure here means the request was
            // mutated out from under us.
            Err(err) => {
                self.finish(id, LoadBalancingStatus::Failed, Some(err.to_string())).await;
                return;
            }
        };
        self.update_job(id, |job| job.status = LoadBalancingStatus::Running).await;

        loop {
            if token.is_cancelled() {
                self.finish(id, LoadBalancingStatus::Cancelled, None).await;
                return;
            }
            match self.execute_cycle(id, &request, &settings, &token).await {
                Ok(()) => {
                    self.update_job(id, |job| job.details.cycles_completed += 1).await;
                    self.metrics.write().await.cycles_total += 1;
                }
                Err(err) if token.is_cancelled() => {
                    debug!(job = id, error = %err, "cycle interrupted by cancellation");
                    self.finish(id, LoadBalancingStatus::Cancelled, None).await;
                    return;
                }
                Err(err) => {
                    warn!(job = id, error = %err, "load-balancing cycle failed");
                    self.finish(id, LoadBalancingStatus::Failed, Some(err.to_string())).await;
                    return;
                }
            }

            if request.interval_seconds == 0 {
                self.finish(id, LoadBalancingStatus::Completed, None).await;
                return;
            }
            tokio::select! {
                _ = token.cancelled() => {
                    self.finish(id, LoadBalancingStatus::Cancelled, None).await;
                    return;
                }
                _ = tokio::time::sleep(Duration::from_secs(request.interval_seconds)) => {}
            }
        }
    }

    /// One full analyze/plan/execute/verify cycle
    async fn execute_cycle(
        &self,
        id: &str,
        request: &LoadBalancingRequest,
        settings: &EffectiveSettings,
        token: &CancellationToken,
    ) -> Result<()> {
        // Phase 1: analyze.
        let nodes = self.snapshot_nodes(request).await?;
        let before = cluster_state(nodes.clone());
        debug!(job = id, nodes = nodes.len(), score = before.balance_score, "cluster analyzed");
        self.update_job(id, |job| job.details.last_state = Some(before.clone())).await;

        // Phase 2: plan.
        let plans = self.plan(request, settings, &nodes).await?;
        info!(job = id, plans = plans.len(), "migration plan ready");
        self.update_job(id, |job| {
            job.details.planned_migrations.extend(plans.iter().cloned());
        })
        .await;
        self.metrics.write().await.migrations_planned += plans.len() as u64;

        // Phase 3: execute.
        if !request.dry_run && !plans.is_empty() {
            self.execute_plans(id, request, plans, token).await;
        }

        // Phase 4: verify.
        let nodes_after = self.snapshot_nodes(request).await?;
        let after = cluster_state(nodes_after);
        let improvement = ResourceImprovement {
            cpu_cv_before: coefficient_of_variation(&collect(&before.nodes, |n| n.cpu_percent)),
            cpu_cv_after: coefficient_of_variation(&collect(&after.nodes, |n| n.cpu_percent)),
            memory_cv_before: coefficient_of_variation(&collect(
                &before.nodes,
                |n| n.memory_percent,
            )),
            memory_cv_after: coefficient_of_variation(&collect(&after.nodes, |n| n.memory_percent)),
            gpu_cv_before: coefficient_of_variation(&collect(&before.nodes, |n| n.gpu_percent)),
            gpu_cv_after: coefficient_of_variation(&collect(&after.nodes, |n| n.gpu_percent)),
            balance_before: before.balance_score,
            balance_after: after.balance_score,
            balance_delta: after.balance_score - before.balance_score,
        };
        self.update_job(id, |job| {
            job.details.improvement = Some(improvement);
            job.details.last_state = Some(after.clone());
        })
        .await;

        let mut metrics = self.metrics.write().await;
        metrics.balance_samples += 1;
        let n = metrics.balance_samples as f64;
        metrics.average_balance_score =
            (metrics.average_balance_score * (n - 1.0) + after.balance_score) / n;
        Ok(())
    }

    async fn snapshot_nodes(&self, request: &LoadBalancingRequest) -> Result<Vec<NodeState>> {
        let mut names = self.cluster.list_nodes().await?;
        if let Some(targets) = &request.target_nodes {
            names.retain(|n| targets.contains(n));
        }
        let mut nodes = Vec::with_capacity(names.len());
        for name in &names {
            nodes.push(gather_node_state(self.cluster.as_ref(), name, LAYER_LABEL_KEY).await?);
        }
        Ok(nodes)
    }

    async fn plan(
        &self,
        request: &LoadBalancingRequest,
        settings: &EffectiveSettings,
        nodes: &[NodeState],
    ) -> Result<Vec<MigrationPlan>> {
        // storage_aware narrows to the storage layer and falls back to the
        // whole node set when the label is absent. The remaining strategies
        // all take the spreading path for now.
        let candidate_nodes: Vec<NodeState> = match settings.strategy {
            Strategy::StorageAware => {
                let storage: Vec<NodeState> =
                    nodes.iter().filter(|n| n.layer_label == "storage").cloned().collect();
                if storage.is_empty() {
                    nodes.to_vec()
                } else {
                    storage
                }
            }
            _ => nodes.to_vec(),
        };

        let (overloaded, underloaded) = classify_nodes(&candidate_nodes, settings.cpu_threshold);
        if overloaded.is_empty() || underloaded.is_empty() {
            return Ok(Vec::new());
        }
        // The least-loaded receiver absorbs the moved pods.
        let target = underloaded
            .iter()
            .min_by(|a, b| {
                a.compute_load().partial_cmp(&b.compute_load()).unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
            .ok_or_else(|| OrchestratorError::internal("underloaded set unexpectedly empty"))?;

        let mut plans = Vec::new();
        'nodes: for node in &overloaded {
            let pods = self.cluster.list_pods_on_node(&node.name).await?;
            for pod in pods {
                if plans.len() >= settings.max_migrations_per_cycle {
                    break 'nodes;
                }
                if let Some(namespace) = &request.namespace {
                    if pod.namespace != *namespace {
                        continue;
                    }
                }
                let priority = 100 - plans.len() as i32;
                plans.push(MigrationPlan {
                    reason: format!(
                        "node {} at {:.1}% average load, above the {:.0}% threshold",
                        node.name,
                        node.compute_load(),
                        settings.cpu_threshold
                    ),
                    pod,
                    source_node: node.name.clone(),
                    target_node: target.name.clone(),
                    priority,
                });
            }
        }
        Ok(plans)
    }

    async fn execute_plans(
        &self,
        id: &str,
        request: &LoadBalancingRequest,
        mut plans: Vec<MigrationPlan>,
        token: &CancellationToken,
    ) {
        plans.sort_by(|a, b| b.priority.cmp(&a.priority));
        for plan in plans {
            if token.is_cancelled() {
                return;
            }
            let started_at = Utc::now();
            let timer = Instant::now();
            let migration = MigrationRequest {
                pod_name: plan.pod.name.clone(),
                namespace: plan.pod.namespace.clone(),
                source_node: plan.source_node.clone(),
                target_node: plan.target_node.clone(),
                checkpoint_size: None,
                preserve_pv: request.preserve_pv,
                timeout_seconds: MIGRATION_TIMEOUT.as_secs(),
                reason: Some(plan.reason.clone()),
            };
            let outcome = self.migrations.dispatch(migration, MIGRATION_TIMEOUT).await;
            let duration_ms = timer.elapsed().as_millis() as u64;

            let (succeeded, error) = match outcome {
                Ok(job) if job.status == MigrationStatus::Completed => (true, None),
                Ok(job) => (false, job.details.error_message),
                Err(err) => (false, Some(err.to_string())),
            };
            if succeeded {
                self.metrics.write().await.migrations_succeeded += 1;
            } else {
                self.metrics.write().await.migrations_failed += 1;
                warn!(job = id, pod = %plan.pod, "planned migration failed");
            }
            self.update_job(id, |job| {
                if succeeded {
                    job.details.successful_migrations += 1;
                } else {
                    job.details.failed_migrations += 1;
                }
                job.details.executed_migrations.push(MigrationRecord {
                    plan: plan.clone(),
                    succeeded,
                    error: error.clone(),
                    started_at,
                    duration_ms,
                });
            })
            .await;
        }
    }

    async fn finish(&self, id: &str, status: LoadBalancingStatus, error: Option<String>) {
        self.update_job(id, |job| {
            if !job.status.is_terminal() {
                job.status = status;
            }
            if let Some(message) = error {
                job.details.error_message = Some(message);
            }
        })
        .await;
        self.tokens.write().await.remove(id);
    }

    async fn update_job<F: FnOnce(&mut LoadBalancingJob)>(&self, id: &str, apply: F) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            apply(job);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::sim::{SimPod, SimulatedCluster};
    use crate::cluster::NodeCapacity;
    use crate::migration::MigrationJob;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn node(name: &str, cpu: f64, memory: f64) -> NodeState {
        NodeState {
            name: name.to_string(),
            cpu_percent: cpu,
            memory_percent: memory,
            gpu_percent: 0.0,
            pod_count: 5,
            capacity: NodeCapacity::default(),
            layer_label: String::new(),
            storage_read_mbps: 100.0,
            storage_write_mbps: 50.0,
            storage_iops: 1000.0,
            storage_utilization_percent: 20.0,
        }
    }

    /// Dispatch fake that records requests and reports success without
    /// touching any cluster.
    #[derive(Default)]
    struct RecordingDispatch {
        requests: Mutex<Vec<MigrationRequest>>,
    }

    #[async_trait]
    impl MigrationDispatch for RecordingDispatch {
        async fn dispatch(
            &self,
            request: MigrationRequest,
            _timeout: Duration,
        ) -> crate::error::Result<MigrationJob> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(MigrationJob {
                id: "migration-test0000".to_string(),
                created_at: Utc::now(),
                status: MigrationStatus::Completed,
                request,
                details: Default::default(),
            })
        }
    }

    async fn wait_terminal(controller: &LoadBalancingController, id: &str) -> LoadBalancingJob {
        for _ in 0..200 {
            let job = controller.get(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("loadbalancing job {id} did not reach a terminal status");
    }

    fn two_node_cluster() -> SimulatedCluster {
        SimulatedCluster::empty()
    }

    async fn seed_hot_and_cold(cluster: &SimulatedCluster) {
        cluster
            .insert_node("n1", HashMap::new(), NodeCapacity::default())
            .await;
        cluster
            .insert_node("n2", HashMap::new(), NodeCapacity::default())
            .await;
        cluster.set_node_metrics("n1", 90.0, 90.0).await;
        cluster.set_node_metrics("n2", 20.0, 20.0).await;
        cluster.insert_pod("n1", SimPod::running("default", "web-a")).await;
        cluster.insert_pod("n1", SimPod::running("default", "web-b")).await;
    }

    #[test]
    fn test_cv_of_uniform_values_is_zero() {
        assert_eq!(coefficient_of_variation(&[50.0, 50.0, 50.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[0.0, 0.0]), 0.0);
        assert_eq!(coefficient_of_variation(&[]), 0.0);
    }

    #[test]
    fn test_single_node_scores_100() {
        let nodes = vec![node("only", 73.0, 40.0)];
        assert_eq!(balance_score(&nodes), 100.0);
    }

    #[test]
    fn test_balanced_cluster_scores_100() {
        let nodes = vec![node("a", 50.0, 50.0), node("b", 50.0, 50.0)];
        assert_eq!(balance_score(&nodes), 100.0);
    }

    #[test]
    fn test_score_decreases_with_spread() {
        let even = vec![node("a", 50.0, 50.0), node("b", 50.0, 50.0)];
        let mild = vec![node("a", 60.0, 60.0), node("b", 40.0, 40.0)];
        let wild = vec![node("a", 95.0, 95.0), node("b", 5.0, 5.0)];
        let even_score = balance_score(&even);
        let mild_score = balance_score(&mild);
        let wild_score = balance_score(&wild);
        assert!(even_score > mild_score);
        assert!(mild_score > wild_score);
        assert!(wild_score >= 0.0);
    }

    #[test]
    fn test_classification() {
        let nodes = vec![node("hot", 90.0, 90.0), node("mid", 65.0, 65.0), node("cold", 20.0, 20.0)];
        let (overloaded, underloaded) = classify_nodes(&nodes, 80.0);
        assert_eq!(overloaded.len(), 1);
        assert_eq!(overloaded[0].name, "hot");
        assert_eq!(underloaded.len(), 1);
        assert_eq!(underloaded[0].name, "cold");
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_dispatch() {
        let cluster = Arc::new(two_node_cluster());
        seed_hot_and_cold(&cluster).await;
        let dispatch = Arc::new(RecordingDispatch::default());
        let controller = LoadBalancingController::new(cluster.clone(), dispatch.clone());

        let id = controller
            .start_loadbalancing(LoadBalancingRequest { dry_run: true, ..Default::default() })
            .await
            .unwrap();
        let job = wait_terminal(&controller, &id).await;

        assert_eq!(job.status, LoadBalancingStatus::Completed);
        assert_eq!(job.details.planned_migrations.len(), 2);
        for plan in &job.details.planned_migrations {
            assert_eq!(plan.source_node, "n1");
            assert_eq!(plan.target_node, "n2");
        }
        let priorities: Vec<i32> =
            job.details.planned_migrations.iter().map(|p| p.priority).collect();
        assert_eq!(priorities, vec![100, 99]);
        // Dry-run never dispatches.
        assert!(dispatch.requests.lock().unwrap().is_empty());
        assert!(job.details.executed_migrations.is_empty());
        // Both pods are still on n1.
        assert_eq!(cluster.node_pod_count("n1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_execute_dispatches_in_priority_order() {
        let cluster = Arc::new(two_node_cluster());
        seed_hot_and_cold(&cluster).await;
        let dispatch = Arc::new(RecordingDispatch::default());
        let controller = LoadBalancingController::new(cluster, dispatch.clone());

        let id = controller
            .start_loadbalancing(LoadBalancingRequest::default())
            .await
            .unwrap();
        let job = wait_terminal(&controller, &id).await;

        assert_eq!(job.status, LoadBalancingStatus::Completed);
        assert_eq!(job.details.successful_migrations, 2);
        let dispatched = dispatch.requests.lock().unwrap();
        assert_eq!(dispatched.len(), 2);
        // Priority 100 plan goes first; plans were built in pod listing order.
        assert_eq!(dispatched[0].pod_name, job.details.planned_migrations[0].pod.name);
    }

    #[tokio::test]
    async fn test_namespace_filter_limits_plans() {
        let cluster = Arc::new(two_node_cluster());
        seed_hot_and_cold(&cluster).await;
        cluster.insert_pod("n1", SimPod::running("batch", "job-x")).await;
        let dispatch = Arc::new(RecordingDispatch::default());
        let controller = LoadBalancingController::new(cluster, dispatch);

        let id = controller
            .start_loadbalancing(LoadBalancingRequest {
                namespace: Some("batch".to_string()),
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let job = wait_terminal(&controller, &id).await;
        assert_eq!(job.details.planned_migrations.len(), 1);
        assert_eq!(job.details.planned_migrations[0].pod.namespace, "batch");
    }

    #[tokio::test]
    async fn test_no_plan_when_nothing_underloaded() {
        let cluster = Arc::new(two_node_cluster());
        cluster.insert_node("a", HashMap::new(), NodeCapacity::default()).await;
        cluster.insert_node("b", HashMap::new(), NodeCapacity::default()).await;
        cluster.set_node_metrics("a", 90.0, 90.0).await;
        cluster.set_node_metrics("b", 70.0, 70.0).await;
        cluster.insert_pod("a", SimPod::running("default", "p")).await;
        let dispatch = Arc::new(RecordingDispatch::default());
        let controller = LoadBalancingController::new(cluster, dispatch);

        let id = controller
            .start_loadbalancing(LoadBalancingRequest { dry_run: true, ..Default::default() })
            .await
            .unwrap();
        let job = wait_terminal(&controller, &id).await;
        assert!(job.details.planned_migrations.is_empty());
    }

    #[tokio::test]
    async fn test_plan_respects_migration_budget() {
        let cluster = Arc::new(two_node_cluster());
        seed_hot_and_cold(&cluster).await;
        for i in 0..6 {
            cluster.insert_pod("n1", SimPod::running("default", format!("extra-{i}"))).await;
        }
        let dispatch = Arc::new(RecordingDispatch::default());
        let controller = LoadBalancingController::new(cluster, dispatch);

        let id = controller
            .start_loadbalancing(LoadBalancingRequest { dry_run: true, ..Default::default() })
            .await
            .unwrap();
        let job = wait_terminal(&controller, &id).await;
        assert_eq!(job.details.planned_migrations.len(), 5);
    }

    #[tokio::test]
    async fn test_unknown_strategy_rejected() {
        let cluster = Arc::new(two_node_cluster());
        let dispatch = Arc::new(RecordingDispatch::default());
        let controller = LoadBalancingController::new(cluster, dispatch);
        let err = controller
            .start_loadbalancing(LoadBalancingRequest {
                strategy: Some("round_robin".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_cancel_completed_job_is_invalid() {
        let cluster = Arc::new(two_node_cluster());
        cluster.insert_node("solo", HashMap::new(), NodeCapacity::default()).await;
        let dispatch = Arc::new(RecordingDispatch::default());
        let controller = LoadBalancingController::new(cluster, dispatch);

        let id = controller
            .start_loadbalancing(LoadBalancingRequest { dry_run: true, ..Default::default() })
            .await
            .unwrap();
        wait_terminal(&controller, &id).await;
        assert!(matches!(
            controller.cancel(&id).await.unwrap_err(),
            OrchestratorError::InvalidState { .. }
        ));
    }

    #[tokio::test]
    async fn test_periodic_job_cancels() {
        let cluster = Arc::new(two_node_cluster());
        cluster.insert_node("solo", HashMap::new(), NodeCapacity::default()).await;
        let dispatch = Arc::new(RecordingDispatch::default());
        let controller = LoadBalancingController::new(cluster, dispatch);

        let id = controller
            .start_loadbalancing(LoadBalancingRequest {
                dry_run: true,
                interval_seconds: 3600,
                ..Default::default()
            })
            .await
            .unwrap();
        // Give the first cycle a moment, then cancel during the interval sleep.
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.cancel(&id).await.unwrap();
        let job = wait_terminal(&controller, &id).await;
        assert_eq!(job.status, LoadBalancingStatus::Cancelled);
        assert!(job.details.cycles_completed >= 1);
    }
}
