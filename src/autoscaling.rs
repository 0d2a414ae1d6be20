//! Multi-signal horizontal autoscaling
//!
//! Each registered autoscaler is reconciled on a fixed tick: read the
//! workload's replicas and averaged pod metrics, derive a desired replica
//! count per configured target (taking the max across signals), clamp,
//! apply the per-direction step limit, then damp through the stabilization
//! windows before touching the cluster. Adapter errors are recorded and the
//! autoscaler simply tries again on the next tick.

use crate::cluster::{ClusterProvider, WorkloadKind, WorkloadMetrics};
use crate::error::{OrchestratorError, Result};
use crate::mint_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reconcile interval for every autoscaler
pub const TICK_INTERVAL: Duration = Duration::from_secs(15);

/// Default scale-down stabilization window
const DEFAULT_SCALE_DOWN_WINDOW: Duration = Duration::from_secs(300);

/// Bound on retained recommendations per direction
const HISTORY_LIMIT: usize = 32;

/// Per-direction scaling policy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScalePolicy {
    /// Seconds recommendations are retained for damping; 0 reacts immediately
    #[serde(default)]
    pub stabilization_window_seconds: u64,
    /// Largest replica change applied in one step; 0 means unlimited
    #[serde(default)]
    pub max_scale_change: i32,
}

/// Autoscaler creation request, immutable after validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalingRequest {
    /// Workload name
    pub workload_name: String,
    /// Workload namespace
    pub namespace: String,
    /// Workload kind: Deployment, StatefulSet or ReplicaSet
    pub workload_kind: String,
    /// Lower replica bound, at least 1
    pub min_replicas: i32,
    /// Upper replica bound
    pub max_replicas: i32,
    /// Target average CPU utilization percentage
    #[serde(default)]
    pub target_cpu_percent: Option<f64>,
    /// Target average memory utilization percentage
    #[serde(default)]
    pub target_memory_percent: Option<f64>,
    /// Target average GPU utilization percentage
    #[serde(default)]
    pub target_gpu_percent: Option<f64>,
    /// Target storage read throughput per pod in MB/s
    #[serde(default)]
    pub target_storage_read_mbps: Option<f64>,
    /// Target storage write throughput per pod in MB/s
    #[serde(default)]
    pub target_storage_write_mbps: Option<f64>,
    /// Target storage IOPS per pod
    #[serde(default)]
    pub target_storage_iops: Option<f64>,
    /// Scale-up policy; window defaults to 0 seconds
    #[serde(default)]
    pub scale_up: Option<ScalePolicy>,
    /// Scale-down policy; window defaults to 300 seconds
    #[serde(default)]
    pub scale_down: Option<ScalePolicy>,
}

impl AutoscalingRequest {
    /// Parsed workload kind; validation guarantees this succeeds
    pub fn kind(&self) -> WorkloadKind {
        WorkloadKind::parse(&self.workload_kind).unwrap_or(WorkloadKind::Deployment)
    }

    fn targets(&self) -> [Option<f64>; 6] {
        [
            self.target_cpu_percent,
            self.target_memory_percent,
            self.target_gpu_percent,
            self.target_storage_read_mbps,
            self.target_storage_write_mbps,
            self.target_storage_iops,
        ]
    }

    /// Effective scale-up policy
    pub fn scale_up_policy(&self) -> ScalePolicy {
        self.scale_up.unwrap_or_default()
    }

    /// Effective scale-down policy
    pub fn scale_down_policy(&self) -> ScalePolicy {
        self.scale_down.unwrap_or(ScalePolicy {
            stabilization_window_seconds: DEFAULT_SCALE_DOWN_WINDOW.as_secs(),
            max_scale_change: 0,
        })
    }
}

/// Autoscaler status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoscalerStatus {
    /// Loop running
    Active,
    /// Loop stopped
    Inactive,
}

/// Observed state of one autoscaler
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoscalerDetails {
    /// Replicas read on the last tick
    pub current_replicas: i32,
    /// Replicas chosen on the last tick
    pub desired_replicas: i32,
    /// Metrics read on the last tick
    pub last_metrics: Option<WorkloadMetrics>,
    /// Number of scale-up actions applied
    pub scale_up_count: u64,
    /// Number of scale-down actions applied
    pub scale_down_count: u64,
    /// Time of the last applied scaling action
    pub last_scale_time: Option<DateTime<Utc>>,
    /// Last adapter error, cleared on the next successful tick
    pub last_error: Option<String>,
}

/// One autoscaler registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalerJob {
    /// Stable autoscaler identifier
    pub id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: AutoscalerStatus,
    /// The validated request
    pub request: AutoscalingRequest,
    /// Observed state
    pub details: AutoscalerDetails,
}

/// Controller-wide autoscaling metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoscalingMetrics {
    /// Registered autoscalers
    pub autoscalers: usize,
    /// Autoscalers with a running loop
    pub active_autoscalers: usize,
    /// Scale-up actions applied across all autoscalers
    pub total_scale_ups: u64,
    /// Scale-down actions applied across all autoscalers
    pub total_scale_downs: u64,
    /// Reconcile ticks executed
    pub total_ticks: u64,
    /// Ticks skipped because of adapter errors
    pub tick_errors: u64,
}

#[derive(Default)]
struct ScaleHistories {
    up: VecDeque<(i32, Instant)>,
    down: VecDeque<(i32, Instant)>,
}

#[derive(Default)]
struct Counters {
    total_scale_ups: u64,
    total_scale_downs: u64,
    total_ticks: u64,
    tick_errors: u64,
}

/// Autoscaling controller: registry of autoscalers plus their tick loops
#[derive(Clone)]
pub struct AutoscalingController {
    cluster: Arc<dyn ClusterProvider>,
    jobs: Arc<RwLock<HashMap<String, AutoscalerJob>>>,
    histories: Arc<RwLock<HashMap<String, ScaleHistories>>>,
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    counters: Arc<RwLock<Counters>>,
}

impl AutoscalingController {
    /// Create a new autoscaling controller
    pub fn new(cluster: Arc<dyn ClusterProvider>) -> Self {
        Self {
            cluster,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            histories: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(RwLock::new(Counters::default())),
        }
    }

    /// Validate and register an autoscaler and start its reconcile loop.
    /// Returns the autoscaler id.
    pub async fn create_autoscaler(&self, request: AutoscalingRequest) -> Result<String> {
        let id = self.register(request).await?;
        let token = CancellationToken::new();
        self.tokens.write().await.insert(id.clone(), token.clone());

        let controller = self.clone();
        let loop_id = id.clone();
        tokio::spawn(async move {
            controller.run_loop(loop_id, token).await;
        });
        Ok(id)
    }

    /// Get an autoscaler by id
    pub async fn get(&self, id: &str) -> Result<AutoscalerJob> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found("autoscaler", id))
    }

    /// List all autoscalers
    pub async fn list(&self) -> Vec<AutoscalerJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Stop the reconcile loop and remove the autoscaler
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.remove(id).is_none() {
            return Err(OrchestratorError::not_found("autoscaler", id));
        }
        drop(jobs);
        if let Some(token) = self.tokens.write().await.remove(id) {
            token.cancel();
        }
        self.histories.write().await.remove(id);
        info!(autoscaler = id, "autoscaler deleted");
        Ok(())
    }

    /// Controller-wide metrics, copied by value
    pub async fn metrics(&self) -> AutoscalingMetrics {
        let jobs = self.jobs.read().await;
        let counters = self.counters.read().await;
        AutoscalingMetrics {
            autoscalers: jobs.len(),
            active_autoscalers: jobs
                .values()
                .filter(|j| j.status == AutoscalerStatus::Active)
                .count(),
            total_scale_ups: counters.total_scale_ups,
            total_scale_downs: counters.total_scale_downs,
            total_ticks: counters.total_ticks,
            tick_errors: counters.tick_errors,
        }
    }

    fn validate(request: &AutoscalingRequest) -> Result<()> {
        if request.workload_name.is_empty() {
            return Err(OrchestratorError::validation("workload_name", "must not be empty"));
        }
        if request.namespace.is_empty() {
            return Err(OrchestratorError::validation("namespace", "must not be empty"));
        }
        if WorkloadKind::parse(&request.workload_kind).is_none() {
            return Err(OrchestratorError::validation(
                "workload_kind",
                "must be Deployment, StatefulSet or ReplicaSet",
            ));
        }
        if request.min_replicas < 1 {
            return Err(OrchestratorError::validation("min_replicas", "must be at least 1"));
        }
        if request.max_replicas < request.min_replicas {
            return Err(OrchestratorError::validation(
                "max_replicas",
                "must be greater than or equal to min_replicas",
            ));
        }
        let targets = request.targets();
        if targets.iter().all(|t| t.is_none()) {
            return Err(OrchestratorError::validation(
                "targets",
                "at least one metric target must be set",
            ));
        }
        if targets.iter().flatten().any(|t| *t <= 0.0 || !t.is_finite()) {
            return Err(OrchestratorError::validation("targets", "targets must be positive"));
        }
        Ok(())
    }

    async fn register(&self, request: AutoscalingRequest) -> Result<String> {
        Self::validate(&request)?;
        let id = mint_id("autoscaler");
        let job = AutoscalerJob {
            id: id.clone(),
            created_at: Utc::now(),
            status: AutoscalerStatus::Active,
            request,
            details: AutoscalerDetails::default(),
        };
        self.jobs.write().await.insert(id.clone(), job);
        self.histories.write().await.insert(id.clone(), ScaleHistories::default());
        Ok(id)
    }

    async fn run_loop(&self, id: String, token: CancellationToken) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.tick(&id).await {
                        // The entry is gone; the loop has nothing left to do.
                        debug!(autoscaler = %id, error = %err, "stopping reconcile loop");
                        break;
                    }
                }
            }
        }
    }

    /// One reconcile pass for one autoscaler. Errors from the adapter are
    /// swallowed into the job details; an `Err` here means the autoscaler no
    /// longer exists and its loop should stop.
    async fn tick(&self, id: &str) -> Result<()> {
        let job = self.get(id).await?;
        if job.status != AutoscalerStatus::Active {
            return Err(OrchestratorError::invalid_state(id, "autoscaler inactive"));
        }
        let request = job.request;
        self.counters.write().await.total_ticks += 1;

        let kind = request.kind();
        let current = match self
            .cluster
            .workload_replicas(&request.namespace, &request.workload_name, kind)
            .await
        {
            Ok(replicas) => replicas,
            Err(err) => return self.record_tick_error(id, err).await,
        };
        let metrics = match self
            .cluster
            .workload_pod_metrics(&request.namespace, &request.workload_name)
            .await
        {
            Ok(metrics) => metrics,
            Err(err) => return self.record_tick_error(id, err).await,
        };

        let desired = recommend_replicas(current, &metrics, &request).unwrap_or(current);
        let desired = desired.clamp(request.min_replicas, request.max_replicas);
        let desired = apply_step_limit(current, desired, &request);
        let chosen = {
            let mut histories = self.histories.write().await;
            let entry = histories.entry(id.to_string()).or_default();
            stabilize(entry, current, desired, Instant::now(), &request)
        };

        self.update_job(id, |job| {
            job.details.current_replicas = current;
            job.details.desired_replicas = chosen;
            job.details.last_metrics = Some(metrics);
            job.details.last_error = None;
        })
        .await;

        if chosen == current {
            return Ok(());
        }

        debug!(
            autoscaler = id,
            workload = %request.workload_name,
            current,
            chosen,
            "applying scale decision"
        );
        match self
            .cluster
            .scale_workload(&request.namespace, &request.workload_name, kind, chosen)
            .await
        {
            Ok(()) => {
                let scaled_up = chosen > current;
                self.update_job(id, |job| {
                    if scaled_up {
                        job.details.scale_up_count += 1;
                    } else {
                        job.details.scale_down_count += 1;
                    }
                    job.details.last_scale_time = Some(Utc::now());
                })
                .await;
                let mut counters = self.counters.write().await;
                if scaled_up {
                    counters.total_scale_ups += 1;
                } else {
                    counters.total_scale_downs += 1;
                }
                info!(autoscaler = id, workload = %request.workload_name, from = current, to = chosen, "workload scaled");
            }
            Err(err) => {
                let _ = self.record_tick_error(id, err).await;
            }
        }
        Ok(())
    }

    async fn record_tick_error(&self, id: &str, err: OrchestratorError) -> Result<()> {
        warn!(autoscaler = id, error = %err, "tick skipped on adapter error");
        self.counters.write().await.tick_errors += 1;
        self.update_job(id, |job| job.details.last_error = Some(err.to_string())).await;
        Ok(())
    }

    async fn update_job<F: FnOnce(&mut AutoscalerJob)>(&self, id: &str, apply: F) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            apply(job);
        }
    }
}

/// Desired replicas per active target, taking the max across signals.
/// `None` when the request carries no targets at all.
pub fn recommend_replicas(
    current: i32,
    metrics: &WorkloadMetrics,
    request: &AutoscalingRequest,
) -> Option<i32> {
    let pairs = [
        (request.target_cpu_percent, metrics.cpu_percent),
        (request.target_memory_percent, metrics.memory_percent),
        (request.target_gpu_percent, metrics.gpu_percent),
        (request.target_storage_read_mbps, metrics.storage_read_mbps),
        (request.target_storage_write_mbps, metrics.storage_write_mbps),
        (request.target_storage_iops, metrics.storage_iops),
    ];

    let mut desired: Option<i32> = None;
    for (target, observed) in pairs {
        let Some(target) = target else { continue };
        if target <= 0.0 {
            continue;
        }
        // Integer truncation, not ceiling.
        let candidate = (current as f64 * observed / target) as i32;
        desired = Some(desired.map_or(candidate, |d| d.max(candidate)));
    }
    desired
}

/// Cap the replica change to the policy of the direction being taken
pub fn apply_step_limit(current: i32, desired: i32, request: &AutoscalingRequest) -> i32 {
    if desired > current {
        let max_change = request.scale_up_policy().max_scale_change;
        if max_change > 0 {
            return desired.min(current + max_change);
        }
    } else if desired < current {
        let max_change = request.scale_down_policy().max_scale_change;
        if max_change > 0 {
            return desired.max(current - max_change);
        }
    }
    desired
}

fn stabilize(
    histories: &mut ScaleHistories,
    current: i32,
    desired: i32,
    now: Instant,
    request: &AutoscalingRequest,
) -> i32 {
    if desired == current {
        histories.up.clear();
        histories.down.clear();
        return current;
    }
    let (history, window) = if desired > current {
        (
            &mut histories.up,
            Duration::from_secs(request.scale_up_policy().stabilization_window_seconds),
        )
    } else {
        (
            &mut histories.down,
            Duration::from_secs(request.scale_down_policy().stabilization_window_seconds),
        )
    };

    history.push_back((desired, now));
    while history.len() > HISTORY_LIMIT {
        history.pop_front();
    }
    history.retain(|(_, at)| now.duration_since(*at) <= window);

    // The maximum recommendation in the window wins in both directions; for
    // scale-down this is the conservative choice that prevents a premature
    // drop.
    history.iter().map(|(replicas, _)| *replicas).max().unwrap_or(desired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::sim::SimulatedCluster;
    use crate::cluster::{
        ContainerStateInfo, NodeCapacity, PodManifest, PodRef, PodResourceInfo, StorageMetrics,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Adapter fake that serves fixed replica/metric readings and records
    /// every scale call.
    struct ScriptedWorkload {
        replicas: Mutex<i32>,
        metrics: Mutex<WorkloadMetrics>,
        scale_calls: Mutex<Vec<i32>>,
    }

    impl ScriptedWorkload {
        fn new(replicas: i32, cpu: f64) -> Self {
            Self {
                replicas: Mutex::new(replicas),
                metrics: Mutex::new(WorkloadMetrics { cpu_percent: cpu, ..Default::default() }),
                scale_calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ClusterProvider for ScriptedWorkload {
        async fn list_nodes(&self) -> crate::error::Result<Vec<String>> {
            Ok(vec![])
        }
        async fn node_metrics(&self, _: &str) -> crate::error::Result<(f64, f64)> {
            unimplemented!()
        }
        async fn node_capacity(&self, _: &str) -> crate::error::Result<NodeCapacity> {
            unimplemented!()
        }
        async fn node_pod_count(&self, _: &str) -> crate::error::Result<u32> {
            unimplemented!()
        }
        async fn node_label(&self, _: &str, _: &str) -> crate::error::Result<String> {
            unimplemented!()
        }
        async fn node_gpu_utilization(&self, _: &str) -> crate::error::Result<f64> {
            unimplemented!()
        }
        async fn node_storage_metrics(&self, _: &str) -> crate::error::Result<StorageMetrics> {
            unimplemented!()
        }
        async fn list_pods_on_node(&self, _: &str) -> crate::error::Result<Vec<PodRef>> {
            unimplemented!()
        }
        async fn pod_resource_info(
            &self,
            _: &str,
            _: &str,
        ) -> crate::error::Result<PodResourceInfo> {
            unimplemented!()
        }
        async fn workload_replicas(
            &self,
            _: &str,
            _: &str,
            _: WorkloadKind,
        ) -> crate::error::Result<i32> {
            Ok(*self.replicas.lock().unwrap())
        }
        async fn workload_pod_metrics(
            &self,
            _: &str,
            _: &str,
        ) -> crate::error::Result<WorkloadMetrics> {
            Ok(*self.metrics.lock().unwrap())
        }
        async fn scale_workload(
            &self,
            _: &str,
            _: &str,
            _: WorkloadKind,
            replicas: i32,
        ) -> crate::error::Result<()> {
            self.scale_calls.lock().unwrap().push(replicas);
            *self.replicas.lock().unwrap() = replicas;
            Ok(())
        }
        async fn evict_pod(&self, _: &str, _: &str, _: i64) -> crate::error::Result<()> {
            unimplemented!()
        }
        async fn get_pod(&self, _: &str, _: &str) -> crate::error::Result<PodManifest> {
            unimplemented!()
        }
        async fn pod_container_states(
            &self,
            _: &str,
            _: &str,
        ) -> crate::error::Result<Vec<ContainerStateInfo>> {
            unimplemented!()
        }
        async fn create_persistent_volume_claim(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> crate::error::Result<()> {
            unimplemented!()
        }
        async fn create_optimized_pod(
            &self,
            _: &PodManifest,
            _: &str,
            _: &[ContainerStateInfo],
            _: Option<&str>,
        ) -> crate::error::Result<String> {
            unimplemented!()
        }
        async fn delete_pod(&self, _: &str, _: &str, _: i64) -> crate::error::Result<()> {
            unimplemented!()
        }
        async fn wait_for_pod_ready(
            &self,
            _: &str,
            _: &str,
            _: Duration,
        ) -> crate::error::Result<()> {
            unimplemented!()
        }
    }

    fn base_request() -> AutoscalingRequest {
        AutoscalingRequest {
            workload_name: "inference".to_string(),
            namespace: "default".to_string(),
            workload_kind: "Deployment".to_string(),
            min_replicas: 1,
            max_replicas: 10,
            target_cpu_percent: Some(70.0),
            target_memory_percent: None,
            target_gpu_percent: None,
            target_storage_read_mbps: None,
            target_storage_write_mbps: None,
            target_storage_iops: None,
            scale_up: None,
            scale_down: None,
        }
    }

    fn metrics(cpu: f64) -> WorkloadMetrics {
        WorkloadMetrics { cpu_percent: cpu, ..Default::default() }
    }

    #[test]
    fn test_replica_formula_truncates() {
        // 2 * 90 / 70 = 2.57 truncates to 2: no scale.
        assert_eq!(recommend_replicas(2, &metrics(90.0), &base_request()), Some(2));
        // 2 * 140 / 70 = 4.
        assert_eq!(recommend_replicas(2, &metrics(140.0), &base_request()), Some(4));
    }

    #[test]
    fn test_replica_formula_takes_max_across_signals() {
        let mut request = base_request();
        request.target_storage_read_mbps = Some(100.0);
        let observed = WorkloadMetrics {
            cpu_percent: 35.0,        // 2 * 35/70 = 1
            storage_read_mbps: 400.0, // 2 * 400/100 = 8
            ..Default::default()
        };
        assert_eq!(recommend_replicas(2, &observed, &request), Some(8));
    }

    #[test]
    fn test_clamp_to_min() {
        let mut request = base_request();
        request.min_replicas = 2;
        let desired = recommend_replicas(2, &metrics(10.0), &request).unwrap();
        assert_eq!(desired, 0);
        assert_eq!(desired.clamp(request.min_replicas, request.max_replicas), 2);
    }

    #[test]
    fn test_step_limit_caps_scale_up() {
        let mut request = base_request();
        request.scale_up = Some(ScalePolicy { stabilization_window_seconds: 0, max_scale_change: 3 });
        assert_eq!(apply_step_limit(2, 10, &request), 5);
        assert_eq!(apply_step_limit(2, 4, &request), 4);
    }

    #[test]
    fn test_step_limit_caps_scale_down() {
        let mut request = base_request();
        request.scale_down =
            Some(ScalePolicy { stabilization_window_seconds: 0, max_scale_change: 2 });
        assert_eq!(apply_step_limit(8, 1, &request), 6);
    }

    #[test]
    fn test_stabilization_window_takes_max() {
        let request = base_request(); // scale-down window 300s
        let mut histories = ScaleHistories::default();
        let start = Instant::now();

        // Two scale-down recommendations inside the window: the higher wins.
        assert_eq!(stabilize(&mut histories, 8, 5, start, &request), 5);
        assert_eq!(
            stabilize(&mut histories, 8, 3, start + Duration::from_secs(30), &request),
            5
        );
        // Outside the window the old recommendation expires.
        assert_eq!(
            stabilize(&mut histories, 8, 3, start + Duration::from_secs(400), &request),
            3
        );
    }

    #[test]
    fn test_stable_desired_clears_histories() {
        let request = base_request();
        let mut histories = ScaleHistories::default();
        let now = Instant::now();
        stabilize(&mut histories, 4, 6, now, &request);
        assert!(!histories.up.is_empty());
        stabilize(&mut histories, 4, 4, now, &request);
        assert!(histories.up.is_empty() && histories.down.is_empty());
    }

    #[test]
    fn test_zero_window_passes_desired_through() {
        let mut request = base_request();
        request.scale_up = Some(ScalePolicy::default());
        let mut histories = ScaleHistories::default();
        let now = Instant::now();
        histories.up.push_back((9, now - Duration::from_secs(1)));
        assert_eq!(stabilize(&mut histories, 2, 6, now, &request), 6);
    }

    #[tokio::test]
    async fn test_validation() {
        let cluster = Arc::new(SimulatedCluster::new(1));
        let controller = AutoscalingController::new(cluster);

        let mut request = base_request();
        request.min_replicas = 0;
        assert!(controller.create_autoscaler(request).await.is_err());

        let mut request = base_request();
        request.max_replicas = 0;
        assert!(controller.create_autoscaler(request).await.is_err());

        let mut request = base_request();
        request.target_cpu_percent = None;
        assert!(controller.create_autoscaler(request).await.is_err());

        let mut request = base_request();
        request.workload_kind = "DaemonSet".to_string();
        assert!(controller.create_autoscaler(request).await.is_err());
    }

    #[tokio::test]
    async fn test_tick_scales_up_with_step_limit() {
        let cluster = Arc::new(ScriptedWorkload::new(2, 350.0));
        let controller = AutoscalingController::new(cluster.clone());

        let mut request = base_request();
        request.scale_up = Some(ScalePolicy { stabilization_window_seconds: 0, max_scale_change: 3 });
        // Registered without the background loop so the tick below is the
        // only reconcile that runs.
        let id = controller.register(request).await.unwrap();

        // 2 * 350 / 70 = 10, clamped to 10, capped to 2 + 3 = 5.
        controller.tick(&id).await.unwrap();
        assert_eq!(*cluster.scale_calls.lock().unwrap(), vec![5]);

        let job = controller.get(&id).await.unwrap();
        assert_eq!(job.details.desired_replicas, 5);
        assert_eq!(job.details.scale_up_count, 1);
        assert!(job.details.last_scale_time.is_some());
    }

    #[tokio::test]
    async fn test_tick_holds_within_target() {
        let cluster = Arc::new(ScriptedWorkload::new(2, 90.0));
        let controller = AutoscalingController::new(cluster.clone());
        let id = controller.register(base_request()).await.unwrap();

        // 2 * 90 / 70 truncates to 2: within target, no scale call.
        controller.tick(&id).await.unwrap();
        assert!(cluster.scale_calls.lock().unwrap().is_empty());
        let job = controller.get(&id).await.unwrap();
        assert_eq!(job.details.current_replicas, 2);
        assert_eq!(job.details.desired_replicas, 2);
    }

    #[tokio::test]
    async fn test_tick_scale_down_damped_by_window() {
        let cluster = Arc::new(ScriptedWorkload::new(6, 70.0));
        let controller = AutoscalingController::new(cluster.clone());
        let id = controller.register(base_request()).await.unwrap();

        // First tick leaves 6 alone (6 * 70/70 = 6) and clears histories.
        controller.tick(&id).await.unwrap();
        assert!(cluster.scale_calls.lock().unwrap().is_empty());

        // Load drops hard; two recommendations land in the 300 s scale-down
        // window and the higher one wins.
        cluster.metrics.lock().unwrap().cpu_percent = 35.0; // 6 * 35/70 = 3
        controller.tick(&id).await.unwrap();
        assert_eq!(*cluster.scale_calls.lock().unwrap(), vec![3]);

        cluster.metrics.lock().unwrap().cpu_percent = 10.0; // 3 * 10/70 = 0 -> clamp 1
        controller.tick(&id).await.unwrap();
        // The earlier in-window recommendation of 3 still dominates.
        assert_eq!(*cluster.scale_calls.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_create_get_delete_roundtrip() {
        let cluster = Arc::new(SimulatedCluster::new(1));
        let controller = AutoscalingController::new(cluster);

        let id = controller.create_autoscaler(base_request()).await.unwrap();
        assert!(id.starts_with("autoscaler-"));
        let job = controller.get(&id).await.unwrap();
        assert_eq!(job.status, AutoscalerStatus::Active);
        assert_eq!(controller.list().await.len(), 1);

        controller.delete(&id).await.unwrap();
        assert!(matches!(
            controller.get(&id).await.unwrap_err(),
            OrchestratorError::NotFound { .. }
        ));
        assert!(matches!(
            controller.delete(&id).await.unwrap_err(),
            OrchestratorError::NotFound { .. }
        ));
    }
}
