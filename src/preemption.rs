//! Resource-aware preemption
//!
//! A preemption job frees capacity on one node by evicting lower-priority
//! pods. Candidates are filtered (protected namespaces, priority floor),
//! scored by the requested strategy where a lower score means "preempt
//! first", then selected in score order until the resource target is met or
//! the pod budget is exhausted. Evictions go through the cluster adapter
//! with the configured grace period.

use crate::cluster::{
    gather_node_state, quantity, ClusterProvider, NodeState, PodRef, PodResourceInfo,
    LAYER_LABEL_KEY,
};
use crate::error::{OrchestratorError, Result};
use crate::mint_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Namespaces never considered for preemption unless overridden
pub const DEFAULT_PROTECTED_NAMESPACES: &[&str] =
    &["kube-system", "kube-public", "kube-node-lease"];

/// Resource dimension a preemption accumulates toward its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// CPU millicores
    Cpu,
    /// Memory bytes
    Memory,
    /// GPU count
    Gpu,
    /// Storage throughput, read plus write MB/s
    Storage,
    /// Storage IOPS
    StorageIops,
    /// Pod count
    All,
}

impl ResourceType {
    /// Parse a resource type name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cpu" => Some(Self::Cpu),
            "memory" => Some(Self::Memory),
            "gpu" => Some(Self::Gpu),
            "storage" => Some(Self::Storage),
            "storage_iops" => Some(Self::StorageIops),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Parse a target amount in this dimension's unit
    pub fn parse_target(&self, amount: &str) -> Option<f64> {
        match self {
            Self::Cpu => quantity::parse_cpu_millis(amount).map(|m| m as f64),
            Self::Memory => quantity::parse_memory_bytes(amount).map(|b| b as f64),
            Self::Gpu => quantity::parse_count(amount).map(|c| c as f64),
            Self::Storage => quantity::parse_storage_mbps(amount),
            Self::StorageIops => quantity::parse_iops(amount),
            Self::All => quantity::parse_count(amount).map(|c| c as f64),
        }
    }
}

/// Candidate ordering strategy; lower score preempts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreemptionStrategy {
    /// Ascending pod priority
    LowestPriority,
    /// Ascending age: younger pods go first, losing the least work
    Youngest,
    /// Largest CPU+memory consumers first
    LargestResource,
    /// Weighted blend of priority, age and compute footprint
    WeightedScore,
    /// Heaviest storage I/O consumers first
    StorageIoHeaviest,
    /// Weighted blend that also folds in normalized storage pressure
    StorageAwareWeighted,
}

impl PreemptionStrategy {
    /// Parse a strategy name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "lowest_priority" => Some(Self::LowestPriority),
            "youngest" => Some(Self::Youngest),
            "largest_resource" => Some(Self::LargestResource),
            "weighted_score" => Some(Self::WeightedScore),
            "storage_io_heaviest" => Some(Self::StorageIoHeaviest),
            "storage_aware_weighted" => Some(Self::StorageAwareWeighted),
            _ => None,
        }
    }

    /// Score one pod; candidates are evicted in ascending score order
    pub fn score(&self, pod: &PodResourceInfo, now: DateTime<Utc>) -> f64 {
        let age_seconds = (now - pod.created_at).num_seconds().max(0) as f64;
        let age_days = age_seconds / 86_400.0;
        let cpu_millis = pod.cpu_request_millis as f64;
        let memory_bytes = pod.memory_request_bytes as f64;
        let gpu = pod.gpu_request as f64;

        match self {
            Self::LowestPriority => pod.priority as f64,
            Self::Youngest => age_seconds,
            Self::LargestResource => -(cpu_millis + memory_bytes / 1e9),
            Self::WeightedScore => {
                let compute = (cpu_millis / 1000.0 + memory_bytes / 1e9) / 10.0;
                0.4 * (pod.priority as f64 / 1000.0) + 0.3 * (-age_days) + 0.3 * (-compute)
            }
            Self::StorageIoHeaviest => {
                -((pod.storage_read_mbps + pod.storage_write_mbps) + pod.storage_iops / 100.0)
            }
            Self::StorageAwareWeighted => {
                let compute_norm = cpu_millis / 4000.0 + memory_bytes / 8e9 + gpu;
                let storage_norm = pod.storage_read_mbps / 500.0
                    + pod.storage_write_mbps / 200.0
                    + pod.storage_iops / 5000.0;
                0.30 * (pod.priority as f64 / 1000.0)
                    + 0.20 * (-age_days)
                    + 0.25 * (-compute_norm)
                    + 0.25 * (-storage_norm)
            }
        }
    }

    /// Human explanation attached to each candidate
    pub fn reason(&self, pod: &PodResourceInfo, now: DateTime<Utc>) -> String {
        let age_seconds = (now - pod.created_at).num_seconds().max(0);
        match self {
            Self::LowestPriority => format!("priority {}", pod.priority),
            Self::Youngest => format!("{age_seconds}s old"),
            Self::LargestResource => format!(
                "requests {}m CPU and {} bytes memory",
                pod.cpu_request_millis, pod.memory_request_bytes
            ),
            Self::WeightedScore => {
                format!("priority {} at {age_seconds}s with blended compute weight", pod.priority)
            }
            Self::StorageIoHeaviest => format!(
                "{:.0} MB/s storage throughput, {:.0} IOPS",
                pod.storage_read_mbps + pod.storage_write_mbps,
                pod.storage_iops
            ),
            Self::StorageAwareWeighted => {
                format!("priority {} with blended compute and storage weight", pod.priority)
            }
        }
    }
}

/// Preemption request, immutable after validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreemptionRequest {
    /// Node to free capacity on
    pub node_name: String,
    /// Only consider pods from this namespace when set
    #[serde(default)]
    pub namespace: Option<String>,
    /// Resource dimension of the target amount
    pub resource_type: String,
    /// Target amount in the dimension's unit; 0 preempts up to the pod budget
    pub target_amount: String,
    /// Strategy name, defaults to `lowest_priority`
    #[serde(default)]
    pub strategy: Option<String>,
    /// Pods at or above this priority are never preempted
    #[serde(default)]
    pub min_priority: Option<i64>,
    /// Upper bound on evicted pods, defaults to 10
    #[serde(default)]
    pub max_pods_to_preempt: Option<usize>,
    /// Eviction grace period in seconds, defaults to 30
    #[serde(default)]
    pub grace_period_seconds: Option<i64>,
    /// Overrides the default protected namespaces when set
    #[serde(default)]
    pub protected_namespaces: Option<Vec<String>>,
}

impl PreemptionRequest {
    fn resource_type(&self) -> Result<ResourceType> {
        ResourceType::parse(&self.resource_type).ok_or_else(|| {
            OrchestratorError::validation(
                "resource_type",
                "must be cpu, memory, gpu, storage, storage_iops or all",
            )
        })
    }

    fn strategy(&self) -> Result<PreemptionStrategy> {
        match &self.strategy {
            None => Ok(PreemptionStrategy::LowestPriority),
            Some(name) => PreemptionStrategy::parse(name).ok_or_else(|| {
                OrchestratorError::validation("strategy", format!("unknown strategy '{name}'"))
            }),
        }
    }

    fn protected(&self) -> Vec<String> {
        self.protected_namespaces.clone().unwrap_or_else(|| {
            DEFAULT_PROTECTED_NAMESPACES.iter().map(|ns| ns.to_string()).collect()
        })
    }
}

/// Preemption job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreemptionStatus {
    /// Accepted, analysis not started
    Pending,
    /// Evictions in progress
    Running,
    /// All selected pods processed
    Completed,
    /// Analysis or every eviction failed
    Failed,
    /// Cancelled between evictions
    Cancelled,
}

impl PreemptionStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One scored preemption candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreemptionCandidate {
    /// The pod
    pub pod: PodRef,
    /// Pod priority
    pub priority: i64,
    /// CPU request in millicores
    pub cpu_request_millis: i64,
    /// Memory request in bytes
    pub memory_request_bytes: i64,
    /// GPU request
    pub gpu_request: i64,
    /// Pod age in seconds at scoring time
    pub age_seconds: i64,
    /// Storage read throughput in MB/s
    pub storage_read_mbps: f64,
    /// Storage write throughput in MB/s
    pub storage_write_mbps: f64,
    /// Storage IOPS
    pub storage_iops: f64,
    /// Strategy score; lower preempts first
    pub score: f64,
    /// Why the strategy ranked the pod where it did
    pub reason: String,
    /// Whether the pod was selected for eviction
    pub selected: bool,
}

impl PreemptionCandidate {
    /// Amount this candidate contributes toward the target dimension
    pub fn amount(&self, resource_type: ResourceType) -> f64 {
        match resource_type {
            ResourceType::Cpu => self.cpu_request_millis as f64,
            ResourceType::Memory => self.memory_request_bytes as f64,
            ResourceType::Gpu => self.gpu_request as f64,
            ResourceType::Storage => self.storage_read_mbps + self.storage_write_mbps,
            ResourceType::StorageIops => self.storage_iops,
            ResourceType::All => 1.0,
        }
    }
}

/// Per-pod eviction outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreemptedPod {
    /// The evicted pod
    pub pod: PodRef,
    /// Whether the eviction call succeeded
    pub succeeded: bool,
    /// Eviction error when it failed
    pub error: Option<String>,
}

/// Resources freed by completed evictions
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FreedResources {
    /// CPU millicores
    pub cpu_millis: i64,
    /// Memory bytes
    pub memory_bytes: i64,
    /// GPUs
    pub gpu: i64,
    /// Storage throughput in MB/s
    pub storage_mbps: f64,
    /// Storage IOPS
    pub storage_iops: f64,
    /// Evicted pods
    pub pods: u32,
}

/// Accumulated observations of one preemption job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreemptionDetails {
    /// Node state at analysis time
    pub node_state: Option<NodeState>,
    /// All scored candidates in selection order
    pub candidates: Vec<PreemptionCandidate>,
    /// Eviction outcomes for the selected pods
    pub preempted_pods: Vec<PreemptedPod>,
    /// Resources freed by successful evictions
    pub freed: FreedResources,
    /// Parsed target amount
    pub target_amount: f64,
    /// Whether the freed amount met the target
    pub target_achieved: bool,
    /// Analysis start time
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Last fatal error
    pub error_message: Option<String>,
}

/// One preemption job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreemptionJob {
    /// Stable job identifier
    pub id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: PreemptionStatus,
    /// The validated request
    pub request: PreemptionRequest,
    /// Observations and outcomes
    pub details: PreemptionDetails,
}

/// Controller-wide preemption metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreemptionMetrics {
    /// Registered jobs
    pub jobs: usize,
    /// Preemption jobs that reached a terminal status
    pub total_preemptions: u64,
    /// Pods evicted across all jobs
    pub total_pods_preempted: u64,
    /// Evictions that failed
    pub total_eviction_failures: u64,
    /// Freed resources across all jobs
    pub total_freed: FreedResources,
}

/// Mark candidates selected in score order until the target amount is
/// reached or `max_pods` are selected. A non-positive target leaves the
/// resource gate inert so selection runs to the pod budget. Returns the
/// accumulated amount.
pub fn select_candidates(
    candidates: &mut [PreemptionCandidate],
    resource_type: ResourceType,
    target: f64,
    max_pods: usize,
) -> f64 {
    let mut accumulated = 0.0;
    let mut selected = 0usize;
    for candidate in candidates.iter_mut() {
        if selected >= max_pods {
            break;
        }
        if target > 0.0 && accumulated >= target {
            break;
        }
        candidate.selected = true;
        accumulated += candidate.amount(resource_type);
        selected += 1;
    }
    accumulated
}

/// Preemption controller: registry of one-shot preemption jobs
#[derive(Clone)]
pub struct PreemptionController {
    cluster: Arc<dyn ClusterProvider>,
    jobs: Arc<RwLock<HashMap<String, PreemptionJob>>>,
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    metrics: Arc<RwLock<PreemptionMetrics>>,
}

impl PreemptionController {
    /// Create a new preemption controller
    pub fn new(cluster: Arc<dyn ClusterProvider>) -> Self {
        Self {
            cluster,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(PreemptionMetrics::default())),
        }
    }

    /// Validate and register a preemption, then drive it in the background.
    /// Returns the job id.
    pub async fn start_preemption(&self, request: PreemptionRequest) -> Result<String> {
        Self::validate(&request)?;
        let id = mint_id("preempt");
        let token = CancellationToken::new();
        let job = PreemptionJob {
            id: id.clone(),
            created_at: Utc::now(),
            status: PreemptionStatus::Pending,
            request,
            details: PreemptionDetails::default(),
        };
        self.jobs.write().await.insert(id.clone(), job);
        self.tokens.write().await.insert(id.clone(), token.clone());

        let controller = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            controller.execute(&job_id, token).await;
        });
        Ok(id)
    }

    /// Get a preemption job by id
    pub async fn get(&self, id: &str) -> Result<PreemptionJob> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found("preemption", id))
    }

    /// List all preemption jobs
    pub async fn list(&self) -> Vec<PreemptionJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Cancel a running preemption; evictions stop at the next pod
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(id).ok_or_else(|| OrchestratorError::not_found("preemption", id))?;
        if job.status.is_terminal() {
            return Err(OrchestratorError::invalid_state(id, "preemption already finished"));
        }
        drop(jobs);
        if let Some(token) = self.tokens.read().await.get(id) {
            token.cancel();
        }
        Ok(())
    }

    /// Controller-wide metrics, copied by value
    pub async fn metrics(&self) -> PreemptionMetrics {
        let mut metrics = self.metrics.read().await.clone();
        metrics.jobs = self.jobs.read().await.len();
        metrics
    }

    fn validate(request: &PreemptionRequest) -> Result<()> {
        if request.node_name.is_empty() {
            return Err(OrchestratorError::validation("node_name", "must not be empty"));
        }
        if request.target_amount.is_empty() {
            return Err(OrchestratorError::validation("target_amount", "must not be empty"));
        }
        let resource_type = request.resource_type()?;
        if resource_type.parse_target(&request.target_amount).is_none() {
            return Err(OrchestratorError::validation(
                "target_amount",
                format!("'{}' is not a valid quantity", request.target_amount),
            ));
        }
        request.strategy()?;
        if let Some(grace) = request.grace_period_seconds {
            if grace < 0 {
                return Err(OrchestratorError::validation(
                    "grace_period_seconds",
                    "must not be negative",
                ));
            }
        }
        Ok(())
    }

    async fn execute(&self, id: &str, token: CancellationToken) {
        self.update_job(id, |job| {
            job.status = PreemptionStatus::Running;
            job.details.started_at = Some(Utc::now());
        })
        .await;

        let outcome = self.run_workflow(id, &token).await;
        let final_status = match &outcome {
            Ok(()) => PreemptionStatus::Completed,
            Err(_) if token.is_cancelled() => PreemptionStatus::Cancelled,
            Err(_) => PreemptionStatus::Failed,
        };
        self.update_job(id, |job| {
            if !job.status.is_terminal() {
                job.status = final_status;
            }
            job.details.completed_at = Some(Utc::now());
            if let Err(err) = &outcome {
                job.details.error_message = Some(err.to_string());
            }
        })
        .await;
        self.tokens.write().await.remove(id);
        self.metrics.write().await.total_preemptions += 1;

        match final_status {
            PreemptionStatus::Completed => info!(preemption = id, "preemption completed"),
            _ => warn!(preemption = id, "preemption did not complete"),
        }
    }

    async fn run_workflow(&self, id: &str, token: &CancellationToken) -> Result<()> {
        let request = self.get(id).await?.request;
        let resource_type = request.resource_type()?;
        let strategy = request.strategy()?;
        let target = resource_type
            .parse_target(&request.target_amount)
            .ok_or_else(|| OrchestratorError::validation("target_amount", "invalid quantity"))?;
        let max_pods = request.max_pods_to_preempt.unwrap_or(10);
        let grace = request.grace_period_seconds.unwrap_or(30);
        let protected = request.protected();

        // Step 1: analyze the node.
        let node_state =
            gather_node_state(self.cluster.as_ref(), &request.node_name, LAYER_LABEL_KEY).await?;
        self.update_job(id, |job| {
            job.details.node_state = Some(node_state.clone());
            job.details.target_amount = target;
        })
        .await;

        // Step 2: gather and filter candidates.
        let pods = self.cluster.list_pods_on_node(&request.node_name).await?;
        let now = Utc::now();
        let mut candidates: Vec<PreemptionCandidate> = Vec::new();
        for pod in pods {
            if protected.iter().any(|ns| *ns == pod.namespace) {
                continue;
            }
            if let Some(namespace) = &request.namespace {
                if pod.namespace != *namespace {
                    continue;
                }
            }
            let info = self.cluster.pod_resource_info(&pod.namespace, &pod.name).await?;
            if let Some(min_priority) = request.min_priority {
                if info.priority >= min_priority {
                    continue;
                }
            }
            candidates.push(PreemptionCandidate {
                pod,
                priority: info.priority,
                cpu_request_millis: info.cpu_request_millis,
                memory_request_bytes: info.memory_request_bytes,
                gpu_request: info.gpu_request,
                age_seconds: (now - info.created_at).num_seconds().max(0),
                storage_read_mbps: info.storage_read_mbps,
                storage_write_mbps: info.storage_write_mbps,
                storage_iops: info.storage_iops,
                score: strategy.score(&info, now),
                reason: strategy.reason(&info, now),
                selected: false,
            });
        }

        // Steps 3-5: order by score and select until the target or the pod
        // budget is reached. The sort is stable, so equal scores keep their
        // insertion order.
        candidates.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        select_candidates(&mut candidates, resource_type, target, max_pods);
        debug!(
            preemption = id,
            candidates = candidates.len(),
            selected = candidates.iter().filter(|c| c.selected).count(),
            "candidates scored"
        );
        self.update_job(id, |job| job.details.candidates = candidates.clone()).await;

        // Step 6: evict.
        let mut freed = FreedResources::default();
        let mut failures = 0u64;
        for candidate in candidates.iter().filter(|c| c.selected) {
            if token.is_cancelled() {
                return Err(OrchestratorError::invalid_state(id, "preemption cancelled"));
            }
            let outcome = self
                .cluster
                .evict_pod(&candidate.pod.namespace, &candidate.pod.name, grace)
                .await;
            let (succeeded, error) = match outcome {
                Ok(()) => {
                    freed.cpu_millis += candidate.cpu_request_millis;
                    freed.memory_bytes += candidate.memory_request_bytes;
                    freed.gpu += candidate.gpu_request;
                    freed.storage_mbps += candidate.storage_read_mbps + candidate.storage_write_mbps;
                    freed.storage_iops += candidate.storage_iops;
                    freed.pods += 1;
                    (true, None)
                }
                Err(err) => {
                    warn!(preemption = id, pod = %candidate.pod, error = %err, "eviction failed");
                    failures += 1;
                    (false, Some(err.to_string()))
                }
            };
            self.update_job(id, |job| {
                job.details.preempted_pods.push(PreemptedPod {
                    pod: candidate.pod.clone(),
                    succeeded,
                    error: error.clone(),
                });
            })
            .await;
        }

        // Step 7: record the outcome against the target.
        let freed_in_dimension = match resource_type {
            ResourceType::Cpu => freed.cpu_millis as f64,
            ResourceType::Memory => freed.memory_bytes as f64,
            ResourceType::Gpu => freed.gpu as f64,
            ResourceType::Storage => freed.storage_mbps,
            ResourceType::StorageIops => freed.storage_iops,
            ResourceType::All => freed.pods as f64,
        };
        self.update_job(id, |job| {
            job.details.freed = freed;
            job.details.target_achieved = freed_in_dimension >= target;
        })
        .await;

        let mut metrics = self.metrics.write().await;
        metrics.total_pods_preempted += freed.pods as u64;
        metrics.total_eviction_failures += failures;
        metrics.total_freed.cpu_millis += freed.cpu_millis;
        metrics.total_freed.memory_bytes += freed.memory_bytes;
        metrics.total_freed.gpu += freed.gpu;
        metrics.total_freed.storage_mbps += freed.storage_mbps;
        metrics.total_freed.storage_iops += freed.storage_iops;
        metrics.total_freed.pods += freed.pods;
        Ok(())
    }

    async fn update_job<F: FnOnce(&mut PreemptionJob)>(&self, id: &str, apply: F) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            apply(job);
        }
    }
}
