//! Workload-storage provisioning
//!
//! Matches a workload to a storage profile and provisions the backing
//! volume through the cluster adapter. The profile table keys off the
//! workload type; access-pattern hints can promote a workload onto a
//! faster tier than its type alone would get.

use crate::caching::CacheTier;
use crate::cluster::{quantity, ClusterProvider};
use crate::error::{OrchestratorError, Result};
use crate::mint_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Read-throughput hint above which any workload goes to nvme
const NVME_READ_HINT_MBPS: f64 = 1000.0;

/// IOPS hint above which any workload goes to nvme
const NVME_IOPS_HINT: f64 = 50_000.0;

/// Read-throughput hint at or below which a dataset counts as cold and is
/// parked on s3 instead of hdd
const S3_DATASET_READ_HINT_MBPS: f64 = 25.0;

/// Workload categories the profile table knows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadType {
    /// Model training: checkpoint-heavy sequential writes
    Training,
    /// Online inference: latency-sensitive reads
    Inference,
    /// Bulk dataset storage
    Dataset,
    /// Checkpoint archive
    Checkpoint,
    /// Anything else
    General,
}

impl WorkloadType {
    /// Parse a workload type name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "training" => Some(Self::Training),
            "inference" => Some(Self::Inference),
            "dataset" => Some(Self::Dataset),
            "checkpoint" => Some(Self::Checkpoint),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

/// Storage profile a workload is matched onto
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageProfile {
    /// Profile name
    pub name: String,
    /// Backing tier
    pub tier: CacheTier,
    /// Storage class the volume is provisioned from
    pub storage_class: String,
}

/// Access-pattern hints attached to a provisioning request
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AccessHints {
    /// Expected read throughput in MB/s
    #[serde(default)]
    pub read_mbps: Option<f64>,
    /// Expected write throughput in MB/s
    #[serde(default)]
    pub write_mbps: Option<f64>,
    /// Expected IOPS
    #[serde(default)]
    pub iops: Option<f64>,
}

/// Match a workload type and its hints to a storage profile. Hot hints
/// promote any workload onto nvme; a cold read hint parks a dataset on s3.
pub fn match_profile(workload_type: WorkloadType, hints: &AccessHints) -> StorageProfile {
    let hinted_hot = hints.read_mbps.is_some_and(|v| v > NVME_READ_HINT_MBPS)
        || hints.iops.is_some_and(|v| v > NVME_IOPS_HINT);
    let hinted_cold = hints.read_mbps.is_some_and(|v| v <= S3_DATASET_READ_HINT_MBPS);

    let tier = if hinted_hot {
        CacheTier::Nvme
    } else {
        match workload_type {
            WorkloadType::Training | WorkloadType::Checkpoint => CacheTier::Nvme,
            WorkloadType::Inference | WorkloadType::General => CacheTier::Ssd,
            WorkloadType::Dataset if hinted_cold => CacheTier::S3,
            WorkloadType::Dataset => CacheTier::Hdd,
        }
    };
    let (name, storage_class) = match tier {
        CacheTier::Nvme => ("nvme-performance", "stratus-nvme"),
        CacheTier::Ssd => ("ssd-balanced", "stratus-ssd"),
        CacheTier::S3 => ("s3-archive", "stratus-s3"),
        _ => ("hdd-capacity", "stratus-hdd"),
    };
    StorageProfile { name: name.to_string(), tier, storage_class: storage_class.to_string() }
}

/// Provisioning request, immutable after validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    /// Workload the volume is provisioned for
    pub workload_name: String,
    /// Workload namespace
    pub namespace: String,
    /// Workload type: training, inference, dataset, checkpoint or general
    pub workload_type: String,
    /// Requested capacity, Kubernetes quantity
    pub capacity: String,
    /// Access-pattern hints
    #[serde(default)]
    pub hints: AccessHints,
}

/// Provisioning job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStatus {
    /// Accepted, volume not created
    Pending,
    /// Volume being created
    Provisioning,
    /// Volume created
    Ready,
    /// Volume creation failed
    Failed,
}

impl ProvisioningStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

/// Accumulated observations of one provisioning job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningDetails {
    /// Matched storage profile
    pub profile: Option<StorageProfile>,
    /// Name of the created PVC
    pub pvc_name: Option<String>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Last fatal error
    pub error_message: Option<String>,
}

/// One provisioning job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningJob {
    /// Stable job identifier
    pub id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: ProvisioningStatus,
    /// The validated request
    pub request: ProvisioningRequest,
    /// Observations and outcomes
    pub details: ProvisioningDetails,
}

/// Controller-wide provisioning metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisioningMetrics {
    /// Registered jobs
    pub jobs: usize,
    /// Volumes provisioned
    pub total_provisioned: u64,
    /// Provisioning failures
    pub total_failed: u64,
    /// Provisioned volumes per tier
    pub per_tier: HashMap<String, u64>,
}

/// Provisioning controller: registry of one-shot provisioning jobs
#[derive(Clone)]
pub struct ProvisioningController {
    cluster: Arc<dyn ClusterProvider>,
    jobs: Arc<RwLock<HashMap<String, ProvisioningJob>>>,
    metrics: Arc<RwLock<ProvisioningMetrics>>,
}

impl ProvisioningController {
    /// Create a new provisioning controller
    pub fn new(cluster: Arc<dyn ClusterProvider>) -> Self {
        Self {
            cluster,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(ProvisioningMetrics::default())),
        }
    }

    /// Validate and register a provisioning job, then drive it in the
    /// background. Returns the job id.
    pub async fn create_provisioning(&self, request: ProvisioningRequest) -> Result<String> {
        Self::validate(&request)?;
        let id = mint_id("provisioning");
        let job = ProvisioningJob {
            id: id.clone(),
            created_at: Utc::now(),
            status: ProvisioningStatus::Pending,
            request,
            details: ProvisioningDetails::default(),
        };
        self.jobs.write().await.insert(id.clone(), job);

        let controller = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            controller.execute(&job_id).await;
        });
        Ok(id)
    }

    /// Get a provisioning job by id
    pub async fn get(&self, id: &str) -> Result<ProvisioningJob> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found("provisioning", id))
    }

    /// List all provisioning jobs
    pub async fn list(&self) -> Vec<ProvisioningJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Remove a finished provisioning job from the registry
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get(id).ok_or_else(|| OrchestratorError::not_found("provisioning", id))?;
        if !job.status.is_terminal() {
            return Err(OrchestratorError::invalid_state(id, "provisioning still running"));
        }
        jobs.remove(id);
        Ok(())
    }

    /// Controller-wide metrics, copied by value
    pub async fn metrics(&self) -> ProvisioningMetrics {
        let mut metrics = self.metrics.read().await.clone();
        metrics.jobs = self.jobs.read().await.len();
        metrics
    }

    fn validate(request: &ProvisioningRequest) -> Result<()> {
        if request.workload_name.is_empty() {
            return Err(OrchestratorError::validation("workload_name", "must not be empty"));
        }
        if request.namespace.is_empty() {
            return Err(OrchestratorError::validation("namespace", "must not be empty"));
        }
        if WorkloadType::parse(&request.workload_type).is_none() {
            return Err(OrchestratorError::validation(
                "workload_type",
                "must be training, inference, dataset, checkpoint or general",
            ));
        }
        if quantity::parse_memory_bytes(&request.capacity).is_none() {
            return Err(OrchestratorError::validation(
                "capacity",
                format!("'{}' is not a valid quantity", request.capacity),
            ));
        }
        Ok(())
    }

    async fn execute(&self, id: &str) {
        let request = match self.get(id).await {
            Ok(job) => job.request,
            Err(_) => return,
        };
        // Validated at submission.
        let workload_type =
            WorkloadType::parse(&request.workload_type).unwrap_or(WorkloadType::General);
        let profile = match_profile(workload_type, &request.hints);
        let pvc_name = format!("{}-data", request.workload_name);

        self.update_job(id, |job| {
            job.status = ProvisioningStatus::Provisioning;
            job.details.profile = Some(profile.clone());
            job.details.pvc_name = Some(pvc_name.clone());
        })
        .await;

        let outcome = self
            .cluster
            .create_persistent_volume_claim(&request.namespace, &pvc_name, &request.capacity)
            .await;

        match outcome {
            Ok(()) => {
                self.update_job(id, |job| {
                    job.status = ProvisioningStatus::Ready;
                    job.details.completed_at = Some(Utc::now());
                })
                .await;
                let mut metrics = self.metrics.write().await;
                metrics.total_provisioned += 1;
                *metrics.per_tier.entry(profile.tier.as_str().to_string()).or_insert(0) += 1;
                info!(provisioning = id, pvc = %pvc_name, profile = %profile.name, "volume provisioned");
            }
            Err(err) => {
                warn!(provisioning = id, error = %err, "provisioning failed");
                self.update_job(id, |job| {
                    job.status = ProvisioningStatus::Failed;
                    job.details.completed_at = Some(Utc::now());
                    job.details.error_message = Some(err.to_string());
                })
                .await;
                self.metrics.write().await.total_failed += 1;
            }
        }
    }

    async fn update_job<F: FnOnce(&mut ProvisioningJob)>(&self, id: &str, apply: F) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            apply(job);
        }
    }
}
