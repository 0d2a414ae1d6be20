//! State-preserving pod migration
//!
//! One migration job moves one pod: read the source pod and classify its
//! container states, create a checkpoint volume, spawn a filtered
//! replacement pod on the target node, wait for it to become Ready, then
//! delete the original. Failures leave the job Failed with the step's error;
//! nothing is rolled back, operators observe through the job details.

use crate::cluster::{ClusterProvider, ContainerStateInfo};
use crate::error::{OrchestratorError, Result};
use crate::mint_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default migration timeout when the request leaves it at 0
pub const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(600);

/// Grace period used when deleting the original pod
const ORIGINAL_POD_DELETE_GRACE_SECONDS: i64 = 30;

/// Default checkpoint volume size
const DEFAULT_CHECKPOINT_SIZE: &str = "10Gi";

/// Migration request, immutable after validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    /// Pod to migrate
    pub pod_name: String,
    /// Namespace of the pod
    pub namespace: String,
    /// Node the pod currently runs on
    pub source_node: String,
    /// Node to move the pod to
    pub target_node: String,
    /// Checkpoint volume size, Kubernetes quantity
    #[serde(default)]
    pub checkpoint_size: Option<String>,
    /// Keep persistent volumes attached to the replacement pod
    #[serde(default)]
    pub preserve_pv: bool,
    /// Per-job timeout in seconds; 0 selects the default of 600
    #[serde(default)]
    pub timeout_seconds: u64,
    /// Free-form reason recorded on the job
    #[serde(default)]
    pub reason: Option<String>,
}

impl MigrationRequest {
    /// Effective timeout for the workflow
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout_seconds == 0 {
            DEFAULT_MIGRATION_TIMEOUT
        } else {
            Duration::from_secs(self.timeout_seconds)
        }
    }
}

/// Migration job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    /// Accepted, workflow not started
    Pending,
    /// Workflow in progress
    Running,
    /// Pod moved and original deleted
    Completed,
    /// A step failed; see `error_message`
    Failed,
    /// Cancelled between steps
    Cancelled,
}

impl MigrationStatus {
    /// Whether the status is terminal; terminal jobs never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Accumulated observations and outcomes of one migration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationDetails {
    /// Classified container states of the source pod
    pub container_states: Vec<ContainerStateInfo>,
    /// Checkpoint PVC created for the move
    pub checkpoint_pvc: Option<String>,
    /// Name of the replacement pod on the target node
    pub replacement_pod: Option<String>,
    /// Workflow start time
    pub started_at: Option<DateTime<Utc>>,
    /// Workflow end time
    pub completed_at: Option<DateTime<Utc>>,
    /// Wall-clock duration in milliseconds
    pub duration_ms: Option<u64>,
    /// Last fatal error
    pub error_message: Option<String>,
}

/// One migration job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    /// Stable job identifier
    pub id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: MigrationStatus,
    /// The validated request
    pub request: MigrationRequest,
    /// Observations and outcomes
    pub details: MigrationDetails,
}

/// Controller-wide migration metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationMetrics {
    /// Migrations that reached a terminal status
    pub total_migrations: u64,
    /// Completed migrations
    pub successful_migrations: u64,
    /// Failed migrations
    pub failed_migrations: u64,
    /// Cancelled migrations
    pub cancelled_migrations: u64,
    /// Rolling average duration of terminal migrations in milliseconds
    pub average_duration_ms: f64,
}

/// Seam through which other controllers run migrations, so they can be
/// tested against a fake instead of the full workflow
#[async_trait]
pub trait MigrationDispatch: Send + Sync {
    /// Run a migration to completion (or timeout) and return the final job
    async fn dispatch(&self, request: MigrationRequest, timeout: Duration) -> Result<MigrationJob>;
}

/// Migration controller: registry of migration jobs plus the workflow driver
#[derive(Clone)]
pub struct MigrationController {
    cluster: Arc<dyn ClusterProvider>,
    jobs: Arc<RwLock<HashMap<String, MigrationJob>>>,
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    metrics: Arc<RwLock<MigrationMetrics>>,
}

impl MigrationController {
    /// Create a new migration controller
    pub fn new(cluster: Arc<dyn ClusterProvider>) -> Self {
        Self {
            cluster,
            jobs: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RwLock::new(MigrationMetrics::default())),
        }
    }

    /// Validate and register a migration, then drive it in the background.
    /// Returns the job id.
    pub async fn start_migration(&self, request: MigrationRequest) -> Result<String> {
        let (id, token) = self.register(request).await?;
        let controller = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            controller.execute(&job_id, token).await;
        });
        Ok(id)
    }

    /// Get a migration job by id
    pub async fn get(&self, id: &str) -> Result<MigrationJob> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found("migration", id))
    }

    /// List all migration jobs
    pub async fn list(&self) -> Vec<MigrationJob> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Cancel a running migration; the workflow stops at the next step
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(id).ok_or_else(|| OrchestratorError::not_found("migration", id))?;
        if job.status.is_terminal() {
            return Err(OrchestratorError::invalid_state(id, "migration already finished"));
        }
        drop(jobs);
        if let Some(token) = self.tokens.read().await.get(id) {
            token.cancel();
        }
        Ok(())
    }

    /// Remove a migration job from the registry
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get(id).ok_or_else(|| OrchestratorError::not_found("migration", id))?;
        if !job.status.is_terminal() {
            return Err(OrchestratorError::invalid_state(id, "migration still running"));
        }
        jobs.remove(id);
        Ok(())
    }

    /// Controller-wide metrics, copied by value
    pub async fn metrics(&self) -> MigrationMetrics {
        self.metrics.read().await.clone()
    }

    fn validate(request: &MigrationRequest) -> Result<()> {
        if request.pod_name.is_empty() {
            return Err(OrchestratorError::validation("pod_name", "must not be empty"));
        }
        if request.namespace.is_empty() {
            return Err(OrchestratorError::validation("namespace", "must not be empty"));
        }
        if request.source_node.is_empty() {
            return Err(OrchestratorError::validation("source_node", "must not be empty"));
        }
        if request.target_node.is_empty() {
            return Err(OrchestratorError::validation("target_node", "must not be empty"));
        }
        if request.source_node == request.target_node {
            return Err(OrchestratorError::validation(
                "target_node",
                "source and target node must differ",
            ));
        }
        Ok(())
    }

    async fn register(&self, request: MigrationRequest) -> Result<(String, CancellationToken)> {
        Self::validate(&request)?;
        let id = mint_id("migration");
        let token = CancellationToken::new();
        let job = MigrationJob {
            id: id.clone(),
            created_at: Utc::now(),
            status: MigrationStatus::Pending,
            request,
            details: MigrationDetails::default(),
        };
        self.jobs.write().await.insert(id.clone(), job);
        self.tokens.write().await.insert(id.clone(), token.clone());
        Ok((id, token))
    }

    /// Drive one registered migration to a terminal status
    async fn execute(&self, id: &str, token: CancellationToken) {
        let started = Utc::now();
        self.update_job(id, |job| {
            job.status = MigrationStatus::Running;
            job.details.started_at = Some(started);
        })
        .await;

        let outcome = self.run_workflow(id, &token).await;

        let completed = Utc::now();
        let duration_ms = (completed - started).num_milliseconds().max(0) as u64;
        let final_status = match &outcome {
            Ok(()) => MigrationStatus::Completed,
            Err(_) if token.is_cancelled() => MigrationStatus::Cancelled,
            Err(_) => MigrationStatus::Failed,
        };

        self.update_job(id, |job| {
            if !job.status.is_terminal() {
                job.status = final_status;
            }
            job.details.completed_at = Some(completed);
            job.details.duration_ms = Some(duration_ms);
            if let Err(err) = &outcome {
                job.details.error_message = Some(err.to_string());
            }
        })
        .await;
        self.tokens.write().await.remove(id);

        let mut metrics = self.metrics.write().await;
        metrics.total_migrations += 1;
        match final_status {
            MigrationStatus::Completed => metrics.successful_migrations += 1,
            MigrationStatus::Cancelled => metrics.cancelled_migrations += 1,
            _ => metrics.failed_migrations += 1,
        }
        let n = metrics.total_migrations as f64;
        metrics.average_duration_ms =
            (metrics.average_duration_ms * (n - 1.0) + duration_ms as f64) / n;

        match final_status {
            MigrationStatus::Completed => info!(migration = id, duration_ms, "migration completed"),
            MigrationStatus::Cancelled => warn!(migration = id, "migration cancelled"),
            _ => warn!(
                migration = id,
                error = %outcome.err().map(|e| e.to_string()).unwrap_or_default(),
                "migration failed"
            ),
        }
    }

    async fn run_workflow(&self, id: &str, token: &CancellationToken) -> Result<()> {
        let request = self.get(id).await?.request;
        let namespace = request.namespace.clone();
        let pod = request.pod_name.clone();

        // Step 1: source pod and container state analysis.
        ensure_active(id, token)?;
        let manifest = self.cluster.get_pod(&namespace, &pod).await?;
        let states = self.cluster.pod_container_states(&namespace, &pod).await?;
        debug!(migration = id, containers = states.len(), "analyzed source pod");
        self.update_job(id, |job| job.details.container_states = states.clone()).await;

        // Step 2: checkpoint volume.
        ensure_active(id, token)?;
        let pvc = checkpoint_pvc_name(&pod);
        let size = request.checkpoint_size.as_deref().unwrap_or(DEFAULT_CHECKPOINT_SIZE);
        self.cluster.create_persistent_volume_claim(&namespace, &pvc, size).await?;
        self.update_job(id, |job| job.details.checkpoint_pvc = Some(pvc.clone())).await;

        // Step 3: filtered replacement pod on the target node.
        ensure_active(id, token)?;
        let replacement = self
            .cluster
            .create_optimized_pod(&manifest, &request.target_node, &states, Some(&pvc))
            .await?;
        info!(migration = id, pod = %replacement, node = %request.target_node, "replacement pod created");
        self.update_job(id, |job| job.details.replacement_pod = Some(replacement.clone())).await;

        // Step 4: wait for the replacement to become Ready.
        ensure_active(id, token)?;
        self.cluster
            .wait_for_pod_ready(&namespace, &replacement, request.effective_timeout())
            .await?;

        // Step 5: delete the original.
        ensure_active(id, token)?;
        self.cluster
            .delete_pod(&namespace, &pod, ORIGINAL_POD_DELETE_GRACE_SECONDS)
            .await?;

        Ok(())
    }

    async fn update_job<F: FnOnce(&mut MigrationJob)>(&self, id: &str, apply: F) {
        let mut jobs = self.jobs.write().await;
        if let Some(job) = jobs.get_mut(id) {
            apply(job);
        }
    }
}

fn ensure_active(id: &str, token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(OrchestratorError::invalid_state(id, "migration cancelled"));
    }
    Ok(())
}

fn checkpoint_pvc_name(pod: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{pod}-checkpoint-{}", &suffix[..8])
}

#[async_trait]
impl MigrationDispatch for MigrationController {
    async fn dispatch(&self, request: MigrationRequest, timeout: Duration) -> Result<MigrationJob> {
        let (id, token) = self.register(request).await?;
        if tokio::time::timeout(timeout, self.execute(&id, token.clone())).await.is_err() {
            token.cancel();
            self.update_job(&id, |job| {
                if !job.status.is_terminal() {
                    job.status = MigrationStatus::Failed;
                    job.details.error_message = Some(format!("migration timed out after {timeout:?}"));
                }
            })
            .await;
        }
        self.get(&id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::sim::{SimPod, SimulatedCluster};

    fn request(pod: &str, source: &str, target: &str) -> MigrationRequest {
        MigrationRequest {
            pod_name: pod.to_string(),
            namespace: "default".to_string(),
            source_node: source.to_string(),
            target_node: target.to_string(),
            checkpoint_size: None,
            preserve_pv: false,
            timeout_seconds: 0,
            reason: None,
        }
    }

    async fn wait_terminal(controller: &MigrationController, id: &str) -> MigrationJob {
        for _ in 0..200 {
            let job = controller.get(id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("migration {id} did not reach a terminal status");
    }

    #[tokio::test]
    async fn test_validation_rejects_same_node() {
        let cluster = Arc::new(SimulatedCluster::new(2));
        let controller = MigrationController::new(cluster);
        let err = controller.start_migration(request("p", "node-1", "node-1")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_validation_rejects_empty_pod() {
        let cluster = Arc::new(SimulatedCluster::new(2));
        let controller = MigrationController::new(cluster);
        let err = controller.start_migration(request("", "node-1", "node-2")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_migration_moves_pod_and_records_details() {
        let cluster = Arc::new(SimulatedCluster::new(2));
        cluster.insert_pod("node-1", SimPod::running("default", "trainer-0")).await;
        let controller = MigrationController::new(cluster.clone());

        let id = controller
            .start_migration(request("trainer-0", "node-1", "node-2"))
            .await
            .unwrap();
        let job = wait_terminal(&controller, &id).await;

        assert_eq!(job.status, MigrationStatus::Completed);
        assert!(job.details.checkpoint_pvc.is_some());
        let replacement = job.details.replacement_pod.expect("replacement pod recorded");

        // Original gone, replacement running on the target node.
        assert!(cluster.get_pod("default", "trainer-0").await.is_err());
        let manifest = cluster.get_pod("default", &replacement).await.unwrap();
        assert_eq!(manifest.node, "node-2");

        let pvcs = cluster.created_pvcs().await;
        assert_eq!(pvcs.len(), 1);
        assert_eq!(pvcs[0].0, "default");

        let metrics = controller.metrics().await;
        assert_eq!(metrics.total_migrations, 1);
        assert_eq!(metrics.successful_migrations, 1);
    }

    #[tokio::test]
    async fn test_migration_with_only_completed_containers_still_runs() {
        use crate::cluster::ContainerObservation;

        let cluster = Arc::new(SimulatedCluster::new(2));
        let mut pod = SimPod::running("default", "batch-done");
        pod.containers =
            vec![("main".to_string(), ContainerObservation::Terminated { exit_code: 0 })];
        cluster.insert_pod("node-1", pod).await;
        let controller = MigrationController::new(cluster.clone());

        let id = controller
            .start_migration(request("batch-done", "node-1", "node-2"))
            .await
            .unwrap();
        let job = wait_terminal(&controller, &id).await;

        // The workflow runs all steps regardless: the filtered replacement
        // carries no containers, the original is still deleted.
        assert_eq!(job.status, MigrationStatus::Completed);
        assert_eq!(job.details.container_states.len(), 1);
        assert!(!job.details.container_states[0].should_migrate);
        assert!(cluster.get_pod("default", "batch-done").await.is_err());
        let replacement = job.details.replacement_pod.unwrap();
        let states = cluster.pod_container_states("default", &replacement).await.unwrap();
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn test_migration_of_missing_pod_fails() {
        let cluster = Arc::new(SimulatedCluster::new(2));
        let controller = MigrationController::new(cluster);
        let id = controller
            .start_migration(request("nope", "node-1", "node-2"))
            .await
            .unwrap();
        let job = wait_terminal(&controller, &id).await;
        assert_eq!(job.status, MigrationStatus::Failed);
        assert!(job.details.error_message.is_some());
    }

    #[tokio::test]
    async fn test_dispatch_returns_finished_job() {
        let cluster = Arc::new(SimulatedCluster::new(2));
        cluster.insert_pod("node-1", SimPod::running("default", "worker-3")).await;
        let controller = MigrationController::new(cluster);

        let job = controller
            .dispatch(request("worker-3", "node-1", "node-2"), Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(job.status, MigrationStatus::Completed);
    }

    #[tokio::test]
    async fn test_delete_requires_terminal_status() {
        let cluster = Arc::new(SimulatedCluster::new(2));
        cluster.insert_pod("node-1", SimPod::running("default", "w")).await;
        let controller = MigrationController::new(cluster);
        let id = controller.start_migration(request("w", "node-1", "node-2")).await.unwrap();
        let job = wait_terminal(&controller, &id).await;
        assert_eq!(job.status, MigrationStatus::Completed);
        controller.delete(&id).await.unwrap();
        assert!(matches!(
            controller.get(&id).await.unwrap_err(),
            OrchestratorError::NotFound { .. }
        ));
    }
}
