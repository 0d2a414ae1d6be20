//! Workload-signature ingestion
//!
//! External profilers report workload signatures keyed by namespace/name;
//! the ingestor keeps the latest signature per workload, counts what it has
//! seen per type and per namespace, and drops entries that have gone stale.

use crate::error::{OrchestratorError, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// One workload signature report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadReport {
    /// Workload namespace
    pub namespace: String,
    /// Workload name
    pub name: String,
    /// Reported workload type
    pub workload_type: String,
    /// Opaque signature payload
    #[serde(default)]
    pub signature: serde_json::Value,
}

/// Stored signature with its freshness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    /// The latest report
    pub report: WorkloadReport,
    /// When the latest report arrived
    pub last_updated: DateTime<Utc>,
}

/// Ingestor metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightMetrics {
    /// Workloads currently tracked
    pub tracked_workloads: usize,
    /// Reports received over the process lifetime
    pub reports_received: u64,
    /// Tracked workloads per reported type
    pub by_type: HashMap<String, usize>,
    /// Tracked workloads per namespace
    pub by_namespace: HashMap<String, usize>,
    /// Arrival time of the most recent report
    pub last_received: Option<DateTime<Utc>>,
}

/// Workload-signature ingestor
#[derive(Clone, Default)]
pub struct InsightIngestor {
    records: Arc<RwLock<HashMap<String, SignatureRecord>>>,
    reports_received: Arc<RwLock<u64>>,
    last_received: Arc<RwLock<Option<DateTime<Utc>>>>,
}

fn record_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

impl InsightIngestor {
    /// Create a new ingestor
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a report, replacing any earlier signature for the same workload
    pub async fn receive(&self, report: WorkloadReport) -> Result<()> {
        if report.namespace.is_empty() {
            return Err(OrchestratorError::validation("namespace", "must not be empty"));
        }
        if report.name.is_empty() {
            return Err(OrchestratorError::validation("name", "must not be empty"));
        }
        let key = record_key(&report.namespace, &report.name);
        let now = Utc::now();
        debug!(workload = %key, workload_type = %report.workload_type, "signature received");
        self.records.write().await.insert(key, SignatureRecord { report, last_updated: now });
        *self.reports_received.write().await += 1;
        *self.last_received.write().await = Some(now);
        Ok(())
    }

    /// Latest signature for one workload
    pub async fn get(&self, namespace: &str, name: &str) -> Result<SignatureRecord> {
        self.records
            .read()
            .await
            .get(&record_key(namespace, name))
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::not_found("workload signature", record_key(namespace, name))
            })
    }

    /// All tracked signatures
    pub async fn list(&self) -> Vec<SignatureRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Drop records older than `max_age`; returns how many were dropped
    pub async fn cleanup_stale(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::days(36_500));
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| record.last_updated >= cutoff);
        before - records.len()
    }

    /// Ingestor metrics, copied by value
    pub async fn metrics(&self) -> InsightMetrics {
        let records = self.records.read().await;
        let mut metrics = InsightMetrics {
            tracked_workloads: records.len(),
            reports_received: *self.reports_received.read().await,
            last_received: *self.last_received.read().await,
            ..Default::default()
        };
        for record in records.values() {
            *metrics.by_type.entry(record.report.workload_type.clone()).or_insert(0) += 1;
            *metrics.by_namespace.entry(record.report.namespace.clone()).or_insert(0) += 1;
        }
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(namespace: &str, name: &str, workload_type: &str) -> WorkloadReport {
        WorkloadReport {
            namespace: namespace.to_string(),
            name: name.to_string(),
            workload_type: workload_type.to_string(),
            signature: json!({"read_pattern": "sequential"}),
        }
    }

    #[tokio::test]
    async fn test_latest_signature_wins() {
        let ingestor = InsightIngestor::new();
        ingestor.receive(report("ml", "trainer", "training")).await.unwrap();
        ingestor.receive(report("ml", "trainer", "checkpoint")).await.unwrap();

        let record = ingestor.get("ml", "trainer").await.unwrap();
        assert_eq!(record.report.workload_type, "checkpoint");
        assert_eq!(ingestor.list().await.len(), 1);

        let metrics = ingestor.metrics().await;
        assert_eq!(metrics.reports_received, 2);
        assert_eq!(metrics.tracked_workloads, 1);
        assert_eq!(metrics.by_namespace.get("ml"), Some(&1));
    }

    #[tokio::test]
    async fn test_get_unknown_workload() {
        let ingestor = InsightIngestor::new();
        assert!(matches!(
            ingestor.get("ml", "ghost").await.unwrap_err(),
            OrchestratorError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_validation() {
        let ingestor = InsightIngestor::new();
        assert!(ingestor.receive(report("", "x", "training")).await.is_err());
        assert!(ingestor.receive(report("ml", "", "training")).await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_stale() {
        let ingestor = InsightIngestor::new();
        ingestor.receive(report("ml", "fresh", "training")).await.unwrap();
        ingestor.receive(report("ml", "old", "dataset")).await.unwrap();
        // Age one record artificially.
        {
            let mut records = ingestor.records.write().await;
            let record = records.get_mut("ml/old").unwrap();
            record.last_updated = Utc::now() - ChronoDuration::hours(2);
        }

        let dropped = ingestor.cleanup_stale(Duration::from_secs(3600)).await;
        assert_eq!(dropped, 1);
        assert!(ingestor.get("ml", "fresh").await.is_ok());
        assert!(ingestor.get("ml", "old").await.is_err());

        let metrics = ingestor.metrics().await;
        assert_eq!(metrics.tracked_workloads, 1);
        assert_eq!(metrics.by_type.get("training"), Some(&1));
        assert_eq!(metrics.by_type.get("dataset"), None);
    }
}
