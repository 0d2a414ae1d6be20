//! Tier-aware data caching
//!
//! Each cache entry tracks a dataset cached off a source PVC onto one of
//! the storage tiers. The controller owns the cache state machine
//! (Pending -> Loading -> Active <-> Evicting -> Inactive | Failed), a
//! background load task and a statistics loop that keeps the per-cache
//! figures moving within the bounds of its tier profile. Actual data
//! movement is the storage layer's problem; this controller only commands
//! it and accounts for it.

use crate::error::{OrchestratorError, Result};
use crate::mint_id;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Simulated load time before a cache turns Active
const LOADING_DURATION: Duration = Duration::from_millis(500);

/// Statistics refresh period for active caches
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Bytes a warmup pass pulls into the cache
const WARMUP_BYTES: u64 = 256 * 1024 * 1024;

/// IO saved per cache hit, for the savings estimate
const BYTES_SAVED_PER_HIT: u64 = 1024 * 1024;

/// Milliseconds saved per cache hit, for the savings estimate
const MILLIS_SAVED_PER_HIT: u64 = 10;

/// Storage tier a cache lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    Nvme,
    Ssd,
    Hdd,
    S3,
    /// Placed by the controller; resolves to ssd
    Auto,
}

impl CacheTier {
    /// Parse a tier name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "nvme" => Some(Self::Nvme),
            "ssd" => Some(Self::Ssd),
            "hdd" => Some(Self::Hdd),
            "s3" => Some(Self::S3),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    /// Concrete tier used for placement and statistics
    pub fn resolve(&self) -> CacheTier {
        match self {
            Self::Auto => Self::Ssd,
            other => *other,
        }
    }

    /// Tier name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nvme => "nvme",
            Self::Ssd => "ssd",
            Self::Hdd => "hdd",
            Self::S3 => "s3",
            Self::Auto => "auto",
        }
    }
}

/// Cache eviction policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    Lru,
    Lfu,
    Fifo,
    Ttl,
}

impl EvictionPolicy {
    /// Parse a policy name
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "lru" => Some(Self::Lru),
            "lfu" => Some(Self::Lfu),
            "fifo" => Some(Self::Fifo),
            "ttl" => Some(Self::Ttl),
            _ => None,
        }
    }
}

/// Performance envelope of one storage tier
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierProfile {
    /// Read throughput ceiling in MB/s
    pub read_mbps: f64,
    /// Write throughput ceiling in MB/s
    pub write_mbps: f64,
    /// Typical read latency in milliseconds
    pub read_latency_ms: f64,
    /// Typical write latency in milliseconds
    pub write_latency_ms: f64,
    /// IOPS ceiling
    pub iops: f64,
}

/// Profile table for the concrete tiers
pub fn tier_profile(tier: CacheTier) -> TierProfile {
    match tier.resolve() {
        CacheTier::Nvme => TierProfile {
            read_mbps: 3500.0,
            write_mbps: 3000.0,
            read_latency_ms: 0.08,
            write_latency_ms: 0.02,
            iops: 500_000.0,
        },
        CacheTier::Ssd => TierProfile {
            read_mbps: 550.0,
            write_mbps: 500.0,
            read_latency_ms: 0.5,
            write_latency_ms: 0.8,
            iops: 90_000.0,
        },
        CacheTier::Hdd => TierProfile {
            read_mbps: 180.0,
            write_mbps: 120.0,
            read_latency_ms: 8.0,
            write_latency_ms: 12.0,
            iops: 200.0,
        },
        CacheTier::S3 | CacheTier::Auto => TierProfile {
            read_mbps: 90.0,
            write_mbps: 60.0,
            read_latency_ms: 45.0,
            write_latency_ms: 80.0,
            iops: 100.0,
        },
    }
}

/// Cache creation request, immutable after validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRequest {
    /// PVC the cached data comes from
    pub source_pvc: String,
    /// Namespace of the source PVC
    pub source_namespace: String,
    /// Path within the source volume, defaults to "/"
    #[serde(default)]
    pub source_path: Option<String>,
    /// Tier to cache onto: nvme, ssd, hdd, s3 or auto
    pub target_tier: String,
    /// Eviction policy, defaults to lru
    #[serde(default)]
    pub cache_policy: Option<String>,
    /// Time-to-live in seconds, defaults to 3600
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    /// Relative priority among caches
    #[serde(default)]
    pub priority: Option<i32>,
}

/// Cache status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Accepted, load not started
    Pending,
    /// Data moving onto the tier
    Loading,
    /// Serving
    Active,
    /// Data being dropped from the tier
    Evicting,
    /// Evicted or stopped
    Inactive,
    /// Load failed
    Failed,
}

/// Live statistics of one cache
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStatistics {
    /// Cache hits
    pub hits: u64,
    /// Cache misses
    pub misses: u64,
    /// hits / (hits + misses), 0 with no traffic
    pub hit_ratio: f64,
    /// Observed read throughput in MB/s
    pub read_throughput_mbps: f64,
    /// Observed write throughput in MB/s
    pub write_throughput_mbps: f64,
    /// Observed read latency in milliseconds
    pub read_latency_ms: f64,
    /// Observed write latency in milliseconds
    pub write_latency_ms: f64,
    /// Observed IOPS
    pub iops: f64,
    /// Bytes loaded into the cache over its lifetime
    pub loaded_bytes: u64,
    /// Bytes evicted from the cache over its lifetime
    pub evicted_bytes: u64,
    /// Bytes currently cached
    pub cached_bytes: u64,
}

/// One cache registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheJob {
    /// Stable cache identifier
    pub id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Current status
    pub status: CacheStatus,
    /// The validated request
    pub request: CacheRequest,
    /// Tier the cache currently lives on
    pub tier: CacheTier,
    /// Eviction policy in force
    pub policy: EvictionPolicy,
    /// Time-to-live in seconds
    pub ttl_seconds: u64,
    /// Path within the source volume
    pub source_path: String,
    /// Live statistics
    pub statistics: CacheStatistics,
    /// Time of the last status change
    pub last_transition: DateTime<Utc>,
}

/// Externally supplied policy decision
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// One of create_cache, evict_cache, migrate_tier, warmup_cache, no_action
    pub action: String,
    /// Cache the action applies to
    #[serde(default)]
    pub target_id: Option<String>,
    /// Destination tier for migrate_tier
    #[serde(default)]
    pub target_tier: Option<String>,
    /// Why the decision was made
    #[serde(default)]
    pub reason: Option<String>,
}

/// Controller-wide caching metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachingMetrics {
    /// Registered caches
    pub caches: usize,
    /// Caches currently Active
    pub active_caches: usize,
    /// Hits across all caches
    pub total_hits: u64,
    /// Misses across all caches
    pub total_misses: u64,
    /// hits / requests across all caches, 0 with no traffic
    pub global_hit_ratio: f64,
    /// Bytes currently cached across all caches
    pub total_cached_bytes: u64,
    /// Sum of observed read throughput in MB/s
    pub total_read_throughput_mbps: f64,
    /// Sum of observed write throughput in MB/s
    pub total_write_throughput_mbps: f64,
    /// Sum of observed IOPS
    pub total_iops: f64,
    /// Cache count per concrete tier
    pub per_tier: HashMap<String, usize>,
    /// Estimated IO avoided: one MiB per hit
    pub estimated_io_saved_bytes: u64,
    /// Estimated time avoided: ten milliseconds per hit
    pub estimated_time_saved_ms: u64,
}

/// Caching controller: cache registry plus load and statistics loops
#[derive(Clone)]
pub struct CachingController {
    caches: Arc<RwLock<HashMap<String, CacheJob>>>,
    tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl CachingController {
    /// Create a new caching controller
    pub fn new() -> Self {
        Self {
            caches: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate and register a cache and start its load. Returns the cache id.
    pub async fn create_cache(&self, request: CacheRequest) -> Result<String> {
        let (tier, policy) = Self::validate(&request)?;
        let id = mint_id("cache");
        let cache = CacheJob {
            id: id.clone(),
            created_at: Utc::now(),
            status: CacheStatus::Pending,
            tier: tier.resolve(),
            policy,
            ttl_seconds: request.ttl_seconds.unwrap_or(3600),
            source_path: request.source_path.clone().unwrap_or_else(|| "/".to_string()),
            request,
            statistics: CacheStatistics::default(),
            last_transition: Utc::now(),
        };
        self.caches.write().await.insert(id.clone(), cache);

        let token = CancellationToken::new();
        self.tokens.write().await.insert(id.clone(), token.clone());
        let controller = self.clone();
        let cache_id = id.clone();
        tokio::spawn(async move {
            controller.run_lifecycle(cache_id, token).await;
        });
        Ok(id)
    }

    /// Get a cache by id
    pub async fn get(&self, id: &str) -> Result<CacheJob> {
        self.caches
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::not_found("cache", id))
    }

    /// List all caches
    pub async fn list(&self) -> Vec<CacheJob> {
        self.caches.read().await.values().cloned().collect()
    }

    /// Stop the cache's tasks and remove it from the registry
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut caches = self.caches.write().await;
        if caches.remove(id).is_none() {
            return Err(OrchestratorError::not_found("cache", id));
        }
        drop(caches);
        if let Some(token) = self.tokens.write().await.remove(id) {
            token.cancel();
        }
        info!(cache = id, "cache deleted");
        Ok(())
    }

    /// Drop the cached data: Active -> Evicting -> Inactive
    pub async fn evict_cache(&self, id: &str) -> Result<()> {
        {
            let mut caches = self.caches.write().await;
            let cache =
                caches.get_mut(id).ok_or_else(|| OrchestratorError::not_found("cache", id))?;
            if cache.status != CacheStatus::Active {
                return Err(OrchestratorError::invalid_state(
                    id,
                    format!("cannot evict a cache in status {:?}", cache.status),
                ));
            }
            transition(cache, CacheStatus::Evicting);
            cache.statistics.evicted_bytes += cache.statistics.cached_bytes;
            cache.statistics.cached_bytes = 0;
            transition(cache, CacheStatus::Inactive);
        }
        // The statistics loop has nothing to report for an inactive cache.
        if let Some(token) = self.tokens.write().await.remove(id) {
            token.cancel();
        }
        info!(cache = id, "cache evicted");
        Ok(())
    }

    /// Move an active cache to another tier
    pub async fn migrate_tier(&self, id: &str, target_tier: &str) -> Result<()> {
        let tier = CacheTier::parse(target_tier).ok_or_else(|| {
            OrchestratorError::validation("target_tier", format!("unknown tier '{target_tier}'"))
        })?;
        let mut caches = self.caches.write().await;
        let cache = caches.get_mut(id).ok_or_else(|| OrchestratorError::not_found("cache", id))?;
        if cache.status != CacheStatus::Active {
            return Err(OrchestratorError::invalid_state(
                id,
                format!("cannot migrate a cache in status {:?}", cache.status),
            ));
        }
        let from = cache.tier;
        transition(cache, CacheStatus::Loading);
        cache.tier = tier.resolve();
        transition(cache, CacheStatus::Active);
        info!(cache = id, from = from.as_str(), to = cache.tier.as_str(), "cache tier migrated");
        Ok(())
    }

    /// Pull data into the cache ahead of demand
    pub async fn warmup_cache(&self, id: &str) -> Result<()> {
        let mut caches = self.caches.write().await;
        let cache = caches.get_mut(id).ok_or_else(|| OrchestratorError::not_found("cache", id))?;
        if !matches!(cache.status, CacheStatus::Active | CacheStatus::Inactive) {
            return Err(OrchestratorError::invalid_state(
                id,
                format!("cannot warm up a cache in status {:?}", cache.status),
            ));
        }
        transition(cache, CacheStatus::Loading);
        cache.statistics.loaded_bytes += WARMUP_BYTES;
        cache.statistics.cached_bytes += WARMUP_BYTES;
        transition(cache, CacheStatus::Active);
        info!(cache = id, bytes = WARMUP_BYTES, "cache warmed up");
        Ok(())
    }

    /// Dispatch an externally supplied policy decision
    pub async fn apply_policy_decision(&self, decision: PolicyDecision) -> Result<()> {
        let target = || {
            decision
                .target_id
                .clone()
                .ok_or_else(|| OrchestratorError::validation("target_id", "must be set"))
        };
        match decision.action.as_str() {
            // Creation goes through create_cache; the decision is only
            // acknowledged here.
            "create_cache" => {
                info!(reason = decision.reason.as_deref().unwrap_or(""), "cache creation requested by policy");
                Ok(())
            }
            "evict_cache" => self.evict_cache(&target()?).await,
            "migrate_tier" => {
                let tier = decision
                    .target_tier
                    .clone()
                    .ok_or_else(|| OrchestratorError::validation("target_tier", "must be set"))?;
                self.migrate_tier(&target()?, &tier).await
            }
            "warmup_cache" => self.warmup_cache(&target()?).await,
            "no_action" => Ok(()),
            other => Err(OrchestratorError::validation(
                "action",
                format!("unknown policy action '{other}'"),
            )),
        }
    }

    /// Fold hit/miss deltas into a cache and refresh its throughput and
    /// latency figures from the tier profile. The statistics loop feeds this
    /// on its own; policy engines can feed it observed traffic directly.
    pub async fn apply_statistics(&self, id: &str, hits_delta: u64, misses_delta: u64) -> Result<()> {
        let mut caches = self.caches.write().await;
        let cache = caches.get_mut(id).ok_or_else(|| OrchestratorError::not_found("cache", id))?;
        let stats = &mut cache.statistics;
        stats.hits += hits_delta;
        stats.misses += misses_delta;
        let requests = stats.hits + stats.misses;
        stats.hit_ratio = if requests == 0 { 0.0 } else { stats.hits as f64 / requests as f64 };

        let profile = tier_profile(cache.tier);
        // Observed figures track the tier ceiling, scaled by how hot the
        // cache is.
        let heat = 0.35 + 0.65 * stats.hit_ratio;
        stats.read_throughput_mbps = profile.read_mbps * heat;
        stats.write_throughput_mbps = profile.write_mbps * heat;
        stats.read_latency_ms = profile.read_latency_ms;
        stats.write_latency_ms = profile.write_latency_ms;
        stats.iops = profile.iops * heat;
        Ok(())
    }

    /// Controller-wide metrics, computed over the registry
    pub async fn metrics(&self) -> CachingMetrics {
        let caches = self.caches.read().await;
        let mut metrics = CachingMetrics { caches: caches.len(), ..Default::default() };
        for cache in caches.values() {
            if cache.status == CacheStatus::Active {
                metrics.active_caches += 1;
            }
            metrics.total_hits += cache.statistics.hits;
            metrics.total_misses += cache.statistics.misses;
            metrics.total_cached_bytes += cache.statistics.cached_bytes;
            metrics.total_read_throughput_mbps += cache.statistics.read_throughput_mbps;
            metrics.total_write_throughput_mbps += cache.statistics.write_throughput_mbps;
            metrics.total_iops += cache.statistics.iops;
            *metrics.per_tier.entry(cache.tier.as_str().to_string()).or_insert(0) += 1;
        }
        let requests = metrics.total_hits + metrics.total_misses;
        metrics.global_hit_ratio =
            if requests == 0 { 0.0 } else { metrics.total_hits as f64 / requests as f64 };
        metrics.estimated_io_saved_bytes = metrics.total_hits * BYTES_SAVED_PER_HIT;
        metrics.estimated_time_saved_ms = metrics.total_hits * MILLIS_SAVED_PER_HIT;
        metrics
    }

    fn validate(request: &CacheRequest) -> Result<(CacheTier, EvictionPolicy)> {
        if request.source_pvc.is_empty() {
            return Err(OrchestratorError::validation("source_pvc", "must not be empty"));
        }
        if request.source_namespace.is_empty() {
            return Err(OrchestratorError::validation("source_namespace", "must not be empty"));
        }
        let tier = CacheTier::parse(&request.target_tier).ok_or_else(|| {
            OrchestratorError::validation(
                "target_tier",
                "must be nvme, ssd, hdd, s3 or auto",
            )
        })?;
        let policy = match &request.cache_policy {
            None => EvictionPolicy::Lru,
            Some(name) => EvictionPolicy::parse(name).ok_or_else(|| {
                OrchestratorError::validation("cache_policy", "must be lru, lfu, fifo or ttl")
            })?,
        };
        Ok((tier, policy))
    }

    async fn run_lifecycle(&self, id: String, token: CancellationToken) {
        // Load phase.
        self.update_cache(&id, |cache| transition(cache, CacheStatus::Loading)).await;
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(LOADING_DURATION) => {}
        }
        self.update_cache(&id, |cache| {
            let loaded = WARMUP_BYTES;
            cache.statistics.loaded_bytes += loaded;
            cache.statistics.cached_bytes += loaded;
            transition(cache, CacheStatus::Active);
        })
        .await;
        debug!(cache = %id, "cache active");

        // Statistics phase.
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(STATS_INTERVAL) => {}
            }
            let (hits, misses) = {
                let mut rng = rand::thread_rng();
                (rng.gen_range(50..500), rng.gen_range(0..100))
            };
            if self.apply_statistics(&id, hits, misses).await.is_err() {
                // Cache was deleted under the loop.
                return;
            }
        }
    }

    async fn update_cache<F: FnOnce(&mut CacheJob)>(&self, id: &str, apply: F) {
        let mut caches = self.caches.write().await;
        if let Some(cache) = caches.get_mut(id) {
            apply(cache);
        } else {
            warn!(cache = id, "update for unknown cache dropped");
        }
    }
}

impl Default for CachingController {
    fn default() -> Self {
        Self::new()
    }
}

fn transition(cache: &mut CacheJob, status: CacheStatus) {
    cache.status = status;
    cache.last_transition = Utc::now();
}
