//! Engine configuration.
//!
//! Every tunable has a production default and can be overridden through a
//! `GREENROOM_*` environment variable. Values outside their documented
//! bounds are clamped, not rejected.

use std::time::Duration;

/// Short-term memory capacity bounds (turns per session)
pub const STM_CAPACITY_MIN: usize = 5;
pub const STM_CAPACITY_MAX: usize = 9;

/// Engine-wide configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Turns retained per session (`M_STM`, clamped to 5..=9)
    pub stm_capacity: usize,
    /// Session idle TTL (`T_STM`), refreshed on every access
    pub stm_ttl: Duration,
    /// Consolidation tick period (`T_cons`)
    pub consolidation_interval: Duration,
    /// Index-manager drain period (`T_idx`)
    pub index_interval: Duration,
    /// Importance threshold for STM -> episodic promotion
    pub consolidation_threshold: f64,
    /// Importance floor below which low-retention memories are pruned
    pub prune_importance_floor: f64,
    /// Texts per embedding-provider call
    pub embed_batch_size: usize,
    /// Talent updates per index-manager drain
    pub index_batch_size: usize,
    /// Profiles per reindexing batch
    pub reindex_batch_size: usize,
    /// Inserts between atomic index snapshots
    pub index_durability_interval: usize,
    /// Bounded length of the index-manager update queue
    pub index_queue_capacity: usize,

    // Per-stage deadlines
    pub embed_timeout: Duration,
    pub vector_timeout: Duration,
    pub completion_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stm_capacity: 7,
            stm_ttl: Duration::from_secs(1800),
            consolidation_interval: Duration::from_secs(1800),
            index_interval: Duration::from_secs(60),
            consolidation_threshold: 0.6,
            prune_importance_floor: 0.3,
            embed_batch_size: 32,
            index_batch_size: 50,
            reindex_batch_size: 100,
            index_durability_interval: 100,
            index_queue_capacity: 10_000,
            embed_timeout: Duration::from_secs(2),
            vector_timeout: Duration::from_millis(500),
            completion_timeout: Duration::from_secs(20),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Build from environment, falling back to defaults for anything unset
    /// or unparseable.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            stm_capacity: env_usize("GREENROOM_STM_CAPACITY", d.stm_capacity)
                .clamp(STM_CAPACITY_MIN, STM_CAPACITY_MAX),
            stm_ttl: env_secs("GREENROOM_STM_TTL_SECS", d.stm_ttl),
            consolidation_interval: env_secs("GREENROOM_CONSOLIDATION_SECS", d.consolidation_interval),
            index_interval: env_secs("GREENROOM_INDEX_SECS", d.index_interval),
            consolidation_threshold: env_f64("GREENROOM_CONSOLIDATION_THRESHOLD", d.consolidation_threshold)
                .clamp(0.0, 1.0),
            prune_importance_floor: env_f64("GREENROOM_PRUNE_FLOOR", d.prune_importance_floor)
                .clamp(0.0, 1.0),
            embed_batch_size: env_usize("GREENROOM_EMBED_BATCH", d.embed_batch_size).max(1),
            index_batch_size: env_usize("GREENROOM_INDEX_BATCH", d.index_batch_size).max(1),
            reindex_batch_size: env_usize("GREENROOM_REINDEX_BATCH", d.reindex_batch_size).max(1),
            index_durability_interval: env_usize("GREENROOM_DURABILITY_INTERVAL", d.index_durability_interval)
                .max(1),
            index_queue_capacity: env_usize("GREENROOM_INDEX_QUEUE_CAP", d.index_queue_capacity).max(1),
            embed_timeout: env_secs("GREENROOM_EMBED_TIMEOUT_SECS", d.embed_timeout),
            vector_timeout: env_millis("GREENROOM_VECTOR_TIMEOUT_MS", d.vector_timeout),
            completion_timeout: env_secs("GREENROOM_COMPLETION_TIMEOUT_SECS", d.completion_timeout),
            request_timeout: env_secs("GREENROOM_REQUEST_TIMEOUT_SECS", d.request_timeout),
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
