//! Cache Layer
//!
//! Multi-tier cache behind typed views:
//!
//! - Tier 1 is process-local: an LRU for vector-search results, TTL maps
//!   for embeddings, model responses, and conversation context
//! - Tier 2 is a pluggable remote KV ([`RemoteKv`]); reads fall through
//!   Tier 1 -> Tier 2 and promote hits back into Tier 1
//!
//! Values above 1 KiB are lz4-compressed. Keys are a short type prefix
//! plus the SHA-256 of the normalised input, so arbitrarily large inputs
//! (full prompts, filter sets) produce fixed-size keys.

mod remote;
mod tiered;

pub use remote::{InMemoryKv, RemoteKv};
pub use tiered::TieredCache;

use std::time::Duration;

use sha2::{Digest, Sha256};

/// Compression threshold in bytes
pub const COMPRESS_THRESHOLD: usize = 1024;

// ============================================================================
// VIEWS
// ============================================================================

/// The typed cache views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// text -> embedding vector
    Embedding,
    /// (prompt, model config) -> completion text
    ModelResponse,
    /// session id -> conversation context
    Conversation,
    /// (query, filters) -> search results
    VectorSearch,
}

impl CacheKind {
    pub const ALL: [CacheKind; 4] = [
        CacheKind::Embedding,
        CacheKind::ModelResponse,
        CacheKind::Conversation,
        CacheKind::VectorSearch,
    ];

    /// Key prefix, also the per-view bucket name in stats
    pub fn prefix(&self) -> &'static str {
        match self {
            CacheKind::Embedding => "emb",
            CacheKind::ModelResponse => "mod",
            CacheKind::Conversation => "conv",
            CacheKind::VectorSearch => "vec",
        }
    }

    /// View-specific default TTL
    pub fn default_ttl(&self) -> Duration {
        match self {
            CacheKind::Embedding => Duration::from_secs(3600),
            CacheKind::ModelResponse => Duration::from_secs(1800),
            CacheKind::Conversation => Duration::from_secs(7200),
            CacheKind::VectorSearch => Duration::from_secs(600),
        }
    }
}

/// Derive the full cache key for an input: `{prefix}:{sha256-hex}`.
/// The input is whitespace-normalised first so formatting differences
/// don't fragment the cache.
pub fn cache_key(kind: CacheKind, input: &str) -> String {
    let normalised: String = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = Sha256::digest(normalised.to_lowercase().as_bytes());
    format!("{}:{:x}", kind.prefix(), digest)
}

// ============================================================================
// CONFIG & STATS
// ============================================================================

/// Cache layer configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Capacity of the Tier-1 LRU (vector-search view)
    pub lru_capacity: usize,
    /// Values above this many bytes are lz4-compressed
    pub compress_threshold: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            lru_capacity: 512,
            compress_threshold: COMPRESS_THRESHOLD,
        }
    }
}

/// Point-in-time statistics snapshot
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub tier1_hits: u64,
    pub tier2_hits: u64,
    pub misses: u64,
    pub sets: u64,
    /// Entries currently resident in Tier 1, per view prefix
    pub view_sizes: std::collections::BTreeMap<&'static str, usize>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.tier1_hits + self.tier2_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
