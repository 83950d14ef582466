//! # Greenroom Core
//!
//! AI-assisted talent-discovery engine for a casting marketplace. Four
//! tightly coupled subsystems behind one crate:
//!
//! - **Semantic retrieval**: embedding generation (local model or
//!   deterministic fallback), HNSW/flat vector index with metadata
//!   filters, and a six-stage fail-soft hybrid search with personalised
//!   reranking
//! - **Tiered memory**: bounded per-session short-term memory, durable
//!   episodic records under an Ebbinghaus-style retention curve, a
//!   semantic relationship graph, and mined procedural patterns, with a
//!   background consolidation engine moving material between tiers
//! - **Conversation routing**: intent + entity extraction over a closed
//!   casting intent set, and a per-request orchestrator that fans out for
//!   context and routes to search, script analysis, or a pluggable
//!   completion provider
//! - **Experimentation**: deterministic user-to-variant assignment,
//!   durable outcome logging, and rollout gating
//!
//! The HTTP/WebSocket surface lives in the `greenroom-server` crate; this
//! crate is deliberately transport-free.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use greenroom_core::prelude::*;
//!
//! let store = Arc::new(Store::open(None)?);
//! let cache = Arc::new(TieredCache::new(CacheConfig::default()));
//! let embeddings = Arc::new(EmbeddingPipeline::new(
//!     Arc::new(HashProjectionModel::default()),
//!     cache.clone(),
//! ));
//! let index: SharedIndex = Arc::new(RwLock::new(Box::new(FlatIndex::new(embeddings.dim()))));
//! let search = HybridSearch::new(embeddings, index, store, cache);
//! let outcome = search.search("dancer in Mumbai", &SearchCriteria::default(), 10).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `hnsw` (default): USearch-backed HNSW index backend
//! - `fastembed-model`: local ONNX embedding model via fastembed

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod cache;
pub mod config;
pub mod consolidation;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod experiment;
pub mod health;
pub mod index;
pub mod indexer;
pub mod memory;
pub mod nlp;
pub mod ranking;
pub mod search;
pub mod store;
pub mod talent;
pub mod telemetry;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use error::{CoreError, Result};

pub use config::EngineConfig;

pub use talent::{AvailabilityWindow, BudgetRange, Gender, TalentProfile, TalentStatus};

pub use embedding::{
    cosine_similarity, EmbeddingError, EmbeddingPipeline, EmbeddingProvider,
    HashProjectionModel, EMBEDDING_DIMENSIONS,
};

pub use cache::{CacheConfig, CacheKind, CacheStats, InMemoryKv, RemoteKv, TieredCache};

pub use index::{
    Filter, IndexError, IndexStats, MetaValue, Metadata, Predicate, SharedIndex, VectorHit,
    VectorIndex,
};

#[cfg(feature = "hnsw")]
pub use index::HnswIndex;
pub use index::FlatIndex;

pub use search::{
    AvailabilityProvider, AvailabilityReport, AvailabilityStatus, FusionWeights, HybridSearch,
    RankedResult, SearchCriteria, SearchOutcome, SignalScores,
};

pub use ranking::{ChemistryPredictor, FactorVector, RankingEngine, RankingWeights, UserContext};

pub use indexer::{
    maintenance::Maintenance, DeadLetter, DrainReport, IndexManager, IndexManagerStats, IndexOp,
    Priority, UpdateRequest,
};

pub use nlp::{
    Analysis, CastingRequirement, CharacterProfile, Entity, EntityKind, EntityValue, Intent,
    IntentClassifier, ScriptAnalysis, ScriptAnalyzer, Urgency,
};

pub use memory::{
    episodic::{retention, retention_at, EpisodicRecord, EpisodicStore},
    graph::{EdgeKind, EdgePattern, GraphEdge, GraphNode, NodeKind, SemanticGraph},
    procedural::{ActionStep, ProceduralPattern, ProceduralStore, RecordedSequence},
    session::{Role, SessionStore, Turn},
};

pub use consolidation::{ConsolidationEngine, TickReport};

pub use conversation::{
    CancelFlag, ChatEvent, ChatMetadata, ChatRequest, ChatResponse, Completion,
    CompletionProvider, CompletionRequest, Orchestrator, OrchestratorDeps, ScriptedCompletion,
    UsageLedger, UsageReport, ROUTING_EXPERIMENT,
};

pub use experiment::{
    assign_variant, ExperimentConfig, ExperimentHarness, ExperimentResult, ExperimentStats,
    PracticalThreshold, RolloutReadiness, SignificanceEstimator, Variant, VariantStats,
};

pub use health::{CheckResult, HealthMonitor, HealthReport, HealthStatus};

pub use store::Store;

pub use telemetry::{Counter, Gauge, Histogram, Telemetry};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        CacheConfig, CancelFlag, ChatRequest, ChatResponse, CoreError, EmbeddingPipeline,
        EngineConfig, FlatIndex, HashProjectionModel, HybridSearch, Orchestrator,
        OrchestratorDeps, RankedResult, Result, SearchCriteria, SessionStore, SharedIndex, Store,
        TalentProfile, TieredCache,
    };

    #[cfg(feature = "hnsw")]
    pub use crate::HnswIndex;
}
