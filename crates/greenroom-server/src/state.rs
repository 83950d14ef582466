//! Shared application state
//!
//! Every engine resource is built once at startup and injected; the
//! router clones the `Arc`s. Background loops receive a shutdown signal
//! through the watch channel so teardown is deterministic.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use greenroom_core::{
    CacheConfig, ConsolidationEngine, EmbeddingPipeline, EngineConfig, ExperimentConfig,
    ExperimentHarness, HashProjectionModel, HealthMonitor, HybridSearch, IndexManager,
    IntentClassifier, Maintenance, Orchestrator, OrchestratorDeps, RankingEngine,
    ScriptedCompletion, SemanticGraph, SessionStore, SharedIndex, Store, Telemetry, TieredCache,
    UsageLedger, ROUTING_EXPERIMENT,
};

use greenroom_core::memory::episodic::EpisodicStore;
use greenroom_core::memory::procedural::ProceduralStore;
use greenroom_core::nlp::ScriptAnalyzer;

/// Shared state handed to every route handler
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub search: Arc<HybridSearch>,
    pub sessions: Arc<SessionStore>,
    pub store: Arc<Store>,
    pub index: SharedIndex,
    pub indexer: Arc<IndexManager>,
    pub maintenance: Arc<Maintenance>,
    pub consolidation: Arc<ConsolidationEngine>,
    pub experiments: Arc<ExperimentHarness>,
    pub health: Arc<HealthMonitor>,
    pub telemetry: Arc<Telemetry>,
    pub script_analyzer: Arc<ScriptAnalyzer>,
    pub config: EngineConfig,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the full engine from configuration. `data_dir` of `None`
    /// uses the platform data directory.
    pub fn build(data_dir: Option<PathBuf>, config: EngineConfig) -> anyhow::Result<Self> {
        let store = Arc::new(Store::open(data_dir.clone().map(|d| d.join("greenroom.db")))?);
        let cache = Arc::new(TieredCache::new(CacheConfig::default()));
        let telemetry = Arc::new(Telemetry::new());

        let embeddings = Arc::new(
            EmbeddingPipeline::new(Arc::new(HashProjectionModel::default()), cache.clone())
                .with_batch_size(config.embed_batch_size),
        );

        let index: SharedIndex = Self::open_index(&data_dir, &embeddings, &config)?;

        let sessions = Arc::new(SessionStore::new(config.stm_capacity, config.stm_ttl));
        let episodic = Arc::new(EpisodicStore::new(store.clone()));
        let procedural = Arc::new(ProceduralStore::new(store.clone()));
        let graph = Arc::new(RwLock::new(
            SemanticGraph::load(&store).unwrap_or_else(|e| {
                tracing::warn!("could not load semantic graph, starting empty: {}", e);
                SemanticGraph::new()
            }),
        ));

        let search = Arc::new(
            HybridSearch::new(embeddings.clone(), index.clone(), store.clone(), cache.clone())
                .with_timeouts(config.embed_timeout, config.vector_timeout),
        );
        let indexer = Arc::new(IndexManager::new(
            embeddings.clone(),
            index.clone(),
            store.clone(),
            telemetry.clone(),
            config.index_queue_capacity,
            config.index_batch_size,
        ));
        let maintenance = Arc::new(Maintenance::new(
            store.clone(),
            index.clone(),
            embeddings.clone(),
            config.reindex_batch_size,
        ));
        let consolidation = Arc::new(ConsolidationEngine::new(
            sessions.clone(),
            episodic.clone(),
            graph.clone(),
            procedural,
            embeddings.clone(),
            store.clone(),
            telemetry.clone(),
            config.consolidation_threshold,
            config.prune_importance_floor,
        ));

        let experiments = Arc::new(ExperimentHarness::new().with_store(store.clone()));
        // The routing experiment always exists; a single control variant
        // until an operator configures challengers.
        experiments.register(ExperimentConfig::new(ROUTING_EXPERIMENT, vec![("control", 1.0)]))?;

        let health = Arc::new(HealthMonitor::new(
            embeddings.clone(),
            index.clone(),
            store.clone(),
            Some(indexer.clone()),
            config.index_queue_capacity,
        ));

        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            classifier: IntentClassifier::new().with_encoder(embeddings.clone()),
            sessions: sessions.clone(),
            episodic,
            graph,
            search: search.clone(),
            ranking: Arc::new(RankingEngine::new()),
            experiments: experiments.clone(),
            completion: Arc::new(ScriptedCompletion::new()),
            consolidation: consolidation.clone(),
            store: store.clone(),
            telemetry: telemetry.clone(),
            usage: Arc::new(UsageLedger::new()),
            config: config.clone(),
        }));

        Ok(Self {
            orchestrator,
            search,
            sessions,
            store,
            index,
            indexer,
            maintenance,
            consolidation,
            experiments,
            health,
            telemetry,
            script_analyzer: Arc::new(ScriptAnalyzer::new()),
            config,
            started_at: Instant::now(),
        })
    }

    #[cfg(feature = "hnsw")]
    fn open_index(
        data_dir: &Option<PathBuf>,
        embeddings: &Arc<EmbeddingPipeline>,
        config: &EngineConfig,
    ) -> anyhow::Result<SharedIndex> {
        use greenroom_core::{HnswIndex, VectorIndex};
        let index: Box<dyn VectorIndex> = match data_dir {
            Some(dir) => Box::new(HnswIndex::open(
                &dir.join("talent.index"),
                embeddings.dim(),
                config.index_durability_interval,
            )?),
            None => Box::new(HnswIndex::new(embeddings.dim())?),
        };
        Ok(Arc::new(RwLock::new(index)))
    }

    #[cfg(not(feature = "hnsw"))]
    fn open_index(
        data_dir: &Option<PathBuf>,
        embeddings: &Arc<EmbeddingPipeline>,
        config: &EngineConfig,
    ) -> anyhow::Result<SharedIndex> {
        use greenroom_core::{FlatIndex, VectorIndex};
        let index: Box<dyn VectorIndex> = match data_dir {
            Some(dir) => Box::new(FlatIndex::open(
                &dir.join("talent.index"),
                embeddings.dim(),
                config.index_durability_interval,
            )?),
            None => Box::new(FlatIndex::new(embeddings.dim())),
        };
        Ok(Arc::new(RwLock::new(index)))
    }
}
