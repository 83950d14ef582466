//! Shared fixtures for the end-to-end scenario tests

use std::sync::{Arc, RwLock};
use std::time::Duration;

use greenroom_core::memory::episodic::EpisodicStore;
use greenroom_core::memory::procedural::ProceduralStore;
use greenroom_core::{
    CacheConfig, ConsolidationEngine, EmbeddingPipeline, EngineConfig, ExperimentConfig,
    ExperimentHarness, FlatIndex, HashProjectionModel, HybridSearch, IntentClassifier,
    Orchestrator, OrchestratorDeps, RankingEngine, ScriptedCompletion, SemanticGraph,
    SessionStore, SharedIndex, Store, TalentProfile, Telemetry, TieredCache, UsageLedger,
    ROUTING_EXPERIMENT,
};

/// A fully wired engine over temp storage with the deterministic
/// embedding model, exact flat index, and scripted completion provider.
pub struct EngineFixture {
    pub orchestrator: Arc<Orchestrator>,
    pub search: Arc<HybridSearch>,
    pub sessions: Arc<SessionStore>,
    pub episodic: Arc<EpisodicStore>,
    pub consolidation: Arc<ConsolidationEngine>,
    pub experiments: Arc<ExperimentHarness>,
    pub embeddings: Arc<EmbeddingPipeline>,
    pub index: SharedIndex,
    pub store: Arc<Store>,
    pub _dir: tempfile::TempDir,
}

impl EngineFixture {
    pub fn build() -> Self {
        Self::build_with_capacity(9)
    }

    pub fn build_with_capacity(stm_capacity: usize) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(Store::open(Some(dir.path().join("e2e.db"))).expect("store"));
        let cache = Arc::new(TieredCache::new(CacheConfig::default()));
        let embeddings = Arc::new(EmbeddingPipeline::new(
            Arc::new(HashProjectionModel::default()),
            cache.clone(),
        ));
        let index: SharedIndex = Arc::new(RwLock::new(Box::new(FlatIndex::new(embeddings.dim()))));
        let sessions = Arc::new(SessionStore::new(stm_capacity, Duration::from_secs(1800)));
        let episodic = Arc::new(EpisodicStore::new(store.clone()));
        let graph = Arc::new(RwLock::new(SemanticGraph::new()));
        let procedural = Arc::new(ProceduralStore::new(store.clone()));
        let telemetry = Arc::new(Telemetry::new());
        let search = Arc::new(HybridSearch::new(
            embeddings.clone(),
            index.clone(),
            store.clone(),
            cache.clone(),
        ));
        let consolidation = Arc::new(ConsolidationEngine::new(
            sessions.clone(),
            episodic.clone(),
            graph.clone(),
            procedural,
            embeddings.clone(),
            store.clone(),
            telemetry.clone(),
            0.6,
            0.3,
        ));
        let experiments = Arc::new(ExperimentHarness::new().with_store(store.clone()));
        experiments
            .register(ExperimentConfig::new(ROUTING_EXPERIMENT, vec![("control", 1.0)]))
            .expect("routing experiment");

        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            classifier: IntentClassifier::new(),
            sessions: sessions.clone(),
            episodic: episodic.clone(),
            graph,
            search: search.clone(),
            ranking: Arc::new(RankingEngine::new()),
            experiments: experiments.clone(),
            completion: Arc::new(ScriptedCompletion::new()),
            consolidation: consolidation.clone(),
            store: store.clone(),
            telemetry,
            usage: Arc::new(UsageLedger::new()),
            config: EngineConfig::default(),
        }));

        Self {
            orchestrator,
            search,
            sessions,
            episodic,
            consolidation,
            experiments,
            embeddings,
            index,
            store,
            _dir: dir,
        }
    }

    /// Index a profile into both the store and the vector index
    pub async fn index_profile(&self, profile: &TalentProfile) {
        self.store.upsert_profile(profile).expect("profile upsert");
        let vector = self
            .embeddings
            .embed(&profile.searchable_text())
            .await
            .expect("embed");
        self.index
            .write()
            .expect("index lock")
            .upsert(&profile.id, &vector, profile.to_metadata())
            .expect("index upsert");
    }
}

/// A basic dancer profile for the retrieval scenarios
pub fn dancer_profile(id: &str, name: &str, age: u32) -> TalentProfile {
    let mut profile = TalentProfile::new(id, name);
    profile.age = Some(age);
    profile.location = Some("Mumbai".into());
    profile.skills = vec!["dance".into()];
    profile.languages = vec!["hindi".into()];
    profile.bio = "classical dancer and stage performer".into();
    profile
}
