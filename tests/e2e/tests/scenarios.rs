//! End-to-end engine scenarios
//!
//! The six acceptance journeys: cold search, chat with memory,
//! deterministic A/B assignment, consolidation promotion, retention
//! decay, and graceful degradation of the semantic stage.

use std::collections::HashMap;
use std::sync::Arc;

use greenroom_core::memory::session::{Role, Turn};
use greenroom_core::{
    assign_variant, retention_at, CancelFlag, ChatRequest, EmbeddingError, EmbeddingPipeline,
    EmbeddingProvider, ExperimentConfig, SearchCriteria,
};
use greenroom_e2e_tests::{dancer_profile, EngineFixture};

// ============================================================================
// SCENARIO 1: COLD SEARCH
// ============================================================================

#[tokio::test]
async fn cold_search_finds_freshly_indexed_profile() {
    let engine = EngineFixture::build();
    engine
        .index_profile(&dancer_profile("t1", "Asha Verma", 28))
        .await;

    let outcome = engine
        .search
        .search("dancer in Mumbai", &SearchCriteria::default(), 5)
        .await
        .expect("search");

    assert!(!outcome.results.is_empty());
    assert_eq!(outcome.results[0].talent_id, "t1");
    assert!(outcome.results[0].composite_score > 0.0);
    assert!(!outcome.results[0].explanation.is_empty());
    assert!(outcome.degraded.is_empty());
}

// ============================================================================
// SCENARIO 2: CHAT WITH MEMORY
// ============================================================================

#[tokio::test]
async fn chat_remembers_context_across_turns() {
    let engine = EngineFixture::build();
    engine
        .index_profile(&dancer_profile("lead-1", "Young Lead", 27))
        .await;
    engine
        .index_profile(&dancer_profile("lead-2", "Too Old For Role", 45))
        .await;

    let first = engine
        .orchestrator
        .chat(
            ChatRequest::message("I'm casting for a Hindi drama"),
            CancelFlag::new(),
        )
        .await
        .expect("first turn");

    let second = engine
        .orchestrator
        .chat(
            ChatRequest {
                conversation_id: Some(first.conversation_id.clone()),
                ..ChatRequest::message("Find leads aged 25-30")
            },
            CancelFlag::new(),
        )
        .await
        .expect("second turn");

    // Intent and domain derived from the established context
    assert_eq!(second.metadata.intent, "search_talent");
    assert_eq!(second.metadata.domain.as_deref(), Some("drama"));

    // Only candidates inside the requested age band come back
    let results = second.metadata.results.expect("search results");
    assert!(results.iter().any(|r| r.talent_id == "lead-1"));
    assert!(results.iter().all(|r| r.talent_id != "lead-2"));
}

// ============================================================================
// SCENARIO 3: DETERMINISTIC A/B
// ============================================================================

#[tokio::test]
async fn ab_assignment_is_stable_and_well_distributed() {
    let config = ExperimentConfig::new("E", vec![("v1", 0.70), ("v2", 0.20), ("v3", 0.10)]);
    config.validate().expect("weights sum to 1");

    // Stable for one user across calls
    let first = assign_variant(&config, "u42");
    for _ in 0..50 {
        assert_eq!(assign_variant(&config, "u42"), first);
    }

    // Stable across "restarts" (a fresh config instance)
    let rebuilt = ExperimentConfig::new("E", vec![("v1", 0.70), ("v2", 0.20), ("v3", 0.10)]);
    assert_eq!(assign_variant(&rebuilt, "u42"), first);

    // Observed proportions over 10k distinct users match within 1%
    let mut counts: HashMap<String, usize> = HashMap::new();
    for i in 0..10_000 {
        let variant = assign_variant(&config, &format!("user-{i}"));
        *counts.entry(variant.to_string()).or_default() += 1;
    }
    for (variant, expected) in [("v1", 0.70), ("v2", 0.20), ("v3", 0.10)] {
        let observed = counts[variant] as f64 / 10_000.0;
        assert!(
            (observed - expected).abs() <= 0.01,
            "{variant}: observed {observed}, expected {expected}"
        );
    }
}

// ============================================================================
// SCENARIO 4: CONSOLIDATION PROMOTION
// ============================================================================

#[tokio::test]
async fn consolidation_promotes_exactly_the_important_turns() {
    let engine = EngineFixture::build_with_capacity(9);
    let importances = [0.9, 0.2, 0.7, 0.1, 0.3, 0.85, 0.5, 0.4];
    for (i, importance) in importances.iter().enumerate() {
        engine
            .sessions
            .append("s1", Turn::new(Role::User, format!("turn {i}"), *importance));
    }

    let report = engine.consolidation.tick().await.expect("tick");
    assert!(!report.skipped);
    assert_eq!(report.promoted, 3);

    // STM keeps exactly the below-threshold turns
    let remaining = engine.sessions.get("s1", None);
    assert_eq!(remaining.len(), 5);
    assert!(remaining.iter().all(|t| t.importance < 0.6));

    // Each promoted turn became an episodic record
    let records = engine.episodic.all().expect("episodic");
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.importance >= 0.6));
}

// ============================================================================
// SCENARIO 5: RETENTION DECAY
// ============================================================================

#[test]
fn retention_decays_and_reinforcement_slows_it() {
    // importance 0.5, no reinforcement
    let at_1h = retention_at(1.0, 1.0, 0, 0.5, 0.5, 0.5);
    let at_7d = retention_at(168.0, 1.0, 0, 0.5, 0.5, 0.5);
    assert!(at_7d < at_1h, "retention must decay over a week");
    assert!((0.0..=1.0).contains(&at_7d));
    assert!((0.0..=1.0).contains(&at_1h));

    // Reinforcing at 24h resets the decay clock and raises stability:
    // evaluated at the same wall-clock 168h mark, retention is higher.
    let reinforced_at_7d = retention_at(144.0, 1.0, 1, 0.5, 0.5, 0.5);
    assert!(reinforced_at_7d > at_7d);
}

// ============================================================================
// SCENARIO 6: GRACEFUL DEGRADATION
// ============================================================================

/// Embedding provider that always errors
struct DownProvider;

impl EmbeddingProvider for DownProvider {
    fn name(&self) -> &str {
        "down"
    }
    fn dim(&self) -> usize {
        greenroom_core::EMBEDDING_DIMENSIONS
    }
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Failed("simulated outage".into()))
    }
}

#[tokio::test]
async fn search_degrades_to_keyword_overlay_when_embeddings_fail() {
    use std::sync::RwLock;

    use greenroom_core::{
        CacheConfig, FlatIndex, HybridSearch, SharedIndex, Store, TieredCache,
    };

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::open(Some(dir.path().join("e2e.db"))).unwrap());
    store
        .upsert_profile(&dancer_profile("t1", "Asha Verma", 28))
        .unwrap();

    let cache = Arc::new(TieredCache::new(CacheConfig::default()));
    let embeddings = Arc::new(EmbeddingPipeline::new(Arc::new(DownProvider), cache.clone()));
    let index: SharedIndex = Arc::new(RwLock::new(Box::new(FlatIndex::new(embeddings.dim()))));
    let search = HybridSearch::new(embeddings, index, store, cache);

    let outcome = search
        .search("mumbai dancer", &SearchCriteria::default(), 5)
        .await
        .expect("degraded search still succeeds");

    assert!(outcome.degraded.contains(&"semantic".to_string()));
    assert!(
        !outcome.results.is_empty(),
        "keyword overlay over the profile store must serve results"
    );
    assert_eq!(outcome.results[0].talent_id, "t1");
}
