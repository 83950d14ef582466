//! Consolidation Engine
//!
//! Periodic promotion of short-term memory into the long-term stores,
//! plus the housekeeping that keeps those stores healthy. Each tick runs
//! five tasks concurrently:
//!
//! 1. STM -> episodic promotion of important turns
//! 2. Semantic extraction from important episodic records into the graph
//! 3. Procedural pattern mining and automation suggestions
//! 4. Retention-based pruning
//! 5. Compression of near-duplicate episodic clusters
//!
//! Ticks never block request handling: if a tick is still running when
//! the next is due, the new one is skipped and counted.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::embedding::{cosine_similarity, EmbeddingPipeline};
use crate::error::Result;
use crate::memory::episodic::{EpisodicRecord, EpisodicStore, PRUNE_CUTOFF};
use crate::memory::graph::{EdgeKind, NodeKind, SemanticGraph};
use crate::memory::procedural::ProceduralStore;
use crate::memory::session::SessionStore;
use crate::nlp::{extract_entities, EntityKind, EntityValue};
use crate::store::Store;
use crate::telemetry::Telemetry;

/// Episodic importance above which semantic extraction runs
const EXTRACTION_IMPORTANCE: f64 = 0.7;

/// Cosine similarity at which episodic records cluster for compression
const COMPRESSION_COSINE: f32 = 0.85;

/// Clusters larger than this collapse to their best representative
const COMPRESSION_MIN_CLUSTER: usize = 3;

/// Pattern support needed before an automation suggestion fires
const SUGGESTION_MIN_FREQUENCY: u64 = 3;
const SUGGESTION_MIN_SUCCESS: f64 = 0.7;

const WATERMARK_KEY: &str = "semantic_extraction_watermark";

/// Outcome of one consolidation tick
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub skipped: bool,
    pub promoted: usize,
    pub relations_upserted: usize,
    pub patterns_mined: usize,
    pub suggestions: Vec<String>,
    pub pruned: usize,
    pub compressed: usize,
    pub duration_ms: u64,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Background consolidation engine
pub struct ConsolidationEngine {
    sessions: Arc<SessionStore>,
    episodic: Arc<EpisodicStore>,
    graph: Arc<RwLock<SemanticGraph>>,
    procedural: Arc<ProceduralStore>,
    embeddings: Arc<EmbeddingPipeline>,
    store: Arc<Store>,
    telemetry: Arc<Telemetry>,
    /// Importance threshold for STM promotion
    threshold: f64,
    /// Importance floor below which low-retention memories are pruned
    prune_floor: f64,
    running: tokio::sync::Mutex<()>,
}

impl ConsolidationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionStore>,
        episodic: Arc<EpisodicStore>,
        graph: Arc<RwLock<SemanticGraph>>,
        procedural: Arc<ProceduralStore>,
        embeddings: Arc<EmbeddingPipeline>,
        store: Arc<Store>,
        telemetry: Arc<Telemetry>,
        threshold: f64,
        prune_floor: f64,
    ) -> Self {
        Self {
            sessions,
            episodic,
            graph,
            procedural,
            embeddings,
            store,
            telemetry,
            threshold,
            prune_floor,
            running: tokio::sync::Mutex::new(()),
        }
    }

    /// Background loop on `interval`; exits when `shutdown` flips true
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        tracing::info!(interval_secs = interval.as_secs(), "consolidation engine started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("consolidation engine stopping");
                        return;
                    }
                }
            }
            match self.tick().await {
                Ok(report) if report.skipped => {}
                Ok(report) => {
                    tracing::info!(
                        promoted = report.promoted,
                        relations = report.relations_upserted,
                        patterns = report.patterns_mined,
                        pruned = report.pruned,
                        compressed = report.compressed,
                        duration_ms = report.duration_ms,
                        "consolidation tick complete"
                    );
                }
                Err(e) => tracing::warn!("consolidation tick failed: {}", e),
            }
        }
    }

    /// Run one tick. Returns a skipped report when a previous tick is
    /// still in flight.
    pub async fn tick(&self) -> Result<TickReport> {
        let Ok(_guard) = self.running.try_lock() else {
            self.telemetry.counter("consolidation_ticks_skipped_total").increment();
            return Ok(TickReport { skipped: true, ..Default::default() });
        };
        let start = Instant::now();

        let (promoted, extraction, mining, pruned, compressed) = tokio::join!(
            self.promote_sessions(),
            self.extract_semantics(),
            self.mine_procedural(),
            self.prune_episodic(),
            self.compress_episodic(),
        );

        let (patterns_mined, suggestions) = mining?;
        let report = TickReport {
            skipped: false,
            promoted: promoted?,
            relations_upserted: extraction?,
            patterns_mined,
            suggestions,
            pruned: pruned?,
            compressed: compressed?,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        self.telemetry.counter("consolidation_ticks_total").increment();
        self.telemetry
            .counter("consolidation_promoted_total")
            .increment_by(report.promoted as u64);
        Ok(report)
    }

    // ========================================================================
    // TASK 1: STM -> EPISODIC
    // ========================================================================

    async fn promote_sessions(&self) -> Result<usize> {
        let mut promoted = 0;
        for session_id in self.sessions.active_sessions() {
            for turn in self.sessions.consolidate(&session_id, self.threshold) {
                let valence = turn
                    .metadata
                    .get("sentiment")
                    .and_then(|s| s.parse::<f64>().ok())
                    .map(|s| (0.5 + s / 2.0).clamp(0.0, 1.0))
                    .unwrap_or(0.5);
                let mut record = EpisodicRecord::new(
                    session_id.clone(),
                    "conversation_turn",
                    serde_json::json!({
                        "role": turn.role.as_str(),
                        "content": turn.content,
                    }),
                    turn.importance,
                    valence,
                );
                record.context_richness =
                    (0.3 + 0.1 * turn.metadata.len() as f64).clamp(0.0, 1.0);
                // Context embeddings are best-effort; promotion must not
                // depend on the embedding backend being up.
                if let Ok(vector) = self.embeddings.embed(&turn.content).await {
                    record.context_embedding = Some(vector);
                }
                self.episodic.store(&record)?;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    // ========================================================================
    // TASK 2: SEMANTIC EXTRACTION
    // ========================================================================

    async fn extract_semantics(&self) -> Result<usize> {
        let watermark = self
            .store
            .get_meta(WATERMARK_KEY)?
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&chrono::Utc));

        let fresh: Vec<EpisodicRecord> = self
            .episodic
            .all()?
            .into_iter()
            .filter(|r| r.importance > EXTRACTION_IMPORTANCE)
            .filter(|r| watermark.map(|w| r.created_at > w).unwrap_or(true))
            .collect();

        if fresh.is_empty() {
            return Ok(0);
        }

        let mut relations = 0;
        {
            let mut graph = self.graph.write().expect("graph lock");
            for record in &fresh {
                let content = record
                    .payload
                    .get("content")
                    .and_then(|c| c.as_str())
                    .unwrap_or_default();
                if content.is_empty() {
                    continue;
                }
                let owner = graph.upsert_node(NodeKind::User, &record.owner, Default::default());
                let entities = extract_entities(content);

                let mut names: Vec<usize> = Vec::new();
                let mut skills: Vec<usize> = Vec::new();
                for entity in &entities {
                    match (&entity.kind, &entity.value) {
                        (EntityKind::Skill, EntityValue::Text(t)) => {
                            let node = graph.upsert_node(NodeKind::Skill, t, Default::default());
                            graph.upsert_edge(owner, EdgeKind::Prefers, node, entity.confidence);
                            skills.push(node);
                            relations += 1;
                        }
                        (EntityKind::Location, EntityValue::Text(t)) => {
                            let node = graph.upsert_node(NodeKind::Location, t, Default::default());
                            graph.upsert_edge(owner, EdgeKind::Prefers, node, entity.confidence);
                            relations += 1;
                        }
                        (EntityKind::ProjectType, EntityValue::Text(t)) => {
                            let node = graph.upsert_node(NodeKind::Genre, t, Default::default());
                            graph.upsert_edge(owner, EdgeKind::Prefers, node, entity.confidence);
                            relations += 1;
                        }
                        (EntityKind::Name, EntityValue::Text(t)) => {
                            let node = graph.upsert_node(NodeKind::Actor, t, Default::default());
                            names.push(node);
                        }
                        _ => {}
                    }
                }
                // A named person mentioned alongside skills reads as a
                // specialisation signal.
                for actor in &names {
                    for skill in &skills {
                        graph.upsert_edge(*actor, EdgeKind::SpecializesIn, *skill, 0.5);
                        relations += 1;
                    }
                }
            }
            graph.save(&self.store)?;
        }

        self.store
            .set_meta(WATERMARK_KEY, &chrono::Utc::now().to_rfc3339())?;
        Ok(relations)
    }

    // ========================================================================
    // TASK 3: PROCEDURAL MINING
    // ========================================================================

    async fn mine_procedural(&self) -> Result<(usize, Vec<String>)> {
        let patterns = self
            .procedural
            .mine_patterns(SUGGESTION_MIN_FREQUENCY as usize)?;
        let suggestions: Vec<String> = patterns
            .iter()
            .filter(|p| {
                p.execution_count >= SUGGESTION_MIN_FREQUENCY
                    && p.success_rate >= SUGGESTION_MIN_SUCCESS
            })
            .map(|p| format!("Consider automating the '{}' workflow", p.workflow_name))
            .collect();
        Ok((patterns.len(), suggestions))
    }

    // ========================================================================
    // TASK 4: PRUNING
    // ========================================================================

    async fn prune_episodic(&self) -> Result<usize> {
        Ok(self.episodic.prune(PRUNE_CUTOFF, self.prune_floor)?.len())
    }

    // ========================================================================
    // TASK 5: COMPRESSION
    // ========================================================================

    /// Greedy clustering by context-embedding cosine; clusters larger
    /// than [`COMPRESSION_MIN_CLUSTER`] collapse into their
    /// highest-importance member, which inherits the merged ids.
    async fn compress_episodic(&self) -> Result<usize> {
        let records: Vec<EpisodicRecord> = self
            .episodic
            .all()?
            .into_iter()
            .filter(|r| r.context_embedding.is_some())
            .collect();

        let mut assigned = vec![false; records.len()];
        let mut removed_total = 0;
        for i in 0..records.len() {
            if assigned[i] {
                continue;
            }
            let mut cluster = vec![i];
            assigned[i] = true;
            let anchor = records[i].context_embedding.as_ref().expect("filtered");
            for j in (i + 1)..records.len() {
                if assigned[j] {
                    continue;
                }
                let other = records[j].context_embedding.as_ref().expect("filtered");
                if cosine_similarity(anchor, other) >= COMPRESSION_COSINE {
                    cluster.push(j);
                    assigned[j] = true;
                }
            }
            if cluster.len() <= COMPRESSION_MIN_CLUSTER {
                continue;
            }

            let representative = cluster
                .iter()
                .copied()
                .max_by(|a, b| {
                    records[*a]
                        .importance
                        .partial_cmp(&records[*b].importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("cluster is non-empty");

            let mut keeper = records[representative].clone();
            let doomed: Vec<String> = cluster
                .iter()
                .copied()
                .filter(|&i| i != representative)
                .map(|i| records[i].id.clone())
                .collect();
            keeper.merged_ids.extend(doomed.iter().cloned());
            self.episodic.store(&keeper)?;
            removed_total += self.store.delete_episodic(&doomed)?;
        }
        Ok(removed_total)
    }
}

// ============================================================================
// TESTS
// ============================================================================
