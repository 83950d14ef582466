//! Conversation Orchestrator
//!
//! The per-request pipeline: resolve the session, analyse the utterance,
//! fan out for context, route by intent, respond, and write memory back.
//! Retrieval failures degrade the response (recorded in metadata) rather
//! than failing it; the only fatal path is retrieval AND every fallback
//! going down at once.

pub mod completion;

pub use completion::{
    Completion, CompletionProvider, CompletionRequest, ModelUsage, ScriptedCompletion,
    UsageLedger, UsageReport,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::consolidation::ConsolidationEngine;
use crate::error::{CoreError, Result};
use crate::experiment::{ExperimentHarness, ExperimentResult};
use crate::memory::episodic::{EpisodicRecord, EpisodicStore};
use crate::memory::graph::{EdgeKind, NodeKind, SemanticGraph};
use crate::memory::session::{Role, SessionStore, Turn};
use crate::nlp::{Analysis, Intent, IntentClassifier, ScriptAnalyzer};
use crate::ranking::{RankingEngine, UserContext};
use crate::search::{HybridSearch, RankedResult, SearchCriteria};
use crate::store::Store;
use crate::talent::TalentProfile;
use crate::telemetry::Telemetry;

/// Experiment consulted for per-request variant routing
pub const ROUTING_EXPERIMENT: &str = "model_routing";

/// Results attached to a search-intent response
const SEARCH_TOP_K: usize = 10;

/// LTM items injected as context
const MEMORY_CONTEXT_K: usize = 3;

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// Incoming chat request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
    pub context_type: Option<String>,
    pub streaming: bool,
    pub model_preference: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub inject_memories: bool,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self {
            message: String::new(),
            conversation_id: None,
            user_id: None,
            context_type: None,
            streaming: false,
            model_preference: None,
            temperature: 0.7,
            max_tokens: 1024,
            inject_memories: true,
        }
    }
}

impl ChatRequest {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

/// Metadata attached to every chat response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    pub intent: String,
    pub intent_confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub variant: String,
    /// Signals that failed and were defaulted during this request
    pub degraded: Vec<String>,
    /// Episodic memory ids injected as context
    pub memories_used: Vec<String>,
    /// Present for search-routed intents
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<RankedResult>>,
}

/// Chat response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    pub conversation_id: String,
    pub message_id: String,
    pub model_used: String,
    pub tokens_used: u32,
    pub response_time_ms: u64,
    pub metadata: ChatMetadata,
}

/// Streaming frame: content chunks, then exactly one terminal frame
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Chunk(String),
    Done(Box<ChatResponse>),
    Error(String),
}

/// Cooperative cancellation token propagated through the pipeline
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Dependencies of the orchestrator, wired once at startup
pub struct OrchestratorDeps {
    pub classifier: IntentClassifier,
    pub sessions: Arc<SessionStore>,
    pub episodic: Arc<EpisodicStore>,
    pub graph: Arc<RwLock<SemanticGraph>>,
    pub search: Arc<HybridSearch>,
    pub ranking: Arc<RankingEngine>,
    pub experiments: Arc<ExperimentHarness>,
    pub completion: Arc<dyn CompletionProvider>,
    pub consolidation: Arc<ConsolidationEngine>,
    pub store: Arc<Store>,
    pub telemetry: Arc<Telemetry>,
    pub usage: Arc<UsageLedger>,
    pub config: EngineConfig,
}

/// The per-request conversation pipeline
pub struct Orchestrator {
    deps: OrchestratorDeps,
    script_analyzer: ScriptAnalyzer,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            deps,
            script_analyzer: ScriptAnalyzer::new(),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.deps.sessions
    }

    pub fn usage(&self) -> &Arc<UsageLedger> {
        &self.deps.usage
    }

    /// Run the full pipeline for one request
    pub async fn chat(self: &Arc<Self>, request: ChatRequest, cancel: CancelFlag) -> Result<ChatResponse> {
        let start = Instant::now();
        let d = &self.deps;
        if request.message.trim().is_empty() {
            return Err(CoreError::Validation("message must not be empty".into()));
        }

        // Step 1: resolve session
        let session_id = request
            .conversation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let user_id = request.user_id.clone().unwrap_or_else(|| session_id.clone());
        d.sessions.touch(&session_id);

        // Step 2: intent + entities
        let history: Vec<String> = d
            .sessions
            .get(&session_id, None)
            .into_iter()
            .filter(|t| t.role == Role::User)
            .map(|t| t.content)
            .collect();
        let analysis = d.classifier.analyze(&request.message, &history).await;

        // Variant routing happens before any model work
        let variant = d.experiments.assign(&user_id, ROUTING_EXPERIMENT);

        // Step 3: context fan-out (recent turns ∥ relevant LTM)
        let turns = d.sessions.get(&session_id, Some(d.config.stm_capacity));
        let memories_used = if request.inject_memories {
            self.relevant_memories(&request.message).await
        } else {
            vec![]
        };

        if cancel.is_cancelled() {
            return Err(CoreError::Internal("request cancelled by client".into()));
        }

        // Step 4: route by intent
        let mut metadata = ChatMetadata {
            intent: analysis.intent.as_str().to_string(),
            intent_confidence: analysis.confidence,
            domain: analysis.domain.clone(),
            variant: variant.clone(),
            degraded: vec![],
            memories_used: memories_used.iter().map(|(id, _)| id.clone()).collect(),
            results: None,
        };
        let (response_text, model_used, tokens_used) = self
            .route(&request, &analysis, &turns, &memories_used, &mut metadata)
            .await?;

        // Step 5: emit + write back (skipped when the client is gone)
        let importance = analysis.confidence.clamp(0.3, 0.95);
        if !cancel.is_cancelled() {
            let mut user_turn = Turn::new(Role::User, request.message.clone(), importance);
            user_turn
                .metadata
                .insert("intent".into(), analysis.intent.as_str().to_string());
            user_turn
                .metadata
                .insert("sentiment".into(), format!("{:.3}", analysis.sentiment));
            d.sessions.append(&session_id, user_turn);
            d.sessions
                .append(&session_id, Turn::new(Role::Assistant, response_text.clone(), importance));
        }

        // Step 6: fire-and-forget memory effects; runs even after a
        // cancellation as long as a response was produced
        self.spawn_memory_effects(&session_id, &request.message, &analysis, &memories_used);

        let response_time_ms = start.elapsed().as_millis() as u64;
        let talents_found = metadata
            .results
            .as_ref()
            .map(|r| r.len() as u32)
            .unwrap_or(0);
        let _ = d.experiments.record(
            ROUTING_EXPERIMENT,
            ExperimentResult {
                user_id,
                session_id: Some(session_id.clone()),
                variant,
                response_time_ms: response_time_ms as f64,
                accuracy_score: analysis.confidence,
                talents_found,
                metadata: Some(serde_json::json!({"intent": analysis.intent.as_str()})),
                timestamp: chrono::Utc::now(),
            },
        );

        d.telemetry.counter("chat_requests_total").increment();
        d.telemetry
            .histogram("chat_response_time_ms")
            .observe(response_time_ms as f64);

        Ok(ChatResponse {
            response: response_text,
            conversation_id: session_id,
            message_id: Uuid::new_v4().to_string(),
            model_used,
            tokens_used,
            response_time_ms,
            metadata,
        })
    }

    /// Streaming variant: content chunks, then one terminal metadata
    /// frame. Ordering within the stream is strict (single channel).
    pub fn chat_stream(
        self: &Arc<Self>,
        request: ChatRequest,
        cancel: CancelFlag,
    ) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(32);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            match orchestrator.chat(request, cancel.clone()).await {
                Ok(response) => {
                    let words: Vec<&str> = response.response.split_whitespace().collect();
                    for chunk in words.chunks(6) {
                        if cancel.is_cancelled() {
                            break;
                        }
                        if tx.send(ChatEvent::Chunk(chunk.join(" ") + " ")).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(ChatEvent::Done(Box::new(response))).await;
                }
                Err(e) => {
                    let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                }
            }
        });
        rx
    }

    // ========================================================================
    // ROUTING
    // ========================================================================

    async fn route(
        self: &Arc<Self>,
        request: &ChatRequest,
        analysis: &Analysis,
        turns: &[Turn],
        memories: &[(String, String)],
        metadata: &mut ChatMetadata,
    ) -> Result<(String, String, u32)> {
        let d = &self.deps;
        match analysis.intent {
            Intent::SearchTalent | Intent::RequestRecommendation | Intent::CompareTalents => {
                let criteria = SearchCriteria::from_entities(&analysis.entities);
                let outcome = d
                    .search
                    .search(&request.message, &criteria, SEARCH_TOP_K)
                    .await?;
                metadata.degraded = outcome.degraded.clone();

                let mut results = outcome.results;
                let ctx = self.user_context(request);
                if !ctx.top_genres.is_empty()
                    || !ctx.preferred_locations.is_empty()
                    || !ctx.project_cast.is_empty()
                {
                    let profiles: std::collections::HashMap<String, TalentProfile> = d
                        .store
                        .list_profiles(None)?
                        .into_iter()
                        .map(|p| (p.id.clone(), p))
                        .collect();
                    d.ranking.rerank(&mut results, &profiles, &ctx);
                }

                let text = render_search_response(&results, &criteria);
                metadata.results = Some(results);
                Ok((text, "hybrid-search".to_string(), 0))
            }

            Intent::AnalyzeScript => {
                let analysis = self.script_analyzer.analyze(&request.message);
                let text = render_script_response(&analysis);
                Ok((text, "script-analyzer".to_string(), 0))
            }

            // Scheduling intents acknowledge and hand off to the external
            // scheduling interface; everything else goes straight to the
            // completion provider with an intent-keyed prompt.
            _ => match self.complete_with_prompt(request, analysis, turns, memories).await {
                Ok(completed) => Ok(completed),
                Err(e) => {
                    // A broken completion backend degrades the response,
                    // it never fails the request.
                    tracing::warn!("completion degraded: {}", e);
                    metadata.degraded.push("completion".to_string());
                    Ok((
                        "I hit a problem generating a full reply just now, but your \
                         request was recorded. Please try again in a moment."
                            .to_string(),
                        "fallback".to_string(),
                        0,
                    ))
                }
            },
        }
    }

    async fn complete_with_prompt(
        &self,
        request: &ChatRequest,
        analysis: &Analysis,
        turns: &[Turn],
        memories: &[(String, String)],
    ) -> Result<(String, String, u32)> {
        let d = &self.deps;
        let mut messages: Vec<(Role, String)> =
            turns.iter().map(|t| (t.role, t.content.clone())).collect();
        messages.push((Role::User, request.message.clone()));

        let mut system_prompt = system_prompt(analysis.intent, analysis.domain.as_deref());
        if !memories.is_empty() {
            system_prompt.push_str("\nRelevant context from earlier conversations:\n");
            for (_, snippet) in memories {
                system_prompt.push_str("- ");
                system_prompt.push_str(snippet);
                system_prompt.push('\n');
            }
        }

        let completion = tokio::time::timeout(
            d.config.completion_timeout,
            d.completion.complete(CompletionRequest {
                system_prompt,
                messages,
                temperature: request.temperature,
                max_tokens: request.max_tokens,
            }),
        )
        .await
        .map_err(|_| CoreError::timeout("completion", d.config.completion_timeout))??;

        d.usage.record(
            &completion.model,
            completion.input_tokens,
            completion.output_tokens,
        );
        let tokens = completion.input_tokens + completion.output_tokens;
        Ok((completion.text, completion.model, tokens))
    }

    // ========================================================================
    // CONTEXT
    // ========================================================================

    /// Top-k episodic memories by cosine similarity to the utterance
    async fn relevant_memories(&self, message: &str) -> Vec<(String, String)> {
        let d = &self.deps;
        let Ok(vector) = d.embeddings_of(message).await else {
            return vec![];
        };
        match d.episodic.similar(&vector, MEMORY_CONTEXT_K) {
            Ok(hits) => hits
                .into_iter()
                .map(|(record, _)| {
                    let snippet = record
                        .payload
                        .get("content")
                        .and_then(|c| c.as_str())
                        .unwrap_or(&record.event_type)
                        .to_string();
                    (record.id, snippet)
                })
                .collect(),
            Err(_) => vec![],
        }
    }

    /// Preferences mined into the semantic graph for this user
    fn user_context(&self, request: &ChatRequest) -> UserContext {
        let d = &self.deps;
        let user_key = request
            .user_id
            .clone()
            .or_else(|| request.conversation_id.clone())
            .unwrap_or_default();
        let mut ctx = UserContext {
            user_id: user_key.clone(),
            ..Default::default()
        };
        if user_key.is_empty() {
            return ctx;
        }

        let graph = d.graph.read().expect("graph lock");
        if let Some(user) = graph.find_node(&NodeKind::User, &user_key) {
            for (node_index, _edge) in graph.neighbors(user, Some(&EdgeKind::Prefers)) {
                if let Some(node) = graph.node(node_index) {
                    match node.kind {
                        NodeKind::Location => ctx.preferred_locations.push(node.key.clone()),
                        NodeKind::Genre | NodeKind::Skill => ctx.top_genres.push(node.key.clone()),
                        _ => {}
                    }
                }
            }
        }
        ctx
    }

    /// Step 6 effects: episodic write for confident turns, immediate
    /// consolidation when STM hits capacity.
    fn spawn_memory_effects(
        self: &Arc<Self>,
        session_id: &str,
        message: &str,
        analysis: &Analysis,
        memories_used: &[(String, String)],
    ) {
        let d = &self.deps;

        if !memories_used.is_empty() {
            // Injected memories were useful context: reinforce them
            let ids: Vec<String> = memories_used.iter().map(|(id, _)| id.clone()).collect();
            let episodic = Arc::clone(&d.episodic);
            tokio::spawn(async move {
                if let Err(e) = episodic.reinforce(&ids) {
                    tracing::debug!("memory reinforcement failed: {}", e);
                }
            });
        }

        if analysis.confidence >= 0.7 {
            let episodic = Arc::clone(&d.episodic);
            let orchestrator = Arc::clone(self);
            let session = session_id.to_string();
            let content = message.to_string();
            let importance = analysis.confidence;
            let valence = (0.5 + analysis.sentiment / 2.0).clamp(0.0, 1.0);
            let intent = analysis.intent.as_str().to_string();
            tokio::spawn(async move {
                let mut record = EpisodicRecord::new(
                    session,
                    intent,
                    serde_json::json!({ "content": content }),
                    importance,
                    valence,
                );
                if let Ok(vector) = orchestrator.deps.embeddings_of(&content).await {
                    record.context_embedding = Some(vector);
                }
                if let Err(e) = episodic.store(&record) {
                    tracing::debug!("episodic write failed: {}", e);
                }
            });
        }

        if d.sessions.occupancy(session_id) >= d.sessions.capacity() {
            let consolidation = Arc::clone(&d.consolidation);
            tokio::spawn(async move {
                let _ = consolidation.tick().await;
            });
        }
    }
}

impl OrchestratorDeps {
    /// Embed via the hybrid search pipeline's embedder
    async fn embeddings_of(&self, text: &str) -> Result<Vec<f32>> {
        self.search.embeddings().embed(text).await
    }
}

// ============================================================================
// RENDERING & PROMPTS
// ============================================================================

fn render_search_response(results: &[RankedResult], criteria: &SearchCriteria) -> String {
    if results.is_empty() {
        let mut text = "No matching talents found.".to_string();
        if !criteria.is_empty() {
            text.push_str(" Try relaxing the age, budget, or location constraints.");
        }
        return text;
    }
    let mut text = format!("Found {} matching talent(s).", results.len());
    for result in results.iter().take(3) {
        text.push_str(&format!(
            " {}. {} ({:.0}% match) - {}.",
            result.rank,
            result.name,
            result.composite_score * 100.0,
            result.explanation
        ));
    }
    text
}

fn render_script_response(analysis: &crate::nlp::ScriptAnalysis) -> String {
    if analysis.characters.is_empty() {
        return "I could not find screenplay-formatted characters in that text. \
                Paste the script with scene headings and dialogue cues."
            .to_string();
    }
    let mut text = format!(
        "Script analysis: {} scene(s), {} character(s).",
        analysis.scenes.len(),
        analysis.characters.len()
    );
    for requirement in &analysis.requirements {
        text.push_str(&format!(
            " {} ({} role): {}.",
            requirement.character, requirement.role_type, requirement.description
        ));
    }
    text
}

/// Static system prompt table keyed by (intent, domain)
fn system_prompt(intent: Intent, domain: Option<&str>) -> String {
    let base = match intent {
        Intent::ScheduleAudition => {
            "You are a casting coordinator. Confirm the audition request and hand \
             it to the scheduling system, summarising date, talent, and location."
        }
        Intent::CheckAvailability => {
            "You are a casting coordinator. Summarise what availability was asked \
             for and confirm the calendar check has been requested."
        }
        Intent::DiscussBudget => {
            "You are a casting budget advisor. Discuss day rates and budget \
             ranges factually, without committing to numbers on behalf of talent."
        }
        Intent::ContractNegotiation => {
            "You are a casting assistant. Outline standard contract points and \
             recommend involving the legal team for specifics."
        }
        Intent::Feedback => {
            "You are a casting assistant. Acknowledge the feedback and note it \
             will inform future recommendations."
        }
        Intent::TechnicalSupport => {
            "You are the platform support assistant. Offer concrete steps and \
             escalate persistent problems."
        }
        Intent::ViewProfile => {
            "You are a casting assistant. Summarise the requested talent profile \
             from the provided context."
        }
        _ => "You are a casting marketplace assistant. Answer concisely and stay \
             within the casting domain.",
    };
    match domain {
        Some(domain) => format!("{base} The production in question is a {domain}."),
        None => base.to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, TieredCache};
    use crate::embedding::{EmbeddingPipeline, HashProjectionModel};
    use crate::experiment::ExperimentConfig;
    use crate::index::{FlatIndex, SharedIndex, VectorIndex};
    use crate::memory::procedural::ProceduralStore;

    struct Fixture {
        orchestrator: Arc<Orchestrator>,
        store: Arc<Store>,
        embeddings: Arc<EmbeddingPipeline>,
        index: SharedIndex,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(Some(dir.path().join("test.db"))).unwrap());
        let cache = Arc::new(TieredCache::new(CacheConfig::default()));
        let embeddings = Arc::new(EmbeddingPipeline::new(
            Arc::new(HashProjectionModel::default()),
            cache.clone(),
        ));
        let index: SharedIndex =
            Arc::new(RwLock::new(Box::new(FlatIndex::new(embeddings.dim()))));
        let sessions = Arc::new(SessionStore::new(7, std::time::Duration::from_secs(1800)));
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
        let experiments = Arc::new(ExperimentHarness::new());
        experiments
            .register(ExperimentConfig::new(
                ROUTING_EXPERIMENT,
                vec![("control", 1.0)],
            ))
            .unwrap();

        let orchestrator = Arc::new(Orchestrator::new(OrchestratorDeps {
            classifier: IntentClassifier::new(),
            sessions,
            episodic,
            graph,
            search,
            ranking: Arc::new(RankingEngine::new()),
            experiments,
            completion: Arc::new(ScriptedCompletion::new()),
            consolidation,
            store: store.clone(),
            telemetry,
            usage: Arc::new(UsageLedger::new()),
            config: EngineConfig::default(),
        }));
        Fixture { orchestrator, store, embeddings, index, _dir: dir }
    }

    async fn index_talent(f: &Fixture, id: &str, name: &str, age: u32) {
        let mut p = TalentProfile::new(id, name);
        p.age = Some(age);
        p.location = Some("Mumbai".into());
        p.skills = vec!["dance".into(), "acting".into()];
        p.languages = vec!["hindi".into()];
        f.store.upsert_profile(&p).unwrap();
        let v = f.embeddings.embed(&p.searchable_text()).await.unwrap();
        f.index
            .write()
            .unwrap()
            .upsert(id, &v, p.to_metadata())
            .unwrap();
    }

    #[tokio::test]
    async fn test_chat_mints_session_and_appends_turns() {
        let f = fixture().await;
        let response = f
            .orchestrator
            .chat(ChatRequest::message("hello there"), CancelFlag::new())
            .await
            .unwrap();

        assert!(!response.response.is_empty());
        assert!(!response.conversation_id.is_empty());
        assert_eq!(
            f.orchestrator.sessions().occupancy(&response.conversation_id),
            2
        );
        assert_eq!(response.metadata.variant, "control");
    }

    #[tokio::test]
    async fn test_search_intent_returns_filtered_results() {
        let f = fixture().await;
        index_talent(&f, "t1", "Young Lead", 27).await;
        index_talent(&f, "t2", "Veteran Actor", 48).await;

        let response = f
            .orchestrator
            .chat(
                ChatRequest::message("find dancers aged 25-30 in Mumbai"),
                CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(response.metadata.intent, "search_talent");
        let results = response.metadata.results.expect("search results attached");
        assert!(results.iter().any(|r| r.talent_id == "t1"));
        assert!(results.iter().all(|r| r.talent_id != "t2"));
        assert!(response.response.contains("Young Lead"));
    }

    #[tokio::test]
    async fn test_second_turn_inherits_domain_from_history() {
        let f = fixture().await;
        index_talent(&f, "t1", "Young Lead", 27).await;

        let first = f
            .orchestrator
            .chat(
                ChatRequest::message("I'm casting for a Hindi drama"),
                CancelFlag::new(),
            )
            .await
            .unwrap();
        let second = f
            .orchestrator
            .chat(
                ChatRequest {
                    conversation_id: Some(first.conversation_id.clone()),
                    ..ChatRequest::message("Find leads aged 25-30")
                },
                CancelFlag::new(),
            )
            .await
            .unwrap();

        assert_eq!(second.metadata.intent, "search_talent");
        assert_eq!(second.metadata.domain.as_deref(), Some("drama"));
        let results = second.metadata.results.expect("results");
        assert!(results.iter().any(|r| r.talent_id == "t1"));
    }

    #[tokio::test]
    async fn test_cancelled_request_skips_writeback() {
        let f = fixture().await;
        let cancel = CancelFlag::new();
        cancel.cancel();
        let result = f
            .orchestrator
            .chat(ChatRequest::message("hello"), cancel)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_empty_message_is_validation_error() {
        let f = fixture().await;
        let err = f
            .orchestrator
            .chat(ChatRequest::message("   "), CancelFlag::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }

    #[tokio::test]
    async fn test_streaming_chunks_then_done() {
        let f = fixture().await;
        let mut rx = f
            .orchestrator
            .chat_stream(ChatRequest::message("hello there friend"), CancelFlag::new());

        let mut chunks = 0;
        let mut saw_done = false;
        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::Chunk(text) => {
                    assert!(!saw_done, "chunks must precede the terminal frame");
                    assert!(!text.is_empty());
                    chunks += 1;
                }
                ChatEvent::Done(response) => {
                    saw_done = true;
                    assert!(!response.response.is_empty());
                }
                ChatEvent::Error(e) => panic!("unexpected stream error: {e}"),
            }
        }
        assert!(chunks > 0);
        assert!(saw_done);
    }

    #[tokio::test]
    async fn test_script_intent_routes_to_analyzer() {
        let f = fixture().await;
        let script = "analyze this script and break down the characters\nINT. STUDIO - DAY\n\nRAVI\nTrust me, we start now.\n";
        let response = f
            .orchestrator
            .chat(ChatRequest::message(script), CancelFlag::new())
            .await
            .unwrap();
        assert_eq!(response.metadata.intent, "analyze_script");
        assert!(response.response.contains("RAVI"));
    }
}
