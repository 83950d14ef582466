//! The six-stage hybrid search pipeline

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::cache::{CacheKind, TieredCache};
use crate::embedding::EmbeddingPipeline;
use crate::error::Result;
use crate::index::SharedIndex;
use crate::store::Store;
use crate::talent::{TalentProfile, TalentStatus};

use super::{
    diversity_bucket, AvailabilityProvider, FusionWeights, RankedResult, SearchCriteria,
    SearchOutcome, SignalScores, SEMANTIC_CANDIDATES,
};

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "in", "on", "at", "for", "of", "with", "to", "and", "or", "is",
    "are", "was", "me", "my", "we", "i", "you", "who", "that", "this", "from", "find",
    "show", "need", "looking", "search", "get", "someone", "some",
];

struct Candidate {
    profile: TalentProfile,
    semantic_raw: Option<f32>,
    signals: SignalScores,
}

/// Hybrid search over the vector index and profile store
pub struct HybridSearch {
    embeddings: Arc<EmbeddingPipeline>,
    index: SharedIndex,
    store: Arc<Store>,
    cache: Arc<TieredCache>,
    availability: Option<Arc<dyn AvailabilityProvider>>,
    weights: FusionWeights,
    embed_timeout: Duration,
    vector_timeout: Duration,
}

impl HybridSearch {
    pub fn new(
        embeddings: Arc<EmbeddingPipeline>,
        index: SharedIndex,
        store: Arc<Store>,
        cache: Arc<TieredCache>,
    ) -> Self {
        Self {
            embeddings,
            index,
            store,
            cache,
            availability: None,
            weights: FusionWeights::default(),
            embed_timeout: Duration::from_secs(2),
            vector_timeout: Duration::from_millis(500),
        }
    }

    /// The embedding pipeline behind this searcher (shared with the
    /// orchestrator for context embeddings)
    pub fn embeddings(&self) -> &Arc<EmbeddingPipeline> {
        &self.embeddings
    }

    /// Wire an external scheduling system for the availability stage
    pub fn with_availability(mut self, provider: Arc<dyn AvailabilityProvider>) -> Self {
        self.availability = Some(provider);
        self
    }

    pub fn with_timeouts(mut self, embed: Duration, vector: Duration) -> Self {
        self.embed_timeout = embed;
        self.vector_timeout = vector;
        self
    }

    /// Run the pipeline. Never fails outright unless both retrieval AND
    /// the profile-store fallback are unavailable.
    pub async fn search(
        &self,
        query: &str,
        criteria: &SearchCriteria,
        k: usize,
    ) -> Result<SearchOutcome> {
        let cache_input = format!(
            "{query}|{}|{k}",
            serde_json::to_string(criteria).unwrap_or_default()
        );
        if let Some(cached) = self
            .cache
            .get_json::<SearchOutcome>(CacheKind::VectorSearch, &cache_input)
            .await
        {
            return Ok(cached);
        }

        let mut degraded: Vec<String> = Vec::new();
        let profiles: HashMap<String, TalentProfile> = self
            .store
            .list_profiles(Some(TalentStatus::Active))?
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();

        // ==================== Stage 1: semantic retrieval ====================
        let mut candidates = match self.semantic_candidates(query, criteria, &profiles, &mut degraded).await {
            Some(c) => c,
            None => self.keyword_candidates(query, criteria, &profiles),
        };

        // Min-max normalise semantic scores over the result set
        let scored: Vec<f32> = candidates.iter().filter_map(|c| c.semantic_raw).collect();
        if !scored.is_empty() {
            let min = scored.iter().cloned().fold(f32::INFINITY, f32::min);
            let max = scored.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            for c in candidates.iter_mut() {
                c.signals.semantic = match c.semantic_raw {
                    Some(s) if max > min => ((s - min) / (max - min)) as f64,
                    Some(_) => 1.0,
                    None => 0.0,
                };
            }
        }

        // ==================== Stage 2: keyword overlay ====================
        let required = self.required_keywords(query, criteria);
        for c in candidates.iter_mut() {
            let text = c.profile.searchable_text();
            let matches = required.iter().filter(|kw| text.contains(kw.as_str())).count();
            c.signals.keyword = matches as f64 / required.len().max(1) as f64;
        }

        // ==================== Stage 3: attribute filtering ====================
        candidates.retain(|c| passes_hard_cuts(&c.profile, criteria));
        for c in candidates.iter_mut() {
            c.signals.attribute = attribute_score(&c.profile, criteria);
        }

        // ==================== Stage 4: availability ====================
        for c in candidates.iter_mut() {
            c.signals.availability = self
                .availability_score(&c.profile, criteria, &mut degraded)
                .await;
        }

        // ==================== Stage 5: budget overlap ====================
        candidates.retain(|c| match (criteria.budget, &c.profile.budget) {
            (Some((ask_min, ask_max)), Some(b)) => b.overlap_score(ask_min, ask_max) > 0.0,
            _ => true,
        });
        for c in candidates.iter_mut() {
            c.signals.budget = match (criteria.budget, &c.profile.budget) {
                (Some((ask_min, ask_max)), Some(b)) => b.overlap_score(ask_min, ask_max),
                _ => 0.5,
            };
        }

        // ==================== Stage 6: rank fusion + diversity ====================
        let total_candidates = candidates.len();
        let mut results: Vec<RankedResult> = candidates
            .into_iter()
            .map(|c| {
                let s = c.signals;
                let filter_mean = (s.attribute + s.availability + s.budget) / 3.0;
                let composite = (self.weights.semantic * s.semantic
                    + self.weights.keyword * s.keyword
                    + self.weights.attribute * filter_mean)
                    .clamp(0.0, 1.0);
                RankedResult {
                    talent_id: c.profile.id.clone(),
                    name: c.profile.name.clone(),
                    composite_score: composite,
                    signals: s,
                    rank: 0,
                    explanation: explain(&s),
                    metadata: c.profile.to_metadata(),
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.signals
                        .semantic
                        .partial_cmp(&a.signals.semantic)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| {
                    b.signals
                        .keyword
                        .partial_cmp(&a.signals.keyword)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.talent_id.cmp(&b.talent_id))
        });

        let mut results = inject_diversity(results);
        results.truncate(k);
        for (i, r) in results.iter_mut().enumerate() {
            r.rank = i + 1;
        }

        let outcome = SearchOutcome {
            results,
            degraded,
            total_candidates,
        };
        self.cache
            .set_json(CacheKind::VectorSearch, &cache_input, &outcome, None)
            .await;
        Ok(outcome)
    }

    /// Stage 1 proper: embed the query and hit the vector index. `None`
    /// means the stage degraded and the caller should fall back to
    /// keyword candidates.
    async fn semantic_candidates(
        &self,
        query: &str,
        criteria: &SearchCriteria,
        profiles: &HashMap<String, TalentProfile>,
        degraded: &mut Vec<String>,
    ) -> Option<Vec<Candidate>> {
        let vector = match timeout(self.embed_timeout, self.embeddings.embed(query)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                tracing::warn!("semantic stage degraded: {}", e);
                degraded.push("semantic".to_string());
                return None;
            }
            Err(_) => {
                tracing::warn!("semantic stage degraded: embedding timeout");
                degraded.push("semantic".to_string());
                return None;
            }
        };

        let index = Arc::clone(&self.index);
        let filter = criteria.to_filter();
        let query_task = tokio::task::spawn_blocking(move || {
            index
                .read()
                .map_err(|_| crate::index::IndexError::Search("index lock poisoned".into()))?
                .query(&vector, filter.as_ref(), SEMANTIC_CANDIDATES)
        });

        let hits = match timeout(self.vector_timeout, query_task).await {
            Ok(Ok(Ok(hits))) => hits,
            Ok(Ok(Err(e))) => {
                tracing::warn!("vector index degraded: {}", e);
                degraded.push("vector_index".to_string());
                return None;
            }
            Ok(Err(join)) => {
                tracing::warn!("vector index task failed: {}", join);
                degraded.push("vector_index".to_string());
                return None;
            }
            Err(_) => {
                tracing::warn!("vector index degraded: query timeout");
                degraded.push("vector_index".to_string());
                return None;
            }
        };

        Some(
            hits.into_iter()
                .filter_map(|hit| {
                    let profile = profiles.get(&hit.id)?.clone();
                    Some(Candidate {
                        profile,
                        semantic_raw: Some(hit.score),
                        signals: SignalScores::default(),
                    })
                })
                .collect(),
        )
    }

    /// Degraded path: keyword scoring straight off the profile store,
    /// honouring the same metadata pre-filter.
    fn keyword_candidates(
        &self,
        query: &str,
        criteria: &SearchCriteria,
        profiles: &HashMap<String, TalentProfile>,
    ) -> Vec<Candidate> {
        let required = self.required_keywords(query, criteria);
        let filter = criteria.to_filter();
        let mut candidates: Vec<(f64, Candidate)> = profiles
            .values()
            .filter(|p| {
                filter
                    .as_ref()
                    .map(|f| f.matches(&p.to_metadata()))
                    .unwrap_or(true)
            })
            .map(|p| {
                let text = p.searchable_text();
                let matches = required.iter().filter(|kw| text.contains(kw.as_str())).count();
                let score = matches as f64 / required.len().max(1) as f64;
                (
                    score,
                    Candidate {
                        profile: p.clone(),
                        semantic_raw: None,
                        signals: SignalScores::default(),
                    },
                )
            })
            .filter(|(score, _)| *score > 0.0 || required.is_empty())
            .collect();

        candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(SEMANTIC_CANDIDATES);
        candidates.into_iter().map(|(_, c)| c).collect()
    }

    fn required_keywords(&self, query: &str, criteria: &SearchCriteria) -> Vec<String> {
        if !criteria.required_keywords.is_empty() {
            return criteria
                .required_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect();
        }
        query
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 1 && !STOPWORDS.contains(t))
            .map(str::to_string)
            .collect()
    }

    async fn availability_score(
        &self,
        profile: &TalentProfile,
        criteria: &SearchCriteria,
        degraded: &mut Vec<String>,
    ) -> f64 {
        let Some((from, to)) = criteria.availability else {
            return 0.5;
        };
        if let Some(provider) = &self.availability {
            match provider.check(&profile.id, from, to).await {
                Ok(report) => return report.score.clamp(0.0, 1.0),
                Err(e) => {
                    tracing::warn!("availability provider degraded: {}", e);
                    if !degraded.iter().any(|d| d == "availability") {
                        degraded.push("availability".to_string());
                    }
                    return 0.5;
                }
            }
        }
        // Fall back to the declared window on the profile
        match &profile.availability {
            Some(window) => {
                if window.covers(from, to) {
                    1.0
                } else {
                    0.0
                }
            }
            None => 0.5,
        }
    }
}

// ============================================================================
// STAGE HELPERS
// ============================================================================

fn passes_hard_cuts(profile: &TalentProfile, criteria: &SearchCriteria) -> bool {
    if let (Some((min, max)), Some(age)) = (criteria.age_range, profile.age) {
        if age < min || age > max {
            return false;
        }
    }
    if let (Some((min, max)), Some(height)) = (criteria.height_range_cm, profile.height_cm) {
        if height < min || height > max {
            return false;
        }
    }
    true
}

/// Attribute score in [0, 1]: linear shrink from the ideal midpoint of
/// each supplied range, with location mismatch as a soft multiplier.
fn attribute_score(profile: &TalentProfile, criteria: &SearchCriteria) -> f64 {
    let mut components: Vec<f64> = Vec::new();

    if let Some((min, max)) = criteria.age_range {
        components.push(match profile.age {
            Some(age) => midpoint_proximity(age as f64, min as f64, max as f64),
            None => 0.5,
        });
    }
    if let Some((min, max)) = criteria.height_range_cm {
        components.push(match profile.height_cm {
            Some(h) => midpoint_proximity(h as f64, min as f64, max as f64),
            None => 0.5,
        });
    }

    let base = if components.is_empty() {
        0.5
    } else {
        components.iter().sum::<f64>() / components.len() as f64
    };

    let location_multiplier = if criteria.locations.is_empty() {
        1.0
    } else {
        let matched = profile
            .location
            .as_ref()
            .map(|loc| {
                let loc = loc.to_lowercase();
                criteria.locations.iter().any(|want| loc.contains(want))
            })
            .unwrap_or(false);
        if matched { 1.0 } else { 0.5 }
    };

    (base * location_multiplier).clamp(0.0, 1.0)
}

/// 1.0 at the midpoint, 0.5 at the range edges
fn midpoint_proximity(value: f64, min: f64, max: f64) -> f64 {
    let half_width = ((max - min) / 2.0).max(f64::EPSILON);
    let mid = (min + max) / 2.0;
    (1.0 - 0.5 * ((value - mid).abs() / half_width)).clamp(0.0, 1.0)
}

/// Walk the sorted list demoting over-represented (age bucket, gender,
/// location) combinations: a result is retained in place when its bucket
/// has been seen fewer than twice OR its score clears 0.9.
fn inject_diversity(sorted: Vec<RankedResult>) -> Vec<RankedResult> {
    let mut counts: HashMap<(u32, String, String), usize> = HashMap::new();
    let mut retained = Vec::with_capacity(sorted.len());
    let mut demoted = Vec::new();
    for result in sorted {
        let bucket = diversity_bucket(&result.metadata);
        let seen = counts.entry(bucket).or_insert(0);
        if *seen < 2 || result.composite_score > 0.9 {
            *seen += 1;
            retained.push(result);
        } else {
            demoted.push(result);
        }
    }
    retained.extend(demoted);
    retained
}

fn explain(s: &SignalScores) -> String {
    let mut phrases: Vec<&str> = Vec::new();
    if s.semantic >= 0.7 {
        phrases.push("Strong match with search criteria");
    }
    if s.keyword >= 0.5 {
        phrases.push("Matches the requested keywords");
    }
    if s.attribute >= 0.75 {
        phrases.push("Fits the requested profile attributes");
    }
    if s.availability >= 0.75 {
        phrases.push("Available for the requested dates");
    }
    if s.budget >= 0.75 {
        phrases.push("Budget aligns with the offered range");
    }
    if phrases.is_empty() {
        phrases.push("Partial match with search criteria");
    }
    phrases.truncate(2);
    phrases.join("; ")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::embedding::{EmbeddingError, EmbeddingProvider, HashProjectionModel};
    use crate::index::{FlatIndex, VectorIndex};
    use crate::talent::BudgetRange;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::RwLock;

    struct SwitchableModel {
        inner: HashProjectionModel,
        fail: AtomicBool,
    }

    impl EmbeddingProvider for SwitchableModel {
        fn name(&self) -> &str {
            "switchable"
        }
        fn dim(&self) -> usize {
            self.inner.dim()
        }
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EmbeddingError::Failed("down".into()));
            }
            self.inner.embed(text)
        }
    }

    struct Fixture {
        search: HybridSearch,
        store: Arc<Store>,
        model: Arc<SwitchableModel>,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(Some(dir.path().join("test.db"))).unwrap());
        let model = Arc::new(SwitchableModel {
            inner: HashProjectionModel::default(),
            fail: AtomicBool::new(false),
        });
        let cache = Arc::new(TieredCache::new(CacheConfig::default()));
        let embeddings = Arc::new(EmbeddingPipeline::new(model.clone(), cache.clone()));
        let index: SharedIndex = Arc::new(RwLock::new(Box::new(FlatIndex::new(embeddings.dim()))));
        let search = HybridSearch::new(embeddings, index, store.clone(), cache);
        Fixture { search, store, model, _dir: dir }
    }

    async fn index_profile(f: &Fixture, profile: &TalentProfile) {
        f.store.upsert_profile(profile).unwrap();
        let vector = f
            .search
            .embeddings
            .embed(&profile.searchable_text())
            .await
            .unwrap();
        f.search
            .index
            .write()
            .unwrap()
            .upsert(&profile.id, &vector, profile.to_metadata())
            .unwrap();
    }

    fn dancer() -> TalentProfile {
        let mut p = TalentProfile::new("t1", "Asha Verma");
        p.age = Some(28);
        p.location = Some("Mumbai".into());
        p.skills = vec!["dance".into(), "singing".into()];
        p.languages = vec!["hindi".into()];
        p.bio = "classical dancer and performer".into();
        p
    }

    #[tokio::test]
    async fn test_cold_search_finds_indexed_profile() {
        let f = fixture().await;
        index_profile(&f, &dancer()).await;

        let outcome = f
            .search
            .search("dancer in Mumbai", &SearchCriteria::default(), 5)
            .await
            .unwrap();
        assert!(!outcome.results.is_empty());
        assert_eq!(outcome.results[0].talent_id, "t1");
        assert!(outcome.results[0].composite_score > 0.0);
        assert!(!outcome.results[0].explanation.is_empty());
        assert_eq!(outcome.results[0].rank, 1);
        assert!(outcome.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_age_hard_cut() {
        let f = fixture().await;
        index_profile(&f, &dancer()).await;
        let mut older = dancer();
        older.id = "t2".into();
        older.name = "Older Dancer".into();
        older.age = Some(45);
        index_profile(&f, &older).await;

        let criteria = SearchCriteria {
            age_range: Some((25, 30)),
            ..Default::default()
        };
        let outcome = f.search.search("dancer", &criteria, 5).await.unwrap();
        assert!(outcome.results.iter().all(|r| r.talent_id != "t2"));
        assert!(outcome.results.iter().any(|r| r.talent_id == "t1"));
    }

    #[tokio::test]
    async fn test_budget_disjoint_rejects() {
        let f = fixture().await;
        let mut p = dancer();
        p.budget = Some(BudgetRange::new(1000.0, 2000.0));
        index_profile(&f, &p).await;

        let criteria = SearchCriteria {
            budget: Some((5000.0, 8000.0)),
            ..Default::default()
        };
        let outcome = f.search.search("dancer", &criteria, 5).await.unwrap();
        assert!(outcome.results.is_empty());

        // Touching / overlapping ranges keep the candidate with score > 0
        let criteria = SearchCriteria {
            budget: Some((1500.0, 2500.0)),
            ..Default::default()
        };
        let outcome = f.search.search("dancer", &criteria, 5).await.unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert!(outcome.results[0].signals.budget > 0.0);
    }

    #[tokio::test]
    async fn test_embedding_outage_degrades_to_keyword_overlay() {
        let f = fixture().await;
        index_profile(&f, &dancer()).await;
        f.model.fail.store(true, Ordering::SeqCst);

        let outcome = f
            .search
            .search("mumbai dancer", &SearchCriteria::default(), 5)
            .await
            .unwrap();
        assert!(outcome.degraded.contains(&"semantic".to_string()));
        assert!(!outcome.results.is_empty(), "keyword fallback must serve results");
        assert_eq!(outcome.results[0].talent_id, "t1");
    }

    #[tokio::test]
    async fn test_diversity_demotes_third_same_bucket_result() {
        let f = fixture().await;
        // Three near-identical Mumbai dancers, one from Delhi
        for (id, name) in [("m1", "Dancer One"), ("m2", "Dancer Two"), ("m3", "Dancer Three")] {
            let mut p = dancer();
            p.id = id.into();
            p.name = name.into();
            index_profile(&f, &p).await;
        }
        let mut delhi = dancer();
        delhi.id = "d1".into();
        delhi.name = "Delhi Dancer".into();
        delhi.location = Some("Delhi".into());
        delhi.bio = "street dance specialist".into();
        index_profile(&f, &delhi).await;

        // Two required keywords, one unmatched, keep composites clearly
        // below the 0.9 high-score exemption.
        let criteria = SearchCriteria {
            required_keywords: vec!["dance".into(), "stage".into()],
            ..Default::default()
        };
        let outcome = f.search.search("dancer", &criteria, 10).await.unwrap();
        assert_eq!(outcome.results.len(), 4);

        // The Delhi profile must outrank at least one same-bucket Mumbai
        // profile despite a weaker semantic score.
        let delhi_rank = outcome
            .results
            .iter()
            .position(|r| r.talent_id == "d1")
            .unwrap();
        assert!(delhi_rank < 3, "diversity injection should demote the third Mumbai clone");
    }

    #[tokio::test]
    async fn test_search_cache_roundtrip() {
        let f = fixture().await;
        index_profile(&f, &dancer()).await;

        let first = f
            .search
            .search("dancer in mumbai", &SearchCriteria::default(), 5)
            .await
            .unwrap();
        // Second call is served from the vector-search cache view
        let second = f
            .search
            .search("dancer in mumbai", &SearchCriteria::default(), 5)
            .await
            .unwrap();
        assert_eq!(first.results.len(), second.results.len());
        assert_eq!(first.results[0].talent_id, second.results[0].talent_id);
    }
}
