//! Ranking Engine
//!
//! Personalised rerank on top of hybrid search. Nine factors, each in
//! [0, 1], fused under a fixed weight table; preference and
//! performance-boost, when available for a candidate, absorb the weight
//! of the two lowest-weighted base factors. The hybrid-search weights fuse
//! sub-signals into `composite_score`; this table is authoritative for the
//! final ordering whenever personalization runs.

mod chemistry;

pub use chemistry::{ChemistryPredictor, DEFAULT_CHEMISTRY};

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::search::RankedResult;
use crate::talent::TalentProfile;

// ============================================================================
// CONTEXT & WEIGHTS
// ============================================================================

/// What we know about the requesting user and their project
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserContext {
    pub user_id: String,
    pub top_genres: Vec<String>,
    pub preferred_locations: Vec<String>,
    pub liked_talent_ids: Vec<String>,
    /// Talent ids already cast on the project
    pub project_cast: Vec<String>,
}

impl UserContext {
    fn has_preferences(&self) -> bool {
        !self.top_genres.is_empty()
            || !self.preferred_locations.is_empty()
            || !self.liked_talent_ids.is_empty()
    }
}

/// Base factor weights; must sum to 1
#[derive(Debug, Clone, Copy)]
pub struct RankingWeights {
    pub relevance: f64,
    pub experience: f64,
    pub popularity: f64,
    pub recency: f64,
    pub availability: f64,
    pub chemistry: f64,
    pub diversity: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            relevance: 0.35,
            experience: 0.15,
            popularity: 0.10,
            recency: 0.10,
            availability: 0.15,
            chemistry: 0.10,
            diversity: 0.05,
        }
    }
}

/// Per-candidate factor values
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorVector {
    pub relevance: f64,
    pub experience: f64,
    pub popularity: f64,
    pub recency: f64,
    pub availability: f64,
    pub chemistry: f64,
    pub diversity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preference: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub performance: Option<f64>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// Personalised ranking engine
#[derive(Default)]
pub struct RankingEngine {
    weights: RankingWeights,
    chemistry: ChemistryPredictor,
}

impl RankingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rerank hybrid-search results in place using the user context.
    /// `profiles` must cover every result id; unknown ids keep neutral
    /// factor values.
    pub fn rerank(
        &self,
        results: &mut [RankedResult],
        profiles: &HashMap<String, TalentProfile>,
        ctx: &UserContext,
    ) {
        let cast: Vec<&TalentProfile> = ctx
            .project_cast
            .iter()
            .filter_map(|id| profiles.get(id))
            .collect();

        let mut bucket_seen: HashMap<(u32, String, String), usize> = HashMap::new();
        let mut scored: Vec<(f64, FactorVector)> = Vec::with_capacity(results.len());

        for result in results.iter() {
            let factors = match profiles.get(&result.talent_id) {
                Some(profile) => {
                    self.factors_for(result, profile, &cast, ctx, &mut bucket_seen)
                }
                None => FactorVector {
                    relevance: result.composite_score,
                    experience: 0.5,
                    popularity: 0.5,
                    recency: 0.5,
                    availability: result.signals.availability,
                    chemistry: DEFAULT_CHEMISTRY,
                    diversity: 0.5,
                    preference: None,
                    performance: None,
                },
            };
            scored.push((self.fuse(&factors), factors));
        }

        for (result, (final_score, factors)) in results.iter_mut().zip(&scored) {
            result.composite_score = *final_score;
            result.explanation = self.explain(factors);
        }

        results.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.talent_id.cmp(&b.talent_id))
        });
        for (i, result) in results.iter_mut().enumerate() {
            result.rank = i + 1;
        }
    }

    fn factors_for(
        &self,
        result: &RankedResult,
        profile: &TalentProfile,
        cast: &[&TalentProfile],
        ctx: &UserContext,
        bucket_seen: &mut HashMap<(u32, String, String), usize>,
    ) -> FactorVector {
        let chemistry = if cast.is_empty() {
            DEFAULT_CHEMISTRY
        } else {
            cast.iter()
                .map(|member| self.chemistry.predict(profile, member))
                .sum::<f64>()
                / cast.len() as f64
        };

        let bucket = crate::search::diversity_bucket(&result.metadata);
        let seen = bucket_seen.entry(bucket).or_insert(0);
        let diversity = match *seen {
            0 => 1.0,
            1 => 0.5,
            _ => 0.25,
        };
        *seen += 1;

        FactorVector {
            relevance: result.composite_score,
            experience: experience_score(profile),
            popularity: popularity_score(profile),
            recency: recency_score(profile),
            availability: result.signals.availability,
            chemistry,
            diversity,
            preference: preference_score(profile, ctx),
            performance: performance_boost(profile),
        }
    }

    /// Weighted fusion. When preference / performance are present they
    /// absorb the pooled weight of the two lowest-weighted base factors
    /// (diversity and recency): both present halves the pool each; one
    /// present takes half the pool and the base pair keeps the rest
    /// proportionally.
    fn fuse(&self, f: &FactorVector) -> f64 {
        let w = &self.weights;
        let pool = w.diversity + w.recency;
        let extras = f.preference.iter().count() + f.performance.iter().count();

        let (extra_share, base_scale) = match extras {
            0 => (0.0, 1.0),
            1 => (pool / 2.0, 0.5),
            _ => (pool / 2.0, 0.0),
        };

        let mut score = w.relevance * f.relevance
            + w.experience * f.experience
            + w.popularity * f.popularity
            + w.availability * f.availability
            + w.chemistry * f.chemistry
            + (w.recency * base_scale) * f.recency
            + (w.diversity * base_scale) * f.diversity;
        if let Some(p) = f.preference {
            score += extra_share * p;
        }
        if let Some(p) = f.performance {
            score += extra_share * p;
        }
        score.clamp(0.0, 1.0)
    }

    /// Top-3 factors by contribution, rendered as fixed phrases. Stable
    /// for a given factor vector.
    fn explain(&self, f: &FactorVector) -> String {
        let w = &self.weights;
        let mut contributions: Vec<(f64, &'static str)> = vec![
            (w.relevance * f.relevance, "Strong match with search criteria"),
            (w.experience * f.experience, "Extensive industry experience"),
            (w.popularity * f.popularity, "Large and engaged audience"),
            (w.recency * f.recency, "Recently active on screen"),
            (w.availability * f.availability, "Available for your dates"),
            (w.chemistry * f.chemistry, "Great chemistry with your current cast"),
            (w.diversity * f.diversity, "Adds range to the shortlist"),
        ];
        if let Some(p) = f.preference {
            contributions.push((0.075 * p, "Matches your saved preferences"));
        }
        if let Some(p) = f.performance {
            contributions.push((0.075 * p, "Award-winning recent performance"));
        }
        contributions.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(b.1))
        });
        contributions
            .iter()
            .take(3)
            .map(|(_, phrase)| *phrase)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

// ============================================================================
// FACTORS
// ============================================================================

fn experience_score(p: &TalentProfile) -> f64 {
    let years = p.experience_years.unwrap_or(0.0) as f64;
    let years_part = (years / 20.0).min(1.0);
    let awards_part = (p.awards as f64 / 5.0).min(1.0);
    let projects_part = (p.project_count as f64 / 30.0).min(1.0);
    0.6 * years_part + 0.2 * awards_part + 0.2 * projects_part
}

fn popularity_score(p: &TalentProfile) -> f64 {
    let followers_part = ((p.followers as f64 + 1.0).log10() / 6.0).min(1.0);
    let rating_part = p.rating.map(|r| (r as f64 / 5.0).min(1.0)).unwrap_or(0.5);
    0.5 * followers_part + 0.5 * rating_part
}

/// Piecewise decay over days since the last project: 90 / 180 / 365 / 730
fn recency_score(p: &TalentProfile) -> f64 {
    let Some(last) = p.last_project_date else {
        return 0.5;
    };
    let days = (Utc::now().date_naive() - last).num_days();
    match days {
        d if d <= 90 => 1.0,
        d if d <= 180 => 0.8,
        d if d <= 365 => 0.5,
        d if d <= 730 => 0.3,
        _ => 0.1,
    }
}

/// Present only when the user context carries preferences
fn preference_score(p: &TalentProfile, ctx: &UserContext) -> Option<f64> {
    if !ctx.has_preferences() {
        return None;
    }
    let mut score = 0.0;
    let mut parts = 0.0;
    if !ctx.liked_talent_ids.is_empty() {
        parts += 1.0;
        if ctx.liked_talent_ids.contains(&p.id) {
            score += 1.0;
        }
    }
    if !ctx.preferred_locations.is_empty() {
        parts += 1.0;
        if let Some(loc) = &p.location {
            let loc = loc.to_lowercase();
            if ctx.preferred_locations.iter().any(|l| loc.contains(&l.to_lowercase())) {
                score += 1.0;
            }
        }
    }
    if !ctx.top_genres.is_empty() {
        parts += 1.0;
        let haystack = format!("{} {}", p.bio.to_lowercase(), p.skills.join(" ").to_lowercase());
        if ctx.top_genres.iter().any(|g| haystack.contains(&g.to_lowercase())) {
            score += 1.0;
        }
    }
    Some(if parts > 0.0 { score / parts } else { 0.5 })
}

/// Present only for talents with recent standout signals
fn performance_boost(p: &TalentProfile) -> Option<f64> {
    let strong_rating = p.rating.map(|r| r >= 4.5).unwrap_or(false);
    if p.awards == 0 && !p.trending && !strong_rating {
        return None;
    }
    let mut score: f64 = 0.0;
    if p.awards > 0 {
        score += 0.4 + 0.1 * (p.awards.min(3) as f64);
    }
    if p.trending {
        score += 0.2;
    }
    if strong_rating {
        score += 0.2;
    }
    Some(score.min(1.0))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::SignalScores;

    fn result(id: &str, composite: f64) -> RankedResult {
        RankedResult {
            talent_id: id.to_string(),
            name: id.to_string(),
            composite_score: composite,
            signals: SignalScores {
                availability: 0.5,
                ..Default::default()
            },
            rank: 0,
            explanation: String::new(),
            metadata: Default::default(),
        }
    }

    fn profile(id: &str) -> TalentProfile {
        let mut p = TalentProfile::new(id, id);
        p.age = Some(30);
        p.experience_years = Some(5.0);
        p
    }

    #[test]
    fn test_weights_sum_to_one() {
        let w = RankingWeights::default();
        let total = w.relevance + w.experience + w.popularity + w.recency
            + w.availability + w.chemistry + w.diversity;
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rerank_orders_and_assigns_ranks() {
        let engine = RankingEngine::new();
        let mut results = vec![result("a", 0.3), result("b", 0.9)];
        let profiles: HashMap<String, TalentProfile> =
            [("a", profile("a")), ("b", profile("b"))]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();

        engine.rerank(&mut results, &profiles, &UserContext::default());
        assert_eq!(results[0].talent_id, "b");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].rank, 2);
        assert!(!results[0].explanation.is_empty());
    }

    #[test]
    fn test_liked_talent_outranks_equal_candidate() {
        let engine = RankingEngine::new();
        let mut results = vec![result("a", 0.5), result("b", 0.5)];
        let profiles: HashMap<String, TalentProfile> =
            [("a", profile("a")), ("b", profile("b"))]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect();
        let ctx = UserContext {
            liked_talent_ids: vec!["b".to_string()],
            ..Default::default()
        };

        engine.rerank(&mut results, &profiles, &ctx);
        assert_eq!(results[0].talent_id, "b");
    }

    #[test]
    fn test_chemistry_with_existing_cast() {
        let engine = RankingEngine::new();
        // Cast member speaks hindi, close in age to "match", far from "clash"
        let mut cast_member = profile("cast");
        cast_member.languages = vec!["hindi".into()];

        let mut matching = profile("match");
        matching.languages = vec!["hindi".into()];
        let mut clashing = profile("clash");
        clashing.age = Some(60);
        clashing.experience_years = Some(10.0);
        clashing.languages = vec!["french".into()];

        let profiles: HashMap<String, TalentProfile> = [
            ("cast".to_string(), cast_member),
            ("match".to_string(), matching),
            ("clash".to_string(), clashing),
        ]
        .into_iter()
        .collect();

        let ctx = UserContext {
            project_cast: vec!["cast".to_string()],
            ..Default::default()
        };
        let mut results = vec![result("clash", 0.5), result("match", 0.5)];
        engine.rerank(&mut results, &profiles, &ctx);
        assert_eq!(results[0].talent_id, "match");
    }

    #[test]
    fn test_performance_boost_replaces_low_weight_factors() {
        let engine = RankingEngine::new();
        let plain = FactorVector {
            relevance: 0.5,
            experience: 0.5,
            popularity: 0.5,
            recency: 0.0,
            availability: 0.5,
            chemistry: 0.5,
            diversity: 0.0,
            preference: None,
            performance: None,
        };
        let boosted = FactorVector {
            performance: Some(1.0),
            ..plain
        };
        // The boost absorbs weight from the zero-valued recency/diversity
        // pair, so the fused score must rise.
        assert!(engine.fuse(&boosted) > engine.fuse(&plain));
    }

    #[test]
    fn test_explanation_stable_for_same_factors() {
        let engine = RankingEngine::new();
        let f = FactorVector {
            relevance: 0.9,
            experience: 0.2,
            popularity: 0.1,
            recency: 0.4,
            availability: 0.8,
            chemistry: 0.5,
            diversity: 0.3,
            preference: None,
            performance: Some(0.9),
        };
        let a = engine.explain(&f);
        let b = engine.explain(&f);
        assert_eq!(a, b);
        assert!(a.contains("Strong match with search criteria"));
        assert_eq!(a.split("; ").count(), 3);
    }
}
