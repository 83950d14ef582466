//! Hybrid Search
//!
//! Multi-signal retrieval: dense vector similarity, keyword overlay,
//! attribute and budget filters, availability, and diversity injection,
//! fused into one composite score. Every stage is fail-soft - a broken
//! signal degrades quality and is reported in the outcome, it never
//! fails the request.

mod pipeline;

pub use pipeline::HybridSearch;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{Filter, Metadata, MetaValue};
use crate::nlp::{Entity, EntityKind, EntityValue};
use crate::talent::Gender;

/// Candidates fetched from the vector index before filtering (k1)
pub const SEMANTIC_CANDIDATES: usize = 100;

// ============================================================================
// CRITERIA
// ============================================================================

/// Structured search criteria, usually derived from extracted entities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchCriteria {
    pub age_range: Option<(u32, u32)>,
    pub gender: Option<Gender>,
    pub locations: Vec<String>,
    pub languages: Vec<String>,
    pub skills: Vec<String>,
    pub required_keywords: Vec<String>,
    pub height_range_cm: Option<(f32, f32)>,
    pub budget: Option<(f64, f64)>,
    pub availability: Option<(NaiveDate, NaiveDate)>,
}

impl SearchCriteria {
    /// Build criteria from extracted entities
    pub fn from_entities(entities: &[Entity]) -> Self {
        let mut criteria = Self::default();
        let mut dates: Vec<NaiveDate> = Vec::new();
        for entity in entities {
            match (&entity.kind, &entity.value) {
                (EntityKind::AgeRange, EntityValue::AgeRange { min, max }) => {
                    criteria.age_range = Some((*min, *max));
                }
                (EntityKind::Gender, EntityValue::Gender(g)) => criteria.gender = Some(*g),
                (EntityKind::Location, EntityValue::Text(t)) => {
                    criteria.locations.push(t.to_lowercase());
                }
                (EntityKind::Language, EntityValue::Text(t)) => {
                    criteria.languages.push(t.to_lowercase());
                }
                (EntityKind::Skill, EntityValue::Text(t)) => {
                    criteria.skills.push(t.to_lowercase());
                }
                (EntityKind::Date, EntityValue::Date(d)) => dates.push(*d),
                (EntityKind::Date, EntityValue::DateRange { from, to }) => {
                    criteria.availability = Some((*from, *to));
                }
                _ => {}
            }
        }
        if criteria.availability.is_none() {
            if let (Some(&first), Some(&last)) = (dates.iter().min(), dates.iter().max()) {
                criteria.availability = Some((first, last));
            }
        }
        criteria
    }

    /// Metadata pre-filter for the vector index (the hard-cut subset of
    /// the criteria; score-shaping signals stay out of the filter)
    pub fn to_filter(&self) -> Option<Filter> {
        let mut clauses = vec![Filter::eq("status", "active")];
        if let Some(g) = self.gender {
            clauses.push(Filter::eq("gender", g.as_str()));
        }
        if self.locations.len() == 1 {
            // A single requested location is a strong constraint; several
            // become the soft multiplier in the attribute stage instead.
            clauses.push(Filter::eq("location", self.locations[0].clone()));
        }
        if !self.languages.is_empty() {
            clauses.push(Filter::Or(
                self.languages
                    .iter()
                    .map(|l| Filter::eq("languages", l.clone()))
                    .collect(),
            ));
        }
        Filter::all(clauses)
    }

    pub fn is_empty(&self) -> bool {
        self.age_range.is_none()
            && self.gender.is_none()
            && self.locations.is_empty()
            && self.languages.is_empty()
            && self.skills.is_empty()
            && self.required_keywords.is_empty()
            && self.height_range_cm.is_none()
            && self.budget.is_none()
            && self.availability.is_none()
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Per-signal sub-scores, each in [0, 1]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalScores {
    pub semantic: f64,
    pub keyword: f64,
    pub attribute: f64,
    pub availability: f64,
    pub budget: f64,
}

/// One ranked search result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
    pub talent_id: String,
    pub name: String,
    /// Fused score in [0, 1]
    pub composite_score: f64,
    pub signals: SignalScores,
    /// 1-based position after diversity injection
    pub rank: usize,
    pub explanation: String,
    pub metadata: Metadata,
}

/// Search outcome with degradation report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub results: Vec<RankedResult>,
    /// Signals that failed and were defaulted ("semantic", "vector_index",
    /// "availability", ...)
    pub degraded: Vec<String>,
    pub total_candidates: usize,
}

/// Weights fusing the sub-signals into the composite score
#[derive(Debug, Clone, Copy)]
pub struct FusionWeights {
    pub semantic: f64,
    pub keyword: f64,
    pub attribute: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.6,
            keyword: 0.2,
            attribute: 0.2,
        }
    }
}

// ============================================================================
// AVAILABILITY PROVIDER
// ============================================================================

/// Availability check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    Available,
    Unknown,
    Busy,
}

/// Availability report for a date range
#[derive(Debug, Clone, Copy)]
pub struct AvailabilityReport {
    /// Score in [0, 1]
    pub score: f64,
    pub status: AvailabilityStatus,
}

/// External scheduling system contract. The default implementation in the
/// pipeline falls back to the profile's declared availability window.
#[async_trait]
pub trait AvailabilityProvider: Send + Sync {
    async fn check(&self, talent_id: &str, from: NaiveDate, to: NaiveDate)
        -> Result<AvailabilityReport>;
}

/// Diversity bucket: (age decade, gender, location)
pub(crate) fn diversity_bucket(metadata: &Metadata) -> (u32, String, String) {
    let age_bucket = metadata
        .get("age")
        .and_then(MetaValue::as_num)
        .map(|a| (a / 10.0) as u32)
        .unwrap_or(0);
    let gender = metadata
        .get("gender")
        .and_then(MetaValue::as_str)
        .unwrap_or("unknown")
        .to_string();
    let location = metadata
        .get("location")
        .and_then(MetaValue::as_str)
        .unwrap_or("unknown")
        .to_string();
    (age_bucket, gender, location)
}

// ============================================================================
// TESTS
// ============================================================================
