//! Talent profile - the unit of retrieval
//!
//! Profiles are owned by the profile store; the vector index and every
//! cache are derived views that can be rebuilt from it at any time.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::index::{MetaValue, Metadata};

// ============================================================================
// ENUMS
// ============================================================================

/// Normalised gender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Other => "other",
        }
    }

    /// Parse from free text, accepting the synonyms the extractor emits
    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "male" | "m" | "man" | "men" | "boy" | "actor" => Some(Gender::Male),
            "female" | "f" | "woman" | "women" | "girl" | "actress" => Some(Gender::Female),
            "other" | "non-binary" | "nonbinary" | "nb" => Some(Gender::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Profile lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TalentStatus {
    #[default]
    Active,
    Archived,
}

impl TalentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TalentStatus::Active => "active",
            TalentStatus::Archived => "archived",
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "archived" => TalentStatus::Archived,
            _ => TalentStatus::Active,
        }
    }
}

// ============================================================================
// RANGES
// ============================================================================

/// Daily-rate budget range in minor currency units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetRange {
    pub min: f64,
    pub max: f64,
}

impl BudgetRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min: min.min(max), max: max.max(min) }
    }

    pub fn width(&self) -> f64 {
        (self.max - self.min).max(0.0)
    }

    /// Overlap score against an asked range: 0 only when disjoint,
    /// otherwise overlap length over the narrower of the two ranges.
    /// Ranges that merely touch still score positive.
    pub fn overlap_score(&self, ask_min: f64, ask_max: f64) -> f64 {
        let lo = self.min.max(ask_min);
        let hi = self.max.min(ask_max);
        if hi < lo {
            return 0.0;
        }
        let narrower = self.width().min((ask_max - ask_min).max(0.0));
        if narrower <= 0.0 {
            // Point ranges that touch count as a full overlap
            return 1.0;
        }
        (((hi - lo) / narrower).clamp(0.0, 1.0)).max(0.01)
    }
}

/// Declared availability window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityWindow {
    pub from: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
}

impl AvailabilityWindow {
    pub fn covers(&self, from: NaiveDate, to: NaiveDate) -> bool {
        let starts_ok = self.from.map(|f| f <= from).unwrap_or(true);
        let ends_ok = self.until.map(|u| u >= to).unwrap_or(true);
        starts_ok && ends_ok
    }
}

// ============================================================================
// TALENT PROFILE
// ============================================================================

/// A talent profile
///
/// Immutable id; every mutation arrives through the index manager as an
/// upsert event from the (out-of-scope) admin system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TalentProfile {
    pub id: String,
    pub name: String,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    pub location: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub experience_years: Option<f32>,
    pub height_cm: Option<f32>,
    pub availability: Option<AvailabilityWindow>,
    pub budget: Option<BudgetRange>,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub status: TalentStatus,

    // Popularity / track-record counters used by the ranking engine
    #[serde(default)]
    pub followers: u64,
    pub rating: Option<f32>,
    #[serde(default)]
    pub awards: u32,
    #[serde(default)]
    pub project_count: u32,
    pub last_project_date: Option<NaiveDate>,
    #[serde(default)]
    pub trending: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for TalentProfile {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: String::new(),
            age: None,
            gender: None,
            location: None,
            languages: vec![],
            skills: vec![],
            experience_years: None,
            height_cm: None,
            availability: None,
            budget: None,
            bio: String::new(),
            status: TalentStatus::Active,
            followers: 0,
            rating: None,
            awards: 0,
            project_count: 0,
            last_project_date: None,
            trending: false,
            created_at: now,
            updated_at: now,
        }
    }
}

impl TalentProfile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Canonical searchable text: the keyword overlay and the embedding
    /// pipeline both read from this, so the two signals agree on content.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.name];
        if let Some(loc) = &self.location {
            parts.push(loc);
        }
        for s in &self.skills {
            parts.push(s);
        }
        for l in &self.languages {
            parts.push(l);
        }
        if !self.bio.is_empty() {
            parts.push(&self.bio);
        }
        parts.join(" ").to_lowercase()
    }

    /// Flat metadata view stored alongside the profile vector.
    pub fn to_metadata(&self) -> Metadata {
        let mut m = Metadata::new();
        m.insert("name".into(), MetaValue::Str(self.name.clone()));
        if let Some(age) = self.age {
            m.insert("age".into(), MetaValue::Num(age as f64));
        }
        if let Some(g) = self.gender {
            m.insert("gender".into(), MetaValue::Str(g.as_str().to_string()));
        }
        if let Some(loc) = &self.location {
            m.insert("location".into(), MetaValue::Str(loc.to_lowercase()));
        }
        if !self.languages.is_empty() {
            m.insert(
                "languages".into(),
                MetaValue::List(self.languages.iter().map(|l| l.to_lowercase()).collect()),
            );
        }
        if !self.skills.is_empty() {
            m.insert(
                "skills".into(),
                MetaValue::List(self.skills.iter().map(|s| s.to_lowercase()).collect()),
            );
        }
        if let Some(h) = self.height_cm {
            m.insert("heightCm".into(), MetaValue::Num(h as f64));
        }
        if let Some(b) = &self.budget {
            m.insert("budgetMin".into(), MetaValue::Num(b.min));
            m.insert("budgetMax".into(), MetaValue::Num(b.max));
        }
        if let Some(exp) = self.experience_years {
            m.insert("experienceYears".into(), MetaValue::Num(exp as f64));
        }
        m.insert("status".into(), MetaValue::Str(self.status.as_str().to_string()));
        m
    }

    pub fn is_active(&self) -> bool {
        self.status == TalentStatus::Active
    }
}

// ============================================================================
// TESTS
// ============================================================================
