//! Intent & Entity Extraction
//!
//! Maps utterances to a closed intent set with typed entity slots. The
//! classifier is an ordered cascade: pattern scoring first, an optional
//! sentence-encoder similarity pass for low-confidence inputs, and a
//! `GeneralInquiry` floor so routing always has something to work with.

mod entities;
mod intent;
pub mod script;

pub use entities::{extract_entities, Entity, EntityKind, EntityValue};
pub use intent::{IntentClassifier, CLASSIFIER_FLOOR, ENCODER_THRESHOLD};
pub use script::{CastingRequirement, CharacterProfile, ScriptAnalysis, ScriptAnalyzer};

use serde::{Deserialize, Serialize};

// ============================================================================
// INTENTS
// ============================================================================

/// The closed casting intent set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    SearchTalent,
    ViewProfile,
    ScheduleAudition,
    AnalyzeScript,
    CheckAvailability,
    DiscussBudget,
    RequestRecommendation,
    CompareTalents,
    ContractNegotiation,
    Feedback,
    TechnicalSupport,
    GeneralInquiry,
}

impl Intent {
    pub const ALL: [Intent; 12] = [
        Intent::SearchTalent,
        Intent::ViewProfile,
        Intent::ScheduleAudition,
        Intent::AnalyzeScript,
        Intent::CheckAvailability,
        Intent::DiscussBudget,
        Intent::RequestRecommendation,
        Intent::CompareTalents,
        Intent::ContractNegotiation,
        Intent::Feedback,
        Intent::TechnicalSupport,
        Intent::GeneralInquiry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::SearchTalent => "search_talent",
            Intent::ViewProfile => "view_profile",
            Intent::ScheduleAudition => "schedule_audition",
            Intent::AnalyzeScript => "analyze_script",
            Intent::CheckAvailability => "check_availability",
            Intent::DiscussBudget => "discuss_budget",
            Intent::RequestRecommendation => "request_recommendation",
            Intent::CompareTalents => "compare_talents",
            Intent::ContractNegotiation => "contract_negotiation",
            Intent::Feedback => "feedback",
            Intent::TechnicalSupport => "technical_support",
            Intent::GeneralInquiry => "general_inquiry",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How soon the user needs an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    High,
}

// ============================================================================
// ANALYSIS RESULT
// ============================================================================

/// Result of analysing one utterance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub intent: Intent,
    /// Classifier confidence in [0, 1]
    pub confidence: f64,
    pub entities: Vec<Entity>,
    /// Sentiment polarity in [-1, 1]
    pub sentiment: f64,
    pub urgency: Urgency,
    /// Detected genre/domain keyword, when present ("drama", "comedy", ...)
    pub domain: Option<String>,
}

impl Analysis {
    /// First entity of a kind, if extracted
    pub fn entity(&self, kind: EntityKind) -> Option<&Entity> {
        self.entities.iter().find(|e| e.kind == kind)
    }

    /// All entities of a kind
    pub fn entities_of(&self, kind: EntityKind) -> Vec<&Entity> {
        self.entities.iter().filter(|e| e.kind == kind).collect()
    }
}
