//! Typed entity extraction
//!
//! Pattern- and gazetteer-driven slot filling. Every extractor emits
//! `Entity` values with a per-slot confidence; the caller resolves
//! conflicts by keeping the highest-confidence value per kind.

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::talent::Gender;

// ============================================================================
// TYPES
// ============================================================================

/// Entity slot kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    AgeRange,
    Gender,
    Location,
    Language,
    Skill,
    ExperienceLevel,
    RoleType,
    ProjectType,
    Date,
    Name,
}

/// Normalised entity value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityValue {
    AgeRange { min: u32, max: u32 },
    Gender(Gender),
    Date(NaiveDate),
    DateRange { from: NaiveDate, to: NaiveDate },
    Text(String),
}

/// One extracted entity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub kind: EntityKind,
    pub value: EntityValue,
    pub confidence: f64,
}

impl Entity {
    fn text(kind: EntityKind, value: impl Into<String>, confidence: f64) -> Self {
        Self { kind, value: EntityValue::Text(value.into()), confidence }
    }
}

// ============================================================================
// GAZETTEERS
// ============================================================================

const LOCATIONS: &[&str] = &[
    "mumbai", "delhi", "bangalore", "bengaluru", "chennai", "kolkata", "hyderabad",
    "pune", "goa", "jaipur", "lucknow", "ahmedabad", "kochi", "london", "new york",
    "los angeles", "dubai", "singapore", "toronto",
];

const LANGUAGES: &[&str] = &[
    "hindi", "english", "tamil", "telugu", "marathi", "bengali", "punjabi",
    "kannada", "malayalam", "gujarati", "urdu", "bhojpuri", "spanish", "french",
    "german", "mandarin", "arabic",
];

const SKILLS: &[(&str, &str)] = &[
    ("dancer", "dance"),
    ("dancing", "dance"),
    ("dance", "dance"),
    ("singer", "singing"),
    ("singing", "singing"),
    ("vocalist", "singing"),
    ("martial arts", "martial arts"),
    ("stunt", "stunts"),
    ("stunts", "stunts"),
    ("comedian", "comedy"),
    ("comedy", "comedy"),
    ("acting", "acting"),
    ("theatre", "theatre"),
    ("theater", "theatre"),
    ("horse riding", "horse riding"),
    ("swimming", "swimming"),
    ("piano", "piano"),
    ("guitar", "guitar"),
    ("mimicry", "mimicry"),
    ("anchoring", "anchoring"),
    ("modeling", "modeling"),
    ("modelling", "modeling"),
];

const ROLE_TYPES: &[(&str, &str)] = &[
    ("lead", "lead"),
    ("leads", "lead"),
    ("protagonist", "lead"),
    ("hero", "lead"),
    ("heroine", "lead"),
    ("supporting", "supporting"),
    ("side role", "supporting"),
    ("cameo", "cameo"),
    ("antagonist", "antagonist"),
    ("villain", "antagonist"),
    ("extra", "background"),
    ("background", "background"),
];

const PROJECT_TYPES: &[(&str, &str)] = &[
    ("web series", "web series"),
    ("webseries", "web series"),
    ("tv serial", "tv serial"),
    ("tv show", "tv serial"),
    ("serial", "tv serial"),
    ("film", "film"),
    ("movie", "film"),
    ("feature", "film"),
    ("short film", "short film"),
    ("commercial", "commercial"),
    ("advert", "commercial"),
    (" ad ", "commercial"),
    ("documentary", "documentary"),
    ("music video", "music video"),
    ("play", "theatre"),
    ("drama", "drama"),
];

struct Patterns {
    age_range: Regex,
    age_between: Regex,
    age_decade: Regex,
    age_exact: Regex,
    date_iso: Regex,
    date_slash: Regex,
    name: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        age_range: Regex::new(r"(?:aged?\s+)?(\d{1,2})\s*(?:-|–|\bto\b)\s*(\d{1,2})\s*(?:years?\s*old|yrs?)?")
            .expect("static regex"),
        age_between: Regex::new(r"between\s+(\d{1,2})\s+and\s+(\d{1,2})").expect("static regex"),
        age_decade: Regex::new(r"in\s+(?:their|his|her)\s+(\d)0s").expect("static regex"),
        age_exact: Regex::new(r"(?:aged?\s+(\d{1,2})\b|(\d{1,2})[-\s]years?[-\s]old)").expect("static regex"),
        date_iso: Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("static regex"),
        date_slash: Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("static regex"),
        name: Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").expect("static regex"),
    })
}

// ============================================================================
// EXTRACTION
// ============================================================================

/// Extract every typed entity found in `text`
pub fn extract_entities(text: &str) -> Vec<Entity> {
    let lower = text.to_lowercase();
    let p = patterns();
    let mut out = Vec::new();

    // Age - explicit ranges beat decade phrasing beats exact +/- 2
    if let Some(caps) = p.age_range.captures(&lower).or_else(|| p.age_between.captures(&lower)) {
        if let (Ok(min), Ok(max)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>()) {
            if min <= max && (5..=99).contains(&min) {
                out.push(Entity {
                    kind: EntityKind::AgeRange,
                    value: EntityValue::AgeRange { min, max },
                    confidence: 0.9,
                });
            }
        }
    } else if let Some(caps) = p.age_decade.captures(&lower) {
        if let Ok(decade) = caps[1].parse::<u32>() {
            out.push(Entity {
                kind: EntityKind::AgeRange,
                value: EntityValue::AgeRange { min: decade * 10, max: decade * 10 + 9 },
                confidence: 0.8,
            });
        }
    } else if let Some(caps) = p.age_exact.captures(&lower) {
        let age: Option<u32> = caps.get(1).or(caps.get(2)).and_then(|m| m.as_str().parse().ok());
        if let Some(age) = age {
            out.push(Entity {
                kind: EntityKind::AgeRange,
                value: EntityValue::AgeRange {
                    min: age.saturating_sub(2),
                    max: age + 2,
                },
                confidence: 0.7,
            });
        }
    }

    // Gender - scan for unambiguous markers
    for (marker, gender, confidence) in [
        ("female", Gender::Female, 0.95),
        ("male", Gender::Male, 0.95),
        ("actress", Gender::Female, 0.8),
        ("woman", Gender::Female, 0.85),
        ("women", Gender::Female, 0.85),
        ("man ", Gender::Male, 0.6),
        ("men ", Gender::Male, 0.6),
    ] {
        // "female" contains "male": check word boundaries by hand
        let found = lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| w == marker.trim());
        if found {
            out.push(Entity {
                kind: EntityKind::Gender,
                value: EntityValue::Gender(gender),
                confidence,
            });
            break;
        }
    }

    // Gazetteer slots
    for loc in LOCATIONS {
        if lower.contains(loc) {
            out.push(Entity::text(EntityKind::Location, *loc, 0.9));
        }
    }
    for lang in LANGUAGES {
        if contains_word(&lower, lang) {
            out.push(Entity::text(EntityKind::Language, *lang, 0.85));
        }
    }
    for (marker, skill) in SKILLS {
        if lower.contains(marker) && !out.iter().any(|e| {
            e.kind == EntityKind::Skill && e.value == EntityValue::Text(skill.to_string())
        }) {
            out.push(Entity::text(EntityKind::Skill, *skill, 0.8));
        }
    }
    for (marker, level) in [
        ("fresher", "fresher"),
        ("newcomer", "fresher"),
        ("beginner", "fresher"),
        ("experienced", "experienced"),
        ("seasoned", "experienced"),
        ("veteran", "veteran"),
    ] {
        if contains_word(&lower, marker) {
            out.push(Entity::text(EntityKind::ExperienceLevel, level, 0.8));
            break;
        }
    }
    for (marker, role) in ROLE_TYPES {
        if contains_word(&lower, marker.trim()) {
            out.push(Entity::text(EntityKind::RoleType, *role, 0.75));
            break;
        }
    }
    for (marker, project) in PROJECT_TYPES {
        if lower.contains(marker) {
            out.push(Entity::text(EntityKind::ProjectType, *project, 0.75));
            break;
        }
    }

    // Dates - relative phrases first, then absolute formats
    let today = Utc::now().date_naive();
    if contains_word(&lower, "today") {
        out.push(date_entity(today, 0.9));
    } else if contains_word(&lower, "tomorrow") {
        out.push(date_entity(today + Duration::days(1), 0.9));
    } else if lower.contains("next week") {
        out.push(Entity {
            kind: EntityKind::Date,
            value: EntityValue::DateRange {
                from: today + Duration::days(7),
                to: today + Duration::days(14),
            },
            confidence: 0.7,
        });
    } else if lower.contains("next month") {
        out.push(Entity {
            kind: EntityKind::Date,
            value: EntityValue::DateRange {
                from: today + Duration::days(30),
                to: today + Duration::days(60),
            },
            confidence: 0.6,
        });
    }
    if let Some(caps) = p.date_iso.captures(text) {
        if let Some(date) = ymd(&caps[1], &caps[2], &caps[3]) {
            out.push(date_entity(date, 0.95));
        }
    }
    if let Some(caps) = p.date_slash.captures(text) {
        // dd/mm/yyyy
        if let Some(date) = ymd(&caps[3], &caps[2], &caps[1]) {
            out.push(date_entity(date, 0.8));
        }
    }

    // Capitalised word sequences as candidate names; gazetteer towns are
    // capitalised too, so filter those back out.
    for caps in p.name.captures_iter(text) {
        let candidate = caps[1].to_string();
        let lower_candidate = candidate.to_lowercase();
        if LOCATIONS.contains(&lower_candidate.as_str()) {
            continue;
        }
        out.push(Entity::text(EntityKind::Name, candidate, 0.5));
    }

    out
}

/// Merge entities extracted from conversation history into `current` at
/// reduced weight. Conflicts resolve to the highest confidence per kind
/// (names and multi-value slots accumulate instead).
pub fn merge_with_history(mut current: Vec<Entity>, history: Vec<Entity>) -> Vec<Entity> {
    const HISTORY_WEIGHT: f64 = 0.7;
    const MULTI_VALUE: [EntityKind; 4] = [
        EntityKind::Skill,
        EntityKind::Language,
        EntityKind::Location,
        EntityKind::Name,
    ];

    for mut old in history {
        old.confidence *= HISTORY_WEIGHT;
        if MULTI_VALUE.contains(&old.kind) {
            let duplicate = current
                .iter()
                .any(|e| e.kind == old.kind && e.value == old.value);
            if !duplicate {
                current.push(old);
            }
            continue;
        }
        match current.iter_mut().find(|e| e.kind == old.kind) {
            Some(existing) if existing.confidence < old.confidence => *existing = old,
            Some(_) => {}
            None => current.push(old),
        }
    }
    current
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}

fn date_entity(date: NaiveDate, confidence: f64) -> Entity {
    Entity {
        kind: EntityKind::Date,
        value: EntityValue::Date(date),
        confidence,
    }
}

fn ymd(y: &str, m: &str, d: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
        .filter(|date| date.year() >= 1900)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(entities: &[Entity]) -> Vec<EntityKind> {
        entities.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_age_range_extraction() {
        let entities = extract_entities("find leads aged 25-30 in Mumbai");
        let age = entities.iter().find(|e| e.kind == EntityKind::AgeRange).unwrap();
        assert_eq!(age.value, EntityValue::AgeRange { min: 25, max: 30 });
    }

    #[test]
    fn test_exact_age_gets_tolerance() {
        let entities = extract_entities("a 28 year old actor");
        let age = entities.iter().find(|e| e.kind == EntityKind::AgeRange).unwrap();
        assert_eq!(age.value, EntityValue::AgeRange { min: 26, max: 30 });
    }

    #[test]
    fn test_decade_phrasing() {
        let entities = extract_entities("someone in their 30s");
        let age = entities.iter().find(|e| e.kind == EntityKind::AgeRange).unwrap();
        assert_eq!(age.value, EntityValue::AgeRange { min: 30, max: 39 });
    }

    #[test]
    fn test_gender_female_not_confused_by_male_substring() {
        let entities = extract_entities("looking for a female lead");
        let gender = entities.iter().find(|e| e.kind == EntityKind::Gender).unwrap();
        assert_eq!(gender.value, EntityValue::Gender(Gender::Female));
    }

    #[test]
    fn test_location_language_skill() {
        let entities = extract_entities("a dancer from Mumbai who speaks Hindi");
        let ks = kinds(&entities);
        assert!(ks.contains(&EntityKind::Location));
        assert!(ks.contains(&EntityKind::Language));
        assert!(ks.contains(&EntityKind::Skill));

        let skill = entities.iter().find(|e| e.kind == EntityKind::Skill).unwrap();
        assert_eq!(skill.value, EntityValue::Text("dance".into()));
    }

    #[test]
    fn test_role_and_project_type() {
        let entities = extract_entities("need a villain for our web series");
        let role = entities.iter().find(|e| e.kind == EntityKind::RoleType).unwrap();
        assert_eq!(role.value, EntityValue::Text("antagonist".into()));
        let project = entities.iter().find(|e| e.kind == EntityKind::ProjectType).unwrap();
        assert_eq!(project.value, EntityValue::Text("web series".into()));
    }

    #[test]
    fn test_iso_date() {
        let entities = extract_entities("audition on 2026-09-15 please");
        let date = entities.iter().find(|e| e.kind == EntityKind::Date).unwrap();
        assert_eq!(
            date.value,
            EntityValue::Date(NaiveDate::from_ymd_opt(2026, 9, 15).unwrap())
        );
    }

    #[test]
    fn test_name_extraction_skips_gazetteer_cities() {
        let entities = extract_entities("is Asha Verma available in New York");
        let names: Vec<&Entity> = entities.iter().filter(|e| e.kind == EntityKind::Name).collect();
        assert!(names.iter().any(|e| e.value == EntityValue::Text("Asha Verma".into())));
        assert!(!names.iter().any(|e| e.value == EntityValue::Text("New York".into())));
    }

    #[test]
    fn test_history_merge_prefers_fresh_high_confidence() {
        let current = extract_entities("female leads aged 25-30");
        let history = extract_entities("I'm casting for a Hindi drama in Mumbai");
        let merged = merge_with_history(current, history);

        let ks = kinds(&merged);
        // Fresh slots kept
        assert!(ks.contains(&EntityKind::AgeRange));
        assert!(ks.contains(&EntityKind::Gender));
        // Historical context carried over at reduced weight
        let lang = merged.iter().find(|e| e.kind == EntityKind::Language).unwrap();
        assert!((lang.confidence - 0.85 * 0.7).abs() < 1e-9);
        assert!(ks.contains(&EntityKind::Location));
    }
}
