//! Intent classification cascade
//!
//! 1. Table-driven scoring: `0.4 * keyword + 0.3 * entity + 0.3 * regex`
//!    per intent, best score wins.
//! 2. Below [`ENCODER_THRESHOLD`], and when a sentence encoder is wired,
//!    cosine similarity of the utterance to each intent's example
//!    centroid.
//! 3. Below [`CLASSIFIER_FLOOR`], `GeneralInquiry` at confidence 0.5.

use std::sync::Arc;

use regex::Regex;
use tokio::sync::OnceCell;

use crate::embedding::{cosine_similarity, EmbeddingPipeline};

use super::entities::{extract_entities, merge_with_history, Entity, EntityKind};
use super::{Analysis, Intent, Urgency};

/// Pattern scores below this trigger the encoder pass
pub const ENCODER_THRESHOLD: f64 = 0.5;

/// Scores below this fall back to `GeneralInquiry`
pub const CLASSIFIER_FLOOR: f64 = 0.2;

// ============================================================================
// PATTERN TABLE
// ============================================================================

struct IntentPattern {
    intent: Intent,
    keywords: &'static [&'static str],
    regexes: &'static [&'static str],
    entity_hints: &'static [EntityKind],
    examples: &'static [&'static str],
}

const PATTERNS: &[IntentPattern] = &[
    IntentPattern {
        intent: Intent::SearchTalent,
        keywords: &["find", "search", "need", "looking", "show", "casting"],
        regexes: &[
            r"(find|search|looking for|need|show me|get me)\b.*\b(talent|actor|actress|artist|performer|dancer|singer|lead|villain|someone)",
            r"(who can|anyone who|someone who)\s+(play|act|perform|dance|sing)",
        ],
        entity_hints: &[
            EntityKind::AgeRange,
            EntityKind::Gender,
            EntityKind::Location,
            EntityKind::Skill,
            EntityKind::RoleType,
        ],
        examples: &[
            "find me dancers in mumbai",
            "looking for a female lead aged 25 to 30",
            "i need an experienced actor for a web series",
            "show me singers who speak tamil",
        ],
    },
    IntentPattern {
        intent: Intent::ViewProfile,
        keywords: &["profile", "portfolio", "details", "about"],
        regexes: &[
            r"(show|view|see|display|open|check)\b.*\b(profile|portfolio|details|information)",
            r"(tell me|what about|info on|more about|details of)\s+",
        ],
        entity_hints: &[EntityKind::Name],
        examples: &[
            "show me her profile",
            "tell me more about asha verma",
            "open the portfolio for this actor",
        ],
    },
    IntentPattern {
        intent: Intent::ScheduleAudition,
        keywords: &["schedule", "audition", "book", "arrange", "slot"],
        regexes: &[
            r"(schedule|book|arrange|set up|plan)\b.*\b(audition|casting|meeting|screen test)",
            r"(audition|casting)\s+(time|date|slot|schedule)",
        ],
        entity_hints: &[EntityKind::Date, EntityKind::Name],
        examples: &[
            "schedule an audition for monday",
            "book a casting slot next week",
            "set up a screen test with her",
        ],
    },
    IntentPattern {
        intent: Intent::AnalyzeScript,
        keywords: &["script", "screenplay", "scene", "breakdown"],
        regexes: &[
            r"(analyze|analyse|review|read|break down)\b.*\b(script|screenplay|scene)",
            r"(script|screenplay)\s+(analysis|breakdown|requirements)",
            r"(character|role)\s+(requirements|breakdown|description)",
            r"break\s+down\b.*\b(character|script|screenplay|scene)",
        ],
        entity_hints: &[EntityKind::ProjectType],
        examples: &[
            "analyze this script for me",
            "break down the characters in this screenplay",
            "what roles does this scene need",
        ],
    },
    IntentPattern {
        intent: Intent::CheckAvailability,
        keywords: &["available", "availability", "free", "busy", "dates"],
        regexes: &[
            r"(is|are)\s+.*(available|free|busy)",
            r"(availability|schedule|calendar)\s+(of|for)",
            r"(when|what dates)\s+.*(available|free)",
        ],
        entity_hints: &[EntityKind::Date, EntityKind::Name],
        examples: &[
            "is she available in march",
            "check availability for next month",
            "what dates is he free",
        ],
    },
    IntentPattern {
        intent: Intent::DiscussBudget,
        keywords: &["budget", "rate", "fee", "cost", "charge", "price"],
        regexes: &[
            r"(budget|rate|fee|cost|charges?|price|quote)\b",
            r"(how much|what does)\s+.*\b(cost|charge)",
        ],
        entity_hints: &[],
        examples: &[
            "what is her daily rate",
            "our budget is five lakhs",
            "how much does he charge per day",
        ],
    },
    IntentPattern {
        intent: Intent::RequestRecommendation,
        keywords: &["recommend", "suggest", "best", "suitable", "ideas"],
        regexes: &[
            r"(recommend|suggest|who should|best for)",
            r"(recommendations|suggestions)\s+(for|about)",
            r"(who would be|suitable for|perfect for|good fit)",
        ],
        entity_hints: &[EntityKind::RoleType, EntityKind::ProjectType],
        examples: &[
            "who do you recommend for this role",
            "suggest someone for the villain",
            "who would be perfect for a romantic lead",
        ],
    },
    IntentPattern {
        intent: Intent::CompareTalents,
        keywords: &["compare", "versus", "vs", "difference", "between"],
        regexes: &[
            r"(compare|versus|\bvs\b|difference between|choose between)",
            r"(which|who)\s+(is better|should i choose|should i pick)",
        ],
        entity_hints: &[EntityKind::Name],
        examples: &[
            "compare these two actors",
            "who is better for the lead",
            "asha versus meera for this role",
        ],
    },
    IntentPattern {
        intent: Intent::ContractNegotiation,
        keywords: &["contract", "agreement", "terms", "negotiate", "clause"],
        regexes: &[
            r"(contract|agreement|terms|clause|paperwork)",
            r"(negotiate|finalize|sign)\b.*\b(deal|contract|agreement)",
        ],
        entity_hints: &[EntityKind::Name],
        examples: &[
            "draft the contract terms",
            "we need to negotiate her agreement",
            "finalize the deal with him",
        ],
    },
    IntentPattern {
        intent: Intent::Feedback,
        keywords: &["feedback", "loved", "liked", "disliked", "terrible", "great"],
        regexes: &[
            r"(feedback|review)\s+(on|about|for)",
            r"\b(loved|liked|disliked|hated)\b.*\b(audition|performance|actor|talent)",
        ],
        entity_hints: &[EntityKind::Name],
        examples: &[
            "the audition yesterday was great",
            "feedback on her performance",
            "we did not like his screen test",
        ],
    },
    IntentPattern {
        intent: Intent::TechnicalSupport,
        keywords: &["error", "bug", "broken", "login", "crash", "loading"],
        regexes: &[
            r"(error|bug|broken|crash|not working|won't load|cannot log)",
            r"(help|support)\s+(with|me)\s+(the|this)?\s*(app|site|platform)",
        ],
        entity_hints: &[],
        examples: &[
            "the search page keeps crashing",
            "i cannot log in to my account",
            "getting an error when uploading",
        ],
    },
];

// ============================================================================
// SENTIMENT / URGENCY / DOMAIN LEXICONS
// ============================================================================

const POSITIVE: &[&str] = &[
    "great", "good", "excellent", "amazing", "love", "loved", "perfect", "wonderful",
    "fantastic", "impressed", "brilliant",
];
const NEGATIVE: &[&str] = &[
    "bad", "poor", "terrible", "awful", "hate", "hated", "disappointed", "worst",
    "unhappy", "frustrated", "angry",
];
const URGENT: &[&str] = &["urgent", "urgently", "asap", "immediately", "now", "emergency"];
const RELAXED: &[&str] = &["whenever", "eventually", "someday", "no rush", "no hurry"];

const DOMAINS: &[&str] = &[
    "drama", "comedy", "action", "romance", "thriller", "horror", "documentary",
    "musical", "commercial", "web series", "theatre",
];

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Intent classifier with optional encoder-backed fallback
pub struct IntentClassifier {
    compiled: Vec<Vec<Regex>>,
    encoder: Option<Arc<EmbeddingPipeline>>,
    centroids: OnceCell<Vec<(Intent, Vec<f32>)>>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        let compiled = PATTERNS
            .iter()
            .map(|p| {
                p.regexes
                    .iter()
                    .map(|r| Regex::new(r).expect("static intent regex"))
                    .collect()
            })
            .collect();
        Self {
            compiled,
            encoder: None,
            centroids: OnceCell::new(),
        }
    }

    /// Enable the encoder fallback stage
    pub fn with_encoder(mut self, encoder: Arc<EmbeddingPipeline>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    /// Analyse an utterance; `history` supplies earlier user turns whose
    /// entities carry over at 0.7x weight.
    pub async fn analyze(&self, text: &str, history: &[String]) -> Analysis {
        let lower = text.to_lowercase();
        let entities = extract_entities(text);

        let (mut intent, mut confidence) = self.pattern_score(&lower, &entities);

        if confidence < ENCODER_THRESHOLD {
            if let Some((enc_intent, enc_confidence)) = self.encoder_score(text).await {
                if enc_confidence > confidence {
                    intent = enc_intent;
                    confidence = enc_confidence;
                }
            }
        }
        if confidence < CLASSIFIER_FLOOR {
            intent = Intent::GeneralInquiry;
            confidence = 0.5;
        }

        let mut merged = entities;
        for earlier in history {
            merged = merge_with_history(merged, extract_entities(earlier));
        }

        let domain = DOMAINS
            .iter()
            .find(|d| lower.contains(*d))
            .or_else(|| {
                history.iter().find_map(|h| {
                    let h = h.to_lowercase();
                    DOMAINS.iter().find(|d| h.contains(*d))
                })
            })
            .map(|d| d.to_string());

        Analysis {
            intent,
            confidence,
            entities: merged,
            sentiment: sentiment(&lower),
            urgency: urgency(&lower),
            domain,
        }
    }

    /// Stage (i): table-driven scoring
    fn pattern_score(&self, lower: &str, entities: &[Entity]) -> (Intent, f64) {
        let mut best = (Intent::GeneralInquiry, 0.0_f64);
        for (pattern, regexes) in PATTERNS.iter().zip(&self.compiled) {
            let keyword_hits = pattern
                .keywords
                .iter()
                .filter(|k| contains_word(lower, k))
                .count();
            let keyword_ratio = keyword_hits as f64 / pattern.keywords.len() as f64;

            let entity_ratio = if pattern.entity_hints.is_empty() {
                0.0
            } else {
                let hits = pattern
                    .entity_hints
                    .iter()
                    .filter(|hint| entities.iter().any(|e| e.kind == **hint))
                    .count();
                hits as f64 / pattern.entity_hints.len() as f64
            };

            let regex_hits = regexes.iter().filter(|r| r.is_match(lower)).count();
            let regex_ratio = regex_hits as f64 / regexes.len().max(1) as f64;

            let score = 0.4 * keyword_ratio + 0.3 * entity_ratio + 0.3 * regex_ratio;
            if score > best.1 {
                best = (pattern.intent, score);
            }
        }
        (best.0, best.1.min(1.0))
    }

    /// Stage (ii): cosine similarity to intent example centroids
    async fn encoder_score(&self, text: &str) -> Option<(Intent, f64)> {
        let encoder = self.encoder.as_ref()?;
        let centroids = self
            .centroids
            .get_or_try_init(|| async {
                let mut out = Vec::with_capacity(PATTERNS.len());
                for pattern in PATTERNS {
                    let examples: Vec<String> =
                        pattern.examples.iter().map(|e| e.to_string()).collect();
                    let vectors = encoder.embed_batch(&examples).await?;
                    let dim = encoder.dim();
                    let mut centroid = vec![0.0_f32; dim];
                    for v in &vectors {
                        for (c, x) in centroid.iter_mut().zip(v) {
                            *c += x;
                        }
                    }
                    for c in centroid.iter_mut() {
                        *c /= vectors.len().max(1) as f32;
                    }
                    out.push((pattern.intent, centroid));
                }
                Ok::<_, crate::error::CoreError>(out)
            })
            .await
            .ok()?;

        let utterance = encoder.embed(text).await.ok()?;
        centroids
            .iter()
            .map(|(intent, centroid)| {
                (*intent, cosine_similarity(&utterance, centroid) as f64)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(intent, score)| (intent, score.clamp(0.0, 1.0)))
    }
}

fn sentiment(lower: &str) -> f64 {
    let pos = POSITIVE.iter().filter(|w| contains_word(lower, w)).count() as f64;
    let neg = NEGATIVE.iter().filter(|w| contains_word(lower, w)).count() as f64;
    if pos + neg == 0.0 {
        0.0
    } else {
        (pos - neg) / (pos + neg)
    }
}

fn urgency(lower: &str) -> Urgency {
    if URGENT.iter().any(|w| lower.contains(w)) {
        Urgency::High
    } else if RELAXED.iter().any(|w| lower.contains(w)) {
        Urgency::Low
    } else {
        Urgency::Normal
    }
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}

// ============================================================================
// TESTS
// ============================================================================
