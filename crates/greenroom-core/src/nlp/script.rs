//! Script analysis
//!
//! Screenplay-format parsing: scenes from INT./EXT. headings, characters
//! from dialogue cue lines, traits and emotions from dialogue lexicons.
//! The output feeds casting requirements straight into search criteria.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::talent::Gender;

/// Cue lines that are screenplay directions, not characters
const NON_CHARACTER_CUES: &[&str] = &[
    "INT", "EXT", "FADE IN", "FADE OUT", "CUT TO", "DISSOLVE TO", "THE END",
    "CONTINUED", "TITLE", "SUPER", "MONTAGE",
];

const PERSONALITY_LEXICON: &[(&str, &[&str])] = &[
    ("confident", &["certainly", "obviously", "trust me", "i know", "watch me"]),
    ("aggressive", &["shut up", "get out", "never", "fight", "enough"]),
    ("warm", &["dear", "sweetheart", "thank you", "please", "love"]),
    ("anxious", &["worried", "scared", "what if", "i can't", "afraid"]),
    ("humorous", &["joke", "funny", "laugh", "kidding", "hilarious"]),
    ("authoritative", &["listen", "orders", "must", "command", "immediately"]),
];

const EMOTION_LEXICON: &[(&str, &[&str])] = &[
    ("anger", &["angry", "furious", "rage", "hate"]),
    ("joy", &["happy", "wonderful", "celebrate", "laugh"]),
    ("sadness", &["cry", "tears", "miss", "gone", "lost"]),
    ("fear", &["afraid", "scared", "terrified", "run"]),
    ("love", &["love", "heart", "forever", "beautiful"]),
];

// ============================================================================
// TYPES
// ============================================================================

/// One scene heading
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub heading: String,
    pub interior: bool,
    pub line_number: usize,
}

/// A character assembled from cues and dialogue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterProfile {
    pub name: String,
    pub dialogue_count: usize,
    pub age_range: Option<(u32, u32)>,
    pub gender: Option<Gender>,
    pub personality_traits: Vec<String>,
    pub emotions: Vec<String>,
    pub description: String,
}

/// A casting requirement derived from one character
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastingRequirement {
    pub character: String,
    pub role_type: String,
    pub age_range: Option<(u32, u32)>,
    pub gender: Option<Gender>,
    pub traits: Vec<String>,
    pub description: String,
}

/// Full analysis result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptAnalysis {
    pub scenes: Vec<Scene>,
    pub characters: Vec<CharacterProfile>,
    pub requirements: Vec<CastingRequirement>,
    pub suggestions: Vec<String>,
}

// ============================================================================
// ANALYZER
// ============================================================================

struct ScriptPatterns {
    scene: Regex,
    cue: Regex,
    cue_age: Regex,
    inline_age: Regex,
}

fn script_patterns() -> &'static ScriptPatterns {
    static PATTERNS: OnceLock<ScriptPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ScriptPatterns {
        scene: Regex::new(r"(?m)^\s*(INT\.|EXT\.)\s*(.+)$").expect("static regex"),
        cue: Regex::new(r"^\s*([A-Z][A-Z\s.'-]{1,30}?)(?:\s*\(.*\))?\s*$").expect("static regex"),
        cue_age: Regex::new(r"\((\d{2})s?\)").expect("static regex"),
        inline_age: Regex::new(r"\((\d{2})\)").expect("static regex"),
    })
}

/// Screenplay analyzer
#[derive(Default)]
pub struct ScriptAnalyzer {
    _unused: (),
}

impl ScriptAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyse a screenplay-formatted text
    pub fn analyze(&self, script: &str) -> ScriptAnalysis {
        let p = script_patterns();
        let lines: Vec<&str> = script.lines().collect();

        // Scenes
        let mut scenes = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if let Some(caps) = p.scene.captures(line) {
                scenes.push(Scene {
                    heading: caps[2].trim().to_string(),
                    interior: &caps[1] == "INT.",
                    line_number: i + 1,
                });
            }
        }

        // Dialogue blocks: cue line, then lines until a blank one
        let mut dialogue: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut cue_ages: BTreeMap<String, (u32, u32)> = BTreeMap::new();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i];
            if let Some(name) = self.cue_name(line) {
                if let Some(caps) = p.cue_age.captures(line).or_else(|| p.inline_age.captures(line)) {
                    if let Ok(decade) = caps[1].parse::<u32>() {
                        cue_ages.entry(name.clone()).or_insert((decade, decade + 9));
                    }
                }
                let mut block = Vec::new();
                i += 1;
                while i < lines.len() && !lines[i].trim().is_empty() && self.cue_name(lines[i]).is_none() {
                    block.push(lines[i].trim().to_string());
                    i += 1;
                }
                if !block.is_empty() {
                    dialogue.entry(name).or_default().extend(block);
                }
                continue;
            }
            i += 1;
        }

        // Character profiles
        let script_lower = script.to_lowercase();
        let characters: Vec<CharacterProfile> = dialogue
            .iter()
            .map(|(name, blocks)| {
                let text = blocks.join(" ").to_lowercase();
                let personality_traits = lexicon_hits(&text, PERSONALITY_LEXICON);
                let emotions = lexicon_hits(&text, EMOTION_LEXICON);
                let gender = infer_gender(&script_lower, &name.to_lowercase());
                let age_range = cue_ages.get(name).copied();
                let description = describe(name, blocks.len(), &personality_traits, age_range, gender);
                CharacterProfile {
                    name: name.clone(),
                    dialogue_count: blocks.len(),
                    age_range,
                    gender,
                    personality_traits,
                    emotions,
                    description,
                }
            })
            .collect();

        // Requirements: dialogue volume decides lead vs supporting
        let max_dialogue = characters.iter().map(|c| c.dialogue_count).max().unwrap_or(0);
        let requirements: Vec<CastingRequirement> = characters
            .iter()
            .map(|c| {
                let role_type = if max_dialogue > 0 && c.dialogue_count * 2 >= max_dialogue {
                    "lead"
                } else {
                    "supporting"
                };
                CastingRequirement {
                    character: c.name.clone(),
                    role_type: role_type.to_string(),
                    age_range: c.age_range,
                    gender: c.gender,
                    traits: c.personality_traits.clone(),
                    description: c.description.clone(),
                }
            })
            .collect();

        let mut suggestions = Vec::new();
        if characters.is_empty() {
            suggestions.push(
                "No dialogue cues detected - is the text in screenplay format?".to_string(),
            );
        }
        for req in &requirements {
            if req.age_range.is_none() {
                suggestions.push(format!(
                    "No age indication for {} - consider adding one to narrow the search",
                    req.character
                ));
            }
        }

        ScriptAnalysis {
            scenes,
            characters,
            requirements,
            suggestions,
        }
    }

    /// Parse a line as a character cue, rejecting screenplay directions
    fn cue_name(&self, line: &str) -> Option<String> {
        let caps = script_patterns().cue.captures(line)?;
        let name = caps[1].trim().trim_end_matches('.').to_string();
        if name.len() < 2 || name.split_whitespace().count() > 4 {
            return None;
        }
        let upper = name.to_uppercase();
        if NON_CHARACTER_CUES.iter().any(|c| upper.starts_with(c)) {
            return None;
        }
        Some(name)
    }
}

fn lexicon_hits(text: &str, lexicon: &[(&str, &[&str])]) -> Vec<String> {
    lexicon
        .iter()
        .filter(|(_, markers)| markers.iter().any(|m| text.contains(m)))
        .map(|(label, _)| label.to_string())
        .collect()
}

/// Count gendered pronouns around mentions of the character. The pronoun
/// usually lands in the sentence after the name, so each mention opens a
/// two-sentence window.
fn infer_gender(script_lower: &str, name_lower: &str) -> Option<Gender> {
    let sentences: Vec<&str> = script_lower.split(['.', '\n']).collect();
    let mut masculine = 0;
    let mut feminine = 0;
    for (i, sentence) in sentences.iter().enumerate() {
        if !sentence.contains(name_lower) {
            continue;
        }
        let window = sentences[i..sentences.len().min(i + 2)].join(" ");
        for word in window.split(|c: char| !c.is_alphanumeric()) {
            match word {
                "he" | "him" | "his" => masculine += 1,
                "she" | "her" | "hers" => feminine += 1,
                _ => {}
            }
        }
    }
    match masculine.cmp(&feminine) {
        std::cmp::Ordering::Greater => Some(Gender::Male),
        std::cmp::Ordering::Less => Some(Gender::Female),
        std::cmp::Ordering::Equal => None,
    }
}

fn describe(
    name: &str,
    dialogue_count: usize,
    traits: &[String],
    age_range: Option<(u32, u32)>,
    gender: Option<Gender>,
) -> String {
    let mut parts = vec![format!("{} has {} dialogue block(s)", name, dialogue_count)];
    if let Some((min, max)) = age_range {
        parts.push(format!("age {min}-{max}"));
    }
    if let Some(g) = gender {
        parts.push(g.as_str().to_string());
    }
    if !traits.is_empty() {
        parts.push(format!("reads as {}", traits.join(", ")));
    }
    parts.join("; ")
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = r#"
INT. DANCE STUDIO - NIGHT

Ravi watches from the doorway. He has been here before.

RAVI (30s)
Trust me, I know every step of this routine.
Watch me do it again.

MEERA
What if we are not ready? I'm scared
we will lose the competition.

RAVI
Enough. We practice until dawn.

EXT. STREET - DAY

Meera walks alone. She wipes her tears.

MEERA
I miss how things used to be.
"#;

    #[test]
    fn test_scene_extraction() {
        let analysis = ScriptAnalyzer::new().analyze(SCRIPT);
        assert_eq!(analysis.scenes.len(), 2);
        assert!(analysis.scenes[0].interior);
        assert_eq!(analysis.scenes[0].heading, "DANCE STUDIO - NIGHT");
        assert!(!analysis.scenes[1].interior);
    }

    #[test]
    fn test_character_extraction() {
        let analysis = ScriptAnalyzer::new().analyze(SCRIPT);
        let names: Vec<&str> = analysis.characters.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"RAVI"));
        assert!(names.contains(&"MEERA"));
        // Scene headings are not characters
        assert!(!names.iter().any(|n| n.contains("INT") || n.contains("EXT")));
    }

    #[test]
    fn test_age_and_gender_hints() {
        let analysis = ScriptAnalyzer::new().analyze(SCRIPT);
        let ravi = analysis.characters.iter().find(|c| c.name == "RAVI").unwrap();
        assert_eq!(ravi.age_range, Some((30, 39)));
        assert_eq!(ravi.gender, Some(Gender::Male));

        let meera = analysis.characters.iter().find(|c| c.name == "MEERA").unwrap();
        assert_eq!(meera.gender, Some(Gender::Female));
    }

    #[test]
    fn test_traits_from_dialogue() {
        let analysis = ScriptAnalyzer::new().analyze(SCRIPT);
        let ravi = analysis.characters.iter().find(|c| c.name == "RAVI").unwrap();
        assert!(ravi.personality_traits.contains(&"confident".to_string()));

        let meera = analysis.characters.iter().find(|c| c.name == "MEERA").unwrap();
        assert!(meera.personality_traits.contains(&"anxious".to_string()));
        assert!(meera.emotions.contains(&"sadness".to_string()));
    }

    #[test]
    fn test_requirements_role_types() {
        let analysis = ScriptAnalyzer::new().analyze(SCRIPT);
        assert_eq!(analysis.requirements.len(), 2);
        let ravi = analysis.requirements.iter().find(|r| r.character == "RAVI").unwrap();
        assert_eq!(ravi.role_type, "lead");
    }

    #[test]
    fn test_empty_script_suggestion() {
        let analysis = ScriptAnalyzer::new().analyze("just prose, no screenplay format");
        assert!(analysis.characters.is_empty());
        assert!(!analysis.suggestions.is_empty());
    }
}
