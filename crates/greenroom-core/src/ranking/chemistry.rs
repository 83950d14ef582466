//! Pairwise chemistry prediction
//!
//! Heuristic compatibility between two talents, used when ranking against
//! an existing cast. Scores are symmetric and cached under the ordered
//! id pair.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::talent::TalentProfile;

/// Chemistry when nothing is known about a pair
pub const DEFAULT_CHEMISTRY: f64 = 0.5;

/// Symmetric, cached chemistry predictor
#[derive(Default)]
pub struct ChemistryPredictor {
    cache: Mutex<HashMap<(String, String), f64>>,
}

impl ChemistryPredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predicted chemistry for a pair in [0, 1]
    pub fn predict(&self, a: &TalentProfile, b: &TalentProfile) -> f64 {
        let key = if a.id <= b.id {
            (a.id.clone(), b.id.clone())
        } else {
            (b.id.clone(), a.id.clone())
        };
        if let Some(&cached) = self.cache.lock().expect("chemistry lock").get(&key) {
            return cached;
        }

        let score = (age_compatibility(a.age, b.age)
            + experience_balance(a.experience_years, b.experience_years)
            + language_overlap(&a.languages, &b.languages))
            / 3.0;

        self.cache.lock().expect("chemistry lock").insert(key, score);
        score
    }

    pub fn cached_pairs(&self) -> usize {
        self.cache.lock().expect("chemistry lock").len()
    }
}

/// Closer ages read better on screen together; a 20+ year gap rarely does
fn age_compatibility(a: Option<u32>, b: Option<u32>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => {
            let gap = a.abs_diff(b) as f64;
            (1.0 - gap / 25.0).clamp(0.2, 1.0)
        }
        _ => DEFAULT_CHEMISTRY,
    }
}

/// Similar experience or a clear mentor gap both work; a mid-size gap is
/// the awkward zone
fn experience_balance(a: Option<f32>, b: Option<f32>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => {
            let gap = (a - b).abs() as f64;
            if gap <= 3.0 {
                1.0
            } else if gap >= 15.0 {
                0.8
            } else {
                0.5
            }
        }
        _ => DEFAULT_CHEMISTRY,
    }
}

/// Jaccard overlap of spoken languages
fn language_overlap(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return DEFAULT_CHEMISTRY;
    }
    let a_lower: Vec<String> = a.iter().map(|l| l.to_lowercase()).collect();
    let b_lower: Vec<String> = b.iter().map(|l| l.to_lowercase()).collect();
    let shared = a_lower.iter().filter(|l| b_lower.contains(l)).count() as f64;
    let union = (a_lower.len() + b_lower.len()) as f64 - shared;
    if union == 0.0 {
        DEFAULT_CHEMISTRY
    } else {
        shared / union
    }
}
