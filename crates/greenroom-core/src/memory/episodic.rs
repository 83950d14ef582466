//! Episodic memory
//!
//! Durable records of specific interactions, decaying under a modified
//! Ebbinghaus curve. Reinforcement, importance, emotional valence, and
//! context richness all raise stability; records whose retention falls
//! below the prune cutoff are garbage-collected by consolidation.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::store::Store;

// ============================================================================
// RETENTION MODEL
// ============================================================================

/// Decay constant of the forgetting curve
pub const DECAY_K: f64 = 0.5;

/// Retention below this is eligible for pruning
pub const PRUNE_CUTOFF: f64 = 0.1;

/// Spaced reconsolidation schedule, in days since creation
pub const REVIEW_INTERVALS_DAYS: [i64; 6] = [1, 3, 7, 21, 60, 180];

/// Stability factor of a memory.
///
/// `1 + 0.5 r (1 + 0.3 i)(1 + 0.4 |v - 0.5|)(1 + 0.15 c)` - unreinforced
/// memories sit at the base stability of 1 regardless of importance.
pub fn stability(reinforcement: u32, importance: f64, valence: f64, context_richness: f64) -> f64 {
    1.0 + 0.5
        * reinforcement as f64
        * (1.0 + 0.3 * importance)
        * (1.0 + 0.4 * (valence - 0.5).abs())
        * (1.0 + 0.15 * context_richness)
}

/// Retention in [0, 1] after `hours_elapsed`, with bounded boost modifiers
pub fn retention_at(
    hours_elapsed: f64,
    initial_strength: f64,
    reinforcement: u32,
    importance: f64,
    valence: f64,
    context_richness: f64,
) -> f64 {
    let s = stability(reinforcement, importance, valence, context_richness);
    let mut r = initial_strength * (-DECAY_K * hours_elapsed.max(0.0) / s).exp();

    // Primacy: brand-new memories resist immediate decay a little
    if reinforcement == 0 {
        r *= 1.1;
    } else if reinforcement > 5 {
        r *= 1.0 + 0.05 * ((reinforcement - 5).min(10) as f64);
    }
    if valence > 0.7 || valence < 0.3 {
        r *= 1.15;
    }
    if importance > 0.8 {
        r *= 1.2;
    }
    if context_richness > 0.7 {
        r *= 1.1;
    }

    r.clamp(0.0, 1.0)
}

/// Retention of a record at wall-clock `now`
pub fn retention(record: &EpisodicRecord, now: DateTime<Utc>) -> f64 {
    let hours = (now - record.last_accessed).num_seconds() as f64 / 3600.0;
    retention_at(
        hours,
        1.0,
        record.reinforcement,
        record.importance,
        record.valence,
        record.context_richness,
    )
}

// ============================================================================
// RECORD
// ============================================================================

/// One episodic memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodicRecord {
    pub id: String,
    /// Conversation / user that produced the memory
    pub owner: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    /// Importance in [0, 1]
    pub importance: f64,
    /// Emotional valence in [0, 1]; 0.5 is neutral
    pub valence: f64,
    pub reinforcement: u32,
    /// Amount of contextual information in [0, 1]
    pub context_richness: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_embedding: Option<Vec<f32>>,
    /// Ids merged into this record by consolidation compression
    #[serde(default)]
    pub merged_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

impl EpisodicRecord {
    pub fn new(
        owner: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        importance: f64,
        valence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            event_type: event_type.into(),
            payload,
            importance: importance.clamp(0.0, 1.0),
            valence: valence.clamp(0.0, 1.0),
            reinforcement: 0,
            context_richness: 0.5,
            context_embedding: None,
            merged_ids: vec![],
            created_at: now,
            last_accessed: now,
        }
    }

    /// Next recommended reconsolidation time from the review schedule
    pub fn next_review_due(&self) -> DateTime<Utc> {
        let step = (self.reinforcement as usize).min(REVIEW_INTERVALS_DAYS.len() - 1);
        self.created_at + ChronoDuration::days(REVIEW_INTERVALS_DAYS[step])
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Durable episodic store over the shared persistence layer
pub struct EpisodicStore {
    store: Arc<Store>,
}

impl EpisodicStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Persist a new memory
    pub fn store(&self, record: &EpisodicRecord) -> Result<()> {
        self.store.upsert_episodic(record)
    }

    pub fn get(&self, id: &str) -> Result<Option<EpisodicRecord>> {
        self.store.get_episodic(id)
    }

    pub fn all(&self) -> Result<Vec<EpisodicRecord>> {
        self.store.list_episodic()
    }

    /// Reinforce memories: bumps the counter and refreshes last access,
    /// which resets the decay clock.
    pub fn reinforce(&self, ids: &[String]) -> Result<usize> {
        let mut reinforced = 0;
        for id in ids {
            if let Some(mut record) = self.store.get_episodic(id)? {
                record.reinforcement += 1;
                record.last_accessed = Utc::now();
                self.store.upsert_episodic(&record)?;
                reinforced += 1;
            }
        }
        Ok(reinforced)
    }

    /// Top-k records by cosine similarity of their context embedding
    pub fn similar(&self, context_vector: &[f32], k: usize) -> Result<Vec<(EpisodicRecord, f32)>> {
        let mut scored: Vec<(EpisodicRecord, f32)> = self
            .all()?
            .into_iter()
            .filter_map(|r| {
                let score = r
                    .context_embedding
                    .as_ref()
                    .map(|e| cosine_similarity(context_vector, e))?;
                Some((r, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Delete every record whose retention has fallen below `cutoff` AND
    /// whose importance is below `importance_floor`. Returns pruned ids.
    pub fn prune(&self, cutoff: f64, importance_floor: f64) -> Result<Vec<String>> {
        let now = Utc::now();
        let doomed: Vec<String> = self
            .all()?
            .into_iter()
            .filter(|r| retention(r, now) < cutoff && r.importance < importance_floor)
            .map(|r| r.id)
            .collect();
        self.store.delete_episodic(&doomed)?;
        Ok(doomed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
