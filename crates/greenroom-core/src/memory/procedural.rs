//! Procedural memory
//!
//! Records action sequences per user, mines recurring workflows with a
//! PrefixSpan-style sequential-pattern search, and answers "fastest known
//! route from A to B" with A* over the empirical transition graph.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::Store;

/// Mined patterns never exceed this many actions
pub const MAX_PATTERN_LEN: usize = 5;

// ============================================================================
// TYPES
// ============================================================================

/// One step of a recorded workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStep {
    pub action: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl ActionStep {
    pub fn new(action: impl Into<String>, duration_ms: u64, success: bool) -> Self {
        Self { action: action.into(), duration_ms, success }
    }
}

/// A recorded sequence of actions by one user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedSequence {
    pub user_id: String,
    pub steps: Vec<ActionStep>,
}

/// A mined recurring workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProceduralPattern {
    pub workflow_name: String,
    pub action_sequence: Vec<String>,
    pub execution_count: u64,
    /// Moving average over `execution_count`
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

// ============================================================================
// PREFIXSPAN
// ============================================================================

/// Enumerate frequent subsequences (gaps allowed) of length 2..=`max_len`
/// with at least `min_support` supporting sequences.
fn prefixspan(
    sequences: &[Vec<&str>],
    min_support: usize,
    max_len: usize,
) -> Vec<(Vec<String>, usize)> {
    // A projection is (sequence index, start offset)
    let initial: Vec<(usize, usize)> = (0..sequences.len()).map(|i| (i, 0)).collect();
    let mut found = Vec::new();
    let mut prefix = Vec::new();
    grow(sequences, &initial, min_support, max_len, &mut prefix, &mut found);
    found
}

fn grow(
    sequences: &[Vec<&str>],
    projections: &[(usize, usize)],
    min_support: usize,
    max_len: usize,
    prefix: &mut Vec<String>,
    found: &mut Vec<(Vec<String>, usize)>,
) {
    if prefix.len() >= max_len {
        return;
    }

    // Count support of each candidate next item in the projected database
    let mut support: HashMap<&str, usize> = HashMap::new();
    for &(seq, start) in projections {
        let mut seen: Vec<&str> = Vec::new();
        for &item in &sequences[seq][start..] {
            if !seen.contains(&item) {
                seen.push(item);
                *support.entry(item).or_default() += 1;
            }
        }
    }

    let mut candidates: Vec<(&str, usize)> = support
        .into_iter()
        .filter(|(_, count)| *count >= min_support)
        .collect();
    candidates.sort_unstable_by(|a, b| a.0.cmp(b.0));

    for (item, count) in candidates {
        prefix.push(item.to_string());
        if prefix.len() >= 2 {
            found.push((prefix.clone(), count));
        }

        // Project: advance each supporting sequence past its first match
        let projected: Vec<(usize, usize)> = projections
            .iter()
            .filter_map(|&(seq, start)| {
                sequences[seq][start..]
                    .iter()
                    .position(|&x| x == item)
                    .map(|pos| (seq, start + pos + 1))
            })
            .collect();

        grow(sequences, &projected, min_support, max_len, prefix, found);
        prefix.pop();
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Durable procedural store over the shared persistence layer
pub struct ProceduralStore {
    store: Arc<Store>,
}

impl ProceduralStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Record a completed action sequence
    pub fn record(&self, user_id: &str, steps: Vec<ActionStep>) -> Result<()> {
        if steps.is_empty() {
            return Ok(());
        }
        self.store
            .append_sequence(user_id, &serde_json::to_string(&steps)?)
    }

    pub fn sequences(&self) -> Result<Vec<RecordedSequence>> {
        Ok(self
            .store
            .list_sequences()?
            .into_iter()
            .filter_map(|(user_id, steps_json)| {
                let steps: Vec<ActionStep> = serde_json::from_str(&steps_json).ok()?;
                Some(RecordedSequence { user_id, steps })
            })
            .collect())
    }

    /// Mine recurring workflows with support >= `min_support`, persist
    /// them, and return the mined set sorted by support.
    pub fn mine_patterns(&self, min_support: usize) -> Result<Vec<ProceduralPattern>> {
        let recorded = self.sequences()?;
        let action_seqs: Vec<Vec<&str>> = recorded
            .iter()
            .map(|s| s.steps.iter().map(|st| st.action.as_str()).collect())
            .collect();

        let mut frequent = prefixspan(&action_seqs, min_support.max(1), MAX_PATTERN_LEN);
        // Longest, best-supported patterns first
        frequent.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.len().cmp(&a.0.len())));

        let mut patterns = Vec::with_capacity(frequent.len());
        for (actions, count) in frequent {
            // Success and duration statistics come from the sequences that
            // contain the pattern as a subsequence.
            let mut successes = 0usize;
            let mut total_duration = 0u64;
            let mut matched = 0usize;
            for seq in &recorded {
                if contains_subsequence(&seq.steps, &actions) {
                    matched += 1;
                    if seq.steps.iter().all(|s| s.success) {
                        successes += 1;
                    }
                    total_duration += seq.steps.iter().map(|s| s.duration_ms).sum::<u64>();
                }
            }
            if matched == 0 {
                continue;
            }

            let pattern = ProceduralPattern {
                workflow_name: actions.join(" -> "),
                action_sequence: actions,
                execution_count: count as u64,
                success_rate: successes as f64 / matched as f64,
                avg_duration_ms: total_duration as f64 / matched as f64,
            };
            self.store.save_pattern(
                &pattern.workflow_name,
                &serde_json::to_string(&pattern.action_sequence)?,
                pattern.execution_count,
                pattern.success_rate,
                pattern.avg_duration_ms,
            )?;
            patterns.push(pattern);
        }
        Ok(patterns)
    }

    /// All persisted patterns
    pub fn patterns(&self) -> Result<Vec<ProceduralPattern>> {
        Ok(self
            .store
            .load_patterns()?
            .into_iter()
            .filter_map(|(name, seq_json, count, rate, duration)| {
                Some(ProceduralPattern {
                    workflow_name: name,
                    action_sequence: serde_json::from_str(&seq_json).ok()?,
                    execution_count: count,
                    success_rate: rate,
                    avg_duration_ms: duration,
                })
            })
            .collect())
    }

    /// Cheapest known action path from `from` to `to`: A* over the
    /// empirical transition graph. Edge cost is the mean duration of the
    /// target action; the heuristic is stage distance (mean position in
    /// recorded sequences) times the cheapest edge, which never
    /// overestimates.
    pub fn best_path(&self, from: &str, to: &str) -> Result<Option<(Vec<String>, f64)>> {
        let recorded = self.sequences()?;

        // Build transition graph and stage ordering
        let mut transitions: HashMap<String, HashMap<String, (f64, usize)>> = HashMap::new();
        let mut positions: HashMap<String, (f64, usize)> = HashMap::new();
        for seq in &recorded {
            for (i, step) in seq.steps.iter().enumerate() {
                let p = positions.entry(step.action.clone()).or_insert((0.0, 0));
                p.0 += i as f64;
                p.1 += 1;
                if i + 1 < seq.steps.len() {
                    let next = &seq.steps[i + 1];
                    let entry = transitions
                        .entry(step.action.clone())
                        .or_default()
                        .entry(next.action.clone())
                        .or_insert((0.0, 0));
                    entry.0 += next.duration_ms as f64;
                    entry.1 += 1;
                }
            }
        }

        if !positions.contains_key(from) || !positions.contains_key(to) {
            return Ok(None);
        }

        let mean_cost = |entry: &(f64, usize)| entry.0 / entry.1.max(1) as f64;
        let min_edge = transitions
            .values()
            .flat_map(|m| m.values())
            .map(mean_cost)
            .fold(f64::INFINITY, f64::min);
        let stage = |action: &str| {
            positions
                .get(action)
                .map(|(sum, n)| sum / *n as f64)
                .unwrap_or(0.0)
        };
        let target_stage = stage(to);
        let h = |action: &str| {
            if min_edge.is_finite() {
                (target_stage - stage(action)).abs().floor() * min_edge
            } else {
                0.0
            }
        };

        // A* search
        #[derive(PartialEq)]
        struct Open(f64, f64, String, Vec<String>);
        impl Eq for Open {}
        impl Ord for Open {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                other.0.partial_cmp(&self.0).unwrap_or(std::cmp::Ordering::Equal)
            }
        }
        impl PartialOrd for Open {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        let mut best_g: HashMap<String, f64> = HashMap::new();
        let mut open = BinaryHeap::new();
        open.push(Open(h(from), 0.0, from.to_string(), vec![from.to_string()]));

        while let Some(Open(_, g, action, path)) = open.pop() {
            if action == to {
                return Ok(Some((path, g)));
            }
            if let Some(&seen) = best_g.get(&action) {
                if g > seen {
                    continue;
                }
            }
            let Some(next_actions) = transitions.get(&action) else {
                continue;
            };
            for (next, entry) in next_actions {
                let cost = mean_cost(entry);
                let next_g = g + cost;
                if best_g.get(next).map(|&s| next_g < s).unwrap_or(true) {
                    best_g.insert(next.clone(), next_g);
                    let mut next_path = path.clone();
                    next_path.push(next.clone());
                    open.push(Open(next_g + h(next), next_g, next.clone(), next_path));
                }
            }
        }
        Ok(None)
    }
}

/// True when `pattern` occurs in `steps` in order (gaps allowed)
fn contains_subsequence(steps: &[ActionStep], pattern: &[String]) -> bool {
    let mut want = pattern.iter();
    let mut next = want.next();
    for step in steps {
        match next {
            Some(p) if *p == step.action => next = want.next(),
            Some(_) => {}
            None => break,
        }
    }
    next.is_none()
}

// ============================================================================
// TESTS
// ============================================================================
