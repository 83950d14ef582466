//! Experiment Harness
//!
//! Deterministic traffic splitting with comparable outcome recording.
//! Assignment is a pure function of (user id, experiment name, config):
//! the same user always lands on the same variant, across processes and
//! restarts. Outcomes go to an in-memory ring plus the durable experiment
//! log; statistics use a pluggable significance estimator.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};
use crate::store::Store;

/// Allowed deviation of the weight sum from 1
pub const WEIGHT_EPSILON: f64 = 1e-3;

/// Assignment hash resolution
const HASH_BUCKETS: u64 = 10_000;

/// Recent results kept in memory per harness
const RING_CAPACITY: usize = 10_000;

// ============================================================================
// CONFIG
// ============================================================================

/// One traffic-weighted variant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub name: String,
    pub weight: f64,
}

/// Experiment configuration. Variant declaration order matters: the
/// cumulative-weight walk uses it, and the first variant is the control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    pub name: String,
    pub variants: Vec<Variant>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub min_samples_per_variant: usize,
    pub primary_metric: String,
}

impl ExperimentConfig {
    pub fn new(name: impl Into<String>, variants: Vec<(&str, f64)>) -> Self {
        Self {
            name: name.into(),
            variants: variants
                .into_iter()
                .map(|(n, w)| Variant { name: n.to_string(), weight: w })
                .collect(),
            start_time: Utc::now(),
            end_time: None,
            min_samples_per_variant: 100,
            primary_metric: "response_time_ms".to_string(),
        }
    }

    /// Weights must sum to 1 within [`WEIGHT_EPSILON`]
    pub fn validate(&self) -> Result<()> {
        if self.variants.is_empty() {
            return Err(CoreError::Validation(format!(
                "experiment '{}' has no variants",
                self.name
            )));
        }
        let total: f64 = self.variants.iter().map(|v| v.weight).sum();
        if (total - 1.0).abs() > WEIGHT_EPSILON {
            return Err(CoreError::Validation(format!(
                "experiment '{}' weights sum to {total}, expected 1",
                self.name
            )));
        }
        Ok(())
    }

    pub fn control(&self) -> Option<&Variant> {
        self.variants.first()
    }
}

/// One recorded outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentResult {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub variant: String,
    pub response_time_ms: f64,
    pub accuracy_score: f64,
    pub talents_found: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// ASSIGNMENT
// ============================================================================

/// Deterministic variant assignment: hash (user, experiment) into 10 000
/// buckets and walk the variants in declaration order until the
/// cumulative weight covers the bucket.
pub fn assign_variant<'a>(config: &'a ExperimentConfig, user_id: &str) -> &'a str {
    let digest = Sha256::digest(format!("{user_id}_{}", config.name).as_bytes());
    let hash = u64::from_be_bytes(digest[0..8].try_into().expect("sha256 is 32 bytes"));
    let p = (hash % HASH_BUCKETS) as f64 / HASH_BUCKETS as f64;

    let mut cumulative = 0.0;
    for variant in &config.variants {
        cumulative += variant.weight;
        if cumulative >= p {
            return &variant.name;
        }
    }
    // Rounding left a sliver at the top; the last variant owns it
    config
        .variants
        .last()
        .map(|v| v.name.as_str())
        .unwrap_or("control")
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Mean / min / max summary of one metric
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        Self {
            mean: values.iter().sum::<f64>() / values.len() as f64,
            min: values.iter().cloned().fold(f64::INFINITY, f64::min),
            max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Per-variant aggregates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantStats {
    pub samples: usize,
    pub response_time: MetricSummary,
    pub accuracy: MetricSummary,
    pub avg_talents_found: f64,
}

/// Challenger-vs-control comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub challenger: String,
    /// Positive = challenger is faster on the primary metric
    pub improvement_pct: f64,
    pub significant: bool,
}

/// Whether the challenger is ready to take real traffic
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutReadiness {
    pub ready_for_production: bool,
    pub recommended_action: String,
    pub best_challenger: Option<String>,
}

/// Full experiment statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentStats {
    pub experiment: String,
    pub variants: BTreeMap<String, VariantStats>,
    pub comparisons: Vec<Comparison>,
    pub rollout: RolloutReadiness,
}

/// Pluggable significance test over two samples of the primary metric.
/// Real statistical tests slot in here; the default is the practical
/// 5 % improvement threshold.
pub trait SignificanceEstimator: Send + Sync {
    fn compare(&self, control: &[f64], challenger: &[f64]) -> Comparison;
}

/// Mean comparison with a 5 % practical-significance threshold
#[derive(Default)]
pub struct PracticalThreshold;

impl SignificanceEstimator for PracticalThreshold {
    fn compare(&self, control: &[f64], challenger: &[f64]) -> Comparison {
        let control_mean = MetricSummary::from_values(control).mean;
        let challenger_mean = MetricSummary::from_values(challenger).mean;
        let improvement_pct = if control_mean > 0.0 {
            (control_mean - challenger_mean) / control_mean * 100.0
        } else {
            0.0
        };
        Comparison {
            challenger: String::new(),
            improvement_pct,
            significant: improvement_pct.abs() >= 5.0,
        }
    }
}

// ============================================================================
// HARNESS
// ============================================================================

/// Experiment harness: registration, assignment, recording, statistics
pub struct ExperimentHarness {
    experiments: RwLock<HashMap<String, ExperimentConfig>>,
    ring: Mutex<VecDeque<(String, ExperimentResult)>>,
    store: Option<Arc<Store>>,
    estimator: Box<dyn SignificanceEstimator>,
}

impl Default for ExperimentHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl ExperimentHarness {
    pub fn new() -> Self {
        Self {
            experiments: RwLock::new(HashMap::new()),
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            store: None,
            estimator: Box::new(PracticalThreshold),
        }
    }

    /// Attach the durable experiment log
    pub fn with_store(mut self, store: Arc<Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_estimator(mut self, estimator: Box<dyn SignificanceEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Register (or replace) an experiment after validating its weights
    pub fn register(&self, config: ExperimentConfig) -> Result<()> {
        config.validate()?;
        self.experiments
            .write()
            .expect("experiments lock")
            .insert(config.name.clone(), config);
        Ok(())
    }

    pub fn experiment(&self, name: &str) -> Option<ExperimentConfig> {
        self.experiments
            .read()
            .expect("experiments lock")
            .get(name)
            .cloned()
    }

    /// Deterministic assignment. Unknown experiments route everyone to
    /// "control" so callers never block on configuration races.
    pub fn assign(&self, user_id: &str, experiment_name: &str) -> String {
        match self
            .experiments
            .read()
            .expect("experiments lock")
            .get(experiment_name)
        {
            Some(config) => assign_variant(config, user_id).to_string(),
            None => "control".to_string(),
        }
    }

    /// Record an outcome in the ring and the durable log
    pub fn record(&self, experiment_name: &str, result: ExperimentResult) -> Result<()> {
        if let Some(store) = &self.store {
            store.append_experiment_result(experiment_name, &result)?;
        }
        let mut ring = self.ring.lock().expect("ring lock");
        if ring.len() >= RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back((experiment_name.to_string(), result));
        Ok(())
    }

    fn results(&self, experiment_name: &str) -> Result<Vec<ExperimentResult>> {
        if let Some(store) = &self.store {
            return store.load_experiment_results(experiment_name);
        }
        Ok(self
            .ring
            .lock()
            .expect("ring lock")
            .iter()
            .filter(|(name, _)| name == experiment_name)
            .map(|(_, r)| r.clone())
            .collect())
    }

    /// Aggregate statistics, comparisons, and rollout readiness
    pub fn stats(&self, experiment_name: &str) -> Result<ExperimentStats> {
        let config = self
            .experiment(experiment_name)
            .ok_or_else(|| CoreError::NotFound(format!("experiment '{experiment_name}'")))?;
        let results = self.results(experiment_name)?;

        let mut grouped: BTreeMap<String, Vec<&ExperimentResult>> = BTreeMap::new();
        for r in &results {
            grouped.entry(r.variant.clone()).or_default().push(r);
        }

        let variants: BTreeMap<String, VariantStats> = grouped
            .iter()
            .map(|(variant, rs)| {
                let response: Vec<f64> = rs.iter().map(|r| r.response_time_ms).collect();
                let accuracy: Vec<f64> = rs.iter().map(|r| r.accuracy_score).collect();
                let talents: f64 = rs.iter().map(|r| r.talents_found as f64).sum();
                (
                    variant.clone(),
                    VariantStats {
                        samples: rs.len(),
                        response_time: MetricSummary::from_values(&response),
                        accuracy: MetricSummary::from_values(&accuracy),
                        avg_talents_found: if rs.is_empty() { 0.0 } else { talents / rs.len() as f64 },
                    },
                )
            })
            .collect();

        let control_name = config
            .control()
            .map(|v| v.name.clone())
            .unwrap_or_else(|| "control".to_string());
        let control_times: Vec<f64> = grouped
            .get(&control_name)
            .map(|rs| rs.iter().map(|r| r.response_time_ms).collect())
            .unwrap_or_default();

        let mut comparisons = Vec::new();
        for variant in &config.variants {
            if variant.name == control_name {
                continue;
            }
            let challenger_times: Vec<f64> = grouped
                .get(&variant.name)
                .map(|rs| rs.iter().map(|r| r.response_time_ms).collect())
                .unwrap_or_default();
            if control_times.is_empty() || challenger_times.is_empty() {
                continue;
            }
            let mut comparison = self.estimator.compare(&control_times, &challenger_times);
            comparison.challenger = variant.name.clone();
            comparisons.push(comparison);
        }

        let rollout = rollout_readiness(&control_name, &variants);

        Ok(ExperimentStats {
            experiment: experiment_name.to_string(),
            variants,
            comparisons,
            rollout,
        })
    }
}

/// control >= 500 samples, challenger >= 100, challenger faster, and
/// challenger accuracy >= 0.90
fn rollout_readiness(
    control_name: &str,
    variants: &BTreeMap<String, VariantStats>,
) -> RolloutReadiness {
    let Some(control) = variants.get(control_name) else {
        return RolloutReadiness {
            recommended_action: "continue_testing".to_string(),
            ..Default::default()
        };
    };

    let mut best: Option<(&String, &VariantStats)> = None;
    for (name, stats) in variants {
        if name == control_name {
            continue;
        }
        let qualifies = control.samples >= 500
            && stats.samples >= 100
            && stats.response_time.mean < control.response_time.mean
            && stats.accuracy.mean >= 0.90;
        if qualifies {
            let better_than_best = best
                .map(|(_, b)| stats.response_time.mean < b.response_time.mean)
                .unwrap_or(true);
            if better_than_best {
                best = Some((name, stats));
            }
        }
    }

    match best {
        Some((name, _)) => RolloutReadiness {
            ready_for_production: true,
            recommended_action: "gradual_rollout".to_string(),
            best_challenger: Some(name.clone()),
        },
        None => RolloutReadiness {
            ready_for_production: false,
            recommended_action: "continue_testing".to_string(),
            best_challenger: None,
        },
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn config(variants: Vec<(&str, f64)>) -> ExperimentConfig {
        ExperimentConfig::new("exp", variants)
    }

    fn outcome(user: &str, variant: &str, rt: f64, accuracy: f64) -> ExperimentResult {
        ExperimentResult {
            user_id: user.to_string(),
            session_id: None,
            variant: variant.to_string(),
            response_time_ms: rt,
            accuracy_score: accuracy,
            talents_found: 3,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_weight_validation() {
        assert!(config(vec![("a", 0.7), ("b", 0.3)]).validate().is_ok());
        assert!(config(vec![("a", 0.7), ("b", 0.2)]).validate().is_err());
        // Within epsilon passes
        assert!(config(vec![("a", 0.7004), ("b", 0.3)]).validate().is_ok());
        assert!(config(vec![]).validate().is_err());
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let c = config(vec![("v1", 0.7), ("v2", 0.2), ("v3", 0.1)]);
        let first = assign_variant(&c, "u42");
        for _ in 0..100 {
            assert_eq!(assign_variant(&c, "u42"), first);
        }
    }

    #[test]
    fn test_degenerate_weights_always_first_variant() {
        let c = config(vec![("v1", 1.0), ("v2", 0.0), ("v3", 0.0)]);
        for i in 0..1000 {
            assert_eq!(assign_variant(&c, &format!("user-{i}")), "v1");
        }
    }

    #[test]
    fn test_even_split_distribution() {
        let c = config(vec![("a", 0.5), ("b", 0.5)]);
        let mut a = 0usize;
        for i in 0..10_000 {
            if assign_variant(&c, &format!("user-{i}")) == "a" {
                a += 1;
            }
        }
        let share = a as f64 / 10_000.0;
        assert!((share - 0.5).abs() <= 0.01, "observed share {share}");
    }

    #[test]
    fn test_three_way_distribution() {
        let c = config(vec![("v1", 0.70), ("v2", 0.20), ("v3", 0.10)]);
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for i in 0..10_000 {
            let v = assign_variant(&c, &format!("user-{i}"));
            *counts.entry(v).or_default() += 1;
        }
        assert!((counts["v1"] as f64 / 10_000.0 - 0.70).abs() <= 0.01);
        assert!((counts["v2"] as f64 / 10_000.0 - 0.20).abs() <= 0.01);
        assert!((counts["v3"] as f64 / 10_000.0 - 0.10).abs() <= 0.01);
    }

    #[test]
    fn test_unknown_experiment_routes_to_control() {
        let harness = ExperimentHarness::new();
        assert_eq!(harness.assign("u1", "missing"), "control");
    }

    #[test]
    fn test_stats_and_comparisons() {
        let harness = ExperimentHarness::new();
        harness
            .register(config(vec![("control", 0.5), ("fast", 0.5)]))
            .unwrap();
        for i in 0..10 {
            harness
                .record("exp", outcome(&format!("u{i}"), "control", 200.0, 0.9))
                .unwrap();
            harness
                .record("exp", outcome(&format!("u{i}"), "fast", 100.0, 0.95))
                .unwrap();
        }

        let stats = harness.stats("exp").unwrap();
        assert_eq!(stats.variants["control"].samples, 10);
        assert!((stats.variants["fast"].response_time.mean - 100.0).abs() < 1e-9);

        let comparison = &stats.comparisons[0];
        assert_eq!(comparison.challenger, "fast");
        assert!((comparison.improvement_pct - 50.0).abs() < 1e-9);
        assert!(comparison.significant);
    }

    #[test]
    fn test_rollout_gate_requires_sample_counts() {
        let harness = ExperimentHarness::new();
        harness
            .register(config(vec![("control", 0.5), ("fast", 0.5)]))
            .unwrap();
        // Under-sampled: not ready
        for i in 0..50 {
            harness
                .record("exp", outcome(&format!("u{i}"), "control", 200.0, 0.9))
                .unwrap();
            harness
                .record("exp", outcome(&format!("u{i}"), "fast", 100.0, 0.95))
                .unwrap();
        }
        assert!(!harness.stats("exp").unwrap().rollout.ready_for_production);

        // Enough control + challenger samples, faster and accurate: ready
        for i in 0..500 {
            harness
                .record("exp", outcome(&format!("c{i}"), "control", 200.0, 0.9))
                .unwrap();
        }
        for i in 0..100 {
            harness
                .record("exp", outcome(&format!("f{i}"), "fast", 100.0, 0.95))
                .unwrap();
        }
        let rollout = harness.stats("exp").unwrap().rollout;
        assert!(rollout.ready_for_production);
        assert_eq!(rollout.best_challenger.as_deref(), Some("fast"));
    }

    #[test]
    fn test_durable_log_survives_harness_restart() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(Some(dir.path().join("test.db"))).unwrap());

        {
            let harness = ExperimentHarness::new().with_store(store.clone());
            harness
                .register(config(vec![("control", 1.0)]))
                .unwrap();
            harness.record("exp", outcome("u1", "control", 150.0, 0.9)).unwrap();
        }

        let reborn = ExperimentHarness::new().with_store(store);
        reborn.register(config(vec![("control", 1.0)])).unwrap();
        let stats = reborn.stats("exp").unwrap();
        assert_eq!(stats.variants["control"].samples, 1);
    }
}
