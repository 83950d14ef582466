//! Health checks
//!
//! Component-level probes folded into one overall status. A single
//! unhealthy check makes the service UNHEALTHY; any degraded check makes
//! it DEGRADED; readiness accepts degraded operation, liveness only
//! rejects the unhealthy state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::embedding::EmbeddingPipeline;
use crate::index::SharedIndex;
use crate::indexer::IndexManager;
use crate::store::Store;

/// Embedding round-trips slower than this degrade the ML check
const ML_LATENCY_THRESHOLD: Duration = Duration::from_millis(500);

/// Queue fill ratio above which the resource check degrades
const QUEUE_PRESSURE_RATIO: f64 = 0.8;

// ============================================================================
// TYPES
// ============================================================================

/// Per-check and overall status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

/// One probe result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResult {
    pub name: &'static str,
    pub status: HealthStatus,
    pub detail: String,
    pub latency_ms: u64,
}

/// Full health report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<CheckResult>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthReport {
    /// Ready to take traffic (healthy or degraded)
    pub fn ready(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }

    /// Process should stay alive
    pub fn live(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }
}

// ============================================================================
// MONITOR
// ============================================================================

/// Engine health monitor
pub struct HealthMonitor {
    embeddings: Arc<EmbeddingPipeline>,
    index: SharedIndex,
    store: Arc<Store>,
    indexer: Option<Arc<IndexManager>>,
    queue_capacity: usize,
}

impl HealthMonitor {
    pub fn new(
        embeddings: Arc<EmbeddingPipeline>,
        index: SharedIndex,
        store: Arc<Store>,
        indexer: Option<Arc<IndexManager>>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            embeddings,
            index,
            store,
            indexer,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Run every probe and fold the overall status
    pub async fn check(&self) -> HealthReport {
        let mut checks = vec![
            self.check_embedding().await,
            self.check_index(),
            self.check_store(),
        ];
        if let Some(check) = self.check_resources() {
            checks.push(check);
        }

        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthReport {
            status,
            checks,
            timestamp: chrono::Utc::now(),
        }
    }

    /// ML round-trip: a real embed call under a latency budget
    async fn check_embedding(&self) -> CheckResult {
        let start = Instant::now();
        let result = self.embeddings.embed("health check probe").await;
        let elapsed = start.elapsed();
        match result {
            Ok(vector) => {
                let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
                if (norm - 1.0).abs() > 1e-3 {
                    CheckResult {
                        name: "embedding",
                        status: HealthStatus::Unhealthy,
                        detail: format!("embedding norm {norm} is not unit"),
                        latency_ms: elapsed.as_millis() as u64,
                    }
                } else if elapsed > ML_LATENCY_THRESHOLD {
                    CheckResult {
                        name: "embedding",
                        status: HealthStatus::Degraded,
                        detail: format!("round-trip {}ms over budget", elapsed.as_millis()),
                        latency_ms: elapsed.as_millis() as u64,
                    }
                } else {
                    CheckResult {
                        name: "embedding",
                        status: HealthStatus::Healthy,
                        detail: format!("{} dims", vector.len()),
                        latency_ms: elapsed.as_millis() as u64,
                    }
                }
            }
            Err(e) => CheckResult {
                name: "embedding",
                status: HealthStatus::Unhealthy,
                detail: e.to_string(),
                latency_ms: elapsed.as_millis() as u64,
            },
        }
    }

    fn check_index(&self) -> CheckResult {
        let start = Instant::now();
        match self.index.read() {
            Ok(index) => {
                let stats = index.stats();
                CheckResult {
                    name: "vector_index",
                    status: HealthStatus::Healthy,
                    detail: format!("{} vectors ({})", stats.count, stats.backend),
                    latency_ms: start.elapsed().as_millis() as u64,
                }
            }
            Err(_) => CheckResult {
                name: "vector_index",
                status: HealthStatus::Unhealthy,
                detail: "index lock poisoned".to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
            },
        }
    }

    fn check_store(&self) -> CheckResult {
        let start = Instant::now();
        match self.store.profile_count() {
            Ok(count) => CheckResult {
                name: "store",
                status: HealthStatus::Healthy,
                detail: format!("{count} active profiles"),
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Err(e) => CheckResult {
                name: "store",
                status: HealthStatus::Unhealthy,
                detail: e.to_string(),
                latency_ms: start.elapsed().as_millis() as u64,
            },
        }
    }

    /// Resource envelope: queue pressure and dead letters
    fn check_resources(&self) -> Option<CheckResult> {
        let indexer = self.indexer.as_ref()?;
        let stats = indexer.stats();
        let fill = stats.queued as f64 / self.queue_capacity as f64;
        let (status, detail) = if fill >= QUEUE_PRESSURE_RATIO {
            (
                HealthStatus::Degraded,
                format!("index queue at {:.0}% of capacity", fill * 100.0),
            )
        } else if stats.dead_letters > 0 {
            (
                HealthStatus::Degraded,
                format!("{} dead-lettered index updates", stats.dead_letters),
            )
        } else {
            (
                HealthStatus::Healthy,
                format!("queue depth {}", stats.queued),
            )
        };
        Some(CheckResult {
            name: "resources",
            status,
            detail,
            latency_ms: 0,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, TieredCache};
    use crate::embedding::{EmbeddingError, EmbeddingProvider, HashProjectionModel};
    use crate::index::{FlatIndex, VectorIndex};
    use std::sync::RwLock;

    struct BrokenModel;

    impl EmbeddingProvider for BrokenModel {
        fn name(&self) -> &str {
            "broken"
        }
        fn dim(&self) -> usize {
            8
        }
        fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Failed("backend down".into()))
        }
    }

    fn monitor(provider: Arc<dyn EmbeddingProvider>) -> (HealthMonitor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(Some(dir.path().join("test.db"))).unwrap());
        let embeddings = Arc::new(EmbeddingPipeline::new(
            provider,
            Arc::new(TieredCache::new(CacheConfig::default())),
        ));
        let dim = embeddings.dim();
        let index: SharedIndex = Arc::new(RwLock::new(Box::new(FlatIndex::new(dim))));
        (
            HealthMonitor::new(embeddings, index, store, None, 100),
            dir,
        )
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let (monitor, _dir) = monitor(Arc::new(HashProjectionModel::default()));
        let report = monitor.check().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.ready());
        assert!(report.live());
        assert_eq!(report.checks.len(), 3);
    }

    #[tokio::test]
    async fn test_broken_embedding_is_unhealthy() {
        let (monitor, _dir) = monitor(Arc::new(BrokenModel));
        let report = monitor.check().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.ready());
        assert!(!report.live());
        let embedding_check = report.checks.iter().find(|c| c.name == "embedding").unwrap();
        assert_eq!(embedding_check.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_status_ordering_folds_to_worst() {
        assert!(HealthStatus::Unhealthy > HealthStatus::Degraded);
        assert!(HealthStatus::Degraded > HealthStatus::Healthy);
    }
}
