//! Index Manager
//!
//! Keeps the vector index in sync with the profile store. Mutations are
//! queued per talent id and drained in bounded batches on a timer; high
//! priority updates force an immediate drain. Failed items retry with
//! exponential backoff and land in a dead-letter list after five
//! attempts. Periodic maintenance (archival, optimization, reindexing,
//! backup) lives in [`maintenance`].

pub mod maintenance;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;

use crate::embedding::EmbeddingPipeline;
use crate::error::{CoreError, Result};
use crate::index::SharedIndex;
use crate::store::Store;
use crate::talent::TalentProfile;
use crate::telemetry::Telemetry;

/// Retry backoff schedule in seconds (capped at the last entry)
const BACKOFF_SECS: [u64; 5] = [1, 2, 4, 8, 16];

/// Attempts before an item is dead-lettered
const MAX_ATTEMPTS: u32 = 5;

// ============================================================================
// TYPES
// ============================================================================

/// Kind of index mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOp {
    Upsert,
    Delete,
}

/// Queue priority; high forces an immediate drain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// One queued index mutation
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub talent_id: String,
    pub op: IndexOp,
    /// Present for upserts; deletes carry only the id
    pub profile: Option<TalentProfile>,
    pub priority: Priority,
}

impl UpdateRequest {
    pub fn upsert(profile: TalentProfile) -> Self {
        Self {
            talent_id: profile.id.clone(),
            op: IndexOp::Upsert,
            profile: Some(profile),
            priority: Priority::Normal,
        }
    }

    pub fn delete(talent_id: impl Into<String>) -> Self {
        Self {
            talent_id: talent_id.into(),
            op: IndexOp::Delete,
            profile: None,
            priority: Priority::Normal,
        }
    }

    pub fn high_priority(mut self) -> Self {
        self.priority = Priority::High;
        self
    }
}

#[derive(Debug)]
struct PendingUpdate {
    request: UpdateRequest,
    attempts: u32,
    not_before: Instant,
}

/// An item that exhausted its retries
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetter {
    pub talent_id: String,
    pub attempts: u32,
    pub error: String,
}

/// Result of one drain pass
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub processed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

/// Manager statistics for the stats endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManagerStats {
    pub queued: usize,
    pub processed_total: u64,
    pub failed_total: u64,
    pub dead_letters: usize,
}

// ============================================================================
// MANAGER
// ============================================================================

/// Background index synchroniser
pub struct IndexManager {
    queue: Mutex<VecDeque<PendingUpdate>>,
    capacity: usize,
    batch_size: usize,
    embeddings: Arc<EmbeddingPipeline>,
    index: SharedIndex,
    store: Arc<Store>,
    telemetry: Arc<Telemetry>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    drain_now: Notify,
}

impl IndexManager {
    pub fn new(
        embeddings: Arc<EmbeddingPipeline>,
        index: SharedIndex,
        store: Arc<Store>,
        telemetry: Arc<Telemetry>,
        capacity: usize,
        batch_size: usize,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            batch_size: batch_size.max(1),
            embeddings,
            index,
            store,
            telemetry,
            dead_letters: Mutex::new(Vec::new()),
            drain_now: Notify::new(),
        }
    }

    /// Enqueue an index mutation. The queue is bounded: overflow returns
    /// `CapacityExceeded` and the producer retries with jitter.
    pub fn queue_update(&self, request: UpdateRequest) -> Result<()> {
        let mut queue = self.queue.lock().expect("queue lock");
        if queue.len() >= self.capacity {
            self.telemetry.counter("indexer_queue_rejections_total").increment();
            return Err(CoreError::CapacityExceeded(format!(
                "index update queue is full ({} items)",
                self.capacity
            )));
        }
        // Coalesce: a newer mutation for the same talent replaces the
        // queued one.
        queue.retain(|p| p.request.talent_id != request.talent_id);
        let high_priority = request.priority == Priority::High;
        queue.push_back(PendingUpdate {
            request,
            attempts: 0,
            not_before: Instant::now(),
        });
        drop(queue);

        self.telemetry
            .gauge("indexer_queue_depth")
            .set(self.queue_len() as i64);
        if high_priority {
            self.drain_now.notify_one();
        }
        Ok(())
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().expect("queue lock").len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().expect("dead letter lock").clone()
    }

    pub fn stats(&self) -> IndexManagerStats {
        IndexManagerStats {
            queued: self.queue_len(),
            processed_total: self.telemetry.counter("indexer_processed_total").get(),
            failed_total: self.telemetry.counter("indexer_failures_total").get(),
            dead_letters: self.dead_letters.lock().expect("dead letter lock").len(),
        }
    }

    /// Background loop: drain every `interval`, or immediately when a
    /// high-priority update arrives. Exits when `shutdown` flips true.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        tracing::info!(interval_secs = interval.as_secs(), "index manager started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.drain_now.notified() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("index manager stopping");
                        return;
                    }
                }
            }
            let report = self.drain().await;
            if report.processed + report.retried + report.dead_lettered > 0 {
                tracing::debug!(
                    processed = report.processed,
                    retried = report.retried,
                    dead = report.dead_lettered,
                    "index drain complete"
                );
            }
        }
    }

    /// Drain one batch of due items
    pub async fn drain(&self) -> DrainReport {
        let now = Instant::now();
        let batch: Vec<PendingUpdate> = {
            let mut queue = self.queue.lock().expect("queue lock");
            let mut batch = Vec::with_capacity(self.batch_size);
            let mut deferred = VecDeque::new();
            while batch.len() < self.batch_size {
                let Some(item) = queue.pop_front() else {
                    break;
                };
                if item.not_before <= now {
                    batch.push(item);
                } else {
                    deferred.push_back(item);
                }
            }
            // Not-yet-due items go back in front, preserving order
            while let Some(item) = deferred.pop_back() {
                queue.push_front(item);
            }
            batch
        };

        let mut report = DrainReport::default();
        for item in batch {
            match self.apply(&item.request).await {
                Ok(()) => {
                    report.processed += 1;
                    self.telemetry.counter("indexer_processed_total").increment();
                }
                Err(e) => {
                    self.telemetry.counter("indexer_failures_total").increment();
                    let attempts = item.attempts + 1;
                    if attempts >= MAX_ATTEMPTS {
                        tracing::error!(
                            talent_id = %item.request.talent_id,
                            attempts,
                            error = %e,
                            "index update dead-lettered"
                        );
                        self.dead_letters.lock().expect("dead letter lock").push(DeadLetter {
                            talent_id: item.request.talent_id.clone(),
                            attempts,
                            error: e.to_string(),
                        });
                        self.telemetry.counter("indexer_dead_letters_total").increment();
                        report.dead_lettered += 1;
                    } else {
                        let backoff = BACKOFF_SECS[(attempts as usize - 1).min(BACKOFF_SECS.len() - 1)];
                        self.queue.lock().expect("queue lock").push_back(PendingUpdate {
                            request: item.request,
                            attempts,
                            not_before: now + Duration::from_secs(backoff),
                        });
                        report.retried += 1;
                    }
                }
            }
        }

        self.telemetry
            .gauge("indexer_queue_depth")
            .set(self.queue_len() as i64);
        report
    }

    async fn apply(&self, request: &UpdateRequest) -> Result<()> {
        match request.op {
            IndexOp::Delete => {
                self.index
                    .write()
                    .map_err(|_| CoreError::Internal("index lock poisoned".into()))?
                    .delete(&request.talent_id)
                    .map_err(|e| CoreError::Persistence(e.to_string()))?;
                Ok(())
            }
            IndexOp::Upsert => {
                let profile = match &request.profile {
                    Some(p) => p.clone(),
                    // Data-less upsert events re-read the store
                    None => self
                        .store
                        .get_profile(&request.talent_id)?
                        .ok_or_else(|| CoreError::NotFound(request.talent_id.clone()))?,
                };
                let vector = self.embeddings.embed(&profile.searchable_text()).await?;
                self.store.upsert_profile(&profile)?;
                self.index
                    .write()
                    .map_err(|_| CoreError::Internal("index lock poisoned".into()))?
                    .upsert(&profile.id, &vector, profile.to_metadata())
                    .map_err(|e| CoreError::Persistence(e.to_string()))?;
                Ok(())
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
