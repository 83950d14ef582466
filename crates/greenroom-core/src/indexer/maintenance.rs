//! Periodic index maintenance
//!
//! Archival, optimization, full reindexing, and backups. Each task runs
//! on its own cadence from the server's background loops; all of them are
//! restartable and safe to re-run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::embedding::{cosine_similarity, EmbeddingPipeline};
use crate::error::{CoreError, Result};
use crate::index::SharedIndex;
use crate::store::Store;
use crate::talent::TalentStatus;

/// Profiles untouched for this long are archived
pub const ARCHIVE_AFTER_DAYS: i64 = 365;

/// Vectors at least this similar with equal metadata are duplicates
pub const DEDUP_COSINE: f32 = 0.999;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub archived: usize,
    pub duplicates_removed: usize,
    pub reindexed: usize,
    pub backup_path: Option<String>,
}

/// Maintenance task runner
pub struct Maintenance {
    store: Arc<Store>,
    index: SharedIndex,
    embeddings: Arc<EmbeddingPipeline>,
    reindex_batch: usize,
}

impl Maintenance {
    pub fn new(
        store: Arc<Store>,
        index: SharedIndex,
        embeddings: Arc<EmbeddingPipeline>,
        reindex_batch: usize,
    ) -> Self {
        Self {
            store,
            index,
            embeddings,
            reindex_batch: reindex_batch.max(1),
        }
    }

    /// Archive profiles with no activity for [`ARCHIVE_AFTER_DAYS`]:
    /// status flips to archived and the vector leaves the live index.
    pub fn archive_inactive(&self) -> Result<usize> {
        let cutoff = Utc::now() - ChronoDuration::days(ARCHIVE_AFTER_DAYS);
        let mut archived = 0;
        for profile in self.store.list_profiles(Some(TalentStatus::Active))? {
            let last_activity = profile
                .last_project_date
                .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
                .unwrap_or(profile.updated_at)
                .max(profile.updated_at);
            if last_activity < cutoff {
                self.store.set_profile_status(&profile.id, TalentStatus::Archived)?;
                self.index
                    .write()
                    .map_err(|_| CoreError::Internal("index lock poisoned".into()))?
                    .delete(&profile.id)
                    .map_err(|e| CoreError::Persistence(e.to_string()))?;
                archived += 1;
            }
        }
        if archived > 0 {
            tracing::info!(archived, "archived inactive profiles");
        }
        Ok(archived)
    }

    /// Remove duplicate vectors: cosine >= [`DEDUP_COSINE`] AND equal
    /// metadata. The lexicographically smaller id survives.
    pub fn optimize(&self) -> Result<usize> {
        let mut index = self
            .index
            .write()
            .map_err(|_| CoreError::Internal("index lock poisoned".into()))?;

        let mut ids = index.ids();
        ids.sort_unstable();
        let records: Vec<(String, Vec<f32>, crate::index::Metadata)> = ids
            .iter()
            .filter_map(|id| index.fetch(id).map(|(v, m)| (id.clone(), v, m)))
            .collect();

        let mut doomed: Vec<String> = Vec::new();
        for i in 0..records.len() {
            if doomed.contains(&records[i].0) {
                continue;
            }
            for j in (i + 1)..records.len() {
                if doomed.contains(&records[j].0) {
                    continue;
                }
                let similar = cosine_similarity(&records[i].1, &records[j].1) >= DEDUP_COSINE;
                if similar && records[i].2 == records[j].2 {
                    doomed.push(records[j].0.clone());
                }
            }
        }

        for id in &doomed {
            index
                .delete(id)
                .map_err(|e| CoreError::Persistence(e.to_string()))?;
        }
        if !doomed.is_empty() {
            index
                .flush()
                .map_err(|e| CoreError::Persistence(e.to_string()))?;
            tracing::info!(removed = doomed.len(), "deduplicated vector index");
        }
        Ok(doomed.len())
    }

    /// Full reindex: re-embed every active profile in batches and swap
    /// the index contents in one write-lock window. Readers keep the old
    /// view until the swap.
    pub async fn reindex_all(&self) -> Result<usize> {
        let profiles = self.store.list_profiles(Some(TalentStatus::Active))?;

        // Embed everything before taking the lock
        let mut prepared = Vec::with_capacity(profiles.len());
        for chunk in profiles.chunks(self.reindex_batch) {
            let texts: Vec<String> = chunk.iter().map(|p| p.searchable_text()).collect();
            let vectors = self.embeddings.embed_batch(&texts).await?;
            for (profile, vector) in chunk.iter().zip(vectors) {
                prepared.push((profile.id.clone(), vector, profile.to_metadata()));
            }
        }

        let mut index = self
            .index
            .write()
            .map_err(|_| CoreError::Internal("index lock poisoned".into()))?;
        for id in index.ids() {
            index
                .delete(&id)
                .map_err(|e| CoreError::Persistence(e.to_string()))?;
        }
        for (id, vector, metadata) in &prepared {
            index
                .upsert(id, vector, metadata.clone())
                .map_err(|e| CoreError::Persistence(e.to_string()))?;
        }
        index
            .flush()
            .map_err(|e| CoreError::Persistence(e.to_string()))?;

        tracing::info!(count = prepared.len(), "full reindex complete");
        Ok(prepared.len())
    }

    /// Serialise ids + metadata into a timestamped snapshot. Vectors are
    /// re-derivable from the profile store and are not included.
    pub fn backup(&self, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir).map_err(|e| CoreError::Persistence(e.to_string()))?;

        let index = self
            .index
            .read()
            .map_err(|_| CoreError::Internal("index lock poisoned".into()))?;
        let snapshot: std::collections::BTreeMap<String, crate::index::Metadata> = index
            .ids()
            .into_iter()
            .filter_map(|id| index.fetch(&id).map(|(_, m)| (id, m)))
            .collect();
        drop(index);

        let path = dir.join(format!(
            "index-backup-{}.json",
            Utc::now().format("%Y%m%dT%H%M%SZ")
        ));
        let body = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(&path, body).map_err(|e| CoreError::Persistence(e.to_string()))?;
        tracing::info!(path = %path.display(), records = snapshot.len(), "index backup written");
        Ok(path)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, TieredCache};
    use crate::embedding::HashProjectionModel;
    use crate::index::{FlatIndex, VectorIndex};
    use crate::talent::TalentProfile;
    use std::sync::RwLock;

    struct Fixture {
        maintenance: Maintenance,
        store: Arc<Store>,
        index: SharedIndex,
        embeddings: Arc<EmbeddingPipeline>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(Some(dir.path().join("test.db"))).unwrap());
        let cache = Arc::new(TieredCache::new(CacheConfig::default()));
        let embeddings = Arc::new(EmbeddingPipeline::new(
            Arc::new(HashProjectionModel::default()),
            cache,
        ));
        let index: SharedIndex = Arc::new(RwLock::new(Box::new(FlatIndex::new(embeddings.dim()))));
        let maintenance = Maintenance::new(store.clone(), index.clone(), embeddings.clone(), 100);
        Fixture { maintenance, store, index, embeddings, _dir: dir }
    }

    async fn seed(f: &Fixture, profile: &TalentProfile) {
        f.store.upsert_profile(profile).unwrap();
        let vector = f.embeddings.embed(&profile.searchable_text()).await.unwrap();
        f.index
            .write()
            .unwrap()
            .upsert(&profile.id, &vector, profile.to_metadata())
            .unwrap();
    }

    #[tokio::test]
    async fn test_archive_inactive() {
        let f = fixture();
        let mut stale = TalentProfile::new("old", "Old Talent");
        stale.updated_at = Utc::now() - ChronoDuration::days(400);
        seed(&f, &stale).await;
        let fresh = TalentProfile::new("new", "New Talent");
        seed(&f, &fresh).await;

        let archived = f.maintenance.archive_inactive().unwrap();
        assert_eq!(archived, 1);
        assert_eq!(
            f.store.get_profile("old").unwrap().unwrap().status,
            TalentStatus::Archived
        );
        assert!(f.index.read().unwrap().fetch("old").is_none());
        assert!(f.index.read().unwrap().fetch("new").is_some());
    }

    #[tokio::test]
    async fn test_optimize_removes_exact_duplicates() {
        let f = fixture();
        let a = TalentProfile::new("a", "Same Person");
        let mut b = TalentProfile::new("b", "Same Person");
        b.created_at = a.created_at;
        b.updated_at = a.updated_at;
        seed(&f, &a).await;
        seed(&f, &b).await;
        let distinct = TalentProfile::new("c", "Someone Else Entirely");
        seed(&f, &distinct).await;

        let removed = f.maintenance.optimize().unwrap();
        assert_eq!(removed, 1);
        // Lexicographically smaller id wins
        assert!(f.index.read().unwrap().fetch("a").is_some());
        assert!(f.index.read().unwrap().fetch("b").is_none());
        assert!(f.index.read().unwrap().fetch("c").is_some());
    }

    #[tokio::test]
    async fn test_reindex_rebuilds_from_store() {
        let f = fixture();
        let p = TalentProfile::new("t1", "Talent One");
        f.store.upsert_profile(&p).unwrap();
        // Index has stale garbage that reindexing must clear
        let garbage = f.embeddings.embed("garbage").await.unwrap();
        f.index
            .write()
            .unwrap()
            .upsert("stale", &garbage, Default::default())
            .unwrap();

        let count = f.maintenance.reindex_all().await.unwrap();
        assert_eq!(count, 1);
        assert!(f.index.read().unwrap().fetch("t1").is_some());
        assert!(f.index.read().unwrap().fetch("stale").is_none());
    }

    #[tokio::test]
    async fn test_backup_writes_snapshot() {
        let f = fixture();
        seed(&f, &TalentProfile::new("t1", "Talent One")).await;

        let backup_dir = f._dir.path().join("backups");
        let path = f.maintenance.backup(&backup_dir).unwrap();
        assert!(path.exists());

        let body: std::collections::BTreeMap<String, crate::index::Metadata> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(body.contains_key("t1"));
    }
}
