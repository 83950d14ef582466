//! Exact-scan vector index
//!
//! Degenerate fallback backend: linear cosine scan over all stored
//! vectors. Correct for any size, fast enough below ~50k records, and
//! the reference implementation the HNSW backend is tested against.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{
    Filter, IndexError, IndexStats, Metadata, VectorHit, VectorIndex, OVERFETCH_FACTOR,
};
use crate::embedding::cosine_similarity;

/// One persisted record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    vector: Vec<f32>,
    metadata: Metadata,
}

/// Exact-scan index with the same durability scheme as the HNSW backend:
/// vectors in a postcard file, metadata in a JSON sidecar, both rewritten
/// atomically (write-tmp-then-rename) every `durability_interval` inserts.
pub struct FlatIndex {
    records: HashMap<String, StoredRecord>,
    dim: usize,
    path: Option<PathBuf>,
    durability_interval: usize,
    inserts_since_flush: usize,
}

impl FlatIndex {
    /// Create an in-memory index (no persistence)
    pub fn new(dim: usize) -> Self {
        Self {
            records: HashMap::new(),
            dim,
            path: None,
            durability_interval: 100,
            inserts_since_flush: 0,
        }
    }

    /// Create a durable index rooted at `path` (`path.vectors` +
    /// `path.meta.json`), loading any previous snapshot.
    pub fn open(path: &Path, dim: usize, durability_interval: usize) -> Result<Self, IndexError> {
        let mut index = Self::new(dim);
        index.path = Some(path.to_path_buf());
        index.durability_interval = durability_interval.max(1);

        let vectors_path = path.with_extension("vectors");
        let meta_path = path.with_extension("meta.json");
        if vectors_path.exists() && meta_path.exists() {
            let raw = std::fs::read(&vectors_path)
                .map_err(|e| IndexError::Persistence(e.to_string()))?;
            let vectors: HashMap<String, Vec<f32>> = postcard::from_bytes(&raw)
                .map_err(|e| IndexError::Persistence(e.to_string()))?;

            let meta_raw = std::fs::read_to_string(&meta_path)
                .map_err(|e| IndexError::Persistence(e.to_string()))?;
            let metadata: HashMap<String, Metadata> = serde_json::from_str(&meta_raw)
                .map_err(|e| IndexError::Persistence(e.to_string()))?;

            for (id, vector) in vectors {
                let meta = metadata.get(&id).cloned().unwrap_or_default();
                index.records.insert(id, StoredRecord { vector, metadata: meta });
            }
        }

        Ok(index)
    }

    fn persist(&self) -> Result<(), IndexError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let vectors: HashMap<&String, &Vec<f32>> =
            self.records.iter().map(|(k, r)| (k, &r.vector)).collect();
        let raw = postcard::to_allocvec(&vectors)
            .map_err(|e| IndexError::Persistence(e.to_string()))?;
        write_atomic(&path.with_extension("vectors"), &raw)?;

        let metadata: HashMap<&String, &Metadata> =
            self.records.iter().map(|(k, r)| (k, &r.metadata)).collect();
        let meta_raw = serde_json::to_vec(&metadata)
            .map_err(|e| IndexError::Persistence(e.to_string()))?;
        write_atomic(&path.with_extension("meta.json"), &meta_raw)?;

        Ok(())
    }

    fn maybe_persist(&mut self) -> Result<(), IndexError> {
        self.inserts_since_flush += 1;
        if self.inserts_since_flush >= self.durability_interval {
            self.persist()?;
            self.inserts_since_flush = 0;
        }
        Ok(())
    }
}

/// Write `bytes` to `path` via a temp file and rename, so a crash can
/// never leave a half-written snapshot behind.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes).map_err(|e| IndexError::Persistence(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| IndexError::Persistence(e.to_string()))?;
    Ok(())
}

impl VectorIndex for FlatIndex {
    fn upsert(&mut self, id: &str, vector: &[f32], metadata: Metadata) -> Result<(), IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::InvalidDimensions(self.dim, vector.len()));
        }
        self.records.insert(
            id.to_string(),
            StoredRecord { vector: vector.to_vec(), metadata },
        );
        self.maybe_persist()
    }

    fn delete(&mut self, id: &str) -> Result<bool, IndexError> {
        let existed = self.records.remove(id).is_some();
        if existed {
            self.maybe_persist()?;
        }
        Ok(existed)
    }

    fn query(
        &self,
        vector: &[f32],
        filter: Option<&Filter>,
        k: usize,
    ) -> Result<Vec<VectorHit>, IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::InvalidDimensions(self.dim, vector.len()));
        }
        if k == 0 || self.records.is_empty() {
            return Ok(vec![]);
        }

        let mut hits: Vec<VectorHit> = self
            .records
            .iter()
            .map(|(id, rec)| VectorHit {
                id: id.clone(),
                score: cosine_similarity(vector, &rec.vector),
                metadata: rec.metadata.clone(),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        // Exact scan sees everything, but the contract is shared with the
        // approximate backend: over-fetch, filter, truncate.
        hits.truncate(k * OVERFETCH_FACTOR);
        if let Some(f) = filter {
            hits.retain(|h| f.matches(&h.metadata));
        }
        hits.truncate(k);
        Ok(hits)
    }

    fn fetch(&self, id: &str) -> Option<(Vec<f32>, Metadata)> {
        self.records
            .get(id)
            .map(|r| (r.vector.clone(), r.metadata.clone()))
    }

    fn ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            count: self.records.len(),
            dim: self.dim,
            backend: "flat",
        }
    }

    fn flush(&mut self) -> Result<(), IndexError> {
        self.persist()?;
        self.inserts_since_flush = 0;
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MetaValue;

    fn unit(mut v: Vec<f32>) -> Vec<f32> {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut v {
            *x /= norm;
        }
        v
    }

    fn vec3(a: f32, b: f32, c: f32) -> Vec<f32> {
        unit(vec![a, b, c])
    }

    #[test]
    fn test_upsert_fetch_roundtrip() {
        let mut index = FlatIndex::new(3);
        let mut m = Metadata::new();
        m.insert("location".into(), MetaValue::Str("mumbai".into()));

        index.upsert("t1", &vec3(1.0, 0.0, 0.0), m.clone()).unwrap();
        let (v, meta) = index.fetch("t1").unwrap();
        assert_eq!(v.len(), 3);
        assert_eq!(meta, m);
    }

    #[test]
    fn test_upsert_replaces() {
        let mut index = FlatIndex::new(3);
        index.upsert("t1", &vec3(1.0, 0.0, 0.0), Metadata::new()).unwrap();
        let mut m2 = Metadata::new();
        m2.insert("v".into(), MetaValue::Num(2.0));
        index.upsert("t1", &vec3(0.0, 1.0, 0.0), m2.clone()).unwrap();

        assert_eq!(index.stats().count, 1);
        let (v, meta) = index.fetch("t1").unwrap();
        assert!((v[1] - 1.0).abs() < 1e-6);
        assert_eq!(meta, m2);
    }

    #[test]
    fn test_deleted_id_never_returned() {
        let mut index = FlatIndex::new(3);
        index.upsert("t1", &vec3(1.0, 0.0, 0.0), Metadata::new()).unwrap();
        index.upsert("t2", &vec3(0.9, 0.1, 0.0), Metadata::new()).unwrap();
        assert!(index.delete("t1").unwrap());
        assert!(!index.delete("t1").unwrap());

        let hits = index.query(&vec3(1.0, 0.0, 0.0), None, 10).unwrap();
        assert!(hits.iter().all(|h| h.id != "t1"));
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_query_orders_by_similarity() {
        let mut index = FlatIndex::new(3);
        index.upsert("near", &vec3(1.0, 0.1, 0.0), Metadata::new()).unwrap();
        index.upsert("far", &vec3(0.0, 1.0, 0.0), Metadata::new()).unwrap();

        let hits = index.query(&vec3(1.0, 0.0, 0.0), None, 2).unwrap();
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_query_with_filter() {
        let mut index = FlatIndex::new(3);
        let mut mumbai = Metadata::new();
        mumbai.insert("location".into(), MetaValue::Str("mumbai".into()));
        let mut delhi = Metadata::new();
        delhi.insert("location".into(), MetaValue::Str("delhi".into()));

        index.upsert("t1", &vec3(1.0, 0.0, 0.0), mumbai).unwrap();
        index.upsert("t2", &vec3(0.99, 0.05, 0.0), delhi).unwrap();

        let f = Filter::eq("location", "mumbai");
        let hits = index.query(&vec3(1.0, 0.0, 0.0), Some(&f), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "t1");
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut index = FlatIndex::new(3);
        assert!(index.upsert("t1", &[1.0, 0.0], Metadata::new()).is_err());
        assert!(index.query(&[1.0], None, 5).is_err());
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talent.index");

        {
            let mut index = FlatIndex::open(&path, 3, 1).unwrap();
            let mut m = Metadata::new();
            m.insert("name".into(), MetaValue::Str("A".into()));
            index.upsert("t1", &vec3(1.0, 0.0, 0.0), m).unwrap();
        }

        let reopened = FlatIndex::open(&path, 3, 1).unwrap();
        assert_eq!(reopened.stats().count, 1);
        let (_, meta) = reopened.fetch("t1").unwrap();
        assert_eq!(meta.get("name"), Some(&MetaValue::Str("A".into())));
    }
}
