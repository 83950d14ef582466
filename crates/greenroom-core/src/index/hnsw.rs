//! HNSW vector index backed by USearch
//!
//! Approximate nearest-neighbour graph over unit vectors (cosine metric).
//! Vectors and metadata are mirrored in a side map so `fetch` and filter
//! evaluation never have to round-trip through the graph.
//!
//! Durability: every `durability_interval` inserts the USearch file and a
//! JSON sidecar (key mappings + metadata + stored vectors) are rewritten
//! atomically. Recovery loads both; if either file is missing the caller
//! is expected to trigger a full reindex from the profile store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use super::flat::write_atomic;
use super::{
    Filter, IndexError, IndexStats, Metadata, VectorHit, VectorIndex, OVERFETCH_FACTOR,
};

/// HNSW connectivity parameter (higher = better recall, more memory)
const DEFAULT_CONNECTIVITY: usize = 16;
/// Expansion factor for index building
const DEFAULT_EXPANSION_ADD: usize = 128;
/// Expansion factor for search
const DEFAULT_EXPANSION_SEARCH: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SidecarRecord {
    vector: Vec<f32>,
    metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    key_to_id: HashMap<String, u64>,
    next_id: u64,
    records: HashMap<String, SidecarRecord>,
}

/// USearch-backed HNSW index
pub struct HnswIndex {
    index: Index,
    dim: usize,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    records: HashMap<String, SidecarRecord>,
    next_id: u64,
    path: Option<PathBuf>,
    durability_interval: usize,
    inserts_since_flush: usize,
}

impl HnswIndex {
    fn make_index(dim: usize) -> Result<Index, IndexError> {
        let options = IndexOptions {
            dimensions: dim,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
            multi: false,
        };
        Index::new(&options).map_err(|e| IndexError::Creation(e.to_string()))
    }

    /// Create an in-memory index
    pub fn new(dim: usize) -> Result<Self, IndexError> {
        Ok(Self {
            index: Self::make_index(dim)?,
            dim,
            key_to_id: HashMap::new(),
            id_to_key: HashMap::new(),
            records: HashMap::new(),
            next_id: 0,
            path: None,
            durability_interval: 100,
            inserts_since_flush: 0,
        })
    }

    /// Open a durable index rooted at `path` (`path.usearch` +
    /// `path.sidecar.json`), loading any previous snapshot.
    pub fn open(path: &Path, dim: usize, durability_interval: usize) -> Result<Self, IndexError> {
        let mut this = Self::new(dim)?;
        this.path = Some(path.to_path_buf());
        this.durability_interval = durability_interval.max(1);

        let index_path = path.with_extension("usearch");
        let sidecar_path = path.with_extension("sidecar.json");
        if index_path.exists() && sidecar_path.exists() {
            let path_str = index_path
                .to_str()
                .ok_or_else(|| IndexError::Persistence("Invalid path".to_string()))?;
            this.index
                .load(path_str)
                .map_err(|e| IndexError::Persistence(e.to_string()))?;

            let raw = std::fs::read_to_string(&sidecar_path)
                .map_err(|e| IndexError::Persistence(e.to_string()))?;
            let sidecar: Sidecar = serde_json::from_str(&raw)
                .map_err(|e| IndexError::Persistence(e.to_string()))?;

            this.id_to_key = sidecar.key_to_id.iter().map(|(k, &v)| (v, k.clone())).collect();
            this.key_to_id = sidecar.key_to_id;
            this.records = sidecar.records;
            this.next_id = sidecar.next_id;
        }

        Ok(this)
    }

    fn reserve_for_one(&self) -> Result<(), IndexError> {
        // usearch requires reserve() before add() once capacity is reached
        let capacity = self.index.capacity();
        let size = self.index.size();
        if size >= capacity {
            let new_capacity = std::cmp::max(capacity * 2, 16);
            self.index
                .reserve(new_capacity)
                .map_err(|e| IndexError::Creation(e.to_string()))?;
        }
        Ok(())
    }

    fn persist(&self) -> Result<(), IndexError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let index_path = path.with_extension("usearch");
        let tmp_index = path.with_extension("usearch.tmp");
        let tmp_str = tmp_index
            .to_str()
            .ok_or_else(|| IndexError::Persistence("Invalid path".to_string()))?;
        self.index
            .save(tmp_str)
            .map_err(|e| IndexError::Persistence(e.to_string()))?;
        std::fs::rename(&tmp_index, &index_path)
            .map_err(|e| IndexError::Persistence(e.to_string()))?;

        let sidecar = Sidecar {
            key_to_id: self.key_to_id.clone(),
            next_id: self.next_id,
            records: self.records.clone(),
        };
        let raw = serde_json::to_vec(&sidecar)
            .map_err(|e| IndexError::Persistence(e.to_string()))?;
        write_atomic(&path.with_extension("sidecar.json"), &raw)?;

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

impl VectorIndex for HnswIndex {
    fn upsert(&mut self, id: &str, vector: &[f32], metadata: Metadata) -> Result<(), IndexError> {
        if vector.len() != self.dim {
            return Err(IndexError::InvalidDimensions(self.dim, vector.len()));
        }

        let numeric_id = if let Some(&existing) = self.key_to_id.get(id) {
            self.index
                .remove(existing)
                .map_err(|e| IndexError::Upsert(e.to_string()))?;
            existing
        } else {
            let fresh = self.next_id;
            self.next_id += 1;
            self.key_to_id.insert(id.to_string(), fresh);
            self.id_to_key.insert(fresh, id.to_string());
            fresh
        };

        self.reserve_for_one()?;
        self.index
            .add(numeric_id, vector)
            .map_err(|e| IndexError::Upsert(e.to_string()))?;
        self.records.insert(
            id.to_string(),
            SidecarRecord { vector: vector.to_vec(), metadata },
        );
        self.maybe_persist()
    }

    fn delete(&mut self, id: &str) -> Result<bool, IndexError> {
        let Some(numeric_id) = self.key_to_id.remove(id) else {
            return Ok(false);
        };
        self.id_to_key.remove(&numeric_id);
        self.records.remove(id);
        self.index
            .remove(numeric_id)
            .map_err(|e| IndexError::Upsert(e.to_string()))?;
        self.maybe_persist()?;
        Ok(true)
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
        if k == 0 || self.index.size() == 0 {
            return Ok(vec![]);
        }

        let fetch_n = k * OVERFETCH_FACTOR;
        let results = self
            .index
            .search(vector, fetch_n)
            .map_err(|e| IndexError::Search(e.to_string()))?;

        let mut hits = Vec::with_capacity(results.keys.len());
        for (numeric_id, distance) in results.keys.iter().zip(results.distances.iter()) {
            let Some(key) = self.id_to_key.get(numeric_id) else {
                continue;
            };
            let metadata = self
                .records
                .get(key)
                .map(|r| r.metadata.clone())
                .unwrap_or_default();
            if let Some(f) = filter {
                if !f.matches(&metadata) {
                    continue;
                }
            }
            // Cosine distance -> similarity
            hits.push(VectorHit {
                id: key.clone(),
                score: 1.0 - distance,
                metadata,
            });
            if hits.len() >= k {
                break;
            }
        }
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
            backend: "hnsw",
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

    fn test_vector(seed: f32, dim: usize) -> Vec<f32> {
        unit((0..dim).map(|i| ((i as f32 + seed) / dim as f32).sin()).collect())
    }

    #[test]
    fn test_add_and_search() {
        let mut index = HnswIndex::new(16).unwrap();
        index.upsert("t1", &test_vector(1.0, 16), Metadata::new()).unwrap();
        index.upsert("t2", &test_vector(50.0, 16), Metadata::new()).unwrap();

        let hits = index.query(&test_vector(1.0, 16), None, 2).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, "t1");
    }

    #[test]
    fn test_upsert_replaces_single_record() {
        let mut index = HnswIndex::new(16).unwrap();
        index.upsert("t1", &test_vector(1.0, 16), Metadata::new()).unwrap();
        let mut m = Metadata::new();
        m.insert("v".into(), MetaValue::Num(2.0));
        index.upsert("t1", &test_vector(2.0, 16), m.clone()).unwrap();

        assert_eq!(index.stats().count, 1);
        let (_, meta) = index.fetch("t1").unwrap();
        assert_eq!(meta, m);
    }

    #[test]
    fn test_delete_is_effective() {
        let mut index = HnswIndex::new(16).unwrap();
        index.upsert("t1", &test_vector(1.0, 16), Metadata::new()).unwrap();
        assert!(index.delete("t1").unwrap());

        let hits = index.query(&test_vector(1.0, 16), None, 5).unwrap();
        assert!(hits.iter().all(|h| h.id != "t1"));
    }

    #[test]
    fn test_filtered_query() {
        let mut index = HnswIndex::new(16).unwrap();
        let mut mumbai = Metadata::new();
        mumbai.insert("location".into(), MetaValue::Str("mumbai".into()));
        index.upsert("t1", &test_vector(1.0, 16), mumbai).unwrap();
        index.upsert("t2", &test_vector(1.1, 16), Metadata::new()).unwrap();

        let f = Filter::eq("location", "mumbai");
        let hits = index.query(&test_vector(1.0, 16), Some(&f), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "t1");
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talent.index");

        {
            let mut index = HnswIndex::open(&path, 16, 1).unwrap();
            let mut m = Metadata::new();
            m.insert("name".into(), MetaValue::Str("A".into()));
            index.upsert("t1", &test_vector(1.0, 16), m).unwrap();
            index.flush().unwrap();
        }

        let reopened = HnswIndex::open(&path, 16, 1).unwrap();
        assert_eq!(reopened.stats().count, 1);
        assert!(reopened.fetch("t1").is_some());
        let hits = reopened.query(&test_vector(1.0, 16), None, 1).unwrap();
        assert_eq!(hits[0].id, "t1");
    }
}
