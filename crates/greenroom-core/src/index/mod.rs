//! Vector Index
//!
//! k-NN retrieval over unit-norm vectors with flat metadata for filtering
//! and post-retrieval display. Two interchangeable back-ends:
//!
//! - [`HnswIndex`] - USearch HNSW graph (feature `hnsw`), sub-millisecond
//!   queries, persisted as an index file plus a metadata sidecar
//! - [`FlatIndex`] - exact scan fallback, always compiled, same contract
//!
//! The profile store is the source of truth; any index can be dropped and
//! rebuilt from it without data loss.

mod flat;
#[cfg(feature = "hnsw")]
mod hnsw;

pub use flat::FlatIndex;
#[cfg(feature = "hnsw")]
pub use hnsw::HnswIndex;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Filters are evaluated post-retrieval over an over-fetched candidate
/// set: the back-end is asked for `k * OVERFETCH_FACTOR`, matches are
/// filtered, and the survivors truncated to `k`.
pub const OVERFETCH_FACTOR: usize = 3;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector index error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum IndexError {
    /// Failed to create the backing index
    Creation(String),
    /// Failed to add or replace a vector
    Upsert(String),
    /// Failed to search
    Search(String),
    /// Failed to persist or load index state
    Persistence(String),
    /// Dimension mismatch (expected, got)
    InvalidDimensions(usize, usize),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::Creation(e) => write!(f, "Index creation failed: {}", e),
            IndexError::Upsert(e) => write!(f, "Upsert failed: {}", e),
            IndexError::Search(e) => write!(f, "Search failed: {}", e),
            IndexError::Persistence(e) => write!(f, "Persistence failed: {}", e),
            IndexError::InvalidDimensions(expected, got) => {
                write!(f, "Invalid dimensions: expected {}, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for IndexError {}

// ============================================================================
// METADATA
// ============================================================================

/// A scalar or string-sequence metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Str(String),
    Num(f64),
    Bool(bool),
    List(Vec<String>),
}

impl MetaValue {
    pub fn as_num(&self) -> Option<f64> {
        match self {
            MetaValue::Num(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// String equality that also matches against list membership, so
    /// `Eq("languages", "hindi")` works on a list-valued field.
    fn matches_str(&self, needle: &str) -> bool {
        match self {
            MetaValue::Str(s) => s.eq_ignore_ascii_case(needle),
            MetaValue::List(items) => items.iter().any(|i| i.eq_ignore_ascii_case(needle)),
            _ => false,
        }
    }
}

/// Flat metadata map attached to every vector record
pub type Metadata = BTreeMap<String, MetaValue>;

// ============================================================================
// FILTERS
// ============================================================================

/// A single predicate over one metadata field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Predicate {
    /// Field equals value (case-insensitive for strings, membership for lists)
    Eq(String, MetaValue),
    /// Field equals any of the values
    In(String, Vec<MetaValue>),
    /// Numeric field within [min, max] (either bound optional)
    Range {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
}

impl Predicate {
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Predicate::Eq(field, want) => match (metadata.get(field), want) {
                (Some(have), MetaValue::Str(s)) => have.matches_str(s),
                (Some(have), other) => have == other,
                (None, _) => false,
            },
            Predicate::In(field, options) => options.iter().any(|want| {
                Predicate::Eq(field.clone(), want.clone()).matches(metadata)
            }),
            Predicate::Range { field, min, max } => {
                let Some(n) = metadata.get(field).and_then(MetaValue::as_num) else {
                    return false;
                };
                min.map(|lo| n >= lo).unwrap_or(true) && max.map(|hi| n <= hi).unwrap_or(true)
            }
        }
    }
}

/// Logical combination of predicates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Filter {
    Is(Predicate),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Filter::Is(p) => p.matches(metadata),
            Filter::And(fs) => fs.iter().all(|f| f.matches(metadata)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(metadata)),
            Filter::Not(f) => !f.matches(metadata),
        }
    }

    /// Convenience: a conjunction, or `None` for an empty clause list
    pub fn all(clauses: Vec<Filter>) -> Option<Filter> {
        if clauses.is_empty() {
            None
        } else {
            Some(Filter::And(clauses))
        }
    }

    pub fn eq(field: &str, value: impl Into<String>) -> Filter {
        Filter::Is(Predicate::Eq(field.to_string(), MetaValue::Str(value.into())))
    }

    pub fn range(field: &str, min: Option<f64>, max: Option<f64>) -> Filter {
        Filter::Is(Predicate::Range { field: field.to_string(), min, max })
    }
}

// ============================================================================
// TRAIT
// ============================================================================

/// One retrieval hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    /// Cosine similarity in [-1, 1], higher is better
    pub score: f32,
    pub metadata: Metadata,
}

/// Index statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub count: usize,
    pub dim: usize,
    pub backend: &'static str,
}

/// Shared handle to whichever backend is configured: the index manager
/// takes the write side, queries take the read side.
pub type SharedIndex = std::sync::Arc<std::sync::RwLock<Box<dyn VectorIndex>>>;

/// Common contract for all vector index back-ends.
///
/// For any id at most one vector exists; `upsert` replaces, `delete` is
/// effective for every subsequent query.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector and metadata stored under `id`
    fn upsert(&mut self, id: &str, vector: &[f32], metadata: Metadata) -> Result<(), IndexError>;

    /// Remove `id`; returns whether it existed
    fn delete(&mut self, id: &str) -> Result<bool, IndexError>;

    /// k-NN with optional post-retrieval metadata filter
    fn query(
        &self,
        vector: &[f32],
        filter: Option<&Filter>,
        k: usize,
    ) -> Result<Vec<VectorHit>, IndexError>;

    /// Exact lookup of a stored record
    fn fetch(&self, id: &str) -> Option<(Vec<f32>, Metadata)>;

    /// All stored ids (maintenance passes iterate with this)
    fn ids(&self) -> Vec<String>;

    fn stats(&self) -> IndexStats;

    /// Force a durable snapshot regardless of the insert counter
    fn flush(&mut self) -> Result<(), IndexError>;
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(&str, MetaValue)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_eq_predicate_is_case_insensitive() {
        let m = meta(&[("location", MetaValue::Str("mumbai".into()))]);
        assert!(Predicate::Eq("location".into(), MetaValue::Str("Mumbai".into())).matches(&m));
        assert!(!Predicate::Eq("location".into(), MetaValue::Str("Delhi".into())).matches(&m));
    }

    #[test]
    fn test_eq_predicate_matches_list_membership() {
        let m = meta(&[(
            "languages",
            MetaValue::List(vec!["hindi".into(), "english".into()]),
        )]);
        assert!(Predicate::Eq("languages".into(), MetaValue::Str("Hindi".into())).matches(&m));
        assert!(!Predicate::Eq("languages".into(), MetaValue::Str("tamil".into())).matches(&m));
    }

    #[test]
    fn test_range_predicate() {
        let m = meta(&[("age", MetaValue::Num(28.0))]);
        let p = Predicate::Range { field: "age".into(), min: Some(25.0), max: Some(30.0) };
        assert!(p.matches(&m));
        let p = Predicate::Range { field: "age".into(), min: Some(30.0), max: None };
        assert!(!p.matches(&m));
        // Missing field never matches a range
        let p = Predicate::Range { field: "height".into(), min: None, max: Some(200.0) };
        assert!(!p.matches(&m));
    }

    #[test]
    fn test_filter_combinators() {
        let m = meta(&[
            ("gender", MetaValue::Str("female".into())),
            ("age", MetaValue::Num(28.0)),
        ]);
        let f = Filter::And(vec![
            Filter::eq("gender", "female"),
            Filter::range("age", Some(25.0), Some(30.0)),
        ]);
        assert!(f.matches(&m));

        let f = Filter::Not(Box::new(Filter::eq("gender", "female")));
        assert!(!f.matches(&m));

        let f = Filter::Or(vec![Filter::eq("gender", "male"), Filter::range("age", None, Some(30.0))]);
        assert!(f.matches(&m));
    }

    #[test]
    fn test_filter_all_empty_is_none() {
        assert!(Filter::all(vec![]).is_none());
    }
}
