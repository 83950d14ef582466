//! Semantic graph
//!
//! Durable typed relationships mined from episodic memory. Arena layout:
//! nodes live in a dense vector, edges hold indices, nothing owns a
//! reference to anything else - cycles are just indices pointing at each
//! other. Graph algorithms (PageRank, community detection) run on compact
//! copies taken under the lock, never on live structures.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{GraphEdgeRow, GraphNodeRow, Store};

// ============================================================================
// KINDS
// ============================================================================

/// Node type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Actor,
    Project,
    Genre,
    Skill,
    Platform,
    Location,
    User,
    Other(String),
}

impl NodeKind {
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Actor => "actor",
            NodeKind::Project => "project",
            NodeKind::Genre => "genre",
            NodeKind::Skill => "skill",
            NodeKind::Platform => "platform",
            NodeKind::Location => "location",
            NodeKind::User => "user",
            NodeKind::Other(s) => s,
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "actor" => NodeKind::Actor,
            "project" => NodeKind::Project,
            "genre" => NodeKind::Genre,
            "skill" => NodeKind::Skill,
            "platform" => NodeKind::Platform,
            "location" => NodeKind::Location,
            "user" => NodeKind::User,
            other => NodeKind::Other(other.to_string()),
        }
    }
}

/// Edge predicate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    WorkedWith,
    SimilarTo,
    BelongsTo,
    Prefers,
    SpecializesIn,
    Other(String),
}

impl EdgeKind {
    pub fn as_str(&self) -> &str {
        match self {
            EdgeKind::WorkedWith => "WORKED_WITH",
            EdgeKind::SimilarTo => "SIMILAR_TO",
            EdgeKind::BelongsTo => "BELONGS_TO",
            EdgeKind::Prefers => "PREFERS",
            EdgeKind::SpecializesIn => "SPECIALIZES_IN",
            EdgeKind::Other(s) => s,
        }
    }

    pub fn parse_name(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "WORKED_WITH" => EdgeKind::WorkedWith,
            "SIMILAR_TO" => EdgeKind::SimilarTo,
            "BELONGS_TO" => EdgeKind::BelongsTo,
            "PREFERS" => EdgeKind::Prefers,
            "SPECIALIZES_IN" => EdgeKind::SpecializesIn,
            other => EdgeKind::Other(other.to_string()),
        }
    }
}

// ============================================================================
// ARENA
// ============================================================================

/// A graph node (arena slot)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub kind: NodeKind,
    /// Normalised identity within the kind (e.g. lowercased name)
    pub key: String,
    pub attrs: BTreeMap<String, String>,
}

/// A directed labelled edge between arena indices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub subject: usize,
    pub predicate: EdgeKind,
    pub object: usize,
    /// Belief in the relationship, [0.1, 1.0]
    pub confidence: f64,
    pub evidence_count: u32,
    pub metadata: BTreeMap<String, String>,
}

/// Pattern for `query`: any `None` field is a wildcard
#[derive(Debug, Clone, Default)]
pub struct EdgePattern {
    pub subject_kind: Option<NodeKind>,
    pub subject_key: Option<String>,
    pub predicate: Option<EdgeKind>,
    pub object_kind: Option<NodeKind>,
    pub object_key: Option<String>,
    pub min_confidence: Option<f64>,
}

/// Arena-backed semantic graph
#[derive(Debug, Default)]
pub struct SemanticGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    /// (kind, key) -> arena index
    node_lookup: HashMap<(String, String), usize>,
    /// node index -> outgoing edge indices
    adjacency: Vec<Vec<usize>>,
    /// (subject, predicate, object) -> edge index
    edge_lookup: HashMap<(usize, String, usize), usize>,
}

impl SemanticGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, index: usize) -> Option<&GraphNode> {
        self.nodes.get(index)
    }

    /// Insert or update a node, returning its arena index
    pub fn upsert_node(
        &mut self,
        kind: NodeKind,
        key: &str,
        attrs: BTreeMap<String, String>,
    ) -> usize {
        let key = key.trim().to_lowercase();
        let lookup = (kind.as_str().to_string(), key.clone());
        if let Some(&index) = self.node_lookup.get(&lookup) {
            self.nodes[index].attrs.extend(attrs);
            return index;
        }
        let index = self.nodes.len();
        self.nodes.push(GraphNode { kind, key, attrs });
        self.adjacency.push(Vec::new());
        self.node_lookup.insert(lookup, index);
        index
    }

    pub fn find_node(&self, kind: &NodeKind, key: &str) -> Option<usize> {
        self.node_lookup
            .get(&(kind.as_str().to_string(), key.trim().to_lowercase()))
            .copied()
    }

    /// Insert an edge or reinforce an existing one. New edges start at
    /// `confidence`; repeat upserts count as positive evidence.
    pub fn upsert_edge(
        &mut self,
        subject: usize,
        predicate: EdgeKind,
        object: usize,
        confidence: f64,
    ) -> usize {
        let lookup = (subject, predicate.as_str().to_string(), object);
        if let Some(&index) = self.edge_lookup.get(&lookup) {
            self.apply_feedback(index, true);
            return index;
        }
        let index = self.edges.len();
        self.edges.push(GraphEdge {
            subject,
            predicate,
            object,
            confidence: confidence.clamp(0.1, 1.0),
            evidence_count: 1,
            metadata: BTreeMap::new(),
        });
        self.adjacency[subject].push(index);
        self.edge_lookup.insert(lookup, index);
        index
    }

    /// Bayesian-ish confidence update from explicit feedback
    pub fn apply_feedback(&mut self, edge_index: usize, positive: bool) {
        if let Some(edge) = self.edges.get_mut(edge_index) {
            edge.confidence = if positive {
                (edge.confidence * 1.1).min(1.0)
            } else {
                (edge.confidence * 0.9).max(0.1)
            };
            edge.evidence_count += 1;
        }
    }

    /// Outgoing neighbours, optionally restricted to one predicate
    pub fn neighbors(&self, node: usize, predicate: Option<&EdgeKind>) -> Vec<(usize, &GraphEdge)> {
        let Some(edge_indices) = self.adjacency.get(node) else {
            return vec![];
        };
        edge_indices
            .iter()
            .map(|&i| &self.edges[i])
            .filter(|e| predicate.map(|p| &e.predicate == p).unwrap_or(true))
            .map(|e| (e.object, e))
            .collect()
    }

    /// All edges matching a pattern
    pub fn query(&self, pattern: &EdgePattern) -> Vec<&GraphEdge> {
        self.edges
            .iter()
            .filter(|e| {
                let subject = &self.nodes[e.subject];
                let object = &self.nodes[e.object];
                pattern.subject_kind.as_ref().map(|k| &subject.kind == k).unwrap_or(true)
                    && pattern
                        .subject_key
                        .as_ref()
                        .map(|k| subject.key == k.to_lowercase())
                        .unwrap_or(true)
                    && pattern.predicate.as_ref().map(|p| &e.predicate == p).unwrap_or(true)
                    && pattern.object_kind.as_ref().map(|k| &object.kind == k).unwrap_or(true)
                    && pattern
                        .object_key
                        .as_ref()
                        .map(|k| object.key == k.to_lowercase())
                        .unwrap_or(true)
                    && pattern.min_confidence.map(|c| e.confidence >= c).unwrap_or(true)
            })
            .collect()
    }

    // ========================================================================
    // ALGORITHMS (run on compact copies)
    // ========================================================================

    /// PageRank over the edge structure, confidence-weighted
    pub fn pagerank(&self, damping: f64, iterations: usize) -> Vec<f64> {
        let n = self.nodes.len();
        if n == 0 {
            return vec![];
        }

        // Compact copy: per-node outgoing (target, weight) lists
        let outgoing: Vec<Vec<(usize, f64)>> = (0..n)
            .map(|i| {
                self.adjacency[i]
                    .iter()
                    .map(|&e| (self.edges[e].object, self.edges[e].confidence))
                    .collect()
            })
            .collect();
        let out_weight: Vec<f64> = outgoing
            .iter()
            .map(|targets| targets.iter().map(|(_, w)| w).sum::<f64>())
            .collect();

        let mut rank = vec![1.0 / n as f64; n];
        for _ in 0..iterations {
            let mut next = vec![(1.0 - damping) / n as f64; n];
            for (i, targets) in outgoing.iter().enumerate() {
                if targets.is_empty() {
                    // Dangling mass is spread uniformly
                    let share = damping * rank[i] / n as f64;
                    for r in next.iter_mut() {
                        *r += share;
                    }
                } else {
                    for (target, weight) in targets {
                        next[*target] += damping * rank[i] * weight / out_weight[i];
                    }
                }
            }
            rank = next;
        }
        rank
    }

    /// Label-propagation community detection on an undirected snapshot.
    /// Returns a community label per node; deterministic (no random tie
    /// breaking - lowest label wins).
    pub fn community_detect(&self, max_iterations: usize) -> Vec<usize> {
        let n = self.nodes.len();
        let mut undirected: Vec<Vec<usize>> = vec![Vec::new(); n];
        for e in &self.edges {
            undirected[e.subject].push(e.object);
            undirected[e.object].push(e.subject);
        }

        let mut labels: Vec<usize> = (0..n).collect();
        for _ in 0..max_iterations {
            let mut changed = false;
            for i in 0..n {
                if undirected[i].is_empty() {
                    continue;
                }
                let mut counts: HashMap<usize, usize> = HashMap::new();
                for &nb in &undirected[i] {
                    *counts.entry(labels[nb]).or_default() += 1;
                }
                let best = counts
                    .into_iter()
                    .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                    .map(|(label, _)| label)
                    .unwrap_or(labels[i]);
                if best != labels[i] {
                    labels[i] = best;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        labels
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    /// Persist the whole arena as a denormalized snapshot
    pub fn save(&self, store: &Store) -> Result<()> {
        let nodes: Vec<GraphNodeRow> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| {
                Ok(GraphNodeRow {
                    id: i as i64,
                    kind: n.kind.as_str().to_string(),
                    key: n.key.clone(),
                    attrs_json: serde_json::to_string(&n.attrs)?,
                })
            })
            .collect::<Result<_>>()?;
        let edges: Vec<GraphEdgeRow> = self
            .edges
            .iter()
            .map(|e| {
                Ok(GraphEdgeRow {
                    subject: e.subject as i64,
                    predicate: e.predicate.as_str().to_string(),
                    object: e.object as i64,
                    confidence: e.confidence,
                    evidence_count: e.evidence_count as i64,
                    metadata_json: serde_json::to_string(&e.metadata)?,
                })
            })
            .collect::<Result<_>>()?;
        store.save_graph(&nodes, &edges)
    }

    /// Rebuild the arena from a persisted snapshot
    pub fn load(store: &Store) -> Result<Self> {
        let (node_rows, edge_rows) = store.load_graph()?;
        let mut graph = Self::new();
        // Node ids were written as dense arena indices in order
        for row in node_rows {
            let attrs: BTreeMap<String, String> =
                serde_json::from_str(&row.attrs_json).unwrap_or_default();
            graph.upsert_node(NodeKind::parse_name(&row.kind), &row.key, attrs);
        }
        for row in edge_rows {
            let (subject, object) = (row.subject as usize, row.object as usize);
            if subject >= graph.nodes.len() || object >= graph.nodes.len() {
                continue;
            }
            let index = graph.edges.len();
            let predicate = EdgeKind::parse_name(&row.predicate);
            graph.edge_lookup.insert(
                (subject, predicate.as_str().to_string(), object),
                index,
            );
            graph.adjacency[subject].push(index);
            graph.edges.push(GraphEdge {
                subject,
                predicate,
                object,
                confidence: row.confidence,
                evidence_count: row.evidence_count as u32,
                metadata: serde_json::from_str(&row.metadata_json).unwrap_or_default(),
            });
        }
        Ok(graph)
    }
}

// ============================================================================
// TESTS
// ============================================================================
