//! Tiered Memory
//!
//! - [`session`] - short-term memory: bounded per-session turn logs
//! - [`episodic`] - durable interaction records under a retention curve
//! - [`graph`] - semantic graph of durable relationships
//! - [`procedural`] - recurring action sequences and best paths
//!
//! The consolidation engine moves material downward through these tiers
//! on a timer; request handling only ever appends to session memory.

pub mod episodic;
pub mod graph;
pub mod procedural;
pub mod session;

pub use episodic::{retention, EpisodicRecord, EpisodicStore};
pub use graph::{EdgeKind, GraphEdge, GraphNode, NodeKind, SemanticGraph};
pub use procedural::{ActionStep, ProceduralPattern, ProceduralStore};
pub use session::{Role, SessionStore, Turn};
