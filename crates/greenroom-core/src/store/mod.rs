//! Durable store
//!
//! SQLite persistence for everything the engine owns durably: talent
//! profiles (the source of truth the vector index is derived from),
//! long-term memory tables, and the experiment result log.
//!
//! Separate reader/writer connections behind mutexes give interior
//! mutability: all methods take `&self`, so the engine can share one
//! `Arc<Store>` everywhere.

mod migrations;

pub use migrations::apply_migrations;

use std::path::PathBuf;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CoreError, Result};
use crate::experiment::ExperimentResult;
use crate::memory::episodic::EpisodicRecord;
use crate::talent::{TalentProfile, TalentStatus};

/// Denormalized graph node row
#[derive(Debug, Clone)]
pub struct GraphNodeRow {
    pub id: i64,
    pub kind: String,
    pub key: String,
    pub attrs_json: String,
}

/// Denormalized graph edge row
#[derive(Debug, Clone)]
pub struct GraphEdgeRow {
    pub subject: i64,
    pub predicate: String,
    pub object: i64,
    pub confidence: f64,
    pub evidence_count: i64,
    pub metadata_json: String,
}

// ============================================================================
// STORE
// ============================================================================

/// Shared SQLite store
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl Store {
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -32000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (creating if needed) the store at `path`, or at the platform
    /// data directory when `None`.
    pub fn open(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let dirs = directories::ProjectDirs::from("ai", "greenroom", "core")
                    .ok_or_else(|| {
                        CoreError::Persistence("Could not determine data directory".to_string())
                    })?;
                let data_dir = dirs.data_dir();
                std::fs::create_dir_all(data_dir)
                    .map_err(|e| CoreError::Persistence(e.to_string()))?;
                data_dir.join("greenroom.db")
            }
        };

        let writer = Connection::open(&path)?;
        Self::configure_connection(&writer)?;
        migrations::apply_migrations(&writer)?;

        let reader = Connection::open(&path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| CoreError::Persistence("writer lock poisoned".to_string()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| CoreError::Persistence("reader lock poisoned".to_string()))
    }

    // ========================================================================
    // PROFILES
    // ========================================================================

    pub fn upsert_profile(&self, profile: &TalentProfile) -> Result<()> {
        if profile.id.is_empty() {
            return Err(CoreError::Validation("talent id must not be empty".into()));
        }
        let json = serde_json::to_string(profile)?;
        self.writer()?.execute(
            "INSERT INTO talents (id, name, age, gender, location, status, profile, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                age = excluded.age,
                gender = excluded.gender,
                location = excluded.location,
                status = excluded.status,
                profile = excluded.profile,
                updated_at = excluded.updated_at",
            params![
                profile.id,
                profile.name,
                profile.age,
                profile.gender.map(|g| g.as_str()),
                profile.location.as_deref().map(str::to_lowercase),
                profile.status.as_str(),
                json,
                profile.created_at.to_rfc3339(),
                profile.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_profile(&self, id: &str) -> Result<Option<TalentProfile>> {
        let reader = self.reader()?;
        let json: Option<String> = reader
            .query_row("SELECT profile FROM talents WHERE id = ?1", [id], |r| r.get(0))
            .optional()?;
        match json {
            Some(j) => Ok(Some(serde_json::from_str(&j)?)),
            None => Ok(None),
        }
    }

    pub fn list_profiles(&self, status: Option<TalentStatus>) -> Result<Vec<TalentProfile>> {
        let reader = self.reader()?;
        let mut out = Vec::new();
        match status {
            Some(s) => {
                let mut stmt = reader.prepare("SELECT profile FROM talents WHERE status = ?1")?;
                let rows = stmt.query_map([s.as_str()], |r| r.get::<_, String>(0))?;
                for row in rows {
                    out.push(serde_json::from_str(&row?)?);
                }
            }
            None => {
                let mut stmt = reader.prepare("SELECT profile FROM talents")?;
                let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
                for row in rows {
                    out.push(serde_json::from_str(&row?)?);
                }
            }
        }
        Ok(out)
    }

    pub fn set_profile_status(&self, id: &str, status: TalentStatus) -> Result<bool> {
        let changed = self.writer()?.execute(
            "UPDATE talents SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_profile(&self, id: &str) -> Result<bool> {
        let changed = self.writer()?.execute("DELETE FROM talents WHERE id = ?1", [id])?;
        Ok(changed > 0)
    }

    pub fn profile_count(&self) -> Result<usize> {
        let count: i64 = self
            .reader()?
            .query_row("SELECT COUNT(*) FROM talents WHERE status = 'active'", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    // ========================================================================
    // EPISODIC MEMORY
    // ========================================================================

    pub fn upsert_episodic(&self, record: &EpisodicRecord) -> Result<()> {
        let embedding_blob = match &record.context_embedding {
            Some(v) => Some(
                postcard::to_allocvec(v)
                    .map_err(|e| CoreError::Persistence(e.to_string()))?,
            ),
            None => None,
        };
        self.writer()?.execute(
            "INSERT INTO episodic_memories
                (id, owner, event_type, payload, importance, valence, reinforcement,
                 context_richness, context_embedding, merged_ids, created_at, last_accessed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
                importance = excluded.importance,
                valence = excluded.valence,
                reinforcement = excluded.reinforcement,
                context_richness = excluded.context_richness,
                merged_ids = excluded.merged_ids,
                last_accessed = excluded.last_accessed",
            params![
                record.id,
                record.owner,
                record.event_type,
                serde_json::to_string(&record.payload)?,
                record.importance,
                record.valence,
                record.reinforcement,
                record.context_richness,
                embedding_blob,
                serde_json::to_string(&record.merged_ids)?,
                record.created_at.to_rfc3339(),
                record.last_accessed.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_episodic(&self, id: &str) -> Result<Option<EpisodicRecord>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, owner, event_type, payload, importance, valence, reinforcement,
                    context_richness, context_embedding, merged_ids, created_at, last_accessed
             FROM episodic_memories WHERE id = ?1",
        )?;
        let record = stmt
            .query_row([id], row_to_episodic)
            .optional()?;
        Ok(record)
    }

    pub fn list_episodic(&self) -> Result<Vec<EpisodicRecord>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT id, owner, event_type, payload, importance, valence, reinforcement,
                    context_richness, context_embedding, merged_ids, created_at, last_accessed
             FROM episodic_memories",
        )?;
        let rows = stmt.query_map([], row_to_episodic)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete_episodic(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let writer = self.writer()?;
        let mut removed = 0;
        for id in ids {
            removed += writer.execute("DELETE FROM episodic_memories WHERE id = ?1", [id])?;
        }
        Ok(removed)
    }

    // ========================================================================
    // SEMANTIC GRAPH (snapshot replace)
    // ========================================================================

    pub fn save_graph(&self, nodes: &[GraphNodeRow], edges: &[GraphEdgeRow]) -> Result<()> {
        let mut writer = self.writer()?;
        let tx = writer.transaction()?;
        tx.execute("DELETE FROM graph_edges", [])?;
        tx.execute("DELETE FROM graph_nodes", [])?;
        for n in nodes {
            tx.execute(
                "INSERT INTO graph_nodes (id, kind, key, attrs) VALUES (?1, ?2, ?3, ?4)",
                params![n.id, n.kind, n.key, n.attrs_json],
            )?;
        }
        for e in edges {
            tx.execute(
                "INSERT INTO graph_edges (subject, predicate, object, confidence, evidence_count, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    e.subject,
                    e.predicate,
                    e.object,
                    e.confidence,
                    e.evidence_count,
                    e.metadata_json
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_graph(&self) -> Result<(Vec<GraphNodeRow>, Vec<GraphEdgeRow>)> {
        let reader = self.reader()?;
        let mut nodes = Vec::new();
        {
            let mut stmt = reader.prepare("SELECT id, kind, key, attrs FROM graph_nodes ORDER BY id")?;
            let rows = stmt.query_map([], |r| {
                Ok(GraphNodeRow {
                    id: r.get(0)?,
                    kind: r.get(1)?,
                    key: r.get(2)?,
                    attrs_json: r.get(3)?,
                })
            })?;
            for row in rows {
                nodes.push(row?);
            }
        }
        let mut edges = Vec::new();
        {
            let mut stmt = reader.prepare(
                "SELECT subject, predicate, object, confidence, evidence_count, metadata FROM graph_edges",
            )?;
            let rows = stmt.query_map([], |r| {
                Ok(GraphEdgeRow {
                    subject: r.get(0)?,
                    predicate: r.get(1)?,
                    object: r.get(2)?,
                    confidence: r.get(3)?,
                    evidence_count: r.get(4)?,
                    metadata_json: r.get(5)?,
                })
            })?;
            for row in rows {
                edges.push(row?);
            }
        }
        Ok((nodes, edges))
    }

    // ========================================================================
    // PROCEDURAL MEMORY
    // ========================================================================

    pub fn save_pattern(
        &self,
        workflow_name: &str,
        action_sequence_json: &str,
        execution_count: u64,
        success_rate: f64,
        avg_duration_ms: f64,
    ) -> Result<()> {
        self.writer()?.execute(
            "INSERT INTO procedural_patterns
                (workflow_name, action_sequence, execution_count, success_rate, avg_duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(workflow_name) DO UPDATE SET
                action_sequence = excluded.action_sequence,
                execution_count = excluded.execution_count,
                success_rate = excluded.success_rate,
                avg_duration_ms = excluded.avg_duration_ms",
            params![
                workflow_name,
                action_sequence_json,
                execution_count as i64,
                success_rate,
                avg_duration_ms
            ],
        )?;
        Ok(())
    }

    pub fn load_patterns(&self) -> Result<Vec<(String, String, u64, f64, f64)>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT workflow_name, action_sequence, execution_count, success_rate, avg_duration_ms
             FROM procedural_patterns",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)? as u64,
                r.get::<_, f64>(3)?,
                r.get::<_, f64>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn append_sequence(&self, user_id: &str, steps_json: &str) -> Result<()> {
        self.writer()?.execute(
            "INSERT INTO action_sequences (user_id, steps, recorded_at) VALUES (?1, ?2, ?3)",
            params![user_id, steps_json, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn list_sequences(&self) -> Result<Vec<(String, String)>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare("SELECT user_id, steps FROM action_sequences ORDER BY id")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ========================================================================
    // EXPERIMENT LOG
    // ========================================================================

    pub fn append_experiment_result(&self, experiment: &str, result: &ExperimentResult) -> Result<()> {
        self.writer()?.execute(
            "INSERT INTO experiment_results
                (experiment, user_id, session_id, variant, response_time_ms, accuracy_score,
                 talents_found, metadata, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                experiment,
                result.user_id,
                result.session_id,
                result.variant,
                result.response_time_ms,
                result.accuracy_score,
                result.talents_found as i64,
                result.metadata.as_ref().map(|m| m.to_string()),
                result.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_experiment_results(&self, experiment: &str) -> Result<Vec<ExperimentResult>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT user_id, session_id, variant, response_time_ms, accuracy_score,
                    talents_found, metadata, timestamp
             FROM experiment_results WHERE experiment = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([experiment], |r| {
            Ok(ExperimentResult {
                user_id: r.get(0)?,
                session_id: r.get(1)?,
                variant: r.get(2)?,
                response_time_ms: r.get(3)?,
                accuracy_score: r.get(4)?,
                talents_found: r.get::<_, i64>(5)? as u32,
                metadata: r
                    .get::<_, Option<String>>(6)?
                    .and_then(|s| serde_json::from_str(&s).ok()),
                timestamp: parse_rfc3339(&r.get::<_, String>(7)?),
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ========================================================================
    // META
    // ========================================================================

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.writer()?.execute(
            "INSERT INTO engine_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .reader()?
            .query_row("SELECT value FROM engine_meta WHERE key = ?1", [key], |r| r.get(0))
            .optional()?;
        Ok(value)
    }
}

fn parse_rfc3339(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

fn row_to_episodic(row: &rusqlite::Row<'_>) -> rusqlite::Result<EpisodicRecord> {
    let embedding: Option<Vec<u8>> = row.get(8)?;
    Ok(EpisodicRecord {
        id: row.get(0)?,
        owner: row.get(1)?,
        event_type: row.get(2)?,
        payload: serde_json::from_str(&row.get::<_, String>(3)?).unwrap_or(serde_json::Value::Null),
        importance: row.get(4)?,
        valence: row.get(5)?,
        reinforcement: row.get::<_, i64>(6)? as u32,
        context_richness: row.get(7)?,
        context_embedding: embedding.and_then(|b| postcard::from_bytes(&b).ok()),
        merged_ids: row
            .get::<_, Option<String>>(9)?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        created_at: parse_rfc3339(&row.get::<_, String>(10)?),
        last_accessed: parse_rfc3339(&row.get::<_, String>(11)?),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::talent::Gender;

    fn store() -> (Store, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(Some(dir.path().join("test.db"))).unwrap();
        (store, dir)
    }

    #[test]
    fn test_profile_roundtrip() {
        let (store, _dir) = store();
        let mut p = TalentProfile::new("t1", "Asha Verma");
        p.age = Some(28);
        p.gender = Some(Gender::Female);
        p.location = Some("Mumbai".into());
        p.skills = vec!["dance".into()];

        store.upsert_profile(&p).unwrap();
        let got = store.get_profile("t1").unwrap().unwrap();
        assert_eq!(got.name, "Asha Verma");
        assert_eq!(got.age, Some(28));
        assert_eq!(store.profile_count().unwrap(), 1);
    }

    #[test]
    fn test_profile_upsert_replaces() {
        let (store, _dir) = store();
        let mut p = TalentProfile::new("t1", "A");
        store.upsert_profile(&p).unwrap();
        p.name = "B".into();
        store.upsert_profile(&p).unwrap();

        assert_eq!(store.get_profile("t1").unwrap().unwrap().name, "B");
        assert_eq!(store.profile_count().unwrap(), 1);
    }

    #[test]
    fn test_archived_profiles_excluded_from_active_count() {
        let (store, _dir) = store();
        store.upsert_profile(&TalentProfile::new("t1", "A")).unwrap();
        store.upsert_profile(&TalentProfile::new("t2", "B")).unwrap();
        store.set_profile_status("t1", TalentStatus::Archived).unwrap();

        assert_eq!(store.profile_count().unwrap(), 1);
        assert_eq!(
            store.list_profiles(Some(TalentStatus::Archived)).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_episodic_roundtrip() {
        let (store, _dir) = store();
        let rec = EpisodicRecord::new("conv-1", "search", serde_json::json!({"q": "dancer"}), 0.8, 0.6);
        store.upsert_episodic(&rec).unwrap();

        let got = store.get_episodic(&rec.id).unwrap().unwrap();
        assert_eq!(got.owner, "conv-1");
        assert!((got.importance - 0.8).abs() < 1e-9);

        let removed = store.delete_episodic(&[rec.id.clone()]).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_episodic(&rec.id).unwrap().is_none());
    }

    #[test]
    fn test_graph_snapshot_roundtrip() {
        let (store, _dir) = store();
        let nodes = vec![GraphNodeRow {
            id: 0,
            kind: "actor".into(),
            key: "asha verma".into(),
            attrs_json: "{}".into(),
        }];
        let edges = vec![GraphEdgeRow {
            subject: 0,
            predicate: "SPECIALIZES_IN".into(),
            object: 0,
            confidence: 0.7,
            evidence_count: 2,
            metadata_json: "{}".into(),
        }];
        store.save_graph(&nodes, &edges).unwrap();

        let (n, e) = store.load_graph().unwrap();
        assert_eq!(n.len(), 1);
        assert_eq!(e.len(), 1);
        assert!((e[0].confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_experiment_log_roundtrip() {
        let (store, _dir) = store();
        let result = ExperimentResult {
            user_id: "u1".into(),
            session_id: Some("s1".into()),
            variant: "v2".into(),
            response_time_ms: 120.0,
            accuracy_score: 0.93,
            talents_found: 5,
            metadata: None,
            timestamp: chrono::Utc::now(),
        };
        store.append_experiment_result("exp", &result).unwrap();

        let results = store.load_experiment_results("exp").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].variant, "v2");
        assert!(store.load_experiment_results("other").unwrap().is_empty());
    }

    #[test]
    fn test_meta_roundtrip() {
        let (store, _dir) = store();
        assert!(store.get_meta("last_tick").unwrap().is_none());
        store.set_meta("last_tick", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(
            store.get_meta("last_tick").unwrap().as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
    }
}
