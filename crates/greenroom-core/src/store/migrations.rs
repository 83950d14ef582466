//! Schema migrations
//!
//! Versioned, forward-only. Each entry runs inside a transaction and is
//! recorded in `schema_migrations`; start-up applies whatever is missing.

use rusqlite::Connection;

use crate::error::Result;

/// Ordered migration list; never reorder or edit shipped entries
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE IF NOT EXISTS talents (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            age         INTEGER,
            gender      TEXT,
            location    TEXT,
            status      TEXT NOT NULL DEFAULT 'active',
            profile     TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_talents_status ON talents(status);
        CREATE INDEX IF NOT EXISTS idx_talents_location ON talents(location);",
    ),
    (
        2,
        "CREATE TABLE IF NOT EXISTS episodic_memories (
            id                TEXT PRIMARY KEY,
            owner             TEXT NOT NULL,
            event_type        TEXT NOT NULL,
            payload           TEXT NOT NULL,
            importance        REAL NOT NULL,
            valence           REAL NOT NULL,
            reinforcement     INTEGER NOT NULL DEFAULT 0,
            context_richness  REAL NOT NULL DEFAULT 0.5,
            context_embedding BLOB,
            merged_ids        TEXT,
            created_at        TEXT NOT NULL,
            last_accessed     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_episodic_owner ON episodic_memories(owner);
        CREATE INDEX IF NOT EXISTS idx_episodic_importance ON episodic_memories(importance);",
    ),
    (
        3,
        "CREATE TABLE IF NOT EXISTS graph_nodes (
            id     INTEGER PRIMARY KEY,
            kind   TEXT NOT NULL,
            key    TEXT NOT NULL,
            attrs  TEXT NOT NULL,
            UNIQUE(kind, key)
        );
        CREATE TABLE IF NOT EXISTS graph_edges (
            id             INTEGER PRIMARY KEY,
            subject        INTEGER NOT NULL,
            predicate      TEXT NOT NULL,
            object         INTEGER NOT NULL,
            confidence     REAL NOT NULL,
            evidence_count INTEGER NOT NULL,
            metadata       TEXT NOT NULL,
            UNIQUE(subject, predicate, object)
        );",
    ),
    (
        4,
        "CREATE TABLE IF NOT EXISTS procedural_patterns (
            workflow_name   TEXT PRIMARY KEY,
            action_sequence TEXT NOT NULL,
            execution_count INTEGER NOT NULL,
            success_rate    REAL NOT NULL,
            avg_duration_ms REAL NOT NULL
        );
        CREATE TABLE IF NOT EXISTS action_sequences (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            steps       TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sequences_user ON action_sequences(user_id);",
    ),
    (
        5,
        "CREATE TABLE IF NOT EXISTS experiment_results (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            experiment       TEXT NOT NULL,
            user_id          TEXT NOT NULL,
            session_id       TEXT,
            variant          TEXT NOT NULL,
            response_time_ms REAL NOT NULL,
            accuracy_score   REAL NOT NULL,
            talents_found    INTEGER NOT NULL,
            metadata         TEXT,
            timestamp        TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_results_experiment ON experiment_results(experiment);",
    ),
    (
        6,
        "CREATE TABLE IF NOT EXISTS engine_meta (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    ),
];

/// Apply every migration newer than the recorded schema version
pub fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        tracing::info!(version, "Applying schema migration");
        conn.execute_batch(&format!("BEGIN;\n{}\nCOMMIT;", sql))?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, chrono::Utc::now().to_rfc3339()],
        )?;
    }

    Ok(())
}
