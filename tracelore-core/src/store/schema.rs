//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Ingestion state
    -- ============================================

    CREATE TABLE IF NOT EXISTS tracked_files (
        path              TEXT PRIMARY KEY,
        offset            INTEGER NOT NULL DEFAULT 0,
        fingerprint       TEXT,
        fingerprint_len   INTEGER NOT NULL DEFAULT 0,
        size_bytes        INTEGER NOT NULL DEFAULT 0,
        modified_at       DATETIME,
        last_seen_at      DATETIME,
        stale             INTEGER NOT NULL DEFAULT 0
    );

    -- ============================================
    -- Canonical records
    -- ============================================

    CREATE TABLE IF NOT EXISTS sessions (
        id                TEXT PRIMARY KEY,
        agent             TEXT,
        project           TEXT,
        started_at        DATETIME NOT NULL,
        last_activity_at  DATETIME,
        source_file       TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);

    CREATE TABLE IF NOT EXISTS events (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id        TEXT NOT NULL,
        kind              TEXT NOT NULL,      -- 'tool', 'bash', 'file', 'session'
        ts                DATETIME NOT NULL,
        success           INTEGER NOT NULL,
        duration_ms       INTEGER,
        agent             TEXT,
        project           TEXT,
        tokens_in         INTEGER,
        tokens_out        INTEGER,

        -- Kind-specific fields
        tool_name         TEXT,
        command           TEXT,
        exit_code         INTEGER,
        file_path         TEXT,
        operation         TEXT,
        bytes             INTEGER,
        error_message     TEXT,

        -- Lineage; the natural key that makes re-ingestion a no-op.
        -- The line hash keeps the key valid across rotation, where a new
        -- file generation reuses byte offsets.
        source_file       TEXT NOT NULL,
        source_offset     INTEGER NOT NULL,
        line_hash         TEXT NOT NULL,

        UNIQUE(source_file, source_offset, line_hash)
    );

    CREATE INDEX IF NOT EXISTS idx_events_kind ON events(kind);
    CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id);
    CREATE INDEX IF NOT EXISTS idx_events_project ON events(project);
    CREATE INDEX IF NOT EXISTS idx_events_ts ON events(ts);

    CREATE TABLE IF NOT EXISTS task_executions (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        plan_file         TEXT NOT NULL,
        run_number        INTEGER NOT NULL,
        task_number       INTEGER NOT NULL,
        task_name         TEXT NOT NULL,
        agent             TEXT NOT NULL,
        prompt            TEXT,
        success           INTEGER NOT NULL,
        output            TEXT,
        error_message     TEXT,
        duration_seconds  REAL NOT NULL,
        project           TEXT,
        created_at        DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_task_executions_agent ON task_executions(agent);
    CREATE INDEX IF NOT EXISTS idx_task_executions_plan ON task_executions(plan_file, run_number);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = ["tracked_files", "sessions", "events", "task_executions"];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_events_natural_key_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO events (session_id, kind, ts, success, source_file, source_offset, line_hash)
             VALUES ('s1', 'tool', '2026-01-01T00:00:00+00:00', 1, 'a.jsonl', 0, 'abc')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO events (session_id, kind, ts, success, source_file, source_offset, line_hash)
             VALUES ('s1', 'tool', '2026-01-01T00:00:00+00:00', 1, 'a.jsonl', 0, 'abc')",
            [],
        );
        assert!(dup.is_err(), "duplicate natural key must be rejected");

        // Same offset with different content (rotation) is a new row
        conn.execute(
            "INSERT INTO events (session_id, kind, ts, success, source_file, source_offset, line_hash)
             VALUES ('s2', 'tool', '2026-02-01T00:00:00+00:00', 1, 'a.jsonl', 0, 'def')",
            [],
        )
        .unwrap();
    }
}
