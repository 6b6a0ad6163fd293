//! Store write path
//!
//! Batches of parsed events are committed in a single transaction together
//! with the session upserts they imply and the offset advances they earn.
//! Committing events and advancing offsets atomically means offset state can
//! never run ahead of persisted data; a crash mid-batch reprocesses at most
//! one batch, which the `(source_file, source_offset, line_hash)` natural
//! key absorbs.

use crate::error::Result;
use crate::types::{
    EventKind, EventRecord, Fingerprint, NewTaskExecution, TrackedFile,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::Store;

/// Offset advancement earned by a committed batch, per file.
#[derive(Debug, Clone)]
pub struct FileAdvance {
    pub path: PathBuf,
    pub new_offset: u64,
    pub fingerprint: Fingerprint,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

/// A batch ready for one transactional commit.
#[derive(Debug, Default)]
pub struct EventBatch {
    pub events: Vec<EventRecord>,
    pub advances: Vec<FileAdvance>,
}

impl EventBatch {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.advances.is_empty()
    }
}

/// Outcome of a committed batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchCommit {
    /// Events newly inserted
    pub inserted: usize,
    /// Events skipped because their natural key already existed
    pub duplicates: usize,
    /// Sessions first seen in this batch
    pub sessions_created: usize,
}

struct SessionSeed {
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    agent: Option<String>,
    project: Option<String>,
    source_file: String,
}

impl Store {
    /// Commit a batch of events, the session upserts they imply, and the
    /// offset advances they earn, all in one transaction.
    pub fn commit_batch(&self, batch: &EventBatch) -> Result<BatchCommit> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut commit = BatchCommit::default();

        let mut sessions: HashMap<&str, SessionSeed> = HashMap::new();

        for record in &batch.events {
            let env = &record.event.envelope;

            let (tool_name, command, exit_code, file_path, operation, bytes, error_message) =
                match &record.event.kind {
                    EventKind::ToolCall {
                        tool_name,
                        error_message,
                    } => (
                        Some(tool_name.as_str()),
                        None,
                        None,
                        None,
                        None,
                        None,
                        error_message.as_deref(),
                    ),
                    EventKind::BashCommand {
                        command,
                        exit_code,
                        error_message,
                    } => (
                        None,
                        Some(command.as_str()),
                        *exit_code,
                        None,
                        None,
                        None,
                        error_message.as_deref(),
                    ),
                    EventKind::FileOperation {
                        path,
                        operation,
                        bytes,
                        error_message,
                    } => (
                        None,
                        None,
                        None,
                        Some(path.as_str()),
                        Some(operation.as_str()),
                        *bytes,
                        error_message.as_deref(),
                    ),
                    EventKind::SessionStart | EventKind::SessionEnd => {
                        (None, None, None, None, None, None, None)
                    }
                };

            let changed = tx.execute(
                r#"
                INSERT OR IGNORE INTO events (
                    session_id, kind, ts, success, duration_ms, agent, project,
                    tokens_in, tokens_out, tool_name, command, exit_code,
                    file_path, operation, bytes, error_message,
                    source_file, source_offset, line_hash
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
                "#,
                params![
                    env.session_id,
                    record.event.kind.as_str(),
                    env.ts.to_rfc3339(),
                    env.success,
                    env.duration_ms,
                    env.agent,
                    env.project,
                    env.tokens_in,
                    env.tokens_out,
                    tool_name,
                    command,
                    exit_code,
                    file_path,
                    operation,
                    bytes,
                    error_message,
                    record.source_file,
                    record.source_offset as i64,
                    record.line_hash,
                ],
            )?;
            if changed == 1 {
                commit.inserted += 1;
            } else {
                commit.duplicates += 1;
            }

            let seed = sessions
                .entry(env.session_id.as_str())
                .or_insert_with(|| SessionSeed {
                    started_at: env.ts,
                    last_activity: env.ts,
                    agent: env.agent.clone(),
                    project: env.project.clone(),
                    source_file: record.source_file.clone(),
                });
            if env.ts < seed.started_at {
                seed.started_at = env.ts;
            }
            if env.ts > seed.last_activity {
                seed.last_activity = env.ts;
            }
            if seed.agent.is_none() {
                seed.agent = env.agent.clone();
            }
            if seed.project.is_none() {
                seed.project = env.project.clone();
            }
        }

        for (id, seed) in &sessions {
            let created = tx.execute(
                r#"
                INSERT OR IGNORE INTO sessions (id, agent, project, started_at, last_activity_at, source_file)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    id,
                    seed.agent,
                    seed.project,
                    seed.started_at.to_rfc3339(),
                    seed.last_activity.to_rfc3339(),
                    seed.source_file,
                ],
            )?;
            if created == 1 {
                commit.sessions_created += 1;
            } else {
                tx.execute(
                    r#"
                    UPDATE sessions SET
                        last_activity_at = CASE
                            WHEN last_activity_at IS NULL OR last_activity_at < ?2 THEN ?2
                            ELSE last_activity_at
                        END,
                        agent = COALESCE(agent, ?3),
                        project = COALESCE(project, ?4)
                    WHERE id = ?1
                    "#,
                    params![id, seed.last_activity.to_rfc3339(), seed.agent, seed.project],
                )?;
            }
        }

        let now = Utc::now().to_rfc3339();
        for adv in &batch.advances {
            tx.execute(
                r#"
                INSERT INTO tracked_files (path, offset, fingerprint, fingerprint_len, size_bytes, modified_at, last_seen_at, stale)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)
                ON CONFLICT(path) DO UPDATE SET
                    offset = excluded.offset,
                    fingerprint = excluded.fingerprint,
                    fingerprint_len = excluded.fingerprint_len,
                    size_bytes = excluded.size_bytes,
                    modified_at = excluded.modified_at,
                    last_seen_at = excluded.last_seen_at,
                    stale = 0
                "#,
                params![
                    adv.path.to_string_lossy(),
                    adv.new_offset as i64,
                    adv.fingerprint.hash,
                    adv.fingerprint.prefix_len as i64,
                    adv.size_bytes as i64,
                    adv.modified_at.map(|t| t.to_rfc3339()),
                    now,
                ],
            )?;
        }

        tx.commit()?;
        Ok(commit)
    }

    /// Insert a task execution record; returns the store-assigned id.
    pub fn record_execution(&self, exec: &NewTaskExecution) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let created_at = exec.created_at.unwrap_or_else(Utc::now);
        conn.execute(
            r#"
            INSERT INTO task_executions (
                plan_file, run_number, task_number, task_name, agent, prompt,
                success, output, error_message, duration_seconds, project, created_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                exec.plan_file,
                exec.run_number,
                exec.task_number,
                exec.task_name,
                exec.agent,
                exec.prompt,
                exec.success,
                exec.output,
                exec.error_message,
                exec.duration_seconds,
                exec.project,
                created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    // ============================================
    // Tracked file state (offset tracker backing)
    // ============================================

    /// Load all persisted tracked-file state.
    pub fn load_tracked_files(&self) -> Result<Vec<TrackedFile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT path, offset, fingerprint, fingerprint_len, size_bytes, modified_at, last_seen_at, stale
             FROM tracked_files",
        )?;
        let files = stmt
            .query_map([], Self::row_to_tracked_file)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(files)
    }

    /// Get one tracked file's persisted state.
    pub fn get_tracked_file(&self, path: &Path) -> Result<Option<TrackedFile>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT path, offset, fingerprint, fingerprint_len, size_bytes, modified_at, last_seen_at, stale
             FROM tracked_files WHERE path = ?",
            [path.to_string_lossy()],
            Self::row_to_tracked_file,
        )
        .optional()
        .map_err(crate::error::Error::from)
    }

    /// Insert or update a tracked file's state outside a batch commit.
    pub fn save_tracked_file(&self, file: &TrackedFile) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO tracked_files (path, offset, fingerprint, fingerprint_len, size_bytes, modified_at, last_seen_at, stale)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(path) DO UPDATE SET
                offset = excluded.offset,
                fingerprint = excluded.fingerprint,
                fingerprint_len = excluded.fingerprint_len,
                size_bytes = excluded.size_bytes,
                modified_at = excluded.modified_at,
                last_seen_at = excluded.last_seen_at,
                stale = excluded.stale
            "#,
            params![
                file.path.to_string_lossy(),
                file.offset as i64,
                file.fingerprint.as_ref().map(|f| f.hash.clone()),
                file.fingerprint.as_ref().map(|f| f.prefix_len as i64).unwrap_or(0),
                file.size_bytes as i64,
                file.modified_at.map(|t| t.to_rfc3339()),
                file.last_seen_at.map(|t| t.to_rfc3339()),
                file.stale,
            ],
        )?;
        Ok(())
    }

    /// Drop a tracked file's state entirely.
    pub fn delete_tracked_file(&self, path: &Path) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM tracked_files WHERE path = ?",
            [path.to_string_lossy()],
        )?;
        Ok(())
    }

    fn row_to_tracked_file(row: &Row) -> rusqlite::Result<TrackedFile> {
        let path_str: String = row.get("path")?;
        let offset: i64 = row.get("offset")?;
        let hash: Option<String> = row.get("fingerprint")?;
        let fingerprint_len: i64 = row.get("fingerprint_len")?;
        let size_bytes: i64 = row.get("size_bytes")?;
        let modified_at: Option<String> = row.get("modified_at")?;
        let last_seen_at: Option<String> = row.get("last_seen_at")?;
        let stale: bool = row.get("stale")?;

        Ok(TrackedFile {
            path: PathBuf::from(path_str),
            offset: offset as u64,
            fingerprint: hash.map(|hash| Fingerprint {
                hash,
                prefix_len: fingerprint_len as u64,
            }),
            size_bytes: size_bytes as u64,
            modified_at: modified_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            last_seen_at: last_seen_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventEnvelope, RawEvent};

    fn test_store() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
    }

    fn tool_record(session: &str, offset: u64, success: bool) -> EventRecord {
        EventRecord {
            event: RawEvent {
                envelope: EventEnvelope {
                    session_id: session.to_string(),
                    ts: Utc::now(),
                    success,
                    duration_ms: Some(12),
                    agent: Some("builder".to_string()),
                    project: None,
                    tokens_in: None,
                    tokens_out: None,
                },
                kind: EventKind::ToolCall {
                    tool_name: "Read".to_string(),
                    error_message: None,
                },
            },
            source_file: "a.jsonl".to_string(),
            source_offset: offset,
            line_hash: format!("{:064}", offset),
        }
    }

    #[test]
    fn test_commit_batch_idempotent() {
        let store = test_store();
        let batch = EventBatch {
            events: vec![tool_record("s1", 0, true), tool_record("s1", 80, false)],
            advances: vec![],
        };

        let first = store.commit_batch(&batch).unwrap();
        assert_eq!(first.inserted, 2);
        assert_eq!(first.duplicates, 0);
        assert_eq!(first.sessions_created, 1);

        let second = store.commit_batch(&batch).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(second.sessions_created, 0);
    }

    #[test]
    fn test_record_execution_monotonic_ids() {
        let store = test_store();
        let exec = NewTaskExecution {
            plan_file: "plan.md".to_string(),
            run_number: 1,
            task_number: 1,
            task_name: "build".to_string(),
            agent: "builder".to_string(),
            success: true,
            duration_seconds: 1.5,
            ..Default::default()
        };

        let first = store.record_execution(&exec).unwrap();
        let second = store.record_execution(&exec).unwrap();
        // Repeated runs of the same (plan, run, task) are kept as history
        assert!(second > first);
    }

    #[test]
    fn test_tracked_file_round_trip() {
        let store = test_store();
        let file = TrackedFile {
            path: PathBuf::from("/logs/a.jsonl"),
            offset: 4096,
            fingerprint: Some(Fingerprint {
                hash: "ab".repeat(32),
                prefix_len: 4096,
            }),
            size_bytes: 8192,
            modified_at: Some(Utc::now()),
            last_seen_at: Some(Utc::now()),
            stale: false,
        };

        store.save_tracked_file(&file).unwrap();
        let loaded = store
            .get_tracked_file(Path::new("/logs/a.jsonl"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded.offset, 4096);
        assert_eq!(loaded.fingerprint.unwrap().prefix_len, 4096);

        store.delete_tracked_file(Path::new("/logs/a.jsonl")).unwrap();
        assert!(store
            .get_tracked_file(Path::new("/logs/a.jsonl"))
            .unwrap()
            .is_none());
    }
}
