//! Store aggregation/read path
//!
//! Derived statistics are recomputed on every query; nothing here writes.
//! Result sets are returned in a stable order (occurrence count descending,
//! ties broken by the grouping key) so pagination with a fixed limit/offset
//! is reproducible against unchanged data.
//!
//! Pagination contract: `limit <= 0` means "no limit" (SQLite's `LIMIT -1`);
//! a negative offset is treated as zero.

use crate::error::Result;
use crate::types::{
    success_rate, AgentTypeStats, BashStats, ErrorKind, ErrorPattern, FileOp, FileStats,
    SummaryStats, TaskExecution, ToolStats,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use super::Store;

/// Normalize a (limit, offset) pair to what SQLite expects.
fn page(limit: i64, offset: i64) -> (i64, i64) {
    (if limit > 0 { limit } else { -1 }, offset.max(0))
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl Store {
    /// Tool invocation outcomes grouped by tool name.
    pub fn tool_stats(
        &self,
        project: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ToolStats>> {
        let (limit, offset) = page(limit, offset);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT tool_name,
                   COUNT(*) AS calls,
                   SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS ok,
                   AVG(duration_ms) AS avg_ms
            FROM events
            WHERE kind = 'tool' AND tool_name IS NOT NULL
              AND (?1 IS NULL OR project = ?1)
            GROUP BY tool_name
            ORDER BY calls DESC, tool_name ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;

        let rows = stmt
            .query_map(params![project, limit, offset], |row| {
                let tool_name: String = row.get(0)?;
                let calls: i64 = row.get(1)?;
                let ok: i64 = row.get(2)?;
                let avg_ms: Option<f64> = row.get(3)?;
                Ok(ToolStats {
                    tool_name,
                    total_calls: calls,
                    successes: ok,
                    failures: calls - ok,
                    avg_duration_ms: avg_ms.unwrap_or(0.0),
                    success_rate: success_rate(ok, calls),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Bash command outcomes grouped by command text.
    pub fn bash_stats(
        &self,
        project: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BashStats>> {
        let (limit, offset) = page(limit, offset);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT command,
                   COUNT(*) AS calls,
                   SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS ok,
                   AVG(duration_ms) AS avg_ms
            FROM events
            WHERE kind = 'bash' AND command IS NOT NULL
              AND (?1 IS NULL OR project = ?1)
            GROUP BY command
            ORDER BY calls DESC, command ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;

        let rows = stmt
            .query_map(params![project, limit, offset], |row| {
                let command: String = row.get(0)?;
                let calls: i64 = row.get(1)?;
                let ok: i64 = row.get(2)?;
                let avg_ms: Option<f64> = row.get(3)?;
                Ok(BashStats {
                    command,
                    total_calls: calls,
                    successes: ok,
                    failures: calls - ok,
                    avg_duration_ms: avg_ms.unwrap_or(0.0),
                    success_rate: success_rate(ok, calls),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// File operation outcomes grouped by (path, operation).
    pub fn file_stats(
        &self,
        project: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileStats>> {
        let (limit, offset) = page(limit, offset);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT file_path,
                   operation,
                   COUNT(*) AS ops,
                   SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS ok,
                   AVG(duration_ms) AS avg_ms,
                   SUM(COALESCE(bytes, 0)) AS total_bytes
            FROM events
            WHERE kind = 'file' AND file_path IS NOT NULL AND operation IS NOT NULL
              AND (?1 IS NULL OR project = ?1)
            GROUP BY file_path, operation
            ORDER BY ops DESC, file_path ASC, operation ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;

        let rows = stmt
            .query_map(params![project, limit, offset], |row| {
                let path: String = row.get(0)?;
                let operation: String = row.get(1)?;
                let ops: i64 = row.get(2)?;
                let ok: i64 = row.get(3)?;
                let avg_ms: Option<f64> = row.get(4)?;
                let total_bytes: i64 = row.get(5)?;
                Ok(FileStats {
                    path,
                    operation: operation.parse().unwrap_or(FileOp::Read),
                    total_ops: ops,
                    successes: ok,
                    failures: ops - ok,
                    avg_duration_ms: avg_ms.unwrap_or(0.0),
                    success_rate: success_rate(ok, ops),
                    total_bytes,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Collapsed error patterns across tool, bash, and file events.
    ///
    /// Grouping key is (kind, component, message); `last_occurred` is the
    /// maximum timestamp among the collapsed occurrences.
    pub fn error_patterns(
        &self,
        project: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ErrorPattern>> {
        let (limit, offset) = page(limit, offset);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT kind,
                   CASE kind
                       WHEN 'tool' THEN tool_name
                       WHEN 'bash' THEN command
                       ELSE operation || ' ' || file_path
                   END AS component,
                   error_message,
                   COUNT(*) AS occurrences,
                   MAX(ts) AS last_occurred
            FROM events
            WHERE success = 0
              AND error_message IS NOT NULL
              AND kind IN ('tool', 'bash', 'file')
              AND (?1 IS NULL OR project = ?1)
            GROUP BY kind, component, error_message
            ORDER BY occurrences DESC, component ASC, error_message ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;

        let rows = stmt
            .query_map(params![project, limit, offset], |row| {
                let kind: String = row.get(0)?;
                let component: Option<String> = row.get(1)?;
                let message: String = row.get(2)?;
                let occurrences: i64 = row.get(3)?;
                let last_occurred: String = row.get(4)?;
                Ok((kind, component, message, occurrences, last_occurred))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(kind, component, message, occurrences, last_occurred)| {
                let kind: ErrorKind = kind.parse().ok()?;
                Some(ErrorPattern {
                    kind,
                    component: component.unwrap_or_default(),
                    message,
                    occurrences,
                    last_occurred: parse_ts(&last_occurred),
                })
            })
            .collect())
    }

    /// Task execution outcomes grouped by agent type.
    pub fn agent_type_stats(
        &self,
        project: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AgentTypeStats>> {
        let (limit, offset) = page(limit, offset);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT agent,
                   COUNT(*) AS tasks,
                   SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END) AS ok,
                   AVG(duration_seconds) AS avg_secs
            FROM task_executions
            WHERE (?1 IS NULL OR project = ?1)
            GROUP BY agent
            ORDER BY tasks DESC, agent ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;

        let rows = stmt
            .query_map(params![project, limit, offset], |row| {
                let agent: String = row.get(0)?;
                let tasks: i64 = row.get(1)?;
                let ok: i64 = row.get(2)?;
                let avg_secs: Option<f64> = row.get(3)?;
                Ok(AgentTypeStats {
                    agent,
                    total_tasks: tasks,
                    successes: ok,
                    failures: tasks - ok,
                    avg_duration_seconds: avg_secs.unwrap_or(0.0),
                    success_rate: success_rate(ok, tasks),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Project-wide summary over committed records.
    ///
    /// Success rate and average duration cover work events (tool/bash/file);
    /// token totals also include session markers, which is where end-of-run
    /// totals are reported.
    pub fn summary_stats(&self, project: Option<&str>) -> Result<SummaryStats> {
        let conn = self.conn.lock().unwrap();

        let (events, successes, avg_ms) = conn.query_row(
            r#"
            SELECT COUNT(*),
                   SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END),
                   AVG(duration_ms)
            FROM events
            WHERE kind IN ('tool', 'bash', 'file')
              AND (?1 IS NULL OR project = ?1)
            "#,
            params![project],
            |row| {
                let events: i64 = row.get(0)?;
                let successes: Option<i64> = row.get(1)?;
                let avg_ms: Option<f64> = row.get(2)?;
                Ok((events, successes.unwrap_or(0), avg_ms.unwrap_or(0.0)))
            },
        )?;

        let (tokens_in, tokens_out) = conn.query_row(
            r#"
            SELECT SUM(COALESCE(tokens_in, 0)), SUM(COALESCE(tokens_out, 0))
            FROM events
            WHERE (?1 IS NULL OR project = ?1)
            "#,
            params![project],
            |row| {
                let tokens_in: Option<i64> = row.get(0)?;
                let tokens_out: Option<i64> = row.get(1)?;
                Ok((tokens_in.unwrap_or(0), tokens_out.unwrap_or(0)))
            },
        )?;

        let sessions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions WHERE (?1 IS NULL OR project = ?1)",
            params![project],
            |row| row.get(0),
        )?;

        let executions: i64 = conn.query_row(
            "SELECT COUNT(*) FROM task_executions WHERE (?1 IS NULL OR project = ?1)",
            params![project],
            |row| row.get(0),
        )?;

        Ok(SummaryStats {
            sessions,
            events,
            successes,
            failures: events - successes,
            success_rate: success_rate(successes, events),
            avg_duration_ms: avg_ms,
            tokens_in,
            tokens_out,
            executions,
        })
    }

    /// Task executions in insertion order, for export.
    pub fn list_executions(
        &self,
        project: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TaskExecution>> {
        let (limit, offset) = page(limit, offset);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, plan_file, run_number, task_number, task_name, agent, prompt,
                   success, output, error_message, duration_seconds, project, created_at
            FROM task_executions
            WHERE (?1 IS NULL OR project = ?1)
            ORDER BY id ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;

        let rows = stmt
            .query_map(params![project, limit, offset], Self::row_to_execution)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn row_to_execution(row: &Row) -> rusqlite::Result<TaskExecution> {
        let created_at: String = row.get("created_at")?;
        Ok(TaskExecution {
            id: row.get("id")?,
            plan_file: row.get("plan_file")?,
            run_number: row.get("run_number")?,
            task_number: row.get("task_number")?,
            task_name: row.get("task_name")?,
            agent: row.get("agent")?,
            prompt: row.get("prompt")?,
            success: row.get("success")?,
            output: row.get("output")?,
            error_message: row.get("error_message")?,
            duration_seconds: row.get("duration_seconds")?,
            project: row.get("project")?,
            created_at: parse_ts(&created_at),
        })
    }
}
