//! Core domain types for tracelore
//!
//! These types model the path from raw agent-session log lines to persisted
//! execution records and the derived statistics computed over them.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One decoded unit of work from a source log line (tool call, bash command, file operation, session marker) |
//! | **Batch** | A buffered group of events flushed to the store in one transaction |
//! | **Offset** | The byte position up to which a source file has been durably consumed |
//! | **TrackedFile** | Per-file ingestion state: offset, fingerprint, staleness |
//! | **TaskExecution** | A persisted record of one agent task run |
//! | **Aggregation** | A derived, recomputed-on-query statistical view over persisted records |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================
// Raw events (ephemeral, parser output)
// ============================================

/// Fields common to every source log line.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Session the event belongs to
    pub session_id: String,
    /// When the event happened (from the log line)
    pub ts: DateTime<Utc>,
    /// Whether the operation succeeded
    pub success: bool,
    /// Duration of the operation in milliseconds
    pub duration_ms: Option<i64>,
    /// Agent type that produced the event (e.g. "builder", "reviewer")
    pub agent: Option<String>,
    /// Project the session was working on
    pub project: Option<String>,
    /// Input tokens consumed, when reported
    pub tokens_in: Option<i64>,
    /// Output tokens produced, when reported
    pub tokens_out: Option<i64>,
}

/// File operation kinds recognized in `file_operation` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOp {
    Read,
    Write,
    Edit,
    Delete,
}

impl FileOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOp::Read => "read",
            FileOp::Write => "write",
            FileOp::Edit => "edit",
            FileOp::Delete => "delete",
        }
    }
}

impl std::str::FromStr for FileOp {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "read" => Ok(FileOp::Read),
            "write" => Ok(FileOp::Write),
            "edit" => Ok(FileOp::Edit),
            "delete" => Ok(FileOp::Delete),
            _ => Err(format!("unknown file operation: {}", s)),
        }
    }
}

/// Kind-specific payload of a decoded log line.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// A tool invocation (Read, Edit, Grep, ...)
    ToolCall {
        tool_name: String,
        error_message: Option<String>,
    },
    /// A shell command run by the agent
    BashCommand {
        command: String,
        exit_code: Option<i64>,
        error_message: Option<String>,
    },
    /// A file read/write/edit/delete
    FileOperation {
        path: String,
        operation: FileOp,
        bytes: Option<i64>,
        error_message: Option<String>,
    },
    /// Session lifecycle marker
    SessionStart,
    /// Session lifecycle marker
    SessionEnd,
}

impl EventKind {
    /// Storage discriminator for the `events.kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ToolCall { .. } => "tool",
            EventKind::BashCommand { .. } => "bash",
            EventKind::FileOperation { .. } => "file",
            EventKind::SessionStart | EventKind::SessionEnd => "session",
        }
    }
}

/// One decoded source log line: envelope plus kind-specific payload.
///
/// Ephemeral: produced by the parser, consumed by the batch writer, and
/// projected into `events` rows. Never persisted directly.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub envelope: EventEnvelope,
    pub kind: EventKind,
}

/// A raw event annotated with its source lineage, ready for persistence.
///
/// `(source_file, source_offset, line_hash)` is the natural key that makes
/// re-ingestion of the same line a no-op. The content hash keeps the key
/// valid across rotation, where a new generation reuses byte offsets.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event: RawEvent,
    pub source_file: String,
    pub source_offset: u64,
    /// Hex SHA-256 of the source line
    pub line_hash: String,
}

// ============================================
// Tracked files (offset tracker state)
// ============================================

/// Content fingerprint of a file's head, used to detect truncation/rotation.
///
/// `prefix_len` records how many leading bytes were hashed so the same span
/// can be re-hashed for comparison even after the file grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hex-encoded SHA-256 of the first `prefix_len` bytes
    pub hash: String,
    /// Number of leading bytes covered by `hash`
    pub prefix_len: u64,
}

/// Per-file ingestion state owned by the offset tracker.
#[derive(Debug, Clone)]
pub struct TrackedFile {
    /// Path to the source file (primary key)
    pub path: PathBuf,
    /// Byte offset up to which the file has been durably consumed
    pub offset: u64,
    /// Head fingerprint recorded at the last advance
    pub fingerprint: Option<Fingerprint>,
    /// File size at the last observation
    pub size_bytes: u64,
    /// Modification time at the last observation
    pub modified_at: Option<DateTime<Utc>>,
    /// When the file was last seen by a scan
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Set when the file has disappeared from scans but the grace period
    /// has not yet expired
    pub stale: bool,
}

impl TrackedFile {
    /// Fresh state for a newly discovered file.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            offset: 0,
            fingerprint: None,
            size_bytes: 0,
            modified_at: None,
            last_seen_at: None,
            stale: false,
        }
    }
}

// ============================================
// Task executions (persisted)
// ============================================

/// A persisted record of one agent task run.
///
/// `(plan_file, run_number, task_number)` is deliberately not unique:
/// repeated runs of the same task are retained as history.
#[derive(Debug, Clone, Serialize)]
pub struct TaskExecution {
    /// Store-assigned identifier, monotonically increasing
    pub id: i64,
    pub plan_file: String,
    pub run_number: i64,
    pub task_number: i64,
    pub task_name: String,
    pub agent: String,
    pub prompt: Option<String>,
    pub success: bool,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub duration_seconds: f64,
    pub project: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields for inserting a new task execution; the store assigns `id` and
/// `created_at` defaults to now when unset.
#[derive(Debug, Clone, Default)]
pub struct NewTaskExecution {
    pub plan_file: String,
    pub run_number: i64,
    pub task_number: i64,
    pub task_name: String,
    pub agent: String,
    pub prompt: Option<String>,
    pub success: bool,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub duration_seconds: f64,
    pub project: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

// ============================================
// Derived statistics (views, never stored)
// ============================================

/// Success rate with a defined zero for an empty denominator.
pub fn success_rate(successes: i64, total: i64) -> f64 {
    if total > 0 {
        successes as f64 / total as f64
    } else {
        0.0
    }
}

/// Aggregated tool invocation outcomes, grouped by tool name.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStats {
    pub tool_name: String,
    pub total_calls: i64,
    pub successes: i64,
    pub failures: i64,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
}

/// Aggregated bash command outcomes, grouped by command text.
#[derive(Debug, Clone, Serialize)]
pub struct BashStats {
    pub command: String,
    pub total_calls: i64,
    pub successes: i64,
    pub failures: i64,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
}

/// Aggregated file operation outcomes, grouped by (path, operation).
#[derive(Debug, Clone, Serialize)]
pub struct FileStats {
    pub path: String,
    pub operation: FileOp,
    pub total_ops: i64,
    pub successes: i64,
    pub failures: i64,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
    pub total_bytes: i64,
}

/// Aggregated task execution outcomes, grouped by agent type.
#[derive(Debug, Clone, Serialize)]
pub struct AgentTypeStats {
    pub agent: String,
    pub total_tasks: i64,
    pub successes: i64,
    pub failures: i64,
    pub avg_duration_seconds: f64,
    pub success_rate: f64,
}

/// Which component family an error pattern belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Tool,
    Bash,
    File,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Tool => "tool",
            ErrorKind::Bash => "bash",
            ErrorKind::File => "file",
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tool" => Ok(ErrorKind::Tool),
            "bash" => Ok(ErrorKind::Bash),
            "file" => Ok(ErrorKind::File),
            _ => Err(format!("unknown error kind: {}", s)),
        }
    }
}

/// A collapsed error pattern.
///
/// Grouping key is (kind, component, message): identical messages from the
/// same component fold into one pattern with an occurrence count and the
/// timestamp of the latest occurrence.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPattern {
    pub kind: ErrorKind,
    /// Tool name, command text, or "operation path" depending on kind
    pub component: String,
    pub message: String,
    pub occurrences: i64,
    pub last_occurred: DateTime<Utc>,
}

/// Project-wide summary over committed records.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryStats {
    pub sessions: i64,
    pub events: i64,
    pub successes: i64,
    pub failures: i64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub executions: i64,
}

// ============================================
// Engine statistics
// ============================================

/// Point-in-time snapshot of ingestion progress.
///
/// Cheap to copy; taken under a read lock without blocking the writer for
/// longer than the field copy.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Files currently known to the offset tracker
    pub files_tracked: u64,
    /// Events parsed and handed to the pipeline (cumulative)
    pub events_processed: u64,
    /// Events accepted but not yet durably committed
    pub events_pending: u64,
    /// Sessions first seen by this engine instance
    pub sessions_created: u64,
    /// Lines with an unrecognized event kind (benign, counted separately)
    pub unknown_events: u64,
    /// Parse and store errors (cumulative)
    pub errors: u64,
    /// Time since the engine started
    pub uptime: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_success_rate_zero_denominator() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(5, 0), 0.0);
    }

    #[test]
    fn test_success_rate() {
        assert!((success_rate(99, 100) - 0.99).abs() < f64::EPSILON);
        assert_eq!(success_rate(3, 3), 1.0);
    }

    #[test]
    fn test_event_kind_discriminator() {
        let tool = EventKind::ToolCall {
            tool_name: "Read".to_string(),
            error_message: None,
        };
        assert_eq!(tool.as_str(), "tool");
        assert_eq!(EventKind::SessionStart.as_str(), "session");
        assert_eq!(EventKind::SessionEnd.as_str(), "session");
    }

    #[test]
    fn test_file_op_round_trip() {
        for op in [FileOp::Read, FileOp::Write, FileOp::Edit, FileOp::Delete] {
            assert_eq!(FileOp::from_str(op.as_str()).unwrap(), op);
        }
        assert!(FileOp::from_str("chmod").is_err());
    }

    #[test]
    fn test_error_kind_round_trip() {
        for kind in [ErrorKind::Tool, ErrorKind::Bash, ErrorKind::File] {
            assert_eq!(ErrorKind::from_str(kind.as_str()).unwrap(), kind);
        }
    }
}
