//! Source log line parser
//!
//! Each line of a session log is one JSON record with a `type` discriminator.
//! Lines are parsed independently: a malformed line never aborts the stream,
//! it is reported as a [`ParseError`] and the caller counts it and moves on
//! (skip-and-count). Records with an unrecognized `type` are benign no-ops,
//! reported as [`Parsed::Unknown`] and counted separately from parse errors.
//!
//! # Recognized kinds
//!
//! - `tool_call`: `tool_name`, optional `error`
//! - `bash_command`: `command`, optional `exit_code`, optional `error`
//! - `file_operation`: `path`, `operation` (read/write/edit/delete),
//!   optional `bytes`, optional `error`
//! - `session_start` / `session_end`: lifecycle markers
//!
//! Every line carries an envelope: `session_id`, `ts` (RFC 3339), optional
//! `success`, `duration_ms`, `agent`, `project`, `tokens_in`, `tokens_out`.
//! A missing `success` defaults to true, except for bash lines with an
//! `exit_code`, where success is `exit_code == 0`.

use crate::types::{EventEnvelope, EventKind, FileOp, RawEvent};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Content hash of one source line, part of the persisted natural key.
pub fn line_digest(line: &str) -> String {
    hex::encode(Sha256::digest(line.as_bytes()))
}

/// A single line that could not be decoded.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Outcome of decoding one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// A recognized event
    Event(RawEvent),
    /// A structurally valid record of a kind this version does not know
    Unknown { kind: String },
}

/// Raw JSONL record shape.
///
/// Uses `#[serde(default)]` liberally so missing optional fields do not fail
/// the whole line; required fields are validated afterwards.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawLine {
    #[serde(rename = "type")]
    kind: Option<String>,
    session_id: Option<String>,
    ts: Option<String>,
    success: Option<bool>,
    duration_ms: Option<i64>,
    agent: Option<String>,
    project: Option<String>,
    tokens_in: Option<i64>,
    tokens_out: Option<i64>,

    // tool_call
    tool_name: Option<String>,

    // bash_command
    command: Option<String>,
    exit_code: Option<i64>,

    // file_operation
    path: Option<String>,
    operation: Option<String>,
    bytes: Option<i64>,

    // any failing kind
    error: Option<String>,
}

/// Decode one source log line.
pub fn parse_line(line: &str) -> Result<Parsed, ParseError> {
    let raw: RawLine = serde_json::from_str(line).map_err(|e| ParseError {
        message: format!("invalid JSON: {}", e),
    })?;

    let kind = raw.kind.as_deref().unwrap_or_default();
    if kind.is_empty() {
        return Err(ParseError {
            message: "missing record type".to_string(),
        });
    }

    let session_id = match raw.session_id {
        Some(ref s) if !s.is_empty() => s.clone(),
        _ => {
            return Err(ParseError {
                message: format!("{}: missing session_id", kind),
            })
        }
    };

    let ts = match raw.ts.as_deref().map(DateTime::parse_from_rfc3339) {
        Some(Ok(dt)) => dt.with_timezone(&Utc),
        Some(Err(e)) => {
            return Err(ParseError {
                message: format!("{}: bad timestamp: {}", kind, e),
            })
        }
        None => {
            return Err(ParseError {
                message: format!("{}: missing ts", kind),
            })
        }
    };

    let event_kind = match kind {
        "tool_call" => {
            let tool_name = raw.tool_name.clone().filter(|s| !s.is_empty()).ok_or_else(|| {
                ParseError {
                    message: "tool_call: missing tool_name".to_string(),
                }
            })?;
            EventKind::ToolCall {
                tool_name,
                error_message: raw.error.clone(),
            }
        }
        "bash_command" => {
            let command = raw.command.clone().filter(|s| !s.is_empty()).ok_or_else(|| {
                ParseError {
                    message: "bash_command: missing command".to_string(),
                }
            })?;
            EventKind::BashCommand {
                command,
                exit_code: raw.exit_code,
                error_message: raw.error.clone(),
            }
        }
        "file_operation" => {
            let path = raw.path.clone().filter(|s| !s.is_empty()).ok_or_else(|| {
                ParseError {
                    message: "file_operation: missing path".to_string(),
                }
            })?;
            let operation: FileOp = raw
                .operation
                .as_deref()
                .unwrap_or_default()
                .parse()
                .map_err(|e| ParseError {
                    message: format!("file_operation: {}", e),
                })?;
            EventKind::FileOperation {
                path,
                operation,
                bytes: raw.bytes,
                error_message: raw.error.clone(),
            }
        }
        "session_start" => EventKind::SessionStart,
        "session_end" => EventKind::SessionEnd,
        other => {
            return Ok(Parsed::Unknown {
                kind: other.to_string(),
            })
        }
    };

    // Bash lines without an explicit success flag take it from the exit code.
    let success = raw.success.unwrap_or_else(|| match &event_kind {
        EventKind::BashCommand {
            exit_code: Some(code),
            ..
        } => *code == 0,
        _ => true,
    });

    Ok(Parsed::Event(RawEvent {
        envelope: EventEnvelope {
            session_id,
            ts,
            success,
            duration_ms: raw.duration_ms,
            agent: raw.agent,
            project: raw.project,
            tokens_in: raw.tokens_in,
            tokens_out: raw.tokens_out,
        },
        kind: event_kind,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expect_event(line: &str) -> RawEvent {
        match parse_line(line).expect("line should parse") {
            Parsed::Event(e) => e,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_tool_call() {
        let event = expect_event(
            r#"{"type":"tool_call","session_id":"s1","ts":"2026-03-01T10:00:00Z","tool_name":"Read","success":true,"duration_ms":42}"#,
        );
        assert_eq!(event.envelope.session_id, "s1");
        assert!(event.envelope.success);
        assert_eq!(event.envelope.duration_ms, Some(42));
        assert_eq!(
            event.kind,
            EventKind::ToolCall {
                tool_name: "Read".to_string(),
                error_message: None,
            }
        );
    }

    #[test]
    fn test_parse_bash_success_from_exit_code() {
        let ok = expect_event(
            r#"{"type":"bash_command","session_id":"s1","ts":"2026-03-01T10:00:00Z","command":"cargo build","exit_code":0}"#,
        );
        assert!(ok.envelope.success);

        let failed = expect_event(
            r#"{"type":"bash_command","session_id":"s1","ts":"2026-03-01T10:00:01Z","command":"cargo test","exit_code":101,"error":"2 tests failed"}"#,
        );
        assert!(!failed.envelope.success);
        match failed.kind {
            EventKind::BashCommand {
                exit_code,
                error_message,
                ..
            } => {
                assert_eq!(exit_code, Some(101));
                assert_eq!(error_message.as_deref(), Some("2 tests failed"));
            }
            other => panic!("expected bash, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_file_operation() {
        let event = expect_event(
            r#"{"type":"file_operation","session_id":"s1","ts":"2026-03-01T10:00:00Z","path":"src/main.rs","operation":"edit","bytes":512}"#,
        );
        assert_eq!(
            event.kind,
            EventKind::FileOperation {
                path: "src/main.rs".to_string(),
                operation: FileOp::Edit,
                bytes: Some(512),
                error_message: None,
            }
        );
    }

    #[test]
    fn test_parse_session_markers() {
        let start = expect_event(
            r#"{"type":"session_start","session_id":"s1","ts":"2026-03-01T09:59:00Z","agent":"builder","project":"demo"}"#,
        );
        assert_eq!(start.kind, EventKind::SessionStart);
        assert_eq!(start.envelope.agent.as_deref(), Some("builder"));

        let end = expect_event(
            r#"{"type":"session_end","session_id":"s1","ts":"2026-03-01T10:30:00Z","tokens_in":1200,"tokens_out":3400}"#,
        );
        assert_eq!(end.kind, EventKind::SessionEnd);
        assert_eq!(end.envelope.tokens_in, Some(1200));
    }

    #[test]
    fn test_unknown_kind_is_benign() {
        let parsed = parse_line(
            r#"{"type":"telemetry_ping","session_id":"s1","ts":"2026-03-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            Parsed::Unknown {
                kind: "telemetry_ping".to_string()
            }
        );
    }

    #[test]
    fn test_line_digest_is_content_addressed() {
        let a = line_digest(r#"{"type":"session_start"}"#);
        let b = line_digest(r#"{"type":"session_start"}"#);
        let c = line_digest(r#"{"type":"session_end"}"#);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_malformed_line_is_error() {
        assert!(parse_line("not json at all").is_err());
        assert!(parse_line(r#"{"type":"tool_call""#).is_err());
    }

    #[test]
    fn test_missing_required_fields() {
        // No session_id
        assert!(parse_line(
            r#"{"type":"tool_call","ts":"2026-03-01T10:00:00Z","tool_name":"Read"}"#
        )
        .is_err());
        // No ts
        assert!(parse_line(r#"{"type":"tool_call","session_id":"s1","tool_name":"Read"}"#).is_err());
        // No tool_name
        assert!(
            parse_line(r#"{"type":"tool_call","session_id":"s1","ts":"2026-03-01T10:00:00Z"}"#)
                .is_err()
        );
        // Bad operation
        assert!(parse_line(
            r#"{"type":"file_operation","session_id":"s1","ts":"2026-03-01T10:00:00Z","path":"a.rs","operation":"chmod"}"#
        )
        .is_err());
    }
}
