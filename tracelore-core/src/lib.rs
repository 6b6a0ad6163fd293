//! # tracelore-core
//!
//! Core library for tracelore - ingestion and analysis of AI-agent session
//! logs.
//!
//! This library provides:
//! - An ingestion engine that tails append-only JSONL session logs into
//!   normalized SQLite records, incrementally and exactly once per offset
//! - Aggregate statistics over the ingested records (tool usage, bash
//!   command outcomes, file operations, error patterns, agent performance)
//! - Export of the aggregated metrics as JSON, Markdown, or CSV
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Source files:** append-only logs on disk (immutable, never modified)
//! - **Canonical records:** normalized `events`, `sessions`, and
//!   `task_executions` tables
//! - **Derived views:** statistics recomputed on every query, never stored
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tracelore_core::{Config, IngestConfig, IngestEngine, Store};
//!
//! let store = Arc::new(Store::open(&Config::database_path()).expect("open store"));
//! store.migrate().expect("run migrations");
//!
//! let config = IngestConfig::new("/var/log/agents".into());
//! let engine = IngestEngine::new(config, store.clone());
//! engine.start().expect("start engine");
//! engine.wait();
//!
//! let tools = store.tool_stats(None, 10, 0).expect("query stats");
//! for row in tools {
//!     println!("{}: {} calls", row.tool_name, row.total_calls);
//! }
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, DrainPolicy, IngestConfig, IngestMode};
pub use error::{Error, Result};
pub use export::{ExportFormat, MetricsBundle};
pub use ingest::{EngineState, IngestEngine, ShutdownToken};
pub use store::Store;
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod export;
pub mod format;
pub mod ingest;
pub mod logging;
pub mod store;
pub mod types;
