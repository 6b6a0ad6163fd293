//! Batch writer
//!
//! Buffers parsed events and the offset watermarks they earn until either
//! the configured batch size is reached or the batch timeout elapses since
//! the first buffered item, whichever comes first. The flush itself is one
//! store transaction (events + session upserts + offset advances), so a
//! failed flush leaves offsets untouched and nothing is silently dropped.

use crate::store::{EventBatch, FileAdvance};
use crate::types::EventRecord;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Messages flowing from the poll worker to the flush worker.
#[derive(Debug)]
pub enum PipelineMsg {
    /// A parsed event with lineage
    Event(EventRecord),
    /// The end of a consumed slice: offset watermark for one file
    Advance(FileAdvance),
}

/// Accumulates pipeline messages into flushable batches.
pub struct BatchWriter {
    capacity: usize,
    timeout: Duration,
    events: Vec<EventRecord>,
    advances: HashMap<PathBuf, FileAdvance>,
    first_buffered_at: Option<Instant>,
}

impl BatchWriter {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            timeout,
            events: Vec::new(),
            advances: HashMap::new(),
            first_buffered_at: None,
        }
    }

    /// Buffer one message.
    pub fn accept(&mut self, msg: PipelineMsg) {
        if self.first_buffered_at.is_none() {
            self.first_buffered_at = Some(Instant::now());
        }
        match msg {
            PipelineMsg::Event(record) => self.events.push(record),
            PipelineMsg::Advance(adv) => {
                // Watermarks only move forward; keep the furthest per file
                match self.advances.get(&adv.path) {
                    Some(existing) if existing.new_offset >= adv.new_offset => {}
                    _ => {
                        self.advances.insert(adv.path.clone(), adv);
                    }
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.advances.is_empty()
    }

    /// Buffered events not yet committed.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Size trigger: the batch is full.
    pub fn size_reached(&self) -> bool {
        self.events.len() >= self.capacity
    }

    /// Time trigger: when the current batch must be flushed at the latest.
    pub fn deadline(&self) -> Option<Instant> {
        self.first_buffered_at.map(|t| t + self.timeout)
    }

    pub fn deadline_reached(&self, now: Instant) -> bool {
        self.deadline().map(|d| now >= d).unwrap_or(false)
    }

    /// Drain the buffer into a committable batch.
    pub fn take(&mut self) -> EventBatch {
        self.first_buffered_at = None;
        EventBatch {
            events: std::mem::take(&mut self.events),
            advances: self.advances.drain().map(|(_, adv)| adv).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventEnvelope, EventKind, Fingerprint, RawEvent};
    use chrono::Utc;

    fn record(offset: u64) -> EventRecord {
        EventRecord {
            event: RawEvent {
                envelope: EventEnvelope {
                    session_id: "s1".to_string(),
                    ts: Utc::now(),
                    success: true,
                    duration_ms: None,
                    agent: None,
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

    fn advance(offset: u64) -> FileAdvance {
        FileAdvance {
            path: PathBuf::from("a.jsonl"),
            new_offset: offset,
            fingerprint: Fingerprint {
                hash: "00".repeat(32),
                prefix_len: offset,
            },
            size_bytes: offset,
            modified_at: None,
        }
    }

    #[test]
    fn test_size_trigger() {
        let mut writer = BatchWriter::new(3, Duration::from_secs(10));
        writer.accept(PipelineMsg::Event(record(0)));
        writer.accept(PipelineMsg::Event(record(100)));
        assert!(!writer.size_reached());

        writer.accept(PipelineMsg::Event(record(200)));
        assert!(writer.size_reached(), "exactly N events fills the batch");

        let batch = writer.take();
        assert_eq!(batch.events.len(), 3);
        assert!(writer.is_empty());
        assert!(writer.deadline().is_none(), "deadline resets after take");
    }

    #[test]
    fn test_time_trigger() {
        let mut writer = BatchWriter::new(50, Duration::from_millis(5));
        writer.accept(PipelineMsg::Event(record(0)));
        assert!(!writer.size_reached());

        let deadline = writer.deadline().expect("deadline set on first accept");
        assert!(!writer.deadline_reached(deadline - Duration::from_millis(1)));
        assert!(writer.deadline_reached(deadline));
    }

    #[test]
    fn test_watermark_only_batch_gets_deadline() {
        let mut writer = BatchWriter::new(50, Duration::from_millis(5));
        writer.accept(PipelineMsg::Advance(advance(128)));
        assert!(writer.deadline().is_some());
        assert_eq!(writer.event_count(), 0);
        assert!(!writer.is_empty());
    }

    #[test]
    fn test_advances_keep_furthest_offset() {
        let mut writer = BatchWriter::new(50, Duration::from_secs(1));
        writer.accept(PipelineMsg::Advance(advance(100)));
        writer.accept(PipelineMsg::Advance(advance(300)));
        writer.accept(PipelineMsg::Advance(advance(200)));

        let batch = writer.take();
        assert_eq!(batch.advances.len(), 1);
        assert_eq!(batch.advances[0].new_offset, 300);
    }
}
