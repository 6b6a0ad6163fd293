//! Ingestion engine
//!
//! Orchestrates the pipeline from source log files to committed store rows:
//!
//! ```text
//! ┌──────────────┐   slices   ┌──────────────┐   bounded    ┌──────────────┐
//! │ FileScanner  │ ─────────► │ parse worker │ ───────────► │ flush worker │
//! │ (discover +  │            │ (lines →     │    queue     │ (dual-trigger│
//! │  tail files) │            │  events)     │              │  batches)    │
//! └──────────────┘            └──────────────┘              └──────┬───────┘
//!        ▲                                                         │ one
//!        │ resume offsets                                          ▼ transaction
//! ┌──────┴────────┐     offsets advance with the commit     ┌──────────────┐
//! │ OffsetTracker │ ◄──────────────────────────────────────  │    Store     │
//! └───────────────┘                                          └──────────────┘
//! ```
//!
//! Two workers cooperate: a poll worker (discovery, tailing, parsing) feeds a
//! bounded queue, and a flush worker drains it into transactional batches,
//! flushing when either the batch size or the batch timeout is hit. Events
//! from a single file are committed in file order; no ordering is promised
//! across files.
//!
//! The whole pipeline is driven by one [`ShutdownToken`]. In one-shot mode
//! the poll worker also terminates itself once the drain policy reports
//! quiescence. Errors local to one line or one file are absorbed and
//! counted; a batch that cannot be committed after bounded retries is
//! surfaced through the error counter and the engine moves on.

pub mod batcher;
pub mod lock;
pub mod parser;
pub mod scanner;
pub mod tracker;

pub use lock::{default_lock_path, IngestLock};

use crate::config::{IngestConfig, IngestMode};
use crate::error::{Error, Result};
use crate::store::{EventBatch, FileAdvance, Store};
use crate::types::{EngineStats, EventRecord};
use batcher::{BatchWriter, PipelineMsg};
use scanner::{read_slice, FileScanner, FileSlice};
use tracker::OffsetTracker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Cancellation signal shared by every long-running part of the pipeline.
#[derive(Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown; idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Engine lifecycle: `Created → Running → Stopping → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Created,
    Running,
    Stopping,
    Stopped,
}

#[derive(Default)]
struct StatsInner {
    started_at: Option<Instant>,
    files_tracked: u64,
    events_processed: u64,
    events_pending: u64,
    sessions_created: u64,
    unknown_events: u64,
    errors: u64,
}

/// The top-level ingestion component.
pub struct IngestEngine {
    config: IngestConfig,
    store: Arc<Store>,
    state: Arc<Mutex<EngineState>>,
    stats: Arc<RwLock<StatsInner>>,
    token: ShutdownToken,
    lock: Mutex<Option<IngestLock>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl IngestEngine {
    pub fn new(config: IngestConfig, store: Arc<Store>) -> Self {
        Self {
            config,
            store,
            state: Arc::new(Mutex::new(EngineState::Created)),
            stats: Arc::new(RwLock::new(StatsInner::default())),
            token: ShutdownToken::new(),
            lock: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// The engine's cancellation token, for wiring up signal handlers.
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.token.clone()
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock().unwrap()
    }

    /// Launch the pipeline.
    ///
    /// Fails fast if the root directory is missing, the store is unusable,
    /// or another ingestion process holds the lock for this root. Returns
    /// once the workers are running; it does not wait for completion.
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if *state != EngineState::Created {
            return Err(Error::InvalidState(format!(
                "start is only valid from Created, engine is {:?}",
                *state
            )));
        }

        if !self.config.root.is_dir() {
            return Err(Error::RootMissing(self.config.root.clone()));
        }

        let lock_path = self
            .config
            .lock_path
            .clone()
            .unwrap_or_else(|| default_lock_path(&self.config.root));
        let lock = IngestLock::acquire(&lock_path)?;

        let tracker = Arc::new(OffsetTracker::load(self.store.clone())?);

        self.stats.write().unwrap().started_at = Some(Instant::now());

        let (tx, rx) = sync_channel::<PipelineMsg>(self.config.queue_capacity);

        let poll_handle = {
            let config = self.config.clone();
            let tracker = tracker.clone();
            let stats = self.stats.clone();
            let engine_state = self.state.clone();
            let token = self.token.clone();
            std::thread::Builder::new()
                .name("tracelore-poll".to_string())
                .spawn(move || poll_worker(config, tracker, stats, engine_state, token, tx))?
        };

        let flush_handle = {
            let config = self.config.clone();
            let store = self.store.clone();
            let stats = self.stats.clone();
            std::thread::Builder::new()
                .name("tracelore-flush".to_string())
                .spawn(move || flush_worker(config, store, tracker, stats, rx))?
        };

        *self.lock.lock().unwrap() = Some(lock);
        self.workers
            .lock()
            .unwrap()
            .extend([poll_handle, flush_handle]);
        *state = EngineState::Running;

        tracing::info!(
            root = %self.config.root.display(),
            pattern = %self.config.pattern,
            mode = ?self.config.mode,
            "Ingestion engine started"
        );
        Ok(())
    }

    /// Signal the pipeline to stop, flush what is buffered, and release the
    /// lock. Idempotent: a no-op once the engine is Stopped (or never
    /// started).
    pub fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                EngineState::Created | EngineState::Stopped => return Ok(()),
                EngineState::Running => *state = EngineState::Stopping,
                EngineState::Stopping => {}
            }
        }
        self.token.cancel();
        self.join_workers();
        Ok(())
    }

    /// Block until the pipeline has terminated.
    ///
    /// For one-shot mode this is how callers observe quiescence-driven
    /// self-termination; in watch mode it returns after the token is
    /// cancelled (e.g. by a signal handler).
    pub fn wait(&self) {
        self.join_workers();
    }

    /// Non-blocking progress snapshot; callable in every state.
    pub fn stats(&self) -> EngineStats {
        let s = self.stats.read().unwrap();
        EngineStats {
            files_tracked: s.files_tracked,
            events_processed: s.events_processed,
            events_pending: s.events_pending,
            sessions_created: s.sessions_created,
            unknown_events: s.unknown_events,
            errors: s.errors,
            uptime: s.started_at.map(|t| t.elapsed()).unwrap_or_default(),
        }
    }

    /// Join both workers, then finalize: mark Stopped, release the lock,
    /// log the final summary. Holding the workers mutex through the join
    /// serializes concurrent `stop`/`wait` callers.
    fn join_workers(&self) {
        let mut guard = self.workers.lock().unwrap();
        for handle in guard.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Ingest worker panicked");
                self.stats.write().unwrap().errors += 1;
            }
        }
        drop(guard);

        let mut state = self.state.lock().unwrap();
        if matches!(*state, EngineState::Running | EngineState::Stopping) {
            *state = EngineState::Stopped;
            drop(state);
            *self.lock.lock().unwrap() = None;

            let stats = self.stats();
            tracing::info!(
                events = stats.events_processed,
                sessions = stats.sessions_created,
                unknown = stats.unknown_events,
                errors = stats.errors,
                "Ingestion engine stopped"
            );
        }
    }
}

impl Drop for IngestEngine {
    fn drop(&mut self) {
        self.token.cancel();
        let _ = self.stop();
    }
}

// ============================================
// Poll worker
// ============================================

fn poll_worker(
    config: IngestConfig,
    tracker: Arc<OffsetTracker>,
    stats: Arc<RwLock<StatsInner>>,
    state: Arc<Mutex<EngineState>>,
    token: ShutdownToken,
    tx: SyncSender<PipelineMsg>,
) {
    let mut scanner = FileScanner::new(
        config.root.clone(),
        config.pattern.clone(),
        config.stale_grace,
        tracker.clone(),
    );

    // In watch mode, filesystem events cut the poll wait short. Polling
    // stays the correctness mechanism; the watcher is an accelerator.
    let (nudge_tx, nudge_rx) = std::sync::mpsc::channel::<()>();
    let _watcher = match config.mode {
        IngestMode::Watch => start_watcher(&config.root, nudge_tx),
        IngestMode::OneShot => None,
    };

    let started = Instant::now();
    let mut idle_polls: u32 = 0;

    'main: loop {
        if token.is_cancelled() {
            break;
        }

        match scanner.poll_once() {
            Ok(slices) => {
                let mut produced = false;
                for slice in slices {
                    if token.is_cancelled() {
                        break 'main;
                    }
                    match process_slice(&slice, &config, &stats, &tx) {
                        Ok(consumed_end) => {
                            if consumed_end > slice.start {
                                scanner.mark_read(&slice.path, consumed_end);
                                produced = true;
                            }
                        }
                        // Flush worker is gone; nothing left to feed
                        Err(()) => break 'main,
                    }
                }

                stats.write().unwrap().files_tracked = tracker.len() as u64;

                if config.mode == IngestMode::OneShot {
                    let pending = stats.read().unwrap().events_pending;
                    if !produced && pending == 0 {
                        idle_polls += 1;
                    } else {
                        idle_polls = 0;
                    }
                    if idle_polls >= config.drain.idle_checks {
                        tracing::debug!(checks = idle_polls, "Drain complete, quiescence reached");
                        break;
                    }
                    if started.elapsed() >= config.drain.max_wait {
                        tracing::warn!("Drain safety bound reached before quiescence");
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Scan failed");
                stats.write().unwrap().errors += 1;
            }
        }

        if token.is_cancelled() {
            break;
        }
        match nudge_rx.recv_timeout(config.poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
            // Watcher not running (one-shot, or setup failed): plain sleep
            Err(RecvTimeoutError::Disconnected) => std::thread::sleep(config.poll_interval),
        }
    }

    // One-shot quiescence terminates the pipeline from the inside
    {
        let mut state = state.lock().unwrap();
        if *state == EngineState::Running {
            *state = EngineState::Stopping;
        }
    }
    // Dropping the sender lets the flush worker drain and exit
    drop(tx);
}

/// Read one slice, parse its lines, and feed the queue.
///
/// Returns the consumed end offset, or `Err(())` when the queue is closed.
fn process_slice(
    slice: &FileSlice,
    config: &IngestConfig,
    stats: &Arc<RwLock<StatsInner>>,
    tx: &SyncSender<PipelineMsg>,
) -> std::result::Result<u64, ()> {
    let data = match read_slice(&slice.path, slice.start, slice.end) {
        Ok(d) => d,
        Err(e) => {
            // Temporarily unreadable; the next poll retries the same range
            tracing::warn!(path = %slice.path.display(), error = %e, "Failed to read slice");
            stats.write().unwrap().errors += 1;
            return Ok(slice.start);
        }
    };

    let source_file = slice.path.to_string_lossy().to_string();

    for (offset, line) in &data.lines {
        if line.is_empty() {
            continue;
        }
        match parser::parse_line(line) {
            Ok(parser::Parsed::Event(mut event)) => {
                if event.envelope.project.is_none() {
                    event.envelope.project = config.project.clone();
                }
                let record = EventRecord {
                    event,
                    source_file: source_file.clone(),
                    source_offset: *offset,
                    line_hash: parser::line_digest(line),
                };
                // Count before sending: a fast flush on the other side must
                // never observe its decrement before this increment
                {
                    let mut s = stats.write().unwrap();
                    s.events_processed += 1;
                    s.events_pending += 1;
                }
                if tx.send(PipelineMsg::Event(record)).is_err() {
                    let mut s = stats.write().unwrap();
                    s.events_pending = s.events_pending.saturating_sub(1);
                    return Err(());
                }
            }
            Ok(parser::Parsed::Unknown { kind }) => {
                tracing::debug!(
                    kind = %kind,
                    path = %slice.path.display(),
                    offset,
                    "Skipping unknown event kind"
                );
                stats.write().unwrap().unknown_events += 1;
            }
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    path = %slice.path.display(),
                    offset,
                    "Skipping malformed line"
                );
                stats.write().unwrap().errors += 1;
            }
        }
    }

    if data.consumed_end > slice.start {
        let adv = FileAdvance {
            path: slice.path.clone(),
            new_offset: data.consumed_end,
            fingerprint: slice.fingerprint.clone(),
            size_bytes: slice.size,
            modified_at: slice.modified_at,
        };
        if tx.send(PipelineMsg::Advance(adv)).is_err() {
            return Err(());
        }
    }

    Ok(data.consumed_end)
}

fn start_watcher(
    root: &std::path::Path,
    nudge_tx: std::sync::mpsc::Sender<()>,
) -> Option<notify::RecommendedWatcher> {
    use notify::{RecursiveMode, Watcher};

    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if res.is_ok() {
            let _ = nudge_tx.send(());
        }
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "Filesystem watcher unavailable, falling back to polling");
            return None;
        }
    };

    if let Err(e) = watcher.watch(root, RecursiveMode::Recursive) {
        tracing::warn!(error = %e, root = %root.display(), "Failed to watch root, falling back to polling");
        return None;
    }

    Some(watcher)
}

// ============================================
// Flush worker
// ============================================

fn flush_worker(
    config: IngestConfig,
    store: Arc<Store>,
    tracker: Arc<OffsetTracker>,
    stats: Arc<RwLock<StatsInner>>,
    rx: Receiver<PipelineMsg>,
) {
    let mut writer = BatchWriter::new(config.batch_size, config.batch_timeout);

    loop {
        let wait = match writer.deadline() {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => config.batch_timeout.max(Duration::from_millis(10)),
        };

        match rx.recv_timeout(wait) {
            Ok(msg) => {
                writer.accept(msg);
                if writer.size_reached() {
                    flush(&store, &tracker, &stats, &mut writer, config.flush_retries);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if writer.deadline_reached(Instant::now()) {
                    flush(&store, &tracker, &stats, &mut writer, config.flush_retries);
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                // Pipeline closed: final flush of any partial batch
                flush(&store, &tracker, &stats, &mut writer, config.flush_retries);
                break;
            }
        }
    }
}

fn flush(
    store: &Store,
    tracker: &OffsetTracker,
    stats: &Arc<RwLock<StatsInner>>,
    writer: &mut BatchWriter,
    retries: u32,
) {
    if writer.is_empty() {
        return;
    }
    let event_count = writer.event_count() as u64;
    let batch = writer.take();

    match commit_with_retries(store, &batch, retries) {
        Ok(commit) => {
            for adv in &batch.advances {
                tracker.apply_advance(adv);
            }
            let mut s = stats.write().unwrap();
            s.events_pending = s.events_pending.saturating_sub(event_count);
            s.sessions_created += commit.sessions_created as u64;
            tracing::debug!(
                inserted = commit.inserted,
                duplicates = commit.duplicates,
                sessions = commit.sessions_created,
                "Batch committed"
            );
        }
        Err(e) => {
            // Escalate through the error counter and move on. Offsets were
            // not advanced, so the dropped events are re-read by a later run
            // and deduplicated by their natural key.
            tracing::error!(error = %e, events = event_count, "Dropping batch after failed commit");
            let mut s = stats.write().unwrap();
            s.events_pending = s.events_pending.saturating_sub(event_count);
            s.errors += event_count.max(1);
        }
    }
}

fn commit_with_retries(
    store: &Store,
    batch: &EventBatch,
    retries: u32,
) -> Result<crate::store::BatchCommit> {
    let attempts = retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match store.commit_batch(batch) {
            Ok(commit) => return Ok(commit),
            Err(e) => {
                tracing::warn!(error = %e, attempt, "Batch commit failed");
                last_error = e.to_string();
                if attempt < attempts {
                    std::thread::sleep(RETRY_BACKOFF);
                }
            }
        }
    }

    Err(Error::BatchFailed {
        attempts,
        message: last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_token() {
        let token = ShutdownToken::new();
        assert!(!token.is_cancelled());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());

        // Idempotent
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_start_requires_existing_root() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.migrate().unwrap();
        let config = IngestConfig::new("/definitely/not/a/real/root".into());
        let engine = IngestEngine::new(config, store);

        match engine.start() {
            Err(Error::RootMissing(_)) => {}
            other => panic!("expected RootMissing, got {:?}", other.map(|_| ())),
        }
        assert_eq!(engine.state(), EngineState::Created);
    }

    #[test]
    fn test_stop_before_start_is_noop() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.migrate().unwrap();
        let engine = IngestEngine::new(IngestConfig::new("/tmp".into()), store);

        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Created);
        // Stats remain available in every state
        assert_eq!(engine.stats().events_processed, 0);
    }

    #[test]
    fn test_double_start_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.migrate().unwrap();

        let mut config = IngestConfig::new(dir.path().to_path_buf());
        config.mode = IngestMode::Watch;
        config.lock_path = Some(dir.path().join("test.lock"));
        config.poll_interval = Duration::from_millis(10);

        let engine = IngestEngine::new(config, store);
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);

        match engine.start() {
            Err(Error::InvalidState(_)) => {}
            other => panic!("expected InvalidState, got {:?}", other.map(|_| ())),
        }

        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);

        // Stop is idempotent from Stopped
        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
    }
}
