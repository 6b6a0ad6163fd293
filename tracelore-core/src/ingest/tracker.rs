//! Offset tracker
//!
//! Remembers, per source file, the byte offset up to which content has been
//! durably consumed, plus a head fingerprint that detects truncation and
//! rotation. Naive reuse of a stale byte offset after rotation would skip or
//! misattribute data, so a fingerprint mismatch resets the offset to zero.
//!
//! State is persisted in the store's `tracked_files` table so a restarted
//! process resumes instead of reprocessing every file. During normal
//! operation offsets are advanced inside the same transaction that commits
//! the batch (see [`Store::commit_batch`]); the tracker then only refreshes
//! its in-memory view via [`OffsetTracker::apply_advance`].

use crate::error::Result;
use crate::store::{FileAdvance, Store};
use crate::types::{Fingerprint, TrackedFile};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// How many leading bytes the fingerprint covers at most.
const FINGERPRINT_PREFIX: u64 = 4096;

/// Outcome of checking a file's head against its recorded fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintCheck {
    /// No fingerprint recorded yet
    New,
    /// Head still matches; the recorded offset is valid
    Match,
    /// Head changed or file shrank below the hashed prefix; treat as rotated
    Mismatch,
}

/// Compute the head fingerprint of a file.
pub fn fingerprint_file(path: &Path, size: u64) -> std::io::Result<Fingerprint> {
    let prefix_len = size.min(FINGERPRINT_PREFIX);
    let hash = hash_prefix(path, prefix_len)?;
    Ok(Fingerprint { hash, prefix_len })
}

fn hash_prefix(path: &Path, len: u64) -> std::io::Result<String> {
    let mut buf = Vec::with_capacity(len as usize);
    File::open(path)?.take(len).read_to_end(&mut buf)?;
    let digest = Sha256::digest(&buf);
    Ok(hex::encode(digest))
}

/// Per-file consumed-offset state, backed by the store.
pub struct OffsetTracker {
    store: Arc<Store>,
    files: Mutex<HashMap<PathBuf, TrackedFile>>,
}

impl OffsetTracker {
    /// Load persisted state from the store.
    pub fn load(store: Arc<Store>) -> Result<Self> {
        let files = store
            .load_tracked_files()?
            .into_iter()
            .map(|f| (f.path.clone(), f))
            .collect::<HashMap<_, _>>();

        tracing::debug!(count = files.len(), "Loaded tracked file state");

        Ok(Self {
            store,
            files: Mutex::new(files),
        })
    }

    /// The offset to resume reading this file from.
    pub fn offset(&self, path: &Path) -> u64 {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|f| f.offset)
            .unwrap_or(0)
    }

    /// Number of files currently tracked.
    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.lock().unwrap().is_empty()
    }

    /// All tracked paths.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    /// Check the file's head against the recorded fingerprint.
    pub fn verify(&self, path: &Path, current_size: u64) -> std::io::Result<FingerprintCheck> {
        let recorded = {
            let files = self.files.lock().unwrap();
            files.get(path).and_then(|f| f.fingerprint.clone())
        };

        let Some(recorded) = recorded else {
            return Ok(FingerprintCheck::New);
        };

        if current_size < recorded.prefix_len {
            return Ok(FingerprintCheck::Mismatch);
        }

        let head = hash_prefix(path, recorded.prefix_len)?;
        if head == recorded.hash {
            Ok(FingerprintCheck::Match)
        } else {
            Ok(FingerprintCheck::Mismatch)
        }
    }

    /// Make a file known to the tracker and stamp its last sighting.
    pub fn observe(&self, path: &Path, size: u64, modified_at: Option<DateTime<Utc>>) {
        let mut files = self.files.lock().unwrap();
        let entry = files
            .entry(path.to_path_buf())
            .or_insert_with(|| TrackedFile::new(path.to_path_buf()));
        entry.size_bytes = size;
        entry.modified_at = modified_at;
        entry.last_seen_at = Some(Utc::now());
        entry.stale = false;
    }

    /// Reset a rotated/truncated file to offset zero.
    ///
    /// Clears the fingerprint so the next check reports `New` rather than a
    /// second mismatch; persisted immediately.
    pub fn reset(&self, path: &Path) -> Result<()> {
        let file = {
            let mut files = self.files.lock().unwrap();
            let entry = files
                .entry(path.to_path_buf())
                .or_insert_with(|| TrackedFile::new(path.to_path_buf()));
            entry.offset = 0;
            entry.fingerprint = None;
            entry.clone()
        };
        tracing::info!(path = %path.display(), "File rotated or truncated, offset reset");
        self.store.save_tracked_file(&file)
    }

    /// Advance a file's consumed offset, persisting immediately.
    ///
    /// Offsets only ever move forward; a regressing advance is ignored.
    pub fn advance(
        &self,
        path: &Path,
        new_offset: u64,
        fingerprint: Fingerprint,
        size: u64,
        modified_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let file = {
            let mut files = self.files.lock().unwrap();
            let entry = files
                .entry(path.to_path_buf())
                .or_insert_with(|| TrackedFile::new(path.to_path_buf()));
            if new_offset < entry.offset {
                tracing::warn!(
                    path = %path.display(),
                    current = entry.offset,
                    attempted = new_offset,
                    "Ignoring regressing offset advance"
                );
                return Ok(());
            }
            entry.offset = new_offset;
            entry.fingerprint = Some(fingerprint);
            entry.size_bytes = size;
            entry.modified_at = modified_at;
            entry.last_seen_at = Some(Utc::now());
            entry.stale = false;
            entry.clone()
        };
        self.store.save_tracked_file(&file)
    }

    /// Refresh the in-memory view after a batch commit already persisted the
    /// advance as part of its transaction.
    pub fn apply_advance(&self, adv: &FileAdvance) {
        let mut files = self.files.lock().unwrap();
        let entry = files
            .entry(adv.path.clone())
            .or_insert_with(|| TrackedFile::new(adv.path.clone()));
        if adv.new_offset >= entry.offset {
            entry.offset = adv.new_offset;
            entry.fingerprint = Some(adv.fingerprint.clone());
            entry.size_bytes = adv.size_bytes;
            entry.modified_at = adv.modified_at;
            entry.last_seen_at = Some(Utc::now());
            entry.stale = false;
        }
    }

    /// Flag a file that has disappeared from scans; kept until the grace
    /// period passes in case of atomic rename-based rotation.
    pub fn mark_stale(&self, path: &Path) -> Result<()> {
        let file = {
            let mut files = self.files.lock().unwrap();
            match files.get_mut(path) {
                Some(entry) if !entry.stale => {
                    entry.stale = true;
                    entry.clone()
                }
                _ => return Ok(()),
            }
        };
        tracing::debug!(path = %path.display(), "File missing, marked stale");
        self.store.save_tracked_file(&file)
    }

    /// Drop all state for a removed file.
    pub fn forget(&self, path: &Path) -> Result<()> {
        self.files.lock().unwrap().remove(path);
        tracing::info!(path = %path.display(), "Forgetting removed file");
        self.store.delete_tracked_file(path)
    }
}
