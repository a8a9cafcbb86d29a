//! Disk Store Module
//!
//! Persistent tier: a journaled, size-bounded key to byte-blob store with
//! least-recently-used eviction.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::cache::RecencyList;
use crate::disk::journal::{self, JournalRecord, JournalWriter};
use crate::disk::{validate_key, DiskStats};
use crate::error::{PoolError, Result};

/// Rebuild the journal once this many records no longer describe live state.
const REDUNDANT_OP_COMPACT_THRESHOLD: usize = 2000;

// == Store State ==
struct DiskState {
    directory: PathBuf,
    app_version: u32,
    max_size: u64,
    /// Sum of committed entry lengths
    size: u64,
    /// Committed entries and their lengths
    entries: HashMap<String, u64>,
    lru: RecencyList,
    /// Keys with an open editor
    editing: HashSet<String>,
    /// `None` once closed
    journal: Option<JournalWriter>,
    redundant_ops: usize,
    stats: DiskStats,
}

impl DiskState {
    fn journal(&mut self) -> Result<&mut JournalWriter> {
        self.journal.as_mut().ok_or(PoolError::StoreClosed)
    }

    fn append(&mut self, record: JournalRecord) -> Result<()> {
        self.journal()?.append(&record)
    }

    /// Deletes a committed entry and records its removal.
    fn remove_entry(&mut self, key: &str) -> Result<bool> {
        let Some(len) = self.entries.remove(key) else {
            return Ok(false);
        };
        self.lru.remove(key);
        self.size = self.size.saturating_sub(len);

        if let Err(e) = fs::remove_file(clean_path(&self.directory, key)) {
            if e.kind() != io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }

        self.redundant_ops += 1;
        self.append(JournalRecord::Remove {
            key: key.to_string(),
        })?;
        Ok(true)
    }

    // == Trim ==
    fn trim_to_size(&mut self) -> Result<()> {
        while self.size > self.max_size {
            let Some(key) = self.lru.peek_oldest().map(str::to_string) else {
                break;
            };
            self.remove_entry(&key)?;
            self.stats.evictions += 1;
            debug!(key = %key, "Disk entry evicted");
        }
        Ok(())
    }

    fn needs_rebuild(&self) -> bool {
        self.redundant_ops >= REDUNDANT_OP_COMPACT_THRESHOLD
            && self.redundant_ops >= self.entries.len()
    }

    /// Rewrites the journal to describe only the current state.
    ///
    /// On failure the previous journal is still in place and is reopened for
    /// appending, so the store stays usable.
    fn rebuild_journal(&mut self) -> Result<()> {
        // Committed values first, so replay keeps an in-flight edit pending
        let mut records: Vec<JournalRecord> = self
            .lru
            .iter()
            .map(|key| JournalRecord::Clean {
                key: key.to_string(),
                len: self.entries.get(key).copied().unwrap_or(0),
            })
            .collect();
        records.extend(
            self.editing
                .iter()
                .map(|key| JournalRecord::Dirty { key: key.clone() }),
        );

        // Drop the append handle before the rename replaces the file
        self.journal = None;
        match JournalWriter::rewrite(&self.directory, self.app_version, records) {
            Ok(writer) => self.journal = Some(writer),
            Err(e) => {
                self.journal = Some(JournalWriter::open(&self.directory)?);
                return Err(e);
            }
        }
        self.redundant_ops = 0;
        debug!(entries = self.entries.len(), "Journal rebuilt");
        Ok(())
    }

    /// Compacts the journal once enough records are redundant. A failed
    /// compaction is logged and retried on a later operation.
    fn maybe_rebuild(&mut self) -> Result<()> {
        if self.needs_rebuild() {
            if let Err(e) = self.rebuild_journal() {
                warn!(error = %e, "Journal compaction failed, keeping current journal");
                if self.journal.is_none() {
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

// == Disk Store ==
/// Durable, bounded mapping from string keys to byte blobs.
///
/// Each committed entry lives in its own file; the journal is the authority
/// on which keys are present. Writes go through an [`Editor`] that stages the
/// bytes in a temp file, so an abandoned or crashed edit never touches the
/// previously committed value.
///
/// Thread-safe: all state sits behind one mutex.
pub struct DiskStore {
    state: Mutex<DiskState>,
}

impl DiskStore {
    // == Open ==
    /// Opens the store in an existing directory, replaying its journal.
    ///
    /// # Arguments
    /// * `directory` - Must already exist
    /// * `app_version` - Must match the version a previous journal was written with
    /// * `max_size` - Capacity in bytes of committed entries
    ///
    /// # Errors
    /// A missing directory or an unreadable journal fails the open; nothing is
    /// reset or deleted in that case.
    pub fn open<P: AsRef<Path>>(directory: P, app_version: u32, max_size: u64) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if !directory.is_dir() {
            return Err(PoolError::DirectoryUnavailable(directory));
        }

        let mut state = DiskState {
            directory: directory.clone(),
            app_version,
            max_size,
            size: 0,
            entries: HashMap::new(),
            lru: RecencyList::new(),
            editing: HashSet::new(),
            journal: None,
            redundant_ops: 0,
            stats: DiskStats::default(),
        };

        if journal::journal_path(&directory).exists() {
            let needs_rebuild = Self::restore(&mut state)?;
            if needs_rebuild {
                state.rebuild_journal()?;
            } else {
                state.journal = Some(JournalWriter::open(&directory)?);
            }
            info!(
                directory = %directory.display(),
                entries = state.entries.len(),
                size = state.size,
                "Disk store restored"
            );
        } else {
            state.journal = Some(JournalWriter::rewrite(&directory, app_version, Vec::new())?);
            info!(directory = %directory.display(), "Disk store created");
        }

        state.trim_to_size()?;

        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Replays the journal into `state`. Returns whether the journal should be
    /// rewritten because it no longer matches what is on disk.
    fn restore(state: &mut DiskState) -> Result<bool> {
        let replay = journal::replay(&state.directory, state.app_version)?;
        let record_count = replay.records.len();
        let mut pending: HashSet<String> = HashSet::new();

        for (index, record) in replay.records.into_iter().enumerate() {
            validate_key(record.key()).map_err(|_| PoolError::CorruptJournal {
                line: index + 2,
                reason: "invalid key".to_string(),
            })?;
            match record {
                JournalRecord::Dirty { key } => {
                    pending.insert(key);
                }
                JournalRecord::Clean { key, len } => {
                    pending.remove(&key);
                    state.lru.touch(&key);
                    state.entries.insert(key, len);
                }
                JournalRecord::Remove { key } => {
                    pending.remove(&key);
                    state.lru.remove(&key);
                    state.entries.remove(&key);
                }
                JournalRecord::Read { key } => {
                    if state.entries.contains_key(&key) {
                        state.lru.touch(&key);
                    }
                }
            }
        }

        // Edits that never finished leave only a temp file behind
        for key in &pending {
            let tmp = dirty_path(&state.directory, key);
            if let Err(e) = fs::remove_file(&tmp) {
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
            debug!(key = %key, "Discarded unfinished edit");
        }

        // Committed entries whose file vanished or changed length are dropped
        let mut missing = Vec::new();
        for (key, len) in &state.entries {
            match fs::metadata(clean_path(&state.directory, key)) {
                Ok(meta) if meta.len() == *len => {}
                _ => missing.push(key.clone()),
            }
        }
        for key in &missing {
            warn!(key = %key, "Journal entry has no matching file, dropping it");
            state.entries.remove(key);
            state.lru.remove(key);
            if let Err(e) = fs::remove_file(clean_path(&state.directory, key)) {
                if e.kind() != io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }

        state.size = state.entries.values().sum();
        state.redundant_ops = record_count.saturating_sub(state.entries.len());

        Ok(replay.truncated_tail || !pending.is_empty() || !missing.is_empty())
    }

    fn lock(&self) -> MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // == Edit ==
    /// Starts a transaction for `key`.
    ///
    /// Only one editor per key may be open at a time. The committed value, if
    /// any, stays readable until [`Editor::commit`].
    pub fn edit(&self, key: &str) -> Result<Editor<'_>> {
        validate_key(key)?;
        let mut state = self.lock();
        state.journal()?;

        if state.editing.contains(key) {
            return Err(PoolError::EditInProgress(key.to_string()));
        }

        let path = dirty_path(&state.directory, key);
        let file = File::create(&path)?;
        state.append(JournalRecord::Dirty {
            key: key.to_string(),
        })?;
        state.editing.insert(key.to_string());

        Ok(Editor {
            store: self,
            key: key.to_string(),
            file: Some(BufWriter::new(file)),
            done: false,
        })
    }

    // == Write ==
    /// Stores `bytes` under `key` in a single committed transaction.
    pub fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut editor = self.edit(key)?;
        editor.write_all(bytes)?;
        editor.commit()
    }

    // == Read ==
    /// Returns the committed bytes for `key` and marks it recently used.
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let mut state = self.lock();
        state.journal()?;

        if !state.entries.contains_key(key) {
            state.stats.misses += 1;
            return Ok(None);
        }

        let bytes = match fs::read(clean_path(&state.directory, key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(key = %key, "Disk entry file missing, dropping entry");
                state.remove_entry(key)?;
                state.stats.misses += 1;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        state.lru.touch(key);
        state.stats.hits += 1;
        state.redundant_ops += 1;
        state.append(JournalRecord::Read {
            key: key.to_string(),
        })?;
        state.maybe_rebuild()?;

        Ok(Some(bytes))
    }

    // == Remove ==
    /// Deletes the committed entry for `key`. Returns whether one existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let mut state = self.lock();
        state.journal()?;
        let removed = state.remove_entry(key)?;
        state.maybe_rebuild()?;
        Ok(removed)
    }

    /// Whether a committed entry exists, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Bytes of committed entries.
    pub fn size(&self) -> u64 {
        self.lock().size
    }

    pub fn max_size(&self) -> u64 {
        self.lock().max_size
    }

    /// Changes the capacity, evicting immediately if it shrank.
    pub fn set_max_size(&self, max_size: u64) -> Result<()> {
        let mut state = self.lock();
        state.journal()?;
        state.max_size = max_size;
        state.trim_to_size()?;
        state.maybe_rebuild()
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    pub fn directory(&self) -> PathBuf {
        self.lock().directory.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().journal.is_none()
    }

    pub fn stats(&self) -> DiskStats {
        let state = self.lock();
        DiskStats {
            entry_count: state.entries.len(),
            size: state.size,
            max_size: state.max_size,
            ..state.stats.clone()
        }
    }

    // == Flush ==
    /// Enforces capacity and forces the journal to stable storage.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock();
        state.journal()?;
        state.trim_to_size()?;
        state.journal()?.sync()
    }

    // == Close ==
    /// Flushes and closes the store. A no-op when already closed.
    ///
    /// Editors still open when the store closes fail on commit.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock();
        if state.journal.is_none() {
            return Ok(());
        }
        state.trim_to_size()?;
        state.journal()?.sync()?;
        state.journal = None;
        info!(directory = %state.directory.display(), "Disk store closed");
        Ok(())
    }

    // == Delete ==
    /// Closes the store and purges everything inside its directory.
    /// A no-op when already closed.
    pub fn delete(&self) -> Result<()> {
        let mut state = self.lock();
        if state.journal.is_none() {
            return Ok(());
        }
        state.journal = None;
        state.entries.clear();
        state.lru.clear();
        state.size = 0;

        for dir_entry in fs::read_dir(&state.directory)? {
            let path = dir_entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
        info!(directory = %state.directory.display(), "Disk store deleted");
        Ok(())
    }

    /// Finishes an edit started by [`DiskStore::edit`].
    fn complete_edit(&self, key: &str, success: bool) -> Result<()> {
        let mut state = self.lock();
        state.editing.remove(key);
        let dirty = dirty_path(&state.directory, key);

        if state.journal.is_none() {
            let _ = fs::remove_file(&dirty);
            return Err(PoolError::StoreClosed);
        }

        if !success {
            if let Err(e) = fs::remove_file(&dirty) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(key = %key, error = %e, "Failed to delete aborted edit");
                }
            }
            // Re-assert the committed value, if any, after the dangling dirty record
            let record = match state.entries.get(key) {
                Some(&len) => JournalRecord::Clean {
                    key: key.to_string(),
                    len,
                },
                None => JournalRecord::Remove {
                    key: key.to_string(),
                },
            };
            state.redundant_ops += 1;
            state.append(record)?;
            return state.maybe_rebuild();
        }

        let clean = clean_path(&state.directory, key);
        let len = fs::metadata(&dirty)?.len();
        fs::rename(&dirty, &clean)?;

        if let Some(old_len) = state.entries.insert(key.to_string(), len) {
            state.size = state.size.saturating_sub(old_len);
            state.redundant_ops += 1;
        }
        state.size += len;
        state.lru.touch(key);
        state.stats.commits += 1;
        state.append(JournalRecord::Clean {
            key: key.to_string(),
            len,
        })?;

        state.trim_to_size()?;
        state.maybe_rebuild()
    }
}

// == Editor ==
/// An open write transaction on one key.
///
/// Bytes written go to a temp file. [`Editor::commit`] publishes them
/// atomically; [`Editor::abort`] or dropping the editor discards them.
pub struct Editor<'a> {
    store: &'a DiskStore,
    key: String,
    file: Option<BufWriter<File>>,
    done: bool,
}

impl Editor<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publishes the written bytes as the committed value for the key.
    pub fn commit(mut self) -> Result<()> {
        self.done = true;
        if let Some(mut file) = self.file.take() {
            let synced = file
                .flush()
                .and_then(|_| file.get_ref().sync_all());
            if let Err(e) = synced {
                drop(file);
                // Best effort: the original error is what matters
                let _ = self.store.complete_edit(&self.key, false);
                return Err(e.into());
            }
        }
        self.store.complete_edit(&self.key, true)
    }

    /// Discards the written bytes.
    pub fn abort(mut self) -> Result<()> {
        self.done = true;
        self.file = None;
        self.store.complete_edit(&self.key, false)
    }
}

impl Write for Editor<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "editor is finished")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for Editor<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.file = None;
            if let Err(e) = self.store.complete_edit(&self.key, false) {
                warn!(key = %self.key, error = %e, "Failed to abandon edit");
            }
        }
    }
}

// == Key Handling ==
/// Hex spelling of the key, so any string maps to a portable file name.
fn file_stem(key: &str) -> String {
    key.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn clean_path(directory: &Path, key: &str) -> PathBuf {
    directory.join(format!("{}.0", file_stem(key)))
}

fn dirty_path(directory: &Path, key: &str) -> PathBuf {
    directory.join(format!("{}.0.tmp", file_stem(key)))
}
