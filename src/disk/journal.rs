//! Journal Module
//!
//! Append-only index of the disk tier, one JSON document per line.
//!
//! The first line is a [`JournalHeader`]; every following line is a
//! [`JournalRecord`]. An entry is present exactly when its last record is
//! `clean`. The journal is only ever replaced wholesale through a temp file
//! and a rename, so a crash leaves either the old or the new journal.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PoolError, Result};

pub const JOURNAL_FILE: &str = "journal";
pub const JOURNAL_FILE_TMP: &str = "journal.tmp";
pub const JOURNAL_MAGIC: &str = "bitmap_pool.journal";
pub const JOURNAL_VERSION: u32 = 1;

// == Header ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalHeader {
    pub magic: String,
    pub version: u32,
    pub app_version: u32,
    pub created_at: DateTime<Utc>,
}

impl JournalHeader {
    pub fn new(app_version: u32) -> Self {
        Self {
            magic: JOURNAL_MAGIC.to_string(),
            version: JOURNAL_VERSION,
            app_version,
            created_at: Utc::now(),
        }
    }
}

// == Record ==
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum JournalRecord {
    /// An edit was opened; a matching `clean` or `remove` must follow
    Dirty { key: String },
    /// An edit committed `len` bytes
    Clean { key: String, len: u64 },
    /// The entry is gone
    Remove { key: String },
    /// The entry was read; only affects recency
    Read { key: String },
}

impl JournalRecord {
    pub fn key(&self) -> &str {
        match self {
            JournalRecord::Dirty { key }
            | JournalRecord::Clean { key, .. }
            | JournalRecord::Remove { key }
            | JournalRecord::Read { key } => key,
        }
    }
}

// == Replay ==
/// Parsed contents of an existing journal.
#[derive(Debug)]
pub struct Replay {
    pub header: JournalHeader,
    pub records: Vec<JournalRecord>,
    /// A partially written final line was dropped
    pub truncated_tail: bool,
}

/// Reads and validates the journal in `directory`.
///
/// Any malformed complete line is fatal. Only an unterminated final line,
/// left by a crash during an append, is tolerated.
pub fn replay(directory: &Path, app_version: u32) -> Result<Replay> {
    let content = fs::read_to_string(directory.join(JOURNAL_FILE))?;
    let mut lines: Vec<&str> = content.lines().collect();

    let truncated_tail = !content.is_empty() && !content.ends_with('\n');
    if truncated_tail {
        lines.pop();
    }

    let Some((first, rest)) = lines.split_first() else {
        return Err(corrupt(1, "missing header"));
    };

    let header: JournalHeader =
        serde_json::from_str(first).map_err(|e| corrupt(1, e.to_string()))?;
    if header.magic != JOURNAL_MAGIC {
        return Err(corrupt(1, format!("unexpected magic {:?}", header.magic)));
    }
    if header.version != JOURNAL_VERSION {
        return Err(corrupt(1, format!("unsupported version {}", header.version)));
    }
    if header.app_version != app_version {
        return Err(corrupt(
            1,
            format!(
                "app version {} does not match expected {}",
                header.app_version, app_version
            ),
        ));
    }

    let mut records = Vec::with_capacity(rest.len());
    for (index, line) in rest.iter().enumerate() {
        let record: JournalRecord =
            serde_json::from_str(line).map_err(|e| corrupt(index + 2, e.to_string()))?;
        records.push(record);
    }

    Ok(Replay {
        header,
        records,
        truncated_tail,
    })
}

fn corrupt(line: usize, reason: impl Into<String>) -> PoolError {
    PoolError::CorruptJournal {
        line,
        reason: reason.into(),
    }
}

// == Writer ==
/// Append handle on the live journal.
#[derive(Debug)]
pub struct JournalWriter {
    file: BufWriter<File>,
}

impl JournalWriter {
    /// Opens the existing journal for appending.
    pub fn open(directory: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .open(directory.join(JOURNAL_FILE))?;
        Ok(Self {
            file: BufWriter::new(file),
        })
    }

    /// Atomically replaces the journal with a header followed by `records`.
    pub fn rewrite<I>(directory: &Path, app_version: u32, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = JournalRecord>,
    {
        let tmp_path = directory.join(JOURNAL_FILE_TMP);
        {
            let mut out = BufWriter::new(File::create(&tmp_path)?);
            write_line(&mut out, &JournalHeader::new(app_version))?;
            let mut count = 0usize;
            for record in records {
                write_line(&mut out, &record)?;
                count += 1;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
            debug!(path = %tmp_path.display(), records = count, "Journal written");
        }
        fs::rename(&tmp_path, journal_path(directory))?;
        Self::open(directory)
    }

    /// Appends one record and pushes it to the OS.
    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        write_line(&mut self.file, record)?;
        self.file.flush()?;
        Ok(())
    }

    /// Forces appended records to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }
}

fn write_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    out.write_all(b"\n")?;
    Ok(())
}

pub fn journal_path(directory: &Path) -> PathBuf {
    directory.join(JOURNAL_FILE)
}
