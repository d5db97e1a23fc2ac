//! Journal operations that reproduce macro log mutations, plus persistence wrappers.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{record::OperationRecord, types::JournalSeq};

/// Version number for serialized [`StoredEntryEnvelope`] payloads.
pub const JOURNAL_FORMAT_VERSION: u16 = 1;

/// One macro log mutation, replayable with
/// [`MacroLog::apply_journal`](crate::core::macro_log::MacroLog::apply_journal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalOp {
    /// Write `record` at `index` and move the cursor just past it.
    Put {
        /// Slot written; equal to the current length for appends.
        index: usize,
        /// Drop every record after `index`.
        truncate_tail: bool,
        /// Record written.
        record: OperationRecord,
    },
    /// Move the cursor without touching records.
    Rewind {
        /// New cursor position.
        cursor: usize,
    },
}

impl JournalOp {
    /// Small integer stored alongside the payload for ad hoc queries.
    pub fn kind_code(&self) -> i64 {
        match self {
            Self::Put {
                truncate_tail: true,
                ..
            } => 1,
            Self::Put { .. } => 2,
            Self::Rewind { .. } => 3,
        }
    }

    /// Log slot the operation addresses.
    pub fn index(&self) -> usize {
        match self {
            Self::Put { index, .. } => *index,
            Self::Rewind { cursor } => *cursor,
        }
    }
}

/// Journal row metadata plus operation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Monotonic journal sequence.
    pub seq: JournalSeq,
    /// Timestamp in milliseconds.
    pub ts_ms: u64,
    /// Operation body.
    pub op: JournalOp,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntryEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped entry.
    pub stored: StoredEntry,
}

impl StoredEntryEnvelope {
    /// Constructs an envelope using [`JOURNAL_FORMAT_VERSION`].
    pub fn new(stored: StoredEntry) -> Self {
        Self {
            format_version: JOURNAL_FORMAT_VERSION,
            stored,
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
