/// SQLite-backed journal.
pub mod sqlite;

use thiserror::Error;

use crate::{
    core::macro_log::{LogError, LogSnapshotV1},
    op::StoredEntry,
    types::JournalSeq,
};

/// Errors surfaced by persistence adapters.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite driver failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload (de)serialization failure.
    #[error("payload encoding: {0}")]
    Serde(#[from] serde_json::Error),
    /// Stored entries do not replay onto the log.
    #[error("journal does not apply cleanly: {0}")]
    Log(#[from] LogError),
    /// Adapter-specific failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable destination for journal entries drained from a session.
pub trait JournalSink: Send {
    /// Appends entries in order and returns the highest seq written.
    fn append_entries(&mut self, entries: &[StoredEntry]) -> PersistResult<JournalSeq>;
    /// Forces buffered writes to durable storage.
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
    /// Stores a snapshot covering every entry up to `last_seq`.
    fn write_snapshot(&mut self, _snapshot: &LogSnapshotV1, _last_seq: JournalSeq) -> PersistResult<()> {
        Ok(())
    }
    /// Deletes entries at or below `seq`; returns how many went.
    fn compact_through(&mut self, _seq: JournalSeq) -> PersistResult<usize> {
        Ok(0)
    }
}
