//! SQLite-backed append-only macro journal.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::{
    core::macro_log::{LogSnapshotV1, MacroLog},
    op::{JOURNAL_FORMAT_VERSION, StoredEntry, StoredEntryEnvelope, now_ms},
    types::JournalSeq,
};

use super::{JournalSink, PersistError, PersistResult};

const SNAPSHOT_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotEnvelope {
    format_version: u16,
    snapshot: LogSnapshotV1,
}

/// Macro log rebuilt from the latest snapshot plus the journal tail.
#[derive(Debug, Clone)]
pub struct RecoveredLog {
    /// Log as of the last durable entry.
    pub log: MacroLog,
    /// Sequence a resumed session should assign next.
    pub next_seq: JournalSeq,
}

/// SQLite implementation of [`crate::persist::JournalSink`].
pub struct SqliteJournal {
    conn: Connection,
}

impl SqliteJournal {
    /// Opens or creates a journal database at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory journal.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Rebuilds the macro log from the latest snapshot plus tail entries.
    pub fn load_log(&self) -> PersistResult<RecoveredLog> {
        let (mut log, mut next_seq) = match self.load_latest_snapshot()? {
            Some(snapshot) => {
                let next_seq = snapshot.next_seq.max(1);
                (MacroLog::from_snapshot(snapshot)?, next_seq)
            }
            None => (MacroLog::new(), 1),
        };

        let entries = self.load_entries_after(next_seq - 1)?;
        tracing::debug!(tail = entries.len(), "replaying journal tail");
        for entry in entries {
            next_seq = next_seq.max(entry.seq + 1);
            log.apply_journal(entry.op)?;
        }
        Ok(RecoveredLog { log, next_seq })
    }

    /// Loads entries strictly after `seq`.
    pub fn load_entries_after(&self, seq: JournalSeq) -> PersistResult<Vec<StoredEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, ts_ms, payload FROM journal WHERE seq > ?1 ORDER BY seq ASC")?;

        let rows = stmt.query_map(params![seq as i64], |row| {
            let seq: i64 = row.get(0)?;
            let ts_ms: i64 = row.get(1)?;
            let payload: Vec<u8> = row.get(2)?;
            let mut entry = decode_entry_payload(&payload).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    payload.len(),
                    rusqlite::types::Type::Blob,
                    Box::new(std::io::Error::other(err)),
                )
            })?;
            entry.seq = seq as JournalSeq;
            entry.ts_ms = ts_ms as u64;
            Ok(entry)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Writes a snapshot covering `last_seq`.
    pub fn write_snapshot(&mut self, snapshot: &LogSnapshotV1, last_seq: JournalSeq) -> PersistResult<()> {
        let env = SnapshotEnvelope {
            format_version: SNAPSHOT_FORMAT_VERSION,
            snapshot: snapshot.clone(),
        };
        let payload = serde_json::to_vec(&env)?;
        self.conn.execute(
            "INSERT INTO snapshots(last_seq, ts_ms, payload) VALUES (?1, ?2, ?3)",
            params![last_seq as i64, now_ms() as i64, payload],
        )?;
        Ok(())
    }

    /// Deletes entries up to and including `seq`.
    pub fn compact_through(&mut self, seq: JournalSeq) -> PersistResult<usize> {
        let count = self
            .conn
            .execute("DELETE FROM journal WHERE seq <= ?1", params![seq as i64])?;
        Ok(count)
    }

    /// Returns the latest sequence persisted in the journal table.
    pub fn latest_seq(&self) -> PersistResult<JournalSeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM journal", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as JournalSeq)
    }

    fn load_latest_snapshot(&self) -> PersistResult<Option<LogSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        let env: SnapshotEnvelope = serde_json::from_slice(&payload)?;
        if env.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported snapshot format version: {}",
                env.format_version
            )));
        }
        Ok(Some(env.snapshot))
    }
}

impl JournalSink for SqliteJournal {
    fn append_entries(&mut self, entries: &[StoredEntry]) -> PersistResult<JournalSeq> {
        if entries.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO journal(seq, ts_ms, kind, idx, payload) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for stored in entries {
                let payload = serde_json::to_vec(&StoredEntryEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    stored.op.kind_code(),
                    stored.op.index() as i64,
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        Ok(entries.last().map(|e| e.seq).unwrap_or(0))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }

    fn write_snapshot(&mut self, snapshot: &LogSnapshotV1, last_seq: JournalSeq) -> PersistResult<()> {
        SqliteJournal::write_snapshot(self, snapshot, last_seq)
    }

    fn compact_through(&mut self, seq: JournalSeq) -> PersistResult<usize> {
        SqliteJournal::compact_through(self, seq)
    }
}

fn decode_entry_payload(payload: &[u8]) -> Result<StoredEntry, String> {
    let envelope: StoredEntryEnvelope =
        serde_json::from_slice(payload).map_err(|e| format!("journal payload decode failed: {e}"))?;
    if envelope.format_version != JOURNAL_FORMAT_VERSION {
        return Err(format!(
            "unsupported journal format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.stored)
}
