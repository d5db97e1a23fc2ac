use std::{ops::Range, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    op::JournalOp,
    record::OperationRecord,
    script::Script,
    value::NotRenderable,
};

/// Serializable copy of a [`MacroLog`], tagged with the next journal seq.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSnapshotV1 {
    /// First journal seq not covered by this snapshot.
    pub next_seq: u64,
    /// Length of the active prefix.
    pub cursor: usize,
    /// Active records followed by the rolled-back tail.
    pub records: Vec<OperationRecord>,
}

/// Journal operation that does not fit the log it is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// A put addressed a slot past the end.
    #[error("journal writes slot {index} but the log holds {len} records")]
    IndexGap {
        /// Slot the put addressed.
        index: usize,
        /// Records held at the time.
        len: usize,
    },
    /// A rewind or snapshot cursor points past the end.
    #[error("cursor {cursor} is past the end of a log holding {len} records")]
    CursorOutOfRange {
        /// Requested cursor.
        cursor: usize,
        /// Records held at the time.
        len: usize,
    },
}

/// Cursor-addressed history of every committed operation.
///
/// Records before the cursor form the active prefix; records after it were
/// rolled back by undo and are kept until a fresh commit truncates them.
#[derive(Debug, Default, Clone)]
pub struct MacroLog {
    records: Vec<Arc<OperationRecord>>,
    cursor: usize,
}

impl MacroLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a log from a snapshot, rejecting an out-of-range cursor.
    pub fn from_snapshot(snapshot: LogSnapshotV1) -> Result<Self, LogError> {
        if snapshot.cursor > snapshot.records.len() {
            return Err(LogError::CursorOutOfRange {
                cursor: snapshot.cursor,
                len: snapshot.records.len(),
            });
        }
        Ok(Self {
            records: snapshot.records.into_iter().map(Arc::new).collect(),
            cursor: snapshot.cursor,
        })
    }

    /// Copies every record, including the rolled-back tail.
    pub fn export_snapshot(&self, next_seq: u64) -> LogSnapshotV1 {
        LogSnapshotV1 {
            next_seq,
            cursor: self.cursor,
            records: self.records.iter().map(|r| r.as_ref().clone()).collect(),
        }
    }

    /// Appends at the cursor, discarding any rolled-back tail first.
    pub fn append(&mut self, record: Arc<OperationRecord>) -> usize {
        self.records.truncate(self.cursor);
        self.records.push(record);
        self.cursor = self.records.len();
        self.cursor - 1
    }

    /// Writes a replayed record at the cursor, keeping the tail after it.
    pub fn put_at_cursor(&mut self, record: Arc<OperationRecord>) -> usize {
        let index = self.cursor;
        if index < self.records.len() {
            self.records[index] = record;
        } else {
            self.records.push(record);
        }
        self.cursor += 1;
        index
    }

    /// Replaces the last active record and drops the rolled-back tail.
    pub fn replace_last(&mut self, record: Arc<OperationRecord>) -> Option<usize> {
        let index = self.cursor.checked_sub(1)?;
        self.records.truncate(self.cursor);
        self.records[index] = record;
        Some(index)
    }

    /// Moves the cursor one step left.
    pub fn rewind(&mut self) -> Option<usize> {
        self.cursor = self.cursor.checked_sub(1)?;
        Some(self.cursor)
    }

    /// Applies one journaled mutation, as recorded by a session.
    ///
    /// Replaying a session's journal in seq order yields the same records and
    /// cursor the session holds.
    pub fn apply_journal(&mut self, op: JournalOp) -> Result<(), LogError> {
        match op {
            JournalOp::Put {
                index,
                truncate_tail,
                record,
            } => {
                let len = self.records.len();
                if index > len {
                    return Err(LogError::IndexGap { index, len });
                }
                let record = Arc::new(record);
                if index == len {
                    self.records.push(record);
                } else {
                    self.records[index] = record;
                }
                if truncate_tail {
                    self.records.truncate(index + 1);
                }
                self.cursor = index + 1;
            }
            JournalOp::Rewind { cursor } => {
                if cursor > self.records.len() {
                    return Err(LogError::CursorOutOfRange {
                        cursor,
                        len: self.records.len(),
                    });
                }
                self.cursor = cursor;
            }
        }
        Ok(())
    }

    /// Number of active records.
    pub fn len(&self) -> usize {
        self.cursor
    }

    /// True when nothing is active, even if a rolled-back tail remains.
    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Active records plus the rolled-back tail.
    pub fn total_len(&self) -> usize {
        self.records.len()
    }

    /// Index of the next slot a commit writes.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Active records followed by the rolled-back tail.
    pub(crate) fn records(&self) -> &[Arc<OperationRecord>] {
        &self.records
    }

    /// Records before the cursor.
    pub fn active(&self) -> &[Arc<OperationRecord>] {
        &self.records[..self.cursor]
    }

    /// Active record at `index`.
    pub fn get(&self, index: usize) -> Option<&OperationRecord> {
        self.active().get(index).map(Arc::as_ref)
    }

    /// Most recent active record.
    pub fn last(&self) -> Option<&OperationRecord> {
        self.active().last().map(Arc::as_ref)
    }

    /// `None` when `range` reaches past the active prefix.
    pub fn slice(&self, range: Range<usize>) -> Option<&[Arc<OperationRecord>]> {
        self.active().get(range)
    }

    /// Iterates the active prefix in commit order.
    pub fn iter(&self) -> impl Iterator<Item = &OperationRecord> {
        self.active().iter().map(Arc::as_ref)
    }

    /// Lazily renders the active prefix, one call expression per record.
    pub fn render(&self) -> impl Iterator<Item = String> + '_ {
        self.iter().map(render_logged)
    }

    /// Lazily renders `range` of the active prefix; out-of-range yields nothing.
    pub fn render_range(&self, range: Range<usize>) -> impl Iterator<Item = String> + '_ {
        self.slice(range)
            .unwrap_or_default()
            .iter()
            .map(|r| render_logged(r))
    }

    /// Like [`MacroLog::render`], but reports opaque arguments instead of substituting placeholders.
    pub fn try_render(&self) -> Vec<Result<String, NotRenderable>> {
        self.iter().map(OperationRecord::try_render_line).collect()
    }

    /// Renders the active prefix as a replayable [`Script`].
    pub fn script(&self) -> Script {
        Script::from_lines(self.render().collect())
    }

    /// Drops every record, the tail included.
    pub fn clear(&mut self) {
        self.records.clear();
        self.cursor = 0;
    }
}

fn render_logged(record: &OperationRecord) -> String {
    match record.try_render_line() {
        Ok(line) => line,
        Err(err) => {
            tracing::warn!(
                object = %record.target,
                callable = %record.callable_ref,
                type_name = %err.type_name,
                "rendering macro line with placeholder"
            );
            record.render_line()
        }
    }
}

impl std::ops::Index<usize> for MacroLog {
    type Output = OperationRecord;

    fn index(&self, index: usize) -> &Self::Output {
        &self.active()[index]
    }
}
