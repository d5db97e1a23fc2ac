use std::sync::Arc;

use crate::{record::OperationRecord, undo::CompensatingAction};

/// One undoable step: the logged record and how to reverse it.
pub struct StackEntry<T> {
    /// Record shared with the macro log.
    pub record: Arc<OperationRecord>,
    /// Reversal logic; invoked once per undo.
    pub action: CompensatingAction<T>,
    /// Set for auto-call operations; equal keys on consecutive entries coalesce.
    pub merge_key: Option<String>,
}

/// `done` and `undone` stacks, most recent last.
pub struct UndoStackPair<T> {
    done: Vec<StackEntry<T>>,
    undone: Vec<StackEntry<T>>,
}

impl<T> Default for UndoStackPair<T> {
    fn default() -> Self {
        Self {
            done: Vec::new(),
            undone: Vec::new(),
        }
    }
}

impl<T> UndoStackPair<T> {
    /// Two empty stacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a freshly committed entry, abandoning the redo branch.
    pub fn push_fresh(&mut self, entry: StackEntry<T>) {
        self.done.push(entry);
        self.undone.clear();
    }

    /// Pushes the entry produced by a redo replay; remaining redo entries stay.
    pub fn push_redone(&mut self, entry: StackEntry<T>) {
        self.done.push(entry);
    }

    /// Folds a fresh entry into the top of `done` when both are setter
    /// actions on the same field, or both carry the same auto-call key.
    ///
    /// Returns the inputs back when they do not coalesce.
    pub fn coalesce(
        &mut self,
        record: Arc<OperationRecord>,
        action: CompensatingAction<T>,
        merge_key: Option<String>,
    ) -> Result<(), (Arc<OperationRecord>, CompensatingAction<T>, Option<String>)> {
        let Some(top) = self.done.last_mut() else {
            return Err((record, action, merge_key));
        };

        match (&mut top.action, action) {
            (CompensatingAction::Setter(prev), CompensatingAction::Setter(next))
                if prev.field() == next.field() =>
            {
                *prev = prev.merge_with(next.new_value().clone());
            }
            (_, next) => {
                let same_key = merge_key.is_some() && top.merge_key == merge_key;
                if !same_key {
                    return Err((record, next, merge_key));
                }
            }
        }

        top.record = record;
        self.undone.clear();
        Ok(())
    }

    /// Takes the step an undo would reverse.
    pub fn pop_done(&mut self) -> Option<StackEntry<T>> {
        self.done.pop()
    }

    /// Takes the step a redo would replay.
    pub fn pop_undone(&mut self) -> Option<StackEntry<T>> {
        self.undone.pop()
    }

    /// Puts an entry back on `done` after a failed undo.
    pub fn restore_done(&mut self, entry: StackEntry<T>) {
        self.done.push(entry);
    }

    /// Parks an undone step, or puts back one whose redo failed.
    pub fn push_undone(&mut self, entry: StackEntry<T>) {
        self.undone.push(entry);
    }

    /// Drops the oldest `done` entries beyond `max` (0 keeps everything).
    pub fn trim_history(&mut self, max: usize) -> usize {
        if max == 0 || self.done.len() <= max {
            return 0;
        }
        let excess = self.done.len() - max;
        self.done.drain(..excess);
        excess
    }

    /// Empties both stacks.
    pub fn clear(&mut self) {
        self.done.clear();
        self.undone.clear();
    }

    /// Number of undoable steps.
    pub fn done_len(&self) -> usize {
        self.done.len()
    }

    /// Number of redoable steps.
    pub fn undone_len(&self) -> usize {
        self.undone.len()
    }

    /// Record the next undo would reverse.
    pub fn peek_done(&self) -> Option<&OperationRecord> {
        self.done.last().map(|e| e.record.as_ref())
    }

    /// Record the next redo would replay.
    pub fn peek_undone(&self) -> Option<&OperationRecord> {
        self.undone.last().map(|e| e.record.as_ref())
    }

    /// Undoable records, oldest first.
    pub fn done_records(&self) -> impl Iterator<Item = &Arc<OperationRecord>> {
        self.done.iter().map(|e| &e.record)
    }

    /// Redoable records, most recently undone last.
    pub fn undone_records(&self) -> impl Iterator<Item = &Arc<OperationRecord>> {
        self.undone.iter().map(|e| &e.record)
    }
}
