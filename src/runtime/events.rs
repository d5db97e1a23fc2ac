//! Runtime event stream payloads.

use crate::types::{JournalSeq, TicketId};

/// Events emitted from the coordinator loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroEvent {
    /// A new record was appended to the macro log.
    Committed {
        /// Log index of the record.
        index: usize,
        /// Rendered record.
        line: String,
        /// False when the commit cleared the undo history.
        undoable: bool,
    },
    /// The last record was replaced by a coalesced edit.
    Merged {
        /// Log index of the replaced record.
        index: usize,
        /// Rendered replacement.
        line: String,
    },
    /// One undo step was applied.
    Undone {
        /// Cursor after the step.
        cursor: usize,
    },
    /// One redo step was applied.
    Redone {
        /// Log index the replay was written to.
        index: usize,
        /// Rendered replay.
        line: String,
    },
    /// Both undo stacks were emptied.
    Cleared,
    /// Nested invocations ran without becoming log entries.
    Absorbed {
        /// Rendered nested invocations, innermost first.
        lines: Vec<String>,
    },
    /// A background invocation was cancelled before its commit.
    Cancelled {
        /// Cancelled ticket.
        ticket: TicketId,
    },
    /// Persistence has reached at least this journal sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        seq: JournalSeq,
    },
}
