//! Shared primitive identifiers and small enums.

use serde::{Deserialize, Serialize};

/// Monotonic journal sequence number.
pub type JournalSeq = u64;
/// Identifier of a background invocation accepted by the runtime.
pub type TicketId = u64;

/// Which side of the undo stack pair an operation addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackSide {
    /// The `done` stack, consumed by undo.
    Done,
    /// The `undone` stack, consumed by redo.
    Undone,
}

impl std::fmt::Display for StackSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Done => f.write_str("nothing to undo"),
            Self::Undone => f.write_str("nothing to redo"),
        }
    }
}
