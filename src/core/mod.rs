//! In-memory macro log, undo stacks, registry, and the session that ties them together.

/// Cursor-addressed macro log.
pub mod macro_log;
/// Registration list of tracked operations and fields.
pub mod registry;
/// Interceptor and undo/redo state machine.
pub mod session;
/// Paired done/undone stacks of compensating actions.
pub mod stacks;
