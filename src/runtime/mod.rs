//! Single-writer async runtime and event stream APIs.

/// Event stream types emitted by the runtime.
pub mod events;
/// Handle and coordinator loop implementation.
pub mod handle;
