//! Error types surfaced by sessions and the runtime.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::{
    persist::PersistError, script::ScriptError, signature::BindError, types::StackSide,
};

/// Failure raised by an operation body, a compensator, or a field setter.
///
/// The wrapped error is carried through unchanged; callers can downcast it.
pub struct OperationError(Box<dyn StdError + Send + Sync>);

impl OperationError {
    /// Wraps any error (or message) produced by an operation.
    pub fn new(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self(err.into())
    }

    /// Borrow of the wrapped error.
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.0.as_ref()
    }

    /// Attempts to view the wrapped error as `E`.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Unwraps the original error.
    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.0
    }
}

impl fmt::Debug for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OperationError").field(&self.0).finish()
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl StdError for OperationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.0.source()
    }
}

impl From<BindError> for OperationError {
    fn from(value: BindError) -> Self {
        Self::new(value)
    }
}

impl From<MacroError> for OperationError {
    fn from(value: MacroError) -> Self {
        Self::new(value)
    }
}

/// Errors returned by [`crate::core::session::Session`] and the runtime handle.
#[derive(Debug, Error)]
pub enum MacroError {
    /// Call arguments did not fit the declared signature.
    #[error("argument binding failed: {0}")]
    ArgumentBinding(#[from] BindError),
    /// No operation or field is registered under this path.
    #[error("no tracked operation or field named `{0}`")]
    UnknownOperation(String),
    /// The operation's own failure, propagated unchanged.
    #[error(transparent)]
    Operation(#[from] OperationError),
    /// Undo or redo requested with an empty stack.
    #[error("{0}")]
    EmptyStack(StackSide),
    /// Nested invocations exceeded the configured depth.
    #[error("nested invocation depth {0} exceeded")]
    NestingTooDeep(usize),
    /// Undo or redo requested from inside an undo/redo step or operation body.
    #[error("undo/redo cannot run inside another operation")]
    ReentrantStep,
    /// Script text could not be parsed or replayed.
    #[error(transparent)]
    Script(#[from] ScriptError),
    /// A background invocation was cancelled before its commit.
    #[error("background invocation cancelled")]
    Cancelled,
    /// The runtime task has stopped.
    #[error("session runtime channel closed")]
    ChannelClosed,
    /// Journal persistence failed.
    #[error("persistence failed: {0}")]
    Persist(#[from] PersistError),
}

impl MacroError {
    /// True when this is the operation's own failure.
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }
}
