//! Compensating actions returned by tracked operations.
//!
//! An operation opts into undo by returning something other than
//! [`Compensation::None`]:
//!
//! ```
//! use macrolog::{core::session::Session, error::OperationError, undo::Compensation};
//!
//! fn push(session: &mut Session<Vec<i64>>, x: i64) -> Result<Compensation<Vec<i64>>, OperationError> {
//!     session.state_mut().push(x);
//!     Ok(Compensation::function(|s: &mut Session<Vec<i64>>| {
//!         s.state_mut().pop();
//!         Ok(())
//!     }))
//! }
//! ```

use crate::{core::session::Session, error::OperationError, value::Value};

type CompensatorFn<T> = dyn FnMut(&mut Session<T>) -> Result<(), OperationError> + Send;

/// Closure that reverses an operation using values it captured beforehand.
///
/// The closure may invoke other tracked operations; those run as part of the
/// enclosing undo step and are not logged separately.
pub struct FunctionAction<T> {
    func: Box<CompensatorFn<T>>,
}

impl<T> FunctionAction<T> {
    /// Wraps a reversal closure.
    pub fn new<F>(func: F) -> Self
    where
        F: FnMut(&mut Session<T>) -> Result<(), OperationError> + Send + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }

    pub(crate) fn call(&mut self, session: &mut Session<T>) -> Result<(), OperationError> {
        (self.func)(session)
    }
}

impl<T> std::fmt::Debug for FunctionAction<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FunctionAction(..)")
    }
}

/// Reversal of a field assignment: `(field, new_value, old_value)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SetterAction {
    field: String,
    new_value: Value,
    old_value: Value,
}

impl SetterAction {
    /// Records that `field` went from `old_value` to `new_value`.
    pub fn new(field: impl Into<String>, new_value: Value, old_value: Value) -> Self {
        Self {
            field: field.into(),
            new_value,
            old_value,
        }
    }

    /// Path of the field the setter writes.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Value written by the operation.
    pub fn new_value(&self) -> &Value {
        &self.new_value
    }

    /// Value restored on undo.
    pub fn old_value(&self) -> &Value {
        &self.old_value
    }

    /// Replaces the written value while keeping the value to restore.
    pub fn merge_with(&self, new_value: Value) -> Self {
        Self {
            field: self.field.clone(),
            new_value,
            old_value: self.old_value.clone(),
        }
    }
}

/// Reversal attached to an undoable record.
#[derive(Debug)]
pub enum CompensatingAction<T> {
    /// Arbitrary closure.
    Function(FunctionAction<T>),
    /// Field restore, eligible for coalescing.
    Setter(SetterAction),
}

/// Tagged return value of a tracked operation.
#[derive(Debug)]
pub enum Compensation<T> {
    /// The operation cannot be undone.
    None,
    /// Undo by calling a closure.
    Function(FunctionAction<T>),
    /// Undo by restoring a field value.
    Setter(SetterAction),
}

impl<T> Compensation<T> {
    /// Shorthand for [`Compensation::Function`].
    pub fn function<F>(func: F) -> Self
    where
        F: FnMut(&mut Session<T>) -> Result<(), OperationError> + Send + 'static,
    {
        Self::Function(FunctionAction::new(func))
    }

    /// Shorthand for [`Compensation::Setter`].
    pub fn setter(field: impl Into<String>, new_value: Value, old_value: Value) -> Self {
        Self::Setter(SetterAction::new(field, new_value, old_value))
    }

    /// True for [`Compensation::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Splits off the action, if any.
    pub fn into_action(self) -> Option<CompensatingAction<T>> {
        match self {
            Self::None => None,
            Self::Function(f) => Some(CompensatingAction::Function(f)),
            Self::Setter(s) => Some(CompensatingAction::Setter(s)),
        }
    }
}
