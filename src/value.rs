//! Argument and field values with a deterministic textual form.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signature::BindError;

/// A value passed to a tracked operation or stored in a tracked field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absence of a value.
    None,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Double precision float.
    Float(f64),
    /// UTF-8 text.
    Str(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// A live handle with no stable text form, identified only by its type.
    Opaque {
        /// Type label shown in placeholders.
        type_name: String,
    },
}

/// Declared kind of a parameter or field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Accepts every value, including opaque ones.
    Any,
    /// Only [`Value::None`].
    None,
    /// Only [`Value::Bool`].
    Bool,
    /// Only [`Value::Int`].
    Int,
    /// Only [`Value::Float`].
    Float,
    /// Only [`Value::Str`].
    Str,
    /// Only [`Value::List`].
    List,
    /// Only [`Value::Opaque`].
    Opaque,
}

impl ValueKind {
    /// Returns true when `value` satisfies this kind.
    pub fn accepts(self, value: &Value) -> bool {
        self == Self::Any || self == value.kind()
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::None => "none",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::List => "list",
            Self::Opaque => "opaque",
        };
        f.write_str(name)
    }
}

/// A value that has no deterministic textual representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value of type `{type_name}` has no deterministic text form")]
pub struct NotRenderable {
    /// Type label of the offending value.
    pub type_name: String,
}

impl NotRenderable {
    /// Placeholder text substituted for the value when rendering degrades.
    pub fn placeholder(&self) -> String {
        format!("<unrenderable:{}>", self.type_name)
    }
}

impl Value {
    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::None => ValueKind::None,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::List(_) => ValueKind::List,
            Self::Opaque { .. } => ValueKind::Opaque,
        }
    }

    /// Builds an opaque handle value.
    pub fn opaque(type_name: impl Into<String>) -> Self {
        Self::Opaque {
            type_name: type_name.into(),
        }
    }

    /// Returns the deterministic text form, failing on opaque values.
    pub fn repr(&self) -> Result<String, NotRenderable> {
        let mut out = String::new();
        self.write_repr(&mut out)?;
        Ok(out)
    }

    /// Returns the text form, substituting a placeholder for anything opaque.
    pub fn repr_lossy(&self) -> String {
        self.repr().unwrap_or_else(|err| err.placeholder())
    }

    fn write_repr(&self, out: &mut String) -> Result<(), NotRenderable> {
        match self {
            Self::None => out.push_str("none"),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            // Debug output keeps a fractional part or exponent so the
            // value parses back as a float.
            Self::Float(x) => {
                let _ = write!(out, "{x:?}");
            }
            Self::Str(s) => {
                let _ = write!(out, "{s:?}");
            }
            Self::List(items) => {
                out.push('[');
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    item.write_repr(out)?;
                }
                out.push(']');
            }
            Self::Opaque { type_name } => {
                return Err(NotRenderable {
                    type_name: type_name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float payload, if any.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// List payload, if any.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl<V: Into<Value>> From<Vec<V>> for Value {
    fn from(value: Vec<V>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

impl<V: Into<Value>> From<Option<V>> for Value {
    fn from(value: Option<V>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

/// Bound arguments of one invocation, in declared parameter order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Arguments {
    entries: Vec<(String, Value)>,
}

impl Arguments {
    /// Empty argument list.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_entries(entries: Vec<(String, Value)>) -> Self {
        Self { entries }
    }

    /// Number of bound arguments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up an argument by parameter name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Iterates `(name, value)` pairs in declared order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Returns the argument or a binding error naming it.
    pub fn require(&self, name: &str) -> Result<&Value, BindError> {
        self.get(name)
            .ok_or_else(|| BindError::MissingArgument(name.to_string()))
    }

    /// Integer argument.
    pub fn int(&self, name: &str) -> Result<i64, BindError> {
        let value = self.require(name)?;
        value.as_int().ok_or_else(|| mismatch(name, ValueKind::Int, value))
    }

    /// Float argument.
    pub fn float(&self, name: &str) -> Result<f64, BindError> {
        let value = self.require(name)?;
        value
            .as_float()
            .ok_or_else(|| mismatch(name, ValueKind::Float, value))
    }

    /// Boolean argument.
    pub fn bool(&self, name: &str) -> Result<bool, BindError> {
        let value = self.require(name)?;
        value
            .as_bool()
            .ok_or_else(|| mismatch(name, ValueKind::Bool, value))
    }

    /// String argument.
    pub fn str(&self, name: &str) -> Result<&str, BindError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| mismatch(name, ValueKind::Str, value))
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}

fn mismatch(name: &str, expected: ValueKind, found: &Value) -> BindError {
    BindError::TypeMismatch {
        param: name.to_string(),
        expected,
        found: found.kind(),
    }
}
