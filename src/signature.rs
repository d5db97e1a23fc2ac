//! Declared operation signatures and argument binding.

use thiserror::Error;

use crate::value::{Arguments, Value, ValueKind};

/// Argument list that does not satisfy a declared signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    /// More positional arguments than declared parameters.
    #[error("expected at most {expected} positional arguments, got {got}")]
    TooManyPositional {
        /// Declared parameter count.
        expected: usize,
        /// Supplied positional count.
        got: usize,
    },
    /// Keyword that names no parameter.
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),
    /// Parameter supplied twice.
    #[error("parameter `{0}` given more than once")]
    DuplicateArgument(String),
    /// Required parameter left unbound.
    #[error("missing argument `{0}`")]
    MissingArgument(String),
    /// Value of the wrong kind.
    #[error("parameter `{param}` expects {expected}, got {found}")]
    TypeMismatch {
        /// Parameter name.
        param: String,
        /// Declared kind.
        expected: ValueKind,
        /// Kind of the supplied value.
        found: ValueKind,
    },
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: String,
    kind: ValueKind,
    default: Option<Value>,
}

impl Param {
    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared kind.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Default used when the caller omits the parameter.
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

/// Ordered parameter list of a tracked operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    /// Signature with no parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a required parameter.
    pub fn param(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.params.push(Param {
            name: name.into(),
            kind,
            default: None,
        });
        self
    }

    /// Appends a parameter that falls back to `default`.
    pub fn param_or(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        default: impl Into<Value>,
    ) -> Self {
        self.params.push(Param {
            name: name.into(),
            kind,
            default: Some(default.into()),
        });
        self
    }

    /// Declared parameters in order.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Binds positional then keyword arguments, filling defaults.
    pub fn bind(&self, call: CallArgs) -> Result<Arguments, BindError> {
        let CallArgs {
            positional,
            keyword,
        } = call;

        if positional.len() > self.params.len() {
            return Err(BindError::TooManyPositional {
                expected: self.params.len(),
                got: positional.len(),
            });
        }

        let mut slots: Vec<Option<Value>> = vec![None; self.params.len()];
        for (slot, value) in slots.iter_mut().zip(positional) {
            *slot = Some(value);
        }

        for (name, value) in keyword {
            let idx = self
                .params
                .iter()
                .position(|p| p.name == name)
                .ok_or_else(|| BindError::UnknownParameter(name.clone()))?;
            if slots[idx].is_some() {
                return Err(BindError::DuplicateArgument(name));
            }
            slots[idx] = Some(value);
        }

        let mut entries = Vec::with_capacity(self.params.len());
        for (param, slot) in self.params.iter().zip(slots) {
            let value = slot
                .or_else(|| param.default.clone())
                .ok_or_else(|| BindError::MissingArgument(param.name.clone()))?;
            if !param.kind.accepts(&value) {
                return Err(BindError::TypeMismatch {
                    param: param.name.clone(),
                    expected: param.kind,
                    found: value.kind(),
                });
            }
            entries.push((param.name.clone(), value));
        }

        Ok(Arguments::from_entries(entries))
    }
}

/// Unbound call-site arguments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CallArgs {
    positional: Vec<Value>,
    keyword: Vec<(String, Value)>,
}

impl CallArgs {
    /// No arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Appends a keyword argument.
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.push((name.into(), value.into()));
        self
    }
}

impl From<Arguments> for CallArgs {
    fn from(value: Arguments) -> Self {
        Self {
            positional: Vec::new(),
            keyword: value.into_entries(),
        }
    }
}
