//! Immutable description of one invoked operation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::{Arguments, NotRenderable, Value};

/// Shape of a logged invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Construction of the tracked object; `callable_ref` holds its type name.
    Init,
    /// Method call, rendered `target.path(name=value, ...)`.
    Call,
    /// Field assignment, rendered `target.path = value`.
    Set,
}

/// Argument name under which a [`RecordKind::Set`] record stores its value.
pub const SET_VALUE_ARG: &str = "value";

/// One entry of the macro log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Name the owning object is addressed by in scripts.
    pub target: Arc<str>,
    /// Dotted path of the operation or field within the object hierarchy.
    pub callable_ref: String,
    /// Shape of the invocation.
    pub kind: RecordKind,
    /// Arguments bound at call time.
    pub arguments: Arguments,
}

impl OperationRecord {
    /// Construction marker for `target`.
    pub fn init(target: Arc<str>, type_name: impl Into<String>) -> Self {
        Self {
            target,
            callable_ref: type_name.into(),
            kind: RecordKind::Init,
            arguments: Arguments::new(),
        }
    }

    /// Method invocation.
    pub fn call(target: Arc<str>, callable_ref: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            target,
            callable_ref: callable_ref.into(),
            kind: RecordKind::Call,
            arguments,
        }
    }

    /// Field assignment.
    pub fn set(target: Arc<str>, callable_ref: impl Into<String>, value: Value) -> Self {
        Self {
            target,
            callable_ref: callable_ref.into(),
            kind: RecordKind::Set,
            arguments: Arguments::from_entries(vec![(SET_VALUE_ARG.to_string(), value)]),
        }
    }

    /// Assigned value of a `Set` record.
    pub fn set_value(&self) -> Option<&Value> {
        match self.kind {
            RecordKind::Set => self.arguments.get(SET_VALUE_ARG),
            _ => None,
        }
    }

    /// Renders the record, failing on the first value without a text form.
    pub fn try_render_line(&self) -> Result<String, NotRenderable> {
        self.render_with(Value::repr)
    }

    /// Renders the record, substituting placeholders for opaque values.
    pub fn render_line(&self) -> String {
        self.render_with(|v| Ok(v.repr_lossy()))
            .unwrap_or_else(|e| e.placeholder())
    }

    fn render_with(
        &self,
        repr: impl Fn(&Value) -> Result<String, NotRenderable>,
    ) -> Result<String, NotRenderable> {
        match self.kind {
            RecordKind::Init => Ok(format!("{} = {}()", self.target, self.callable_ref)),
            RecordKind::Set => {
                let value = match self.set_value() {
                    Some(v) => repr(v)?,
                    None => Value::None.repr_lossy(),
                };
                Ok(format!("{}.{} = {}", self.target, self.callable_ref, value))
            }
            RecordKind::Call => {
                let mut args = Vec::with_capacity(self.arguments.len());
                for (name, value) in self.arguments.iter() {
                    args.push(format!("{name}={}", repr(value)?));
                }
                Ok(format!(
                    "{}.{}({})",
                    self.target,
                    self.callable_ref,
                    args.join(", ")
                ))
            }
        }
    }
}

impl std::fmt::Display for OperationRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ui() -> Arc<str> {
        Arc::from("ui")
    }

    #[test]
    fn renders_each_kind() {
        assert_eq!(OperationRecord::init(ui(), "Counter").render_line(), "ui = Counter()");
        assert_eq!(
            OperationRecord::set(ui(), "parameters.a", Value::Float(1.5)).render_line(),
            "ui.parameters.a = 1.5"
        );
        let args = Arguments::from_entries(vec![
            ("x".to_string(), Value::Int(2)),
            ("name".to_string(), Value::Str("k".to_string())),
        ]);
        assert_eq!(
            OperationRecord::call(ui(), "f", args).render_line(),
            r#"ui.f(x=2, name="k")"#
        );
    }

    #[test]
    fn opaque_argument_renders_placeholder_without_aborting() {
        let args = Arguments::from_entries(vec![
            ("x".to_string(), Value::Int(1)),
            ("canvas".to_string(), Value::opaque("Figure")),
        ]);
        let rec = OperationRecord::call(ui(), "draw", args);
        assert!(rec.try_render_line().is_err());
        assert_eq!(rec.render_line(), "ui.draw(x=1, canvas=<unrenderable:Figure>)");
    }
}
