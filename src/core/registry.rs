use std::sync::Arc;

use hashbrown::HashMap;

use crate::{
    core::session::Session,
    error::OperationError,
    signature::Signature,
    undo::Compensation,
    value::{Arguments, Value, ValueKind},
};

/// Body of a tracked operation. Returns how to reverse what it did.
pub type OperationFn<T> =
    dyn Fn(&mut Session<T>, &Arguments) -> Result<Compensation<T>, OperationError> + Send + Sync;
/// Reads a field for setter compensation and [`Session::get`].
pub type FieldGetter<T> = dyn Fn(&T) -> Value + Send + Sync;
/// Writes a field; the value has already been checked against its kind.
pub type FieldSetter<T> = dyn Fn(&mut T, Value) -> Result<(), OperationError> + Send + Sync;
/// Second half of a background operation; runs on the coordinating thread.
pub type Finish<T> =
    Box<dyn FnOnce(&mut Session<T>) -> Result<Compensation<T>, OperationError> + Send>;
/// Body of a background operation; runs off the coordinating thread.
pub type BackgroundWork<T> =
    dyn Fn(&Arguments) -> Result<Finish<T>, OperationError> + Send + Sync;

/// A registered operation.
pub struct OperationSpec<T> {
    signature: Signature,
    body: Arc<OperationFn<T>>,
    auto_call: bool,
}

impl<T> OperationSpec<T> {
    /// Declared parameters.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// The operation body, called by the session with bound arguments.
    pub fn body(&self) -> &OperationFn<T> {
        self.body.as_ref()
    }

    /// Whether consecutive invocations coalesce into one undo step.
    pub fn auto_call(&self) -> bool {
        self.auto_call
    }
}

/// A registered field with its getter and setter.
pub struct FieldSpec<T> {
    kind: ValueKind,
    get: Box<FieldGetter<T>>,
    set: Box<FieldSetter<T>>,
}

impl<T> FieldSpec<T> {
    /// Kind every assigned value must have.
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Current value of the field.
    pub fn get(&self, target: &T) -> Value {
        (self.get)(target)
    }

    /// Writes the field without recording anything.
    pub fn set(&self, target: &mut T, value: Value) -> Result<(), OperationError> {
        (self.set)(target, value)
    }
}

/// A registered background operation.
pub struct BackgroundSpec<T> {
    signature: Signature,
    work: Arc<BackgroundWork<T>>,
}

impl<T> BackgroundSpec<T> {
    /// Signature the runtime binds against before starting the body.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Shared handle to the body, so it can move onto a blocking thread.
    pub fn work(&self) -> Arc<BackgroundWork<T>> {
        Arc::clone(&self.work)
    }
}

/// Explicit registration list of everything a session can track.
///
/// Child objects are registered under a dotted prefix via [`Registry::scope`],
/// so `parameters.a` addresses field `a` of child `parameters`.
pub struct Registry<T> {
    type_name: String,
    operations: HashMap<String, OperationSpec<T>>,
    fields: HashMap<String, FieldSpec<T>>,
    background: HashMap<String, BackgroundSpec<T>>,
}

impl<T> Registry<T> {
    /// `type_name` is rendered in the construction line, `ui = TypeName()`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            operations: HashMap::new(),
            fields: HashMap::new(),
            background: HashMap::new(),
        }
    }

    /// Name rendered in the construction line.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Registers an operation at `path`. A later registration under the same path wins.
    pub fn operation<F>(&mut self, path: impl Into<String>, signature: Signature, body: F) -> &mut Self
    where
        F: Fn(&mut Session<T>, &Arguments) -> Result<Compensation<T>, OperationError>
            + Send
            + Sync
            + 'static,
    {
        self.insert_operation(path.into(), signature, Arc::new(body), false);
        self
    }

    /// Registers an operation whose consecutive invocations coalesce into
    /// one undo step, as when a form re-runs it on every edit.
    pub fn auto_call_operation<F>(
        &mut self,
        path: impl Into<String>,
        signature: Signature,
        body: F,
    ) -> &mut Self
    where
        F: Fn(&mut Session<T>, &Arguments) -> Result<Compensation<T>, OperationError>
            + Send
            + Sync
            + 'static,
    {
        self.insert_operation(path.into(), signature, Arc::new(body), true);
        self
    }

    /// Registers a field. Assignments through [`Session::set`] are undone by restoring the previous value.
    pub fn field<G, S>(&mut self, path: impl Into<String>, kind: ValueKind, get: G, set: S) -> &mut Self
    where
        G: Fn(&T) -> Value + Send + Sync + 'static,
        S: Fn(&mut T, Value) -> Result<(), OperationError> + Send + Sync + 'static,
    {
        let path = path.into();
        tracing::trace!(%path, %kind, "registering field");
        let spec = FieldSpec {
            kind,
            get: Box::new(get),
            set: Box::new(set),
        };
        if self.fields.insert(path.clone(), spec).is_some() {
            tracing::warn!(%path, "field registered twice; keeping the latest");
        }
        self
    }

    /// Registers an operation whose body runs off the coordinating thread.
    ///
    /// Only the runtime can start one; a redo replays it inline.
    pub fn background<W>(&mut self, path: impl Into<String>, signature: Signature, work: W) -> &mut Self
    where
        W: Fn(&Arguments) -> Result<Finish<T>, OperationError> + Send + Sync + 'static,
    {
        let path = path.into();
        let spec = BackgroundSpec {
            signature,
            work: Arc::new(work),
        };
        if self.background.insert(path.clone(), spec).is_some() {
            tracing::warn!(%path, "background operation registered twice; keeping the latest");
        }
        self
    }

    /// Registrar for a child object mounted at `prefix`.
    pub fn scope(&mut self, prefix: impl Into<String>) -> Scope<'_, T> {
        Scope {
            registry: self,
            prefix: prefix.into(),
        }
    }

    /// Operation registered at `path`.
    pub fn operation_spec(&self, path: &str) -> Option<&OperationSpec<T>> {
        self.operations.get(path)
    }

    /// Field registered at `path`.
    pub fn field_spec(&self, path: &str) -> Option<&FieldSpec<T>> {
        self.fields.get(path)
    }

    /// Background operation registered at `path`.
    pub fn background_spec(&self, path: &str) -> Option<&BackgroundSpec<T>> {
        self.background.get(path)
    }

    /// Registered paths of every kind, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self
            .operations
            .keys()
            .chain(self.fields.keys())
            .chain(self.background.keys())
            .map(String::as_str)
            .collect();
        out.sort_unstable();
        out
    }

    fn insert_operation(
        &mut self,
        path: String,
        signature: Signature,
        body: Arc<OperationFn<T>>,
        auto_call: bool,
    ) {
        tracing::trace!(%path, auto_call, "registering operation");
        let spec = OperationSpec {
            signature,
            body,
            auto_call,
        };
        if self.operations.insert(path.clone(), spec).is_some() {
            tracing::warn!(%path, "operation registered twice; keeping the latest");
        }
    }
}

/// Registers members of a child object under a dotted prefix.
pub struct Scope<'a, T> {
    registry: &'a mut Registry<T>,
    prefix: String,
}

impl<T> Scope<'_, T> {
    fn qualify(&self, name: impl Into<String>) -> String {
        format!("{}.{}", self.prefix, name.into())
    }

    /// Registers `name` under this scope's prefix.
    pub fn operation<F>(&mut self, name: impl Into<String>, signature: Signature, body: F) -> &mut Self
    where
        F: Fn(&mut Session<T>, &Arguments) -> Result<Compensation<T>, OperationError>
            + Send
            + Sync
            + 'static,
    {
        let path = self.qualify(name);
        self.registry.operation(path, signature, body);
        self
    }

    /// Registers field `name` under this scope's prefix.
    pub fn field<G, S>(&mut self, name: impl Into<String>, kind: ValueKind, get: G, set: S) -> &mut Self
    where
        G: Fn(&T) -> Value + Send + Sync + 'static,
        S: Fn(&mut T, Value) -> Result<(), OperationError> + Send + Sync + 'static,
    {
        let path = self.qualify(name);
        self.registry.field(path, kind, get, set);
        self
    }

    /// Nested child scope.
    pub fn scope(&mut self, name: impl Into<String>) -> Scope<'_, T> {
        let prefix = self.qualify(name);
        Scope {
            registry: &mut *self.registry,
            prefix,
        }
    }
}
