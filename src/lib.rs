//! Macro recording with undo/redo for tracked objects.
//!
//! Every operation invoked through a [`core::session::Session`] is recorded
//! as a replayable call expression. Operations that return a
//! [`undo::Compensation`] can be undone and redone; consecutive edits of one
//! field coalesce into a single undo step.
//!
//! # Examples
//!
//! In-memory usage with [`core::session::Session`]:
//! ```
//! use macrolog::{
//!     core::{registry::Registry, session::Session},
//!     signature::{CallArgs, Signature},
//!     undo::Compensation,
//!     value::ValueKind,
//! };
//!
//! let mut registry = Registry::<Vec<i64>>::new("Stack");
//! registry.operation(
//!     "push",
//!     Signature::new().param("x", ValueKind::Int),
//!     |s, args| {
//!         let x = args.int("x")?;
//!         s.state_mut().push(x);
//!         Ok(Compensation::function(|s: &mut Session<Vec<i64>>| {
//!             s.state_mut().pop();
//!             Ok(())
//!         }))
//!     },
//! );
//!
//! let mut session = Session::new("ui", Vec::new(), registry);
//! session.call("push", CallArgs::new().arg(1))?;
//! session.call("push", CallArgs::new().kwarg("x", 2))?;
//! session.undo()?;
//! assert_eq!(session.state(), &vec![1]);
//!
//! let lines: Vec<String> = session.macro_log().render().collect();
//! assert_eq!(lines, ["ui = Stack()", "ui.push(x=1)"]);
//! # Ok::<(), macrolog::error::MacroError>(())
//! ```
//!
//! Runtime usage with a SQLite journal:
//! ```no_run
//! use macrolog::{
//!     core::{registry::Registry, session::Session},
//!     persist::sqlite::SqliteJournal,
//!     runtime::handle::{RuntimeConfig, spawn_session},
//!     value::{Value, ValueKind},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut registry = Registry::<i64>::new("Counter");
//! registry.field(
//!     "value",
//!     ValueKind::Int,
//!     |v: &i64| Value::Int(*v),
//!     |v: &mut i64, new| {
//!         *v = new.as_int().unwrap_or_default();
//!         Ok(())
//!     },
//! );
//! let journal = SqliteJournal::open("macro.db").expect("open sqlite");
//! let handle = spawn_session(
//!     Session::new("ui", 0, registry),
//!     Some(Box::new(journal)),
//!     RuntimeConfig::default(),
//! );
//! handle.set("value", 3).await.expect("set");
//! handle.undo().await.expect("undo");
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![warn(missing_docs)]

/// Macro log, undo stacks, registry, and sessions.
pub mod core;
/// Error types shared across the crate.
pub mod error;
/// Journal operation model and persistence wrapper types.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Operation records and their rendered form.
pub mod record;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Script export and parsing.
pub mod script;
/// Declared operation signatures and argument binding.
pub mod signature;
/// Shared primitive types and enums.
pub mod types;
/// Compensating actions.
pub mod undo;
/// Argument and field values.
pub mod value;
