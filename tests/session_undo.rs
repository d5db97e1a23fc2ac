use std::{fmt, sync::Arc};

use macrolog::{
    core::{
        macro_log::MacroLog,
        registry::Registry,
        session::{Commit, Session, SessionConfig},
    },
    error::{MacroError, OperationError},
    signature::{BindError, CallArgs, Signature},
    types::StackSide,
    undo::Compensation,
    value::{Value, ValueKind},
};

#[derive(Debug, Default, Clone, PartialEq)]
struct Plot {
    values: Vec<i64>,
    calls: Vec<i64>,
    x: i64,
    a: f64,
    seed: i64,
    locked: bool,
    undoable: bool,
}

#[derive(Debug)]
struct Refused(&'static str);

impl fmt::Display for Refused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "refused: {}", self.0)
    }
}

impl std::error::Error for Refused {}

fn registry() -> Registry<Plot> {
    let mut r = Registry::<Plot>::new("Plot");
    r.operation(
        "add_value",
        Signature::new().param("x", ValueKind::Int),
        |s, args| {
            let x = args.int("x")?;
            s.state_mut().values.push(x);
            Ok(Compensation::function(|s: &mut Session<Plot>| {
                s.call("pop_value", CallArgs::new())?;
                Ok(())
            }))
        },
    )
    .operation("pop_value", Signature::new(), |s, _| {
        let x = s
            .state_mut()
            .values
            .pop()
            .ok_or_else(|| OperationError::new(Refused("empty")))?;
        Ok(Compensation::function(move |s: &mut Session<Plot>| {
            s.call("add_value", CallArgs::new().arg(x))?;
            Ok(())
        }))
    })
    .operation("f", Signature::new().param("x", ValueKind::Int), |s, args| {
        let x = args.int("x")?;
        s.state_mut().calls.push(x);
        Ok(Compensation::function(|s: &mut Session<Plot>| {
            s.state_mut().calls.pop();
            Ok(())
        }))
    })
    .operation("reset", Signature::new(), |s, _| {
        s.state_mut().values.clear();
        Ok(Compensation::None)
    })
    .operation("fail", Signature::new(), |_, _| {
        Err(OperationError::new(Refused("always")))
    })
    .operation("add_then_fail", Signature::new(), |s, _| {
        s.call("add_value", CallArgs::new().arg(7))?;
        Err(OperationError::new(Refused("after nested work")))
    })
    .operation("fragile", Signature::new(), |s, _| {
        if s.state().locked {
            return Err(OperationError::new(Refused("locked")));
        }
        s.state_mut().x += 100;
        Ok(Compensation::function(|s: &mut Session<Plot>| {
            if s.state().locked {
                return Err(OperationError::new(Refused("locked")));
            }
            s.state_mut().x -= 100;
            Ok(())
        }))
    })
    .operation("maybe", Signature::new(), |s, _| {
        s.state_mut().values.push(0);
        if !s.state().undoable {
            return Ok(Compensation::None);
        }
        Ok(Compensation::function(|s: &mut Session<Plot>| {
            s.state_mut().values.pop();
            Ok(())
        }))
    })
    .operation(
        "recurse",
        Signature::new().param("n", ValueKind::Int),
        |s, args| {
            let n = args.int("n")?;
            let before = s.state().values.len();
            if n > 0 {
                s.call("recurse", CallArgs::new().arg(n - 1))?;
            }
            s.state_mut().values.push(n);
            Ok(Compensation::function(move |s: &mut Session<Plot>| {
                s.state_mut().values.truncate(before);
                Ok(())
            }))
        },
    )
    .operation("sneaky", Signature::new(), |_, _| {
        Ok(Compensation::function(|s: &mut Session<Plot>| {
            s.undo()?;
            Ok(())
        }))
    })
    .operation(
        "draw",
        Signature::new().param("canvas", ValueKind::Any),
        |_, _| Ok(Compensation::None),
    )
    .auto_call_operation(
        "preview",
        Signature::new().param("seed", ValueKind::Int),
        |s, args| {
            let seed = args.int("seed")?;
            let old = std::mem::replace(&mut s.state_mut().seed, seed);
            Ok(Compensation::function(move |s: &mut Session<Plot>| {
                s.state_mut().seed = old;
                Ok(())
            }))
        },
    )
    .field(
        "x",
        ValueKind::Int,
        |p: &Plot| Value::Int(p.x),
        |p: &mut Plot, v| {
            p.x = v
                .as_int()
                .ok_or_else(|| OperationError::new("x expects an int"))?;
            Ok(())
        },
    );
    r.scope("parameters").field(
        "a",
        ValueKind::Float,
        |p: &Plot| Value::Float(p.a),
        |p: &mut Plot, v| {
            p.a = v
                .as_float()
                .ok_or_else(|| OperationError::new("a expects a float"))?;
            Ok(())
        },
    );
    r
}

fn session() -> Session<Plot> {
    Session::new("ui", Plot::default(), registry())
}

fn add(s: &mut Session<Plot>, x: i64) -> Commit {
    s.call("add_value", CallArgs::new().arg(x)).unwrap()
}

fn lines(s: &Session<Plot>) -> Vec<String> {
    s.macro_log().render().collect()
}

#[test]
fn add_value_scenario_walks_back_and_forth() {
    let mut s = session();
    add(&mut s, 1);
    add(&mut s, 2);
    assert_eq!(s.state().values, vec![1, 2]);

    s.undo().unwrap();
    assert_eq!(s.state().values, vec![1]);
    s.undo().unwrap();
    assert!(s.state().values.is_empty());

    assert!(matches!(
        s.undo(),
        Err(MacroError::EmptyStack(StackSide::Done))
    ));
    assert!(s.state().values.is_empty());

    s.redo().unwrap();
    assert_eq!(s.state().values, vec![1]);
    s.redo().unwrap();
    assert_eq!(s.state().values, vec![1, 2]);
    assert!(matches!(
        s.redo(),
        Err(MacroError::EmptyStack(StackSide::Undone))
    ));
}

#[test]
fn nested_compensator_calls_are_absorbed() {
    let mut s = session();
    add(&mut s, 1);
    add(&mut s, 2);
    assert!(s.take_absorbed().is_empty());

    // Undoing add_value runs pop_value from inside the compensator.
    s.undo().unwrap();
    assert_eq!(s.state().values, vec![1]);
    assert_eq!((s.done_len(), s.undone_len()), (1, 1));
    assert_eq!(lines(&s), vec!["ui = Plot()", "ui.add_value(x=1)"]);

    let absorbed = s.take_absorbed();
    assert_eq!(absorbed.len(), 1);
    assert_eq!(absorbed[0].render_line(), "ui.pop_value()");
}

#[test]
fn redo_appends_a_fresh_record() {
    let mut s = session();
    s.call("f", CallArgs::new().kwarg("x", 1)).unwrap();
    s.call("f", CallArgs::new().kwarg("x", 2)).unwrap();
    assert_eq!(s.macro_log().len(), 3);
    let original = Arc::clone(&s.macro_log().active()[2]);

    s.undo().unwrap();
    assert_eq!(s.macro_log().len(), 2);
    assert_eq!(s.macro_log().total_len(), 3);

    assert_eq!(s.redo().unwrap(), Commit::Replayed { index: 2 });
    assert_eq!(s.macro_log().len(), 3);
    let replayed = &s.macro_log().active()[2];
    assert!(!Arc::ptr_eq(&original, replayed));
    assert_eq!(replayed.as_ref(), original.as_ref());
    assert_eq!(s.macro_log().last().unwrap().render_line(), "ui.f(x=2)");
    assert_eq!(s.state().calls, vec![1, 2]);
}

#[test]
fn fresh_commit_after_undo_truncates_tail() {
    let mut s = session();
    s.call("f", CallArgs::new().arg(1)).unwrap();
    s.call("f", CallArgs::new().arg(2)).unwrap();
    s.undo().unwrap();
    s.call("f", CallArgs::new().arg(3)).unwrap();

    assert_eq!(s.undone_len(), 0);
    assert_eq!(s.macro_log().total_len(), 3);
    assert_eq!(lines(&s), vec!["ui = Plot()", "ui.f(x=1)", "ui.f(x=3)"]);
}

#[test]
fn setter_edits_on_one_field_coalesce() {
    let mut s = session();
    assert!(matches!(
        s.set("x", 20).unwrap(),
        Commit::Appended { undoable: true, .. }
    ));
    assert_eq!(s.set("x", 30).unwrap(), Commit::Merged { index: 1 });

    assert_eq!(s.done_len(), 1);
    assert_eq!(lines(&s), vec!["ui = Plot()", "ui.x = 30"]);

    s.undo().unwrap();
    assert_eq!(s.state().x, 0);
    assert_eq!(s.macro_log().len(), 1);

    s.redo().unwrap();
    assert_eq!(s.state().x, 30);
}

#[test]
fn setter_on_other_field_starts_new_step() {
    let mut s = session();
    s.set("x", 1).unwrap();
    s.set("parameters.a", 2.5).unwrap();
    s.set("x", 2).unwrap();
    assert_eq!(s.done_len(), 3);
    assert_eq!(
        lines(&s),
        vec!["ui = Plot()", "ui.x = 1", "ui.parameters.a = 2.5", "ui.x = 2"]
    );
}

#[test]
fn non_undoable_commit_clears_both_stacks() {
    let mut s = session();
    add(&mut s, 1);
    add(&mut s, 2);
    s.undo().unwrap();
    assert_eq!((s.done_len(), s.undone_len()), (1, 1));

    let commit = s.call("reset", CallArgs::new()).unwrap();
    assert_eq!(
        commit,
        Commit::Appended {
            index: 2,
            undoable: false
        }
    );
    assert_eq!((s.done_len(), s.undone_len()), (0, 0));
    assert!(!s.can_undo() && !s.can_redo());
    assert_eq!(s.macro_log().len(), 3);
}

#[test]
fn auto_call_invocations_coalesce() {
    let mut s = session();
    for seed in 1..=3 {
        s.call("preview", CallArgs::new().arg(seed)).unwrap();
    }
    assert_eq!(s.done_len(), 1);
    assert_eq!(lines(&s), vec!["ui = Plot()", "ui.preview(seed=3)"]);

    s.call("f", CallArgs::new().arg(1)).unwrap();
    s.call("preview", CallArgs::new().arg(4)).unwrap();
    assert_eq!(s.done_len(), 3);

    s.undo().unwrap();
    s.undo().unwrap();
    s.undo().unwrap();
    assert_eq!(s.state().seed, 0);
}

#[test]
fn failed_operation_commits_nothing() {
    let mut s = session();
    add(&mut s, 1);
    let before = s.state().clone();

    let err = s.call("fail", CallArgs::new()).unwrap_err();
    assert!(err.is_operation());
    match &err {
        MacroError::Operation(inner) => {
            assert_eq!(inner.downcast_ref::<Refused>().unwrap().0, "always");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(s.state(), &before);
    assert_eq!(s.macro_log().len(), 2);
    assert_eq!(s.done_len(), 1);
}

#[test]
fn binding_errors_are_reported_before_running() {
    let mut s = session();
    let err = s.call("f", CallArgs::new().arg("one")).unwrap_err();
    assert!(matches!(
        err,
        MacroError::ArgumentBinding(BindError::TypeMismatch { .. })
    ));

    let err = s.call("f", CallArgs::new()).unwrap_err();
    assert!(matches!(
        err,
        MacroError::ArgumentBinding(BindError::MissingArgument(ref name)) if name == "x"
    ));

    let err = s.set("x", "text").unwrap_err();
    assert!(matches!(err, MacroError::ArgumentBinding(_)));

    assert!(matches!(
        s.call("nope", CallArgs::new()),
        Err(MacroError::UnknownOperation(_))
    ));
    assert_eq!(s.macro_log().len(), 1);
    assert!(s.state().calls.is_empty());
}

#[test]
fn failed_undo_keeps_entry_and_cursor() {
    let mut s = session();
    s.call("fragile", CallArgs::new()).unwrap();
    s.state_mut().locked = true;

    let err = s.undo().unwrap_err();
    assert!(err.is_operation());
    assert_eq!(s.state().x, 100);
    assert_eq!((s.done_len(), s.undone_len()), (1, 0));
    assert_eq!(s.macro_log().len(), 2);

    s.state_mut().locked = false;
    s.undo().unwrap();
    assert_eq!(s.state().x, 0);
    assert_eq!(s.macro_log().len(), 1);
}

#[test]
fn failed_redo_restores_undone_entry() {
    let mut s = session();
    s.call("fragile", CallArgs::new()).unwrap();
    s.undo().unwrap();
    s.state_mut().locked = true;

    assert!(s.redo().unwrap_err().is_operation());
    assert_eq!((s.done_len(), s.undone_len()), (0, 1));
    assert_eq!(s.macro_log().len(), 1);

    s.state_mut().locked = false;
    s.redo().unwrap();
    assert_eq!(s.state().x, 100);
}

#[test]
fn redo_without_compensator_clears_history() {
    let mut s = session();
    s.state_mut().undoable = true;
    s.call("maybe", CallArgs::new()).unwrap();
    s.call("f", CallArgs::new().arg(1)).unwrap();
    s.undo().unwrap();
    s.undo().unwrap();

    s.state_mut().undoable = false;
    let commit = s.redo().unwrap();
    assert!(matches!(commit, Commit::Appended { undoable: false, .. }));
    assert_eq!((s.done_len(), s.undone_len()), (0, 0));
    assert_eq!(lines(&s), vec!["ui = Plot()", "ui.maybe()"]);
}

#[test]
fn nested_calls_inside_bodies_are_bounded() {
    let mut s = session();
    s.call("recurse", CallArgs::new().arg(3)).unwrap();
    assert_eq!(s.state().values, vec![0, 1, 2, 3]);
    assert_eq!(lines(&s), vec!["ui = Plot()", "ui.recurse(n=3)"]);
    assert_eq!(s.take_absorbed().len(), 3);

    s.undo().unwrap();
    assert!(s.state().values.is_empty());

    let err = s.call("recurse", CallArgs::new().arg(40)).unwrap_err();
    assert_eq!(err.to_string(), "nested invocation depth 16 exceeded");
    assert!(s.state().values.is_empty());
    assert!(!s.is_nested());
    assert_eq!(s.macro_log().len(), 1);
}

#[test]
fn configured_depth_applies() {
    let config = SessionConfig {
        max_nesting_depth: 2,
        ..SessionConfig::default()
    };
    let mut s = Session::with_config("ui", Plot::default(), registry(), config);
    s.call("recurse", CallArgs::new().arg(1)).unwrap();
    assert!(s.call("recurse", CallArgs::new().arg(2)).is_err());
    assert_eq!(s.state().values, vec![0, 1]);
}

#[test]
fn undo_from_inside_a_compensator_is_rejected() {
    let mut s = session();
    s.call("sneaky", CallArgs::new()).unwrap();
    let err = s.undo().unwrap_err();
    assert_eq!(err.to_string(), "undo/redo cannot run inside another operation");
    assert_eq!(s.done_len(), 1);
}

#[test]
fn clear_keeps_the_log() {
    let mut s = session();
    add(&mut s, 1);
    add(&mut s, 2);
    s.undo().unwrap();
    s.clear();
    assert_eq!((s.done_len(), s.undone_len()), (0, 0));
    assert_eq!(s.macro_log().len(), 2);
    assert_eq!(s.state().values, vec![1]);
}

#[test]
fn history_limit_drops_oldest_steps() {
    let config = SessionConfig {
        max_history: 2,
        ..SessionConfig::default()
    };
    let mut s = Session::with_config("ui", Plot::default(), registry(), config);
    for x in 1..=3 {
        s.call("f", CallArgs::new().arg(x)).unwrap();
    }
    assert_eq!(s.done_len(), 2);
    s.undo().unwrap();
    s.undo().unwrap();
    assert!(s.undo().is_err());
    assert_eq!(s.state().calls, vec![1]);
}

#[test]
fn opaque_arguments_render_as_placeholders() {
    let mut s = session();
    s.call("draw", CallArgs::new().arg(Value::opaque("Figure")))
        .unwrap();
    let last = s.macro_log().last().unwrap();
    assert_eq!(last.render_line(), "ui.draw(canvas=<unrenderable:Figure>)");
    assert_eq!(last.try_render_line().unwrap_err().type_name, "Figure");
    assert!(s.macro_log().try_render()[0].is_ok());
}

#[test]
fn absorbed_calls_cover_only_the_latest_invocation() {
    let mut s = session();
    s.call("recurse", CallArgs::new().arg(2)).unwrap();
    s.call("recurse", CallArgs::new().arg(1)).unwrap();
    let absorbed = s.take_absorbed();
    assert_eq!(absorbed.len(), 1);
    assert_eq!(absorbed[0].render_line(), "ui.recurse(n=0)");
}

#[test]
fn failed_outer_operation_reports_no_absorbed_calls() {
    let mut s = session();
    let err = s.call("add_then_fail", CallArgs::new()).unwrap_err();
    assert!(err.is_operation());
    assert!(s.take_absorbed().is_empty());
    assert_eq!(s.macro_log().len(), 1);
    assert_eq!(s.done_len(), 0);
}

#[test]
fn standalone_session_queues_no_journal_entries() {
    let mut s = session();
    for v in 0..1000 {
        s.set("x", v).unwrap();
    }
    add(&mut s, 1);
    s.undo().unwrap();
    s.redo().unwrap();

    assert!(!s.is_journaling());
    assert_eq!(s.macro_log().len(), 3);
    assert!(s.drain_journal().is_empty());
    assert_eq!(s.latest_seq(), 0);
}

#[test]
fn enabling_journaling_describes_the_current_log() {
    let mut s = session();
    add(&mut s, 1);
    add(&mut s, 2);
    s.undo().unwrap();

    s.set_journaling(true);
    let entries = s.drain_journal();
    assert_eq!(
        entries.iter().map(|e| e.seq).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );
    let mut rebuilt = MacroLog::new();
    for entry in &entries {
        rebuilt.apply_journal(entry.op.clone()).unwrap();
    }
    assert_eq!(rebuilt.export_snapshot(0), s.macro_log().export_snapshot(0));

    add(&mut s, 3);
    let next = s.drain_journal();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].seq, 5);

    s.set_journaling(false);
    add(&mut s, 4);
    assert!(s.drain_journal().is_empty());
}
