use proptest::prelude::*;

use macrolog::{
    core::{registry::Registry, session::Session},
    error::OperationError,
    signature::{CallArgs, Signature},
    undo::Compensation,
    value::{Value, ValueKind},
};

#[derive(Debug, Default, Clone, PartialEq)]
struct Canvas {
    points: Vec<i64>,
    width: i64,
    height: i64,
    cleared: u32,
}

#[derive(Debug, Clone)]
enum Action {
    Push(i64),
    Pop,
    SetWidth(i64),
    SetHeight(i64),
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (-50i64..50).prop_map(Action::Push),
        Just(Action::Pop),
        (0i64..500).prop_map(Action::SetWidth),
        (0i64..500).prop_map(Action::SetHeight),
    ]
}

fn int_field(
    registry: &mut Registry<Canvas>,
    name: &str,
    get: fn(&Canvas) -> i64,
    set: fn(&mut Canvas, i64),
) {
    registry.field(
        name,
        ValueKind::Int,
        move |c: &Canvas| Value::Int(get(c)),
        move |c: &mut Canvas, v| {
            set(c, v.as_int().ok_or_else(|| OperationError::new("int expected"))?);
            Ok(())
        },
    );
}

fn registry() -> Registry<Canvas> {
    let mut r = Registry::<Canvas>::new("Canvas");
    r.operation("push", Signature::new().param("y", ValueKind::Int), |s, args| {
        let y = args.int("y")?;
        s.state_mut().points.push(y);
        Ok(Compensation::function(|s: &mut Session<Canvas>| {
            s.state_mut().points.pop();
            Ok(())
        }))
    })
    .operation("pop", Signature::new(), |s, _| {
        let Some(y) = s.state_mut().points.pop() else {
            return Err(OperationError::new("no points"));
        };
        Ok(Compensation::function(move |s: &mut Session<Canvas>| {
            s.state_mut().points.push(y);
            Ok(())
        }))
    })
    .operation("wipe", Signature::new(), |s, _| {
        let canvas = s.state_mut();
        canvas.points.clear();
        canvas.cleared += 1;
        Ok(Compensation::None)
    });
    int_field(&mut r, "width", |c| c.width, |c, v| c.width = v);
    int_field(&mut r, "height", |c| c.height, |c, v| c.height = v);
    r
}

fn apply(session: &mut Session<Canvas>, action: &Action) {
    let _ = match action {
        Action::Push(y) => session.call("push", CallArgs::new().arg(*y)),
        Action::Pop => session.call("pop", CallArgs::new()),
        Action::SetWidth(w) => session.set("width", *w),
        Action::SetHeight(h) => session.set("height", *h),
    };
}

proptest! {
    #[test]
    fn undo_all_then_redo_all_round_trips(actions in prop::collection::vec(action_strategy(), 1..60)) {
        let mut session = Session::new("ui", Canvas::default(), registry());
        let initial = session.state().clone();

        for action in &actions {
            apply(&mut session, action);
        }
        let after = session.state().clone();
        let log_len = session.macro_log().len();
        let steps = session.done_len();
        prop_assert_eq!(log_len, steps + 1);

        for _ in 0..steps {
            session.undo().unwrap();
        }
        prop_assert_eq!(session.done_len(), 0);
        prop_assert_eq!(session.state(), &initial);
        prop_assert_eq!(session.macro_log().len(), 1);
        prop_assert!(session.undo().is_err());
        prop_assert_eq!(session.state(), &initial);

        for _ in 0..steps {
            session.redo().unwrap();
        }
        prop_assert_eq!(session.state(), &after);
        prop_assert_eq!(session.macro_log().len(), log_len);
        prop_assert_eq!(session.undone_len(), 0);
    }

    #[test]
    fn non_undoable_commit_empties_stacks(
        actions in prop::collection::vec(action_strategy(), 0..40),
        undos in 0usize..20,
    ) {
        let mut session = Session::new("ui", Canvas::default(), registry());
        for action in &actions {
            apply(&mut session, action);
        }
        for _ in 0..undos {
            let _ = session.undo();
        }
        session.call("wipe", CallArgs::new()).unwrap();
        prop_assert_eq!(session.done_len(), 0);
        prop_assert_eq!(session.undone_len(), 0);
        prop_assert!(session.state().points.is_empty());
    }

    #[test]
    fn consecutive_field_edits_restore_first_old_value(
        start in 0i64..100,
        edits in prop::collection::vec(0i64..100, 2..10),
    ) {
        let mut session = Session::new("ui", Canvas { width: start, ..Canvas::default() }, registry());
        for w in &edits {
            session.set("width", *w).unwrap();
        }
        prop_assert_eq!(session.done_len(), 1);
        let expected_last = format!("ui.width = {}", edits[edits.len() - 1]);
        prop_assert_eq!(session.macro_log().last().unwrap().render_line(), expected_last);

        session.undo().unwrap();
        prop_assert_eq!(session.state().width, start);
    }

    #[test]
    fn rendered_script_replays_to_same_state(actions in prop::collection::vec(action_strategy(), 0..40)) {
        let mut original = Session::new("ui", Canvas::default(), registry());
        for action in &actions {
            apply(&mut original, action);
        }
        let text = original.script().to_string();

        let mut replayed = Session::new("ui", Canvas::default(), registry());
        replayed.replay_script(&text).unwrap();
        prop_assert_eq!(replayed.state(), original.state());
        prop_assert_eq!(replayed.script(), original.script());
    }
}
