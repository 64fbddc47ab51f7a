use crate::common::{frame, remote_error, Call, Harness, SOURCE, SOURCE_URI};
use adt_debugger::client::{StepKind, StepResult};
use adt_debugger::engine::{frame_id, StepOutcome, UNKNOWN_SOURCE};
use adt_debugger::error::Error;
use adt_debugger::frontend::{DebugEvent, StopReason};

#[test]
fn test_stack_translation_failure_keeps_frame() {
    let h = Harness::new(4);
    h.server.state().stacks.insert(
        "D1".to_string(),
        vec![
            frame("ZFOO", 12, SOURCE_URI),
            frame("CL_BROKEN", 40, "/sap/bc/adt/oo/classes/broken/source/main"),
            frame("ZMAIN", 3, SOURCE_URI),
        ],
    );
    let listener = h.started();
    h.server.hit("D1");
    h.wait_stopped(1);

    let stack = listener.stack_trace(1).unwrap();
    assert_eq!(stack.len(), 3);
    assert_eq!(
        stack.iter().map(|f| f.id).collect::<Vec<_>>(),
        vec![frame_id(1, 0), frame_id(1, 1), frame_id(1, 2)]
    );
    assert_eq!(stack[0].source_path, SOURCE);
    assert_eq!(stack[0].line, 12);
    assert_eq!(stack[1].source_path, UNKNOWN_SOURCE);
    assert_eq!(stack[1].line, 0);
    assert_eq!(stack[2].source_path, SOURCE);

    listener.logout();
}

#[test]
fn test_frame_ids_never_collide_across_threads() {
    let h = Harness::new(4);
    let listener = h.started();
    h.server.hit("D1");
    h.wait_stopped(1);
    h.server.hit("D2");
    h.wait_stopped(2);

    let first = listener.stack_trace(1).unwrap();
    let second = listener.stack_trace(2).unwrap();
    assert!(!first.is_empty());
    assert!(first
        .iter()
        .all(|f1| second.iter().all(|f2| f1.id != f2.id)));

    listener.logout();
}

#[test]
fn test_attach_sequence() {
    let h = Harness::new(4);
    let listener = h.started();
    h.server.hit("D1");
    h.wait_stopped(1);

    let calls: Vec<Call> = h
        .server
        .calls()
        .into_iter()
        .filter(|r| r.stateful)
        .map(|r| r.call)
        .collect();
    assert_eq!(
        calls,
        vec![
            Call::Attach {
                debuggee: "D1".to_string()
            },
            Call::SaveSettings,
            Call::StackTrace,
        ]
    );

    let events = h.seen();
    let started = events
        .iter()
        .position(|e| *e == DebugEvent::ThreadStarted { thread_id: 1 })
        .unwrap();
    let stopped = events
        .iter()
        .position(|e| {
            *e == DebugEvent::Stopped {
                reason: StopReason::Breakpoint,
                thread_id: 1,
            }
        })
        .unwrap();
    assert!(started < stopped);

    listener.logout();
}

#[test]
fn test_step_refreshes_stack_and_reports_step() {
    let h = Harness::new(4);
    let listener = h.started();
    h.server.hit("D1");
    h.wait_stopped(1);

    h.server
        .state()
        .stacks
        .insert("D1".to_string(), vec![frame("ZFOO", 11, SOURCE_URI)]);
    assert_eq!(
        listener.step(1, StepKind::StepOver, None).unwrap(),
        StepOutcome::Stopped
    );
    h.wait_event(|e| {
        *e == DebugEvent::Stopped {
            reason: StopReason::Step,
            thread_id: 1,
        }
    });

    let stack = listener.stack_trace(1).unwrap();
    assert_eq!(stack.len(), 1);
    assert_eq!(stack[0].line, 11);

    listener.logout();
}

#[test]
fn test_continue_reports_continued_then_breakpoint() {
    let h = Harness::new(4);
    let listener = h.started();
    h.server.hit("D1");
    h.wait_stopped(1);

    assert_eq!(
        listener.step(1, StepKind::StepContinue, None).unwrap(),
        StepOutcome::Stopped
    );
    h.wait_event(|e| *e == DebugEvent::Continued { thread_id: 1 });
    h.wait_event(|e| {
        *e == DebugEvent::Stopped {
            reason: StopReason::Breakpoint,
            thread_id: 1,
        }
    });

    listener.logout();
}

#[test]
fn test_step_failure_keeps_session() {
    let h = Harness::new(4);
    let listener = h.started();
    h.server.hit("D1");
    h.wait_stopped(1);

    h.server
        .script_steps("D1", vec![Err(remote_error("step not possible"))]);
    assert_eq!(
        listener.step(1, StepKind::StepInto, None).unwrap(),
        StepOutcome::Failed("step not possible".to_string())
    );
    assert!(!listener.session(1).unwrap().is_killed());
    assert_eq!(listener.thread_count(), 1);

    assert_eq!(
        listener.step(1, StepKind::StepInto, None).unwrap(),
        StepOutcome::Stopped
    );

    listener.logout();
}

#[test]
fn test_position_steps() {
    let h = Harness::new(4);
    let listener = h.started();
    h.server.hit("D1");
    h.wait_stopped(1);

    assert!(matches!(
        listener.step(1, StepKind::StepRunToLine, None),
        Err(Error::MissingStepTarget(StepKind::StepRunToLine))
    ));
    assert_eq!(
        h.server
            .count(|c| matches!(c, Call::Step(StepKind::StepRunToLine, _))),
        0
    );

    let target = format!("{SOURCE_URI}#start=20");
    h.server.script_steps(
        "D1",
        vec![
            Ok(StepResult::default()),
            Err(remote_error("line is not executable")),
        ],
    );
    assert_eq!(
        listener
            .step(1, StepKind::StepRunToLine, Some(&target))
            .unwrap(),
        StepOutcome::Stopped
    );
    assert_eq!(
        h.server.count(|c| *c == Call::Step(StepKind::StepRunToLine, Some(target.clone()))),
        1
    );

    let err = listener
        .step(1, StepKind::StepJumpToLine, Some(&target))
        .unwrap_err();
    assert!(matches!(err, Error::Client(e) if e.message == "line is not executable"));
    assert_eq!(listener.thread_count(), 1);

    listener.logout();
}

#[test]
fn test_killed_session_fails_fast() {
    let h = Harness::new(4);
    let listener = h.started();
    h.server.hit("D1");
    h.wait_stopped(1);

    let session = listener.session(1).unwrap();
    session.logout();
    session.logout();
    assert!(session.is_killed());
    assert!(matches!(session.attach(), Err(Error::SessionKilled(1))));
    assert!(matches!(
        session.debugger_step(StepKind::StepOver, None),
        Err(Error::SessionKilled(1))
    ));

    let calls = h.server.calls();
    let logouts = calls
        .iter()
        .filter(|r| r.stateful && r.call == Call::Logout)
        .count();
    let stateless = calls
        .iter()
        .filter(|r| r.stateful && r.call == Call::StatelessLogout)
        .count();
    assert_eq!((logouts, stateless), (1, 1));

    listener.logout();
}

#[test]
fn test_thread_names() {
    let h = Harness::new(4);
    let listener = h.started();
    h.server.hit("D1");
    h.wait_stopped(1);

    assert_eq!(listener.threads(), vec![(1, "1 ZFOO".to_string())]);

    listener.logout();
}
