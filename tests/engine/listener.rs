use crate::common::{
    debuggee, ended, remote_error, wait_until, Call, FakeFrontend, Harness, MY_IDE,
};
use adt_debugger::client::{ClientError, ListenResult, ListenerConflict, StepKind, StepResult};
use adt_debugger::config::DebuggerOptions;
use adt_debugger::engine::{BreakpointDisposition, Conflict, StepOutcome};
use adt_debugger::frontend::DebugEvent;
use std::thread;
use std::time::Duration;

fn thread_ids(threads: Vec<(i64, String)>) -> Vec<i64> {
    threads.into_iter().map(|(id, _)| id).collect()
}

#[test]
fn test_thread_ids_are_unique_and_reused() {
    let h = Harness::new(4);
    let listener = h.started();

    h.server.hit("D1");
    h.wait_stopped(1);
    h.server.hit("D2");
    h.wait_stopped(2);
    h.server.hit("D3");
    h.wait_stopped(3);
    assert_eq!(thread_ids(listener.threads()), vec![1, 2, 3]);

    h.server.script_steps("D2", vec![Err(ended())]);
    assert_eq!(
        listener.step(2, StepKind::StepOver, None).unwrap(),
        StepOutcome::Ended
    );
    assert_eq!(thread_ids(listener.threads()), vec![1, 3]);

    h.server.hit("D4");
    h.wait_stopped(2);
    assert_eq!(thread_ids(listener.threads()), vec![1, 2, 3]);
    assert_eq!(listener.session(2).unwrap().debuggee().id, "D4");
    assert_eq!(listener.session(1).unwrap().debuggee().id, "D1");
    assert_eq!(listener.current_thread(), Some(2));

    listener.logout();
}

#[test]
fn test_excess_hit_is_resumed() {
    let h = Harness::new(1);
    let listener = h.started();

    h.server.hit("D1");
    h.wait_stopped(1);

    h.server.script_steps(
        "OVER",
        vec![Ok(StepResult::default()), Err(ended())],
    );
    h.server.hit("OVER");

    let continues_of_over = || {
        let calls = h.server.calls();
        let Some(resume_client) = calls.iter().find_map(|r| match &r.call {
            Call::Attach { debuggee } if debuggee == "OVER" => Some(r.client),
            _ => None,
        }) else {
            return 0;
        };
        calls
            .iter()
            .filter(|r| r.client == resume_client)
            .filter(|r| matches!(r.call, Call::Step(StepKind::StepContinue, None)))
            .count()
    };
    wait_until("resume of the excess debuggee", || continues_of_over() == 2);
    wait_until("resume client logout", || {
        h.server.count(|c| *c == Call::Logout) == 1
    });

    assert_eq!(listener.thread_count(), 1);
    assert!(listener.session(2).is_err());
    assert!(!h
        .seen()
        .iter()
        .any(|e| matches!(e, DebugEvent::ThreadStarted { thread_id: 2 })));

    listener.logout();
}

#[test]
fn test_resume_is_bounded() {
    let h = Harness::new(0);
    let listener = h.listener_with(&DebuggerOptions {
        resume_max_steps: 3,
        ..crate::common::test_options()
    });
    assert!(listener.fire_main_loop().unwrap());

    // debuggee never ends
    let disposition = listener.on_breakpoint_reached(debuggee("ENDLESS")).unwrap();
    assert_eq!(disposition, BreakpointDisposition::Resumed);
    assert_eq!(
        h.server
            .count(|c| matches!(c, Call::Step(StepKind::StepContinue, _))),
        3
    );
    assert_eq!(listener.thread_count(), 0);

    listener.logout();
}

#[test]
fn test_conflict_none() {
    let h = Harness::new(4);
    let listener = h.listener();
    assert_eq!(listener.has_conflict().unwrap(), Conflict::None);

    let calls: Vec<Call> = h.server.calls().into_iter().map(|r| r.call).collect();
    assert_eq!(
        calls,
        vec![
            Call::Listeners {
                ide_id: MY_IDE.to_string()
            },
            Call::Listeners {
                ide_id: String::new()
            },
        ]
    );
}

#[test]
fn test_conflict_with_myself_is_taken_over_silently() {
    let h = Harness::new(4);
    h.server.state().registered = Some(MY_IDE.to_string());

    let listener = h.listener();
    assert!(matches!(listener.has_conflict().unwrap(), Conflict::Myself(_)));
    assert!(listener.fire_main_loop().unwrap());
    assert_eq!(h.server.count(|c| *c == Call::DeleteListener), 1);
    assert!(h.frontend.prompts.lock().unwrap().is_empty());

    wait_until("long-poll call", || h.server.count(|c| *c == Call::Listen) > 0);
    assert!(listener.is_active());

    listener.logout();
}

#[test]
fn test_conflict_with_other_declined() {
    let h = Harness::with_frontend(4, FakeFrontend::answering(false, false));
    h.server.state().registered = Some("OTHERIDE".to_string());

    let listener = h.listener();
    assert!(matches!(listener.has_conflict().unwrap(), Conflict::Other(_)));
    assert!(!listener.fire_main_loop().unwrap());

    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.server.count(|c| *c == Call::Listen), 0);
    assert_eq!(h.server.count(|c| *c == Call::DeleteListener), 0);
    assert!(!listener.is_active());
    assert_eq!(
        *h.frontend.prompts.lock().unwrap(),
        vec!["Debugger is in use by OTHERIDE"]
    );
}

#[test]
fn test_conflict_with_other_accepted() {
    let h = Harness::new(4);
    h.server.state().registered = Some("OTHERIDE".to_string());

    let listener = h.listener();
    assert!(listener.fire_main_loop().unwrap());
    assert_eq!(h.server.count(|c| *c == Call::DeleteListener), 1);
    assert_eq!(h.frontend.prompts.lock().unwrap().len(), 1);

    wait_until("long-poll call", || h.server.count(|c| *c == Call::Listen) > 0);
    listener.logout();
}

#[test]
fn test_conflict_while_listening_stops_debugging() {
    let h = Harness::new(4);
    let listener = h.started();

    h.server.push_listen(Err(ClientError::from_remote(
        Some("conflictNotification"),
        "debugger stopped by another session",
    )));
    h.wait_event(|e| *e == DebugEvent::Terminated);

    assert!(!listener.is_active());
    assert_eq!(
        *h.frontend.errors.lock().unwrap(),
        vec!["debugger stopped by another session"]
    );

    listener.logout();
}

#[test]
fn test_auto_attach_timeout_keeps_listening() {
    let h = Harness::new(4);
    let listener = h.listener_with(&DebuggerOptions {
        listen_error_grace_secs: 60,
        ..crate::common::test_options()
    });
    assert!(listener.fire_main_loop().unwrap());

    h.server
        .push_listen(Err(remote_error("read ETIMEDOUT: Connection timed out")));
    h.server.hit("D1");
    h.wait_stopped(1);

    assert!(listener.is_active());
    assert!(h.frontend.prompts.lock().unwrap().is_empty());

    listener.logout();
}

#[test]
fn test_fast_listen_error_asks_to_close() {
    let h = Harness::with_frontend(4, FakeFrontend::answering(true, true));
    let listener = h.listener_with(&DebuggerOptions {
        listen_error_grace_secs: 60,
        ..crate::common::test_options()
    });
    assert!(listener.fire_main_loop().unwrap());

    h.server.push_listen(Err(remote_error("HTTP 500")));
    h.wait_event(|e| *e == DebugEvent::Terminated);

    assert_eq!(*h.frontend.prompts.lock().unwrap(), vec!["HTTP 500"]);
    assert!(!listener.is_active());

    listener.logout();
}

#[test]
fn test_slow_listen_error_is_a_timeout() {
    let h = Harness::with_frontend(4, FakeFrontend::answering(true, true));
    // zero grace: every generic error counts as an expired long-poll
    let listener = h.started();

    h.server.push_listen(Err(remote_error("HTTP 504")));
    h.server.hit("D1");
    h.wait_stopped(1);

    assert!(h.frontend.prompts.lock().unwrap().is_empty());
    assert!(listener.is_active());

    listener.logout();
}

#[test]
fn test_listener_error_result_ends_loop() {
    let h = Harness::new(4);
    let listener = h.started();

    h.server
        .push_listen(Ok(ListenResult::Error(ListenerConflict {
            message: "listener removed".to_string(),
            ..Default::default()
        })));
    h.wait_event(|e| *e == DebugEvent::Terminated);
    assert!(!listener.is_active());

    let listens = h.server.count(|c| *c == Call::Listen);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(h.server.count(|c| *c == Call::Listen), listens);

    listener.logout();
}

#[test]
fn test_failed_attach_is_not_exposed() {
    let h = Harness::new(4);
    h.server.state().fail_attach = vec!["BAD".to_string()];
    h.server.script_steps("BAD", vec![Err(ended())]);
    let listener = h.started();

    h.server.hit("BAD");
    h.server.hit("D1");
    h.wait_stopped(1);

    assert_eq!(thread_ids(listener.threads()), vec![1]);
    assert_eq!(listener.session(1).unwrap().debuggee().id, "D1");
    assert_eq!(h.frontend.errors.lock().unwrap().len(), 1);

    // the debuggee that couldn't be hosted is attached again and let run
    let calls = h.server.calls();
    let attaches: Vec<usize> = calls
        .iter()
        .filter(|r| matches!(&r.call, Call::Attach { debuggee } if debuggee == "BAD"))
        .map(|r| r.client)
        .collect();
    assert_eq!(attaches.len(), 2);
    let resume_client = attaches[1];
    assert!(calls.iter().any(|r| r.client == resume_client
        && r.call == Call::Step(StepKind::StepContinue, None)));
    assert!(calls
        .iter()
        .any(|r| r.client == resume_client && r.call == Call::Logout));
    assert!(!h
        .seen()
        .iter()
        .any(|e| matches!(e, DebugEvent::ThreadStarted { thread_id } if *thread_id != 1)));

    listener.logout();
}

#[test]
fn test_logout_ends_every_session() {
    let h = Harness::new(4);
    let listener = h.started();

    h.server.hit("D1");
    h.wait_stopped(1);
    h.server.hit("D2");
    h.wait_stopped(2);

    let s1 = listener.session(1).unwrap();
    let s2 = listener.session(2).unwrap();
    listener.logout();

    assert!(s1.is_killed());
    assert!(s2.is_killed());
    assert!(!listener.is_active());
    assert!(!listener.is_listening());
    assert!(listener.threads().is_empty());
    assert_eq!(listener.current_thread(), None);

    let calls = h.server.calls();
    let session_logouts = calls
        .iter()
        .filter(|r| r.stateful && r.call == Call::Logout)
        .count();
    assert_eq!(session_logouts, 2);
    assert_eq!(
        calls
            .iter()
            .filter(|r| !r.stateful && r.call == Call::Logout)
            .count(),
        1
    );

    // nothing is polled after teardown
    let listens = h.server.count(|c| *c == Call::Listen);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(h.server.count(|c| *c == Call::Listen), listens);

    // second logout is harmless
    listener.logout();
    assert_eq!(
        h.server
            .calls()
            .iter()
            .filter(|r| r.stateful && r.call == Call::Logout)
            .count(),
        2
    );
}
