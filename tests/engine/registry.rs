use crate::common::{Call, FakeFrontend, Harness, CONN};
use adt_debugger::client::{DebuggerMode, ListenResult, ListenerConflict};
use adt_debugger::error::Error;
use adt_debugger::frontend::{DebugEvent, Frontend};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Holds the takeover prompt open until the test answers it.
struct GatedFrontend {
    asked: Sender<()>,
    answer: Mutex<Receiver<bool>>,
}

impl Frontend for GatedFrontend {
    fn confirm_takeover(&self, _: &str) -> bool {
        self.asked.send(()).unwrap();
        self.answer.lock().unwrap().recv().unwrap()
    }

    fn confirm_close(&self, _: &str) -> bool {
        false
    }

    fn notify_error(&self, _: &str) {}
}

fn frontend(h: &Harness) -> Arc<dyn Frontend> {
    h.frontend.clone()
}

#[test]
fn test_one_listener_per_connection() {
    let h = Harness::new(4);
    let registry = h.registry();

    let first = registry
        .start(CONN, DebuggerMode::User, frontend(&h), h.sink.clone())
        .unwrap();
    assert_eq!(first.session_number(), 1);
    assert!(matches!(
        registry.start("DEV100", DebuggerMode::User, frontend(&h), h.sink.clone()),
        Err(Error::AlreadyDebugging(_))
    ));
    assert!(Arc::ptr_eq(&registry.get(CONN).unwrap(), &first));

    registry.stop(CONN);
    assert!(!first.is_active());
    assert!(registry.get(CONN).is_none());
    registry.stop(CONN);

    let second = registry
        .start(CONN, DebuggerMode::Terminal, frontend(&h), h.sink.clone())
        .unwrap();
    assert_eq!(second.session_number(), 2);
    assert_eq!(second.identity().mode, DebuggerMode::Terminal);
    assert_eq!(second.identity().ide_id, first.identity().ide_id);
    assert_eq!(second.identity().terminal_id, first.identity().terminal_id);

    registry.stop_all();
    assert!(!second.is_active());
}

#[test]
fn test_unknown_connection() {
    let h = Harness::new(4);
    let registry = h.registry();
    assert!(matches!(
        registry.start("qa200", DebuggerMode::User, frontend(&h), h.sink.clone()),
        Err(Error::UnknownConnection(_))
    ));
}

#[test]
fn test_declined_takeover_is_not_registered() {
    let h = Harness::with_frontend(4, FakeFrontend::answering(false, false));
    h.server.state().registered = Some("OTHERIDE".to_string());
    let registry = h.registry();

    assert!(matches!(
        registry.start(CONN, DebuggerMode::User, frontend(&h), h.sink.clone()),
        Err(Error::TakeoverDeclined(_))
    ));
    assert!(registry.get(CONN).is_none());
    assert_eq!(h.server.count(|c| *c == Call::Listen), 0);
}

#[test]
fn test_ended_listener_is_replaced() {
    let h = Harness::new(4);
    let registry = h.registry();

    let first = registry
        .start(CONN, DebuggerMode::User, frontend(&h), h.sink.clone())
        .unwrap();
    first.stop_debugging();
    h.wait_event(|e| *e == DebugEvent::Terminated);

    let second = registry
        .start(CONN, DebuggerMode::User, frontend(&h), h.sink.clone())
        .unwrap();
    assert!(second.is_active());
    assert!(!Arc::ptr_eq(&first, &second));

    registry.stop_all();
}

#[test]
fn test_displaced_listener_can_restart() {
    let h = Harness::new(4);
    let registry = h.registry();

    let first = registry
        .start(CONN, DebuggerMode::User, frontend(&h), h.sink.clone())
        .unwrap();
    h.server.push_listen(Ok(ListenResult::Error(ListenerConflict {
        message: "listener displaced by another session".to_string(),
        ..Default::default()
    })));
    h.wait_event(|e| *e == DebugEvent::Terminated);
    assert!(!first.is_active());

    let second = registry
        .start(CONN, DebuggerMode::User, frontend(&h), h.sink.clone())
        .unwrap();
    assert!(second.is_active());
    assert!(Arc::ptr_eq(&registry.get(CONN).unwrap(), &second));

    registry.stop_all();
}

#[test]
fn test_pending_takeover_keeps_registry_usable() {
    let h = Harness::new(4);
    h.server.state().registered = Some("OTHERIDE".to_string());
    let registry = h.registry();
    let (asked_tx, asked) = mpsc::channel();
    let (answer, answer_rx) = mpsc::channel();
    let gated: Arc<dyn Frontend> = Arc::new(GatedFrontend {
        asked: asked_tx,
        answer: Mutex::new(answer_rx),
    });

    let starting = {
        let registry = registry.clone();
        let events = h.sink.clone();
        thread::spawn(move || registry.start(CONN, DebuggerMode::User, gated, events))
    };
    asked.recv_timeout(Duration::from_secs(5)).unwrap();

    // the prompt is open, other callers are not blocked
    assert!(registry.get(CONN).is_none());
    registry.stop("qa200");
    assert!(matches!(
        registry.start("qa200", DebuggerMode::User, frontend(&h), h.sink.clone()),
        Err(Error::UnknownConnection(_))
    ));
    assert!(matches!(
        registry.start(CONN, DebuggerMode::User, frontend(&h), h.sink.clone()),
        Err(Error::AlreadyDebugging(_))
    ));

    answer.send(true).unwrap();
    let listener = starting.join().unwrap().unwrap();
    assert!(listener.is_active());
    assert!(Arc::ptr_eq(&registry.get(CONN).unwrap(), &listener));

    registry.stop_all();
}
