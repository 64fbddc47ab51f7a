//! Boundary to the presentation layer: lifecycle events going out, user decisions coming in.

use crate::engine::ThreadId;
use std::sync::mpsc;
use strum_macros::{Display, IntoStaticStr};

#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, IntoStaticStr)]
pub enum StopReason {
    #[strum(serialize = "breakpoint")]
    Breakpoint,
    #[strum(serialize = "step")]
    Step,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, IntoStaticStr)]
pub enum OutputCategory {
    #[strum(serialize = "console")]
    Console,
    #[strum(serialize = "important")]
    Important,
}

/// Lifecycle event emitted by listeners and sessions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugEvent {
    Initialized,
    Stopped {
        reason: StopReason,
        thread_id: ThreadId,
    },
    Continued {
        thread_id: ThreadId,
    },
    ThreadStarted {
        thread_id: ThreadId,
    },
    ThreadExited {
        thread_id: ThreadId,
    },
    Terminated,
    Output {
        category: OutputCategory,
        output: String,
    },
}

/// Sending side of the event channel, the presentation layer drains the receiver.
#[derive(Clone)]
pub struct EventSink {
    sender: mpsc::Sender<DebugEvent>,
}

impl EventSink {
    pub fn channel() -> (EventSink, mpsc::Receiver<DebugEvent>) {
        let (sender, receiver) = mpsc::channel();
        (EventSink { sender }, receiver)
    }

    /// Emit an event. A closed channel means nobody renders events anymore, the event is dropped.
    pub fn emit(&self, event: DebugEvent) {
        if self.sender.send(event).is_err() {
            log::debug!(target: "debugger", "event channel closed");
        }
    }
}

/// User decisions required by the engine.
pub trait Frontend: Send + Sync {
    /// Another session owns the debugger registration, take it over?
    fn confirm_takeover(&self, conflict_text: &str) -> bool;

    /// Listening failed unexpectedly, close the debug session?
    fn confirm_close(&self, error: &str) -> bool;

    fn notify_error(&self, message: &str);
}
