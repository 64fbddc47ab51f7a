use crate::client::{
    BreakpointOutcome, BreakpointScope, BreakpointTarget, DebugClient, DebugSettings, Debuggee,
    DebuggerIdentity, RawStackEntry, RemoteBreakpoint, SetBreakpointsRequest, StackTarget,
    StepKind,
};
use crate::engine::{frame_id, ThreadId};
use crate::error::{ClientError, Error, ErrorKind};
use crate::frontend::{DebugEvent, EventSink, StopReason};
use crate::resolver::ObjectResolver;
use crate::{muted_error, weak_error};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Path reported for frames whose source can't be mapped to a local path.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Stack frame ready for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    /// Unique across all threads of a listener, see [`frame_id`].
    pub id: i64,
    pub name: String,
    pub source_path: String,
    pub line: u32,
    pub column: u32,
    pub target: StackTarget,
}

/// How a step ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Debuggee stopped again, stack is refreshed.
    Stopped,
    /// Remote execution context is gone.
    Ended,
    /// Step failed, session remains usable.
    Failed(String),
}

/// One suspended remote execution context.
pub struct DebugSession {
    connection_id: String,
    thread_id: ThreadId,
    debuggee: Debuggee,
    identity: DebuggerIdentity,
    client: Arc<dyn DebugClient>,
    resolver: Arc<dyn ObjectResolver>,
    events: EventSink,
    killed: AtomicBool,
    stack: Mutex<Vec<StackFrame>>,
    /// Frame the server currently considers selected.
    current_frame: Mutex<Option<i64>>,
    /// Steps are never issued concurrently.
    step_lock: Mutex<()>,
}

impl DebugSession {
    pub(crate) fn new(
        connection_id: &str,
        thread_id: ThreadId,
        debuggee: Debuggee,
        identity: DebuggerIdentity,
        client: Arc<dyn DebugClient>,
        resolver: Arc<dyn ObjectResolver>,
        events: EventSink,
    ) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            thread_id,
            debuggee,
            identity,
            client,
            resolver,
            events,
            killed: AtomicBool::new(false),
            stack: Mutex::default(),
            current_frame: Mutex::default(),
            step_lock: Mutex::default(),
        }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn debuggee(&self) -> &Debuggee {
        &self.debuggee
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Display name of this thread.
    pub fn name(&self) -> String {
        match &self.debuggee.title {
            Some(title) => format!("{} {title}", self.thread_id),
            None if !self.debuggee.program.is_empty() => {
                format!("{} {}", self.thread_id, self.debuggee.program)
            }
            None => format!("Thread {}", self.thread_id),
        }
    }

    /// Client bound to this execution context. Fails once the session is logged out.
    pub(crate) fn client(&self) -> Result<&dyn DebugClient, Error> {
        if self.is_killed() {
            return Err(Error::SessionKilled(self.thread_id));
        }
        Ok(self.client.as_ref())
    }

    /// Attach to the debuggee and load its initial stack.
    pub fn attach(&self) -> Result<(), Error> {
        let client = self.client()?;
        log::debug!(
            target: "debugger",
            "thread {} attaching to debuggee {}",
            self.thread_id,
            self.debuggee.id
        );
        client.attach(
            self.identity.mode,
            &self.debuggee.id,
            &self.identity.user,
            true,
        )?;
        client.save_settings(&DebugSettings::default())?;
        self.update_stack()?;
        Ok(())
    }

    /// Last fetched stack.
    pub fn stack_trace(&self) -> Vec<StackFrame> {
        self.stack.lock().unwrap().clone()
    }

    /// Reload the stack from the server. Frames whose source can't be translated
    /// are kept with an [`UNKNOWN_SOURCE`] path.
    pub fn update_stack(&self) -> Result<Vec<StackFrame>, Error> {
        let raw = self.client()?.stack_trace()?;
        let frames: Vec<StackFrame> = raw
            .iter()
            .enumerate()
            .map(|(idx, entry)| self.translate_frame(idx, entry))
            .collect();

        *self.current_frame.lock().unwrap() = frames.first().map(|f| f.id);
        *self.stack.lock().unwrap() = frames.clone();
        Ok(frames)
    }

    fn translate_frame(&self, idx: usize, entry: &RawStackEntry) -> StackFrame {
        let id = frame_id(self.thread_id, idx);
        let name = format!("{} {}", entry.program, entry.event).trim().to_string();

        match self.resolver.local_path(&self.connection_id, &entry.uri) {
            Ok(path) => StackFrame {
                id,
                name,
                source_path: path,
                line: entry.line,
                column: 0,
                target: entry.target(),
            },
            Err(e) => {
                log::debug!(target: "debugger", "frame {} source {}: {e}", idx, entry.uri);
                StackFrame {
                    id,
                    name,
                    source_path: UNKNOWN_SOURCE.to_string(),
                    line: 0,
                    column: 0,
                    target: entry.target(),
                }
            }
        }
    }

    /// Make `frame_id` the server-side current frame. No remote call if it already is.
    pub(crate) fn select_frame(&self, frame_id: i64) -> Result<(), Error> {
        let mut current = self.current_frame.lock().unwrap();
        if *current == Some(frame_id) {
            return Ok(());
        }

        let target = self
            .stack
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.id == frame_id)
            .map(|f| f.target.clone())
            .ok_or(Error::FrameNotFound(frame_id))?;

        self.client()?.goto_stack(&target)?;
        *current = Some(frame_id);
        Ok(())
    }

    /// Execute a debugger step.
    ///
    /// Run-to-line and jump-to-line need a target and propagate their failures, other
    /// failures are reported as [`StepOutcome::Failed`].
    pub fn debugger_step(&self, kind: StepKind, target: Option<&str>) -> Result<StepOutcome, Error> {
        let _serial = self.step_lock.lock().unwrap();
        let client = self.client()?;

        if kind.requires_target() && target.is_none() {
            return Err(Error::MissingStepTarget(kind));
        }

        if kind == StepKind::StepContinue {
            self.events.emit(DebugEvent::Continued {
                thread_id: self.thread_id,
            });
        }

        match client.step(kind, target) {
            Ok(_) => {
                self.update_stack()?;
                let reason = if kind.runs_freely() {
                    StopReason::Breakpoint
                } else {
                    StopReason::Step
                };
                self.events.emit(DebugEvent::Stopped {
                    reason,
                    thread_id: self.thread_id,
                });
                Ok(StepOutcome::Stopped)
            }
            Err(e) if e.is_debuggee_ended() => {
                log::debug!(target: "debugger", "thread {} debuggee ended", self.thread_id);
                self.events.emit(DebugEvent::ThreadExited {
                    thread_id: self.thread_id,
                });
                Ok(StepOutcome::Ended)
            }
            Err(e) if kind.requires_target() => Err(e.into()),
            Err(e) => {
                log::warn!(target: "debugger", "thread {} {kind}: {e}", self.thread_id);
                Ok(StepOutcome::Failed(e.message))
            }
        }
    }

    /// Replay a breakpoint change of one source into this execution context.
    pub(crate) fn sync_breakpoints(
        &self,
        deleted: &[RemoteBreakpoint],
        breakpoints: &[BreakpointTarget],
        client_id: &str,
    ) -> Result<Vec<BreakpointOutcome>, ClientError> {
        let client = self
            .client()
            .map_err(|e| ClientError::new(ErrorKind::Stateless, e.to_string()))?;

        for bp in deleted {
            muted_error!(
                client.delete_breakpoint(bp, &self.identity, BreakpointScope::Debugger, client_id),
                "delete replayed breakpoint:"
            );
        }

        client.set_breakpoints(&SetBreakpointsRequest {
            identity: &self.identity,
            scope: BreakpointScope::Debugger,
            client_id,
            breakpoints,
        })
    }

    /// Logout the session, no remote calls are possible afterwards.
    pub fn logout(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }

        log::debug!(target: "debugger", "thread {} logout", self.thread_id);
        muted_error!(self.client.stateless_logout(), "stateless logout:");
        weak_error!(self.client.logout(), "logout:");
    }
}
