use crate::client::{
    ClientFactory, DebugClient, Debuggee, DebuggerIdentity, ListenResult, ListenerConflict,
    StepKind,
};
use crate::config::DebuggerOptions;
use crate::engine::breakpoints::{BreakpointSynchronizer, ConfirmedBreakpoint, SourceBreakpoint};
use crate::engine::creation::CreationGate;
use crate::engine::session::{DebugSession, StackFrame, StepOutcome};
use crate::engine::variables::{Scope, SetVariableResult, VariableResolver, VariableView};
use crate::engine::{thread_of, ThreadId};
use crate::error::{Error, ErrorKind};
use crate::frontend::{DebugEvent, EventSink, Frontend, StopReason};
use crate::resolver::ObjectResolver;
use crate::weak_error;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Result of the pre-flight registration check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Conflict {
    None,
    /// A stale registration of this ide instance.
    Myself(ListenerConflict),
    /// Registration owned by another session or user.
    Other(ListenerConflict),
}

/// What happened to a reached debuggee.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BreakpointDisposition {
    Accepted(ThreadId),
    /// Listener was at capacity, debuggee was let run.
    Resumed,
}

/// Listener limits.
#[derive(Clone, Debug, PartialEq)]
pub struct ListenerOptions {
    pub max_threads: usize,
    pub listen_error_grace: Duration,
    pub resume_max_steps: u32,
    pub resume_budget: Duration,
}

impl ListenerOptions {
    pub fn new(max_threads: usize, options: &DebuggerOptions) -> Self {
        Self {
            max_threads,
            listen_error_grace: options.listen_error_grace(),
            resume_max_steps: options.resume_max_steps,
            resume_budget: options.resume_budget(),
        }
    }
}

/// Collaborators shared by every listener.
#[derive(Clone)]
pub struct ListenerDeps {
    pub factory: Arc<ClientFactory>,
    pub resolver: Arc<dyn ObjectResolver>,
    pub frontend: Arc<dyn Frontend>,
    pub events: EventSink,
}

#[derive(Default)]
struct ThreadTable {
    services: BTreeMap<ThreadId, Arc<DebugSession>>,
    current: Option<ThreadId>,
}

impl ThreadTable {
    /// Lowest free id starting from 1.
    fn next_thread_id(&self) -> ThreadId {
        let mut id = 1;
        while self.services.contains_key(&id) {
            id += 1;
        }
        id
    }
}

/// Owns the long-poll relationship with one remote connection and turns reached
/// debuggees into [`DebugSession`]s.
pub struct DebugListener {
    connection_id: String,
    session_number: u64,
    identity: DebuggerIdentity,
    options: ListenerOptions,
    client: Arc<dyn DebugClient>,
    deps: ListenerDeps,
    active: AtomicBool,
    listening: AtomicBool,
    registered: AtomicBool,
    threads: Mutex<ThreadTable>,
    creation: CreationGate,
    breakpoints: BreakpointSynchronizer,
    variables: VariableResolver,
    main_loop: Mutex<Option<JoinHandle<()>>>,
}

impl DebugListener {
    pub fn new(
        connection_id: &str,
        session_number: u64,
        identity: DebuggerIdentity,
        options: ListenerOptions,
        deps: ListenerDeps,
    ) -> Result<Arc<DebugListener>, Error> {
        let client = deps.factory.listener_client(connection_id)?;
        Ok(Arc::new(DebugListener {
            connection_id: connection_id.to_string(),
            session_number,
            breakpoints: BreakpointSynchronizer::new(connection_id, deps.resolver.clone()),
            identity,
            options,
            client,
            deps,
            active: AtomicBool::new(false),
            listening: AtomicBool::new(false),
            registered: AtomicBool::new(false),
            threads: Mutex::default(),
            creation: CreationGate::new(),
            variables: VariableResolver::default(),
            main_loop: Mutex::new(None),
        }))
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn session_number(&self) -> u64 {
        self.session_number
    }

    pub fn identity(&self) -> &DebuggerIdentity {
        &self.identity
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn tag(&self) -> String {
        format!("[{}#{}]", self.connection_id, self.session_number)
    }

    /// Check whether registering this listener would collide with an existing registration.
    pub fn has_conflict(&self) -> Result<Conflict, Error> {
        if let Some(conflict) = self.client.listeners(&self.identity)? {
            return Ok(Conflict::Myself(conflict));
        }
        if let Some(conflict) = self.client.listeners(&self.identity.any_ide())? {
            return Ok(Conflict::Other(conflict));
        }
        Ok(Conflict::None)
    }

    /// Remove the server-side listener registration. With `norestart` the main loop
    /// won't issue another long-poll call.
    pub fn stop_listener(&self, norestart: bool) -> Result<(), Error> {
        if norestart {
            self.active.store(false, Ordering::SeqCst);
        }
        log::debug!(target: "debugger", "{} delete listener", self.tag());
        self.client.delete_listener(&self.identity)?;
        Ok(())
    }

    /// Resolve registration conflicts and start the main loop in its own thread.
    /// Returns `false` if the user declined to take over another session's registration.
    pub fn fire_main_loop(self: &Arc<Self>) -> Result<bool, Error> {
        match self.has_conflict()? {
            Conflict::None => {}
            Conflict::Myself(_) => {
                log::info!(target: "debugger", "{} replacing stale registration", self.tag());
                self.stop_listener(false)?;
            }
            Conflict::Other(conflict) => {
                if !self.deps.frontend.confirm_takeover(&conflict.conflict_text) {
                    log::info!(target: "debugger", "{} takeover declined", self.tag());
                    return Ok(false);
                }
                self.stop_listener(false)?;
            }
        }

        self.active.store(true, Ordering::SeqCst);
        self.registered.store(true, Ordering::SeqCst);

        let listener = self.clone();
        let handle = thread::Builder::new()
            .name(format!("adt-listener-{}", self.connection_id))
            .spawn(move || listener.main_loop())?;
        *self.main_loop.lock().unwrap() = Some(handle);
        Ok(true)
    }

    /// Long-poll until the listener is deactivated or a terminal condition occurs.
    pub fn main_loop(&self) {
        log::info!(target: "debugger", "{} listening", self.tag());

        loop {
            self.listening.store(true, Ordering::SeqCst);
            if !self.is_active() {
                self.listening.store(false, Ordering::SeqCst);
                break;
            }

            let started = Instant::now();
            let result = self.client.listen(&self.identity);
            self.listening.store(false, Ordering::SeqCst);

            if !self.is_active() {
                log::debug!(target: "debugger", "{} listener deactivated during listen", self.tag());
                break;
            }

            match result {
                Ok(ListenResult::Empty) => continue,
                Ok(ListenResult::Error(conflict)) => {
                    log::warn!(target: "debugger", "{} listener error: {}", self.tag(), conflict.message);
                    self.stop_debugging();
                    break;
                }
                Ok(ListenResult::Debuggee(debuggee)) => {
                    if let Err(e) = self.on_breakpoint_reached(debuggee) {
                        log::error!(target: "debugger", "{} breakpoint handling: {e:#}", self.tag());
                        self.deps.frontend.notify_error(&e.to_string());
                    }
                }
                Err(e) => match e.kind {
                    ErrorKind::ConflictNotification | ErrorKind::ConflictDetected => {
                        log::warn!(target: "debugger", "{} {e}", self.tag());
                        self.deps.frontend.notify_error(&e.message);
                        self.stop_debugging();
                        break;
                    }
                    ErrorKind::AutoAttachTimeout => continue,
                    _ if started.elapsed() < self.options.listen_error_grace => {
                        log::error!(target: "debugger", "{} listen: {e}", self.tag());
                        if self.deps.frontend.confirm_close(&e.message) {
                            self.stop_debugging();
                            break;
                        }
                    }
                    _ => {
                        log::debug!(target: "debugger", "{} long-poll expired: {e}", self.tag());
                    }
                },
            }
        }

        log::info!(target: "debugger", "{} main loop finished", self.tag());
    }

    /// End debugging: the loop stops and the presentation layer is told to terminate.
    pub fn stop_debugging(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.deps.events.emit(DebugEvent::Terminated);
    }

    /// Host a reached debuggee in a new session, or let it run if there is no room.
    pub fn on_breakpoint_reached(&self, debuggee: Debuggee) -> Result<BreakpointDisposition, Error> {
        let creation = self.creation.begin();

        let thread_id = {
            let threads = self.threads.lock().unwrap();
            if threads.services.len() >= self.options.max_threads {
                drop(threads);
                drop(creation);
                log::info!(
                    target: "debugger",
                    "{} {} threads suspended, resuming debuggee {}",
                    self.tag(),
                    self.options.max_threads,
                    debuggee.id
                );
                self.resume(&debuggee)?;
                return Ok(BreakpointDisposition::Resumed);
            }
            threads.next_thread_id()
        };

        let client = self.deps.factory.session_client(&self.connection_id)?;
        let session = Arc::new(DebugSession::new(
            &self.connection_id,
            thread_id,
            debuggee.clone(),
            self.identity.clone(),
            client,
            self.deps.resolver.clone(),
            self.deps.events.clone(),
        ));

        if let Err(e) = session.attach() {
            session.logout();
            drop(creation);
            // nobody is attached to the debuggee, let it run
            weak_error!(self.resume(&debuggee), "resume after failed attach:");
            return Err(e);
        }

        {
            let mut threads = self.threads.lock().unwrap();
            threads.services.insert(thread_id, session);
            threads.current = Some(thread_id);
        }
        drop(creation);
        log::info!(target: "debugger", "{} thread {thread_id} attached", self.tag());

        self.deps
            .events
            .emit(DebugEvent::ThreadStarted { thread_id });
        self.deps.events.emit(DebugEvent::Stopped {
            reason: StopReason::Breakpoint,
            thread_id,
        });
        Ok(BreakpointDisposition::Accepted(thread_id))
    }

    /// Let a debuggee run that this listener can't host: attach with a throwaway client
    /// and continue until the execution ends, bounded by step and time budgets.
    fn resume(&self, debuggee: &Debuggee) -> Result<(), Error> {
        let client = self.deps.factory.session_client(&self.connection_id)?;

        let drain = || -> Result<(), Error> {
            client.attach(self.identity.mode, &debuggee.id, &self.identity.user, true)?;
            let started = Instant::now();
            for _ in 0..self.options.resume_max_steps {
                if !self.is_active() || started.elapsed() > self.options.resume_budget {
                    break;
                }
                match client.step(StepKind::StepContinue, None) {
                    Ok(_) => continue,
                    Err(e) if e.is_debuggee_ended() => return Ok(()),
                    Err(e) => return Err(e.into()),
                }
            }
            log::warn!(target: "debugger", "{} debuggee {} released before it ended", self.tag(), debuggee.id);
            Ok(())
        };

        let result = drain();
        weak_error!(client.logout(), "logout of resume client:");
        result
    }

    /// Live sessions, ordered by thread id.
    fn sessions(&self) -> Vec<Arc<DebugSession>> {
        self.threads
            .lock()
            .unwrap()
            .services
            .values()
            .cloned()
            .collect()
    }

    /// Session of a thread. Waits for a pending thread creation first.
    pub fn session(&self, thread_id: ThreadId) -> Result<Arc<DebugSession>, Error> {
        self.creation.wait();
        self.threads
            .lock()
            .unwrap()
            .services
            .get(&thread_id)
            .cloned()
            .ok_or(Error::ThreadNotFound(thread_id))
    }

    /// Thread addressed by default. Waits for a pending thread creation first.
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.creation.wait();
        self.threads.lock().unwrap().current
    }

    pub fn set_current_thread(&self, thread_id: ThreadId) -> Result<(), Error> {
        self.creation.wait();
        let mut threads = self.threads.lock().unwrap();
        if !threads.services.contains_key(&thread_id) {
            return Err(Error::ThreadNotFound(thread_id));
        }
        threads.current = Some(thread_id);
        Ok(())
    }

    /// Suspended threads with display names.
    pub fn threads(&self) -> Vec<(ThreadId, String)> {
        self.creation.wait();
        self.sessions()
            .iter()
            .map(|s| (s.thread_id(), s.name()))
            .collect()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().unwrap().services.len()
    }

    pub fn stack_trace(&self, thread_id: ThreadId) -> Result<Vec<StackFrame>, Error> {
        Ok(self.session(thread_id)?.stack_trace())
    }

    /// Step a thread. A thread whose execution ended is removed.
    pub fn step(
        &self,
        thread_id: ThreadId,
        kind: StepKind,
        target: Option<&str>,
    ) -> Result<StepOutcome, Error> {
        let session = self.session(thread_id)?;
        self.set_current_thread(thread_id)?;
        self.variables.reset_thread(thread_id);

        let outcome = session.debugger_step(kind, target)?;
        if outcome == StepOutcome::Ended {
            self.remove_thread(thread_id);
        }
        Ok(outcome)
    }

    fn remove_thread(&self, thread_id: ThreadId) {
        let removed = {
            let mut threads = self.threads.lock().unwrap();
            let removed = threads.services.remove(&thread_id);
            if threads.current == Some(thread_id) {
                threads.current = threads.services.keys().next().copied();
            }
            removed
        };

        if let Some(session) = removed {
            session.logout();
        }
        self.variables.reset_thread(thread_id);
        log::info!(target: "debugger", "{} thread {thread_id} removed", self.tag());
    }

    /// Synchronize breakpoints of a source with the server and every suspended thread.
    pub fn set_breakpoints(
        &self,
        source_path: &str,
        requested: &[SourceBreakpoint],
    ) -> Result<Vec<ConfirmedBreakpoint>, Error> {
        let sessions = self.sessions();
        self.breakpoints.set_breakpoints(
            self.client.as_ref(),
            &self.identity,
            source_path,
            requested,
            &sessions,
        )
    }

    pub fn breakpoints(&self, source_path: &str) -> Vec<ConfirmedBreakpoint> {
        self.breakpoints.breakpoints(source_path)
    }

    pub fn scopes(&self, frame_id: i64) -> Result<Vec<Scope>, Error> {
        let session = self.session(thread_of(frame_id))?;
        self.variables.scopes(&session, frame_id)
    }

    pub fn variables(&self, reference: i64) -> Result<Vec<VariableView>, Error> {
        let handle = self.variables.handle(reference)?;
        let session = self.session(handle.thread_id)?;
        self.variables.variables(&session, &handle)
    }

    pub fn set_variable(&self, reference: i64, name: &str, value: &str) -> SetVariableResult {
        let session = weak_error!(self.session(thread_of(reference)));
        self.variables
            .set_variable(session.as_deref(), reference, name, value)
    }

    /// Evaluate an expression in a frame, or in the current thread without one.
    pub fn evaluate(&self, expression: &str, frame_id: Option<i64>) -> Result<Option<VariableView>, Error> {
        let thread_id = match frame_id {
            Some(frame_id) => thread_of(frame_id),
            None => self.current_thread().ok_or(Error::NoCurrentThread)?,
        };
        let session = self.session(thread_id)?;
        self.variables.evaluate(&session, frame_id, expression)
    }

    /// Tear the listener down.
    ///
    /// An in-flight long-poll call is waited for, otherwise our own registration is removed.
    /// Every session is logged out afterwards.
    pub fn logout(&self) {
        let registered = self.registered.swap(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);

        if !self.is_listening() && registered {
            if let Some(Conflict::Myself(_)) = weak_error!(self.has_conflict(), "logout conflict check:") {
                weak_error!(self.stop_listener(true), "logout stop listener:");
            }
        }

        let handle = self.main_loop.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!(target: "debugger", "{} main loop panicked", self.tag());
            }
        }

        let sessions = {
            let mut threads = self.threads.lock().unwrap();
            threads.current = None;
            std::mem::take(&mut threads.services)
        };
        for session in sessions.into_values() {
            session.logout();
        }
        self.variables.clear();

        weak_error!(self.client.logout(), "listener logout:");
        log::info!(target: "debugger", "{} logged out", self.tag());
    }
}
