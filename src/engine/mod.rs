//! Debug session engine.
//!
//! A [`DebugListener`] per connection long-polls the remote debugger and hosts every
//! reached debuggee as a [`DebugSession`] ("thread"). [`DebugRegistry`] owns the
//! listeners of all connections.

pub mod breakpoints;
pub(crate) mod creation;
pub mod listener;
pub mod session;
pub mod variables;

pub use breakpoints::{ConfirmedBreakpoint, SourceBreakpoint};
pub use listener::{BreakpointDisposition, Conflict, DebugListener, ListenerDeps, ListenerOptions};
pub use session::{DebugSession, StackFrame, StepOutcome, UNKNOWN_SOURCE};
pub use variables::{Scope, SetVariableResult, VariableView};

use crate::client::{ClientFactory, DebuggerIdentity, DebuggerMode};
use crate::config::DebuggerOptions;
use crate::error::Error;
use crate::frontend::{EventSink, Frontend};
use crate::identity::IdentityProvider;
use crate::resolver::ObjectResolver;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Thread number, unique among live sessions of one listener.
pub type ThreadId = i64;

/// Frame ids and variable handles of thread `t` start at `t * THREAD_MULTIPLIER`.
pub const THREAD_MULTIPLIER: i64 = 1_000_000_000_000;

/// Listener-unique id of frame `idx` of a thread.
pub fn frame_id(thread_id: ThreadId, idx: usize) -> i64 {
    thread_id * THREAD_MULTIPLIER + idx as i64
}

/// Thread an id (frame id or variable handle) belongs to.
pub fn thread_of(id: i64) -> ThreadId {
    id / THREAD_MULTIPLIER
}

#[derive(Default)]
struct Slots {
    listeners: HashMap<String, Arc<DebugListener>>,
    /// Connections with a start in progress.
    starting: HashSet<String>,
}

/// Active listeners by connection.
pub struct DebugRegistry {
    factory: Arc<ClientFactory>,
    identity: IdentityProvider,
    resolver: Arc<dyn ObjectResolver>,
    options: DebuggerOptions,
    slots: Mutex<Slots>,
    session_numbers: Mutex<HashMap<String, u64>>,
}

impl DebugRegistry {
    pub fn new(
        factory: Arc<ClientFactory>,
        identity: IdentityProvider,
        resolver: Arc<dyn ObjectResolver>,
        options: DebuggerOptions,
    ) -> Self {
        Self {
            factory,
            identity,
            resolver,
            options,
            slots: Mutex::default(),
            session_numbers: Mutex::default(),
        }
    }

    pub fn options(&self) -> &DebuggerOptions {
        &self.options
    }

    fn next_session_number(&self, key: &str) -> u64 {
        let mut numbers = self.session_numbers.lock().unwrap();
        let number = numbers.entry(key.to_string()).or_default();
        *number += 1;
        *number
    }

    fn identity(&self, connection_id: &str, mode: DebuggerMode) -> Result<DebuggerIdentity, Error> {
        let connection = self.factory.registry().get(connection_id)?;
        Ok(DebuggerIdentity {
            mode,
            terminal_id: self.identity.terminal_id()?,
            ide_id: self.identity.ide_id()?,
            user: connection.username.to_uppercase(),
        })
    }

    /// Start debugging a connection.
    ///
    /// Conflict resolution may wait for the user, the registry stays usable for other
    /// connections meanwhile.
    pub fn start(
        &self,
        connection_id: &str,
        mode: DebuggerMode,
        frontend: Arc<dyn Frontend>,
        events: EventSink,
    ) -> Result<Arc<DebugListener>, Error> {
        let key = connection_id.to_lowercase();
        let stale = {
            let mut slots = self.slots.lock().unwrap();
            if slots.starting.contains(&key)
                || slots.listeners.get(&key).is_some_and(|l| l.is_active())
            {
                return Err(Error::AlreadyDebugging(connection_id.to_string()));
            }
            slots.starting.insert(key.clone());
            // listener ended by itself (conflict, closed after an error)
            slots.listeners.remove(&key)
        };
        if let Some(stale) = stale {
            stale.logout();
        }

        let result = self.launch(connection_id, &key, mode, frontend, events);

        let mut slots = self.slots.lock().unwrap();
        slots.starting.remove(&key);
        if let Ok(listener) = &result {
            slots.listeners.insert(key, listener.clone());
        }
        result
    }

    fn launch(
        &self,
        connection_id: &str,
        key: &str,
        mode: DebuggerMode,
        frontend: Arc<dyn Frontend>,
        events: EventSink,
    ) -> Result<Arc<DebugListener>, Error> {
        let identity = self.identity(connection_id, mode)?;
        let max_threads = self.factory.registry().max_debug_threads(connection_id)?;
        let listener = DebugListener::new(
            connection_id,
            self.next_session_number(key),
            identity,
            ListenerOptions::new(max_threads, &self.options),
            ListenerDeps {
                factory: self.factory.clone(),
                resolver: self.resolver.clone(),
                frontend,
                events,
            },
        )?;

        if !listener.fire_main_loop()? {
            listener.logout();
            return Err(Error::TakeoverDeclined(connection_id.to_string()));
        }
        Ok(listener)
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<DebugListener>> {
        self.slots
            .lock()
            .unwrap()
            .listeners
            .get(&connection_id.to_lowercase())
            .cloned()
    }

    /// Stop debugging a connection, a no-op if it isn't debugged.
    pub fn stop(&self, connection_id: &str) {
        let listener = self
            .slots
            .lock()
            .unwrap()
            .listeners
            .remove(&connection_id.to_lowercase());
        if let Some(listener) = listener {
            listener.logout();
        }
    }

    pub fn stop_all(&self) {
        let listeners: Vec<_> = self.slots.lock().unwrap().listeners.drain().collect();
        for (_, listener) in listeners {
            listener.logout();
        }
    }
}
