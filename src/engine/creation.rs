use std::sync::{Condvar, Mutex};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum CreationState {
    Idle,
    Pending,
}

/// Serializes creation of execution contexts.
///
/// A thread is exposed (as current thread, to stack and scope requests) only when no
/// creation is pending, so callers never observe a half attached session.
pub(crate) struct CreationGate {
    state: Mutex<CreationState>,
    cond: Condvar,
}

/// Pending creation, completes on drop.
pub(crate) struct CreationGuard<'a> {
    gate: &'a CreationGate,
}

impl CreationGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CreationState::Idle),
            cond: Condvar::new(),
        }
    }

    /// Wait for the pending creation (if any) and start a new one.
    pub(crate) fn begin(&self) -> CreationGuard<'_> {
        let mut state = self.state.lock().unwrap();
        while *state == CreationState::Pending {
            state = self.cond.wait(state).unwrap();
        }
        *state = CreationState::Pending;
        CreationGuard { gate: self }
    }

    /// Block until no creation is pending.
    pub(crate) fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        while *state == CreationState::Pending {
            state = self.cond.wait(state).unwrap();
        }
    }

    #[cfg(test)]
    fn is_pending(&self) -> bool {
        *self.state.lock().unwrap() == CreationState::Pending
    }
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        *self.gate.state.lock().unwrap() = CreationState::Idle;
        self.gate.cond.notify_all();
    }
}
