use crate::client::{
    BreakpointOutcome, BreakpointScope, BreakpointTarget, DebugClient, DebuggerIdentity,
    RemoteBreakpoint, SetBreakpointsRequest,
};
use crate::engine::session::DebugSession;
use crate::error::Error;
use crate::resolver::ObjectResolver;
use crate::{muted_error, weak_error};
use indexmap::IndexMap;
use itertools::Itertools;
use std::sync::{Arc, Mutex};

/// Client ids of the breakpoint service carry this prefix.
const CLIENT_ID_PREFIX: &str = "24:";

/// Breakpoint requested for a source line.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SourceBreakpoint {
    pub line: u32,
    pub column: Option<u32>,
    pub condition: Option<String>,
}

impl SourceBreakpoint {
    pub fn at_line(line: u32) -> Self {
        Self {
            line,
            ..Default::default()
        }
    }
}

/// Result of a breakpoint request. Unverified when the server didn't accept it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedBreakpoint {
    pub line: u32,
    pub column: Option<u32>,
    pub condition: Option<String>,
    pub remote: Option<RemoteBreakpoint>,
    pub message: Option<String>,
}

impl ConfirmedBreakpoint {
    pub fn verified(&self) -> bool {
        self.remote.is_some()
    }
}

/// Stable per-source client id.
pub fn client_id(connection_id: &str, source_path: &str) -> String {
    format!("{CLIENT_ID_PREFIX}{connection_id}{source_path}")
}

/// Authoritative breakpoint table of one connection.
pub(crate) struct BreakpointSynchronizer {
    connection_id: String,
    resolver: Arc<dyn ObjectResolver>,
    table: Mutex<IndexMap<String, Vec<ConfirmedBreakpoint>>>,
}

impl BreakpointSynchronizer {
    pub(crate) fn new(connection_id: &str, resolver: Arc<dyn ObjectResolver>) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            resolver,
            table: Mutex::default(),
        }
    }

    /// Confirmed breakpoints of a source.
    pub(crate) fn breakpoints(&self, source_path: &str) -> Vec<ConfirmedBreakpoint> {
        self.table
            .lock()
            .unwrap()
            .get(source_path)
            .cloned()
            .unwrap_or_default()
    }

    fn contents_uri(&self, source_path: &str) -> Option<String> {
        let object =
            weak_error!(self.resolver.resolve(&self.connection_id, source_path), "resolve source:")??;
        if !object.has_structure() {
            weak_error!(object.load_structure(), "load object structure:")?;
        }
        object.contents_uri()
    }

    /// Make `requested` the breakpoint list of `source_path`, on the server and in every
    /// active session. Returns one entry per requested breakpoint, in request order.
    pub(crate) fn set_breakpoints(
        &self,
        client: &dyn DebugClient,
        identity: &DebuggerIdentity,
        source_path: &str,
        requested: &[SourceBreakpoint],
        sessions: &[Arc<DebugSession>],
    ) -> Result<Vec<ConfirmedBreakpoint>, Error> {
        let Some(uri) = self.contents_uri(source_path) else {
            log::debug!(target: "debugger", "no remote object for {source_path}");
            return Ok(vec![]);
        };

        // concurrent requests for one connection must not interleave their diffs
        let mut table = self.table.lock().unwrap();
        let previous = table.get(source_path).cloned().unwrap_or_default();
        let client_id = client_id(&self.connection_id, source_path);

        let deleted: Vec<RemoteBreakpoint> = previous
            .iter()
            .filter(|bp| !requested.iter().any(|r| r.line == bp.line))
            .filter_map(|bp| bp.remote.clone())
            .collect();
        for bp in &deleted {
            muted_error!(
                client.delete_breakpoint(bp, identity, BreakpointScope::External, &client_id),
                "delete breakpoint:"
            );
        }

        let mut targets: Vec<BreakpointTarget> = requested
            .iter()
            .map(|r| BreakpointTarget {
                uri: uri.clone(),
                line: r.line,
                condition: None,
                id: None,
            })
            .collect();
        let mut outcomes = client.set_breakpoints(&SetBreakpointsRequest {
            identity,
            scope: BreakpointScope::External,
            client_id: &client_id,
            breakpoints: &targets,
        })?;

        // conditions can only be attached to already created breakpoints
        if requested.iter().any(|r| r.condition.is_some()) {
            targets = with_conditions(&uri, requested, &outcomes);
            outcomes = client.set_breakpoints(&SetBreakpointsRequest {
                identity,
                scope: BreakpointScope::External,
                client_id: &client_id,
                breakpoints: &targets,
            })?;
        }

        for session in sessions {
            session
                .sync_breakpoints(&deleted, &targets, &client_id)
                .map_err(|source| Error::BreakpointSync {
                    thread_id: session.thread_id(),
                    source,
                })?;
        }

        let confirmed = confirm(requested, &outcomes);
        log::debug!(
            target: "debugger",
            "breakpoints of {source_path}: [{}]",
            confirmed
                .iter()
                .map(|bp| format!("{}{}", bp.line, if bp.verified() { "" } else { "?" }))
                .join(", ")
        );
        table.insert(source_path.to_string(), confirmed.clone());
        Ok(confirmed)
    }
}

fn accepted_at(outcomes: &[BreakpointOutcome], line: u32) -> Option<&RemoteBreakpoint> {
    outcomes.iter().find_map(|o| match o {
        BreakpointOutcome::Accepted(bp) if bp.line == line => Some(bp),
        _ => None,
    })
}

/// Merge requested conditions into the breakpoints confirmed by the first round trip.
fn with_conditions(
    uri: &str,
    requested: &[SourceBreakpoint],
    outcomes: &[BreakpointOutcome],
) -> Vec<BreakpointTarget> {
    requested
        .iter()
        .map(|r| BreakpointTarget {
            uri: uri.to_string(),
            line: r.line,
            condition: r.condition.clone(),
            id: accepted_at(outcomes, r.line).map(|bp| bp.id.clone()),
        })
        .collect()
}

fn confirm(requested: &[SourceBreakpoint], outcomes: &[BreakpointOutcome]) -> Vec<ConfirmedBreakpoint> {
    requested
        .iter()
        .map(|r| {
            let remote = accepted_at(outcomes, r.line).cloned();
            let message = match remote {
                Some(_) => None,
                None => outcomes.iter().find_map(|o| match o {
                    BreakpointOutcome::Rejected { line, message } if *line == r.line => {
                        Some(message.clone())
                    }
                    _ => None,
                }),
            };
            ConfirmedBreakpoint {
                line: r.line,
                column: r.column,
                condition: remote
                    .as_ref()
                    .and_then(|bp| bp.condition.clone())
                    .or_else(|| r.condition.clone()),
                remote,
                message,
            }
        })
        .collect()
}
