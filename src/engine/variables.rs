use crate::client::DebugVariable;
use crate::engine::session::DebugSession;
use crate::engine::{thread_of, ThreadId, THREAD_MULTIPLIER};
use crate::error::Error;
use std::collections::HashMap;
use std::sync::Mutex;

/// Synthetic root of the variable hierarchy, its children are the scopes.
pub const ROOT_ID: &str = "@ROOT";
/// System fields scope, always present.
pub const SYSTEM_ID: &str = "SY";
const SYNTHETIC_ROOT_MARKER: char = '@';

/// Classification controlling how children of a variable are fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VariableMeta {
    Scalar,
    /// Rows are addressed by index.
    Table,
    /// Children are found by structure traversal.
    Complex,
}

impl VariableMeta {
    pub fn classify(meta_type: &str) -> VariableMeta {
        match meta_type {
            "table" => VariableMeta::Table,
            "simple" | "string" | "unknown" | "" => VariableMeta::Scalar,
            _ => VariableMeta::Complex,
        }
    }
}

/// Locally addressable reference to a remote variable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableHandle {
    pub id: String,
    pub thread_id: ThreadId,
    pub meta: VariableMeta,
    /// Row count of a table variable.
    pub lines: u32,
}

impl VariableHandle {
    fn expandable(&self) -> bool {
        match self.meta {
            VariableMeta::Scalar => false,
            VariableMeta::Table => self.lines > 0,
            VariableMeta::Complex => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    pub name: String,
    pub variables_reference: i64,
}

/// Variable ready for display, `variables_reference` is 0 for leaf values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableView {
    pub name: String,
    pub value: String,
    pub type_name: String,
    pub variables_reference: i64,
    pub indexed_variables: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetVariableResult {
    pub success: bool,
    pub value: Option<String>,
}

impl SetVariableResult {
    fn failed() -> Self {
        Self {
            success: false,
            value: None,
        }
    }
}

/// Ids of the rows of a table variable. Remote tables are indexed from 1 without gaps.
pub fn table_row_ids(base: &str, lines: u32) -> Vec<String> {
    let base = base.strip_suffix("[]").unwrap_or(base);
    (0..lines).map(|k| format!("{base}[{}]", k + 1)).collect()
}

/// Fully qualified name of component `name` of variable `parent_id`.
pub fn variable_path(parent_id: &str, name: &str) -> String {
    if parent_id.starts_with(SYNTHETIC_ROOT_MARKER) {
        name.to_uppercase()
    } else {
        format!("{parent_id}-{}", name.to_uppercase())
    }
}

/// Handle namespace of one thread, seeded at `thread_id * THREAD_MULTIPLIER`.
struct ThreadHandles {
    next: i64,
    handles: HashMap<i64, VariableHandle>,
}

impl ThreadHandles {
    fn new(thread_id: ThreadId) -> Self {
        Self {
            next: thread_id * THREAD_MULTIPLIER,
            handles: HashMap::new(),
        }
    }

    fn create(&mut self, handle: VariableHandle) -> i64 {
        let reference = self.next;
        self.next += 1;
        self.handles.insert(reference, handle);
        reference
    }
}

/// Translates the remote variable graph into thread scoped handles.
#[derive(Default)]
pub(crate) struct VariableResolver {
    threads: Mutex<HashMap<ThreadId, ThreadHandles>>,
}

impl VariableResolver {
    fn create(&self, handle: VariableHandle) -> i64 {
        let mut threads = self.threads.lock().unwrap();
        threads
            .entry(handle.thread_id)
            .or_insert_with(|| ThreadHandles::new(handle.thread_id))
            .create(handle)
    }

    pub(crate) fn handle(&self, reference: i64) -> Result<VariableHandle, Error> {
        self.threads
            .lock()
            .unwrap()
            .get(&thread_of(reference))
            .and_then(|t| t.handles.get(&reference))
            .cloned()
            .ok_or(Error::UnknownVariableHandle(reference))
    }

    /// Drop every handle of a thread, its numbering starts over.
    pub(crate) fn reset_thread(&self, thread_id: ThreadId) {
        self.threads.lock().unwrap().remove(&thread_id);
    }

    pub(crate) fn clear(&self) {
        self.threads.lock().unwrap().clear();
    }

    fn view(&self, thread_id: ThreadId, var: DebugVariable) -> VariableView {
        let handle = VariableHandle {
            id: var.id,
            thread_id,
            meta: VariableMeta::classify(&var.meta_type),
            lines: var.table_lines,
        };

        let (value, indexed_variables) = match handle.meta {
            VariableMeta::Table => (
                format!("{} [{} lines]", var.declared_type, handle.lines),
                Some(handle.lines),
            ),
            _ => (var.value, None),
        };

        let variables_reference = if handle.expandable() {
            self.create(handle)
        } else {
            0
        };

        VariableView {
            name: var.name,
            value,
            type_name: var.declared_type,
            variables_reference,
            indexed_variables,
        }
    }

    /// Scopes of a stack frame, the system fields scope is always last.
    pub(crate) fn scopes(&self, session: &DebugSession, frame_id: i64) -> Result<Vec<Scope>, Error> {
        let thread_id = session.thread_id();
        session.select_frame(frame_id)?;

        let root = session.client()?.child_variables(&[ROOT_ID.to_string()])?;
        let mut scopes: Vec<Scope> = root
            .hierarchies
            .iter()
            .filter(|h| h.parent_id == ROOT_ID)
            .map(|h| {
                let var = root.variables.iter().find(|v| v.id == h.child_id);
                let handle = VariableHandle {
                    id: h.child_id.clone(),
                    thread_id,
                    meta: var
                        .map(|v| VariableMeta::classify(&v.meta_type))
                        .filter(|meta| *meta != VariableMeta::Scalar)
                        .unwrap_or(VariableMeta::Complex),
                    lines: var.map(|v| v.table_lines).unwrap_or_default(),
                };
                Scope {
                    name: h.child_name.clone(),
                    variables_reference: self.create(handle),
                }
            })
            .collect();

        scopes.push(Scope {
            name: SYSTEM_ID.to_string(),
            variables_reference: self.create(VariableHandle {
                id: SYSTEM_ID.to_string(),
                thread_id,
                meta: VariableMeta::Complex,
                lines: 0,
            }),
        });

        Ok(scopes)
    }

    /// Children of a handle. Table rows are addressed directly, without a child lookup.
    pub(crate) fn variables(
        &self,
        session: &DebugSession,
        handle: &VariableHandle,
    ) -> Result<Vec<VariableView>, Error> {
        let client = session.client()?;
        let children = match handle.meta {
            VariableMeta::Scalar => vec![],
            VariableMeta::Table if handle.lines == 0 => vec![],
            VariableMeta::Table => client.variables(&table_row_ids(&handle.id, handle.lines))?,
            VariableMeta::Complex => client.child_variables(&[handle.id.clone()])?.variables,
        };

        Ok(children
            .into_iter()
            .map(|var| self.view(handle.thread_id, var))
            .collect())
    }

    /// Change a component of a handle. Failures are reported in the result, never raised.
    pub(crate) fn set_variable(
        &self,
        session: Option<&DebugSession>,
        reference: i64,
        name: &str,
        value: &str,
    ) -> SetVariableResult {
        let (Some(session), Ok(handle)) = (session, self.handle(reference)) else {
            return SetVariableResult::failed();
        };

        let path = variable_path(&handle.id, name);
        let result = session
            .client()
            .and_then(|client| Ok(client.set_variable_value(&path, value)?));

        match result {
            Ok(value) => SetVariableResult {
                success: true,
                value: Some(value),
            },
            Err(e) => {
                log::warn!(target: "debugger", "set variable {path}: {e}");
                SetVariableResult::failed()
            }
        }
    }

    /// Evaluate an expression as a variable name in the frame.
    pub(crate) fn evaluate(
        &self,
        session: &DebugSession,
        frame_id: Option<i64>,
        expression: &str,
    ) -> Result<Option<VariableView>, Error> {
        if let Some(frame_id) = frame_id {
            session.select_frame(frame_id)?;
        }
        let found = session
            .client()?
            .variables(&[expression.trim().to_uppercase()])?
            .into_iter()
            .next();
        Ok(found.map(|var| self.view(session.thread_id(), var)))
    }
}
