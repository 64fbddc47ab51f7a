//! Remote debugger protocol seam.
//!
//! [`DebugClient`] is implemented by the transport collaborator that talks to the
//! remote REST debugger. Every call is a blocking round trip; [`DebugClient::listen`]
//! may block for minutes until a breakpoint is hit or the server gives up.

pub mod factory;

pub use crate::error::{ClientError, ErrorKind};
pub use factory::{ClientFactory, ClientOptions, Connector};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};

pub type ClientResult<T> = Result<T, ClientError>;

/// Channel of the remote debugger registry a listener occupies.
#[derive(
    Copy,
    Clone,
    PartialEq,
    Eq,
    Debug,
    Default,
    Display,
    EnumString,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DebuggerMode {
    #[default]
    #[strum(serialize = "user")]
    User,
    #[strum(serialize = "terminal")]
    Terminal,
}

/// Identity under which a listener is registered on the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebuggerIdentity {
    pub mode: DebuggerMode,
    pub terminal_id: String,
    pub ide_id: String,
    pub user: String,
}

impl DebuggerIdentity {
    /// Same identity with an empty ide id, matches registrations of any ide instance.
    pub fn any_ide(&self) -> DebuggerIdentity {
        DebuggerIdentity {
            ide_id: String::new(),
            ..self.clone()
        }
    }
}

/// Server-supplied description of a listener registration conflict.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ListenerConflict {
    pub message: String,
    pub conflict_text: String,
    pub ide_user: Option<String>,
}

/// A suspended execution instance reached at a breakpoint.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Debuggee {
    pub id: String,
    pub user: String,
    pub program: String,
    pub include: String,
    pub line: u32,
    pub title: Option<String>,
}

/// Result of one long-poll call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenResult {
    /// Nothing happened before the server returned.
    Empty,
    /// Registration failed or was displaced.
    Error(ListenerConflict),
    Debuggee(Debuggee),
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AttachInfo {
    pub stepping_possible: bool,
    pub reached_breakpoints: Vec<String>,
}

/// Debugger settings persisted on attach.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DebugSettings {
    pub system_debugging: bool,
    pub create_exception_object: bool,
    pub background_rfc: bool,
    pub shared_objects_debugging: bool,
    pub show_data_aging: bool,
    pub update_debugging: bool,
}

/// One raw stack entry as reported by the server.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RawStackEntry {
    pub position: u32,
    pub kind: String,
    pub program: String,
    pub include: String,
    pub line: u32,
    pub event: String,
    /// Source locator of the frame, used to find the local path.
    pub uri: String,
    /// Locator used to navigate to this frame, if the server supplies one.
    pub stack_uri: Option<String>,
}

impl RawStackEntry {
    pub fn target(&self) -> StackTarget {
        match &self.stack_uri {
            Some(uri) => StackTarget::Uri(uri.clone()),
            None => StackTarget::Position(self.position),
        }
    }
}

/// Stack position the server is asked to navigate to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackTarget {
    Uri(String),
    Position(u32),
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, EnumString, IntoStaticStr)]
pub enum StepKind {
    #[strum(serialize = "stepInto")]
    StepInto,
    #[strum(serialize = "stepOver")]
    StepOver,
    #[strum(serialize = "stepReturn")]
    StepReturn,
    #[strum(serialize = "stepContinue")]
    StepContinue,
    #[strum(serialize = "stepRunToLine")]
    StepRunToLine,
    #[strum(serialize = "stepJumpToLine")]
    StepJumpToLine,
}

impl StepKind {
    /// Position-sensitive steps need a target source locator.
    pub fn requires_target(self) -> bool {
        matches!(self, StepKind::StepRunToLine | StepKind::StepJumpToLine)
    }

    /// Steps that let the debuggee run until the next breakpoint.
    pub fn runs_freely(self) -> bool {
        matches!(
            self,
            StepKind::StepContinue | StepKind::StepRunToLine | StepKind::StepJumpToLine
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct StepResult {
    pub debuggee_changed: bool,
    pub stepping_possible: bool,
}

/// Variable as reported by the server.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct DebugVariable {
    pub id: String,
    pub name: String,
    pub declared_type: String,
    pub value: String,
    /// Vendor meta type: `simple`, `string`, `structure`, `table`, `objectref`...
    pub meta_type: String,
    pub table_lines: u32,
    pub read_only: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct VariableHierarchy {
    pub parent_id: String,
    pub child_id: String,
    pub child_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ChildVariables {
    pub hierarchies: Vec<VariableHierarchy>,
    pub variables: Vec<DebugVariable>,
}

/// Origin of a breakpoint change.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, IntoStaticStr)]
pub enum BreakpointScope {
    /// Set by the user outside of a running debug session.
    #[strum(serialize = "external")]
    External,
    /// Replayed into an active debug session.
    #[strum(serialize = "debugger")]
    Debugger,
}

/// Breakpoint as submitted to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakpointTarget {
    /// Content locator of the source, without line fragment.
    pub uri: String,
    pub line: u32,
    pub condition: Option<String>,
    /// Handle of an already confirmed breakpoint, set on re-submission.
    pub id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SetBreakpointsRequest<'a> {
    pub identity: &'a DebuggerIdentity,
    pub scope: BreakpointScope,
    pub client_id: &'a str,
    pub breakpoints: &'a [BreakpointTarget],
}

/// Breakpoint accepted by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteBreakpoint {
    pub id: String,
    pub uri: String,
    pub line: u32,
    pub condition: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BreakpointOutcome {
    Accepted(RemoteBreakpoint),
    Rejected { line: u32, message: String },
}

/// Remote debugger protocol, one instance bound to one connection.
///
/// A stateful client keeps a session-affine connection to the server while
/// attached; [`DebugClient::logout`] reverts it.
pub trait DebugClient: Send + Sync {
    /// List registered listeners matching identity. Returns a conflict description
    /// if registering with this identity would collide with an existing one.
    fn listeners(&self, identity: &DebuggerIdentity) -> ClientResult<Option<ListenerConflict>>;

    /// Long-poll until a debuggee is reached, the registration is displaced or the server times out.
    fn listen(&self, identity: &DebuggerIdentity) -> ClientResult<ListenResult>;

    /// Remove listener registration.
    fn delete_listener(&self, identity: &DebuggerIdentity) -> ClientResult<()>;

    fn attach(
        &self,
        mode: DebuggerMode,
        debuggee_id: &str,
        user: &str,
        dynpro_debugging: bool,
    ) -> ClientResult<AttachInfo>;

    fn save_settings(&self, settings: &DebugSettings) -> ClientResult<()>;

    fn stack_trace(&self) -> ClientResult<Vec<RawStackEntry>>;

    fn goto_stack(&self, target: &StackTarget) -> ClientResult<()>;

    fn step(&self, kind: StepKind, target: Option<&str>) -> ClientResult<StepResult>;

    fn child_variables(&self, parents: &[String]) -> ClientResult<ChildVariables>;

    fn variables(&self, ids: &[String]) -> ClientResult<Vec<DebugVariable>>;

    /// Returns the new value as rendered by the server.
    fn set_variable_value(&self, name: &str, value: &str) -> ClientResult<String>;

    fn set_breakpoints(
        &self,
        request: &SetBreakpointsRequest<'_>,
    ) -> ClientResult<Vec<BreakpointOutcome>>;

    fn delete_breakpoint(
        &self,
        breakpoint: &RemoteBreakpoint,
        identity: &DebuggerIdentity,
        scope: BreakpointScope,
        client_id: &str,
    ) -> ClientResult<()>;

    /// Logout of the stateless side of the connection.
    fn stateless_logout(&self) -> ClientResult<()>;

    fn logout(&self) -> ClientResult<()>;
}
