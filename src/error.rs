use crate::client::StepKind;
use crate::engine::ThreadId;
use strum_macros::Display;

/// Closed classification of remote debugger failures.
///
/// Decided once, when the raw transport error is first observed by a
/// [`crate::client::DebugClient`] implementation, see [`ErrorKind::classify`].
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display)]
pub enum ErrorKind {
    /// Another listener took over the registration while we were listening.
    #[strum(serialize = "conflict notification")]
    ConflictNotification,
    /// The server refused the registration because another listener owns it.
    #[strum(serialize = "conflict detected")]
    ConflictDetected,
    /// Long-poll call returned without a debuggee.
    #[strum(serialize = "auto attach timeout")]
    AutoAttachTimeout,
    /// Remote execution context is gone.
    #[strum(serialize = "debuggee ended")]
    DebuggeeEnded,
    /// Client was already logged out.
    #[strum(serialize = "stateless client")]
    Stateless,
    /// Network or HTTP level failure.
    #[strum(serialize = "transport")]
    Transport,
    #[strum(serialize = "remote error")]
    Other,
}

impl ErrorKind {
    const CONNECTION_TIMED_OUT: &'static str = "Connection timed out";

    /// Classify a raw failure by the vendor sub-type field and the message text.
    pub fn classify(sub_type: Option<&str>, message: &str) -> ErrorKind {
        match sub_type {
            Some("conflictNotification") => return ErrorKind::ConflictNotification,
            Some("conflictDetected") => return ErrorKind::ConflictDetected,
            Some("debuggeeEnded") => return ErrorKind::DebuggeeEnded,
            _ => {}
        }

        if message.contains(Self::CONNECTION_TIMED_OUT) {
            return ErrorKind::AutoAttachTimeout;
        }

        ErrorKind::Other
    }

    pub fn is_conflict(self) -> bool {
        matches!(
            self,
            ErrorKind::ConflictNotification | ErrorKind::ConflictDetected
        )
    }
}

/// Error produced by the remote protocol client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build an error from raw transport data, classifying it on the way.
    pub fn from_remote(sub_type: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: ErrorKind::classify(sub_type, &message),
            message,
        }
    }

    pub fn is_debuggee_ended(&self) -> bool {
        self.kind == ErrorKind::DebuggeeEnded
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Client(#[from] ClientError),

    // --------------------------------- configuration errors --------------------------------------
    #[error("config parsing error: {0}")]
    ConfigParsing(#[from] toml::de::Error),
    #[error("state serialization error: {0}")]
    StateSerialization(#[from] toml::ser::Error),
    #[error("home directory not found")]
    HomeNotFound,
    #[error("unknown connection `{0}`")]
    UnknownConnection(String),

    // --------------------------------- engine entity not found -----------------------------------
    #[error("thread {0} not found")]
    ThreadNotFound(ThreadId),
    #[error("frame {0} not found")]
    FrameNotFound(i64),
    #[error("no thread is currently suspended")]
    NoCurrentThread,
    #[error("variable reference {0} not found")]
    UnknownVariableHandle(i64),

    // --------------------------------- listener/session state errors -----------------------------
    #[error("connection `{0}` is already being debugged")]
    AlreadyDebugging(String),
    #[error("debugger takeover declined for `{0}`")]
    TakeoverDeclined(String),
    #[error("session for thread {0} already logged out")]
    SessionKilled(ThreadId),
    #[error("debugger step {0} requires a target")]
    MissingStepTarget(StepKind),
    #[error("breakpoint synchronization with thread {thread_id} failed: {source}")]
    BreakpointSync {
        thread_id: ThreadId,
        #[source]
        source: ClientError,
    },
}

impl Error {
    /// Return a hint to an interface - continue debugging after error or stop whole listener.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IO(_) => false,
            Error::Client(e) => e.kind.is_conflict(),
            Error::ThreadNotFound(_) => false,
            Error::FrameNotFound(_) => false,
            Error::NoCurrentThread => false,
            Error::UnknownVariableHandle(_) => false,
            Error::SessionKilled(_) => false,
            Error::MissingStepTarget(_) => false,
            Error::BreakpointSync { .. } => false,

            // currently fatal errors
            Error::ConfigParsing(_) => true,
            Error::StateSerialization(_) => true,
            Error::HomeNotFound => true,
            Error::UnknownConnection(_) => true,
            Error::AlreadyDebugging(_) => true,
            Error::TakeoverDeclined(_) => true,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "debugger", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
