use crate::client::{ClientResult, DebugClient};
use crate::config::{ConnectionConfig, ConnectionRegistry};
use crate::error::Error;
use std::sync::Arc;
use std::time::Duration;

/// Options of a freshly built client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    /// Request timeout, must outlive a long-poll call.
    pub timeout: Duration,
    /// Keep a session-affine connection while attached.
    pub stateful: bool,
}

/// Builds authenticated protocol clients, implemented by the transport collaborator.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        connection: &ConnectionConfig,
        options: ClientOptions,
    ) -> ClientResult<Arc<dyn DebugClient>>;
}

/// Debug target client factory.
pub struct ClientFactory {
    registry: Arc<ConnectionRegistry>,
    connector: Arc<dyn Connector>,
}

impl ClientFactory {
    pub fn new(registry: Arc<ConnectionRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Client used for listener registration and long-poll calls.
    pub fn listener_client(&self, connection_id: &str) -> Result<Arc<dyn DebugClient>, Error> {
        self.create(connection_id, false)
    }

    /// Client bound to one attached debuggee.
    pub fn session_client(&self, connection_id: &str) -> Result<Arc<dyn DebugClient>, Error> {
        self.create(connection_id, true)
    }

    fn create(&self, connection_id: &str, stateful: bool) -> Result<Arc<dyn DebugClient>, Error> {
        let connection = self.registry.get(connection_id)?;
        let options = ClientOptions {
            timeout: connection.debug_timeout(),
            stateful,
        };
        log::debug!(
            target: "debugger",
            "connect {} (stateful: {stateful}, timeout: {:?})",
            connection.id,
            options.timeout
        );
        Ok(self.connector.connect(connection, options)?)
    }
}
