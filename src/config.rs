use crate::error::Error;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_DEBUG_THREADS: usize = 4;
const DEFAULT_DEBUG_TIMEOUT_SECS: u64 = 3600;

/// Engine-wide debugger options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DebuggerOptions {
    /// Listen errors returned faster than this are treated as real errors,
    /// slower ones as normal long-poll timeouts.
    pub listen_error_grace_secs: u64,
    /// Upper bound of continue calls issued while releasing an over-capacity debuggee.
    pub resume_max_steps: u32,
    /// Upper bound of time spent releasing an over-capacity debuggee.
    pub resume_budget_secs: u64,
    /// Answer to "take over the debugger registration of another session?".
    pub takeover: bool,
    /// Answer to "close session after a listen error?".
    pub close_on_listen_error: bool,
}

impl Default for DebuggerOptions {
    fn default() -> Self {
        Self {
            listen_error_grace_secs: 50,
            resume_max_steps: 100,
            resume_budget_secs: 300,
            takeover: true,
            close_on_listen_error: false,
        }
    }
}

impl DebuggerOptions {
    pub fn listen_error_grace(&self) -> Duration {
        Duration::from_secs(self.listen_error_grace_secs)
    }

    pub fn resume_budget(&self) -> Duration {
        Duration::from_secs(self.resume_budget_secs)
    }
}

fn default_max_debug_threads() -> usize {
    DEFAULT_MAX_DEBUG_THREADS
}

fn default_debug_timeout_secs() -> u64 {
    DEFAULT_DEBUG_TIMEOUT_SECS
}

/// Remote connection settings. Credentials are owned by the [`crate::client::Connector`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectionConfig {
    pub id: String,
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_max_debug_threads")]
    pub max_debug_threads: usize,
    #[serde(default = "default_debug_timeout_secs")]
    pub debug_timeout_secs: u64,
}

impl ConnectionConfig {
    pub fn debug_timeout(&self) -> Duration {
        Duration::from_secs(self.debug_timeout_secs)
    }
}

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub debugger: DebuggerOptions,
    #[serde(rename = "connection")]
    pub connections: Vec<ConnectionConfig>,
    /// File with per-install state (ide id), defaults to a file next to the config.
    pub workspace_state: Option<PathBuf>,
}

impl Config {
    const DEFAULT_PATH: &'static str = ".config/adt-debugger/config.toml";

    pub fn from_toml(data: &str) -> Result<Self, Error> {
        Ok(toml::de::from_str(data)?)
    }

    /// Load configuration from file, default location is used if path is [`None`].
    /// A missing default file yields an empty configuration.
    pub fn from_file(path: Option<&Path>) -> Result<Self, Error> {
        let data = match path {
            Some(path) => read_to_string(path)?,
            None => {
                let path = Self::default_path()?;
                if !path.exists() {
                    log::info!(target: "debugger", "no config at {}, using defaults", path.display());
                    return Ok(Config::default());
                }
                read_to_string(path)?
            }
        };

        Self::from_toml(&data)
    }

    pub fn default_path() -> Result<PathBuf, Error> {
        let home = home::home_dir().ok_or(Error::HomeNotFound)?;
        Ok(home.join(Self::DEFAULT_PATH))
    }
}

/// Lookup of connection settings by connection id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: IndexMap<String, ConnectionConfig>,
}

impl ConnectionRegistry {
    pub fn new(connections: impl IntoIterator<Item = ConnectionConfig>) -> Self {
        Self {
            connections: connections
                .into_iter()
                .map(|c| (c.id.to_lowercase(), c))
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.connections.iter().cloned())
    }

    /// Connection ids are case-insensitive.
    pub fn get(&self, connection_id: &str) -> Result<&ConnectionConfig, Error> {
        self.connections
            .get(&connection_id.to_lowercase())
            .ok_or_else(|| Error::UnknownConnection(connection_id.to_string()))
    }

    pub fn max_debug_threads(&self, connection_id: &str) -> Result<usize, Error> {
        Ok(self.get(connection_id)?.max_debug_threads)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.connections.values().map(|c| c.id.as_str())
    }
}
