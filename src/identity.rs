//! Stable listener identities.
//!
//! The remote debugger recognizes a listener by its ide id and terminal id, keeping
//! them stable across restarts lets a restarted ide be treated as the same listener.

use crate::error::Error;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Default, Serialize, Deserialize)]
struct WorkspaceState {
    ide_id: Option<String>,
}

/// Produces and persists the ide id (per install) and the terminal id (per machine).
pub struct IdentityProvider {
    state_file: PathBuf,
    terminal_file: PathBuf,
    ide_id: OnceCell<String>,
    terminal_id: OnceCell<String>,
}

impl IdentityProvider {
    const DEFAULT_STATE_PATH: &'static str = ".config/adt-debugger/state.toml";
    /// Shared with other ADT clients on this machine.
    const TERMINAL_ID_PATH: &'static str = ".SAP/ABAPDebugging/terminalId";

    pub fn new(state_file: impl Into<PathBuf>, terminal_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
            terminal_file: terminal_file.into(),
            ide_id: OnceCell::new(),
            terminal_id: OnceCell::new(),
        }
    }

    /// Provider with files at their default locations under the home directory.
    pub fn with_defaults(state_file: Option<&Path>) -> Result<Self, Error> {
        let home = home::home_dir().ok_or(Error::HomeNotFound)?;
        let state_file = state_file
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home.join(Self::DEFAULT_STATE_PATH));
        Ok(Self::new(state_file, home.join(Self::TERMINAL_ID_PATH)))
    }

    pub fn ide_id(&self) -> Result<String, Error> {
        self.ide_id
            .get_or_try_init(|| load_or_create_ide_id(&self.state_file))
            .cloned()
    }

    pub fn terminal_id(&self) -> Result<String, Error> {
        self.terminal_id
            .get_or_try_init(|| load_or_create_terminal_id(&self.terminal_file))
            .cloned()
    }
}

fn new_id() -> String {
    Uuid::new_v4().simple().to_string().to_uppercase()
}

fn write_creating_dirs(path: &Path, data: &str) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, data)?;
    Ok(())
}

fn load_or_create_ide_id(path: &Path) -> Result<String, Error> {
    let mut state: WorkspaceState = match fs::read_to_string(path) {
        Ok(data) => toml::de::from_str(&data)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => WorkspaceState::default(),
        Err(e) => return Err(e.into()),
    };

    if let Some(id) = state.ide_id.as_ref().filter(|id| !id.is_empty()) {
        return Ok(id.clone());
    }

    let id = new_id();
    log::info!(target: "debugger", "generated ide id {id}");
    state.ide_id = Some(id.clone());
    write_creating_dirs(path, &toml::ser::to_string(&state)?)?;
    Ok(id)
}

fn load_or_create_terminal_id(path: &Path) -> Result<String, Error> {
    match fs::read_to_string(path) {
        Ok(data) if !data.trim().is_empty() => return Ok(data.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let id = new_id();
    log::info!(target: "debugger", "generated terminal id {id}");
    write_creating_dirs(path, &id)?;
    Ok(id)
}
