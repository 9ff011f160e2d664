use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::lcu::ConnectorState;

/// Connection state of the League client integration.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ClientState {
    /// The client window is not present, or no session could be opened yet.
    Waiting,
    /// An event session with the client is open.
    Connected,
    /// The connector has shut down and will not reconnect.
    Stopped,
}

impl From<ConnectorState> for ClientState {
    fn from(state: ConnectorState) -> Self {
        match state {
            ConnectorState::WaitingForApp => ClientState::Waiting,
            ConnectorState::Connected => ClientState::Connected,
            ConnectorState::Stopped => ClientState::Stopped,
        }
    }
}

/// Runtime status written by the daemon to %APPDATA%\QOL-Scripts\status.toml.
/// A tray front end reads this file (read-only) to display daemon state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub client: ClientState,
    /// Whether side monitors are currently dimmed.
    pub dimming: bool,
    /// RFC 3339 timestamp of the last write.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Human-readable error message if the daemon encountered a non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            client: ClientState::Waiting,
            dimming: false,
            updated_at: None,
            error: None,
        }
    }
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stamps `status` with the current time, serializes it to TOML and writes it
/// to `path`. Creates the parent directory if it does not exist. Failures are
/// logged; a status write never stops the daemon.
pub fn write_status(path: &Path, status: &mut DaemonStatus) {
    status.updated_at = Some(chrono::Local::now().to_rfc3339());

    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(dir = %parent.display(), error = %e, "failed to create status directory");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                tracing::warn!(path = %path.display(), error = %e, "failed to write status file");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to serialize status"),
    }
}
