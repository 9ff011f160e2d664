//! Lock file discovery and parsing.
//!
//! The client writes `name:pid:port:password:protocol` to a lock file every
//! time it starts; both the port and the password rotate with each restart, so
//! the file is read again before every session.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Username paired with the lock file password for basic auth.
pub const LCU_USERNAME: &str = "riot";

const LOCKFILE_FIELDS: usize = 5;

/// Connection parameters for one client session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub port: u16,
    pub password: String,
}

impl SessionCredential {
    /// `https://127.0.0.1:{port}`
    pub fn base_url(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    /// `wss://127.0.0.1:{port}/`
    pub fn websocket_url(&self) -> String {
        format!("wss://127.0.0.1:{}/", self.port)
    }
}

// The password is a bearer secret for the local API; keep it out of logs.
impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredential")
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockfileError {
    #[error("expected 5 ':'-separated fields, found {0}")]
    FieldCount(usize),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

/// Parses lock file contents into a [`SessionCredential`].
///
/// Surrounding whitespace (the trailing newline some writers add) is ignored.
/// Exactly five fields are required; the port is field 3 and the password
/// field 4.
pub fn parse_lockfile(content: &str) -> Result<SessionCredential, LockfileError> {
    let fields: Vec<&str> = content.trim().split(':').collect();
    if fields.len() != LOCKFILE_FIELDS {
        return Err(LockfileError::FieldCount(fields.len()));
    }
    let port = fields[2]
        .parse::<u16>()
        .map_err(|_| LockfileError::InvalidPort(fields[2].to_string()))?;
    Ok(SessionCredential {
        port,
        password: fields[3].to_string(),
    })
}

/// Source of fresh session credentials.
pub trait CredentialResolver: Send + Sync {
    /// Returns the current credentials, or `None` when they cannot be read.
    /// Failures are logged, never raised.
    fn resolve(&self) -> Option<SessionCredential>;
}

/// Reads the first existing candidate lock file.
pub struct LockfileResolver {
    candidates: Vec<PathBuf>,
}

impl LockfileResolver {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    /// Resolver over the standard install locations.
    pub fn standard() -> Self {
        Self::new(crate::paths::lockfile_candidates())
    }

    fn first_existing(&self) -> Option<&Path> {
        self.candidates
            .iter()
            .map(PathBuf::as_path)
            .find(|p| p.is_file())
    }
}

impl CredentialResolver for LockfileResolver {
    fn resolve(&self) -> Option<SessionCredential> {
        let Some(path) = self.first_existing() else {
            tracing::debug!(candidates = self.candidates.len(), "lock file not found");
            return None;
        };

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read lock file");
                return None;
            }
        };

        match parse_lockfile(&content) {
            Ok(credential) => {
                tracing::debug!(path = %path.display(), port = credential.port, "lock file resolved");
                Some(credential)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "malformed lock file");
                None
            }
        }
    }
}
