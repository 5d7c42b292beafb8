//! Error types for screening-core operations.
//!
//! Classifier and elevation failures are reduced to a safe terminal state
//! inside the crate; callers see them only as outcomes and status.

use std::path::PathBuf;

use crate::types::{ConnectionState, DisconnectCause};

// ═══════════════════════════════════════════════════════════════════════════════
// Connection Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Connection already disconnected ({cause})")]
    AlreadyTerminal { cause: DisconnectCause },

    #[error("Cannot {event} a connection in state {from}")]
    InvalidTransition {
        from: ConnectionState,
        event: &'static str,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Directory Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a directory lookup could not produce an answer.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Contacts directory not found at {0}")]
    Unavailable(PathBuf),

    #[error("Permission denied reading contacts at {0}")]
    PermissionDenied(PathBuf),

    #[error("Contacts read failed: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Contacts file malformed: {path}: {details}")]
    Malformed { path: PathBuf, details: String },

    #[error("Directory lookup exceeded {0}ms")]
    Timeout(u64),

    #[error("Directory lookup worker exited without an answer")]
    WorkerLost,

    #[error("Previous directory lookup still running")]
    Busy,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Elevation Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// The host refused to keep the screening process alive.
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    #[error("Background lease held by live process {pid}")]
    HeldByOther { pid: u32 },

    #[error("Background lease is being claimed by another process")]
    BeingClaimed,

    #[error("Background lease I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Controller Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ScreeningError {
    #[error("Elevation failed: {0}")]
    Elevation(#[from] ElevationError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("No connection attached to the screening session")]
    NoConnection,

    #[error("No screening session is active")]
    NotScreening,

    #[error("Configuration malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    #[error("Configuration read failed: {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ScreeningError {
    /// Stable machine-readable code for IPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            ScreeningError::Elevation(_) => "elevation_failed",
            ScreeningError::Connection(ConnectionError::AlreadyTerminal { .. }) => {
                "already_terminal"
            }
            ScreeningError::Connection(ConnectionError::InvalidTransition { .. }) => {
                "invalid_transition"
            }
            ScreeningError::NoConnection => "no_connection",
            ScreeningError::NotScreening => "not_screening",
            ScreeningError::ConfigMalformed { .. } | ScreeningError::ConfigRead { .. } => {
                "config_error"
            }
        }
    }
}
