//! Error types for the volume agent
//!
//! One crate-wide error enum covering name validation, master lookups,
//! lease arbitration, and storage driver failures. Variants map onto the
//! responses the plugin endpoint hands back to the container runtime.

use thiserror::Error;

/// Unified error type for the agent
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Volume Identity
    // =========================================================================
    #[error("Invalid volume name {name:?}: expected \"policy/name\"")]
    InvalidName { name: String },

    // =========================================================================
    // Master Lookups
    // =========================================================================
    #[error("Volume {volume} not found")]
    VolumeNotFound { volume: String },

    #[error("Volume {volume} already exists")]
    VolumeExists { volume: String },

    #[error("Cannot reach volmaster: {reason}")]
    MasterUnreachable { reason: String },

    // =========================================================================
    // Lease Arbitration
    // =========================================================================
    #[error("Volume {volume} is in use: {hint}")]
    LeaseConflict { volume: String, hint: String },

    // =========================================================================
    // Storage Drivers
    // =========================================================================
    #[error("Unknown storage backend: {backend}")]
    BackendUnknown { backend: String },

    #[error("Storage driver {backend} failed during {operation}: {reason}")]
    Driver {
        backend: String,
        operation: String,
        reason: String,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Build a [`Error::Driver`] from a backend name, operation, and any
    /// displayable cause.
    pub fn driver<E: std::fmt::Display>(backend: &str, operation: &str, cause: E) -> Self {
        Self::Driver {
            backend: backend.to_string(),
            operation: operation.to_string(),
            reason: cause.to_string(),
        }
    }

    /// Transient errors are retried on polling paths (global-config watcher,
    /// heartbeats). Everything else is surfaced to the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::MasterUnreachable { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::MasterUnreachable {
            reason: e.to_string(),
        }
    }
}

/// Result type alias for the agent
pub type Result<T> = std::result::Result<T, Error>;
