//! Error types for fpmd.

use thiserror::Error;

use crate::request::DecodeError;

/// Main error type for fpmd.
///
/// Variants map onto the daemon's failure taxonomy: configuration and
/// endpoint errors abort startup, spawn errors stop the supervisor,
/// [`FpmError::Decode`] is contained to a single request cycle.
#[derive(Error, Debug)]
pub enum FpmError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("socket '{0}' is already in use, can't spawn")]
    EndpointBusy(String),

    #[error("'{0}' is not a valid IPv4 or IPv6 address")]
    InvalidAddress(String),

    #[error("failed to bind endpoint: {0}")]
    Bind(String),

    #[error("privilege drop failed: {0}")]
    Privilege(String),

    #[error("pid file error: {0}")]
    PidFile(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("worker {pid} exited with fatal status {status}")]
    WorkerFatal { pid: i32, status: i32 },

    #[error("request decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("script engine failure: {0}")]
    Engine(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),
}

/// Result type alias for fpmd operations.
pub type Result<T> = std::result::Result<T, FpmError>;
