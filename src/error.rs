//! Error types for Drover
//!
//! Uses `thiserror` for library errors; the binary edge wraps these in
//! `anyhow`. Per-host and per-check failures are normally captured into a
//! `Report` and never surface as `DroverError`; the variants here cover the
//! cases that must unwind a unit of work or the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Drover operations
pub type DroverResult<T> = Result<T, DroverError>;

/// Main error type for Drover operations
#[derive(Error, Debug)]
pub enum DroverError {
    /// A single property or prompt is invalid or missing
    #[error("configuration error for '{key}': {message}")]
    Configuration { key: String, message: String },

    /// A named validation check failed hard enough to unwind its worker
    #[error("validation check '{check}' failed on {host}: {message}")]
    Validation {
        check: String,
        host: String,
        message: String,
    },

    /// Transport, SSH-layer, or result-decode failure
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Property-tree access or persistence failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Unwinds the orchestrator immediately, regardless of --force
    #[error(transparent)]
    Abort(#[from] FatalAbort),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DroverError {
    /// Shorthand for a configuration error on one key
    pub fn configuration(key: impl Into<String>, message: impl Into<String>) -> Self {
        DroverError::Configuration {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Errors from the property tree and its persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// A path segment descends into a scalar value
    #[error("cannot descend into scalar value at '{path}'")]
    TypeMismatch { path: String },

    /// A leaf was addressed as if it were a list
    #[error("value at '{path}' is not a list")]
    NotAList { path: String },

    /// A persisted line could not be parsed back into the tree
    #[error("malformed property line {line} in {file}: {message}")]
    MalformedLine {
        file: PathBuf,
        line: usize,
        message: String,
    },

    /// The configuration file is held by another run
    #[error("configuration file {file} is locked by another process")]
    Locked { file: PathBuf },
}

/// Remote execution failures, grouped by layer
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The transport (ssh spawn / connection) failed before any exchange
    #[error("ssh to {host} failed: {message}")]
    Transport { host: String, message: String },

    /// The remote tool exited nonzero without a decodable result
    #[error("remote command on {host} exited with status {status}: {stderr}")]
    CommandFailed {
        host: String,
        status: i32,
        stderr: String,
    },

    /// The remote tool produced output that is not a valid result envelope
    #[error("malformed result from {host}: {message}")]
    Decode { host: String, message: String },

    /// The remote tool speaks a protocol version this build does not
    #[error("unsupported protocol version {version} from {host}")]
    Version { host: String, version: u32 },
}

/// Conditions that abort the run no matter what flags were given
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalAbort {
    /// User chose save-and-exit during prompting
    #[error("configuration saved; exiting at user request")]
    SaveAndExit,

    /// Interrupt (Ctrl+C) observed at a phase boundary
    #[error("run interrupted")]
    Interrupted,

    /// Anything the orchestrator cannot recover from
    #[error("{0}")]
    Unrecoverable(String),
}
