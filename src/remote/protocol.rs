//! Wire protocol for remote command execution
//!
//! Every coordinator-to-host interaction is one re-invocation of the tool on
//! the target: the coordinator runs `drover exec --command-class=<Name>` over
//! SSH, writes a single JSON request to stdin, and reads back exactly one
//! versioned JSON envelope on stdout. stderr stays free-form and is only
//! surfaced when the exchange fails.

use serde::{Deserialize, Serialize};

use crate::checks::{Pass, SkipList};
use crate::error::RemoteError;
use crate::planner::PerHostConfiguration;
use crate::report::Report;

/// Bumped whenever a request shape or the envelope changes incompatibly
pub const PROTOCOL_VERSION: u32 = 1;

/// A command sent to the remote side of an exchange
///
/// The wire tag doubles as the `--command-class` value so the receiver can
/// refuse a request that disagrees with its own command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum CommandRequest {
    /// Liveness and environment probe; the reply carries host facts
    Ping,
    /// Create the staging area and stage the host's configuration in it
    Prepare {
        staging_root: String,
        config: PerHostConfiguration,
    },
    /// Run one validation pass against the given configuration
    RunChecks {
        pass: Pass,
        staging_root: String,
        config: PerHostConfiguration,
        skip: SkipList,
    },
    /// Execute a single deployment step of a module
    RunStep {
        module: String,
        step: String,
        staging_root: String,
        config: PerHostConfiguration,
    },
    /// Bind the given ports and hold them until stdin says stop
    Listen { ports: Vec<u16> },
    /// Remove the staging area; with `sweep`, also stale siblings of it
    Cleanup {
        staging_root: String,
        #[serde(default)]
        sweep: bool,
    },
}

impl CommandRequest {
    /// Name carried in `--command-class`
    pub fn class_name(&self) -> &'static str {
        match self {
            CommandRequest::Ping => "Ping",
            CommandRequest::Prepare { .. } => "Prepare",
            CommandRequest::RunChecks { .. } => "RunChecks",
            CommandRequest::RunStep { .. } => "RunStep",
            CommandRequest::Listen { .. } => "Listen",
            CommandRequest::Cleanup { .. } => "Cleanup",
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// The one JSON document a remote invocation writes to stdout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub version: u32,
    pub host: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Outcome {
    /// The command ran; findings, if any, are inside the report
    Ok { report: Report },
    /// The command could not run at all
    Failed { error: RemoteFault },
}

impl ResponseEnvelope {
    pub fn ok(host: impl Into<String>, report: Report) -> ResponseEnvelope {
        ResponseEnvelope {
            version: PROTOCOL_VERSION,
            host: host.into(),
            outcome: Outcome::Ok { report },
        }
    }

    pub fn failed(host: impl Into<String>, error: RemoteFault) -> ResponseEnvelope {
        ResponseEnvelope {
            version: PROTOCOL_VERSION,
            host: host.into(),
            outcome: Outcome::Failed { error },
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Failure the remote side can express inside an envelope
///
/// Anything that escapes as process exit status or stderr instead is turned
/// into a `RemoteError` by the invoking transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RemoteFault {
    #[error("configuration rejected: {message}")]
    Configuration { message: String },

    #[error("step '{step}' failed: {message}")]
    Execution { step: String, message: String },

    #[error("{message}")]
    Unsupported { message: String },
}

/// Decode a remote stdout payload into an envelope, enforcing the version
pub fn decode_response(host: &str, stdout: &[u8]) -> Result<ResponseEnvelope, RemoteError> {
    let envelope: ResponseEnvelope =
        serde_json::from_slice(stdout).map_err(|e| RemoteError::Decode {
            host: host.to_string(),
            message: e.to_string(),
        })?;
    if envelope.version != PROTOCOL_VERSION {
        return Err(RemoteError::Version {
            host: host.to_string(),
            version: envelope.version,
        });
    }
    Ok(envelope)
}
