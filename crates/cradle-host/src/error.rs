use thiserror::Error;

use cradle_config::ConfigError;
use cradle_sandbox::{EntryPoint, SandboxStateError};
use cradle_snapshot::SnapshotError;

/// A break of the host/core threading or state contract. Always fatal for the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("worker start requested while worker {entry} is still active")]
    WorkerAlreadyActive { entry: EntryPoint },

    #[error("worker entry point changed across state load ({before:?} -> {after:?})")]
    EntryPointMismatch {
        before: Option<EntryPoint>,
        after: Option<EntryPoint>,
    },

    #[error("frame worker {entry} panicked")]
    WorkerPanicked { entry: EntryPoint },

    #[error("worker start requested but the core exports no worker entry point")]
    WorkerNotExported,

    #[error("failed to spawn frame worker {entry}: {reason}")]
    WorkerSpawnFailed { entry: EntryPoint, reason: String },
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("required resource is missing: {key}")]
    MissingResource { key: String },

    #[error("core rejected the load configuration: {0}")]
    InitFailure(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),

    #[error("state serialization failed: {0}")]
    Serialization(#[from] SnapshotError),

    #[error("core rejected the state image: {0}")]
    CoreState(#[from] SandboxStateError),

    #[error("session was aborted by an earlier fatal error")]
    SessionAborted,
}

impl From<ConfigError> for HostError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Configuration(msg) => HostError::Configuration(msg),
            ConfigError::MissingResource { key } => HostError::MissingResource { key },
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;
