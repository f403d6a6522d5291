use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxStateError {
    #[error("core state is truncated: expected at least {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("core state is malformed: {0}")]
    Malformed(&'static str),
}

/// Why the host refused a worker start request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartRefused {
    #[error("a frame worker is already running")]
    AlreadyActive,

    #[error("no worker entry point is armed")]
    NotArmed,

    #[error("failed to spawn frame worker: {0}")]
    SpawnFailed(String),
}
