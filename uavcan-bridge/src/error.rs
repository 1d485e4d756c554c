//! Error types shared across the bridge.
//!
//! Remote-call problems are split in two: a [`SubmitError`] is returned
//! synchronously when a call cannot be handed to the transport, a
//! [`CallFailure`] arrives later as the outcome of a call that was submitted.
//! Neither is ever fatal to the orchestrator loop.

use crate::service::CallKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json5(#[from] json5::Error),

    #[error("failed to convert config value: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config override '{0}', expected 'key=value'")]
    InvalidOverride(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(std::io::Error),

    #[error("worker thread panicked")]
    WorkerPanicked,
}

/// A call rejected before it reached the bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// The client already holds its maximum number of outstanding calls.
    #[error("{kind} client is busy")]
    Busy { kind: CallKind },

    /// The transport refused the call (e.g. no free transfer slot).
    #[error("transport rejected call: {code}")]
    Transport { code: i32 },
}

/// The outcome of a submitted call that did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallFailure {
    #[error("no response before deadline")]
    Timeout,

    #[error("rejected by remote: {reason}")]
    Rejected { reason: String },

    /// The transport delivered a response of a different service type.
    #[error("response does not match the request type")]
    Malformed,
}

/// A negative result from driving bus I/O.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bus spin error {code}")]
pub struct BusError {
    pub code: i32,
}
