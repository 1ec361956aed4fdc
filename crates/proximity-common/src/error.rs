use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error taxonomy. Variants carry the tag the spec's error
/// handling design assigns them (Validation / Conflict / Upstream /
/// Pipeline.Rollback / Internal); the HTTP layer maps each to a status
/// code and a sanitized message.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation: {0}")]
    Validation(String),

    #[error("conflict: app is {from:?}, action {action} is not permitted")]
    ConflictStatus { from: String, action: String },

    #[error("conflict: hostname {0} already in use")]
    ConflictHostname(String),

    #[error("conflict: app {0} has an operation already in flight")]
    ConflictBusy(String),

    #[error("IP pool exhausted for host {0}")]
    PoolExhausted(String),

    #[error("upstream (transient): {0}")]
    UpstreamTransient(String),

    #[error("upstream (permanent): {0}")]
    UpstreamPermanent(String),

    #[error("pipeline rollback at step {step}: {reason}")]
    PipelineRollback { step: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors the spec says must never be logged at error level
    /// (surfaced directly to the caller instead).
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }
}
