use thiserror::Error;

/// Proxmox-specific failure classification. Every operation on
/// [`crate::ProxmoxApi`] returns one of these tags on failure so the
/// Deployment Pipeline and Lifecycle Controller can decide whether to
/// retry, surface, or roll back.
#[derive(Debug, Error, Clone)]
pub enum UpstreamError {
    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("resource busy: {0}")]
    ResourceBusy(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, UpstreamError>;

impl From<UpstreamError> for proximity_common::Error {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::Transient(m) => proximity_common::Error::UpstreamTransient(m),
            UpstreamError::NotFound(m) => proximity_common::Error::NotFound(m),
            UpstreamError::AuthFailed(m) => proximity_common::Error::UpstreamPermanent(m),
            UpstreamError::ResourceBusy(m) => proximity_common::Error::UpstreamTransient(m),
            UpstreamError::Permanent(m) => proximity_common::Error::UpstreamPermanent(m),
        }
    }
}
