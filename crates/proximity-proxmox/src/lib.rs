pub mod client;
pub mod error;
pub mod retry;
pub mod types;

#[cfg(feature = "fake")]
pub mod fake;

pub use client::{ProxmoxApi, ProxmoxClient};
pub use error::UpstreamError;
pub use types::*;
