pub mod crypto;
pub mod error;
pub mod types;
pub mod validation;

pub use error::{Error, Result};
pub use types::*;
