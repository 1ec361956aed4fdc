pub mod api;
pub mod auth;
pub mod catalog;
pub mod error;
pub mod handlers;
pub mod state;

pub use api::create_router;
pub use state::{AppState, ServerConfig};
