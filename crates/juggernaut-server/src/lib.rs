pub mod error;
pub mod event_bridge;
pub mod handlers;
pub mod server;
pub mod sessions;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use sessions::ActiveSessions;
