pub mod auth;
pub mod chat;
pub mod error;
pub mod users;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
