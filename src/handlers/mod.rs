//! HTTP handlers for the waypoint API.

pub mod auth;
pub mod error;
pub mod rest;

pub use auth::{AuthError, BasicCredentials};
pub use error::ApiError;
pub use rest::{router, serve, AppState};
