pub mod api;
pub mod auth;

pub use api::{ApiState, api_routes};
pub use auth::{AuthState, auth_routes};
