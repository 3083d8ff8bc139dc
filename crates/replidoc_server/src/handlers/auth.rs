use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{AppendHeaders, IntoResponse, Json},
    routing::post,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::auth::Sessions;

/// Shared state for the login handler
#[derive(Clone)]
pub struct AuthState {
    pub sessions: Sessions,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Create auth routes
pub fn auth_routes(state: AuthState) -> Router {
    Router::new()
        .route("/auth", post(login))
        .with_state(state)
}

/// POST /api/auth - Exchange the password for a session token
///
/// The token is returned in the body and as a cookie so both API
/// clients and browsers can authenticate follow-up requests.
async fn login(State(state): State<AuthState>, Json(body): Json<LoginRequest>) -> impl IntoResponse {
    if body.password != state.password {
        warn!("login attempt with wrong password");
        return (StatusCode::UNAUTHORIZED, "Invalid password").into_response();
    }

    let token = state.sessions.issue();
    info!("issued new session token");

    let cookie = format!("token={token}; Path=/; HttpOnly; SameSite=Strict");
    (
        AppendHeaders([(header::SET_COOKIE, cookie)]),
        Json(LoginResponse { token }),
    )
        .into_response()
}
