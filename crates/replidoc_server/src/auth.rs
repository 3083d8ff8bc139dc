use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, header, request::Parts},
};
use rand::{Rng, distributions::Alphanumeric};

const TOKEN_LENGTH: usize = 48;

/// In-memory session token store. Tokens live until the process exits;
/// clients re-login after a restart.
#[derive(Clone, Default)]
pub struct Sessions {
    tokens: Arc<Mutex<HashSet<String>>>,
}

impl Sessions {
    pub fn new() -> Self {
        Sessions::default()
    }

    /// Issue a fresh session token
    pub fn issue(&self) -> String {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        self.tokens().insert(token.clone());
        token
    }

    /// True if `token` was issued by this process
    pub fn is_valid(&self, token: &str) -> bool {
        self.tokens().contains(token)
    }

    fn tokens(&self) -> MutexGuard<'_, HashSet<String>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Extension for extracting auth from requests
#[derive(Clone)]
pub struct AuthExtractor {
    pub sessions: Sessions,
}

/// Extractor for required authentication
///
/// Use this for protected endpoints - returns 401 if no valid session
/// token is presented.
#[derive(Debug, Clone)]
pub struct RequireAuth(pub String);

impl AuthExtractor {
    pub fn new(sessions: Sessions) -> Self {
        Self { sessions }
    }

    /// Extract a valid session token from the Authorization header or
    /// the `token` cookie.
    pub fn extract_token(&self, parts: &Parts) -> Option<String> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|s| s.to_string());

        let token = token.or_else(|| {
            parts
                .headers
                .get(header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .and_then(|cookies| {
                    cookies
                        .split(';')
                        .map(str::trim)
                        .find_map(|c| c.strip_prefix("token="))
                        .map(|s| s.to_string())
                })
        });

        let token = token?;
        self.sessions.is_valid(&token).then_some(token)
    }
}

impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let extractor = parts
            .extensions
            .get::<AuthExtractor>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Auth not configured"))?;

        match extractor.extract_token(parts) {
            Some(token) => Ok(RequireAuth(token)),
            None => Err((StatusCode::UNAUTHORIZED, "Authentication required")),
        }
    }
}
