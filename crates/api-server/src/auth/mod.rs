//! Bearer authentication for the API routes.
//!
//! A request is accepted when its bearer token is either a JWT signed with
//! the server secret or an API key whose SHA-256 digest is configured.

mod api_key;
mod jwt;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::debug;

use crate::config::ServerConfig;
use crate::routes::ErrorResponse;
use crate::state::AppState;

pub use api_key::{api_key_matches, digest_api_key};
pub use jwt::{issue_jwt, verify_jwt};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header")]
    MissingHeader,
    #[error("Authorization must be a Bearer token")]
    NotBearer,
    #[error("Invalid bearer token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// The authenticated caller
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    Token { subject: String },
    ApiKey,
    Anonymous,
}

#[derive(Debug, Clone)]
pub struct Authenticator {
    jwt_secret: String,
    api_key_digests: Vec<String>,
    disabled: bool,
}

impl Authenticator {
    pub fn new(jwt_secret: impl Into<String>, api_key_digests: Vec<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            api_key_digests,
            disabled: false,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        if config.auth_disabled {
            return Self::disabled();
        }
        Self::new(config.jwt_secret.clone(), config.api_key_digests.clone())
    }

    /// Accept every request. Only meant for local development.
    pub fn disabled() -> Self {
        Self {
            jwt_secret: String::new(),
            api_key_digests: Vec::new(),
            disabled: true,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn verify(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        if self.disabled {
            return Ok(Principal::Anonymous);
        }

        let token = extract_bearer_token(headers)?;
        if api_key_matches(token, &self.api_key_digests) {
            return Ok(Principal::ApiKey);
        }

        match verify_jwt(&self.jwt_secret, token) {
            Ok(claims) => Ok(Principal::Token {
                subject: claims.sub,
            }),
            Err(err) => {
                debug!("Rejected bearer token: {}", err);
                Err(AuthError::InvalidToken)
            }
        }
    }
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let auth_header = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingHeader)?;
    let auth_value = auth_header.to_str().map_err(|_| AuthError::NotBearer)?;
    auth_value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::NotBearer)
}

/// Middleware guarding every API route
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let principal = state.auth().verify(request.headers())?;
    debug!("{} {} as {:?}", request.method(), request.uri().path(), principal);
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
