//! Route handlers

pub mod assistants;
pub mod health;
pub mod runs;
pub mod threads;

use axum::{http::StatusCode, middleware, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use assistants_core::{Error, Page};

use crate::auth::require_auth;
use crate::state::AppState;

/// Every API route lives under this prefix
pub const API_PREFIX: &str = "/api/openai/v1";

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn map_core_error(err: Error) -> ApiError {
    let status = match &err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) | Error::InvalidState(_) => StatusCode::CONFLICT,
        Error::IncompleteSubmission(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::ExpiredDeadline(_) => StatusCode::GONE,
        Error::Executor(_) => StatusCode::BAD_GATEWAY,
        Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!("Request failed ({}): {}", err.kind(), err);
    } else {
        debug!("Request rejected ({}): {}", err.kind(), err);
    }
    error_response(status, err.to_string())
}

/// OpenAI list envelope
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub object: &'static str,
    pub data: Vec<T>,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
    pub has_more: bool,
}

impl<T> ListResponse<T> {
    pub fn from_page<U>(page: Page<U>, convert: impl FnMut(U) -> T) -> Self {
        Self {
            object: "list",
            data: page.data.into_iter().map(convert).collect(),
            first_id: page.first_id,
            last_id: page.last_id,
            has_more: page.has_more,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub id: String,
    pub object: &'static str,
    pub deleted: bool,
}

/// Timestamps go over the wire as unix seconds
pub fn unix(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .merge(assistants::router())
        .merge(threads::router())
        .merge(runs::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .nest(API_PREFIX, api)
        .merge(health::router())
        .with_state(state)
}

#[cfg(test)]
mod tests;
