//! Thread and message API endpoints

use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use assistants_core::{ContentPart, ListQuery, Message, MessageRole, NewMessage, Thread};

use super::{
    error_response, map_core_error, unix, ApiError, ApiResult, DeletedResponse, ListResponse,
};
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

/// Message body: plain text or a list of typed parts
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

fn default_role() -> MessageRole {
    MessageRole::User
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRequest {
    #[serde(default = "default_role")]
    pub role: MessageRole,
    pub content: MessageContent,
}

impl MessageRequest {
    /// Clients may only author user and assistant messages
    pub(crate) fn into_new_message(self) -> Result<NewMessage, ApiError> {
        if !matches!(self.role, MessageRole::User | MessageRole::Assistant) {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("Messages cannot be created with role '{}'", self.role.as_str()),
            ));
        }

        let content = match self.content {
            MessageContent::Text(text) => vec![ContentPart::text(text)],
            MessageContent::Parts(parts) => parts,
        };
        Ok(NewMessage {
            role: self.role,
            content,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub messages: Vec<MessageRequest>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ModifyThreadRequest {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ThreadResponse {
    pub id: String,
    pub object: &'static str,
    pub created_at: i64,
    pub metadata: HashMap<String, String>,
}

impl From<Thread> for ThreadResponse {
    fn from(thread: Thread) -> Self {
        Self {
            id: thread.id,
            object: "thread",
            created_at: unix(thread.created_at),
            metadata: thread.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub object: &'static str,
    pub created_at: i64,
    pub thread_id: String,
    pub role: MessageRole,
    pub content: Vec<ContentPart>,
    pub run_id: Option<String>,
}

impl From<Message> for MessageResponse {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            object: "thread.message",
            created_at: unix(message.created_at),
            thread_id: message.thread_id,
            role: message.role,
            content: message.content,
            run_id: message.run_id,
        }
    }
}

/// Parse a JSON body that may be left out entirely
pub(crate) fn optional_json<T>(body: &Bytes) -> Result<T, ApiError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        error_response(
            StatusCode::BAD_REQUEST,
            format!("Invalid request body: {}", err),
        )
    })
}

pub(crate) fn into_new_messages(
    messages: Vec<MessageRequest>,
) -> Result<Vec<NewMessage>, ApiError> {
    messages
        .into_iter()
        .map(MessageRequest::into_new_message)
        .collect()
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_thread(State(state): State<AppState>, body: Bytes) -> ApiResult<ThreadResponse> {
    let req: CreateThreadRequest = optional_json(&body)?;
    let messages = into_new_messages(req.messages)?;
    let threads = state.engine().threads();

    let thread = threads
        .create_thread(req.metadata)
        .await
        .map_err(map_core_error)?;
    for message in messages {
        if let Err(err) = threads
            .add_message(&thread.id, message.role, message.content)
            .await
        {
            if let Err(cleanup) = threads.delete_thread(&thread.id).await {
                warn!("Failed to remove partial thread {}: {}", thread.id, cleanup);
            }
            return Err(map_core_error(err));
        }
    }

    Ok(Json(thread.into()))
}

async fn get_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<ThreadResponse> {
    let thread = state
        .engine()
        .threads()
        .get_thread(&thread_id)
        .await
        .map_err(map_core_error)?;
    Ok(Json(thread.into()))
}

async fn modify_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(req): Json<ModifyThreadRequest>,
) -> ApiResult<ThreadResponse> {
    let thread = state
        .engine()
        .threads()
        .modify_thread(&thread_id, req.metadata)
        .await
        .map_err(map_core_error)?;
    Ok(Json(thread.into()))
}

async fn delete_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<DeletedResponse> {
    state
        .engine()
        .threads()
        .delete_thread(&thread_id)
        .await
        .map_err(map_core_error)?;

    Ok(Json(DeletedResponse {
        id: thread_id,
        object: "thread.deleted",
        deleted: true,
    }))
}

async fn create_message(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> ApiResult<MessageResponse> {
    let message = req.into_new_message()?;
    let message = state
        .engine()
        .threads()
        .add_message(&thread_id, message.role, message.content)
        .await
        .map_err(map_core_error)?;
    Ok(Json(message.into()))
}

async fn list_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ListResponse<MessageResponse>> {
    let page = state
        .engine()
        .threads()
        .list_messages_page(&thread_id, &query)
        .await
        .map_err(map_core_error)?;
    Ok(Json(ListResponse::from_page(page, MessageResponse::from)))
}

async fn get_message(
    State(state): State<AppState>,
    Path((thread_id, message_id)): Path<(String, String)>,
) -> ApiResult<MessageResponse> {
    let message = state
        .engine()
        .threads()
        .get_message(&thread_id, &message_id)
        .await
        .map_err(map_core_error)?;
    Ok(Json(message.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/threads", post(create_thread))
        .route(
            "/threads/{thread_id}",
            get(get_thread).post(modify_thread).delete(delete_thread),
        )
        .route(
            "/threads/{thread_id}/messages",
            get(list_messages).post(create_message),
        )
        .route(
            "/threads/{thread_id}/messages/{message_id}",
            get(get_message),
        )
}
