//! Assistant API endpoints

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use assistants_core::{Assistant, AssistantUpdate, ListQuery, Page, ToolSchema};

use super::{
    error_response, map_core_error, unix, ApiError, ApiResult, DeletedResponse, ListResponse,
};
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

/// A tool in the OpenAI wire shape. Only function tools are supported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<ToolSchema>,
}

impl From<ToolSchema> for ToolDefinition {
    fn from(schema: ToolSchema) -> Self {
        Self {
            kind: "function".to_string(),
            function: Some(schema),
        }
    }
}

pub(crate) fn parse_tools(tools: Vec<ToolDefinition>) -> Result<Vec<ToolSchema>, ApiError> {
    tools
        .into_iter()
        .map(|tool| match (tool.kind.as_str(), tool.function) {
            ("function", Some(function)) => Ok(function),
            ("function", None) => Err(error_response(
                StatusCode::BAD_REQUEST,
                "Function tools need a 'function' definition",
            )),
            (other, _) => Err(error_response(
                StatusCode::BAD_REQUEST,
                format!("Unsupported tool type '{}'", other),
            )),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct CreateAssistantRequest {
    pub model: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Deserialize)]
pub struct ModifyAssistantRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,
}

#[derive(Debug, Serialize)]
pub struct AssistantResponse {
    pub id: String,
    pub object: &'static str,
    pub created_at: i64,
    pub name: Option<String>,
    pub model: String,
    pub instructions: Option<String>,
    pub tools: Vec<ToolDefinition>,
}

impl From<Assistant> for AssistantResponse {
    fn from(assistant: Assistant) -> Self {
        Self {
            id: assistant.id,
            object: "assistant",
            created_at: unix(assistant.created_at),
            name: assistant.name,
            model: assistant.model,
            instructions: assistant.instructions,
            tools: assistant.tools.into_iter().map(ToolDefinition::from).collect(),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_assistant(
    State(state): State<AppState>,
    Json(req): Json<CreateAssistantRequest>,
) -> ApiResult<AssistantResponse> {
    let tools = parse_tools(req.tools)?;

    let mut assistant = Assistant::new(req.model).with_tools(tools);
    assistant.name = req.name;
    assistant.instructions = req.instructions;

    let assistant = state
        .engine()
        .assistants()
        .create(assistant)
        .await
        .map_err(map_core_error)?;
    Ok(Json(assistant.into()))
}

async fn list_assistants(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ListResponse<AssistantResponse>> {
    // The registry hands back newest first; windows work over creation order
    let mut assistants = state.engine().assistants().list().await;
    assistants.reverse();

    let ids: Vec<String> = assistants.iter().map(|a| a.id.clone()).collect();
    let (window, has_more) = query.window(&ids).map_err(map_core_error)?;

    let mut by_id: HashMap<String, Assistant> =
        assistants.into_iter().map(|a| (a.id.clone(), a)).collect();
    let data: Vec<Assistant> = window
        .into_iter()
        .filter_map(|id| by_id.remove(id))
        .collect();

    Ok(Json(ListResponse::from_page(
        Page::new(data, has_more),
        AssistantResponse::from,
    )))
}

async fn get_assistant(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
) -> ApiResult<AssistantResponse> {
    let assistant = state
        .engine()
        .assistants()
        .get(&assistant_id)
        .await
        .map_err(map_core_error)?;
    Ok(Json(assistant.into()))
}

async fn modify_assistant(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
    Json(req): Json<ModifyAssistantRequest>,
) -> ApiResult<AssistantResponse> {
    let tools = req.tools.map(parse_tools).transpose()?;
    let update = AssistantUpdate {
        model: req.model,
        name: req.name,
        instructions: req.instructions,
        tools,
    };

    let assistant = state
        .engine()
        .assistants()
        .modify(&assistant_id, update)
        .await
        .map_err(map_core_error)?;
    Ok(Json(assistant.into()))
}

async fn delete_assistant(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
) -> ApiResult<DeletedResponse> {
    state
        .engine()
        .assistants()
        .delete(&assistant_id)
        .await
        .map_err(map_core_error)?;

    Ok(Json(DeletedResponse {
        id: assistant_id,
        object: "assistant.deleted",
        deleted: true,
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/assistants", get(list_assistants).post(create_assistant))
        .route(
            "/assistants/{assistant_id}",
            get(get_assistant)
                .post(modify_assistant)
                .delete(delete_assistant),
        )
}
