//! Run and run step API endpoints

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use agent_runner::RunOptions;
use assistants_core::{
    Error, FunctionCall, LastError, ListQuery, RequiredAction, Run, RunStatus, RunStep,
    StepDetails, StepStatus, StepType, ToolOutput,
};

use super::assistants::ToolDefinition;
use super::threads::{into_new_messages, MessageRequest};
use super::{map_core_error, unix, ApiError, ApiResult, ListResponse};
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateRunRequest {
    pub assistant_id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ThreadSeed {
    #[serde(default)]
    pub messages: Vec<MessageRequest>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateThreadAndRunRequest {
    pub assistant_id: String,
    #[serde(default)]
    pub thread: ThreadSeed,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitToolOutputsRequest {
    pub tool_outputs: Vec<ToolOutput>,
}

#[derive(Debug, Serialize)]
pub struct RequiredToolCallResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionCall,
}

#[derive(Debug, Serialize)]
pub struct SubmitToolOutputsAction {
    pub tool_calls: Vec<RequiredToolCallResponse>,
}

#[derive(Debug, Serialize)]
pub struct RequiredActionResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub submit_tool_outputs: SubmitToolOutputsAction,
}

impl From<RequiredAction> for RequiredActionResponse {
    fn from(action: RequiredAction) -> Self {
        Self {
            kind: "submit_tool_outputs",
            submit_tool_outputs: SubmitToolOutputsAction {
                tool_calls: action
                    .tool_calls
                    .into_iter()
                    .map(|call| RequiredToolCallResponse {
                        id: call.id,
                        kind: "function",
                        function: call.function,
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub id: String,
    pub object: &'static str,
    pub created_at: i64,
    pub thread_id: String,
    pub assistant_id: String,
    pub status: RunStatus,
    pub required_action: Option<RequiredActionResponse>,
    pub last_error: Option<LastError>,
    pub expires_at: Option<i64>,
    pub started_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub model: String,
    pub instructions: Option<String>,
    pub tools: Vec<ToolDefinition>,
}

impl From<Run> for RunResponse {
    fn from(run: Run) -> Self {
        Self {
            id: run.id,
            object: "thread.run",
            created_at: unix(run.created_at),
            thread_id: run.thread_id,
            assistant_id: run.assistant_id,
            status: run.status,
            required_action: run.required_action.map(RequiredActionResponse::from),
            last_error: run.last_error,
            expires_at: run.expires_at.map(unix),
            started_at: run.started_at.map(unix),
            cancelled_at: run.cancelled_at.map(unix),
            failed_at: run.failed_at.map(unix),
            completed_at: run.completed_at.map(unix),
            model: run.model,
            instructions: run.instructions,
            tools: run.tools.into_iter().map(ToolDefinition::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageCreationDetails {
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StepFunctionResponse {
    pub name: String,
    pub arguments: String,
    pub output: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StepToolCallResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: StepFunctionResponse,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDetailsResponse {
    MessageCreation {
        message_creation: MessageCreationDetails,
    },
    ToolCalls {
        tool_calls: Vec<StepToolCallResponse>,
    },
}

impl From<StepDetails> for StepDetailsResponse {
    fn from(details: StepDetails) -> Self {
        match details {
            StepDetails::MessageCreation { message_id } => Self::MessageCreation {
                message_creation: MessageCreationDetails { message_id },
            },
            StepDetails::ToolCalls { tool_calls } => Self::ToolCalls {
                tool_calls: tool_calls
                    .into_iter()
                    .map(|call| StepToolCallResponse {
                        id: call.id,
                        kind: "function",
                        function: StepFunctionResponse {
                            name: call.function.name,
                            arguments: call.function.arguments,
                            output: call.output,
                        },
                    })
                    .collect(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RunStepResponse {
    pub id: String,
    pub object: &'static str,
    pub created_at: i64,
    pub run_id: String,
    pub thread_id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    pub status: StepStatus,
    pub step_details: StepDetailsResponse,
    pub last_error: Option<LastError>,
    pub completed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub expired_at: Option<i64>,
}

impl From<RunStep> for RunStepResponse {
    fn from(step: RunStep) -> Self {
        let closed_at = |status: StepStatus| step.finalized_at.filter(|_| step.status == status);
        let completed_at = closed_at(StepStatus::Completed).map(unix);
        let cancelled_at = closed_at(StepStatus::Cancelled).map(unix);
        let failed_at = closed_at(StepStatus::Failed).map(unix);
        let expired_at = closed_at(StepStatus::Expired).map(unix);

        Self {
            id: step.id,
            object: "thread.run.step",
            created_at: unix(step.created_at),
            run_id: step.run_id,
            thread_id: step.thread_id,
            step_type: step.step_type,
            status: step.status,
            step_details: step.details.into(),
            last_error: step.last_error,
            completed_at,
            cancelled_at,
            failed_at,
            expired_at,
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Load a run and make sure it belongs to the thread in the path
async fn run_on_thread(state: &AppState, thread_id: &str, run_id: &str) -> Result<Run, ApiError> {
    let run = state.engine().get_run(run_id).await.map_err(map_core_error)?;
    if run.thread_id != thread_id {
        return Err(map_core_error(Error::NotFound(format!(
            "run {} on thread {}",
            run_id, thread_id
        ))));
    }
    Ok(run)
}

async fn create_run(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(req): Json<CreateRunRequest>,
) -> ApiResult<RunResponse> {
    let options = RunOptions {
        model: req.model,
        instructions: req.instructions,
    };
    let run = state
        .engine()
        .create_run_with(&thread_id, &req.assistant_id, options)
        .await
        .map_err(map_core_error)?;
    Ok(Json(run.into()))
}

async fn create_thread_and_run(
    State(state): State<AppState>,
    Json(req): Json<CreateThreadAndRunRequest>,
) -> ApiResult<RunResponse> {
    let messages = into_new_messages(req.thread.messages)?;
    let options = RunOptions {
        model: req.model,
        instructions: req.instructions,
    };

    let (thread, run) = state
        .engine()
        .create_thread_and_run(&req.assistant_id, req.thread.metadata, messages, options)
        .await
        .map_err(map_core_error)?;
    info!("Started run {} on new thread {}", run.id, thread.id);
    Ok(Json(run.into()))
}

async fn list_runs(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ListResponse<RunResponse>> {
    let page = state
        .engine()
        .list_runs(&thread_id, &query)
        .await
        .map_err(map_core_error)?;
    Ok(Json(ListResponse::from_page(page, RunResponse::from)))
}

async fn get_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> ApiResult<RunResponse> {
    let run = run_on_thread(&state, &thread_id, &run_id).await?;
    Ok(Json(run.into()))
}

async fn cancel_run(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
) -> ApiResult<RunResponse> {
    run_on_thread(&state, &thread_id, &run_id).await?;
    let run = state
        .engine()
        .request_cancel(&run_id)
        .await
        .map_err(map_core_error)?;
    Ok(Json(run.into()))
}

async fn submit_tool_outputs(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
    Json(req): Json<SubmitToolOutputsRequest>,
) -> ApiResult<RunResponse> {
    run_on_thread(&state, &thread_id, &run_id).await?;
    let run = state
        .engine()
        .submit_tool_outputs(&run_id, req.tool_outputs)
        .await
        .map_err(map_core_error)?;
    Ok(Json(run.into()))
}

async fn list_steps(
    State(state): State<AppState>,
    Path((thread_id, run_id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> ApiResult<ListResponse<RunStepResponse>> {
    run_on_thread(&state, &thread_id, &run_id).await?;
    let page = state
        .engine()
        .list_steps_page(&run_id, &query)
        .await
        .map_err(map_core_error)?;
    Ok(Json(ListResponse::from_page(page, RunStepResponse::from)))
}

async fn get_step(
    State(state): State<AppState>,
    Path((thread_id, run_id, step_id)): Path<(String, String, String)>,
) -> ApiResult<RunStepResponse> {
    run_on_thread(&state, &thread_id, &run_id).await?;
    let step = state
        .engine()
        .get_step(&run_id, &step_id)
        .await
        .map_err(map_core_error)?;
    Ok(Json(step.into()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/threads/runs", post(create_thread_and_run))
        .route(
            "/threads/{thread_id}/runs",
            get(list_runs).post(create_run),
        )
        .route("/threads/{thread_id}/runs/{run_id}", get(get_run))
        .route("/threads/{thread_id}/runs/{run_id}/cancel", post(cancel_run))
        .route(
            "/threads/{thread_id}/runs/{run_id}/submit_tool_outputs",
            post(submit_tool_outputs),
        )
        .route("/threads/{thread_id}/runs/{run_id}/steps", get(list_steps))
        .route(
            "/threads/{thread_id}/runs/{run_id}/steps/{step_id}",
            get(get_step),
        )
}
