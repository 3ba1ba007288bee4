//! The agent executor seam
//!
//! The run engine never talks to a model directly. Each step it hands the
//! run's visible history to an `AgentExecutor` and gets back either a message
//! or a batch of tool calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use assistants_core::{FunctionCall, Message, Run, ToolOutput, ToolSchema};

use crate::error::Result;

/// Assistant configuration as captured by the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub model: String,
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,
}

impl AssistantConfig {
    pub fn from_run(run: &Run) -> Self {
        Self {
            model: run.model.clone(),
            instructions: run.instructions.clone(),
            tools: run.tools.clone(),
        }
    }
}

/// Everything the executor needs for one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub run_id: String,
    pub thread_id: String,
    /// The run's visible history in thread order
    pub messages: Vec<Message>,
    pub assistant: AssistantConfig,
    /// Outputs submitted since the previous step, empty on the first step
    #[serde(default)]
    pub tool_outputs: Vec<ToolOutput>,
}

/// Result of one executor step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutorOutput {
    /// An assistant message. `finished` ends the run once it is recorded.
    Message {
        content: String,
        #[serde(default = "default_finished")]
        finished: bool,
    },
    /// Functions the client has to run before the run can continue
    ToolCalls { tool_calls: Vec<FunctionCall> },
}

fn default_finished() -> bool {
    true
}

impl ExecutorOutput {
    pub fn message(content: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            finished: true,
        }
    }

    pub fn tool_calls(tool_calls: Vec<FunctionCall>) -> Self {
        Self::ToolCalls { tool_calls }
    }
}

/// Produces the next step of a run. May take arbitrarily long.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecutorOutput>;
}
