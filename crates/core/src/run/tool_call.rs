//! Tool call model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::StepToolCall;
use crate::store::Entity;
use crate::{Error, Result};

/// Function name plus raw JSON arguments, as produced by the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Submitted,
}

/// A client-supplied result for one tool call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

impl ToolOutput {
    pub fn new(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
        }
    }
}

/// A function-execution round trip raised by the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub run_id: String,
    pub step_id: String,
    pub function: FunctionCall,
    pub status: ToolCallStatus,
    pub output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl ToolCall {
    /// Track a call announced in a tool_calls step. The call keeps the id the
    /// step already handed out.
    pub fn for_step(
        run_id: impl Into<String>,
        step_id: impl Into<String>,
        call: &StepToolCall,
    ) -> Self {
        Self {
            id: call.id.clone(),
            run_id: run_id.into(),
            step_id: step_id.into(),
            function: call.function.clone(),
            status: ToolCallStatus::Pending,
            output: None,
            created_at: Utc::now(),
            submitted_at: None,
        }
    }

    /// Record the output. A call is answered exactly once.
    pub fn submit(&mut self, output: impl Into<String>) -> Result<()> {
        if self.status == ToolCallStatus::Submitted {
            return Err(Error::InvalidState(format!(
                "Tool call {} was already submitted",
                self.id
            )));
        }
        self.status = ToolCallStatus::Submitted;
        self.output = Some(output.into());
        self.submitted_at = Some(Utc::now());
        Ok(())
    }
}

impl Entity for ToolCall {
    const KIND: &'static str = "tool call";

    fn id(&self) -> &str {
        &self.id
    }
}
