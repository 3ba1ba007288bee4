//! Run step model definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run_model::LastError;
use super::tool_call::FunctionCall;
use crate::ids::{new_id, STEP_PREFIX, TOOL_CALL_PREFIX};
use crate::store::Entity;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    MessageCreation,
    ToolCalls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl StepStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// A tool call as it appears in a step's audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepToolCall {
    pub id: String,
    pub function: FunctionCall,
    pub output: Option<String>,
}

impl StepToolCall {
    /// A freshly announced call with a new id and no output yet
    pub fn pending(function: FunctionCall) -> Self {
        Self {
            id: new_id(TOOL_CALL_PREFIX),
            function,
            output: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepDetails {
    MessageCreation { message_id: Option<String> },
    ToolCalls { tool_calls: Vec<StepToolCall> },
}

impl StepDetails {
    pub fn step_type(&self) -> StepType {
        match self {
            Self::MessageCreation { .. } => StepType::MessageCreation,
            Self::ToolCalls { .. } => StepType::ToolCalls,
        }
    }
}

/// Audit record of one unit of run progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    pub id: String,
    pub run_id: String,
    pub thread_id: String,
    pub step_type: StepType,
    pub status: StepStatus,
    pub details: StepDetails,
    /// Position within the run, starting at zero
    pub seq: u64,
    pub last_error: Option<LastError>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl RunStep {
    pub fn new(
        run_id: impl Into<String>,
        thread_id: impl Into<String>,
        seq: u64,
        details: StepDetails,
    ) -> Self {
        Self {
            id: new_id(STEP_PREFIX),
            run_id: run_id.into(),
            thread_id: thread_id.into(),
            step_type: details.step_type(),
            status: StepStatus::InProgress,
            details,
            seq,
            last_error: None,
            created_at: Utc::now(),
            finalized_at: None,
        }
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }

    /// Close the step. Nothing changes afterwards.
    pub fn finalize(&mut self, status: StepStatus, details: Option<StepDetails>) -> Result<()> {
        if self.is_final() {
            return Err(Error::InvalidState(format!(
                "Run step {} is already finalized",
                self.id
            )));
        }
        if !status.is_final() {
            return Err(Error::InvalidInput(
                "A step can only be finalized into a final status".to_string(),
            ));
        }
        if let Some(details) = details {
            if details.step_type() != self.step_type {
                return Err(Error::InvalidInput(format!(
                    "Step {} details do not match its type",
                    self.id
                )));
            }
            self.details = details;
        }

        self.status = status;
        self.finalized_at = Some(Utc::now());
        Ok(())
    }
}

impl Entity for RunStep {
    const KIND: &'static str = "run step";

    fn id(&self) -> &str {
        &self.id
    }
}
