//! Run module
//!
//! Runs, their audit steps and the tool calls they raise.

mod run_model;
mod step;
mod tool_call;

pub use run_model::{
    LastError, PendingBatch, RequiredAction, RequiredToolCall, Run, RunStatus,
};
pub use step::{RunStep, StepDetails, StepStatus, StepToolCall, StepType};
pub use tool_call::{FunctionCall, ToolCall, ToolCallStatus, ToolOutput};
