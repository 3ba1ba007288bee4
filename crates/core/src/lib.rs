//! Core library for the assistants run engine
//!
//! This crate contains the shared domain model and storage:
//! - The in-memory instance store
//! - Assistant configurations
//! - Threads and messages
//! - Runs, run steps and tool calls

pub mod assistant;
pub mod error;
pub mod ids;
pub mod list;
pub mod run;
pub mod store;
pub mod thread;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use assistant::{Assistant, AssistantRegistry, AssistantUpdate, ToolSchema};
pub use list::{ListOrder, ListQuery, Page};
pub use run::{
    FunctionCall, LastError, RequiredAction, RequiredToolCall, Run, RunStatus, RunStep,
    StepDetails, StepStatus, StepToolCall, StepType, ToolCall, ToolCallStatus, ToolOutput,
};
pub use store::InstanceStore;
pub use thread::{ContentPart, Message, MessageRole, NewMessage, Thread, ThreadManager};
