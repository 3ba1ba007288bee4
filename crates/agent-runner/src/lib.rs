//! Agent Runner - run engine for assistant runs
//!
//! This crate drives runs created against threads: it asks an agent
//! executor for each step, records the steps, parks runs on tool-call
//! batches and resumes them once the client answers.

mod client;
mod coordinator;
mod engine;
mod error;
mod event;
mod executor;
mod steps;

pub use client::HttpExecutor;
pub use coordinator::{SubmittedBatch, ToolCallCoordinator, DEFAULT_TOOL_OUTPUT_TIMEOUT};
pub use engine::{EngineConfig, RunEngine, RunOptions};
pub use error::{ExecutorError, Result};
pub use event::{RunEvent, EVENT_CHANNEL_CAPACITY};
pub use executor::{AgentExecutor, AssistantConfig, ExecuteRequest, ExecutorOutput};
pub use steps::RunStepRecorder;
