use std::sync::Arc;

use super::table::Table;
use crate::assistant::Assistant;
use crate::run::{Run, RunStep, ToolCall};
use crate::thread::{Message, Thread};

/// Registry of every entity kind, one table each
#[derive(Default)]
pub struct InstanceStore {
    assistants: Table<Assistant>,
    threads: Table<Thread>,
    messages: Table<Message>,
    runs: Table<Run>,
    run_steps: Table<RunStep>,
    tool_calls: Table<ToolCall>,
}

impl InstanceStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store ready to be shared between components
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn assistants(&self) -> &Table<Assistant> {
        &self.assistants
    }

    pub fn threads(&self) -> &Table<Thread> {
        &self.threads
    }

    pub fn messages(&self) -> &Table<Message> {
        &self.messages
    }

    pub fn runs(&self) -> &Table<Run> {
        &self.runs
    }

    pub fn run_steps(&self) -> &Table<RunStep> {
        &self.run_steps
    }

    pub fn tool_calls(&self) -> &Table<ToolCall> {
        &self.tool_calls
    }
}
