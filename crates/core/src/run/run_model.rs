use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::tool_call::FunctionCall;
use crate::assistant::{Assistant, ToolSchema};
use crate::ids::{new_id, RUN_PREFIX};
use crate::store::Entity;
use crate::{Error, Result};

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Expired,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Completed | Self::Expired
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// The transition table. Anything not listed here is rejected.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;

        matches!(
            (self, next),
            (Queued, InProgress)
                | (Queued, Cancelling)
                | (Queued, Failed)
                | (InProgress, RequiresAction)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelling)
                | (RequiresAction, InProgress)
                | (RequiresAction, Cancelling)
                | (RequiresAction, Expired)
                | (Cancelling, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::RequiresAction => "requires_action",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error recorded on a failed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub code: String,
    pub message: String,
}

impl LastError {
    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            code: "server_error".to_string(),
            message: message.into(),
        }
    }
}

/// A tool call the client has to answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredToolCall {
    pub id: String,
    pub function: FunctionCall,
}

/// What a `requires_action` run is waiting for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredAction {
    pub tool_calls: Vec<RequiredToolCall>,
}

/// Outstanding tool-call batch. Engine bookkeeping, never serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    pub step_id: String,
    pub tool_call_ids: Vec<String>,
    pub deadline: DateTime<Utc>,
}

/// One execution attempt of an assistant against a thread
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub assistant_id: String,
    pub status: RunStatus,

    /// Assistant configuration captured when the run was created
    pub model: String,
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolSchema>,

    pub required_action: Option<RequiredAction>,
    pub last_error: Option<LastError>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Deadline of the pending tool-call batch while `requires_action`
    pub expires_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Step ids in creation order
    #[serde(default)]
    pub step_ids: Vec<String>,

    #[serde(skip)]
    pub pending: Option<PendingBatch>,

    /// Number of thread messages visible to this run. Messages appended to
    /// the thread later are left for the next run.
    #[serde(skip)]
    pub history_cutoff: u64,
}

impl Run {
    /// Create a queued run, snapshotting the assistant configuration
    pub fn new(thread_id: impl Into<String>, assistant: &Assistant, history_cutoff: u64) -> Self {
        Self {
            id: new_id(RUN_PREFIX),
            thread_id: thread_id.into(),
            assistant_id: assistant.id.clone(),
            status: RunStatus::Queued,
            model: assistant.model.clone(),
            instructions: assistant.instructions.clone(),
            tools: assistant.tools.clone(),
            required_action: None,
            last_error: None,
            created_at: Utc::now(),
            started_at: None,
            expires_at: None,
            cancelled_at: None,
            failed_at: None,
            completed_at: None,
            step_ids: Vec::new(),
            pending: None,
            history_cutoff,
        }
    }

    /// Move to `next`, stamping the matching timestamp
    pub fn transition(&mut self, next: RunStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "Run {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }

        let now = Utc::now();
        match next {
            RunStatus::InProgress if self.started_at.is_none() => self.started_at = Some(now),
            RunStatus::Cancelled => self.cancelled_at = Some(now),
            RunStatus::Failed => self.failed_at = Some(now),
            RunStatus::Completed => self.completed_at = Some(now),
            _ => {}
        }

        if self.status == RunStatus::RequiresAction {
            self.required_action = None;
            self.expires_at = None;
        }

        self.status = next;
        Ok(())
    }

    /// Mark the run as failed
    pub fn mark_failed(&mut self, error: LastError) -> Result<()> {
        self.transition(RunStatus::Failed)?;
        self.last_error = Some(error);
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the pending tool-call batch has outlived its deadline
    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.status == RunStatus::RequiresAction
            && self
                .pending
                .as_ref()
                .is_some_and(|batch| batch.deadline <= now)
    }

    pub fn step_count(&self) -> u64 {
        self.step_ids.len() as u64
    }
}

impl Entity for Run {
    const KIND: &'static str = "run";

    fn id(&self) -> &str {
        &self.id
    }
}
