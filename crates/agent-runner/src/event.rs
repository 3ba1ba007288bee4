//! Event types for run execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use assistants_core::{Run, RunStatus};

/// Default capacity of the run event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast whenever a run changes status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    pub thread_id: String,
    pub status: RunStatus,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    /// Create a status event for the run's current status
    pub fn from_run(run: &Run) -> Self {
        Self {
            run_id: run.id.clone(),
            thread_id: run.thread_id.clone(),
            status: run.status,
            timestamp: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
