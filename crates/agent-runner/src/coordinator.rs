//! Tool-call coordinator
//!
//! Owns the pending tool-call batch of each run. Every operation here runs
//! under the run's entity lock, so a submission and a cancellation touching
//! the same run are always totally ordered.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use assistants_core::run::{
    PendingBatch, RequiredAction, RequiredToolCall, Run, RunStatus, StepDetails, StepStatus,
    StepToolCall, ToolCall, ToolOutput,
};
use assistants_core::{Error, InstanceStore, Result};

/// Default time a client has to answer a tool-call batch
pub const DEFAULT_TOOL_OUTPUT_TIMEOUT: Duration = Duration::from_secs(600);

/// A batch that was answered in full
#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    pub step_id: String,
    /// Outputs in the order the calls were raised
    pub outputs: Vec<ToolOutput>,
}

#[derive(Clone)]
pub struct ToolCallCoordinator {
    store: Arc<InstanceStore>,
    tool_output_timeout: Duration,
}

fn join_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> String {
    ids.into_iter().collect::<Vec<_>>().join(", ")
}

impl ToolCallCoordinator {
    pub fn new(store: Arc<InstanceStore>, tool_output_timeout: Duration) -> Self {
        Self {
            store,
            tool_output_timeout,
        }
    }

    /// Park the run on a new tool-call batch.
    ///
    /// Only an in-progress run without a pending batch can raise tool calls.
    /// On success the run is `requires_action` with the batch deadline set.
    pub async fn register_pending(
        &self,
        run_id: &str,
        step_id: &str,
        calls: &[StepToolCall],
    ) -> Result<Vec<ToolCall>> {
        if calls.is_empty() {
            return Err(Error::InvalidInput(
                "A tool-call batch needs at least one call".to_string(),
            ));
        }
        let timeout = chrono::Duration::from_std(self.tool_output_timeout)
            .map_err(|_| Error::InvalidInput("Tool output timeout is out of range".to_string()))?;

        let mut run = self.store.runs().lock(run_id).await?;
        if run.pending.is_some() {
            return Err(Error::Conflict(format!(
                "Run {} already has a pending tool-call batch",
                run.id
            )));
        }
        if run.status != RunStatus::InProgress {
            return Err(Error::InvalidState(format!(
                "Run {} is {}, tool calls can only be raised while in_progress",
                run.id, run.status
            )));
        }

        let mut registered = Vec::with_capacity(calls.len());
        for call in calls {
            let tool_call = ToolCall::for_step(&run.id, step_id, call);
            registered.push(self.store.tool_calls().create(tool_call).await?);
        }

        let deadline = Utc::now() + timeout;
        run.transition(RunStatus::RequiresAction)?;
        run.required_action = Some(RequiredAction {
            tool_calls: calls
                .iter()
                .map(|call| RequiredToolCall {
                    id: call.id.clone(),
                    function: call.function.clone(),
                })
                .collect(),
        });
        run.expires_at = Some(deadline);
        run.pending = Some(PendingBatch {
            step_id: step_id.to_string(),
            tool_call_ids: calls.iter().map(|call| call.id.clone()).collect(),
            deadline,
        });

        info!(
            "Run {} requires action: {} tool calls, due {}",
            run.id,
            calls.len(),
            deadline
        );
        Ok(registered)
    }

    /// Answer the run's pending batch.
    ///
    /// The submitted ids must be exactly the pending ids. Anything else is
    /// rejected without touching the batch. A full match records every
    /// output, closes the tool_calls step and moves the run back to
    /// `in_progress`; the caller then owns the run's next step.
    pub async fn submit_outputs(
        &self,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<SubmittedBatch> {
        let mut run = self.store.runs().lock(run_id).await?;
        match run.status {
            RunStatus::RequiresAction => {}
            RunStatus::Expired => {
                return Err(Error::ExpiredDeadline(format!(
                    "Run {} expired before its tool outputs arrived",
                    run.id
                )))
            }
            status => {
                return Err(Error::InvalidState(format!(
                    "Run {} is {}, not requires_action",
                    run.id, status
                )))
            }
        }
        if run.deadline_passed(Utc::now()) {
            return Err(Error::ExpiredDeadline(format!(
                "Tool output deadline of run {} has passed",
                run.id
            )));
        }
        let batch = run.pending.clone().ok_or_else(|| {
            Error::InvalidState(format!("Run {} has no pending tool-call batch", run.id))
        })?;

        let mut submitted = HashSet::new();
        for output in &outputs {
            if !submitted.insert(output.tool_call_id.as_str()) {
                return Err(Error::IncompleteSubmission(format!(
                    "Tool call {} was submitted more than once",
                    output.tool_call_id
                )));
            }
        }
        let expected: HashSet<&str> = batch.tool_call_ids.iter().map(String::as_str).collect();

        let unknown: Vec<&str> = outputs
            .iter()
            .map(|output| output.tool_call_id.as_str())
            .filter(|id| !expected.contains(id))
            .collect();
        if !unknown.is_empty() {
            return Err(Error::IncompleteSubmission(format!(
                "Tool calls {} are not pending on run {}",
                join_ids(unknown),
                run.id
            )));
        }

        let missing: Vec<&str> = batch
            .tool_call_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !submitted.contains(id))
            .collect();
        if !missing.is_empty() {
            return Err(Error::IncompleteSubmission(format!(
                "Missing outputs for tool calls {}",
                join_ids(missing)
            )));
        }

        // Reorder into the order the calls were raised
        let mut ordered = Vec::with_capacity(outputs.len());
        for id in &batch.tool_call_ids {
            if let Some(output) = outputs.iter().find(|output| &output.tool_call_id == id) {
                ordered.push(output.clone());
            }
        }

        let mut step_calls = Vec::with_capacity(ordered.len());
        for output in &ordered {
            let call = self
                .store
                .tool_calls()
                .update(&output.tool_call_id, |call| {
                    call.submit(output.output.clone())?;
                    Ok(call.clone())
                })
                .await?;
            step_calls.push(StepToolCall {
                id: call.id,
                function: call.function,
                output: call.output,
            });
        }

        self.store
            .run_steps()
            .update(&batch.step_id, |step| {
                step.finalize(
                    StepStatus::Completed,
                    Some(StepDetails::ToolCalls {
                        tool_calls: step_calls,
                    }),
                )
            })
            .await?;

        run.pending = None;
        run.transition(RunStatus::InProgress)?;

        info!("Run {} received {} tool outputs", run.id, ordered.len());
        Ok(SubmittedBatch {
            step_id: batch.step_id,
            outputs: ordered,
        })
    }

    /// Discard the pending batch of a cancelling run and close its step as
    /// cancelled. Returns the discarded batch, if there was one.
    pub async fn cancel_pending(&self, run_id: &str) -> Result<Option<PendingBatch>> {
        let mut run = self.store.runs().lock(run_id).await?;
        if run.status != RunStatus::Cancelling {
            return Err(Error::InvalidState(format!(
                "Run {} is {}, only a cancelling run drops its tool calls",
                run.id, run.status
            )));
        }

        let Some(batch) = run.pending.take() else {
            return Ok(None);
        };
        self.close_batch_step(&batch, StepStatus::Cancelled).await?;

        debug!(
            "Discarded {} pending tool calls of run {}",
            batch.tool_call_ids.len(),
            run.id
        );
        Ok(Some(batch))
    }

    /// Expire the run if its batch deadline is at or before `now`.
    /// Returns whether the run expired.
    pub async fn expire_if_due(&self, run_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut run = self.store.runs().lock(run_id).await?;
        if !run.deadline_passed(now) {
            return Ok(false);
        }

        if let Some(batch) = run.pending.take() {
            self.close_batch_step(&batch, StepStatus::Expired).await?;
        }
        run.transition(RunStatus::Expired)?;

        info!("Run {} expired waiting for tool outputs", run.id);
        Ok(true)
    }

    /// Ids of runs whose batch deadline is at or before `now`
    pub async fn overdue_runs(&self, now: DateTime<Utc>) -> Vec<String> {
        self.store
            .runs()
            .list()
            .await
            .into_iter()
            .filter(|run: &Run| run.deadline_passed(now))
            .map(|run| run.id)
            .collect()
    }

    async fn close_batch_step(&self, batch: &PendingBatch, status: StepStatus) -> Result<()> {
        self.store
            .run_steps()
            .update(&batch.step_id, |step| {
                if step.is_final() {
                    return Ok(());
                }
                step.finalize(status, None)
            })
            .await
    }
}
