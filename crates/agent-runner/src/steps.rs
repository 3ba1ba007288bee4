//! Run step recorder: the append-only audit trail of a run

use std::sync::Arc;

use tracing::debug;

use assistants_core::run::{LastError, RunStep, StepDetails, StepStatus};
use assistants_core::{Error, InstanceStore, ListQuery, Page, Result};

#[derive(Clone)]
pub struct RunStepRecorder {
    store: Arc<InstanceStore>,
}

impl RunStepRecorder {
    pub fn new(store: Arc<InstanceStore>) -> Self {
        Self { store }
    }

    /// Open a new in-progress step at the end of the run's step list.
    /// The step type follows from `details`.
    pub async fn record_step(&self, run_id: &str, details: StepDetails) -> Result<RunStep> {
        let mut run = self.store.runs().lock(run_id).await?;
        if run.is_terminal() {
            return Err(Error::InvalidState(format!(
                "Run {} is {}, no further steps can be recorded",
                run.id, run.status
            )));
        }

        let step = RunStep::new(&run.id, &run.thread_id, run.step_count(), details);
        let step = self.store.run_steps().create(step).await?;
        run.step_ids.push(step.id.clone());

        debug!(
            "Recorded step {} ({:?}) for run {}",
            step.id, step.step_type, run.id
        );
        Ok(step)
    }

    /// Close a step. `details` replaces the recorded details when given.
    pub async fn finalize_step(
        &self,
        step_id: &str,
        status: StepStatus,
        details: Option<StepDetails>,
    ) -> Result<RunStep> {
        self.store
            .run_steps()
            .update(step_id, |step| {
                step.finalize(status, details)?;
                Ok(step.clone())
            })
            .await
    }

    /// Close a step as failed, keeping the reason
    pub async fn fail_step(&self, step_id: &str, error: LastError) -> Result<RunStep> {
        self.store
            .run_steps()
            .update(step_id, |step| {
                step.finalize(StepStatus::Failed, None)?;
                step.last_error = Some(error);
                Ok(step.clone())
            })
            .await
    }

    /// Every step of a run in creation order
    pub async fn list_steps(&self, run_id: &str) -> Result<Vec<RunStep>> {
        let run = self.store.runs().get(run_id).await?;

        let mut steps = Vec::with_capacity(run.step_ids.len());
        for step_id in &run.step_ids {
            steps.push(self.store.run_steps().get(step_id).await?);
        }
        Ok(steps)
    }

    pub async fn list_steps_page(&self, run_id: &str, query: &ListQuery) -> Result<Page<RunStep>> {
        let run = self.store.runs().get(run_id).await?;
        let (window, has_more) = query.window(&run.step_ids)?;

        let mut data = Vec::with_capacity(window.len());
        for step_id in window {
            data.push(self.store.run_steps().get(step_id).await?);
        }
        Ok(Page::new(data, has_more))
    }

    pub async fn get_step(&self, run_id: &str, step_id: &str) -> Result<RunStep> {
        let step = self.store.run_steps().get(step_id).await?;
        if step.run_id != run_id {
            return Err(Error::NotFound(format!("run step {}", step_id)));
        }
        Ok(step)
    }

    /// The run's most recent step if it is still open
    pub(crate) async fn open_step(&self, run_id: &str) -> Result<Option<RunStep>> {
        let run = self.store.runs().get(run_id).await?;
        let Some(step_id) = run.step_ids.last() else {
            return Ok(None);
        };
        let step = self.store.run_steps().get(step_id).await?;
        Ok((!step.is_final()).then_some(step))
    }
}
