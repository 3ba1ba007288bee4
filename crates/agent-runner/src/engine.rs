//! Run engine - drives runs through their lifecycle
//!
//! A run moves `queued -> in_progress <-> requires_action` and ends
//! `completed`, `failed`, `cancelled` or `expired`. Each run is driven by a
//! detached worker task. Whoever performs the transition into `in_progress`
//! (the worker claiming a queued run, or the submission that answers a
//! tool-call batch) owns the run until it leaves `in_progress`, so a run
//! never has two workers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use assistants_core::run::{
    FunctionCall, LastError, Run, RunStatus, RunStep, StepDetails, StepStatus, StepToolCall,
    ToolOutput,
};
use assistants_core::thread::{ContentPart, MessageRole, NewMessage, Thread};
use assistants_core::{
    AssistantRegistry, Error, InstanceStore, ListQuery, Page, Result, ThreadManager,
};

use crate::coordinator::{ToolCallCoordinator, DEFAULT_TOOL_OUTPUT_TIMEOUT};
use crate::error::ExecutorError;
use crate::event::{RunEvent, EVENT_CHANNEL_CAPACITY};
use crate::executor::{AgentExecutor, AssistantConfig, ExecuteRequest, ExecutorOutput};
use crate::steps::RunStepRecorder;

/// Configuration for the run engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time a client has to answer a tool-call batch
    pub tool_output_timeout: Duration,
    /// Upper bound on a single executor step, unbounded when `None`
    pub step_timeout: Option<Duration>,
    /// Buffered run events per subscriber
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tool_output_timeout: DEFAULT_TOOL_OUTPUT_TIMEOUT,
            step_timeout: None,
            event_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Per-run overrides of the assistant configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub model: Option<String>,
    pub instructions: Option<String>,
}

enum StepOutcome {
    /// The run is still in progress and needs another step
    Continue,
    /// The worker is done: the run is parked or terminal
    Yield,
}

#[derive(Clone)]
pub struct RunEngine {
    store: Arc<InstanceStore>,
    threads: ThreadManager,
    assistants: AssistantRegistry,
    steps: RunStepRecorder,
    coordinator: ToolCallCoordinator,
    executor: Arc<dyn AgentExecutor>,
    config: EngineConfig,
    events: broadcast::Sender<RunEvent>,
}

impl RunEngine {
    pub fn new(
        store: Arc<InstanceStore>,
        executor: Arc<dyn AgentExecutor>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            threads: ThreadManager::new(Arc::clone(&store)),
            assistants: AssistantRegistry::new(Arc::clone(&store)),
            steps: RunStepRecorder::new(Arc::clone(&store)),
            coordinator: ToolCallCoordinator::new(Arc::clone(&store), config.tool_output_timeout),
            store,
            executor,
            config,
            events,
        }
    }

    pub fn store(&self) -> &Arc<InstanceStore> {
        &self.store
    }

    pub fn threads(&self) -> &ThreadManager {
        &self.threads
    }

    pub fn assistants(&self) -> &AssistantRegistry {
        &self.assistants
    }

    pub fn steps(&self) -> &RunStepRecorder {
        &self.steps
    }

    pub fn coordinator(&self) -> &ToolCallCoordinator {
        &self.coordinator
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receive every run status change from now on
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Create a queued run on an idle thread and start driving it
    pub async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        self.create_run_with(thread_id, assistant_id, RunOptions::default())
            .await
    }

    pub async fn create_run_with(
        &self,
        thread_id: &str,
        assistant_id: &str,
        options: RunOptions,
    ) -> Result<Run> {
        let assistant = self.assistants.get(assistant_id).await?;
        // A run parked past its deadline must not keep the thread busy
        self.expire_active_run(thread_id).await?;

        let run = self
            .threads
            .claim_run(thread_id, |thread| {
                let mut run = Run::new(&thread.id, &assistant, thread.message_count());
                if let Some(model) = options.model {
                    run.model = model;
                }
                if let Some(instructions) = options.instructions {
                    run.instructions = Some(instructions);
                }
                run
            })
            .await?;

        info!(
            "Created run {} on thread {} (assistant {})",
            run.id, run.thread_id, run.assistant_id
        );
        self.emit(&run);
        self.spawn_worker(run.id.clone(), Vec::new(), false);
        Ok(run)
    }

    /// Create a thread seeded with `messages` and start a run on it
    pub async fn create_thread_and_run(
        &self,
        assistant_id: &str,
        metadata: HashMap<String, String>,
        messages: Vec<NewMessage>,
        options: RunOptions,
    ) -> Result<(Thread, Run)> {
        // Fail before creating anything for an unknown assistant
        self.assistants.get(assistant_id).await?;

        let thread = self.threads.create_thread(metadata).await?;
        for message in messages {
            if let Err(err) = self
                .threads
                .add_message(&thread.id, message.role, message.content)
                .await
            {
                if let Err(cleanup) = self.threads.delete_thread(&thread.id).await {
                    warn!("Failed to remove partial thread {}: {}", thread.id, cleanup);
                }
                return Err(err);
            }
        }

        let run = self.create_run_with(&thread.id, assistant_id, options).await?;
        let thread = self.threads.get_thread(&thread.id).await?;
        Ok((thread, run))
    }

    /// Snapshot of a run. An overdue tool-call batch expires here.
    pub async fn get_run(&self, run_id: &str) -> Result<Run> {
        self.expire_if_due(run_id).await?;
        self.store.runs().get(run_id).await
    }

    /// Runs of a thread in creation order
    pub async fn list_runs(&self, thread_id: &str, query: &ListQuery) -> Result<Page<Run>> {
        self.expire_active_run(thread_id).await?;

        let mut runs: Vec<Run> = self
            .store
            .runs()
            .list()
            .await
            .into_iter()
            .filter(|run| run.thread_id == thread_id)
            .collect();
        runs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let ids: Vec<String> = runs.iter().map(|run| run.id.clone()).collect();
        let (window, has_more) = query.window(&ids)?;
        let mut by_id: HashMap<String, Run> =
            runs.into_iter().map(|run| (run.id.clone(), run)).collect();
        let data = window
            .into_iter()
            .filter_map(|id| by_id.remove(id.as_str()))
            .collect();
        Ok(Page::new(data, has_more))
    }

    pub async fn list_steps(&self, run_id: &str) -> Result<Vec<RunStep>> {
        self.expire_if_due(run_id).await?;
        self.steps.list_steps(run_id).await
    }

    pub async fn list_steps_page(&self, run_id: &str, query: &ListQuery) -> Result<Page<RunStep>> {
        self.expire_if_due(run_id).await?;
        self.steps.list_steps_page(run_id, query).await
    }

    pub async fn get_step(&self, run_id: &str, step_id: &str) -> Result<RunStep> {
        self.expire_if_due(run_id).await?;
        self.steps.get_step(run_id, step_id).await
    }

    /// Answer a `requires_action` run and resume it.
    ///
    /// The outputs are appended to the thread as tool messages before the
    /// next step starts. Returns the run as resumed (`in_progress`).
    pub async fn submit_tool_outputs(
        &self,
        run_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Run> {
        let batch = match self.coordinator.submit_outputs(run_id, outputs).await {
            Ok(batch) => batch,
            Err(Error::ExpiredDeadline(msg)) => {
                self.expire_if_due(run_id).await?;
                return Err(Error::ExpiredDeadline(msg));
            }
            Err(err) => return Err(err),
        };

        let run = self.store.runs().get(run_id).await?;
        info!("Run {} resumed after step {}", run.id, batch.step_id);
        self.emit(&run);

        for output in &batch.outputs {
            let appended = self
                .threads
                .append_run_message(
                    &run.thread_id,
                    &run.id,
                    MessageRole::Tool,
                    vec![ContentPart::ToolResult {
                        tool_call_id: output.tool_call_id.clone(),
                        output: output.output.clone(),
                    }],
                )
                .await;
            if let Err(err) = appended {
                // This submission owns the run, nobody else will finish it
                self.fail_run(&run.id, &err).await;
                return Err(err);
            }
        }

        self.spawn_worker(run.id.clone(), batch.outputs, true);
        Ok(run)
    }

    /// Ask a run to stop and return at once.
    ///
    /// Queued and `requires_action` runs are cancelled on the spot. An
    /// in-progress run moves to `cancelling` and its worker finishes the
    /// current step before settling it as `cancelled`. Terminal runs are
    /// returned unchanged.
    pub async fn request_cancel(&self, run_id: &str) -> Result<Run> {
        let mut run = self.store.runs().lock(run_id).await?;
        match run.status {
            status if status.is_terminal() => Ok(run.clone()),
            RunStatus::Cancelling => Ok(run.clone()),
            RunStatus::Queued => {
                run.transition(RunStatus::Cancelling)?;
                run.transition(RunStatus::Cancelled)?;
                let snapshot = run.clone();
                drop(run);

                info!("Run {} cancelled before it started", snapshot.id);
                self.finish(&snapshot).await;
                Ok(snapshot)
            }
            RunStatus::InProgress => {
                run.transition(RunStatus::Cancelling)?;
                let snapshot = run.clone();
                drop(run);

                info!("Run {} cancelling, waiting for its current step", snapshot.id);
                self.emit(&snapshot);
                Ok(snapshot)
            }
            RunStatus::RequiresAction => {
                run.transition(RunStatus::Cancelling)?;
                let cancelling = run.clone();
                drop(run);
                self.emit(&cancelling);

                if let Err(err) = self.coordinator.cancel_pending(run_id).await {
                    warn!("Failed to discard tool calls of run {}: {}", run_id, err);
                }
                let snapshot = self
                    .store
                    .runs()
                    .update(run_id, |run| {
                        run.transition(RunStatus::Cancelled)?;
                        Ok(run.clone())
                    })
                    .await?;

                info!("Run {} cancelled while waiting for tool outputs", snapshot.id);
                self.finish(&snapshot).await;
                Ok(snapshot)
            }
            // Every non-terminal status is handled above
            _ => Ok(run.clone()),
        }
    }

    /// Cancel a run and wait until it is terminal. Cancelling a terminal run
    /// is a no-op returning its status.
    pub async fn cancel_run(&self, run_id: &str) -> Result<RunStatus> {
        let run = self.request_cancel(run_id).await?;
        if run.is_terminal() {
            return Ok(run.status);
        }
        Ok(self.wait_until_settled(run_id).await?.status)
    }

    /// Wait until the run reaches a terminal status
    pub async fn wait_until_settled(&self, run_id: &str) -> Result<Run> {
        // Subscribe before looking so no transition slips through
        let mut events = self.events.subscribe();
        loop {
            let run = self.get_run(run_id).await?;
            if run.is_terminal() {
                return Ok(run);
            }

            // A parked run only changes again at its deadline
            let until_deadline = run
                .expires_at
                .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO));

            let received = match until_deadline {
                Some(wait) => match tokio::time::timeout(wait, events.recv()).await {
                    Ok(received) => received,
                    Err(_) => continue,
                },
                None => events.recv().await,
            };

            match received {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => {
                    return self.store.runs().get(run_id).await;
                }
            }
        }
    }

    /// Expire one run if its tool-call deadline has passed
    pub async fn expire_if_due(&self, run_id: &str) -> Result<bool> {
        if !self.coordinator.expire_if_due(run_id, Utc::now()).await? {
            return Ok(false);
        }
        let run = self.store.runs().get(run_id).await?;
        self.finish(&run).await;
        Ok(true)
    }

    /// Lazy deadline check for the run currently holding a thread
    async fn expire_active_run(&self, thread_id: &str) -> Result<()> {
        let thread = self.threads.get_thread(thread_id).await?;
        let Some(run_id) = thread.active_run_id else {
            return Ok(());
        };
        match self.expire_if_due(&run_id).await {
            Ok(_) | Err(Error::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Expire every run whose tool-call deadline has passed. Returns the ids
    /// of the runs expired by this sweep.
    pub async fn expire_overdue(&self) -> Vec<String> {
        let overdue = self.coordinator.overdue_runs(Utc::now()).await;
        let results = join_all(overdue.into_iter().map(|run_id| async move {
            let result = self.expire_if_due(&run_id).await;
            (run_id, result)
        }))
        .await;

        let mut expired = Vec::new();
        for (run_id, result) in results {
            match result {
                Ok(true) => expired.push(run_id),
                Ok(false) => {}
                Err(e) => warn!("Failed to expire run {}: {}", run_id, e),
            }
        }
        expired
    }

    /// Periodically expire overdue runs
    pub fn spawn_expiry_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let expired = engine.expire_overdue().await;
                if !expired.is_empty() {
                    info!("Expiry sweep expired {} runs", expired.len());
                }
            }
        })
    }

    fn emit(&self, run: &Run) {
        debug!("Run {} is now {}", run.id, run.status);
        // No subscribers is fine
        let _ = self.events.send(RunEvent::from_run(run));
    }

    /// Bookkeeping once a run is terminal: free its thread and announce it
    async fn finish(&self, run: &Run) {
        if let Err(e) = self.threads.release_run(&run.thread_id, &run.id).await {
            warn!("Failed to release thread {}: {}", run.thread_id, e);
        }
        self.emit(run);
    }

    fn spawn_worker(&self, run_id: String, tool_outputs: Vec<ToolOutput>, claimed: bool) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(run_id, tool_outputs, claimed).await;
        });
    }

    async fn drive(&self, run_id: String, mut tool_outputs: Vec<ToolOutput>, claimed: bool) {
        if !claimed {
            match self.claim(&run_id).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    warn!("Run {} could not be claimed: {}", run_id, e);
                    return;
                }
            }
        }

        loop {
            let outputs = std::mem::take(&mut tool_outputs);
            match self.step(&run_id, outputs).await {
                Ok(StepOutcome::Continue) => continue,
                Ok(StepOutcome::Yield) => return,
                Err(err) => {
                    error!("Run {} step failed: {}", run_id, err);
                    self.fail_run(&run_id, &err).await;
                    return;
                }
            }
        }
    }

    /// Move a queued run to `in_progress`. Returns whether this worker owns
    /// the run.
    async fn claim(&self, run_id: &str) -> Result<bool> {
        let mut run = self.store.runs().lock(run_id).await?;
        match run.status {
            RunStatus::Queued => {
                run.transition(RunStatus::InProgress)?;
                let snapshot = run.clone();
                drop(run);

                info!("Run {} started", snapshot.id);
                self.emit(&snapshot);
                Ok(true)
            }
            RunStatus::Cancelling => {
                run.transition(RunStatus::Cancelled)?;
                let snapshot = run.clone();
                drop(run);

                self.finish(&snapshot).await;
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Settle a pending cancellation at a step boundary. Returns true when
    /// the worker must stop.
    async fn settle_cancellation(&self, run_id: &str) -> Result<bool> {
        let mut run = self.store.runs().lock(run_id).await?;
        match run.status {
            RunStatus::InProgress => Ok(false),
            RunStatus::Cancelling => {
                run.transition(RunStatus::Cancelled)?;
                let snapshot = run.clone();
                drop(run);

                info!("Run {} cancelled", snapshot.id);
                self.finish(&snapshot).await;
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    async fn step(&self, run_id: &str, tool_outputs: Vec<ToolOutput>) -> Result<StepOutcome> {
        if self.settle_cancellation(run_id).await? {
            return Ok(StepOutcome::Yield);
        }

        let run = self.store.runs().get(run_id).await?;
        let messages = self.threads.history_for_run(&run).await?;
        let request = ExecuteRequest {
            run_id: run.id.clone(),
            thread_id: run.thread_id.clone(),
            messages,
            assistant: AssistantConfig::from_run(&run),
            tool_outputs,
        };

        debug!("Executing step {} of run {}", run.step_count(), run.id);
        match self.execute(request).await? {
            ExecutorOutput::Message { content, finished } => {
                self.record_message(&run, content).await?;
                if finished {
                    self.complete(run_id).await?;
                    return Ok(StepOutcome::Yield);
                }
                Ok(StepOutcome::Continue)
            }
            ExecutorOutput::ToolCalls { tool_calls } => {
                self.raise_tool_calls(&run, tool_calls).await
            }
        }
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecutorOutput> {
        let call = self.executor.execute(request);
        let result = match self.config.step_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Timeout {
                    seconds: limit.as_secs(),
                }),
            },
            None => call.await,
        };
        Ok(result?)
    }

    async fn record_message(&self, run: &Run, content: String) -> Result<()> {
        if content.trim().is_empty() {
            return Err(
                ExecutorError::invalid_response("executor returned an empty message").into(),
            );
        }

        let step = self
            .steps
            .record_step(&run.id, StepDetails::MessageCreation { message_id: None })
            .await?;
        let message = self
            .threads
            .append_run_message(
                &run.thread_id,
                &run.id,
                MessageRole::Assistant,
                vec![ContentPart::text(content)],
            )
            .await?;
        self.steps
            .finalize_step(
                &step.id,
                StepStatus::Completed,
                Some(StepDetails::MessageCreation {
                    message_id: Some(message.id),
                }),
            )
            .await?;
        Ok(())
    }

    async fn raise_tool_calls(
        &self,
        run: &Run,
        functions: Vec<FunctionCall>,
    ) -> Result<StepOutcome> {
        if functions.is_empty() {
            return Err(ExecutorError::invalid_response("executor returned no tool calls").into());
        }
        let calls: Vec<StepToolCall> = functions.into_iter().map(StepToolCall::pending).collect();

        // The assistant turn that asked for the calls goes in first, so tool
        // results always follow it in the thread
        let parts = calls
            .iter()
            .map(|call| ContentPart::ToolCall {
                tool_call_id: call.id.clone(),
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            })
            .collect();
        self.threads
            .append_run_message(&run.thread_id, &run.id, MessageRole::Assistant, parts)
            .await?;

        let step = self
            .steps
            .record_step(
                &run.id,
                StepDetails::ToolCalls {
                    tool_calls: calls.clone(),
                },
            )
            .await?;

        match self.coordinator.register_pending(&run.id, &step.id, &calls).await {
            Ok(_) => {
                let parked = self.store.runs().get(&run.id).await?;
                self.emit(&parked);
                Ok(StepOutcome::Yield)
            }
            Err(err) => {
                let current = self.store.runs().get(&run.id).await?;
                if current.status != RunStatus::Cancelling {
                    return Err(err);
                }
                // Cancelled while the executor was running
                self.steps
                    .finalize_step(&step.id, StepStatus::Cancelled, None)
                    .await?;
                self.settle_cancellation(&run.id).await?;
                Ok(StepOutcome::Yield)
            }
        }
    }

    /// The executor signalled the end of the run
    async fn complete(&self, run_id: &str) -> Result<()> {
        let mut run = self.store.runs().lock(run_id).await?;
        if run.status == RunStatus::Cancelling {
            run.transition(RunStatus::Cancelled)?;
        } else {
            run.transition(RunStatus::Completed)?;
        }
        let snapshot = run.clone();
        drop(run);

        info!("Run {} {}", snapshot.id, snapshot.status);
        self.finish(&snapshot).await;
        Ok(())
    }

    /// Contain a step error to its run. A run that was being cancelled still
    /// ends up cancelled.
    async fn fail_run(&self, run_id: &str, err: &Error) {
        let reason = LastError::server_error(err.to_string());

        let settled = self
            .store
            .runs()
            .update(run_id, |run| {
                match run.status {
                    RunStatus::Cancelling => run.transition(RunStatus::Cancelled)?,
                    RunStatus::Queued | RunStatus::InProgress => run.mark_failed(reason.clone())?,
                    status => {
                        return Err(Error::InvalidState(format!(
                            "Run {} is {}, nothing to fail",
                            run.id, status
                        )))
                    }
                }
                Ok(run.clone())
            })
            .await;

        let run = match settled {
            Ok(run) => run,
            Err(e) => {
                warn!("Run {} could not be settled after an error: {}", run_id, e);
                return;
            }
        };

        match self.steps.open_step(run_id).await {
            Ok(Some(step)) => {
                let closed = if run.status == RunStatus::Cancelled {
                    self.steps
                        .finalize_step(&step.id, StepStatus::Cancelled, None)
                        .await
                } else {
                    self.steps.fail_step(&step.id, reason).await
                };
                if let Err(e) = closed {
                    warn!("Failed to close step {}: {}", step.id, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to look up open step of run {}: {}", run_id, e),
        }

        if run.status == RunStatus::Failed {
            error!("Run {} failed: {}", run.id, err);
        } else {
            info!("Run {} cancelled after an error: {}", run.id, err);
        }
        self.finish(&run).await;
    }
}
