//! Workflow executor: drives a run node by node with durable checkpointing.
//!
//! The `Executor` owns the state machine over `WorkflowState.status`. It is
//! the only writer of run state: every node result is folded into a new
//! state value which is persisted *before* the next action is decided, so a
//! crash loses at most one node execution.
//!
//! # Execution flow
//!
//! 1. `execute` creates a `Running` state at the start node and persists it
//!    (`resume` instead validates a `Paused` state and merges the resume input).
//! 2. Invoke the current node with the step input.
//! 3. Fold the `NodeResult` into a new state (merge output, append history,
//!    move to the next node or pause/complete/fail) and persist it.
//! 4. Loop on `Continue`; return the state on pause or any terminal status.
//!
//! Node failures never escape as `Err`: they are recorded in history and the
//! `Failed` state is returned. `Err` is reserved for caller misuse (resuming
//! a run that is not paused, unknown run ids, lock contention) and for
//! persistence failures, which are not retried.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use waypoint_types::config::ExecutorConfig;
use waypoint_types::error::{RepositoryError, StateTransitionError};
use waypoint_types::event::WorkflowEvent;
use waypoint_types::workflow::{HistoryEntry, WorkflowData, WorkflowState, WorkflowStatus};

use crate::event::bus::EventBus;
use crate::repository::state::StateRepository;

use super::definition::{DefinitionError, WorkflowDefinition};
use super::lock::{NoopRunLock, RunLock};
use super::node::{BoxNode, NodeResult};

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Errors reported synchronously to the caller of the executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// `resume` was called on a run that is not paused.
    #[error("workflow run {run_id} is not paused (status: {status})")]
    NotPaused {
        run_id: Uuid,
        status: WorkflowStatus,
    },

    /// No persisted state exists for this run id.
    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),

    /// The run lock is held by someone else.
    #[error("workflow run {0} is locked by another executor")]
    RunLocked(Uuid),

    /// Cancel was requested for a run that already finished.
    #[error("workflow run {run_id} is already {status}")]
    AlreadyTerminal {
        run_id: Uuid,
        status: WorkflowStatus,
    },

    /// Persistence failed; the in-memory state was not durably saved.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// A state mutator rejected the transition.
    #[error("state transition error: {0}")]
    Transition(#[from] StateTransitionError),
}

/// Result of [`Executor::cancel`].
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The run is executing in this executor; it stops before its next node.
    Requested,
    /// The run was idle and has been persisted as `Cancelled`.
    Cancelled(WorkflowState),
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Single-threaded-per-run state machine over a [`StateRepository`].
///
/// Generic over `R: StateRepository` for storage flexibility and over
/// `L: RunLock` for optional run-level mutual exclusion.
pub struct Executor<R: StateRepository, L: RunLock = NoopRunLock> {
    repo: R,
    event_bus: EventBus,
    lock: L,
    max_steps: u32,
    node_timeout: Option<Duration>,
    /// Cancellation tokens of runs currently being driven, keyed by run_id.
    cancellation_tokens: DashMap<Uuid, CancellationToken>,
}

impl<R: StateRepository> Executor<R, NoopRunLock> {
    /// Create an executor with default limits and no run lock.
    pub fn new(repo: R, event_bus: EventBus) -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            repo,
            event_bus,
            lock: NoopRunLock,
            max_steps: defaults.max_steps,
            node_timeout: None,
            cancellation_tokens: DashMap::new(),
        }
    }
}

impl<R: StateRepository, L: RunLock> Executor<R, L> {
    /// Apply step limit and node timeout from configuration.
    pub fn with_config(mut self, config: &ExecutorConfig) -> Self {
        self.max_steps = config.max_steps;
        self.node_timeout = config.node_timeout_secs.map(Duration::from_secs);
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = Some(timeout);
        self
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Swap in a run lock, taken around `execute`, `resume` and `cancel`.
    pub fn with_lock<L2: RunLock>(self, lock: L2) -> Executor<R, L2> {
        Executor {
            repo: self.repo,
            event_bus: self.event_bus,
            lock,
            max_steps: self.max_steps,
            node_timeout: self.node_timeout,
            cancellation_tokens: self.cancellation_tokens,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Whether `run_id` is currently being driven by this executor.
    pub fn is_active(&self, run_id: &Uuid) -> bool {
        self.cancellation_tokens.contains_key(run_id)
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Start a new run of `definition` with `input` as initial data.
    ///
    /// Returns the state the run stopped in: `Completed`, `Paused`,
    /// `Failed` or `Cancelled`.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        input: WorkflowData,
    ) -> Result<WorkflowState, ExecutorError> {
        let state = WorkflowState::new(definition.id(), definition.start_node()).merge(&input);
        let run_id = state.run_id;

        self.acquire(run_id).await?;
        let result = self.start(definition, state, input).await;
        self.release(run_id).await;
        result
    }

    /// Continue a paused run. `input` is merged into `data` (last write wins)
    /// and handed to the node the run resumes at.
    ///
    /// The persisted record is checked under the run lock and the run
    /// continues from it, so a stale copy cannot revive a run that was
    /// cancelled or resumed in the meantime.
    pub async fn resume(
        &self,
        definition: &WorkflowDefinition,
        state: WorkflowState,
        input: WorkflowData,
    ) -> Result<WorkflowState, ExecutorError> {
        if state.status != WorkflowStatus::Paused {
            return Err(ExecutorError::NotPaused {
                run_id: state.run_id,
                status: state.status,
            });
        }
        let run_id = state.run_id;

        self.acquire(run_id).await?;
        let result = self.continue_paused(definition, state, input).await;
        self.release(run_id).await;
        result
    }

    /// Load a run from the repository and resume it.
    pub async fn resume_run(
        &self,
        definition: &WorkflowDefinition,
        run_id: Uuid,
        input: WorkflowData,
    ) -> Result<WorkflowState, ExecutorError> {
        let state = self
            .repo
            .find(&run_id)
            .await?
            .ok_or(ExecutorError::RunNotFound(run_id))?;
        self.resume(definition, state, input).await
    }

    /// Cancel a `Running` or `Paused` run.
    ///
    /// A run being driven by this executor is stopped cooperatively before
    /// its next node; a node that is already executing is not interrupted.
    /// Any other run is loaded, transitioned and persisted immediately.
    pub async fn cancel(&self, run_id: Uuid) -> Result<CancelOutcome, ExecutorError> {
        let active = self
            .cancellation_tokens
            .get(&run_id)
            .map(|token| token.clone());
        if let Some(token) = active {
            token.cancel();
            tracing::info!(run_id = %run_id, "cancellation requested for active run");
            return Ok(CancelOutcome::Requested);
        }

        self.acquire(run_id).await?;
        let result = self.cancel_persisted(run_id).await;
        self.release(run_id).await;
        result.map(CancelOutcome::Cancelled)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn start(
        &self,
        definition: &WorkflowDefinition,
        state: WorkflowState,
        input: WorkflowData,
    ) -> Result<WorkflowState, ExecutorError> {
        self.repo.save(&state).await?;

        let input = Value::Object(input);
        self.event_bus.publish(WorkflowEvent::WorkflowStarted {
            run_id: state.run_id,
            input: input.clone(),
        });

        tracing::info!(
            run_id = %state.run_id,
            workflow = definition.id(),
            start_node = definition.start_node(),
            "starting workflow execution"
        );

        self.drive(definition, state, input).await
    }

    async fn continue_paused(
        &self,
        definition: &WorkflowDefinition,
        state: WorkflowState,
        input: WorkflowData,
    ) -> Result<WorkflowState, ExecutorError> {
        let run_id = state.run_id;
        let persisted = self
            .repo
            .find(&run_id)
            .await?
            .ok_or(ExecutorError::RunNotFound(run_id))?;
        if persisted.is_terminal() {
            return Err(ExecutorError::AlreadyTerminal {
                run_id,
                status: persisted.status,
            });
        }
        if persisted.status != WorkflowStatus::Paused {
            return Err(ExecutorError::NotPaused {
                run_id,
                status: persisted.status,
            });
        }
        if persisted != state {
            tracing::debug!(run_id = %run_id, "resuming from persisted state");
        }

        let state = persisted.resume()?.merge(&input);
        self.repo.save(&state).await?;

        let input = Value::Object(input);
        self.event_bus.publish(WorkflowEvent::WorkflowResumed {
            run_id: state.run_id,
            input: input.clone(),
        });

        tracing::info!(
            run_id = %state.run_id,
            workflow = definition.id(),
            node = state.current_node.as_deref().unwrap_or_default(),
            "resuming workflow execution"
        );

        self.drive(definition, state, input).await
    }

    async fn cancel_persisted(&self, run_id: Uuid) -> Result<WorkflowState, ExecutorError> {
        let state = self
            .repo
            .find(&run_id)
            .await?
            .ok_or(ExecutorError::RunNotFound(run_id))?;

        if state.is_terminal() {
            return Err(ExecutorError::AlreadyTerminal {
                run_id,
                status: state.status,
            });
        }

        let cancelled = state.cancel()?;
        self.repo.save(&cancelled).await?;
        self.event_bus
            .publish(WorkflowEvent::WorkflowCancelled { run_id });

        tracing::info!(run_id = %run_id, "workflow cancelled");
        Ok(cancelled)
    }

    /// Register a cancellation token for the run and enter the loop.
    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        state: WorkflowState,
        input: Value,
    ) -> Result<WorkflowState, ExecutorError> {
        let run_id = state.run_id;
        let token = CancellationToken::new();
        self.cancellation_tokens.insert(run_id, token.clone());

        let result = self.run_loop(definition, state, input, &token).await;

        self.cancellation_tokens.remove(&run_id);
        result
    }

    async fn run_loop(
        &self,
        definition: &WorkflowDefinition,
        mut state: WorkflowState,
        mut input: Value,
        token: &CancellationToken,
    ) -> Result<WorkflowState, ExecutorError> {
        let mut steps: u32 = 0;

        loop {
            if token.is_cancelled() {
                let cancelled = state.cancel()?;
                self.repo.save(&cancelled).await?;
                self.event_bus.publish(WorkflowEvent::WorkflowCancelled {
                    run_id: cancelled.run_id,
                });
                tracing::info!(run_id = %cancelled.run_id, "workflow cancelled");
                return Ok(cancelled);
            }

            let Some(node_id) = state.current_node.clone() else {
                let error = "run has no current node".to_string();
                return self
                    .fail_run(state, "", input, error, Duration::ZERO)
                    .await;
            };

            if steps >= self.max_steps {
                let error = format!("step limit of {} exceeded", self.max_steps);
                return self.fail_run(state, &node_id, input, error, Duration::ZERO).await;
            }
            steps += 1;

            let node = match definition.node(&node_id) {
                Ok(node) => node,
                Err(err) => {
                    return self
                        .fail_run(state, &node_id, input, err.to_string(), Duration::ZERO)
                        .await;
                }
            };

            self.event_bus.publish(WorkflowEvent::WorkflowNodeEntered {
                run_id: state.run_id,
                node: node_id.clone(),
            });
            tracing::debug!(run_id = %state.run_id, node = node_id.as_str(), "entering node");

            let started = Instant::now();
            let result = self.invoke(node, input.clone(), &state).await;
            let elapsed = started.elapsed();

            let result = match result {
                Ok(result) => result,
                Err(error) => return self.fail_run(state, &node_id, input, error, elapsed).await,
            };

            match result {
                NodeResult::Continue { output, next_node } => {
                    if !definition.contains(&next_node) {
                        let error = DefinitionError::NodeNotFound(next_node).to_string();
                        return self.fail_run(state, &node_id, input, error, elapsed).await;
                    }

                    state = state
                        .merge_output(&node_id, &output)
                        .add_history(HistoryEntry::success(
                            node_id.as_str(),
                            input,
                            Some(output.clone()),
                            elapsed,
                        ))
                        .advance_to(next_node.as_str())?;
                    self.repo.save(&state).await?;

                    self.exited(&state, &node_id, output.clone());
                    tracing::debug!(
                        run_id = %state.run_id,
                        node = node_id.as_str(),
                        next = next_node.as_str(),
                        "checkpointed node"
                    );
                    input = output;
                }
                NodeResult::Pause { reason, resume_at } => {
                    if let Some(target) = resume_at.as_deref().filter(|t| !definition.contains(t)) {
                        let error = DefinitionError::NodeNotFound(target.to_string()).to_string();
                        return self.fail_run(state, &node_id, input, error, elapsed).await;
                    }

                    let paused = state
                        .add_history(HistoryEntry::success(node_id.as_str(), input, None, elapsed))
                        .pause(reason.as_str(), resume_at)?;
                    self.repo.save(&paused).await?;

                    self.exited(&paused, &node_id, Value::Null);
                    self.event_bus.publish(WorkflowEvent::WorkflowPaused {
                        run_id: paused.run_id,
                        reason: reason.clone(),
                    });
                    tracing::info!(
                        run_id = %paused.run_id,
                        node = node_id.as_str(),
                        reason = reason.as_str(),
                        "workflow paused"
                    );
                    return Ok(paused);
                }
                NodeResult::Complete { output } => {
                    let completed = state
                        .merge_output(&node_id, &output)
                        .add_history(HistoryEntry::success(
                            node_id.as_str(),
                            input,
                            Some(output.clone()),
                            elapsed,
                        ))
                        .complete()?;
                    self.repo.save(&completed).await?;

                    self.exited(&completed, &node_id, output.clone());
                    self.event_bus.publish(WorkflowEvent::WorkflowCompleted {
                        run_id: completed.run_id,
                        output,
                    });
                    tracing::info!(
                        run_id = %completed.run_id,
                        steps = completed.history.len(),
                        "workflow completed"
                    );
                    return Ok(completed);
                }
                NodeResult::Fail { error } => {
                    return self.fail_run(state, &node_id, input, error, elapsed).await;
                }
            }
        }
    }

    /// Run one node, converting errors, panics and timeouts into a message.
    async fn invoke(
        &self,
        node: &BoxNode,
        input: Value,
        state: &WorkflowState,
    ) -> Result<NodeResult, String> {
        let call = AssertUnwindSafe(node.execute(input, state)).catch_unwind();

        let outcome = match self.node_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome,
                Err(_elapsed) => {
                    return Err(format!(
                        "node '{}' timed out after {:.3}s",
                        node.id(),
                        limit.as_secs_f64()
                    ));
                }
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(err.to_string()),
            Err(panic) => Err(format!(
                "node '{}' panicked: {}",
                node.id(),
                panic_message(panic.as_ref())
            )),
        }
    }

    /// Record a failed attempt, transition to `Failed` and persist.
    async fn fail_run(
        &self,
        state: WorkflowState,
        node_id: &str,
        input: Value,
        error: String,
        elapsed: Duration,
    ) -> Result<WorkflowState, ExecutorError> {
        let failed = state
            .add_history(HistoryEntry::failure(node_id, input, error.as_str(), elapsed))
            .fail()?;
        self.repo.save(&failed).await?;

        self.event_bus.publish(WorkflowEvent::WorkflowFailed {
            run_id: failed.run_id,
            error: error.clone(),
        });
        tracing::warn!(
            run_id = %failed.run_id,
            node = node_id,
            error = error.as_str(),
            "workflow failed"
        );
        Ok(failed)
    }

    fn exited(&self, state: &WorkflowState, node_id: &str, output: Value) {
        self.event_bus.publish(WorkflowEvent::WorkflowNodeExited {
            run_id: state.run_id,
            node: node_id.to_string(),
            output,
        });
    }

    async fn acquire(&self, run_id: Uuid) -> Result<(), ExecutorError> {
        if self.lock.acquire(&run_id).await? {
            Ok(())
        } else {
            Err(ExecutorError::RunLocked(run_id))
        }
    }

    async fn release(&self, run_id: Uuid) {
        if let Err(err) = self.lock.release(&run_id).await {
            tracing::warn!(run_id = %run_id, error = %err, "failed to release run lock");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tokio::sync::Notify;

    use crate::workflow::lock::LocalRunLock;
    use crate::workflow::node::{FnNode, NodeError};

    /// In-memory repository that also records every saved value.
    #[derive(Default)]
    struct RecordingRepo {
        states: DashMap<Uuid, WorkflowState>,
        saves: Mutex<Vec<WorkflowState>>,
        fail_saves: bool,
    }

    impl RecordingRepo {
        fn failing() -> Self {
            Self {
                fail_saves: true,
                ..Self::default()
            }
        }

        fn saved(&self) -> Vec<WorkflowState> {
            self.saves.lock().unwrap().clone()
        }
    }

    impl StateRepository for RecordingRepo {
        async fn save(&self, state: &WorkflowState) -> Result<(), RepositoryError> {
            if self.fail_saves {
                return Err(RepositoryError::Connection("storage offline".to_string()));
            }
            self.states.insert(state.run_id, state.clone());
            self.saves.lock().unwrap().push(state.clone());
            Ok(())
        }

        async fn find(&self, run_id: &Uuid) -> Result<Option<WorkflowState>, RepositoryError> {
            Ok(self.states.get(run_id).map(|s| s.clone()))
        }

        async fn find_by_workflow(
            &self,
            workflow_id: &str,
        ) -> Result<Vec<WorkflowState>, RepositoryError> {
            Ok(self
                .states
                .iter()
                .filter(|s| s.workflow_id == workflow_id)
                .map(|s| s.clone())
                .collect())
        }

        async fn find_by_status(
            &self,
            status: WorkflowStatus,
        ) -> Result<Vec<WorkflowState>, RepositoryError> {
            Ok(self
                .states
                .iter()
                .filter(|s| s.status == status)
                .map(|s| s.clone())
                .collect())
        }

        async fn delete(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
            Ok(self.states.remove(run_id).is_some())
        }

        async fn delete_expired(&self) -> Result<u64, RepositoryError> {
            Ok(0)
        }
    }

    fn data(value: Value) -> WorkflowData {
        value.as_object().cloned().unwrap()
    }

    fn executor() -> Executor<Arc<RecordingRepo>> {
        Executor::new(Arc::new(RecordingRepo::default()), EventBus::new(64))
    }

    fn linear_definition() -> WorkflowDefinition {
        WorkflowDefinition::builder("wf-linear", "Linear")
            .node(FnNode::new("a", |_input, _state| async move {
                Ok(NodeResult::next("b", json!({"a_done": true})))
            }))
            .node(FnNode::new("b", |input: Value, _state| async move {
                Ok(NodeResult::complete(json!({"b_saw": input["a_done"].clone()})))
            }))
            .build()
            .unwrap()
    }

    fn pausing_definition() -> WorkflowDefinition {
        WorkflowDefinition::builder("wf-pause", "Pause")
            .node(FnNode::new("a", |_input, _state| async move {
                Ok(NodeResult::pause_then("waiting", "b"))
            }))
            .node(FnNode::new("b", |_input, state: WorkflowState| async move {
                Ok(NodeResult::complete(json!({"x_seen": state.data["x"].clone()})))
            }))
            .build()
            .unwrap()
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<WorkflowEvent>) -> Vec<&'static str> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind());
        }
        kinds
    }

    #[tokio::test]
    async fn linear_workflow_completes_with_ordered_history() {
        let executor = executor();
        let mut rx = executor.event_bus().subscribe();

        let state = executor
            .execute(&linear_definition(), data(json!({"seed": 1})))
            .await
            .unwrap();

        assert_eq!(state.status, WorkflowStatus::Completed);
        let nodes: Vec<&str> = state.history.iter().map(|h| h.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["a", "b"]);
        assert!(state.history.iter().all(|h| h.succeeded));
        assert_eq!(state.data["seed"], 1);
        assert_eq!(state.data["a_done"], true);
        assert_eq!(state.data["b_saw"], true);
        assert!(state.is_consistent());

        assert_eq!(
            drain(&mut rx),
            vec![
                "workflow_started",
                "workflow_node_entered",
                "workflow_node_exited",
                "workflow_node_entered",
                "workflow_node_exited",
                "workflow_completed",
            ]
        );
    }

    #[tokio::test]
    async fn state_is_persisted_after_every_node() {
        let executor = executor();
        let state = executor
            .execute(&linear_definition(), WorkflowData::new())
            .await
            .unwrap();

        let saves = executor.repo().saved();
        // initial + a + b
        assert_eq!(saves.len(), 3);
        let lengths: Vec<usize> = saves.iter().map(|s| s.history.len()).collect();
        assert_eq!(lengths, vec![0, 1, 2]);
        assert_eq!(saves.last().unwrap(), &state);
        assert_eq!(executor.repo().find(&state.run_id).await.unwrap().unwrap(), state);
    }

    #[tokio::test]
    async fn pause_then_resume_continues_at_successor() {
        let executor = executor();
        let definition = pausing_definition();

        let paused = executor.execute(&definition, WorkflowData::new()).await.unwrap();
        assert_eq!(paused.status, WorkflowStatus::Paused);
        assert_eq!(paused.pause_reason.as_deref(), Some("waiting"));
        assert_eq!(paused.history.len(), 1);
        assert_eq!(paused.current_node.as_deref(), Some("b"));
        assert!(!executor.is_active(&paused.run_id));

        let mut rx = executor.event_bus().subscribe();
        let done = executor
            .resume(&definition, paused, data(json!({"x": 1})))
            .await
            .unwrap();

        assert_eq!(done.status, WorkflowStatus::Completed);
        assert_eq!(done.data["x"], 1);
        assert_eq!(done.data["x_seen"], 1);
        assert!(done.pause_reason.is_none());
        assert!(done.paused_at.is_none());
        assert_eq!(drain(&mut rx)[0], "workflow_resumed");
    }

    #[tokio::test]
    async fn pause_without_target_reruns_same_node() {
        let definition = WorkflowDefinition::builder("wf-gate", "Gate")
            .node(FnNode::new("gate", |input: Value, _state| async move {
                if input.get("approved") == Some(&json!(true)) {
                    Ok(NodeResult::complete(json!({"approved": true})))
                } else {
                    Ok(NodeResult::pause("needs approval"))
                }
            }))
            .build()
            .unwrap();
        let executor = executor();

        let paused = executor.execute(&definition, WorkflowData::new()).await.unwrap();
        assert_eq!(paused.current_node.as_deref(), Some("gate"));

        let done = executor
            .resume_run(&definition, paused.run_id, data(json!({"approved": true})))
            .await
            .unwrap();
        assert_eq!(done.status, WorkflowStatus::Completed);
        assert_eq!(done.history.len(), 2);
    }

    #[tokio::test]
    async fn resume_input_overwrites_existing_keys() {
        let executor = executor();
        let paused = executor
            .execute(&pausing_definition(), data(json!({"x": 0, "keep": "me"})))
            .await
            .unwrap();

        let done = executor
            .resume(&pausing_definition(), paused, data(json!({"x": 2})))
            .await
            .unwrap();
        assert_eq!(done.data["x"], 2);
        assert_eq!(done.data["keep"], "me");
    }

    #[tokio::test]
    async fn node_error_fails_run_without_raising() {
        let definition = WorkflowDefinition::builder("wf-err", "Error")
            .node(FnNode::new("a", |_input, _state| async move {
                Ok(NodeResult::next("b", json!({})))
            }))
            .node(FnNode::new("b", |_input, _state| async move {
                Err::<NodeResult, _>(NodeError::new("upstream exploded"))
            }))
            .build()
            .unwrap();
        let executor = executor();
        let mut rx = executor.event_bus().subscribe();

        let state = executor.execute(&definition, WorkflowData::new()).await.unwrap();

        assert_eq!(state.status, WorkflowStatus::Failed);
        let last = state.history.last().unwrap();
        assert_eq!(last.node_id, "b");
        assert!(!last.succeeded);
        assert_eq!(last.error_message.as_deref(), Some("upstream exploded"));
        assert!(last.output.is_none());
        assert!(state.current_node.is_none());
        assert!(state.completed_at.is_some());
        assert_eq!(drain(&mut rx).last(), Some(&"workflow_failed"));
    }

    #[tokio::test]
    async fn fail_result_fails_run() {
        let definition = WorkflowDefinition::builder("wf-fail", "Fail")
            .node(FnNode::new("a", |_input, _state| async move {
                Ok(NodeResult::fail("validation rejected"))
            }))
            .build()
            .unwrap();

        let state = executor().execute(&definition, WorkflowData::new()).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.last_error(), Some("validation rejected"));
    }

    #[tokio::test]
    async fn unknown_next_node_fails_run() {
        let definition = WorkflowDefinition::builder("wf-bad-edge", "Bad edge")
            .node(FnNode::new("a", |_input, _state| async move {
                Ok(NodeResult::next("nowhere", json!({"leaked": true})))
            }))
            .build()
            .unwrap();

        let state = executor().execute(&definition, WorkflowData::new()).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.history.len(), 1);
        assert!(state.last_error().unwrap().contains("nowhere"));
        assert!(!state.data.contains_key("leaked"));
    }

    #[tokio::test]
    async fn unknown_pause_target_fails_run() {
        let definition = WorkflowDefinition::builder("wf-bad-pause", "Bad pause")
            .node(FnNode::new("a", |_input, _state| async move {
                Ok(NodeResult::pause_then("wait", "ghost"))
            }))
            .build()
            .unwrap();

        let state = executor().execute(&definition, WorkflowData::new()).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.last_error().unwrap().contains("ghost"));
    }

    #[tokio::test]
    async fn unknown_start_node_fails_run_with_history() {
        let definition = WorkflowDefinition::builder("wf-bad-start", "Bad start")
            .start("missing")
            .node(FnNode::new("a", |_input, _state| async move {
                Ok(NodeResult::complete(Value::Null))
            }))
            .build()
            .unwrap();
        let executor = executor();

        let state = executor.execute(&definition, WorkflowData::new()).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].node_id, "missing");
        assert_eq!(executor.repo().find(&state.run_id).await.unwrap().unwrap(), state);
    }

    #[tokio::test]
    async fn panicking_node_fails_run() {
        let definition = WorkflowDefinition::builder("wf-panic", "Panic")
            .node(FnNode::new("a", |_input, _state| async move {
                if true {
                    panic!("node blew up");
                }
                Ok(NodeResult::complete(Value::Null))
            }))
            .build()
            .unwrap();

        let state = executor().execute(&definition, WorkflowData::new()).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.last_error().unwrap().contains("node blew up"));
    }

    #[tokio::test]
    async fn node_timeout_fails_run() {
        let definition = WorkflowDefinition::builder("wf-slow", "Slow")
            .node(FnNode::new("slow", |_input, _state| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(NodeResult::complete(Value::Null))
            }))
            .build()
            .unwrap();
        let executor = executor().with_node_timeout(Duration::from_millis(20));

        let state = executor.execute(&definition, WorkflowData::new()).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.last_error().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn step_limit_stops_cycles() {
        let definition = WorkflowDefinition::builder("wf-loop", "Loop")
            .node(FnNode::new("ping", |_input, _state| async move {
                Ok(NodeResult::next("pong", Value::Null))
            }))
            .node(FnNode::new("pong", |_input, _state| async move {
                Ok(NodeResult::next("ping", Value::Null))
            }))
            .build()
            .unwrap();
        let executor = executor().with_max_steps(5);

        let state = executor.execute(&definition, WorkflowData::new()).await.unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.history.len(), 6);
        assert!(state.last_error().unwrap().contains("step limit"));
    }

    #[tokio::test]
    async fn resume_on_running_state_is_rejected_and_nothing_persisted() {
        let executor = executor();
        let running = WorkflowState::new("wf-pause", "a");

        let err = executor
            .resume(&pausing_definition(), running.clone(), WorkflowData::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ExecutorError::NotPaused {
                status: WorkflowStatus::Running,
                ..
            }
        ));
        assert!(executor.repo().find(&running.run_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn resume_on_terminal_state_is_rejected() {
        let executor = executor();
        let done = executor
            .execute(&linear_definition(), WorkflowData::new())
            .await
            .unwrap();
        let saves_before = executor.repo().saved().len();

        let err = executor
            .resume(&linear_definition(), done.clone(), WorkflowData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::NotPaused { .. }));
        assert_eq!(executor.repo().saved().len(), saves_before);
        assert_eq!(executor.repo().find(&done.run_id).await.unwrap().unwrap(), done);
    }

    #[tokio::test]
    async fn resume_run_unknown_id() {
        let err = executor()
            .resume_run(&linear_definition(), Uuid::now_v7(), WorkflowData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn persistence_failure_propagates() {
        let executor = Executor::new(RecordingRepo::failing(), EventBus::new(8));
        let err = executor
            .execute(&linear_definition(), WorkflowData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Repository(RepositoryError::Connection(_))));
    }

    #[tokio::test]
    async fn cancel_paused_run() {
        let executor = executor();
        let paused = executor
            .execute(&pausing_definition(), WorkflowData::new())
            .await
            .unwrap();

        let outcome = executor.cancel(paused.run_id).await.unwrap();
        let CancelOutcome::Cancelled(cancelled) = outcome else {
            panic!("expected immediate cancellation");
        };
        assert_eq!(cancelled.status, WorkflowStatus::Cancelled);
        assert!(cancelled.is_consistent());
        assert_eq!(
            executor.repo().find(&paused.run_id).await.unwrap().unwrap().status,
            WorkflowStatus::Cancelled
        );

        let again = executor.cancel(paused.run_id).await.unwrap_err();
        assert!(matches!(again, ExecutorError::AlreadyTerminal { .. }));

        let resumed = executor
            .resume(&pausing_definition(), cancelled, WorkflowData::new())
            .await
            .unwrap_err();
        assert!(matches!(resumed, ExecutorError::NotPaused { .. }));
    }

    #[tokio::test]
    async fn stale_paused_copy_cannot_resume_cancelled_run() {
        let executor = executor().with_lock(LocalRunLock::new());
        let paused = executor
            .execute(&pausing_definition(), WorkflowData::new())
            .await
            .unwrap();
        executor.cancel(paused.run_id).await.unwrap();
        let saves_before = executor.repo().saved().len();

        let err = executor
            .resume(&pausing_definition(), paused.clone(), WorkflowData::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutorError::AlreadyTerminal {
                status: WorkflowStatus::Cancelled,
                ..
            }
        ));

        let persisted = executor.repo().find(&paused.run_id).await.unwrap().unwrap();
        assert_eq!(persisted.status, WorkflowStatus::Cancelled);
        assert_eq!(persisted.history.len(), paused.history.len());
        assert_eq!(executor.repo().saved().len(), saves_before);
    }

    #[tokio::test]
    async fn resume_of_unsaved_paused_state_is_rejected() {
        let executor = executor();
        let paused = WorkflowState::new("wf-pause", "a")
            .pause("waiting", None)
            .unwrap();

        let err = executor
            .resume(&pausing_definition(), paused.clone(), WorkflowData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::RunNotFound(id) if id == paused.run_id));
        assert!(executor.repo().saved().is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_run() {
        let err = executor().cancel(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, ExecutorError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn cancel_active_run_stops_before_next_node() {
        let entered = Arc::new(Notify::new());
        let proceed = Arc::new(Notify::new());

        let (entered_tx, proceed_rx) = (entered.clone(), proceed.clone());
        let definition = Arc::new(
            WorkflowDefinition::builder("wf-cancel", "Cancel")
                .node(FnNode::new("a", move |_input, _state| {
                    let entered = entered_tx.clone();
                    let proceed = proceed_rx.clone();
                    async move {
                        entered.notify_one();
                        proceed.notified().await;
                        Ok(NodeResult::next("b", json!({"a": 1})))
                    }
                }))
                .node(FnNode::new("b", |_input, _state| async move {
                    Ok(NodeResult::complete(json!({"b": 1})))
                }))
                .build()
                .unwrap(),
        );
        let executor = Arc::new(executor());
        let mut rx = executor.event_bus().subscribe();

        let task = {
            let executor = executor.clone();
            let definition = definition.clone();
            tokio::spawn(async move { executor.execute(&definition, WorkflowData::new()).await })
        };

        entered.notified().await;
        let run_id = match rx.recv().await.unwrap() {
            WorkflowEvent::WorkflowStarted { run_id, .. } => run_id,
            other => panic!("unexpected first event: {other:?}"),
        };
        assert!(executor.is_active(&run_id));

        let outcome = executor.cancel(run_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Requested);
        proceed.notify_one();

        let state = task.await.unwrap().unwrap();
        assert_eq!(state.status, WorkflowStatus::Cancelled);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.data["a"], 1);
        assert!(!state.data.contains_key("b"));
        assert!(!executor.is_active(&run_id));
    }

    #[tokio::test]
    async fn held_lock_rejects_resume() {
        let lock = LocalRunLock::new();
        let executor = executor().with_lock(lock.clone());
        let paused = executor
            .execute(&pausing_definition(), WorkflowData::new())
            .await
            .unwrap();
        assert!(!lock.is_held(&paused.run_id));

        assert!(lock.acquire(&paused.run_id).await.unwrap());
        let err = executor
            .resume(&pausing_definition(), paused.clone(), WorkflowData::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::RunLocked(id) if id == paused.run_id));

        lock.release(&paused.run_id).await.unwrap();
        let done = executor
            .resume(&pausing_definition(), paused, data(json!({"x": 3})))
            .await
            .unwrap();
        assert_eq!(done.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn config_applies_limits() {
        let config = ExecutorConfig {
            max_steps: 1,
            node_timeout_secs: Some(60),
            event_capacity: 8,
        };
        let executor = executor().with_config(&config);

        let state = executor
            .execute(&linear_definition(), WorkflowData::new())
            .await
            .unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state.last_error().unwrap().contains("step limit of 1"));
    }
}
