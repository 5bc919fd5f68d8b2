//! Workflow run state: the single unit of durable truth for one execution.
//!
//! `WorkflowState` is a value type. Every mutator takes `&self` and returns a
//! new state, so the executor always persists exactly the last value it
//! produced and callers never observe a half-applied transition.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StateTransitionError;

/// Open key-value working memory of a run.
pub type WorkflowData = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Statuses from which no further transition is permitted.
    pub const TERMINAL: [WorkflowStatus; 3] = [
        WorkflowStatus::Completed,
        WorkflowStatus::Failed,
        WorkflowStatus::Cancelled,
    ];

    /// Every status, in declaration order.
    pub const ALL: [WorkflowStatus; 5] = [
        WorkflowStatus::Running,
        WorkflowStatus::Paused,
        WorkflowStatus::Completed,
        WorkflowStatus::Failed,
        WorkflowStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Lowercase storage representation (`running`, `paused`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(WorkflowStatus::Running),
            "paused" => Ok(WorkflowStatus::Paused),
            "completed" => Ok(WorkflowStatus::Completed),
            "failed" => Ok(WorkflowStatus::Failed),
            "cancelled" => Ok(WorkflowStatus::Cancelled),
            other => Err(format!("invalid workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// HistoryEntry
// ---------------------------------------------------------------------------

/// Immutable record of one node execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub node_id: String,
    /// Input handed to the node.
    pub input: Value,
    /// Node output, present only on success.
    #[serde(default)]
    pub output: Option<Value>,
    pub succeeded: bool,
    /// Failure description, present only when `succeeded` is false.
    #[serde(default)]
    pub error_message: Option<String>,
    /// Wall-clock seconds spent in the node.
    pub duration: f64,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn success(
        node_id: impl Into<String>,
        input: Value,
        output: Option<Value>,
        duration: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            input,
            output,
            succeeded: true,
            error_message: None,
            duration: duration.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        node_id: impl Into<String>,
        input: Value,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            input,
            output: None,
            succeeded: false,
            error_message: Some(error.into()),
            duration: duration.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowState
// ---------------------------------------------------------------------------

/// Aggregate root for one execution run of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// ID of the definition that produced this run.
    pub workflow_id: String,
    /// Globally unique, immutable run identifier (UUIDv7).
    pub run_id: Uuid,
    /// Node to execute next. `None` once the run is terminal.
    pub current_node: Option<String>,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub data: WorkflowData,
    /// Append-only execution history, one entry per node attempt.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    /// Set only while `status == Paused`.
    #[serde(default)]
    pub pause_reason: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub paused_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    /// Create a fresh `Running` state positioned at `start_node`.
    pub fn new(workflow_id: impl Into<String>, start_node: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: Uuid::now_v7(),
            current_node: Some(start_node.into()),
            status: WorkflowStatus::Running,
            data: WorkflowData::new(),
            history: Vec::new(),
            pause_reason: None,
            started_at: Some(Utc::now()),
            paused_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Error message of the most recent failed history entry, if the last
    /// attempt failed.
    pub fn last_error(&self) -> Option<&str> {
        self.history
            .last()
            .filter(|entry| !entry.succeeded)
            .and_then(|entry| entry.error_message.as_deref())
    }

    /// Check the status/timestamp invariants.
    ///
    /// Paused runs carry a reason and a pause timestamp; terminal runs carry a
    /// completion timestamp and no current node.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            WorkflowStatus::Paused => self.paused_at.is_some() && self.pause_reason.is_some(),
            WorkflowStatus::Running => self.pause_reason.is_none(),
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled => {
                self.completed_at.is_some() && self.current_node.is_none()
            }
        }
    }

    // -----------------------------------------------------------------------
    // Data mutators
    // -----------------------------------------------------------------------

    /// Shallow-merge `values` into `data`. Existing keys are overwritten.
    pub fn merge(&self, values: &WorkflowData) -> Self {
        let mut next = self.clone();
        for (key, value) in values {
            next.data.insert(key.clone(), value.clone());
        }
        next
    }

    /// Merge a node's output into `data`.
    ///
    /// Objects merge key by key. Any other non-null value is stored under the
    /// producing node's id. `Null` leaves `data` untouched.
    pub fn merge_output(&self, node_id: &str, output: &Value) -> Self {
        match output {
            Value::Object(map) => self.merge(map),
            Value::Null => self.clone(),
            other => {
                let mut next = self.clone();
                next.data.insert(node_id.to_string(), other.clone());
                next
            }
        }
    }

    /// Append one history entry.
    pub fn add_history(&self, entry: HistoryEntry) -> Self {
        let mut next = self.clone();
        next.history.push(entry);
        next
    }

    // -----------------------------------------------------------------------
    // Status transitions
    // -----------------------------------------------------------------------

    /// Move a running state to its next node.
    pub fn advance_to(&self, node: impl Into<String>) -> Result<Self, StateTransitionError> {
        self.require(&[WorkflowStatus::Running], WorkflowStatus::Running)?;
        let mut next = self.clone();
        next.current_node = Some(node.into());
        Ok(next)
    }

    /// `Running -> Paused`. When `resume_at` is given the run continues there.
    pub fn pause(
        &self,
        reason: impl Into<String>,
        resume_at: Option<String>,
    ) -> Result<Self, StateTransitionError> {
        self.require(&[WorkflowStatus::Running], WorkflowStatus::Paused)?;
        let mut next = self.clone();
        next.status = WorkflowStatus::Paused;
        next.pause_reason = Some(reason.into());
        next.paused_at = Some(Utc::now());
        if let Some(node) = resume_at {
            next.current_node = Some(node);
        }
        Ok(next)
    }

    /// `Paused -> Running`, clearing the pause reason and timestamp.
    pub fn resume(&self) -> Result<Self, StateTransitionError> {
        self.require(&[WorkflowStatus::Paused], WorkflowStatus::Running)?;
        let mut next = self.clone();
        next.status = WorkflowStatus::Running;
        next.pause_reason = None;
        next.paused_at = None;
        Ok(next)
    }

    /// `Running -> Completed`.
    pub fn complete(&self) -> Result<Self, StateTransitionError> {
        self.require(&[WorkflowStatus::Running], WorkflowStatus::Completed)?;
        Ok(self.finish(WorkflowStatus::Completed))
    }

    /// `Running -> Failed`. The failure itself is recorded in `history`.
    pub fn fail(&self) -> Result<Self, StateTransitionError> {
        self.require(&[WorkflowStatus::Running], WorkflowStatus::Failed)?;
        Ok(self.finish(WorkflowStatus::Failed))
    }

    /// `Running | Paused -> Cancelled`.
    pub fn cancel(&self) -> Result<Self, StateTransitionError> {
        self.require(
            &[WorkflowStatus::Running, WorkflowStatus::Paused],
            WorkflowStatus::Cancelled,
        )?;
        Ok(self.finish(WorkflowStatus::Cancelled))
    }

    fn finish(&self, status: WorkflowStatus) -> Self {
        let mut next = self.clone();
        next.status = status;
        next.current_node = None;
        next.pause_reason = None;
        next.paused_at = None;
        if next.completed_at.is_none() {
            next.completed_at = Some(Utc::now());
        }
        next
    }

    fn require(
        &self,
        allowed: &[WorkflowStatus],
        to: WorkflowStatus,
    ) -> Result<(), StateTransitionError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(StateTransitionError::InvalidTransition {
                from: self.status,
                to,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
