//! Event types for the workflow event bus.
//!
//! `WorkflowEvent` is broadcast at every lifecycle transition of a run.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle events emitted by the executor.
///
/// Delivery is fire-and-forget: a missing or lagging subscriber never blocks
/// or fails the transition being reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A new run was created and persisted.
    WorkflowStarted { run_id: Uuid, input: Value },

    /// The executor is about to invoke a node.
    WorkflowNodeEntered { run_id: Uuid, node: String },

    /// A node returned successfully.
    WorkflowNodeExited {
        run_id: Uuid,
        node: String,
        output: Value,
    },

    /// The run suspended awaiting external input.
    WorkflowPaused { run_id: Uuid, reason: String },

    /// A paused run was resumed with additional input.
    WorkflowResumed { run_id: Uuid, input: Value },

    /// The run reached `Completed`.
    WorkflowCompleted { run_id: Uuid, output: Value },

    /// The run reached `Failed`.
    WorkflowFailed { run_id: Uuid, error: String },

    /// The run was cancelled by an external request.
    WorkflowCancelled { run_id: Uuid },
}

impl WorkflowEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowStarted { run_id, .. }
            | WorkflowEvent::WorkflowNodeEntered { run_id, .. }
            | WorkflowEvent::WorkflowNodeExited { run_id, .. }
            | WorkflowEvent::WorkflowPaused { run_id, .. }
            | WorkflowEvent::WorkflowResumed { run_id, .. }
            | WorkflowEvent::WorkflowCompleted { run_id, .. }
            | WorkflowEvent::WorkflowFailed { run_id, .. }
            | WorkflowEvent::WorkflowCancelled { run_id } => *run_id,
        }
    }

    /// Short snake_case name, matching the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::WorkflowStarted { .. } => "workflow_started",
            WorkflowEvent::WorkflowNodeEntered { .. } => "workflow_node_entered",
            WorkflowEvent::WorkflowNodeExited { .. } => "workflow_node_exited",
            WorkflowEvent::WorkflowPaused { .. } => "workflow_paused",
            WorkflowEvent::WorkflowResumed { .. } => "workflow_resumed",
            WorkflowEvent::WorkflowCompleted { .. } => "workflow_completed",
            WorkflowEvent::WorkflowFailed { .. } => "workflow_failed",
            WorkflowEvent::WorkflowCancelled { .. } => "workflow_cancelled",
        }
    }
}
