//! Node protocol: a single unit of executable workflow logic.
//!
//! Follows the same blanket-impl pattern as the rest of the crate's dynamic
//! dispatch wrappers:
//! 1. `Node` uses native async fn in traits (RPITIT)
//! 2. An object-safe `NodeDyn` with boxed futures is blanket-implemented for every `Node`
//! 3. `BoxNode` wraps `Box<dyn NodeDyn>` so a definition can hold heterogeneous nodes

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use thiserror::Error;
use waypoint_types::workflow::WorkflowState;

// ---------------------------------------------------------------------------
// NodeResult
// ---------------------------------------------------------------------------

/// What a node asks the executor to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeResult {
    /// Merge `output` into the run's data and move on to `next_node`.
    Continue { output: Value, next_node: String },
    /// Suspend the run until it is resumed with external input.
    ///
    /// With `resume_at = None` the pausing node runs again on resume.
    Pause {
        reason: String,
        resume_at: Option<String>,
    },
    /// Merge `output` and finish the run successfully.
    Complete { output: Value },
    /// Finish the run as failed.
    Fail { error: String },
}

impl NodeResult {
    pub fn next(next_node: impl Into<String>, output: Value) -> Self {
        NodeResult::Continue {
            output,
            next_node: next_node.into(),
        }
    }

    /// Pause and re-run the same node on resume.
    pub fn pause(reason: impl Into<String>) -> Self {
        NodeResult::Pause {
            reason: reason.into(),
            resume_at: None,
        }
    }

    /// Pause and continue at `resume_at` on resume.
    pub fn pause_then(reason: impl Into<String>, resume_at: impl Into<String>) -> Self {
        NodeResult::Pause {
            reason: reason.into(),
            resume_at: Some(resume_at.into()),
        }
    }

    pub fn complete(output: Value) -> Self {
        NodeResult::Complete { output }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        NodeResult::Fail {
            error: error.into(),
        }
    }
}

/// Error raised from inside a node. The executor records it and fails the run.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct NodeError(pub String);

impl NodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for NodeError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for NodeError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        Self(format!("invalid node payload: {err}"))
    }
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A single unit of executable logic within a workflow definition.
///
/// The executor may invoke a node again after a crash that happened before
/// the previous attempt's result was persisted, so nodes should be
/// idempotent with respect to their own output where they can be.
pub trait Node: Send + Sync {
    /// Stable identifier, unique within a definition.
    fn id(&self) -> &str;

    /// Run the node. `input` is the step input; `state` is a read-only view
    /// of the run including its accumulated `data`.
    fn execute(
        &self,
        input: Value,
        state: &WorkflowState,
    ) -> impl Future<Output = Result<NodeResult, NodeError>> + Send;
}

/// Object-safe version of [`Node`] with boxed futures.
///
/// This trait exists solely to enable dynamic dispatch (`dyn NodeDyn`).
/// A blanket implementation is provided for all types implementing `Node`.
pub trait NodeDyn: Send + Sync {
    fn id(&self) -> &str;

    fn execute_boxed<'a>(
        &'a self,
        input: Value,
        state: &'a WorkflowState,
    ) -> Pin<Box<dyn Future<Output = Result<NodeResult, NodeError>> + Send + 'a>>;
}

impl<T: Node> NodeDyn for T {
    fn id(&self) -> &str {
        Node::id(self)
    }

    fn execute_boxed<'a>(
        &'a self,
        input: Value,
        state: &'a WorkflowState,
    ) -> Pin<Box<dyn Future<Output = Result<NodeResult, NodeError>> + Send + 'a>> {
        Box::pin(self.execute(input, state))
    }
}

/// Type-erased node held by a `WorkflowDefinition`.
pub struct BoxNode {
    inner: Box<dyn NodeDyn>,
}

impl BoxNode {
    pub fn new<T: Node + 'static>(node: T) -> Self {
        Self {
            inner: Box::new(node),
        }
    }

    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub async fn execute(
        &self,
        input: Value,
        state: &WorkflowState,
    ) -> Result<NodeResult, NodeError> {
        self.inner.execute_boxed(input, state).await
    }
}

impl std::fmt::Debug for BoxNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxNode").field("id", &self.id()).finish()
    }
}

// ---------------------------------------------------------------------------
// FnNode
// ---------------------------------------------------------------------------

/// Adapts an async closure into a [`Node`].
///
/// The closure receives the step input and an owned snapshot of the state.
///
/// ```
/// use serde_json::json;
/// use waypoint_core::workflow::node::{FnNode, NodeResult};
///
/// let node = FnNode::new("greet", |_input, _state| async move {
///     Ok(NodeResult::complete(json!({"greeting": "hello"})))
/// });
/// ```
pub struct FnNode<F> {
    id: String,
    f: F,
}

impl<F> FnNode<F> {
    pub fn new<Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, WorkflowState) -> Fut + Send + Sync,
        Fut: Future<Output = Result<NodeResult, NodeError>> + Send,
    {
        Self { id: id.into(), f }
    }
}

impl<F, Fut> Node for FnNode<F>
where
    F: Fn(Value, WorkflowState) -> Fut + Send + Sync,
    Fut: Future<Output = Result<NodeResult, NodeError>> + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn execute(
        &self,
        input: Value,
        state: &WorkflowState,
    ) -> impl Future<Output = Result<NodeResult, NodeError>> + Send {
        (self.f)(input, state.clone())
    }
}
