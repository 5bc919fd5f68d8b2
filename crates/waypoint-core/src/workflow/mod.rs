//! Workflow engine core: definitions, nodes and the durable executor.
//!
//! - `node` -- the `Node` protocol, `NodeResult`, `BoxNode` and `FnNode`
//! - `definition` -- immutable node graph with a start node
//! - `executor` -- state machine that checkpoints after every node
//! - `lock` -- optional run-level mutual exclusion
//! - `sweeper` -- periodic retention cleanup

pub mod definition;
pub mod executor;
pub mod lock;
pub mod node;
pub mod sweeper;

pub use definition::{DefinitionError, WorkflowDefinition, WorkflowDefinitionBuilder};
pub use executor::{CancelOutcome, Executor, ExecutorError};
pub use lock::{LocalRunLock, NoopRunLock, RunLock};
pub use node::{BoxNode, FnNode, Node, NodeError, NodeResult};
pub use sweeper::ExpirySweeper;
