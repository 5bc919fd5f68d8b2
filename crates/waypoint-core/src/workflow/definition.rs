//! Workflow definitions: a named graph of nodes with a start node.
//!
//! Definitions are assembled in code and are never persisted. Resuming a
//! run requires the caller to supply the same (or a compatible) definition
//! that started it.

use std::collections::HashMap;

use thiserror::Error;

use super::node::{BoxNode, Node};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Structural problems with a definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// A start node or transition target does not exist.
    #[error("node '{0}' not found in workflow definition")]
    NodeNotFound(String),

    /// Two nodes share an id.
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    /// The definition has no nodes at all.
    #[error("workflow definition '{0}' has no nodes")]
    EmptyDefinition(String),
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// Immutable graph of nodes. Transitions are decided by the nodes themselves
/// through `NodeResult::Continue { next_node, .. }`.
#[derive(Debug)]
pub struct WorkflowDefinition {
    id: String,
    name: String,
    description: Option<String>,
    start_node: String,
    nodes: HashMap<String, BoxNode>,
}

impl WorkflowDefinition {
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder {
            id: id.into(),
            name: name.into(),
            description: None,
            start_node: None,
            nodes: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn start_node(&self) -> &str {
        &self.start_node
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Result<&BoxNode, DefinitionError> {
        self.nodes
            .get(id)
            .ok_or_else(|| DefinitionError::NodeNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Node ids in sorted order.
    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Check that the start node exists.
    ///
    /// `build()` deliberately accepts an unknown start node: the executor
    /// records that as a failed run so it shows up in history. Call this
    /// to reject such definitions up front instead.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.contains(&self.start_node) {
            Ok(())
        } else {
            Err(DefinitionError::NodeNotFound(self.start_node.clone()))
        }
    }
}

/// Builder for [`WorkflowDefinition`].
pub struct WorkflowDefinitionBuilder {
    id: String,
    name: String,
    description: Option<String>,
    start_node: Option<String>,
    nodes: Vec<BoxNode>,
}

impl WorkflowDefinitionBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the start node. Defaults to the first node added.
    pub fn start(mut self, node_id: impl Into<String>) -> Self {
        self.start_node = Some(node_id.into());
        self
    }

    pub fn node<T: Node + 'static>(mut self, node: T) -> Self {
        self.nodes.push(BoxNode::new(node));
        self
    }

    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        let Some(first) = self.nodes.first() else {
            return Err(DefinitionError::EmptyDefinition(self.id));
        };
        let start_node = self.start_node.unwrap_or_else(|| first.id().to_string());

        let mut nodes = HashMap::with_capacity(self.nodes.len());
        for node in self.nodes {
            let id = node.id().to_string();
            if nodes.contains_key(&id) {
                return Err(DefinitionError::DuplicateNode(id));
            }
            nodes.insert(id, node);
        }

        Ok(WorkflowDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            start_node,
            nodes,
        })
    }
}
