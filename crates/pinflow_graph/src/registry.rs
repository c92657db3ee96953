// SPDX-License-Identifier: MIT OR Apache-2.0
//! Registry of node types used to reconstruct nodes by class tag.
//!
//! The registry is a plain value: build it once at start-up and pass it to
//! whatever loads persisted graphs.

use crate::error::{GraphError, Result};
use crate::node::{Node, Operator};
use crate::state::NodeState;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Node type category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeCategory {
    /// Entry points and control flow
    Flow,
    /// Value producing or combining nodes
    Data,
    /// Utility nodes
    Utility,
    /// Custom/user-defined
    Custom,
}

/// One-argument operator constructor
pub type OperatorFactory = Arc<dyn Fn(&Value) -> Result<Box<dyn Operator>> + Send + Sync>;

/// Node type definition
#[derive(Clone)]
pub struct NodeType {
    /// Class tag, the registry key
    pub class: String,
    /// Display name
    pub name: String,
    /// Category
    pub category: NodeCategory,
    /// Description
    pub description: String,
    /// Constructor taking the persisted params
    pub factory: OperatorFactory,
}

impl std::fmt::Debug for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeType")
            .field("class", &self.class)
            .field("name", &self.name)
            .field("category", &self.category)
            .finish_non_exhaustive()
    }
}

impl NodeType {
    /// Create a node type
    pub fn new<F>(class: impl Into<String>, category: NodeCategory, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Box<dyn Operator>> + Send + Sync + 'static,
    {
        let class = class.into();
        Self {
            name: class.clone(),
            class,
            category,
            description: String::new(),
            factory: Arc::new(factory),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Registry of available node types
#[derive(Debug, Default, Clone)]
pub struct NodeRegistry {
    /// Registered node types by class tag
    types: IndexMap<String, NodeType>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            types: IndexMap::new(),
        }
    }

    /// Register a node type, replacing any type with the same class tag
    pub fn register(&mut self, node_type: NodeType) {
        tracing::debug!("Registering node class {}", node_type.class);
        if let Some(previous) = self.types.insert(node_type.class.clone(), node_type) {
            tracing::warn!("Node class {} re-registered", previous.class);
        }
    }

    /// Register an operator constructed with `Default`, ignoring params
    pub fn register_default<T>(&mut self, category: NodeCategory)
    where
        T: Operator + Default,
    {
        let class = T::default().class().to_string();
        self.register(NodeType::new(class, category, |_| {
            Ok(Box::new(T::default()) as Box<dyn Operator>)
        }));
    }

    /// Get a node type by class tag
    pub fn get(&self, class: &str) -> Option<&NodeType> {
        self.types.get(class)
    }

    /// Check whether a class tag is registered
    pub fn contains(&self, class: &str) -> bool {
        self.types.contains_key(class)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeType> {
        self.types.values()
    }

    /// Get types by category
    pub fn types_in_category(&self, category: NodeCategory) -> impl Iterator<Item = &NodeType> {
        self.types.values().filter(move |t| t.category == category)
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no types are registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Construct an operator from a class tag and its params
    pub fn create_operator(&self, class: &str, params: &Value) -> Result<Box<dyn Operator>> {
        let node_type = self
            .get(class)
            .ok_or_else(|| GraphError::UnknownNodeClass(class.to_string()))?;
        (node_type.factory)(params)
    }

    /// Create a fresh node from a class tag
    pub fn create_node(&self, class: &str, name: Option<&str>, params: &Value) -> Result<Node> {
        let operator = self.create_operator(class, params)?;
        Node::from_operator(name, Arc::from(operator))
    }

    /// Reconstruct a persisted node: build its operator, then load the state
    pub fn instantiate(&self, state: NodeState) -> Result<Node> {
        let mut node = self.create_node(&state.class, Some(&state.name), &state.params)?;
        node.load(state)?;
        Ok(node)
    }
}
