// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plain-data persistence documents.
//!
//! ```text
//! GraphState { version, id, name, fan_in, nodes: [NodeState] }
//! NodeState  { id, name, class, params, pins: { name: PinState } }
//! PinState   { id, name, direction, kind, links: [PinId], value, owning_node }
//! ```
//!
//! The graph context and the topological order are never persisted. Both
//! are re-derived when a loaded graph re-adds its nodes.

use crate::graph::GraphId;
use crate::node::NodeId;
use crate::pin::{FanIn, PinDirection, PinId, PinKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current document format version
pub const FORMAT_VERSION: u32 = 1;

/// Persisted pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinState {
    /// Pin ID
    pub id: PinId,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Direction
    pub direction: PinDirection,
    /// Declared kind
    #[serde(default)]
    pub kind: PinKind,
    /// Linked peer ids
    #[serde(default)]
    pub links: Vec<PinId>,
    /// Current value
    #[serde(default)]
    pub value: Value,
    /// Declaring node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owning_node: Option<NodeId>,
}

/// Persisted node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Node ID
    pub id: NodeId,
    /// Display name
    pub name: String,
    /// Registry class tag
    pub class: String,
    /// Constructor argument handed back to the registry factory
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    /// Pins by declared name
    pub pins: IndexMap<String, PinState>,
}

/// Persisted graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    /// Document format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Graph ID
    pub id: GraphId,
    /// Graph name
    pub name: String,
    /// Fan-in policy the links were made under
    #[serde(default)]
    pub fan_in: FanIn,
    /// Nodes in insertion order
    pub nodes: Vec<NodeState>,
}

fn default_version() -> u32 {
    FORMAT_VERSION
}
