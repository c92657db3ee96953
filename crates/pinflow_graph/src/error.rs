// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error types for graph construction, persistence and node execution.

use crate::graph::GraphId;
use crate::node::NodeId;
use crate::pin::{PinDirection, PinId};
use thiserror::Error;

/// Structural errors raised by pins, nodes, the context and the graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Both pins have the same direction
    #[error("cannot link pins {a:?} and {b:?}: both are {direction:?}")]
    LinkDirection {
        /// First pin
        a: PinId,
        /// Second pin
        b: PinId,
        /// Shared direction
        direction: PinDirection,
    },

    /// A single fan-in input pin already carries a link
    #[error("input pin {pin:?} already linked to {existing:?}")]
    FanInViolation {
        /// The input pin
        pin: PinId,
        /// The link it already holds
        existing: PinId,
    },

    /// Id already present in a registry
    #[error("id already registered: {0}")]
    DuplicateId(String),

    /// Node belongs to another graph
    #[error("node {node:?} is already owned by graph {graph:?}")]
    AlreadyOwned {
        /// The node
        node: NodeId,
        /// Its current graph
        graph: GraphId,
    },

    /// Node has not been registered into the context it was queried with
    #[error("node {0:?} is not bound to this graph context")]
    UnboundContext(NodeId),

    /// Loaded state does not match the live node's declared pins
    #[error("schema mismatch on node {node}: {reason}")]
    SchemaMismatch {
        /// Node name or class
        node: String,
        /// What differed
        reason: String,
    },

    /// The dependency relation contains a cycle
    #[error("cyclic dependency detected in graph '{graph}'")]
    CyclicDependency {
        /// Graph name
        graph: String,
    },

    /// A link points at a pin the context cannot resolve
    #[error("pin {pin:?} links to unknown pin {peer:?}")]
    DanglingLink {
        /// The local pin
        pin: PinId,
        /// The unresolved peer
        peer: PinId,
    },

    /// A pin lists a peer that does not list it back
    #[error("pin {pin:?} links to {peer:?}, which does not link back")]
    AsymmetricLink {
        /// The pin holding the link
        pin: PinId,
        /// The peer missing the reverse link
        peer: PinId,
    },

    /// No node type registered under this class tag
    #[error("unknown node class: {0}")]
    UnknownNodeClass(String),

    /// Node not found
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// Pin not found
    #[error("pin not found: {0}")]
    PinNotFound(String),

    /// Pin name declared twice on one node
    #[error("pin '{0}' already declared")]
    DuplicatePinName(String),

    /// The connection rule rejected the pair
    #[error("incompatible pins {a:?} and {b:?}")]
    IncompatiblePins {
        /// First pin
        a: PinId,
        /// Second pin
        b: PinId,
    },

    /// Constructor parameters could not be interpreted
    #[error("invalid parameters for {class}: {reason}")]
    InvalidParams {
        /// Node class tag
        class: String,
        /// Why they were rejected
        reason: String,
    },

    /// Document written by a newer format version
    #[error("graph document version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version in the document
        found: u32,
        /// Highest version this build reads
        supported: u32,
    },

    /// JSON encode/decode failure
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Errors raised from inside a node's `execute`.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A required input carried no value
    #[error("missing input: {0}")]
    MissingInput(String),

    /// An input carried a value of the wrong shape
    #[error("invalid input '{pin}': {reason}")]
    InvalidInput {
        /// Pin name
        pin: String,
        /// What was wrong
        reason: String,
    },

    /// The node exceeded the executor's per-node timeout
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Free-form failure
    #[error("{0}")]
    Message(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl NodeError {
    /// Create a free-form error
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}
