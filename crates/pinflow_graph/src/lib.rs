// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dataflow graph engine for pinflow.
//!
//! Nodes declare directional pins, pins are linked into a directed graph,
//! and the graph keeps a topological order of its nodes. A
//! [`GraphExecutor`] runs the nodes one at a time or in waves of
//! independent nodes, moving values along links.
//!
//! ## Architecture
//!
//! - Pins and nodes never reference each other directly. Links and owners
//!   are ids resolved through the graph's [`GraphContext`].
//! - Node behaviour lives behind the [`Operator`] trait; a
//!   [`NodeRegistry`] rebuilds operators by class tag when loading.
//! - Graphs persist as plain [`GraphState`] documents (JSON text).

pub mod connection;
pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod pin;
pub mod registry;
pub mod state;

pub use connection::{AllowAll, ConnectionRule, TypeChecked};
pub use context::GraphContext;
pub use error::{GraphError, NodeError, Result};
pub use executor::{
    ExecutionError, ExecutionMode, ExecutionReport, ExecutorConfig, GraphExecutor, RunState,
};
pub use graph::{Graph, GraphId};
pub use node::{Node, NodeId, NodeStatus, Operator, Pins, SharedNode};
pub use nodes::builtin_registry;
pub use pin::{FanIn, Pin, PinDirection, PinId, PinKind};
pub use registry::{NodeCategory, NodeRegistry, NodeType};
pub use state::{GraphState, NodeState, PinState};
