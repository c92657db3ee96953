// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node definitions for the graph framework.
//!
//! A [`Node`] pairs an explicit pin table with an [`Operator`], the
//! behaviour of its concrete type. Nodes refer to each other only through
//! pin ids resolved by a [`GraphContext`].

use crate::context::GraphContext;
use crate::error::{GraphError, NodeError, Result};
use crate::graph::GraphId;
use crate::pin::{FanIn, Pin, PinDirection, PinId};
use crate::registry::NodeRegistry;
use crate::state::NodeState;
use async_trait::async_trait;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution status of a node within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Not started yet
    Pending,
    /// Currently executing
    Running,
    /// Completed and committed its outputs
    Finished,
    /// `execute` returned an error
    Failed,
    /// Interrupted by cancellation
    Cancelled,
    /// Never started because the run aborted first
    Skipped,
}

/// A node shared between its graph and the context
pub type SharedNode = Arc<RwLock<Node>>;

/// The pin table of a node, keyed by declared name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pins {
    pins: IndexMap<String, Pin>,
}

impl Pins {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a pin under `name`
    pub fn declare(&mut self, name: impl Into<String>, pin: Pin) -> Result<&mut Pin> {
        let name = name.into();
        if self.pins.contains_key(&name) {
            return Err(GraphError::DuplicatePinName(name));
        }
        Ok(self.pins.entry(name).or_insert(pin))
    }

    /// Declare an input pin
    pub fn input(&mut self, name: impl Into<String>) -> Result<&mut Pin> {
        self.declare(name, Pin::input())
    }

    /// Declare an output pin
    pub fn output(&mut self, name: impl Into<String>) -> Result<&mut Pin> {
        self.declare(name, Pin::output())
    }

    /// Get a pin by declared name
    pub fn get(&self, name: &str) -> Option<&Pin> {
        self.pins.get(name)
    }

    /// Get a mutable pin by declared name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Pin> {
        self.pins.get_mut(name)
    }

    /// Find a pin by ID
    pub fn find(&self, id: PinId) -> Option<(&str, &Pin)> {
        self.pins
            .iter()
            .find(|(_, p)| p.id == id)
            .map(|(n, p)| (n.as_str(), p))
    }

    /// Find a mutable pin by ID
    pub fn find_mut(&mut self, id: PinId) -> Option<&mut Pin> {
        self.pins.values_mut().find(|p| p.id == id)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Pin> {
        self.pins.shift_remove(name)
    }

    /// Check whether a pin is declared
    pub fn contains(&self, name: &str) -> bool {
        self.pins.contains_key(name)
    }

    /// Value of a pin, if declared
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.pins.get(name).map(Pin::value)
    }

    /// Value of an input pin, or `MissingInput` if undeclared or `null`
    pub fn require(&self, name: &str) -> std::result::Result<&Value, NodeError> {
        match self.pins.get(name).map(Pin::value) {
            Some(Value::Null) | None => Err(NodeError::MissingInput(name.to_string())),
            Some(value) => Ok(value),
        }
    }

    /// Write a pin's value
    pub fn set_value(
        &mut self,
        name: &str,
        value: impl Into<Value>,
    ) -> std::result::Result<(), NodeError> {
        let pin = self
            .pins
            .get_mut(name)
            .ok_or_else(|| NodeError::msg(format!("no pin named '{name}'")))?;
        pin.set_value(value);
        Ok(())
    }

    /// Iterate over `(name, pin)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Pin)> {
        self.pins.iter().map(|(n, p)| (n.as_str(), p))
    }

    /// Iterate mutably over `(name, pin)` pairs
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Pin)> {
        self.pins.iter_mut().map(|(n, p)| (n.as_str(), p))
    }

    /// Input pins
    pub fn inputs(&self) -> impl Iterator<Item = &Pin> {
        self.pins.values().filter(|p| p.is_input())
    }

    /// Output pins
    pub fn outputs(&self) -> impl Iterator<Item = &Pin> {
        self.pins.values().filter(|p| p.is_output())
    }

    /// Number of pins
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

/// The executable behaviour of a node type.
///
/// `declare` runs once when the node is constructed. `execute` reads the
/// current input values and writes results into the node's own output
/// pins; it never sees pins of other nodes.
#[async_trait]
pub trait Operator: Send + Sync + 'static {
    /// Registry class tag
    fn class(&self) -> &str;

    /// Declare the node's pins
    fn declare(&self, pins: &mut Pins) -> Result<()>;

    /// Constructor argument persisted with the node
    fn params(&self) -> Value {
        Value::Null
    }

    /// Compute outputs from inputs
    async fn execute(&self, pins: &mut Pins) -> std::result::Result<(), NodeError>;
}

/// A node instance
pub struct Node {
    id: NodeId,
    name: String,
    pins: Pins,
    owning_graph: Option<GraphId>,
    operator: Arc<dyn Operator>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class", &self.operator.class())
            .field("pins", &self.pins)
            .field("owning_graph", &self.owning_graph)
            .finish()
    }
}

impl Node {
    /// Create a node from an operator
    pub fn new(name: Option<&str>, operator: impl Operator) -> Result<Self> {
        Self::from_operator(name, Arc::new(operator))
    }

    /// Create a node from a shared operator
    pub fn from_operator(name: Option<&str>, operator: Arc<dyn Operator>) -> Result<Self> {
        let id = NodeId::new();
        let name = match name {
            Some(name) => name.to_string(),
            None => format!("{}_{}", operator.class(), &id.0.simple().to_string()[..8]),
        };

        let mut declared = Pins::new();
        operator.declare(&mut declared)?;

        let mut node = Self {
            id,
            name,
            pins: Pins::new(),
            owning_graph: None,
            operator,
        };
        for (pin_name, pin) in declared.pins {
            node.add_pin(pin_name, pin)?;
        }
        Ok(node)
    }

    /// Wrap into a shared handle
    pub fn into_shared(self) -> SharedNode {
        Arc::new(RwLock::new(self))
    }

    /// Node ID
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry class tag
    pub fn class(&self) -> &str {
        self.operator.class()
    }

    /// Constructor argument of the operator
    pub fn params(&self) -> Value {
        self.operator.params()
    }

    /// Graph that added this node
    pub fn owning_graph(&self) -> Option<GraphId> {
        self.owning_graph
    }

    pub(crate) fn set_owning_graph(&mut self, graph: Option<GraphId>) {
        self.owning_graph = graph;
    }

    pub(crate) fn operator(&self) -> Arc<dyn Operator> {
        Arc::clone(&self.operator)
    }

    /// Pin table
    pub fn pins(&self) -> &Pins {
        &self.pins
    }

    pub(crate) fn pins_mut(&mut self) -> &mut Pins {
        &mut self.pins
    }

    /// Get a pin by declared name
    pub fn pin(&self, name: &str) -> Option<&Pin> {
        self.pins.get(name)
    }

    /// Get a mutable pin by declared name
    pub fn pin_mut(&mut self, name: &str) -> Option<&mut Pin> {
        self.pins.get_mut(name)
    }

    /// ID of a pin by declared name
    pub fn pin_id(&self, name: &str) -> Result<PinId> {
        self.pins
            .get(name)
            .map(|p| p.id)
            .ok_or_else(|| GraphError::PinNotFound(format!("{}.{name}", self.name)))
    }

    /// Declare an additional pin.
    ///
    /// The pin is stamped with this node as its owner and an unnamed pin
    /// gets the owner-qualified name `"<node>.<pin>"`.
    pub fn add_pin(&mut self, name: impl Into<String>, mut pin: Pin) -> Result<PinId> {
        let name = name.into();
        if pin.name.is_none() {
            pin.name = Some(format!("{}.{name}", self.name));
        }
        pin.set_owning_node(self.id);
        let id = pin.id;
        self.pins.declare(name, pin)?;
        Ok(id)
    }

    /// Link one of this node's pins to a pin on another node, single fan-in
    pub fn link(&mut self, pin: &str, other: &mut Node, other_pin: &str) -> Result<()> {
        self.link_with(pin, other, other_pin, FanIn::Single)
    }

    /// Link one of this node's pins to a pin on another node
    pub fn link_with(
        &mut self,
        pin: &str,
        other: &mut Node,
        other_pin: &str,
        fan_in: FanIn,
    ) -> Result<()> {
        let own_name = format!("{}.{pin}", self.name);
        let other_name = format!("{}.{other_pin}", other.name);
        let a = self
            .pins
            .get_mut(pin)
            .ok_or(GraphError::PinNotFound(own_name))?;
        let b = other
            .pins
            .get_mut(other_pin)
            .ok_or(GraphError::PinNotFound(other_name))?;
        a.link_with(b, fan_in)
    }

    /// Break a link between one of this node's pins and a pin on another node
    pub fn unlink(&mut self, pin: &str, other: &mut Node, other_pin: &str) {
        if let (Some(a), Some(b)) = (self.pins.get_mut(pin), other.pins.get_mut(other_pin)) {
            a.unlink(b);
        }
    }

    /// Resolve the distinct set of nodes this node depends on.
    ///
    /// Node X depends on node Y iff an input pin of X links to an output pin
    /// of Y. Fails if this node is not registered in `ctx`.
    pub fn dependencies(&self, ctx: &GraphContext) -> Result<IndexSet<NodeId>> {
        if self.owning_graph != Some(ctx.graph_id()) || !ctx.contains_node(self.id) {
            return Err(GraphError::UnboundContext(self.id));
        }
        let mut deps = IndexSet::new();
        for pin in self.pins.inputs() {
            for peer in pin.links() {
                let owner = ctx.pin_owner(*peer).ok_or(GraphError::DanglingLink {
                    pin: pin.id,
                    peer: *peer,
                })?;
                deps.insert(owner);
            }
        }
        Ok(deps)
    }

    /// Produce the plain-data representation
    pub fn dump(&self) -> NodeState {
        NodeState {
            id: self.id,
            name: self.name.clone(),
            class: self.class().to_string(),
            params: self.params(),
            pins: self
                .pins
                .iter()
                .map(|(n, p)| (n.to_string(), p.dump()))
                .collect(),
        }
    }

    /// Restore identity, pin ids, links and values from `state`.
    ///
    /// Every pin the operator declares must be stored with the same
    /// direction. Stored pins the operator does not declare were added with
    /// [`Node::add_pin`] and are re-created.
    pub fn load(&mut self, state: NodeState) -> Result<()> {
        if state.class != self.class() {
            return Err(GraphError::SchemaMismatch {
                node: state.name,
                reason: format!("class '{}' loaded into '{}'", state.class, self.class()),
            });
        }
        let mismatch = |reason: String| GraphError::SchemaMismatch {
            node: state.name.clone(),
            reason,
        };
        for (pin_name, declared) in self.pins.iter() {
            let stored = state
                .pins
                .get(pin_name)
                .ok_or_else(|| mismatch(format!("declared pin '{pin_name}' not stored")))?;
            if declared.direction != stored.direction {
                return Err(mismatch(format!(
                    "pin '{pin_name}' is {:?}, stored as {:?}",
                    declared.direction, stored.direction
                )));
            }
        }

        self.id = state.id;
        self.name = state.name;
        for (pin_name, pin_state) in state.pins {
            if let Some(pin) = self.pins.get_mut(&pin_name) {
                pin.load(pin_state);
                pin.set_owning_node(self.id);
            } else {
                let mut pin = Pin::from_state(pin_state);
                pin.set_owning_node(self.id);
                self.pins.declare(pin_name, pin)?;
            }
        }
        Ok(())
    }

    /// Encode as JSON text
    pub fn dumps(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.dump())?)
    }

    /// Decode from JSON text, constructing the operator through `registry`
    pub fn loads(text: &str, registry: &NodeRegistry) -> Result<Self> {
        let state: NodeState = serde_json::from_str(text)?;
        registry.instantiate(state)
    }

    /// Pins whose direction matches
    pub fn pins_with_direction(&self, direction: PinDirection) -> impl Iterator<Item = &Pin> {
        self.pins.iter().map(|(_, p)| p).filter(move |p| p.direction == direction)
    }
}
