// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pin definitions for node inputs/outputs.
//!
//! A pin never holds a reference to its peers or its owner. Links and the
//! owning node are stored as ids and resolved through a
//! [`GraphContext`](crate::context::GraphContext).

use crate::error::{GraphError, Result};
use crate::node::NodeId;
use crate::state::PinState;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(pub Uuid);

impl PinId {
    /// Create a new random pin ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PinId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PinId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinDirection {
    /// Input pin
    Input,
    /// Output pin
    Output,
}

impl PinDirection {
    /// The opposite direction
    pub fn opposite(self) -> Self {
        match self {
            Self::Input => Self::Output,
            Self::Output => Self::Input,
        }
    }
}

/// Data type declared for a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinKind {
    /// Execution flow
    Exec,
    /// Any value (for generic nodes)
    #[default]
    Any,
    /// String value
    String,
    /// Integer value
    Integer,
    /// Floating point value
    Float,
    /// Boolean value
    Boolean,
    /// Opaque object
    Object,
    /// Array value
    List,
    /// Map value
    Dict,
}

impl PinKind {
    /// Check if this kind can connect to another kind
    pub fn can_connect_to(&self, other: &PinKind) -> bool {
        match (self, other) {
            // Exec only carries control flow
            (Self::Exec, k) | (k, Self::Exec) => *k == Self::Exec,
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Integer, Self::Float) | (Self::Float, Self::Integer) => true,
            (a, b) => a == b,
        }
    }
}

/// Link cardinality policy for input pins.
///
/// Output pins always fan out without bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FanIn {
    /// An input pin accepts at most one link
    #[default]
    Single,
    /// An input pin accepts any number of links
    Unbounded,
}

/// A connection point owned by exactly one node
#[derive(Debug, Clone, PartialEq)]
pub struct Pin {
    /// Unique pin ID
    pub id: PinId,
    /// Pin name, `None` until the owning node qualifies it
    pub name: Option<String>,
    /// Pin direction
    pub direction: PinDirection,
    /// Declared data kind
    pub kind: PinKind,
    links: IndexSet<PinId>,
    value: Value,
    owning_node: Option<NodeId>,
}

impl Pin {
    /// Create a new unlinked pin
    pub fn new(name: Option<String>, direction: PinDirection) -> Self {
        Self {
            id: PinId::new(),
            name,
            direction,
            kind: PinKind::Any,
            links: IndexSet::new(),
            value: Value::Null,
            owning_node: None,
        }
    }

    /// Create an unnamed input pin
    pub fn input() -> Self {
        Self::new(None, PinDirection::Input)
    }

    /// Create an unnamed output pin
    pub fn output() -> Self {
        Self::new(None, PinDirection::Output)
    }

    /// Set the display name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the declared kind
    pub fn with_kind(mut self, kind: PinKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the initial value
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = value.into();
        self
    }

    /// Is this an input pin
    pub fn is_input(&self) -> bool {
        self.direction == PinDirection::Input
    }

    /// Is this an output pin
    pub fn is_output(&self) -> bool {
        self.direction == PinDirection::Output
    }

    /// Ids of linked peer pins
    pub fn links(&self) -> &IndexSet<PinId> {
        &self.links
    }

    /// Check whether this pin is linked to `other`
    pub fn is_linked_to(&self, other: PinId) -> bool {
        self.links.contains(&other)
    }

    /// Current value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Replace the current value
    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = value.into();
    }

    /// Take the value, leaving `null`
    pub fn take_value(&mut self) -> Value {
        std::mem::take(&mut self.value)
    }

    /// Id of the node that declared this pin
    pub fn owning_node(&self) -> Option<NodeId> {
        self.owning_node
    }

    pub(crate) fn set_owning_node(&mut self, node: NodeId) {
        self.owning_node = Some(node);
    }

    /// Link to another pin under single fan-in
    pub fn link(&mut self, other: &mut Pin) -> Result<()> {
        self.link_with(other, FanIn::Single)
    }

    /// Link to another pin under the given fan-in policy.
    ///
    /// Linking an already-linked pair is a no-op. On error neither pin is
    /// modified.
    pub fn link_with(&mut self, other: &mut Pin, fan_in: FanIn) -> Result<()> {
        if self.direction == other.direction {
            return Err(GraphError::LinkDirection {
                a: self.id,
                b: other.id,
                direction: self.direction,
            });
        }
        if self.is_linked_to(other.id) {
            debug_assert!(other.is_linked_to(self.id));
            return Ok(());
        }
        if fan_in == FanIn::Single {
            let input = if self.is_input() { &*self } else { &*other };
            if let Some(existing) = input.links.first() {
                return Err(GraphError::FanInViolation {
                    pin: input.id,
                    existing: *existing,
                });
            }
        }
        self.links.insert(other.id);
        other.links.insert(self.id);
        Ok(())
    }

    /// Break the link to another pin; no-op if not linked
    pub fn unlink(&mut self, other: &mut Pin) {
        self.links.shift_remove(&other.id);
        other.links.shift_remove(&self.id);
    }

    pub(crate) fn remove_link(&mut self, peer: PinId) -> bool {
        self.links.shift_remove(&peer)
    }

    /// Produce the plain-data representation
    pub fn dump(&self) -> PinState {
        PinState {
            id: self.id,
            name: self.name.clone(),
            direction: self.direction,
            kind: self.kind,
            links: self.links.iter().copied().collect(),
            value: self.value.clone(),
            owning_node: self.owning_node,
        }
    }

    /// Restore from a plain-data representation
    pub fn load(&mut self, state: PinState) {
        self.id = state.id;
        self.name = state.name;
        self.direction = state.direction;
        self.kind = state.kind;
        self.links = state.links.into_iter().collect();
        self.value = state.value;
        self.owning_node = state.owning_node;
    }

    /// Build a pin from a plain-data representation
    pub fn from_state(state: PinState) -> Self {
        let mut pin = Self::new(None, state.direction);
        pin.load(state);
        pin
    }

    /// Encode as JSON text
    pub fn dumps(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.dump())?)
    }

    /// Decode from JSON text
    pub fn loads(text: &str) -> Result<Self> {
        let state: PinState = serde_json::from_str(text)?;
        Ok(Self::from_state(state))
    }
}
