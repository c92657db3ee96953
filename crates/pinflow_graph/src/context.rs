// SPDX-License-Identifier: MIT OR Apache-2.0
//! Id-indirection registry resolving pin and node ids to live nodes.
//!
//! Entries hold weak references only. A lookup whose target has been
//! dropped returns `None` and prunes the stale entry.

use crate::error::{GraphError, Result};
use crate::graph::GraphId;
use crate::node::{Node, NodeId, SharedNode};
use crate::pin::{Pin, PinId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone)]
struct PinEntry {
    owner: NodeId,
    node: Weak<RwLock<Node>>,
    name: String,
}

/// Registry mapping ids to the nodes and pins of one graph
#[derive(Debug)]
pub struct GraphContext {
    graph: GraphId,
    nodes: RwLock<HashMap<NodeId, Weak<RwLock<Node>>>>,
    pins: RwLock<HashMap<PinId, PinEntry>>,
}

impl GraphContext {
    /// Create an empty context for a graph
    pub fn new(graph: GraphId) -> Self {
        Self {
            graph,
            nodes: RwLock::new(HashMap::new()),
            pins: RwLock::new(HashMap::new()),
        }
    }

    /// Graph this context belongs to
    pub fn graph_id(&self) -> GraphId {
        self.graph
    }

    /// Register a node and all of its current pins.
    ///
    /// Fails without registering anything if the node id or any pin id is
    /// already known.
    pub fn add_node(&self, node: &SharedNode) -> Result<()> {
        let guard = node.read_recursive();
        let id = guard.id();

        let mut nodes = self.nodes.write();
        let mut pins = self.pins.write();
        if nodes.get(&id).is_some_and(|w| w.strong_count() > 0) {
            return Err(GraphError::DuplicateId(format!("node {id}")));
        }
        for (_, pin) in guard.pins().iter() {
            if pins.get(&pin.id).is_some_and(|e| e.node.strong_count() > 0) {
                return Err(GraphError::DuplicateId(format!("pin {}", pin.id)));
            }
        }

        nodes.insert(id, Arc::downgrade(node));
        for (name, pin) in guard.pins().iter() {
            pins.insert(
                pin.id,
                PinEntry {
                    owner: id,
                    node: Arc::downgrade(node),
                    name: name.to_string(),
                },
            );
        }
        tracing::debug!("Registered node {} ({}) with {} pins", guard.name(), id, guard.pins().len());
        Ok(())
    }

    /// Register one pin of an already registered node by declared name
    pub fn add_pin(&self, node: &SharedNode, name: &str) -> Result<()> {
        let guard = node.read_recursive();
        let pin = guard
            .pin(name)
            .ok_or_else(|| GraphError::PinNotFound(format!("{}.{name}", guard.name())))?;

        let mut pins = self.pins.write();
        if pins.get(&pin.id).is_some_and(|e| e.node.strong_count() > 0) {
            return Err(GraphError::DuplicateId(format!("pin {}", pin.id)));
        }
        pins.insert(
            pin.id,
            PinEntry {
                owner: guard.id(),
                node: Arc::downgrade(node),
                name: name.to_string(),
            },
        );
        Ok(())
    }

    /// Whether a live node is registered under `id`
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes
            .read()
            .get(&id)
            .is_some_and(|w| w.strong_count() > 0)
    }

    /// Look up a node
    pub fn get_node(&self, id: NodeId) -> Option<SharedNode> {
        let found = self.nodes.read().get(&id).map(Weak::upgrade);
        match found {
            Some(Some(node)) => Some(node),
            Some(None) => {
                tracing::warn!("Pruning reclaimed node {}", id);
                self.nodes.write().remove(&id);
                None
            }
            None => None,
        }
    }

    fn live_pin_entry(&self, id: PinId) -> Option<(PinEntry, SharedNode)> {
        let entry = self.pins.read().get(&id).cloned()?;
        match entry.node.upgrade() {
            Some(node) => Some((entry, node)),
            None => {
                tracing::warn!("Pruning reclaimed pin {}", id);
                self.pins.write().remove(&id);
                None
            }
        }
    }

    /// Id of the node that owns a pin
    pub fn pin_owner(&self, id: PinId) -> Option<NodeId> {
        self.live_pin_entry(id).map(|(entry, _)| entry.owner)
    }

    /// Snapshot of a pin
    pub fn get_pin(&self, id: PinId) -> Option<Pin> {
        let (entry, node) = self.live_pin_entry(id)?;
        let guard = node.read_recursive();
        let pin = guard.pin(&entry.name).filter(|p| p.id == id).cloned();
        drop(guard);
        if pin.is_none() {
            self.pins.write().remove(&id);
        }
        pin
    }

    /// Declared name of a pin on its owning node
    pub fn pin_name(&self, id: PinId) -> Option<String> {
        self.live_pin_entry(id).map(|(entry, _)| entry.name)
    }

    /// The node owning a pin
    pub fn get_pin_node(&self, id: PinId) -> Option<SharedNode> {
        let owner = self.pin_owner(id)?;
        self.get_node(owner)
    }

    /// Drop a node and every pin entry pointing at it
    pub fn remove_node(&self, id: NodeId) {
        self.nodes.write().remove(&id);
        self.pins.write().retain(|_, e| e.owner != id);
    }

    /// Drop one pin entry
    pub fn remove_pin(&self, id: PinId) {
        self.pins.write().remove(&id);
    }

    /// Remove all entries
    pub fn clear(&self) {
        self.nodes.write().clear();
        self.pins.write().clear();
    }

    /// Number of node entries, live or stale
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether there are no node entries
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Number of pin entries, live or stale
    pub fn pin_count(&self) -> usize {
        self.pins.read().len()
    }
}
