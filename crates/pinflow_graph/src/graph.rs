// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure owning nodes and their derived execution order.

use crate::connection::{AllowAll, ConnectionRule};
use crate::context::GraphContext;
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeId, SharedNode};
use crate::pin::{FanIn, Pin, PinId};
use crate::registry::NodeRegistry;
use crate::state::{GraphState, FORMAT_VERSION};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(pub Uuid);

impl GraphId {
    /// Create a new random graph ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dataflow graph.
///
/// The graph owns its nodes; its [`GraphContext`] only observes them. The
/// cached order is always a valid topological order of the current node
/// set: every mutation that could introduce a cycle recomputes it and is
/// undone if it fails.
pub struct Graph {
    id: GraphId,
    name: String,
    nodes: Vec<SharedNode>,
    ctx: Arc<GraphContext>,
    order: Vec<NodeId>,
    fan_in: FanIn,
    rule: Arc<dyn ConnectionRule>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("order", &self.order)
            .field("fan_in", &self.fan_in)
            .finish_non_exhaustive()
    }
}

impl Graph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(GraphId::new(), name)
    }

    /// Create a new empty graph with a known ID
    pub fn with_id(id: GraphId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            nodes: Vec::new(),
            ctx: Arc::new(GraphContext::new(id)),
            order: Vec::new(),
            fan_in: FanIn::Single,
            rule: Arc::new(AllowAll),
        }
    }

    /// Set the fan-in policy for connections made through the graph
    pub fn with_fan_in(mut self, fan_in: FanIn) -> Self {
        self.fan_in = fan_in;
        self
    }

    /// Set the connection rule
    pub fn with_rule(mut self, rule: impl ConnectionRule + 'static) -> Self {
        self.rule = Arc::new(rule);
        self
    }

    /// Graph ID
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Graph name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fan-in policy
    pub fn fan_in(&self) -> FanIn {
        self.fan_in
    }

    /// The id registry of this graph
    pub fn context(&self) -> &Arc<GraphContext> {
        &self.ctx
    }

    /// Add a single node
    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        let mut ids = self.add_nodes([node])?;
        Ok(ids.remove(0))
    }

    /// Add nodes and recompute the topological order.
    ///
    /// Either every node is added or, on error, the graph is left as it was.
    pub fn add_nodes(&mut self, nodes: impl IntoIterator<Item = Node>) -> Result<Vec<NodeId>> {
        let mut added = Vec::new();
        let result = self
            .register_all(nodes, &mut added)
            .and_then(|()| self.topological_sort());

        match result {
            Ok(order) => {
                self.order = order;
                tracing::debug!(
                    "Graph '{}' added {} nodes, order now {} long",
                    self.name,
                    added.len(),
                    self.order.len()
                );
                Ok(added)
            }
            Err(err) => {
                for id in &added {
                    self.ctx.remove_node(*id);
                }
                self.nodes.retain(|n| !added.contains(&n.read().id()));
                Err(err)
            }
        }
    }

    fn register_all(
        &mut self,
        nodes: impl IntoIterator<Item = Node>,
        added: &mut Vec<NodeId>,
    ) -> Result<()> {
        for mut node in nodes {
            if let Some(graph) = node.owning_graph() {
                if graph != self.id {
                    return Err(GraphError::AlreadyOwned {
                        node: node.id(),
                        graph,
                    });
                }
            }
            node.set_owning_graph(Some(self.id));
            let id = node.id();
            let shared = node.into_shared();
            self.ctx.add_node(&shared)?;
            self.nodes.push(shared);
            added.push(id);
        }
        Ok(())
    }

    /// Order the current node set with Kahn's algorithm.
    ///
    /// Zero in-degree nodes are seeded in insertion order, so the result is
    /// deterministic for a given graph.
    pub fn topological_sort(&self) -> Result<Vec<NodeId>> {
        let mut in_degree: IndexMap<NodeId, usize> = IndexMap::with_capacity(self.nodes.len());
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for node in &self.nodes {
            let node = node.read();
            let deps = node.dependencies(&self.ctx)?;
            in_degree.insert(node.id(), deps.len());
            for dep in deps {
                dependents.entry(dep).or_default().push(node.id());
            }
        }

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut sorted = Vec::with_capacity(in_degree.len());

        while let Some(id) = queue.pop_front() {
            sorted.push(id);
            for dependent in dependents.get(&id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        if sorted.len() < in_degree.len() {
            return Err(GraphError::CyclicDependency {
                graph: self.name.clone(),
            });
        }
        Ok(sorted)
    }

    /// Cached topological order
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Cached topological order as owned ids
    pub fn topological_order(&self) -> Vec<NodeId> {
        self.order.clone()
    }

    fn refresh_order(&mut self) -> Result<()> {
        self.order = self.topological_sort()?;
        Ok(())
    }

    fn resolve_pin(&self, id: PinId) -> Result<(SharedNode, Pin)> {
        let node = self
            .ctx
            .get_pin_node(id)
            .ok_or_else(|| GraphError::PinNotFound(id.to_string()))?;
        let pin = self
            .ctx
            .get_pin(id)
            .ok_or_else(|| GraphError::PinNotFound(id.to_string()))?;
        Ok((node, pin))
    }

    /// Check whether the connection rule allows linking `a` and `b`
    pub fn can_create_connection(&self, a: PinId, b: PinId) -> bool {
        match (self.ctx.get_pin(a), self.ctx.get_pin(b)) {
            (Some(pa), Some(pb)) => self.rule.can_connect(&pa, &pb),
            _ => false,
        }
    }

    /// Link two registered pins if the connection rule allows it.
    ///
    /// Returns `Ok(false)` when the rule rejects the pair. A link that would
    /// make the graph cyclic is rolled back and reported as
    /// `CyclicDependency`.
    pub fn try_create_connection(&mut self, a: PinId, b: PinId) -> Result<bool> {
        let (node_a, pin_a) = self.resolve_pin(a)?;
        let (node_b, pin_b) = self.resolve_pin(b)?;
        if !self.rule.can_connect(&pin_a, &pin_b) {
            tracing::debug!("Connection rule rejected {} -> {}", a, b);
            return Ok(false);
        }
        if pin_a.is_linked_to(b) {
            return Ok(true);
        }
        if Arc::ptr_eq(&node_a, &node_b) {
            if pin_a.direction == pin_b.direction {
                return Err(GraphError::LinkDirection {
                    a,
                    b,
                    direction: pin_a.direction,
                });
            }
            // A node feeding itself is always a cycle
            return Err(GraphError::CyclicDependency {
                graph: self.name.clone(),
            });
        }

        link_shared(&node_a, a, &node_b, b, self.fan_in)?;
        if let Err(err) = self.refresh_order() {
            unlink_shared(&node_a, a, &node_b, b);
            return Err(err);
        }
        Ok(true)
    }

    /// Link two registered pins, failing if the connection rule rejects them
    pub fn connect(&mut self, a: PinId, b: PinId) -> Result<()> {
        if self.try_create_connection(a, b)? {
            Ok(())
        } else {
            Err(GraphError::IncompatiblePins { a, b })
        }
    }

    /// Link two pins addressed by node ID and declared pin name
    pub fn connect_named(
        &mut self,
        from: NodeId,
        from_pin: &str,
        to: NodeId,
        to_pin: &str,
    ) -> Result<()> {
        let a = self.pin_id(from, from_pin)?;
        let b = self.pin_id(to, to_pin)?;
        self.connect(a, b)
    }

    /// Break the link between two pins; no-op if they are not linked
    pub fn disconnect(&mut self, a: PinId, b: PinId) -> Result<()> {
        let (node_a, _) = self.resolve_pin(a)?;
        let (node_b, _) = self.resolve_pin(b)?;
        unlink_shared(&node_a, a, &node_b, b);
        self.refresh_order()
    }

    /// Declare a new pin on a registered node
    pub fn add_pin(&mut self, node: NodeId, name: &str, pin: Pin) -> Result<PinId> {
        let shared = self.node(node).ok_or(GraphError::NodeNotFound(node))?;
        let id = shared.write().add_pin(name, pin)?;
        if let Err(err) = self.ctx.add_pin(&shared, name) {
            shared.write().pins_mut().remove(name);
            return Err(err);
        }
        Ok(id)
    }

    /// Remove a node, unlinking every peer of its pins
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.read().id() == id)
            .ok_or(GraphError::NodeNotFound(id))?;

        let mut links: Vec<(PinId, PinId)> = Vec::new();
        for (_, pin) in self.nodes[index].read().pins().iter() {
            links.extend(pin.links().iter().map(|peer| (pin.id, *peer)));
        }
        for (pin, peer) in links {
            if let Some(peer_node) = self.ctx.get_pin_node(peer) {
                if let Some(peer_pin) = peer_node.write().pins_mut().find_mut(peer) {
                    peer_pin.remove_link(pin);
                }
            }
        }

        let node = self.nodes.remove(index);
        node.write().set_owning_graph(None);
        self.ctx.remove_node(id);
        tracing::debug!("Removed node {} from graph '{}'", id, self.name);
        self.refresh_order()
    }

    /// Remove every node
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.ctx.clear();
        self.order.clear();
    }

    /// Get a node by ID
    pub fn node(&self, id: NodeId) -> Option<SharedNode> {
        self.nodes.iter().find(|n| n.read().id() == id).cloned()
    }

    /// Get the first node with a given name
    pub fn node_by_name(&self, name: &str) -> Option<SharedNode> {
        self.nodes.iter().find(|n| n.read().name() == name).cloned()
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> &[SharedNode] {
        &self.nodes
    }

    /// All node IDs in insertion order
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.read().id()).collect()
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// ID of a pin by node and declared name
    pub fn pin_id(&self, node: NodeId, pin: &str) -> Result<PinId> {
        self.node(node)
            .ok_or(GraphError::NodeNotFound(node))?
            .read()
            .pin_id(pin)
    }

    /// Snapshot of a pin
    pub fn pin(&self, id: PinId) -> Option<Pin> {
        self.ctx.get_pin(id)
    }

    /// Current value of a pin by node and declared name
    pub fn pin_value(&self, node: NodeId, pin: &str) -> Option<Value> {
        let node = self.node(node)?;
        let value = node.read().pin(pin).map(|p| p.value().clone());
        value
    }

    /// Set the value of a pin by node and declared name
    pub fn set_pin_value(&self, node: NodeId, pin: &str, value: impl Into<Value>) -> Result<()> {
        let shared = self.node(node).ok_or(GraphError::NodeNotFound(node))?;
        let mut guard = shared.write();
        let name = format!("{}.{pin}", guard.name());
        guard
            .pin_mut(pin)
            .ok_or(GraphError::PinNotFound(name))?
            .set_value(value);
        Ok(())
    }

    /// Produce the plain-data representation
    pub fn dump(&self) -> GraphState {
        GraphState {
            version: FORMAT_VERSION,
            id: self.id,
            name: self.name.clone(),
            fan_in: self.fan_in,
            nodes: self.nodes.iter().map(|n| n.read().dump()).collect(),
        }
    }

    /// Rebuild a graph, constructing each node through `registry`.
    ///
    /// The connection rule is not persisted; chain [`Graph::with_rule`] on
    /// the result to restore one.
    pub fn load(state: GraphState, registry: &NodeRegistry) -> Result<Self> {
        if state.version > FORMAT_VERSION {
            return Err(GraphError::UnsupportedVersion {
                found: state.version,
                supported: FORMAT_VERSION,
            });
        }
        let nodes = state
            .nodes
            .into_iter()
            .map(|n| registry.instantiate(n))
            .collect::<Result<Vec<_>>>()?;
        let mut graph = Self::with_id(state.id, state.name).with_fan_in(state.fan_in);
        graph.add_nodes(nodes)?;
        graph.check_links()?;
        tracing::info!("Loaded graph '{}' with {} nodes", graph.name, graph.node_count());
        Ok(graph)
    }

    /// Verify every stored link the way linking would have.
    ///
    /// Peers must have opposite directions and list each other, and inputs
    /// must respect the fan-in policy.
    fn check_links(&self) -> Result<()> {
        let mut pins: HashMap<PinId, Pin> = HashMap::new();
        for node in &self.nodes {
            let node = node.read();
            for (_, pin) in node.pins().iter() {
                pins.insert(pin.id, pin.clone());
            }
        }

        for pin in pins.values() {
            if pin.is_input() && self.fan_in == FanIn::Single && pin.links().len() > 1 {
                if let Some(existing) = pin.links().first() {
                    return Err(GraphError::FanInViolation {
                        pin: pin.id,
                        existing: *existing,
                    });
                }
            }
            for peer in pin.links() {
                let other = pins.get(peer).ok_or(GraphError::DanglingLink {
                    pin: pin.id,
                    peer: *peer,
                })?;
                if other.direction == pin.direction {
                    return Err(GraphError::LinkDirection {
                        a: pin.id,
                        b: *peer,
                        direction: pin.direction,
                    });
                }
                if !other.is_linked_to(pin.id) {
                    return Err(GraphError::AsymmetricLink {
                        pin: pin.id,
                        peer: *peer,
                    });
                }
            }
        }
        Ok(())
    }

    /// Encode as pretty JSON text
    pub fn dumps(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.dump())?)
    }

    /// Decode from JSON text
    pub fn loads(text: &str, registry: &NodeRegistry) -> Result<Self> {
        let state: GraphState = serde_json::from_str(text)?;
        Self::load(state, registry)
    }
}

fn link_shared(
    node_a: &SharedNode,
    a: PinId,
    node_b: &SharedNode,
    b: PinId,
    fan_in: FanIn,
) -> Result<()> {
    let missing = |id: PinId| GraphError::PinNotFound(id.to_string());

    // Callers reject same-node pairs. Lock in a stable order so concurrent
    // connects cannot deadlock
    let (first, second) = if node_a.read().id() < node_b.read().id() {
        (node_a, node_b)
    } else {
        (node_b, node_a)
    };
    let mut first = first.write();
    let mut second = second.write();
    let (mut guard_a, mut guard_b) = if first.pins().find(a).is_some() {
        (first, second)
    } else {
        (second, first)
    };
    let pin_a = guard_a.pins_mut().find_mut(a).ok_or_else(|| missing(a))?;
    let pin_b = guard_b.pins_mut().find_mut(b).ok_or_else(|| missing(b))?;
    pin_a.link_with(pin_b, fan_in)
}

fn unlink_shared(node_a: &SharedNode, a: PinId, node_b: &SharedNode, b: PinId) {
    if let Some(pin) = node_a.write().pins_mut().find_mut(a) {
        pin.remove_link(b);
    }
    if let Some(pin) = node_b.write().pins_mut().find_mut(b) {
        pin.remove_link(a);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TypeChecked;
    use crate::nodes::{builtin_registry, Constant, Merge, Relay};
    use crate::pin::PinKind;
    use serde_json::json;

    fn relay(name: &str) -> Node {
        Node::new(Some(name), Relay).unwrap()
    }

    fn index_of(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|n| *n == id).unwrap()
    }

    #[test]
    fn test_topological_order_respects_links() {
        let mut a = relay("a");
        let mut b = relay("b");
        let mut c = relay("c");
        let mut d = Node::new(Some("d"), Merge).unwrap();
        a.link("output", &mut b, "input").unwrap();
        b.link("output", &mut d, "a").unwrap();
        c.link("output", &mut d, "b").unwrap();
        let (ia, ib, ic, id) = (a.id(), b.id(), c.id(), d.id());

        let mut graph = Graph::new("order");
        // Insertion order deliberately reversed
        graph.add_nodes([d, c, b, a]).unwrap();

        let order = graph.order();
        assert_eq!(order.len(), 4);
        for (up, down) in [(ia, ib), (ib, id), (ic, id)] {
            assert!(index_of(order, up) < index_of(order, down));
        }
    }

    #[test]
    fn test_concrete_scenario_order() {
        let mut n1 = Node::new(Some("n1"), Constant::new(json!("x"))).unwrap();
        let mut n2 = relay("n2");
        n1.link("value", &mut n2, "input").unwrap();
        let (i1, i2) = (n1.id(), n2.id());

        let mut graph = Graph::new("g");
        graph.add_nodes([n1, n2]).unwrap();
        assert_eq!(graph.order(), &[i1, i2]);
    }

    #[test]
    fn test_cycle_rejected_on_add() {
        let mut a = relay("a");
        let mut b = relay("b");
        let mut c = relay("c");
        a.link("output", &mut b, "input").unwrap();
        b.link("output", &mut c, "input").unwrap();
        c.link("output", &mut a, "input").unwrap();

        let mut graph = Graph::new("cyclic");
        let err = graph.add_nodes([a, b, c]).unwrap_err();
        assert!(matches!(err, GraphError::CyclicDependency { graph } if graph == "cyclic"));
        assert_eq!(graph.node_count(), 0);
        assert!(graph.order().is_empty());
        assert!(graph.context().is_empty());
    }

    #[test]
    fn test_cycle_rejected_on_connect() {
        let mut a = relay("a");
        let mut b = relay("b");
        let mut c = relay("c");
        a.link("output", &mut b, "input").unwrap();
        b.link("output", &mut c, "input").unwrap();
        let (ia, ic) = (a.id(), c.id());

        let mut graph = Graph::new("g");
        graph.add_nodes([a, b, c]).unwrap();
        let order_before = graph.order().to_vec();

        let err = graph
            .connect_named(ic, "output", ia, "input")
            .unwrap_err();
        assert!(matches!(err, GraphError::CyclicDependency { .. }));

        // Rolled back on both sides
        let c_out = graph.pin_id(ic, "output").unwrap();
        let a_in = graph.pin_id(ia, "input").unwrap();
        assert!(graph.pin(c_out).unwrap().links().is_empty());
        assert!(graph.pin(a_in).unwrap().links().is_empty());
        assert_eq!(graph.order(), order_before.as_slice());
    }

    #[test]
    fn test_self_link_is_a_cycle() {
        let mut graph = Graph::new("g");
        let a = graph.add_node(relay("a")).unwrap();
        let err = graph.connect_named(a, "output", a, "input").unwrap_err();
        assert!(matches!(err, GraphError::CyclicDependency { .. }));
        let out = graph.pin_id(a, "output").unwrap();
        assert!(graph.pin(out).unwrap().links().is_empty());
    }

    #[test]
    fn test_fan_in_through_graph() {
        let mut graph = Graph::new("g");
        let first = graph.add_node(relay("first")).unwrap();
        let second = graph.add_node(relay("second")).unwrap();
        let third = graph.add_node(relay("third")).unwrap();
        let sink = graph.add_node(relay("sink")).unwrap();

        graph.connect_named(first, "output", sink, "input").unwrap();
        graph.connect_named(second, "output", sink, "input").unwrap_err();
        let err = graph.connect_named(third, "output", sink, "input").unwrap_err();
        assert!(matches!(err, GraphError::FanInViolation { .. }));

        let sink_in = graph.pin_id(sink, "input").unwrap();
        let first_out = graph.pin_id(first, "output").unwrap();
        let links = graph.pin(sink_in).unwrap().links().clone();
        assert_eq!(links.len(), 1);
        assert!(links.contains(&first_out));
    }

    #[test]
    fn test_unbounded_fan_in_graph() {
        let mut graph = Graph::new("g").with_fan_in(FanIn::Unbounded);
        let a = graph.add_node(relay("a")).unwrap();
        let b = graph.add_node(relay("b")).unwrap();
        let sink = graph.add_node(relay("sink")).unwrap();
        graph.connect_named(a, "output", sink, "input").unwrap();
        graph.connect_named(b, "output", sink, "input").unwrap();

        let shared = graph.node(sink).unwrap();
        let deps = shared.read().dependencies(graph.context()).unwrap();
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn test_dependencies_deduplicated() {
        let mut src = relay("src");
        let mut merge = Node::new(Some("merge"), Merge).unwrap();
        src.link("output", &mut merge, "a").unwrap();
        src.link("output", &mut merge, "b").unwrap();
        let (s, m) = (src.id(), merge.id());

        let mut graph = Graph::new("g");
        graph.add_nodes([src, merge]).unwrap();
        let deps = graph.node(m).unwrap().read().dependencies(graph.context()).unwrap();
        assert_eq!(deps.len(), 1);
        assert!(deps.contains(&s));
    }

    #[test]
    fn test_rule_gates_connection() {
        let mut graph = Graph::new("typed").with_rule(TypeChecked);
        let a = graph.add_node(relay("a")).unwrap();
        let b = graph.add_node(relay("b")).unwrap();
        let out = graph.add_pin(a, "text", Pin::output().with_kind(PinKind::String)).unwrap();
        let inp = graph.add_pin(b, "count", Pin::input().with_kind(PinKind::Integer)).unwrap();

        assert!(!graph.can_create_connection(out, inp));
        assert!(!graph.try_create_connection(out, inp).unwrap());
        assert!(matches!(
            graph.connect(out, inp).unwrap_err(),
            GraphError::IncompatiblePins { .. }
        ));

        let any_out = graph.pin_id(a, "output").unwrap();
        assert!(graph.try_create_connection(any_out, inp).unwrap());
    }

    #[test]
    fn test_duplicate_node_rejected_atomically() {
        let n = relay("n");
        let state = n.dump();
        let mut twin = relay("twin");
        twin.load(state).unwrap();

        let mut graph = Graph::new("g");
        graph.add_node(n).unwrap();
        let other = relay("other");
        let err = graph.add_nodes([other, twin]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateId(_)));
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.order().len(), 1);
    }

    #[test]
    fn test_node_owned_elsewhere() {
        let mut n = relay("n");
        n.set_owning_graph(Some(GraphId::new()));
        let mut graph = Graph::new("g");
        let err = graph.add_node(n).unwrap_err();
        assert!(matches!(err, GraphError::AlreadyOwned { .. }));
    }

    #[test]
    fn test_dangling_link() {
        let mut a = relay("a");
        let mut b = relay("b");
        a.link("output", &mut b, "input").unwrap();

        let mut graph = Graph::new("g");
        let err = graph.add_node(b).unwrap_err();
        assert!(matches!(err, GraphError::DanglingLink { .. }));
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn test_remove_node_unlinks_peers() {
        let mut a = relay("a");
        let mut b = relay("b");
        a.link("output", &mut b, "input").unwrap();
        let (ia, ib) = (a.id(), b.id());
        let b_in = b.pin_id("input").unwrap();

        let mut graph = Graph::new("g");
        graph.add_nodes([a, b]).unwrap();
        graph.remove_node(ia).unwrap();

        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.order(), &[ib]);
        assert!(graph.pin(b_in).unwrap().links().is_empty());
        assert!(graph.context().get_node(ia).is_none());
        assert!(matches!(
            graph.remove_node(ia).unwrap_err(),
            GraphError::NodeNotFound(_)
        ));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut graph = Graph::new("g");
        let a = graph.add_node(relay("a")).unwrap();
        let b = graph.add_node(relay("b")).unwrap();
        let out = graph.pin_id(a, "output").unwrap();
        let inp = graph.pin_id(b, "input").unwrap();

        graph.disconnect(out, inp).unwrap();
        graph.connect(out, inp).unwrap();
        graph.disconnect(out, inp).unwrap();
        graph.disconnect(out, inp).unwrap();
        assert!(graph.pin(out).unwrap().links().is_empty());
    }

    #[test]
    fn test_clear() {
        let mut graph = Graph::new("g");
        graph.add_node(relay("a")).unwrap();
        graph.clear();
        assert_eq!(graph.node_count(), 0);
        assert!(graph.context().is_empty());
        assert!(graph.order().is_empty());
    }

    #[test]
    fn test_round_trip() {
        let registry = builtin_registry();
        let mut c = Node::new(Some("c"), Constant::new(json!({"n": 7}))).unwrap();
        let mut r1 = relay("r1");
        let mut r2 = relay("r2");
        let mut m = Node::new(Some("m"), Merge).unwrap();
        c.link("value", &mut r1, "input").unwrap();
        c.link("value", &mut r2, "input").unwrap();
        r1.link("output", &mut m, "a").unwrap();
        r2.link("output", &mut m, "b").unwrap();
        m.pin_mut("merged").unwrap().set_value(json!([1, 2]));

        let mut graph = Graph::new("round");
        graph.add_nodes([c, r1, r2, m]).unwrap();

        let loaded = Graph::load(graph.dump(), &registry).unwrap();
        assert_eq!(loaded.id(), graph.id());
        assert_eq!(loaded.name(), "round");
        assert_eq!(loaded.node_ids(), graph.node_ids());
        assert_eq!(loaded.order(), graph.order());

        for (orig, back) in graph.nodes().iter().zip(loaded.nodes()) {
            let (orig, back) = (orig.read(), back.read());
            assert_eq!(orig.class(), back.class());
            assert_eq!(orig.params(), back.params());
            for (name, pin) in orig.pins().iter() {
                let other = back.pin(name).unwrap();
                assert_eq!(other.id, pin.id);
                assert_eq!(other.value(), pin.value());
                let mut a: Vec<_> = pin.links().iter().collect();
                let mut b: Vec<_> = other.links().iter().collect();
                a.sort();
                b.sort();
                assert_eq!(a, b);
            }
        }
    }

    #[test]
    fn test_dumps_loads_text() {
        let registry = builtin_registry();
        let mut c = Node::new(Some("c"), Constant::new(json!(3))).unwrap();
        let mut r = relay("r");
        c.link("value", &mut r, "input").unwrap();
        let mut graph = Graph::new("text");
        graph.add_nodes([c, r]).unwrap();

        let text = graph.dumps().unwrap();
        let loaded = Graph::loads(&text, &registry).unwrap();
        assert_eq!(loaded.dumps().unwrap(), text);

        let compact = serde_json::to_string(&loaded.dump()).unwrap();
        let reparsed: Value = serde_json::from_str(&compact).unwrap();
        let original: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(reparsed, original);
    }

    #[test]
    fn test_round_trip_added_pin() {
        let mut graph = Graph::new("dynamic");
        let a = graph.add_node(relay("a")).unwrap();
        let b = graph.add_node(relay("b")).unwrap();
        let extra = graph
            .add_pin(a, "extra", Pin::output().with_kind(PinKind::String))
            .unwrap();
        let b_in = graph.pin_id(b, "input").unwrap();
        graph.connect(extra, b_in).unwrap();
        graph.set_pin_value(a, "extra", "hi").unwrap();

        let loaded = Graph::load(graph.dump(), &builtin_registry()).unwrap();
        assert_eq!(loaded.pin_id(a, "extra").unwrap(), extra);
        let pin = loaded.pin(extra).unwrap();
        assert_eq!(pin.kind, PinKind::String);
        assert_eq!(pin.value(), &json!("hi"));
        assert!(pin.is_linked_to(b_in));
        assert_eq!(loaded.context().pin_owner(extra), Some(a));
        assert_eq!(loaded.order(), graph.order());
        assert_eq!(loaded.dump(), graph.dump());
    }

    fn fan_in_graph() -> (Graph, NodeId) {
        let mut graph = Graph::new("fan").with_fan_in(FanIn::Unbounded);
        let a = graph.add_node(Node::new(Some("a"), Constant::new(1)).unwrap()).unwrap();
        let b = graph.add_node(Node::new(Some("b"), Constant::new(2)).unwrap()).unwrap();
        let r = graph.add_node(relay("r")).unwrap();
        graph.connect_named(a, "value", r, "input").unwrap();
        graph.connect_named(b, "value", r, "input").unwrap();
        (graph, r)
    }

    #[test]
    fn test_round_trip_unbounded_fan_in() {
        let (graph, r) = fan_in_graph();
        let loaded = Graph::load(graph.dump(), &builtin_registry()).unwrap();
        assert_eq!(loaded.fan_in(), FanIn::Unbounded);
        let input = loaded.pin_id(r, "input").unwrap();
        assert_eq!(loaded.pin(input).unwrap().links().len(), 2);
        assert_eq!(loaded.dump(), graph.dump());
    }

    #[test]
    fn test_load_rejects_fan_in_violation() {
        let (graph, _) = fan_in_graph();
        let mut state = graph.dump();
        state.fan_in = FanIn::Single;
        let err = Graph::load(state, &builtin_registry()).unwrap_err();
        assert!(matches!(err, GraphError::FanInViolation { .. }));
    }

    #[test]
    fn test_round_trip_keeps_kinds_for_rule() {
        let mut graph = Graph::new("typed").with_rule(TypeChecked);
        let a = graph.add_node(relay("a")).unwrap();
        let b = graph.add_node(relay("b")).unwrap();
        let text = graph.add_pin(a, "text", Pin::output().with_kind(PinKind::String)).unwrap();
        let count = graph.add_pin(b, "count", Pin::input().with_kind(PinKind::Integer)).unwrap();

        let mut loaded = Graph::load(graph.dump(), &builtin_registry())
            .unwrap()
            .with_rule(TypeChecked);
        assert_eq!(loaded.pin(text).unwrap().kind, PinKind::String);
        assert_eq!(loaded.pin(count).unwrap().kind, PinKind::Integer);
        assert!(!loaded.try_create_connection(text, count).unwrap());
        let out = loaded.pin_id(a, "output").unwrap();
        assert!(loaded.try_create_connection(out, count).unwrap());
    }

    #[test]
    fn test_load_rejects_same_direction_link() {
        let mut graph = Graph::new("g");
        graph.add_node(relay("a")).unwrap();
        graph.add_node(relay("b")).unwrap();
        let mut state = graph.dump();
        let a_out = state.nodes[0].pins["output"].id;
        let b_out = state.nodes[1].pins["output"].id;
        state.nodes[0].pins["output"].links.push(b_out);
        state.nodes[1].pins["output"].links.push(a_out);

        let err = Graph::load(state, &builtin_registry()).unwrap_err();
        assert!(matches!(err, GraphError::LinkDirection { .. }));
    }

    #[test]
    fn test_load_rejects_one_sided_link() {
        let mut graph = Graph::new("g");
        let a = graph.add_node(relay("a")).unwrap();
        let b = graph.add_node(relay("b")).unwrap();
        graph.connect_named(a, "output", b, "input").unwrap();
        let b_in = graph.pin_id(b, "input").unwrap();
        let mut state = graph.dump();
        state.nodes[0].pins["output"].links.clear();

        let err = Graph::load(state, &builtin_registry()).unwrap_err();
        assert!(matches!(err, GraphError::AsymmetricLink { pin, .. } if pin == b_in));
    }

    #[test]
    fn test_same_node_same_direction() {
        let mut graph = Graph::new("g");
        let a = graph.add_node(relay("a")).unwrap();
        let out = graph.pin_id(a, "output").unwrap();
        let other = graph.add_pin(a, "other", Pin::output()).unwrap();
        let err = graph.connect(out, other).unwrap_err();
        assert!(matches!(err, GraphError::LinkDirection { .. }));
        assert!(graph.pin(out).unwrap().links().is_empty());
    }

    #[test]
    fn test_load_unknown_class() {
        let registry = NodeRegistry::new();
        let mut graph = Graph::new("g");
        graph.add_node(relay("r")).unwrap();
        let err = Graph::load(graph.dump(), &registry).unwrap_err();
        assert!(matches!(err, GraphError::UnknownNodeClass(_)));
    }

    #[test]
    fn test_load_newer_version() {
        let registry = builtin_registry();
        let mut state = Graph::new("g").dump();
        state.version = FORMAT_VERSION + 1;
        let err = Graph::load(state, &registry).unwrap_err();
        assert!(matches!(err, GraphError::UnsupportedVersion { .. }));
    }
}
