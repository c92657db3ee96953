// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph execution: sequential or in dependency-respecting waves.
//!
//! Each node runs against a private copy of its pin table. Input values are
//! pulled from linked output pins through the graph context, `execute` runs
//! with no lock held, and the resulting values are committed back to the
//! node. A running node therefore only ever mutates its own pins.

use crate::context::GraphContext;
use crate::error::{GraphError, NodeError};
use crate::graph::{Graph, GraphId};
use crate::node::{NodeId, NodeStatus, Pins, SharedNode};
use futures::future::join_all;
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How nodes are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// One node at a time in topological order
    #[default]
    Sequential,
    /// Every ready node of a wave concurrently, one wave at a time
    Parallel,
}

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunState {
    /// Not started
    #[default]
    Pending,
    /// In progress
    Running,
    /// Every node finished
    Finished,
    /// A node or the graph structure failed
    Failed,
    /// Stopped by the cancellation token
    Cancelled,
}

/// Executor settings
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Scheduling mode
    pub mode: ExecutionMode,
    /// Upper bound on a single node's `execute`
    pub node_timeout: Option<Duration>,
    /// Most nodes of one wave running at the same time
    pub max_concurrency: Option<usize>,
}

/// What happened during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    /// Graph that ran
    pub graph: GraphId,
    /// Mode it ran in
    pub mode: ExecutionMode,
    /// Final state
    pub state: RunState,
    /// Nodes started together, in start order
    pub waves: Vec<Vec<NodeId>>,
    /// Final status of every node
    pub statuses: IndexMap<NodeId, NodeStatus>,
    /// Wall time of the run
    pub duration: Duration,
}

impl ExecutionReport {
    fn new(graph: &Graph, mode: ExecutionMode) -> Self {
        Self {
            graph: graph.id(),
            mode,
            state: RunState::Running,
            waves: Vec::new(),
            statuses: graph
                .node_ids()
                .into_iter()
                .map(|id| (id, NodeStatus::Pending))
                .collect(),
            duration: Duration::ZERO,
        }
    }

    /// Status of one node
    pub fn status(&self, node: NodeId) -> Option<NodeStatus> {
        self.statuses.get(&node).copied()
    }

    /// Nodes that ended with `status`
    pub fn nodes_with_status(&self, status: NodeStatus) -> impl Iterator<Item = NodeId> + '_ {
        self.statuses
            .iter()
            .filter(move |(_, s)| **s == status)
            .map(|(id, _)| *id)
    }

    fn set(&mut self, node: NodeId, status: NodeStatus) {
        self.statuses.insert(node, status);
    }

    fn skip_pending(&mut self) {
        for status in self.statuses.values_mut() {
            if *status == NodeStatus::Pending {
                *status = NodeStatus::Skipped;
            }
        }
    }
}

/// Errors ending a run
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The graph could not be scheduled
    #[error("graph could not be scheduled: {source}")]
    Graph {
        /// The structural error
        source: GraphError,
        /// State of the run when it stopped
        report: Box<ExecutionReport>,
    },

    /// A node's `execute` returned an error
    #[error("node '{name}' ({node}) failed: {source}")]
    NodeFailed {
        /// Failing node
        node: NodeId,
        /// Its name
        name: String,
        /// The node's error
        source: NodeError,
        /// State of the run when it stopped
        report: Box<ExecutionReport>,
    },

    /// The run was cancelled
    #[error("execution cancelled")]
    Cancelled {
        /// State of the run when it stopped
        report: Box<ExecutionReport>,
    },
}

impl ExecutionError {
    /// Partial report of the stopped run
    pub fn report(&self) -> &ExecutionReport {
        match self {
            Self::Graph { report, .. }
            | Self::NodeFailed { report, .. }
            | Self::Cancelled { report } => &**report,
        }
    }
}

enum NodeOutcome {
    Finished,
    Failed { name: String, error: NodeError },
    Cancelled,
}

enum Abort {
    Graph(GraphError),
    Node {
        node: NodeId,
        name: String,
        error: NodeError,
    },
    Cancelled,
}

impl From<GraphError> for Abort {
    fn from(err: GraphError) -> Self {
        Self::Graph(err)
    }
}

/// Runs graphs
#[derive(Debug, Default)]
pub struct GraphExecutor {
    config: ExecutorConfig,
    state: Mutex<RunState>,
}

impl GraphExecutor {
    /// Create an executor
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RunState::Pending),
        }
    }

    /// Sequential executor with default settings
    pub fn sequential() -> Self {
        Self::new(ExecutorConfig::default())
    }

    /// Parallel executor with default settings
    pub fn parallel() -> Self {
        Self::new(ExecutorConfig {
            mode: ExecutionMode::Parallel,
            ..ExecutorConfig::default()
        })
    }

    /// Settings
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// State of the most recent run
    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    fn set_state(&self, state: RunState) {
        *self.state.lock() = state;
    }

    /// Run every node of `graph`
    pub async fn execute(&self, graph: &Graph) -> Result<ExecutionReport, ExecutionError> {
        self.execute_with_cancel(graph, CancellationToken::new()).await
    }

    /// Run every node of `graph`, stopping early if `cancel` fires
    pub async fn execute_with_cancel(
        &self,
        graph: &Graph,
        cancel: CancellationToken,
    ) -> Result<ExecutionReport, ExecutionError> {
        let started = Instant::now();
        let mode = self.config.mode;
        let mut report = ExecutionReport::new(graph, mode);
        self.set_state(RunState::Running);
        tracing::info!(
            "Executing graph '{}' ({} nodes, {:?})",
            graph.name(),
            graph.node_count(),
            mode
        );

        let outcome = match mode {
            ExecutionMode::Sequential => self.run_sequential(graph, &cancel, &mut report).await,
            ExecutionMode::Parallel => self.run_parallel(graph, &cancel, &mut report).await,
        };
        report.duration = started.elapsed();

        match outcome {
            Ok(()) => {
                report.state = RunState::Finished;
                self.set_state(RunState::Finished);
                tracing::info!(
                    "Graph '{}' finished in {:?} over {} waves",
                    graph.name(),
                    report.duration,
                    report.waves.len()
                );
                Ok(report)
            }
            Err(Abort::Graph(err)) => {
                report.skip_pending();
                report.state = RunState::Failed;
                self.set_state(RunState::Failed);
                tracing::error!("Graph '{}' could not be scheduled: {}", graph.name(), err);
                Err(ExecutionError::Graph {
                    source: err,
                    report: Box::new(report),
                })
            }
            Err(Abort::Node { node, name, error }) => {
                report.skip_pending();
                report.state = RunState::Failed;
                self.set_state(RunState::Failed);
                Err(ExecutionError::NodeFailed {
                    node,
                    name,
                    source: error,
                    report: Box::new(report),
                })
            }
            Err(Abort::Cancelled) => {
                report.skip_pending();
                report.state = RunState::Cancelled;
                self.set_state(RunState::Cancelled);
                tracing::info!("Graph '{}' cancelled", graph.name());
                Err(ExecutionError::Cancelled {
                    report: Box::new(report),
                })
            }
        }
    }

    /// Run `graph` on the tokio runtime off the calling task
    pub fn spawn(
        self: &Arc<Self>,
        graph: Arc<Graph>,
    ) -> JoinHandle<Result<ExecutionReport, ExecutionError>> {
        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.execute(&graph).await })
    }

    async fn run_sequential(
        &self,
        graph: &Graph,
        cancel: &CancellationToken,
        report: &mut ExecutionReport,
    ) -> Result<(), Abort> {
        // Links can change behind the cached order through shared node handles
        let order = graph.topological_sort()?;
        for id in order {
            if cancel.is_cancelled() {
                return Err(Abort::Cancelled);
            }
            report.set(id, NodeStatus::Running);
            report.waves.push(vec![id]);

            match self.run_node(graph, id, cancel).await? {
                NodeOutcome::Finished => report.set(id, NodeStatus::Finished),
                NodeOutcome::Failed { name, error } => {
                    report.set(id, NodeStatus::Failed);
                    return Err(Abort::Node {
                        node: id,
                        name,
                        error,
                    });
                }
                NodeOutcome::Cancelled => {
                    report.set(id, NodeStatus::Cancelled);
                    return Err(Abort::Cancelled);
                }
            }
        }
        Ok(())
    }

    async fn run_parallel(
        &self,
        graph: &Graph,
        cancel: &CancellationToken,
        report: &mut ExecutionReport,
    ) -> Result<(), Abort> {
        let ctx = graph.context();
        let mut dependencies: HashMap<NodeId, IndexSet<NodeId>> = HashMap::new();
        for node in graph.nodes() {
            let node = node.read_recursive();
            dependencies.insert(node.id(), node.dependencies(ctx)?);
        }

        let mut remaining: IndexSet<NodeId> = graph.node_ids().into_iter().collect();
        let mut completed: HashSet<NodeId> = HashSet::with_capacity(remaining.len());

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                return Err(Abort::Cancelled);
            }

            let frontier: Vec<NodeId> = remaining
                .iter()
                .filter(|id| {
                    dependencies
                        .get(*id)
                        .map_or(true, |deps| deps.iter().all(|d| completed.contains(d)))
                })
                .copied()
                .collect();
            if frontier.is_empty() {
                return Err(Abort::Graph(GraphError::CyclicDependency {
                    graph: graph.name().to_string(),
                }));
            }

            tracing::info!(
                "Graph '{}' wave {}: {} nodes",
                graph.name(),
                report.waves.len() + 1,
                frontier.len()
            );
            report.waves.push(frontier.clone());

            let chunk_size = self
                .config
                .max_concurrency
                .unwrap_or(frontier.len())
                .max(1);
            let mut failure = None;
            let mut structural = None;
            let mut cancelled = false;

            // The whole wave drains before a failure is acted on
            for chunk in frontier.chunks(chunk_size) {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                for id in chunk {
                    report.set(*id, NodeStatus::Running);
                }
                let results = join_all(chunk.iter().map(|id| self.run_node(graph, *id, cancel))).await;

                for (&id, result) in chunk.iter().zip(results) {
                    match result {
                        Ok(NodeOutcome::Finished) => report.set(id, NodeStatus::Finished),
                        Ok(NodeOutcome::Failed { name, error }) => {
                            report.set(id, NodeStatus::Failed);
                            if failure.is_none() {
                                failure = Some(Abort::Node {
                                    node: id,
                                    name,
                                    error,
                                });
                            }
                        }
                        Ok(NodeOutcome::Cancelled) => {
                            report.set(id, NodeStatus::Cancelled);
                            cancelled = true;
                        }
                        Err(err) => {
                            report.set(id, NodeStatus::Failed);
                            structural.get_or_insert(err);
                        }
                    }
                }
            }

            if let Some(err) = structural {
                return Err(Abort::Graph(err));
            }
            if let Some(failure) = failure {
                return Err(failure);
            }
            if cancelled {
                return Err(Abort::Cancelled);
            }

            remaining.retain(|id| !frontier.contains(id));
            completed.extend(frontier);
        }
        Ok(())
    }

    async fn run_node(
        &self,
        graph: &Graph,
        id: NodeId,
        cancel: &CancellationToken,
    ) -> Result<NodeOutcome, GraphError> {
        let ctx = graph.context();
        let shared = ctx.get_node(id).ok_or(GraphError::NodeNotFound(id))?;
        let (name, operator, mut pins) = {
            let node = shared.read_recursive();
            (node.name().to_string(), node.operator(), node.pins().clone())
        };
        pull_inputs(ctx, &mut pins)?;

        tracing::debug!("Running node '{}' ({})", name, id);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(NodeOutcome::Cancelled),
            result = self.bounded(operator.execute(&mut pins)) => result,
        };

        match result {
            Ok(()) => {
                commit(&shared, pins);
                tracing::debug!("Committed outputs of node '{}'", name);
                Ok(NodeOutcome::Finished)
            }
            Err(error) => {
                tracing::error!("Node '{}' ({}) failed: {}", name, id, error);
                Ok(NodeOutcome::Failed { name, error })
            }
        }
    }

    async fn bounded<F>(&self, work: F) -> Result<(), NodeError>
    where
        F: Future<Output = Result<(), NodeError>>,
    {
        match self.config.node_timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .unwrap_or_else(|_| Err(NodeError::Timeout(limit))),
            None => work.await,
        }
    }
}

/// Fill every linked input with the value of its peer output.
///
/// An unlinked input keeps whatever value it already had. An input with
/// several links under unbounded fan-in receives an array in link order.
fn pull_inputs(ctx: &GraphContext, pins: &mut Pins) -> Result<(), GraphError> {
    for (_, pin) in pins.iter_mut() {
        if !pin.is_input() || pin.links().is_empty() {
            continue;
        }
        let mut values = Vec::with_capacity(pin.links().len());
        for peer in pin.links() {
            let source = ctx.get_pin(*peer).ok_or(GraphError::DanglingLink {
                pin: pin.id,
                peer: *peer,
            })?;
            values.push(source.value().clone());
        }
        let value = if values.len() == 1 {
            values.pop().unwrap_or_default()
        } else {
            Value::Array(values)
        };
        pin.set_value(value);
    }
    Ok(())
}

/// Write the values computed by a run back into the live node
fn commit(shared: &SharedNode, mut pins: Pins) {
    let mut node = shared.write();
    for (name, pin) in pins.iter_mut() {
        if let Some(slot) = node.pins_mut().get_mut(name) {
            slot.set_value(pin.take_value());
        }
    }
}
