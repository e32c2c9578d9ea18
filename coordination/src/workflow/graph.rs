//! Per-request workflow graph.
//!
//! Nodes are handler invocations; an edge `a -> b` means `b` waits for `a`.
//! Graphs are validated on construction (no dangling edges, no cycles) and
//! owned by exactly one request.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{ConfigResult, ConfigurationError, HandlerError};
use crate::registry::HandlerKind;

/// How the engine walks the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Waves of ready nodes, capped per wave.
    Parallel,
    /// One node at a time in topological order.
    Sequential,
    /// Dependency-depth levels with a barrier between levels.
    Hierarchical,
}

impl std::fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parallel => write!(f, "parallel"),
            Self::Sequential => write!(f, "sequential"),
            Self::Hierarchical => write!(f, "hierarchical"),
        }
    }
}

/// Structural complexity of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    HighlyComplex,
}

impl Complexity {
    pub fn strategy(&self) -> ExecutionStrategy {
        match self {
            Self::Simple => ExecutionStrategy::Parallel,
            Self::Moderate => ExecutionStrategy::Sequential,
            Self::Complex | Self::HighlyComplex => ExecutionStrategy::Hierarchical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Node '{node}' cannot move from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub node: String,
    pub from: NodeStatus,
    pub to: NodeStatus,
}

/// Observed timing of one handler invocation.
///
/// Ticks come from a per-run logical clock, so ordering between nodes is
/// exact even when wall-clock timestamps collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTiming {
    pub started_tick: u64,
    pub finished_tick: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// One scheduled handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub handler: HandlerKind,
    /// Input segment handed to the handler.
    pub input: String,
    pub dependencies: Vec<String>,
    status: NodeStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<HandlerError>,
    pub timing: Option<NodeTiming>,
}

impl TaskNode {
    pub fn new(id: impl Into<String>, handler: HandlerKind, input: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            handler,
            input: input.into(),
            dependencies: Vec::new(),
            status: NodeStatus::Pending,
            result: None,
            error: None,
            timing: None,
        }
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn execution_time(&self) -> Option<Duration> {
        self.timing
            .as_ref()
            .map(|t| Duration::from_millis(t.duration_ms))
    }

    fn transition(&mut self, to: NodeStatus) -> Result<(), InvalidTransition> {
        let allowed = match (self.status, to) {
            (NodeStatus::Pending, NodeStatus::Running) => true,
            (NodeStatus::Pending, NodeStatus::Failed) => true,
            (NodeStatus::Running, NodeStatus::Completed) => true,
            (NodeStatus::Running, NodeStatus::Failed) => true,
            _ => false,
        };
        if !allowed {
            return Err(InvalidTransition {
                node: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), InvalidTransition> {
        self.transition(NodeStatus::Running)
    }

    pub fn complete(
        &mut self,
        output: serde_json::Value,
        timing: NodeTiming,
    ) -> Result<(), InvalidTransition> {
        self.transition(NodeStatus::Completed)?;
        self.result = Some(output);
        self.timing = Some(timing);
        Ok(())
    }

    /// Fail a running node, or skip a pending one (no timing).
    pub fn fail(
        &mut self,
        error: HandlerError,
        timing: Option<NodeTiming>,
    ) -> Result<(), InvalidTransition> {
        self.transition(NodeStatus::Failed)?;
        self.error = Some(error);
        self.timing = timing;
        Ok(())
    }
}

/// Shape of a graph without node state, for plans and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub workflow_id: String,
    pub strategy: ExecutionStrategy,
    pub complexity: Complexity,
    pub nodes: Vec<(String, HandlerKind)>,
    pub edges: Vec<(String, String)>,
    pub max_parallel: usize,
}

/// Validated per-request dependency graph.
#[derive(Debug, Clone)]
pub struct WorkflowGraph {
    id: String,
    /// Insertion order is the stable tie-break for every traversal.
    nodes: Vec<TaskNode>,
    index: HashMap<String, usize>,
    edges: Vec<(String, String)>,
    strategy: ExecutionStrategy,
    complexity: Complexity,
    max_parallel: usize,
    node_timeout: Duration,
}

impl WorkflowGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Build without validation. Used to exercise the engine's
    /// degraded paths.
    pub(crate) fn new_unchecked(nodes: Vec<TaskNode>, edges: Vec<(String, String)>) -> Self {
        let mut graph = Self::assemble(nodes, edges);
        graph.complexity = graph.assess_complexity();
        graph.strategy = graph.complexity.strategy();
        graph
    }

    fn assemble(mut nodes: Vec<TaskNode>, edges: Vec<(String, String)>) -> Self {
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        for (from, to) in &edges {
            if let Some(&i) = index.get(to) {
                if !nodes[i].dependencies.contains(from) {
                    nodes[i].dependencies.push(from.clone());
                }
            }
        }
        Self {
            id: Uuid::new_v4().to_string(),
            nodes,
            index,
            edges,
            strategy: ExecutionStrategy::Parallel,
            complexity: Complexity::Simple,
            max_parallel: 1,
            node_timeout: Duration::from_secs(30),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.strategy
    }

    pub fn complexity(&self) -> Complexity {
        self.complexity
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn node_timeout(&self) -> Duration {
        self.node_timeout
    }

    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(String, String)] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&TaskNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut TaskNode> {
        match self.index.get(id) {
            Some(&i) => Some(&mut self.nodes[i]),
            None => None,
        }
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    /// Ids of nodes that depend directly on `id`.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(from, _)| from == id)
            .map(|(_, to)| to.as_str())
            .collect()
    }

    /// Single path visiting every node.
    pub fn is_linear_chain(&self) -> bool {
        let n = self.nodes.len();
        if n < 2 || self.edges.len() != n - 1 {
            return false;
        }
        let roots = self
            .nodes
            .iter()
            .filter(|node| node.dependencies.is_empty())
            .count();
        roots == 1
            && self.nodes.iter().all(|node| {
                node.dependencies.len() <= 1 && self.dependents(&node.id).len() <= 1
            })
    }

    pub fn assess_complexity(&self) -> Complexity {
        if self.nodes.len() <= 1 || self.edges.is_empty() {
            Complexity::Simple
        } else if self.is_linear_chain() {
            Complexity::Moderate
        } else if self.nodes.len() > 4 {
            Complexity::HighlyComplex
        } else {
            Complexity::Complex
        }
    }

    pub fn summary(&self) -> GraphSummary {
        GraphSummary {
            workflow_id: self.id.clone(),
            strategy: self.strategy,
            complexity: self.complexity,
            nodes: self
                .nodes
                .iter()
                .map(|n| (n.id.clone(), n.handler))
                .collect(),
            edges: self.edges.clone(),
            max_parallel: self.max_parallel,
        }
    }

    /// Kahn's algorithm, ties broken by insertion order. `None` on a cycle.
    pub fn topological_order(&self) -> Option<Vec<String>> {
        let mut placed: HashSet<&str> = HashSet::with_capacity(self.nodes.len());
        let mut order = Vec::with_capacity(self.nodes.len());
        while order.len() < self.nodes.len() {
            let next = self.nodes.iter().find(|n| {
                !placed.contains(n.id.as_str())
                    && n.dependencies.iter().all(|d| placed.contains(d.as_str()))
            })?;
            placed.insert(next.id.as_str());
            order.push(next.id.clone());
        }
        Some(order)
    }

    /// Partition nodes by dependency depth.
    ///
    /// Level 0 has no dependencies; level n depends only on levels < n. If a
    /// level would be empty while nodes remain (a cycle), the first remaining
    /// node is admitted anyway and the returned flag is set.
    pub fn levels(&self) -> (Vec<Vec<String>>, bool) {
        let mut placed: HashSet<&str> = HashSet::with_capacity(self.nodes.len());
        let mut levels: Vec<Vec<String>> = Vec::new();
        let mut forced = false;

        while placed.len() < self.nodes.len() {
            let mut level: Vec<&str> = self
                .nodes
                .iter()
                .filter(|n| {
                    !placed.contains(n.id.as_str())
                        && n.dependencies.iter().all(|d| placed.contains(d.as_str()))
                })
                .map(|n| n.id.as_str())
                .collect();

            if level.is_empty() {
                forced = true;
                if let Some(n) = self.nodes.iter().find(|n| !placed.contains(n.id.as_str())) {
                    level.push(n.id.as_str());
                }
            }
            placed.extend(level.iter().copied());
            levels.push(level.into_iter().map(String::from).collect());
        }
        (levels, forced)
    }
}

/// Incremental graph construction with validation.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<TaskNode>,
    edges: Vec<(String, String)>,
}

impl GraphBuilder {
    pub fn add_node(&mut self, node: TaskNode) -> ConfigResult<&mut Self> {
        if self.nodes.iter().any(|n| n.id == node.id) {
            return Err(ConfigurationError::DuplicateNode(node.id));
        }
        self.nodes.push(node);
        Ok(self)
    }

    /// `to` waits for `from`. Both endpoints must already exist.
    pub fn add_edge(&mut self, from: &str, to: &str) -> ConfigResult<&mut Self> {
        let known = |id: &str| self.nodes.iter().any(|n| n.id == id);
        if !known(from) || !known(to) {
            return Err(ConfigurationError::DanglingEdge {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        if from == to {
            return Err(ConfigurationError::Cycle {
                node: from.to_string(),
            });
        }
        let edge = (from.to_string(), to.to_string());
        if !self.edges.contains(&edge) {
            self.edges.push(edge);
        }
        Ok(self)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Validate and build. Rejects cycles.
    pub fn build(self) -> ConfigResult<WorkflowGraph> {
        let mut dag: DiGraph<&str, ()> = DiGraph::new();
        let indices: HashMap<&str, _> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), dag.add_node(n.id.as_str())))
            .collect();
        for (from, to) in &self.edges {
            dag.add_edge(indices[from.as_str()], indices[to.as_str()], ());
        }
        if let Err(cycle) = toposort(&dag, None) {
            return Err(ConfigurationError::Cycle {
                node: dag[cycle.node_id()].to_string(),
            });
        }

        let mut graph = WorkflowGraph::assemble(self.nodes, self.edges);
        graph.complexity = graph.assess_complexity();
        graph.strategy = graph.complexity.strategy();
        Ok(graph)
    }
}
