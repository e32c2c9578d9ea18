//! Workflow Compiler: routing decision + registry → dependency graph.
//!
//! ```text
//! required = primary ∪ activated secondaries ∪ triggered handlers
//! edges    = compatibility rules over the required set
//! strategy = simple → PARALLEL, linear → SEQUENTIAL, branching → HIERARCHICAL
//! ```

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::graph::{TaskNode, WorkflowGraph};
use crate::config::ExecutionConfig;
use crate::error::{ConfigResult, ConfigurationError};
use crate::registry::{HandlerKind, HandlerRegistry};
use crate::router::{RoutingDecision, EMPTY_INPUT_SEGMENT};

/// One ordering rule between handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CompatibilityRule {
    /// When both are present, `first` runs before `then`.
    Before { first: HandlerKind, then: HandlerKind },
    /// When present, this handler waits for every other present node.
    AfterAll { handler: HandlerKind },
}

/// Static handler ordering table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityTable {
    rules: Vec<CompatibilityRule>,
}

impl Default for CompatibilityTable {
    fn default() -> Self {
        Self::new(vec![
            CompatibilityRule::Before {
                first: HandlerKind::PatternDetection,
                then: HandlerKind::Synthesis,
            },
            CompatibilityRule::Before {
                first: HandlerKind::EmotionAnalysis,
                then: HandlerKind::Synthesis,
            },
            CompatibilityRule::AfterAll {
                handler: HandlerKind::Validation,
            },
        ])
    }
}

impl CompatibilityTable {
    pub fn new(rules: Vec<CompatibilityRule>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn with_rule(mut self, rule: CompatibilityRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[CompatibilityRule] {
        &self.rules
    }

    /// Ordering edges among `present`, in rule order, deduplicated.
    pub fn edges_for(&self, present: &[HandlerKind]) -> Vec<(HandlerKind, HandlerKind)> {
        let mut edges: Vec<(HandlerKind, HandlerKind)> = Vec::new();
        let mut push = |edge: (HandlerKind, HandlerKind)| {
            if !edges.contains(&edge) {
                edges.push(edge);
            }
        };
        for rule in &self.rules {
            match *rule {
                CompatibilityRule::Before { first, then } => {
                    if present.contains(&first) && present.contains(&then) {
                        push((first, then));
                    }
                }
                CompatibilityRule::AfterAll { handler } => {
                    if present.contains(&handler) {
                        for other in present.iter().filter(|k| **k != handler) {
                            push((*other, handler));
                        }
                    }
                }
            }
        }
        edges
    }

    /// Reject a table that orders some handler set into a cycle.
    ///
    /// Checked with every handler present, which is the worst case for any
    /// request.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut dag: DiGraph<HandlerKind, ()> = DiGraph::new();
        let indices: Vec<_> = HandlerKind::ALL.iter().map(|k| dag.add_node(*k)).collect();
        let position = |kind: HandlerKind| HandlerKind::ALL.iter().position(|k| *k == kind);

        for (from, to) in self.edges_for(&HandlerKind::ALL) {
            if from == to {
                return Err(ConfigurationError::Cycle {
                    node: from.to_string(),
                });
            }
            if let (Some(a), Some(b)) = (position(from), position(to)) {
                dag.add_edge(indices[a], indices[b], ());
            }
        }
        toposort(&dag, None).map(|_| ()).map_err(|cycle| ConfigurationError::Cycle {
            node: dag[cycle.node_id()].to_string(),
        })
    }
}

/// Expands routing decisions into validated workflow graphs.
#[derive(Debug, Clone)]
pub struct WorkflowCompiler {
    table: CompatibilityTable,
    execution: ExecutionConfig,
}

impl WorkflowCompiler {
    /// Fails when the compatibility table contains a cycle.
    pub fn new(table: CompatibilityTable, execution: ExecutionConfig) -> ConfigResult<Self> {
        table.validate()?;
        Ok(Self { table, execution })
    }

    pub fn table(&self) -> &CompatibilityTable {
        &self.table
    }

    /// Handlers this decision requires, in node order.
    pub fn required_handlers(
        &self,
        decision: &RoutingDecision,
        registry: &HandlerRegistry,
    ) -> Vec<HandlerKind> {
        let mut required = decision.scheduled();
        for kind in registry.triggered(
            &decision.tags,
            &decision.indicators,
            decision.needs_confirmation,
        ) {
            if !required.contains(&kind) {
                debug!(handler = %kind, "Handler triggered by static condition");
                required.push(kind);
            }
        }
        required
    }

    /// Build the graph for one request.
    pub fn compile(
        &self,
        decision: &RoutingDecision,
        text: &str,
        registry: &HandlerRegistry,
    ) -> ConfigResult<WorkflowGraph> {
        let required = self.required_handlers(decision, registry);
        let full_text = if text.trim().is_empty() {
            EMPTY_INPUT_SEGMENT
        } else {
            text
        };

        let mut builder = WorkflowGraph::builder();
        for kind in &required {
            registry.require(*kind)?;
            let input = decision.segment_for(*kind).unwrap_or(full_text);
            builder.add_node(TaskNode::new(kind.as_str(), *kind, input))?;
        }
        for (from, to) in self.table.edges_for(&required) {
            builder.add_edge(from.as_str(), to.as_str())?;
        }

        let graph = builder
            .build()?
            .with_max_parallel(self.execution.max_parallel_agents)
            .with_node_timeout(self.execution.node_timeout());

        info!(
            workflow_id = graph.id(),
            decision_id = %decision.id,
            nodes = graph.len(),
            edges = graph.edges().len(),
            complexity = ?graph.complexity(),
            strategy = %graph.strategy(),
            "Workflow compiled"
        );
        Ok(graph)
    }
}
