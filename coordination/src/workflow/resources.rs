//! Resource Manager: advisory concurrency caps from aggregate handler cost.
//!
//! Caps only ever lower the configured concurrency. Nothing is rejected.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::graph::WorkflowGraph;
use crate::config::ResourceConfig;
use crate::registry::HandlerRegistry;

/// Concurrency chosen for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyPlan {
    pub configured: usize,
    pub max_parallel: usize,
    pub total_compute: f64,
    pub total_memory: f64,
    /// Which caps fired, e.g. "compute 3.4 > 3"
    pub reasons: Vec<String>,
}

impl ConcurrencyPlan {
    pub fn is_capped(&self) -> bool {
        self.max_parallel < self.configured
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceManager {
    config: ResourceConfig,
}

impl ResourceManager {
    pub fn new(config: ResourceConfig) -> Self {
        Self { config }
    }

    /// Sum the cost of every node's handler and cap `configured`.
    pub fn plan(
        &self,
        graph: &WorkflowGraph,
        registry: &HandlerRegistry,
        configured: usize,
    ) -> ConcurrencyPlan {
        let (total_compute, total_memory) = graph
            .nodes()
            .iter()
            .filter_map(|n| registry.profile(n.handler))
            .fold((0.0, 0.0), |(c, m), p| {
                (c + p.compute_intensity, m + p.memory_cost)
            });

        let configured = configured.max(1);
        let mut max_parallel = configured;
        let mut reasons = Vec::new();

        if total_compute > self.config.compute_threshold {
            max_parallel = max_parallel.min(self.config.compute_cap);
            reasons.push(format!(
                "compute {total_compute:.2} > {}",
                self.config.compute_threshold
            ));
        }
        if total_memory > self.config.memory_threshold {
            max_parallel = max_parallel.min(self.config.memory_cap);
            reasons.push(format!(
                "memory {total_memory:.0} > {}",
                self.config.memory_threshold
            ));
        }
        let max_parallel = max_parallel.max(1);

        if max_parallel < configured {
            info!(
                workflow_id = graph.id(),
                configured,
                max_parallel,
                total_compute,
                total_memory,
                "Concurrency capped by resource estimate"
            );
        }

        ConcurrencyPlan {
            configured,
            max_parallel,
            total_compute,
            total_memory,
            reasons,
        }
    }

    /// Apply [`plan`](Self::plan) to the graph's own concurrency.
    pub fn apply(&self, graph: WorkflowGraph, registry: &HandlerRegistry) -> (WorkflowGraph, ConcurrencyPlan) {
        let plan = self.plan(&graph, registry, graph.max_parallel());
        let graph = graph.with_max_parallel(plan.max_parallel);
        (graph, plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::registry::{Handler, HandlerKind, HandlerProfile, InvocationMetadata};
    use crate::workflow::TaskNode;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Noop;

    #[async_trait]
    impl Handler for Noop {
        async fn invoke(
            &self,
            _segment: &str,
            _metadata: &InvocationMetadata,
        ) -> Result<serde_json::Value, HandlerError> {
            Ok(serde_json::Value::Null)
        }
    }

    fn setup(costs: &[(HandlerKind, f64, f64)]) -> (WorkflowGraph, HandlerRegistry) {
        let mut registry = HandlerRegistry::builder();
        let mut graph = WorkflowGraph::builder();
        for (kind, compute, memory) in costs {
            registry = registry
                .register(
                    HandlerProfile::new(*kind).with_cost(*compute, *memory),
                    Arc::new(Noop),
                )
                .unwrap();
            graph.add_node(TaskNode::new(kind.as_str(), *kind, "x")).unwrap();
        }
        (graph.build().unwrap(), registry.build())
    }

    #[test]
    fn test_cheap_workflow_keeps_configured() {
        let (graph, registry) = setup(&[(HandlerKind::Work, 1.0, 256.0), (HandlerKind::Ideas, 1.0, 256.0)]);
        let plan = ResourceManager::default().plan(&graph, &registry, 5);
        assert_eq!(plan.max_parallel, 5);
        assert!(!plan.is_capped());
        assert!(plan.reasons.is_empty());
    }

    #[test]
    fn test_compute_cap() {
        let (graph, registry) = setup(&[
            (HandlerKind::Work, 1.5, 100.0),
            (HandlerKind::Health, 1.5, 100.0),
            (HandlerKind::Ideas, 0.5, 100.0),
        ]);
        let plan = ResourceManager::default().plan(&graph, &registry, 5);
        assert_eq!(plan.max_parallel, 3);
        assert_eq!(plan.reasons.len(), 1);
    }

    #[test]
    fn test_memory_cap() {
        let (graph, registry) = setup(&[(HandlerKind::Work, 0.5, 1500.0), (HandlerKind::Ideas, 0.5, 1000.0)]);
        let plan = ResourceManager::default().plan(&graph, &registry, 8);
        assert_eq!(plan.max_parallel, 4);
    }

    #[test]
    fn test_caps_never_raise() {
        let (graph, registry) = setup(&[(HandlerKind::Work, 5.0, 5000.0)]);
        let plan = ResourceManager::default().plan(&graph, &registry, 2);
        assert_eq!(plan.max_parallel, 2);
        assert_eq!(plan.reasons.len(), 2);
    }

    #[test]
    fn test_exact_threshold_does_not_cap() {
        let (graph, registry) = setup(&[(HandlerKind::Work, 3.0, 2048.0)]);
        let plan = ResourceManager::default().plan(&graph, &registry, 5);
        assert_eq!(plan.max_parallel, 5);
    }

    #[test]
    fn test_apply_updates_graph() {
        let (graph, registry) = setup(&[(HandlerKind::Work, 4.0, 10.0)]);
        let graph = graph.with_max_parallel(5);
        let (graph, plan) = ResourceManager::default().apply(graph, &registry);
        assert_eq!(graph.max_parallel(), 3);
        assert!(plan.is_capped());
    }
}
