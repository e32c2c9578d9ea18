//! Integration tests for workflow execution
//!
//! Runs compiled and hand-built graphs through the execution engine with
//! scripted handlers, checking ordering, timeouts and failure isolation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use triage_coordination::workflow::{NodeStatus, RunContext};
use triage_coordination::{
    Category, ExecutionEngine, ExecutionStrategy, Handler, HandlerError, HandlerKind,
    HandlerProfile, HandlerRegistry, InvocationMetadata, TaskNode, WorkflowGraph,
};

/// Sleeps for a fixed delay, then echoes its node id and upstream keys.
struct DelayHandler {
    delay: Duration,
}

#[async_trait]
impl Handler for DelayHandler {
    async fn invoke(&self, _segment: &str, metadata: &InvocationMetadata) -> Result<Value, HandlerError> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({
            "node": metadata.node_id,
            "upstream": metadata.upstream.keys().collect::<Vec<_>>(),
        }))
    }
}

fn registry(entries: &[(HandlerKind, u64)]) -> Arc<HandlerRegistry> {
    let mut builder = HandlerRegistry::builder();
    for (kind, delay_ms) in entries {
        builder = builder
            .register(
                HandlerProfile::default_for(*kind),
                Arc::new(DelayHandler {
                    delay: Duration::from_millis(*delay_ms),
                }),
            )
            .expect("register handler");
    }
    builder.build().shared()
}

fn node(kind: HandlerKind) -> TaskNode {
    TaskNode::new(kind.as_str(), kind, "Third late night this week, same worry loop")
}

/// Test: an enforced edge orders completion strictly before the dependent's start
#[tokio::test]
async fn test_hierarchical_edge_orders_nodes() {
    let registry = registry(&[(HandlerKind::PatternDetection, 20), (HandlerKind::Synthesis, 1)]);

    let mut builder = WorkflowGraph::builder();
    builder.add_node(node(HandlerKind::PatternDetection)).unwrap();
    builder.add_node(node(HandlerKind::Synthesis)).unwrap();
    builder.add_edge("pattern_detection", "synthesis").unwrap();
    let graph = builder
        .build()
        .unwrap()
        .with_strategy(ExecutionStrategy::Hierarchical)
        .with_max_parallel(4);

    let result = ExecutionEngine::new(registry)
        .execute(graph, &RunContext::new(Category::Personal, 0.8))
        .await;

    assert!(result.is_clean(), "unexpected errors: {:?}", result.errors);
    assert_eq!(result.strategy, ExecutionStrategy::Hierarchical);

    let upstream = result.report("pattern_detection").unwrap().timing.clone().unwrap();
    let downstream = result.report("synthesis").unwrap().timing.clone().unwrap();
    assert!(upstream.finished_tick < downstream.started_tick);
    assert!(upstream.finished_at <= downstream.started_at);

    // The dependent saw its upstream output.
    assert_eq!(result.outputs["synthesis"]["upstream"], json!(["pattern_detection"]));
}

/// Test: a hierarchical level waits for every node of the previous level,
/// including ones it does not depend on
#[tokio::test]
async fn test_hierarchical_level_barrier_waits_for_unrelated_node() {
    let registry = registry(&[
        (HandlerKind::Work, 200),
        (HandlerKind::PatternDetection, 1),
        (HandlerKind::Synthesis, 1),
    ]);

    let mut builder = WorkflowGraph::builder();
    builder.add_node(node(HandlerKind::Work)).unwrap();
    builder.add_node(node(HandlerKind::PatternDetection)).unwrap();
    builder.add_node(node(HandlerKind::Synthesis)).unwrap();
    builder.add_edge("pattern_detection", "synthesis").unwrap();
    let graph = builder
        .build()
        .unwrap()
        .with_strategy(ExecutionStrategy::Hierarchical)
        .with_max_parallel(4);

    let result = ExecutionEngine::new(registry)
        .execute(graph, &RunContext::new(Category::Work, 0.8))
        .await;

    assert!(result.is_clean(), "unexpected errors: {:?}", result.errors);
    let timing = |id: &str| result.report(id).unwrap().timing.clone().unwrap();

    // Synthesis depends only on pattern_detection, yet starts after work.
    assert!(timing("pattern_detection").finished_tick < timing("synthesis").started_tick);
    assert!(timing("work").finished_tick < timing("synthesis").started_tick);
    assert!(timing("work").finished_at <= timing("synthesis").started_at);
    assert_eq!(result.outputs["synthesis"]["upstream"], json!(["pattern_detection"]));
}

/// Test: one slow node among three independent ones times out alone
#[tokio::test]
async fn test_timeout_isolated_to_one_node() {
    let registry = registry(&[
        (HandlerKind::Work, 1),
        (HandlerKind::Health, 2_000),
        (HandlerKind::Finance, 1),
    ]);

    let mut builder = WorkflowGraph::builder();
    for kind in [HandlerKind::Work, HandlerKind::Health, HandlerKind::Finance] {
        builder.add_node(node(kind)).unwrap();
    }
    let graph = builder
        .build()
        .unwrap()
        .with_strategy(ExecutionStrategy::Parallel)
        .with_max_parallel(3)
        .with_node_timeout(Duration::from_millis(100));

    let result = ExecutionEngine::new(registry)
        .execute(graph, &RunContext::new(Category::Work, 0.7))
        .await;

    assert_eq!(result.errors.len(), 1);
    assert!(matches!(
        result.errors["health"],
        HandlerError::Timeout {
            handler: HandlerKind::Health,
            timeout_ms: 100
        }
    ));

    let health = result.report("health").unwrap();
    assert_eq!(health.status, NodeStatus::Failed);
    assert!(health.error.is_some());

    for id in ["work", "finance"] {
        assert_eq!(result.report(id).unwrap().status, NodeStatus::Completed, "{id}");
        assert!(result.outputs.contains_key(id));
    }
    assert_eq!(result.completed_count(), 2);
    assert_eq!(result.failed_count(), 1);
}

/// Test: a sequential chain runs in dependency order, not insertion order
#[tokio::test]
async fn test_sequential_follows_dependencies() {
    let registry = registry(&[
        (HandlerKind::Work, 1),
        (HandlerKind::PatternDetection, 1),
        (HandlerKind::Synthesis, 1),
    ]);

    let mut builder = WorkflowGraph::builder();
    builder.add_node(node(HandlerKind::Synthesis)).unwrap();
    builder.add_node(node(HandlerKind::PatternDetection)).unwrap();
    builder.add_node(node(HandlerKind::Work)).unwrap();
    builder.add_edge("work", "pattern_detection").unwrap();
    builder.add_edge("pattern_detection", "synthesis").unwrap();
    let graph = builder.build().unwrap();
    assert_eq!(graph.strategy(), ExecutionStrategy::Sequential);

    let result = ExecutionEngine::new(registry)
        .execute(graph, &RunContext::new(Category::Work, 0.9))
        .await;

    assert!(result.is_clean());
    assert!(!result.degraded);
    let tick = |id: &str| result.report(id).unwrap().timing.clone().unwrap();
    assert!(tick("work").finished_tick < tick("pattern_detection").started_tick);
    assert!(tick("pattern_detection").finished_tick < tick("synthesis").started_tick);
}

/// Test: building a cyclic graph is rejected up front
#[test]
fn test_cycle_rejected_at_build() {
    let mut builder = WorkflowGraph::builder();
    builder.add_node(node(HandlerKind::Work)).unwrap();
    builder.add_node(node(HandlerKind::Personal)).unwrap();
    builder.add_edge("work", "personal").unwrap();
    builder.add_edge("personal", "work").unwrap();
    assert!(builder.build().is_err());
}
