//! Workflow Execution Engine
//!
//! Runs a [`WorkflowGraph`] under its chosen strategy.
//!
//! ```text
//! PARALLEL      ready nodes ─► wave (≤ cap) ─► barrier ─► next ready set
//! SEQUENTIAL    topological order, one node at a time
//! HIERARCHICAL  level 0 ─► barrier ─► level 1 ─► barrier ─► ...
//! ```
//!
//! Every node gets its own timeout. A failed node never aborts siblings that
//! are already running; pending nodes that depend on it are failed without
//! being invoked. Handler failures end up in [`ExecutionResult::errors`],
//! never as an `Err`.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::graph::{ExecutionStrategy, NodeStatus, NodeTiming, WorkflowGraph};
use crate::classifier::Category;
use crate::error::HandlerError;
use crate::events::{SharedEventBus, WorkflowEvent};
use crate::registry::{Handler, HandlerKind, HandlerRegistry, InvocationMetadata};
use crate::router::RoutingDecision;

/// Classification context handed to every handler in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub category: Category,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub indicators: Vec<String>,
    /// Confidence per routed handler; others use `confidence`.
    #[serde(default)]
    pub handler_confidence: BTreeMap<HandlerKind, f64>,
}

impl RunContext {
    pub fn new(category: Category, confidence: f64) -> Self {
        Self {
            category,
            confidence,
            tags: Vec::new(),
            indicators: Vec::new(),
            handler_confidence: BTreeMap::new(),
        }
    }

    pub fn from_decision(decision: &RoutingDecision) -> Self {
        let mut handler_confidence = BTreeMap::new();
        handler_confidence.insert(decision.primary, decision.confidence);
        for assignment in &decision.secondary {
            handler_confidence.insert(assignment.handler, assignment.confidence);
        }
        Self {
            category: decision.category,
            confidence: decision.confidence,
            tags: decision.tags.clone(),
            indicators: decision.indicators.clone(),
            handler_confidence,
        }
    }

    fn metadata_for(
        &self,
        node_id: &str,
        handler: HandlerKind,
        upstream: BTreeMap<String, serde_json::Value>,
    ) -> InvocationMetadata {
        InvocationMetadata {
            node_id: node_id.to_string(),
            handler,
            category: handler.category().unwrap_or(self.category),
            confidence: self
                .handler_confidence
                .get(&handler)
                .copied()
                .unwrap_or(self.confidence),
            tags: self.tags.clone(),
            indicators: self.indicators.clone(),
            upstream,
        }
    }
}

/// Final state of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node_id: String,
    pub handler: HandlerKind,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<HandlerError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<NodeTiming>,
}

/// Everything a caller gets back from a run, including partial failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub workflow_id: String,
    pub strategy: ExecutionStrategy,
    pub concurrency: usize,
    /// Output per completed node.
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Error per failed node, including dependency skips.
    pub errors: BTreeMap<String, HandlerError>,
    /// Per-node reports in graph order.
    pub nodes: Vec<NodeReport>,
    /// Set when the scheduler had to bend dependency order to terminate.
    pub degraded: bool,
    pub degraded_reasons: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_ms: u64,
}

impl ExecutionResult {
    fn collect(
        graph: WorkflowGraph,
        degraded_reasons: Vec<String>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let mut outputs = BTreeMap::new();
        let mut errors = BTreeMap::new();
        let mut nodes = Vec::with_capacity(graph.len());

        for node in graph.nodes() {
            if let Some(ref output) = node.result {
                outputs.insert(node.id.clone(), output.clone());
            }
            if let Some(ref error) = node.error {
                errors.insert(node.id.clone(), error.clone());
            }
            nodes.push(NodeReport {
                node_id: node.id.clone(),
                handler: node.handler,
                status: node.status(),
                error: node.error.clone(),
                timing: node.timing.clone(),
            });
        }

        Self {
            workflow_id: graph.id().to_string(),
            strategy: graph.strategy(),
            concurrency: graph.max_parallel(),
            outputs,
            errors,
            nodes,
            degraded: !degraded_reasons.is_empty(),
            degraded_reasons,
            started_at,
            finished_at: Utc::now(),
            total_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn report(&self, node_id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    pub fn completed_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Completed)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Failed)
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.degraded
    }
}

/// Mutable state for one run. Never shared across requests.
struct RunState {
    graph: WorkflowGraph,
    clock: Arc<AtomicU64>,
    degraded_reasons: Vec<String>,
}

impl RunState {
    fn degrade(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(workflow_id = self.graph.id(), reason = %reason, "Workflow run degraded");
        self.degraded_reasons.push(reason);
    }
}

/// Everything a spawned node task needs, owned.
struct NodeJob {
    id: String,
    kind: HandlerKind,
    handler: Arc<dyn Handler>,
    segment: String,
    metadata: InvocationMetadata,
    timeout: Duration,
    clock: Arc<AtomicU64>,
}

struct NodeRun {
    id: String,
    timing: NodeTiming,
    outcome: Result<serde_json::Value, HandlerError>,
}

impl NodeJob {
    async fn run(self) -> NodeRun {
        let started_tick = self.clock.fetch_add(1, Ordering::SeqCst);
        let started_at = Utc::now();
        let start = Instant::now();

        let invocation =
            AssertUnwindSafe(self.handler.invoke(&self.segment, &self.metadata)).catch_unwind();
        let outcome = match tokio::time::timeout(self.timeout, invocation).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(HandlerError::Aborted {
                reason: panic_message(&*panic),
            }),
            Err(_) => Err(HandlerError::Timeout {
                handler: self.kind,
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };

        let duration = start.elapsed();
        let finished_tick = self.clock.fetch_add(1, Ordering::SeqCst);
        NodeRun {
            id: self.id,
            timing: NodeTiming {
                started_tick,
                finished_tick,
                started_at,
                finished_at: Utc::now(),
                duration_ms: duration.as_millis() as u64,
            },
            outcome,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

fn dependencies_completed(graph: &WorkflowGraph, id: &str) -> bool {
    graph.node(id).is_some_and(|node| {
        node.dependencies.iter().all(|d| {
            graph
                .node(d)
                .is_some_and(|dep| dep.status() == NodeStatus::Completed)
        })
    })
}

fn failed_dependency(graph: &WorkflowGraph, id: &str) -> Option<String> {
    let node = graph.node(id)?;
    node.dependencies
        .iter()
        .find(|d| {
            graph
                .node(d)
                .is_some_and(|dep| dep.status() == NodeStatus::Failed)
        })
        .cloned()
}

/// Executes workflow graphs against a shared, read-only registry.
pub struct ExecutionEngine {
    registry: Arc<HandlerRegistry>,
    events: Option<SharedEventBus>,
}

impl ExecutionEngine {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            events: None,
        }
    }

    pub fn with_events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(ref bus) = self.events {
            bus.publish(event);
        }
    }

    /// Run the graph to completion. Always returns a result.
    pub async fn execute(&self, graph: WorkflowGraph, context: &RunContext) -> ExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let workflow_id = graph.id().to_string();
        let strategy = graph.strategy();

        info!(
            workflow_id = %workflow_id,
            strategy = %strategy,
            nodes = graph.len(),
            max_parallel = graph.max_parallel(),
            "Workflow execution started"
        );
        self.publish(WorkflowEvent::WorkflowStarted {
            workflow_id: workflow_id.clone(),
            strategy,
            node_count: graph.len(),
            concurrency: graph.max_parallel(),
            timestamp: started_at,
        });

        let mut run = RunState {
            graph,
            clock: Arc::new(AtomicU64::new(0)),
            degraded_reasons: Vec::new(),
        };

        match strategy {
            ExecutionStrategy::Parallel => self.run_parallel(&mut run, context).await,
            ExecutionStrategy::Sequential => self.run_sequential(&mut run, context).await,
            ExecutionStrategy::Hierarchical => self.run_hierarchical(&mut run, context).await,
        }

        let result =
            ExecutionResult::collect(run.graph, run.degraded_reasons, started_at, start.elapsed());

        info!(
            workflow_id = %workflow_id,
            completed = result.completed_count(),
            failed = result.failed_count(),
            degraded = result.degraded,
            total_ms = result.total_ms,
            "Workflow execution finished"
        );
        self.publish(WorkflowEvent::WorkflowFinished {
            workflow_id,
            completed: result.completed_count(),
            failed: result.failed_count(),
            degraded: result.degraded,
            duration_ms: result.total_ms,
            timestamp: result.finished_at,
        });
        result
    }

    /// Level-synchronous waves of ready nodes.
    async fn run_parallel(&self, run: &mut RunState, context: &RunContext) {
        let cap = run.graph.max_parallel();
        let mut wave = 0;
        loop {
            self.skip_blocked(run);

            let pending: Vec<&str> = run
                .graph
                .nodes()
                .iter()
                .filter(|n| n.status() == NodeStatus::Pending)
                .map(|n| n.id.as_str())
                .collect();
            if pending.is_empty() {
                break;
            }

            let ready: Vec<String> = pending
                .iter()
                .filter(|id| dependencies_completed(&run.graph, id))
                .take(cap)
                .map(|id| id.to_string())
                .collect();

            if ready.is_empty() {
                let stuck: Vec<String> = pending.iter().map(|id| id.to_string()).collect();
                run.degrade(format!(
                    "{} node(s) never became ready: {}",
                    stuck.len(),
                    stuck.join(", ")
                ));
                for id in stuck {
                    self.skip_node(run, &id, HandlerError::Unsatisfiable);
                }
                break;
            }

            debug!(workflow_id = run.graph.id(), wave, size = ready.len(), "Dispatching wave");
            self.run_batch(run, &ready, cap, context).await;
            self.level_completed(run, wave, ready);
            wave += 1;
        }
    }

    /// One node at a time in a fixed order computed up front.
    async fn run_sequential(&self, run: &mut RunState, context: &RunContext) {
        let order = match run.graph.topological_order() {
            Some(order) => order,
            None => {
                run.degrade("no topological order exists; ran in insertion order");
                run.graph.node_ids()
            }
        };
        for id in order {
            self.run_batch(run, std::slice::from_ref(&id), 1, context).await;
        }
    }

    /// Dependency-depth levels with a full barrier between levels.
    async fn run_hierarchical(&self, run: &mut RunState, context: &RunContext) {
        let cap = run.graph.max_parallel();
        let (levels, forced) = run.graph.levels();
        if forced {
            run.degrade("dependency cycle detected at run time; forced node admission");
        }
        for (index, level) in levels.into_iter().enumerate() {
            debug!(workflow_id = run.graph.id(), level = index, size = level.len(), "Running level");
            self.run_batch(run, &level, cap, context).await;
            self.level_completed(run, index, level);
        }
    }

    fn level_completed(&self, run: &RunState, level: usize, node_ids: Vec<String>) {
        self.publish(WorkflowEvent::LevelCompleted {
            workflow_id: run.graph.id().to_string(),
            level,
            node_ids,
            timestamp: Utc::now(),
        });
    }

    /// Fail every pending node downstream of a failure, to a fixpoint.
    fn skip_blocked(&self, run: &mut RunState) {
        loop {
            let blocked: Vec<(String, String)> = run
                .graph
                .nodes()
                .iter()
                .filter(|n| n.status() == NodeStatus::Pending)
                .filter_map(|n| failed_dependency(&run.graph, &n.id).map(|d| (n.id.clone(), d)))
                .collect();
            if blocked.is_empty() {
                return;
            }
            for (id, dependency) in blocked {
                self.skip_node(run, &id, HandlerError::DependencyFailed { dependency });
            }
        }
    }

    fn skip_node(&self, run: &mut RunState, id: &str, error: HandlerError) {
        let workflow_id = run.graph.id().to_string();
        let Some(node) = run.graph.node_mut(id) else {
            return;
        };
        let message = error.to_string();
        if let Err(e) = node.fail(error, None) {
            warn!(error = %e, "Ignoring invalid node transition");
            return;
        }
        debug!(workflow_id = %workflow_id, node_id = id, reason = %message, "Node skipped");
        let handler = node.handler;
        self.publish(WorkflowEvent::NodeFailed {
            workflow_id,
            node_id: id.to_string(),
            handler,
            error: message,
            timestamp: Utc::now(),
        });
    }

    /// Turn a pending node into a job, or fail it without invoking.
    fn prepare(&self, run: &mut RunState, id: &str, context: &RunContext) -> Option<NodeJob> {
        let node = run.graph.node(id)?;
        if node.status() != NodeStatus::Pending {
            return None;
        }
        if let Some(dependency) = failed_dependency(&run.graph, id) {
            self.skip_node(run, id, HandlerError::DependencyFailed { dependency });
            return None;
        }

        let kind = node.handler;
        let Some(handler) = self.registry.handler(kind) else {
            self.skip_node(run, id, HandlerError::failed(kind, "no handler registered"));
            return None;
        };

        let upstream: BTreeMap<String, serde_json::Value> = node
            .dependencies
            .iter()
            .filter_map(|d| {
                let dep = run.graph.node(d)?;
                dep.result.clone().map(|r| (d.clone(), r))
            })
            .collect();
        let metadata = context.metadata_for(id, kind, upstream);
        let segment = node.input.clone();
        let timeout = run.graph.node_timeout();
        let workflow_id = run.graph.id().to_string();

        let node = run.graph.node_mut(id)?;
        if let Err(e) = node.mark_running() {
            warn!(error = %e, "Ignoring invalid node transition");
            return None;
        }
        self.publish(WorkflowEvent::NodeStarted {
            workflow_id,
            node_id: id.to_string(),
            handler: kind,
            timestamp: Utc::now(),
        });

        Some(NodeJob {
            id: id.to_string(),
            kind,
            handler,
            segment,
            metadata,
            timeout,
            clock: Arc::clone(&run.clock),
        })
    }

    fn finish(&self, run: &mut RunState, node_run: NodeRun) {
        let workflow_id = run.graph.id().to_string();
        let Some(node) = run.graph.node_mut(&node_run.id) else {
            return;
        };
        let handler = node.handler;
        let duration_ms = node_run.timing.duration_ms;

        match node_run.outcome {
            Ok(output) => {
                if let Err(e) = node.complete(output, node_run.timing) {
                    warn!(error = %e, "Ignoring invalid node transition");
                    return;
                }
                debug!(workflow_id = %workflow_id, node_id = %node_run.id, duration_ms, "Node completed");
                self.publish(WorkflowEvent::NodeCompleted {
                    workflow_id,
                    node_id: node_run.id,
                    handler,
                    duration_ms,
                    timestamp: Utc::now(),
                });
            }
            Err(error) => {
                let message = error.to_string();
                if let Err(e) = node.fail(error, Some(node_run.timing)) {
                    warn!(error = %e, "Ignoring invalid node transition");
                    return;
                }
                warn!(workflow_id = %workflow_id, node_id = %node_run.id, error = %message, "Node failed");
                self.publish(WorkflowEvent::NodeFailed {
                    workflow_id,
                    node_id: node_run.id,
                    handler,
                    error: message,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    /// Run `ids` with at most `cap` in flight and wait for all of them.
    ///
    /// Returning from here is the wave/level barrier.
    async fn run_batch(&self, run: &mut RunState, ids: &[String], cap: usize, context: &RunContext) {
        let cap = cap.max(1);
        let mut queue: VecDeque<&String> = ids.iter().collect();
        let mut tasks: JoinSet<NodeRun> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();

        loop {
            while tasks.len() < cap {
                let Some(id) = queue.pop_front() else { break };
                if let Some(job) = self.prepare(run, id, context) {
                    in_flight.insert(id.clone());
                    tasks.spawn(job.run());
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            match joined {
                Ok(node_run) => {
                    in_flight.remove(&node_run.id);
                    self.finish(run, node_run);
                }
                Err(e) => warn!(error = %e, "Node task did not complete"),
            }
        }

        // Tasks lost to cancellation never reported back.
        let mut lost: Vec<String> = in_flight.into_iter().collect();
        lost.sort();
        for id in lost {
            let workflow_id = run.graph.id().to_string();
            if let Some(node) = run.graph.node_mut(&id) {
                let handler = node.handler;
                let error = HandlerError::Aborted {
                    reason: "task cancelled before reporting".into(),
                };
                let message = error.to_string();
                if node.fail(error, None).is_ok() {
                    self.publish(WorkflowEvent::NodeFailed {
                        workflow_id,
                        node_id: id,
                        handler,
                        error: message,
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HandlerProfile;
    use crate::workflow::TaskNode;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Sleeps, tracks concurrency, and fails or panics on request.
    struct TestHandler {
        delay: Duration,
        fail: bool,
        panic: bool,
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl TestHandler {
        fn ok(delay_ms: u64) -> Self {
            Self {
                delay: Duration::from_millis(delay_ms),
                fail: false,
                panic: false,
                active: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Handler for TestHandler {
        async fn invoke(
            &self,
            segment: &str,
            metadata: &InvocationMetadata,
        ) -> Result<serde_json::Value, HandlerError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.panic {
                panic!("boom");
            }
            if self.fail {
                return Err(HandlerError::failed(metadata.handler, "scripted failure"));
            }
            Ok(json!({
                "segment": segment,
                "upstream": metadata.upstream.keys().cloned().collect::<Vec<_>>(),
            }))
        }
    }

    fn registry(handlers: Vec<(HandlerKind, TestHandler)>) -> Arc<HandlerRegistry> {
        let mut builder = HandlerRegistry::builder();
        for (kind, handler) in handlers {
            builder = builder
                .register(HandlerProfile::default_for(kind), Arc::new(handler))
                .unwrap();
        }
        builder.build().shared()
    }

    fn node(kind: HandlerKind) -> TaskNode {
        TaskNode::new(kind.as_str(), kind, "text")
    }

    fn context() -> RunContext {
        RunContext::new(Category::Work, 0.8)
    }

    #[tokio::test]
    async fn test_dependency_failure_skips_downstream() {
        let mut failing = TestHandler::ok(1);
        failing.fail = true;
        let registry = registry(vec![
            (HandlerKind::PatternDetection, failing),
            (HandlerKind::Synthesis, TestHandler::ok(1)),
            (HandlerKind::Work, TestHandler::ok(1)),
        ]);
        let mut builder = WorkflowGraph::builder();
        builder.add_node(node(HandlerKind::Work)).unwrap();
        builder.add_node(node(HandlerKind::PatternDetection)).unwrap();
        builder.add_node(node(HandlerKind::Synthesis)).unwrap();
        builder.add_edge("pattern_detection", "synthesis").unwrap();
        let graph = builder.build().unwrap().with_max_parallel(4);

        let result = ExecutionEngine::new(registry).execute(graph, &context()).await;
        assert_eq!(result.strategy, ExecutionStrategy::Hierarchical);
        assert!(result.outputs.contains_key("work"));
        assert!(matches!(
            result.errors["synthesis"],
            HandlerError::DependencyFailed { ref dependency } if dependency == "pattern_detection"
        ));
        assert!(result.report("synthesis").unwrap().timing.is_none());
        assert!(!result.degraded);
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_failure() {
        let mut panicking = TestHandler::ok(1);
        panicking.panic = true;
        let registry = registry(vec![
            (HandlerKind::Ideas, panicking),
            (HandlerKind::Work, TestHandler::ok(1)),
        ]);
        let mut builder = WorkflowGraph::builder();
        builder.add_node(node(HandlerKind::Ideas)).unwrap();
        builder.add_node(node(HandlerKind::Work)).unwrap();
        let graph = builder.build().unwrap().with_max_parallel(2);

        let result = ExecutionEngine::new(registry).execute(graph, &context()).await;
        assert_eq!(result.completed_count(), 1);
        assert!(matches!(result.errors["ideas"], HandlerError::Aborted { ref reason } if reason.contains("boom")));
    }

    #[tokio::test]
    async fn test_wave_respects_concurrency_cap() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let kinds = [
            HandlerKind::Work,
            HandlerKind::Personal,
            HandlerKind::Health,
            HandlerKind::Finance,
            HandlerKind::Learning,
        ];
        let handlers = kinds
            .iter()
            .map(|k| {
                (
                    *k,
                    TestHandler {
                        delay: Duration::from_millis(20),
                        fail: false,
                        panic: false,
                        active: Arc::clone(&active),
                        peak: Arc::clone(&peak),
                    },
                )
            })
            .collect();
        let registry = registry(handlers);
        let mut builder = WorkflowGraph::builder();
        for kind in kinds {
            builder.add_node(node(kind)).unwrap();
        }
        let graph = builder.build().unwrap().with_max_parallel(2);

        let result = ExecutionEngine::new(registry).execute(graph, &context()).await;
        assert_eq!(result.completed_count(), 5);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(result.concurrency, 2);
    }

    #[tokio::test]
    async fn test_sequential_passes_upstream_outputs() {
        let registry = registry(vec![
            (HandlerKind::Personal, TestHandler::ok(1)),
            (HandlerKind::Validation, TestHandler::ok(1)),
        ]);
        let mut builder = WorkflowGraph::builder();
        builder.add_node(node(HandlerKind::Personal)).unwrap();
        builder.add_node(node(HandlerKind::Validation)).unwrap();
        builder.add_edge("personal", "validation").unwrap();
        let graph = builder.build().unwrap();
        assert_eq!(graph.strategy(), ExecutionStrategy::Sequential);

        let result = ExecutionEngine::new(registry).execute(graph, &context()).await;
        assert_eq!(result.outputs["validation"]["upstream"], json!(["personal"]));
        let first = result.report("personal").unwrap().timing.clone().unwrap();
        let second = result.report("validation").unwrap().timing.clone().unwrap();
        assert!(first.finished_tick < second.started_tick);
    }

    fn cyclic_graph(strategy: ExecutionStrategy) -> WorkflowGraph {
        WorkflowGraph::new_unchecked(
            vec![
                node(HandlerKind::Work),
                node(HandlerKind::PatternDetection),
                node(HandlerKind::Synthesis),
            ],
            vec![
                ("pattern_detection".into(), "synthesis".into()),
                ("synthesis".into(), "pattern_detection".into()),
            ],
        )
        .with_strategy(strategy)
        .with_max_parallel(3)
    }

    fn cyclic_registry() -> Arc<HandlerRegistry> {
        registry(vec![
            (HandlerKind::Work, TestHandler::ok(1)),
            (HandlerKind::PatternDetection, TestHandler::ok(1)),
            (HandlerKind::Synthesis, TestHandler::ok(1)),
        ])
    }

    #[tokio::test]
    async fn test_parallel_cycle_marks_unsatisfiable() {
        let result = ExecutionEngine::new(cyclic_registry())
            .execute(cyclic_graph(ExecutionStrategy::Parallel), &context())
            .await;
        assert!(result.degraded);
        assert_eq!(result.completed_count(), 1);
        assert_eq!(result.errors["synthesis"], HandlerError::Unsatisfiable);
        assert_eq!(result.errors["pattern_detection"], HandlerError::Unsatisfiable);
    }

    #[tokio::test]
    async fn test_sequential_cycle_runs_degraded() {
        let result = ExecutionEngine::new(cyclic_registry())
            .execute(cyclic_graph(ExecutionStrategy::Sequential), &context())
            .await;
        assert!(result.degraded);
        assert_eq!(result.completed_count(), 3);
        assert!(!result.is_clean());
    }

    #[tokio::test]
    async fn test_hierarchical_cycle_forces_admission() {
        let result = ExecutionEngine::new(cyclic_registry())
            .execute(cyclic_graph(ExecutionStrategy::Hierarchical), &context())
            .await;
        assert!(result.degraded);
        assert_eq!(result.completed_count(), 3);
        assert!(result.degraded_reasons[0].contains("forced"));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_node_only() {
        let registry = registry(vec![(HandlerKind::Work, TestHandler::ok(1))]);
        let graph = WorkflowGraph::new_unchecked(
            vec![node(HandlerKind::Work), node(HandlerKind::Ideas)],
            vec![],
        )
        .with_max_parallel(2);
        let result = ExecutionEngine::new(registry).execute(graph, &context()).await;
        assert_eq!(result.completed_count(), 1);
        assert!(matches!(result.errors["ideas"], HandlerError::Failed { .. }));
    }

    #[tokio::test]
    async fn test_events_published() {
        let bus = crate::events::EventBus::new().shared();
        let mut rx = bus.subscribe();
        let registry = registry(vec![(HandlerKind::Work, TestHandler::ok(1))]);
        let mut builder = WorkflowGraph::builder();
        builder.add_node(node(HandlerKind::Work)).unwrap();
        let graph = builder.build().unwrap();

        ExecutionEngine::new(registry)
            .with_events(bus)
            .execute(graph, &context())
            .await;

        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type());
        }
        assert_eq!(
            types,
            vec![
                "workflow_started",
                "node_started",
                "node_completed",
                "level_completed",
                "workflow_finished"
            ]
        );
    }

    #[test]
    fn test_metadata_uses_handler_confidence() {
        let mut ctx = context();
        ctx.handler_confidence.insert(HandlerKind::Finance, 0.45);
        let meta = ctx.metadata_for("finance", HandlerKind::Finance, BTreeMap::new());
        assert_eq!(meta.category, Category::Finance);
        assert_eq!(meta.confidence, 0.45);
        let meta = ctx.metadata_for("synthesis", HandlerKind::Synthesis, BTreeMap::new());
        assert_eq!(meta.category, Category::Work);
        assert_eq!(meta.confidence, 0.8);
    }
}
