//! Workflow orchestration
//!
//! ```text
//! RoutingDecision ──► WorkflowCompiler ──► WorkflowGraph
//!                                              │
//!                         ResourceManager ─────┤ (cap concurrency)
//!                                              ▼
//!                                       ExecutionEngine ──► ExecutionResult
//! ```

pub mod compiler;
pub mod engine;
pub mod graph;
pub mod resources;

pub use compiler::{CompatibilityRule, CompatibilityTable, WorkflowCompiler};
pub use engine::{ExecutionEngine, ExecutionResult, NodeReport, RunContext};
pub use graph::{
    Complexity, ExecutionStrategy, GraphBuilder, GraphSummary, InvalidTransition, NodeStatus,
    NodeTiming, TaskNode, WorkflowGraph,
};
pub use resources::{ConcurrencyPlan, ResourceManager};
