//! Workflow events published while a request is executed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::registry::HandlerKind;
use crate::workflow::ExecutionStrategy;

/// Lifecycle events for one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        workflow_id: String,
        strategy: ExecutionStrategy,
        node_count: usize,
        concurrency: usize,
        timestamp: DateTime<Utc>,
    },

    NodeStarted {
        workflow_id: String,
        node_id: String,
        handler: HandlerKind,
        timestamp: DateTime<Utc>,
    },

    NodeCompleted {
        workflow_id: String,
        node_id: String,
        handler: HandlerKind,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    NodeFailed {
        workflow_id: String,
        node_id: String,
        handler: HandlerKind,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A wave (PARALLEL) or level (HIERARCHICAL) reached its barrier.
    LevelCompleted {
        workflow_id: String,
        level: usize,
        node_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    WorkflowFinished {
        workflow_id: String,
        completed: usize,
        failed: usize,
        degraded: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::NodeStarted { .. } => "node_started",
            Self::NodeCompleted { .. } => "node_completed",
            Self::NodeFailed { .. } => "node_failed",
            Self::LevelCompleted { .. } => "level_completed",
            Self::WorkflowFinished { .. } => "workflow_finished",
        }
    }

    pub fn workflow_id(&self) -> &str {
        match self {
            Self::WorkflowStarted { workflow_id, .. }
            | Self::NodeStarted { workflow_id, .. }
            | Self::NodeCompleted { workflow_id, .. }
            | Self::NodeFailed { workflow_id, .. }
            | Self::LevelCompleted { workflow_id, .. }
            | Self::WorkflowFinished { workflow_id, .. } => workflow_id,
        }
    }

    /// Node id for node-scoped events.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodeCompleted { node_id, .. }
            | Self::NodeFailed { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::WorkflowStarted { timestamp, .. }
            | Self::NodeStarted { timestamp, .. }
            | Self::NodeCompleted { timestamp, .. }
            | Self::NodeFailed { timestamp, .. }
            | Self::LevelCompleted { timestamp, .. }
            | Self::WorkflowFinished { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = WorkflowEvent::NodeFailed {
            workflow_id: "wf-1".into(),
            node_id: "finance".into(),
            handler: HandlerKind::Finance,
            error: "boom".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "node_failed");
        assert_eq!(json["handler"], "finance");
        assert_eq!(event.event_type(), "node_failed");
        assert_eq!(event.node_id(), Some("finance"));
    }
}
