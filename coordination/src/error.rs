//! Error types for the triage core.
//!
//! Only [`ConfigurationError`] is allowed to escape the pipeline as a hard
//! failure. Every other error here is produced by an external collaborator
//! (model service, handler, synthesis service, record sink) and is turned into
//! a degraded result or a per-node error entry by the component that sees it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::HandlerKind;

/// Invalid static setup: bad registry, bad compatibility table, bad thresholds.
///
/// Raised before any handler runs and surfaced to the caller.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("Dependency cycle detected involving node '{node}'")]
    Cycle { node: String },

    #[error("Edge {from} -> {to} references an unknown node")]
    DanglingEdge { from: String, to: String },

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("No handler profile registered for {0}")]
    UnregisteredHandler(HandlerKind),

    #[error("Handler {0} registered more than once")]
    DuplicateHandler(HandlerKind),

    #[error("Invalid setting {name}: {reason}")]
    InvalidSetting { name: String, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Result alias for operations that can only fail on configuration.
pub type ConfigResult<T> = Result<T, ConfigurationError>;

/// The external classification model could not produce a usable answer.
///
/// Always recovered locally through the rule-based fallback.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassificationServiceError {
    #[error("Model service not configured")]
    Unavailable,

    #[error("Model request failed: {0}")]
    RequestFailed(String),

    #[error("Model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Malformed model reply: {0}")]
    MalformedReply(String),
}

/// The external synthesis service failed; replaced by a templated summary.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SynthesisServiceError {
    #[error("Synthesis service not configured")]
    Unavailable,

    #[error("Synthesis request failed: {0}")]
    RequestFailed(String),

    #[error("Synthesis request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed synthesis reply: {0}")]
    MalformedReply(String),
}

/// Per-node handler failure, recorded in `ExecutionResult::errors`.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerError {
    #[error("Handler {handler} timed out after {timeout_ms}ms")]
    Timeout { handler: HandlerKind, timeout_ms: u64 },

    #[error("Handler {handler} failed: {reason}")]
    Failed { handler: HandlerKind, reason: String },

    #[error("Skipped: dependency '{dependency}' failed")]
    DependencyFailed { dependency: String },

    #[error("Skipped: dependencies could not be satisfied")]
    Unsatisfiable,

    #[error("Handler task aborted: {reason}")]
    Aborted { reason: String },
}

impl HandlerError {
    /// Convenience constructor for handler implementations.
    pub fn failed(handler: HandlerKind, reason: impl Into<String>) -> Self {
        Self::Failed {
            handler,
            reason: reason.into(),
        }
    }

    /// Whether the node was never invoked because of upstream state.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::DependencyFailed { .. } | Self::Unsatisfiable)
    }
}

/// Failure to hand a decision to the external record sink.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Failed to serialize record: {0}")]
    Serialize(String),

    #[error("Failed to parse record: {0}")]
    Deserialize(String),

    #[error("Record schema version {found} is newer than supported {supported}")]
    VersionMismatch { supported: u32, found: u32 },

    #[error("Record sink I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_serializes_with_kind_tag() {
        let err = HandlerError::Timeout {
            handler: HandlerKind::Work,
            timeout_ms: 50,
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["handler"], "work");

        let back: HandlerError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_skip_errors() {
        assert!(HandlerError::Unsatisfiable.is_skip());
        assert!(HandlerError::DependencyFailed {
            dependency: "a".into()
        }
        .is_skip());
        assert!(!HandlerError::failed(HandlerKind::Ideas, "boom").is_skip());
    }

    #[test]
    fn test_aborted_round_trips() {
        let err = HandlerError::Aborted {
            reason: "handler panicked: boom".into(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(serde_json::from_str::<HandlerError>(&json).unwrap(), err);
    }

    #[test]
    fn test_configuration_error_display() {
        let err = ConfigurationError::UnregisteredHandler(HandlerKind::Finance);
        assert_eq!(err.to_string(), "No handler profile registered for finance");
    }
}
