//! Decision recording: hands routing decisions and their outcomes to an
//! append-only sink.
//!
//! Recording is fire-and-report: the pipeline logs a [`RecordError`] and
//! carries on.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::RoutingDecision;
use crate::error::RecordError;
use crate::workflow::ExecutionStrategy;

/// Current record schema version.
pub const RECORD_VERSION: u32 = 1;

/// What happened after a decision was executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub workflow_id: String,
    pub strategy: ExecutionStrategy,
    pub completed: Vec<String>,
    /// Failed node id -> error message
    pub failed: BTreeMap<String, String>,
    pub degraded: bool,
    pub summary: String,
    pub total_ms: u64,
}

/// One line of the decision log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub version: u32,
    pub recorded_at: DateTime<Utc>,
    pub decision: RoutingDecision,
    pub outcome: DecisionOutcome,
}

impl DecisionRecord {
    pub fn new(decision: &RoutingDecision, outcome: &DecisionOutcome) -> Self {
        Self {
            version: RECORD_VERSION,
            recorded_at: Utc::now(),
            decision: decision.clone(),
            outcome: outcome.clone(),
        }
    }

    /// Serialize to a single JSON line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, RecordError> {
        serde_json::to_string(self).map_err(|e| RecordError::Serialize(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, RecordError> {
        let record: Self =
            serde_json::from_str(json).map_err(|e| RecordError::Deserialize(e.to_string()))?;
        if record.version > RECORD_VERSION {
            return Err(RecordError::VersionMismatch {
                supported: RECORD_VERSION,
                found: record.version,
            });
        }
        Ok(record)
    }
}

/// External append-only record collaborator.
#[async_trait]
pub trait DecisionRecorder: Send + Sync {
    async fn record(
        &self,
        decision: &RoutingDecision,
        outcome: &DecisionOutcome,
    ) -> Result<(), RecordError>;
}

/// Keeps records in memory. Useful for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<DecisionRecord>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DecisionRecorder for MemoryRecorder {
    async fn record(
        &self,
        decision: &RoutingDecision,
        outcome: &DecisionOutcome,
    ) -> Result<(), RecordError> {
        let record = DecisionRecord::new(decision, outcome);
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
pub struct JsonlRecorder {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DecisionRecorder for JsonlRecorder {
    async fn record(
        &self,
        decision: &RoutingDecision,
        outcome: &DecisionOutcome,
    ) -> Result<(), RecordError> {
        let mut line = DecisionRecord::new(decision, outcome).to_json_line()?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(path = %self.path.display(), decision_id = %decision.id, "Decision recorded");
        Ok(())
    }
}

/// Read every record from a JSON-lines file, skipping blank lines.
pub async fn read_records(path: &Path) -> Result<Vec<DecisionRecord>, RecordError> {
    let raw = tokio::fs::read_to_string(path).await?;
    raw.lines()
        .filter(|line| !line.trim().is_empty())
        .map(DecisionRecord::from_json)
        .collect()
}
