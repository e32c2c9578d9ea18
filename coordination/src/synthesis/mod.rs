//! Conflict Resolver & Synthesizer
//!
//! Synthesis is commentary, never a gate: a failing or missing synthesis
//! service yields a templated report, and a run with at most one output never
//! calls the service at all.
//!
//! ```text
//! outputs ≤ 1          → single_node (template, no call)
//! service ok           → service
//! service error/timeout → template + fallback_reason
//! ```
//!
//! Service replies are parsed like classification replies: every listed field
//! is required and unknown extra keys are ignored.

pub mod conflict;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use conflict::{
    Conflict, ConflictKind, ConflictOption, ConflictResolver, Resolution, ResolutionRule,
};

use crate::config::ModelEndpointConfig;
use crate::error::SynthesisServiceError;
use crate::model_client::{strip_code_fence, ChatClient, ChatError};
use crate::registry::HandlerRegistry;
use crate::router::RoutingDecision;
use crate::workflow::{ExecutionResult, GraphSummary, NodeStatus};

/// Longest excerpt of a node output quoted in a templated finding.
const FINDING_EXCERPT_CHARS: usize = 160;

/// The original plan, as sent to the synthesis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisPlan {
    pub decision: RoutingDecision,
    pub graph: GraphSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub outputs: BTreeMap<String, Value>,
    /// Failed node id -> error message
    pub failed: BTreeMap<String, String>,
    pub plan: SynthesisPlan,
    pub resolutions: Vec<Resolution>,
}

/// Validated reply from the synthesis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisReply {
    pub key_findings: Vec<String>,
    pub connections: Vec<String>,
    pub resolutions: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
}

#[derive(Deserialize)]
struct RawSynthesisReply {
    key_findings: Vec<String>,
    connections: Vec<String>,
    resolutions: Vec<String>,
    recommendations: Vec<String>,
    summary: String,
}

/// Parse and validate a synthesis reply body.
pub fn parse_synthesis_reply(raw: &str) -> Result<SynthesisReply, SynthesisServiceError> {
    let body = strip_code_fence(raw);
    let reply: RawSynthesisReply = serde_json::from_str(body)
        .map_err(|e| SynthesisServiceError::MalformedReply(format!("invalid JSON: {e}")))?;
    if reply.summary.trim().is_empty() {
        return Err(SynthesisServiceError::MalformedReply(
            "summary is empty".into(),
        ));
    }
    Ok(SynthesisReply {
        key_findings: reply.key_findings,
        connections: reply.connections,
        resolutions: reply.resolutions,
        recommendations: reply.recommendations,
        summary: reply.summary,
    })
}

/// Synthesis backend seam.
#[async_trait]
pub trait SynthesisService: Send + Sync {
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesisReply, SynthesisServiceError>;
}

const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You combine the outputs of several note-processing handlers into one brief report.
Reply with a single JSON object and nothing else:
{
  "key_findings": ["<finding>", ...],
  "connections": ["<how two outputs relate>", ...],
  "resolutions": ["<how a disagreement was settled>", ...],
  "recommendations": ["<next step>", ...],
  "summary": "<two sentences at most>"
}"#;

/// Synthesis service backed by an OpenAI-compatible chat endpoint.
pub struct ChatSynthesisService {
    client: ChatClient,
}

impl ChatSynthesisService {
    pub fn new(config: ModelEndpointConfig, timeout: Duration) -> Result<Self, SynthesisServiceError> {
        let client = ChatClient::new(config, timeout)
            .map_err(|e| SynthesisServiceError::RequestFailed(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SynthesisService for ChatSynthesisService {
    async fn synthesize(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesisReply, SynthesisServiceError> {
        let user_prompt = serde_json::to_string_pretty(request)
            .map_err(|e| SynthesisServiceError::RequestFailed(e.to_string()))?;
        let content = self
            .client
            .complete(SYNTHESIS_SYSTEM_PROMPT, &user_prompt)
            .await
            .map_err(|e| match e {
                ChatError::EmptyReply => SynthesisServiceError::MalformedReply("empty reply".into()),
                ChatError::Decode(reason) => SynthesisServiceError::MalformedReply(reason),
                other => SynthesisServiceError::RequestFailed(other.to_string()),
            })?;
        parse_synthesis_reply(&content)
    }
}

/// Where a synthesis report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisSource {
    Service,
    Template,
    SingleNode,
}

/// Unified view over a run's outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub source: SynthesisSource,
    pub key_findings: Vec<String>,
    pub connections: Vec<String>,
    pub resolutions: Vec<String>,
    pub recommendations: Vec<String>,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

pub struct Synthesizer {
    service: Option<Arc<dyn SynthesisService>>,
    timeout: Duration,
}

impl Synthesizer {
    /// Template-only synthesizer.
    pub fn new(timeout: Duration) -> Self {
        Self {
            service: None,
            timeout,
        }
    }

    pub fn with_service(mut self, service: Arc<dyn SynthesisService>) -> Self {
        self.service = Some(service);
        self
    }

    pub async fn synthesize(
        &self,
        result: &ExecutionResult,
        plan: &SynthesisPlan,
        resolutions: &[Resolution],
        registry: &HandlerRegistry,
    ) -> SynthesisReport {
        if result.outputs.len() <= 1 {
            debug!(outputs = result.outputs.len(), "Single output; skipping synthesis service");
            return template_report(result, plan, resolutions, registry, SynthesisSource::SingleNode, None);
        }

        let Some(ref service) = self.service else {
            return template_report(
                result,
                plan,
                resolutions,
                registry,
                SynthesisSource::Template,
                Some(SynthesisServiceError::Unavailable.to_string()),
            );
        };

        let request = SynthesisRequest {
            outputs: result.outputs.clone(),
            failed: result
                .errors
                .iter()
                .map(|(id, e)| (id.clone(), e.to_string()))
                .collect(),
            plan: plan.clone(),
            resolutions: resolutions.to_vec(),
        };

        let reply = match tokio::time::timeout(self.timeout, service.synthesize(&request)).await {
            Ok(reply) => reply,
            Err(_) => Err(SynthesisServiceError::Timeout(self.timeout)),
        };

        match reply {
            Ok(reply) => {
                info!(
                    workflow_id = %result.workflow_id,
                    findings = reply.key_findings.len(),
                    "Synthesis service report received"
                );
                SynthesisReport {
                    source: SynthesisSource::Service,
                    key_findings: reply.key_findings,
                    connections: reply.connections,
                    resolutions: reply.resolutions,
                    recommendations: reply.recommendations,
                    summary: reply.summary,
                    fallback_reason: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Synthesis service failed; using template");
                template_report(
                    result,
                    plan,
                    resolutions,
                    registry,
                    SynthesisSource::Template,
                    Some(e.to_string()),
                )
            }
        }
    }
}

fn excerpt(value: &Value) -> String {
    let text = match value.get("summary").and_then(Value::as_str) {
        Some(summary) => summary.to_string(),
        None => match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    };
    if text.chars().count() > FINDING_EXCERPT_CHARS {
        let cut: String = text.chars().take(FINDING_EXCERPT_CHARS).collect();
        format!("{cut}…")
    } else {
        text
    }
}

/// Deterministic report built from local data only.
pub fn template_report(
    result: &ExecutionResult,
    plan: &SynthesisPlan,
    resolutions: &[Resolution],
    registry: &HandlerRegistry,
    source: SynthesisSource,
    fallback_reason: Option<String>,
) -> SynthesisReport {
    let completed: Vec<_> = result
        .nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Completed)
        .collect();

    let key_findings = completed
        .iter()
        .filter_map(|n| {
            result
                .outputs
                .get(&n.node_id)
                .map(|v| format!("{}: {}", n.node_id, excerpt(v)))
        })
        .collect();

    let mut connections = Vec::new();
    for (i, a) in completed.iter().enumerate() {
        for b in &completed[i + 1..] {
            let related = [(a, b), (b, a)].iter().any(|(x, y)| {
                registry
                    .profile(x.handler)
                    .is_some_and(|p| p.affinity.contains(&y.handler))
            });
            if related {
                connections.push(format!("{} relates to {}", a.node_id, b.node_id));
            }
        }
    }

    let mut recommendations = Vec::new();
    let failed: Vec<&str> = result
        .nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Failed)
        .map(|n| n.node_id.as_str())
        .collect();
    if !failed.is_empty() {
        recommendations.push(format!("Review failed handlers: {}", failed.join(", ")));
    }
    if plan.decision.needs_confirmation {
        recommendations.push(format!(
            "Confirm the {} classification (confidence {:.2})",
            plan.decision.category, plan.decision.confidence
        ));
    }

    SynthesisReport {
        source,
        key_findings,
        connections,
        resolutions: resolutions.iter().map(Resolution::describe).collect(),
        recommendations,
        summary: format!(
            "Processed {} of {} handlers ({} failed)",
            completed.len(),
            result.nodes.len(),
            failed.len()
        ),
        fallback_reason,
    }
}
