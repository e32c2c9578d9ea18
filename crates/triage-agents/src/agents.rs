//! Handler implementations wired in by the CLI.
//!
//! - [`HttpHandler`] forwards a segment to a remote service.
//! - [`LocalHandler`] answers in-process with a short extractive summary,
//!   used for kinds that have no endpoint deployed.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use triage_coordination::{Handler, HandlerError, HandlerKind, InvocationMetadata};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SUMMARY_CHARS: usize = 120;
const ERROR_BODY_CHARS: usize = 200;

#[derive(Serialize)]
struct InvokeRequest<'a> {
    segment: &'a str,
    metadata: &'a InvocationMetadata,
}

/// Handler backed by an HTTP endpoint accepting `{segment, metadata}` and
/// returning a JSON document.
pub struct HttpHandler {
    kind: HandlerKind,
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpHandler {
    pub fn new(kind: HandlerKind, url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        // Per-node deadlines are enforced by the execution engine.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            kind,
            url: url.into(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Handler for HttpHandler {
    async fn invoke(
        &self,
        segment: &str,
        metadata: &InvocationMetadata,
    ) -> Result<Value, HandlerError> {
        debug!(handler = %self.kind, url = %self.url, "Invoking remote handler");
        let mut request = self
            .client
            .post(&self.url)
            .json(&InvokeRequest { segment, metadata });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HandlerError::failed(self.kind, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(ERROR_BODY_CHARS).collect();
            return Err(HandlerError::failed(self.kind, format!("HTTP {status}: {body}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| HandlerError::failed(self.kind, format!("invalid JSON reply: {e}")))
    }
}

/// In-process handler: first line of the segment plus basic counts.
pub struct LocalHandler {
    kind: HandlerKind,
}

impl LocalHandler {
    pub fn new(kind: HandlerKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl Handler for LocalHandler {
    async fn invoke(
        &self,
        segment: &str,
        metadata: &InvocationMetadata,
    ) -> Result<Value, HandlerError> {
        let first_line = segment.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
        let mut summary: String = first_line.trim().chars().take(SUMMARY_CHARS).collect();
        if first_line.trim().chars().count() > SUMMARY_CHARS {
            summary.push('…');
        }

        let mut output = json!({
            "summary": summary,
            "words": segment.split_whitespace().count(),
            "upstream": metadata.upstream.keys().collect::<Vec<_>>(),
        });
        if let Some(category) = self.kind.category() {
            output["category"] = json!(category);
        }
        Ok(output)
    }
}
