//! OpenAI-compatible chat client shared by the classification and synthesis
//! services.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ModelEndpointConfig;

/// Transport-level failure talking to the chat endpoint.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Response contained no message content")]
    EmptyReply,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// Thin wrapper over `reqwest` for single-turn system + user completions.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    config: ModelEndpointConfig,
}

impl ChatClient {
    pub fn new(config: ModelEndpointConfig, timeout: Duration) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatError::Client(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Send one system + user exchange and return the assistant text.
    pub async fn complete(&self, system_prompt: &str, user_content: &str) -> Result<String, ChatError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut builder = self.http.post(&self.config.url).json(&request);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ChatError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Status { status, body });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ChatError::EmptyReply)?;

        debug!(model = %self.config.model, chars = content.len(), "Chat completion received");
        Ok(content)
    }
}

/// Strip one enclosing markdown code fence, if present.
///
/// This is the only leniency the reply parsers allow; the body itself must be
/// a single JSON object.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    match body.find('\n') {
        Some(newline) if !body[..newline].contains('{') => body[newline + 1..].trim(),
        _ => body.trim(),
    }
}
