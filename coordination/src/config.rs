//! Runtime configuration for the triage core.
//!
//! All thresholds and weights live here rather than as literals in the
//! components. The defaults reproduce the documented contract (0.3/0.7 fusion,
//! 0.3/0.4 listing/activation, 0.7 confirmation) but remain tunable through
//! TOML or `TRIAGE_*` environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigResult, ConfigurationError};

/// Classifier thresholds and fusion weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Weight of the normalized rule score in the fused confidence.
    pub rule_weight: f64,
    /// Weight of the model's self-reported confidence in the fused confidence.
    pub model_weight: f64,
    /// Confidence assigned when an origin hint decides the category.
    pub hint_confidence: f64,
    /// Upper bound on any confidence produced without the model.
    pub fallback_cap: f64,
    /// Confidence reported when no rule indicator matched at all.
    pub no_indicator_confidence: f64,
    /// Results below this confidence need user confirmation.
    pub confirmation_threshold: f64,
    /// Timeout for one model classification call.
    pub model_timeout_ms: u64,
    /// Longest input forwarded to the model service.
    pub max_input_chars: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            rule_weight: 0.3,
            model_weight: 0.7,
            hint_confidence: 0.95,
            fallback_cap: 0.9,
            no_indicator_confidence: 0.3,
            confirmation_threshold: 0.7,
            model_timeout_ms: 15_000,
            max_input_chars: 4_000,
        }
    }
}

impl ClassifierConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }
}

/// Secondary-handler admission thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// A secondary category is listed when its confidence exceeds this.
    pub listing_threshold: f64,
    /// A listed secondary is scheduled when its confidence exceeds this.
    pub activation_threshold: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            listing_threshold: 0.3,
            activation_threshold: 0.4,
        }
    }
}

/// Workflow execution limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Configured concurrency before resource caps are applied.
    pub max_parallel_agents: usize,
    /// Per-node handler timeout (not cumulative across the run).
    pub node_timeout_ms: u64,
    /// Timeout for one synthesis call.
    pub synthesis_timeout_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: 5,
            node_timeout_ms: 30_000,
            synthesis_timeout_ms: 30_000,
        }
    }
}

impl ExecutionConfig {
    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_millis(self.synthesis_timeout_ms)
    }
}

/// Advisory concurrency caps driven by aggregate handler cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub compute_threshold: f64,
    pub compute_cap: usize,
    pub memory_threshold: f64,
    pub memory_cap: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            compute_threshold: 3.0,
            compute_cap: 3,
            memory_threshold: 2048.0,
            memory_cap: 4,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub classifier: ClassifierConfig,
    pub routing: RoutingConfig,
    pub execution: ExecutionConfig,
    pub resources: ResourceConfig,
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl TriageConfig {
    /// Defaults overridden by any `TRIAGE_*` variables that parse.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Parse a TOML document. Missing sections and keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse("TRIAGE_MAX_PARALLEL_AGENTS") {
            self.execution.max_parallel_agents = v;
        }
        if let Some(v) = env_parse("TRIAGE_NODE_TIMEOUT_MS") {
            self.execution.node_timeout_ms = v;
        }
        if let Some(v) = env_parse("TRIAGE_SYNTHESIS_TIMEOUT_MS") {
            self.execution.synthesis_timeout_ms = v;
        }
        if let Some(v) = env_parse("TRIAGE_MODEL_TIMEOUT_MS") {
            self.classifier.model_timeout_ms = v;
        }
        if let Some(v) = env_parse("TRIAGE_CONFIRMATION_THRESHOLD") {
            self.classifier.confirmation_threshold = v;
        }
        if let Some(v) = env_parse("TRIAGE_LISTING_THRESHOLD") {
            self.routing.listing_threshold = v;
        }
        if let Some(v) = env_parse("TRIAGE_ACTIVATION_THRESHOLD") {
            self.routing.activation_threshold = v;
        }
    }

    /// Reject values that would break the [0,1] confidence contract or stall
    /// the scheduler.
    pub fn validate(&self) -> ConfigResult<()> {
        let unit = [
            ("classifier.rule_weight", self.classifier.rule_weight),
            ("classifier.model_weight", self.classifier.model_weight),
            ("classifier.hint_confidence", self.classifier.hint_confidence),
            ("classifier.fallback_cap", self.classifier.fallback_cap),
            (
                "classifier.no_indicator_confidence",
                self.classifier.no_indicator_confidence,
            ),
            (
                "classifier.confirmation_threshold",
                self.classifier.confirmation_threshold,
            ),
            ("routing.listing_threshold", self.routing.listing_threshold),
            (
                "routing.activation_threshold",
                self.routing.activation_threshold,
            ),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(name, format!("{value} is outside [0, 1]")));
            }
        }

        let weight_sum = self.classifier.rule_weight + self.classifier.model_weight;
        if weight_sum > 1.0 + f64::EPSILON {
            return Err(invalid(
                "classifier.rule_weight + classifier.model_weight",
                format!("sum {weight_sum} exceeds 1"),
            ));
        }
        if self.routing.listing_threshold > self.routing.activation_threshold {
            return Err(invalid(
                "routing.listing_threshold",
                "must not exceed routing.activation_threshold",
            ));
        }
        if self.execution.max_parallel_agents == 0 {
            return Err(invalid("execution.max_parallel_agents", "must be at least 1"));
        }
        if self.resources.compute_cap == 0 || self.resources.memory_cap == 0 {
            return Err(invalid("resources", "caps must be at least 1"));
        }
        for (name, ms) in [
            ("execution.node_timeout_ms", self.execution.node_timeout_ms),
            (
                "execution.synthesis_timeout_ms",
                self.execution.synthesis_timeout_ms,
            ),
            ("classifier.model_timeout_ms", self.classifier.model_timeout_ms),
        ] {
            if ms == 0 {
                return Err(invalid(name, "must be greater than zero"));
            }
        }
        Ok(())
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidSetting {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// OpenAI-compatible chat endpoint used for classification and synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEndpointConfig {
    /// Full chat-completions URL.
    pub url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_tokens() -> u32 {
    1024
}

impl ModelEndpointConfig {
    /// `None` when `TRIAGE_MODEL_URL` is unset: the classifier then runs on
    /// rules alone and synthesis uses its template.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("TRIAGE_MODEL_URL").ok()?;
        let model = std::env::var("TRIAGE_MODEL_NAME").unwrap_or_else(|_| "gpt-4o-mini".into());
        Some(Self {
            url,
            model,
            api_key: std::env::var("TRIAGE_MODEL_API_KEY").ok(),
            temperature: env_parse("TRIAGE_MODEL_TEMPERATURE").unwrap_or_else(default_temperature),
            max_tokens: env_parse("TRIAGE_MODEL_MAX_TOKENS").unwrap_or_else(default_max_tokens),
        })
    }
}
