use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use triage_coordination::{
    HandlerKind, HandlerProfile, ModelEndpointConfig, TriageConfig, Trigger,
};

/// One handler as deployed. Without a `url` the built-in local handler runs.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerDeployment {
    pub kind: HandlerKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub capabilities: Option<Vec<String>>,
    #[serde(default)]
    pub expected_latency_ms: Option<u64>,
    #[serde(default)]
    pub compute_intensity: Option<f64>,
    #[serde(default)]
    pub memory_cost: Option<f64>,
    #[serde(default)]
    pub affinity: Option<Vec<HandlerKind>>,
    #[serde(default)]
    pub conflicts_with: Option<Vec<HandlerKind>>,
    #[serde(default)]
    pub triggers: Option<Vec<Trigger>>,
}

impl HandlerDeployment {
    pub fn local(kind: HandlerKind) -> Self {
        Self {
            kind,
            url: None,
            api_key: None,
            capabilities: None,
            expected_latency_ms: None,
            compute_intensity: None,
            memory_cost: None,
            affinity: None,
            conflicts_with: None,
            triggers: None,
        }
    }

    /// Built-in profile for the kind with deployment overrides applied.
    pub fn profile(&self) -> HandlerProfile {
        let mut profile = HandlerProfile::default_for(self.kind);
        if let Some(ref caps) = self.capabilities {
            profile.capabilities = caps.clone();
        }
        if let Some(ms) = self.expected_latency_ms {
            profile.expected_latency_ms = ms;
        }
        if let Some(compute) = self.compute_intensity {
            profile.compute_intensity = compute;
        }
        if let Some(memory) = self.memory_cost {
            profile.memory_cost = memory;
        }
        if let Some(ref affinity) = self.affinity {
            profile.affinity = affinity.clone();
        }
        if let Some(ref conflicts) = self.conflicts_with {
            profile.conflicts_with = conflicts.clone();
        }
        if let Some(ref triggers) = self.triggers {
            profile.triggers = triggers.clone();
        }
        profile
    }
}

/// Deployment file layout:
///
/// ```toml
/// record_path = "decisions.jsonl"
///
/// [triage.execution]
/// max_parallel_agents = 4
///
/// [model]
/// url = "http://localhost:8080/v1/chat/completions"
/// model = "qwen2.5-7b-instruct"
///
/// [[handlers]]
/// kind = "work"
/// url = "http://localhost:9001/invoke"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeploymentConfig {
    pub triage: TriageConfig,
    pub model: Option<ModelEndpointConfig>,
    pub handlers: Vec<HandlerDeployment>,
    pub record_path: Option<PathBuf>,
}

impl DeploymentConfig {
    /// Environment-only deployment: every kind runs locally.
    pub fn from_env() -> Self {
        Self {
            triage: TriageConfig::from_env(),
            model: ModelEndpointConfig::from_env(),
            handlers: Vec::new(),
            record_path: std::env::var("TRIAGE_RECORD_PATH").ok().map(PathBuf::from),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Failed to parse deployment file")?;
        config
            .triage
            .validate()
            .context("Invalid [triage] settings")?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("Invalid deployment {}", path.display()))
    }

    /// Model endpoint from the file, falling back to `TRIAGE_MODEL_*`.
    pub fn model_endpoint(&self) -> Option<ModelEndpointConfig> {
        self.model.clone().or_else(ModelEndpointConfig::from_env)
    }

    /// Configured handlers, or a local handler for every kind when none are.
    pub fn handler_deployments(&self) -> Vec<HandlerDeployment> {
        if self.handlers.is_empty() {
            HandlerKind::ALL
                .iter()
                .copied()
                .map(HandlerDeployment::local)
                .collect()
        } else {
            self.handlers.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deployment() {
        let raw = r#"
record_path = "out/decisions.jsonl"

[triage.execution]
max_parallel_agents = 2

[[handlers]]
kind = "work"
url = "http://localhost:9001/invoke"
expected_latency_ms = 50

[[handlers]]
kind = "pattern_detection"
triggers = [{ when = "tag", value = "habit" }]
"#;
        let config = DeploymentConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.triage.execution.max_parallel_agents, 2);
        assert_eq!(config.record_path, Some(PathBuf::from("out/decisions.jsonl")));
        assert_eq!(config.handlers.len(), 2);

        let work = config.handlers[0].profile();
        assert_eq!(work.kind, HandlerKind::Work);
        assert_eq!(work.expected_latency_ms, 50);
        assert!(work.conflicts_with.contains(&HandlerKind::Personal));

        let patterns = config.handlers[1].profile();
        assert_eq!(patterns.triggers, vec![Trigger::Tag("habit".into())]);
        assert!(config.handlers[1].url.is_none());
    }

    #[test]
    fn test_invalid_triage_section_rejected() {
        let raw = r#"
[triage.routing]
listing_threshold = 1.5
"#;
        assert!(DeploymentConfig::from_toml_str(raw).is_err());
    }

    #[test]
    fn test_empty_handlers_default_to_every_kind() {
        let config = DeploymentConfig::default();
        let deployments = config.handler_deployments();
        assert_eq!(deployments.len(), HandlerKind::ALL.len());
        assert!(deployments.iter().all(|d| d.url.is_none()));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.toml");
        std::fs::write(&path, "[[handlers]]\nkind = \"health\"\n").unwrap();
        let config = DeploymentConfig::load(&path).unwrap();
        assert_eq!(config.handlers[0].kind, HandlerKind::Health);

        assert!(DeploymentConfig::load(&dir.path().join("missing.toml")).is_err());
    }
}
