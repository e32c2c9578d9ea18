//! Content classifier
//!
//! Fuses rule-based scoring with an external model's judgment into one
//! confidence-ranked category result.
//!
//! ```text
//! origin hint ──maps?──► confidence 0.95, model skipped
//!      │ no
//!      ▼
//! score_rules(text) ──► model service(text, best guess, definitions)
//!                            ├─ valid reply  → 0.3·rule + 0.7·model
//!                            └─ error/timeout/malformed → rules only, capped at 0.9
//! ```
//!
//! `classify` never fails: every external failure degrades to the
//! deterministic rule fallback.

pub mod category;
pub mod model;
pub mod rules;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use category::Category;
pub use model::{
    parse_classification_reply, CategoryDefinition, ChatClassificationService,
    ClassificationService, ModelClassificationReply, ModelClassificationRequest,
};
pub use rules::{score_rules, CategoryScore, RuleScores};

use crate::config::ClassifierConfig;
use crate::error::ClassificationServiceError;

/// Where a classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// Decided by an explicit origin hint; model not consulted.
    OriginHint,
    /// Rule scores blended with a valid model reply.
    Fused,
    /// Model unavailable or unusable; rule scores only.
    RuleFallback,
}

/// A secondary category with its confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecondaryCategory {
    pub category: Category,
    pub confidence: f64,
}

/// Outcome of classifying one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub primary: Category,
    /// Always within [0, 1].
    pub confidence: f64,
    /// Highest confidence first; never above the primary confidence.
    pub secondary: Vec<SecondaryCategory>,
    pub reasoning: String,
    pub key_indicators: Vec<String>,
    pub suggested_tags: Vec<String>,
    /// Explicit sub-spans per category, when the model supplied them.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub segments: BTreeMap<Category, String>,
    pub source: ClassificationSource,
    /// Why the model result was not used, for fallback results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

impl ClassificationResult {
    pub fn is_fallback(&self) -> bool {
        self.source == ClassificationSource::RuleFallback
    }

    /// Confidence of a category, primary or secondary.
    pub fn confidence_for(&self, category: Category) -> Option<f64> {
        if category == self.primary {
            return Some(self.confidence);
        }
        self.secondary
            .iter()
            .find(|s| s.category == category)
            .map(|s| s.confidence)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn merge_tags(primary: &[String], extra: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::with_capacity(primary.len() + extra.len());
    for tag in primary.iter().chain(extra) {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Map an origin hint such as `"work"` or `"journal/2024/05.md"` to a
/// category using its first path segment.
pub fn hint_category(hint: &str) -> Option<Category> {
    let first = hint
        .trim()
        .trim_start_matches(['/', '\\'])
        .split(['/', ':', '\\'])
        .next()?;
    Category::from_alias(first)
}

/// Rule + model classifier.
pub struct ContentClassifier {
    config: ClassifierConfig,
    service: Option<Arc<dyn ClassificationService>>,
}

impl ContentClassifier {
    /// Rules-only classifier.
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            service: None,
        }
    }

    pub fn with_service(mut self, service: Arc<dyn ClassificationService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Additive keyword/phrase scores, normalized across categories.
    pub fn score_rules(&self, text: &str) -> RuleScores {
        score_rules(text)
    }

    /// True when the result should be confirmed before acting on it.
    pub fn needs_confirmation(&self, result: &ClassificationResult) -> bool {
        result.confidence < self.config.confirmation_threshold
    }

    /// Classify `text`, honoring an explicit origin hint first.
    pub async fn classify(&self, text: &str, origin_hint: Option<&str>) -> ClassificationResult {
        let rules = self.score_rules(text);

        if let Some(hint) = origin_hint {
            match hint_category(hint) {
                Some(category) => return self.classify_from_hint(category, hint, &rules),
                None => debug!(hint, "Origin hint does not map to a category; ignoring"),
            }
        }

        if text.trim().is_empty() {
            return self.fallback(&rules, "empty input");
        }

        let Some(ref service) = self.service else {
            return self.fallback(&rules, &ClassificationServiceError::Unavailable.to_string());
        };

        let request = ModelClassificationRequest {
            text: text.chars().take(self.config.max_input_chars).collect(),
            baseline: rules.has_indicators().then(|| rules.best()),
            categories: CategoryDefinition::all(),
        };

        let timeout = self.config.model_timeout();
        let reply = match tokio::time::timeout(timeout, service.classify(&request)).await {
            Ok(reply) => reply,
            Err(_) => Err(ClassificationServiceError::Timeout(timeout)),
        };

        self.fuse(&rules, reply)
    }

    /// Blend rule scores with a model reply, or fall back to rules when the
    /// reply is an error.
    pub fn fuse(
        &self,
        rules: &RuleScores,
        reply: Result<ModelClassificationReply, ClassificationServiceError>,
    ) -> ClassificationResult {
        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Classification service failed; using rule fallback");
                return self.fallback(rules, &e.to_string());
            }
        };

        let rule_weight = self.config.rule_weight;
        let model_weight = self.config.model_weight;
        let blend = |category: Category, model_confidence: f64| {
            clamp_unit(rule_weight * rules.get(category) + model_weight * model_confidence)
        };

        let primary = reply.category;
        let confidence = blend(primary, reply.confidence);

        let mut secondary: Vec<SecondaryCategory> = Vec::new();
        let model_secondary = reply.secondary.filter(|(c, _)| *c != primary);
        if let Some((category, model_confidence)) = model_secondary {
            secondary.push(SecondaryCategory {
                category,
                confidence: blend(category, model_confidence),
            });
        }
        for category in Category::ALL {
            if category == primary || model_secondary.map(|(c, _)| c) == Some(category) {
                continue;
            }
            if !rules.indicators(category).is_empty() {
                secondary.push(SecondaryCategory {
                    category,
                    confidence: clamp_unit(rules.get(category)),
                });
            }
        }
        rank_secondary(&mut secondary, confidence);

        let key_indicators = if reply.key_indicators.is_empty() {
            rules.indicators(primary).to_vec()
        } else {
            reply.key_indicators
        };

        debug!(
            category = %primary,
            rule_score = rules.get(primary),
            model_confidence = reply.confidence,
            fused = confidence,
            "Fused classification"
        );

        ClassificationResult {
            primary,
            confidence,
            secondary,
            reasoning: reply.reasoning,
            key_indicators,
            suggested_tags: merge_tags(&reply.suggested_tags, rules.tags()),
            segments: reply.segments,
            source: ClassificationSource::Fused,
            fallback_reason: None,
        }
    }

    /// Deterministic rule-only result.
    ///
    /// Primary confidence is `min(indicators / 5, cap)`; with no indicators it
    /// is the fixed low `no_indicator_confidence`. Secondaries use the same
    /// indicator-count scale.
    pub fn fallback(&self, rules: &RuleScores, reason: &str) -> ClassificationResult {
        let cap = self.config.fallback_cap;
        let primary = rules.best();
        let indicators = rules.indicators(primary);

        let (confidence, reasoning) = if indicators.is_empty() {
            (
                clamp_unit(self.config.no_indicator_confidence.min(cap)),
                format!("Rule-based fallback ({reason}): no indicators found"),
            )
        } else {
            (
                clamp_unit((indicators.len() as f64 / 5.0).min(cap)),
                format!(
                    "Rule-based fallback ({reason}): {} indicator(s) for {}: {}",
                    indicators.len(),
                    primary,
                    indicators.join(", ")
                ),
            )
        };

        let mut secondary: Vec<SecondaryCategory> = Category::ALL
            .iter()
            .filter(|c| **c != primary && !rules.indicators(**c).is_empty())
            .map(|c| SecondaryCategory {
                category: *c,
                confidence: clamp_unit((rules.indicators(*c).len() as f64 / 5.0).min(cap)),
            })
            .collect();
        rank_secondary(&mut secondary, confidence);

        ClassificationResult {
            primary,
            confidence,
            secondary,
            reasoning,
            key_indicators: indicators.to_vec(),
            suggested_tags: merge_tags(&[primary.as_str().to_string()], rules.tags()),
            segments: BTreeMap::new(),
            source: ClassificationSource::RuleFallback,
            fallback_reason: Some(reason.to_string()),
        }
    }

    fn classify_from_hint(&self, category: Category, hint: &str, rules: &RuleScores) -> ClassificationResult {
        info!(hint, category = %category, "Origin hint decided category");
        ClassificationResult {
            primary: category,
            confidence: clamp_unit(self.config.hint_confidence),
            secondary: Vec::new(),
            reasoning: format!("Explicit origin hint '{hint}' maps to {category}"),
            key_indicators: vec![format!("origin:{hint}")],
            suggested_tags: merge_tags(&[category.as_str().to_string()], rules.tags()),
            segments: BTreeMap::new(),
            source: ClassificationSource::OriginHint,
            fallback_reason: None,
        }
    }
}

/// Cap secondaries at the primary confidence, then order highest first with
/// ties in enumeration order.
fn rank_secondary(secondary: &mut [SecondaryCategory], ceiling: f64) {
    for entry in secondary.iter_mut() {
        entry.confidence = entry.confidence.min(ceiling);
    }
    secondary.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.category.cmp(&b.category))
    });
}
