//! Routing Decision Engine
//!
//! Turns a [`ClassificationResult`] into handler assignments.
//!
//! ```text
//! confidence      | listed in `secondary` | scheduled (`activated`)
//! ----------------|-----------------------|------------------------
//! ≤ 0.3           | no                    | no
//! (0.3, 0.4]      | yes                   | no
//! > 0.4           | yes                   | yes
//! ```
//!
//! Listing is eligibility, not a scheduling guarantee. Both thresholds come
//! from [`RoutingConfig`].

pub mod record;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use record::{
    read_records, DecisionOutcome, DecisionRecord, DecisionRecorder, JsonlRecorder,
    MemoryRecorder, RECORD_VERSION,
};

use crate::classifier::{Category, ClassificationResult, ClassificationSource};
use crate::config::{RoutingConfig, TriageConfig};
use crate::error::ConfigResult;
use crate::registry::{HandlerKind, HandlerRegistry};

/// Segment used for the primary handler when the input itself is blank.
pub const EMPTY_INPUT_SEGMENT: &str = "(empty input)";

/// A secondary handler listed on a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerAssignment {
    pub handler: HandlerKind,
    pub category: Category,
    pub confidence: f64,
}

/// Which handlers should see an input, and with what text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub id: String,
    pub primary: HandlerKind,
    pub category: Category,
    pub confidence: f64,
    /// Listed secondaries (above the listing threshold), highest first.
    pub secondary: Vec<HandlerAssignment>,
    /// Subset of `secondary` above the activation threshold.
    pub activated: Vec<HandlerKind>,
    /// Input text per handler. The primary's entry is never empty.
    pub segments: BTreeMap<HandlerKind, String>,
    pub needs_confirmation: bool,
    pub tags: Vec<String>,
    pub indicators: Vec<String>,
    pub source: ClassificationSource,
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    /// Primary plus activated secondaries, in scheduling order.
    pub fn scheduled(&self) -> Vec<HandlerKind> {
        let mut handlers = vec![self.primary];
        handlers.extend(self.activated.iter().copied().filter(|h| *h != self.primary));
        handlers
    }

    pub fn segment_for(&self, handler: HandlerKind) -> Option<&str> {
        self.segments.get(&handler).map(String::as_str)
    }

    /// Confidence attached to a handler on this decision.
    pub fn confidence_for(&self, handler: HandlerKind) -> Option<f64> {
        if handler == self.primary {
            return Some(self.confidence);
        }
        self.secondary
            .iter()
            .find(|a| a.handler == handler)
            .map(|a| a.confidence)
    }
}

/// Maps classification results to routing decisions.
#[derive(Debug, Clone)]
pub struct RoutingEngine {
    config: RoutingConfig,
    confirmation_threshold: f64,
}

impl RoutingEngine {
    pub fn new(config: RoutingConfig, confirmation_threshold: f64) -> Self {
        Self {
            config,
            confirmation_threshold,
        }
    }

    pub fn from_config(config: &TriageConfig) -> Self {
        Self::new(
            config.routing.clone(),
            config.classifier.confirmation_threshold,
        )
    }

    /// Build the decision for `classification` of `text`.
    ///
    /// Fails only when the primary handler or an activated secondary has no
    /// registered profile.
    pub fn route(
        &self,
        classification: &ClassificationResult,
        text: &str,
        registry: &HandlerRegistry,
    ) -> ConfigResult<RoutingDecision> {
        let primary = HandlerKind::for_category(classification.primary);
        registry.require(primary)?;

        let mut segments = BTreeMap::new();
        segments.insert(primary, segment_text(classification, classification.primary, text));

        let mut secondary = Vec::new();
        let mut activated = Vec::new();
        for candidate in &classification.secondary {
            if candidate.category == classification.primary
                || candidate.confidence <= self.config.listing_threshold
            {
                continue;
            }
            let handler = HandlerKind::for_category(candidate.category);
            let active = candidate.confidence > self.config.activation_threshold;

            if !registry.contains(handler) {
                if active {
                    registry.require(handler)?;
                }
                warn!(handler = %handler, "Listed secondary has no registered handler; dropped");
                continue;
            }

            if active {
                activated.push(handler);
                segments.insert(handler, segment_text(classification, candidate.category, text));
            }
            secondary.push(HandlerAssignment {
                handler,
                category: candidate.category,
                confidence: candidate.confidence,
            });
        }

        let decision = RoutingDecision {
            id: Uuid::new_v4().to_string(),
            primary,
            category: classification.primary,
            confidence: classification.confidence,
            secondary,
            activated,
            segments,
            needs_confirmation: classification.confidence < self.confirmation_threshold,
            tags: classification.suggested_tags.clone(),
            indicators: classification.key_indicators.clone(),
            source: classification.source,
            decided_at: Utc::now(),
        };

        info!(
            decision_id = %decision.id,
            primary = %decision.primary,
            confidence = decision.confidence,
            listed = decision.secondary.len(),
            activated = decision.activated.len(),
            needs_confirmation = decision.needs_confirmation,
            "Routing decision made"
        );
        Ok(decision)
    }
}

/// Explicit sub-span when the classifier supplied one, otherwise the full text.
fn segment_text(classification: &ClassificationResult, category: Category, text: &str) -> String {
    if let Some(span) = classification.segments.get(&category) {
        if !span.trim().is_empty() {
            debug!(category = %category, "Using classifier-supplied segment");
            return span.clone();
        }
    }
    if text.trim().is_empty() {
        EMPTY_INPUT_SEGMENT.to_string()
    } else {
        text.to_string()
    }
}
