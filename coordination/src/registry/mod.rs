//! Handler Registry: handler capability metadata and invocation seam
//!
//! Built once at startup through [`RegistryBuilder`], then shared read-only
//! as `Arc<HandlerRegistry>` by every component that needs handler metadata.
//! Nothing mutates it mid-request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::classifier::Category;
use crate::error::{ConfigResult, ConfigurationError, HandlerError};

/// Identity of a downstream handler.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Work,
    Personal,
    Health,
    Finance,
    Learning,
    Ideas,
    EmotionAnalysis,
    PatternDetection,
    Synthesis,
    Validation,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 10] = [
        HandlerKind::Work,
        HandlerKind::Personal,
        HandlerKind::Health,
        HandlerKind::Finance,
        HandlerKind::Learning,
        HandlerKind::Ideas,
        HandlerKind::EmotionAnalysis,
        HandlerKind::PatternDetection,
        HandlerKind::Synthesis,
        HandlerKind::Validation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Personal => "personal",
            Self::Health => "health",
            Self::Finance => "finance",
            Self::Learning => "learning",
            Self::Ideas => "ideas",
            Self::EmotionAnalysis => "emotion_analysis",
            Self::PatternDetection => "pattern_detection",
            Self::Synthesis => "synthesis",
            Self::Validation => "validation",
        }
    }

    /// The primary handler for a category.
    pub fn for_category(category: Category) -> Self {
        match category {
            Category::Work => Self::Work,
            Category::Personal => Self::Personal,
            Category::Health => Self::Health,
            Category::Finance => Self::Finance,
            Category::Learning => Self::Learning,
            Category::Ideas => Self::Ideas,
        }
    }

    /// The category this handler serves, if it is a category handler.
    pub fn category(&self) -> Option<Category> {
        match self {
            Self::Work => Some(Category::Work),
            Self::Personal => Some(Category::Personal),
            Self::Health => Some(Category::Health),
            Self::Finance => Some(Category::Finance),
            Self::Learning => Some(Category::Learning),
            Self::Ideas => Some(Category::Ideas),
            _ => None,
        }
    }
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HandlerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == name)
            .ok_or_else(|| format!("unknown handler '{s}'"))
    }
}

/// Static condition that pulls a handler into a workflow regardless of the
/// routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "when", content = "value", rename_all = "snake_case")]
pub enum Trigger {
    /// A suggested tag equals this value.
    Tag(String),
    /// A key indicator equals this value.
    Indicator(String),
    /// The routing decision needs confirmation.
    NeedsConfirmation,
}

impl Trigger {
    pub fn matches(&self, tags: &[String], indicators: &[String], needs_confirmation: bool) -> bool {
        match self {
            Self::Tag(tag) => tags.iter().any(|t| t.eq_ignore_ascii_case(tag)),
            Self::Indicator(ind) => indicators.iter().any(|i| i.eq_ignore_ascii_case(ind)),
            Self::NeedsConfirmation => needs_confirmation,
        }
    }
}

/// Capability and cost metadata for a handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerProfile {
    pub kind: HandlerKind,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Typical wall-clock latency in milliseconds
    pub expected_latency_ms: u64,
    /// Memory cost estimate (cost units, roughly MiB)
    pub memory_cost: f64,
    /// Relative compute intensity (1.0 = one busy worker)
    pub compute_intensity: f64,
    /// Handlers whose outputs relate well to this one's
    #[serde(default)]
    pub affinity: Vec<HandlerKind>,
    /// Handlers whose outputs may contradict this one's
    #[serde(default)]
    pub conflicts_with: Vec<HandlerKind>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
}

impl HandlerProfile {
    pub fn new(kind: HandlerKind) -> Self {
        Self {
            kind,
            capabilities: Vec::new(),
            expected_latency_ms: 1_000,
            memory_cost: 256.0,
            compute_intensity: 1.0,
            affinity: Vec::new(),
            conflicts_with: Vec::new(),
            triggers: Vec::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.expected_latency_ms = latency_ms;
        self
    }

    pub fn with_cost(mut self, compute_intensity: f64, memory_cost: f64) -> Self {
        self.compute_intensity = compute_intensity;
        self.memory_cost = memory_cost;
        self
    }

    pub fn with_affinity(mut self, kinds: &[HandlerKind]) -> Self {
        self.affinity = kinds.to_vec();
        self
    }

    pub fn with_conflicts(mut self, kinds: &[HandlerKind]) -> Self {
        self.conflicts_with = kinds.to_vec();
        self
    }

    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn expected_latency(&self) -> Duration {
        Duration::from_millis(self.expected_latency_ms)
    }

    /// Whether this profile or `other` declares a conflict with the other.
    pub fn conflicts(&self, other: &HandlerProfile) -> bool {
        self.conflicts_with.contains(&other.kind) || other.conflicts_with.contains(&self.kind)
    }

    /// Default profile for each known handler.
    pub fn default_for(kind: HandlerKind) -> Self {
        use HandlerKind::*;
        let profile = Self::new(kind);
        match kind {
            Work => profile
                .with_capabilities(&["task_extraction", "follow_up"])
                .with_latency(800)
                .with_cost(0.8, 256.0)
                .with_conflicts(&[Personal]),
            Personal => profile
                .with_capabilities(&["journal", "relationships"])
                .with_latency(700)
                .with_cost(0.6, 256.0)
                .with_conflicts(&[Work]),
            Health => profile
                .with_capabilities(&["symptom_log", "habit_tracking"])
                .with_latency(900)
                .with_cost(0.8, 384.0)
                .with_conflicts(&[EmotionAnalysis]),
            Finance => profile
                .with_capabilities(&["expense_extraction", "budget"])
                .with_latency(900)
                .with_cost(0.9, 384.0),
            Learning => profile
                .with_capabilities(&["summary", "flashcards"])
                .with_latency(1_200)
                .with_cost(0.7, 512.0),
            Ideas => profile
                .with_capabilities(&["idea_capture", "expansion"])
                .with_latency(1_000)
                .with_cost(0.7, 256.0),
            EmotionAnalysis => profile
                .with_capabilities(&["sentiment", "mood"])
                .with_latency(1_500)
                .with_cost(1.2, 768.0)
                .with_affinity(&[Synthesis])
                .with_trigger(Trigger::Tag("emotional".into())),
            PatternDetection => profile
                .with_capabilities(&["history_scan", "trend"])
                .with_latency(2_500)
                .with_cost(1.5, 1_024.0)
                .with_affinity(&[Synthesis])
                .with_trigger(Trigger::Tag("recurring".into())),
            Synthesis => profile
                .with_capabilities(&["cross_reference", "insight"])
                .with_latency(2_000)
                .with_cost(1.0, 512.0)
                .with_affinity(&[PatternDetection, EmotionAnalysis])
                .with_trigger(Trigger::Tag("reflection".into())),
            Validation => profile
                .with_capabilities(&["consistency_check"])
                .with_latency(400)
                .with_cost(0.5, 128.0)
                .with_trigger(Trigger::NeedsConfirmation),
        }
    }
}

/// Context handed to a handler with its input segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationMetadata {
    pub node_id: String,
    pub handler: HandlerKind,
    pub category: Category,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub indicators: Vec<String>,
    /// Outputs of completed dependency nodes, keyed by node id
    #[serde(default)]
    pub upstream: BTreeMap<String, serde_json::Value>,
}

/// Closed capability interface every handler implements.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn invoke(
        &self,
        segment: &str,
        metadata: &InvocationMetadata,
    ) -> Result<serde_json::Value, HandlerError>;
}

struct RegisteredHandler {
    profile: HandlerProfile,
    handler: Arc<dyn Handler>,
}

/// Immutable handler registry keyed by [`HandlerKind`].
pub struct HandlerRegistry {
    entries: BTreeMap<HandlerKind, RegisteredHandler>,
}

impl HandlerRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn profile(&self, kind: HandlerKind) -> Option<&HandlerProfile> {
        self.entries.get(&kind).map(|e| &e.profile)
    }

    /// Profile lookup that treats a missing handler as a configuration error.
    pub fn require(&self, kind: HandlerKind) -> ConfigResult<&HandlerProfile> {
        self.profile(kind)
            .ok_or(ConfigurationError::UnregisteredHandler(kind))
    }

    pub fn handler(&self, kind: HandlerKind) -> Option<Arc<dyn Handler>> {
        self.entries.get(&kind).map(|e| Arc::clone(&e.handler))
    }

    pub fn contains(&self, kind: HandlerKind) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All profiles in [`HandlerKind`] order.
    pub fn profiles(&self) -> impl Iterator<Item = &HandlerProfile> {
        self.entries.values().map(|e| &e.profile)
    }

    /// Handlers whose static trigger matches the given signals.
    pub fn triggered(
        &self,
        tags: &[String],
        indicators: &[String],
        needs_confirmation: bool,
    ) -> Vec<HandlerKind> {
        self.profiles()
            .filter(|p| {
                p.triggers
                    .iter()
                    .any(|t| t.matches(tags, indicators, needs_confirmation))
            })
            .map(|p| p.kind)
            .collect()
    }
}

/// Collects registrations; the only way to build a [`HandlerRegistry`].
#[derive(Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<HandlerKind, RegisteredHandler>,
}

impl RegistryBuilder {
    /// Register one handler. Registering a kind twice is a configuration error.
    pub fn register(mut self, profile: HandlerProfile, handler: Arc<dyn Handler>) -> ConfigResult<Self> {
        let kind = profile.kind;
        if self.entries.contains_key(&kind) {
            return Err(ConfigurationError::DuplicateHandler(kind));
        }
        for (name, value) in [
            ("memory_cost", profile.memory_cost),
            ("compute_intensity", profile.compute_intensity),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigurationError::InvalidSetting {
                    name: format!("{kind}.{name}"),
                    reason: format!("{value} must be a non-negative number"),
                });
            }
        }
        debug!(handler = %kind, "Registered handler");
        self.entries
            .insert(kind, RegisteredHandler { profile, handler });
        Ok(self)
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            entries: self.entries,
        }
    }
}
