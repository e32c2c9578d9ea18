//! End-to-end triage pipeline.
//!
//! ```text
//! text + hint ─► classify ─► route ─► compile ─► cap ─► execute
//!                                                          │
//!                    record ◄─ synthesize ◄─ resolve ◄─ detect conflicts
//! ```
//!
//! Only [`ConfigurationError`] escapes `process`; every external failure is
//! reported inside the returned [`TriageOutcome`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::classifier::{ClassificationResult, ClassificationService, ContentClassifier};
use crate::config::TriageConfig;
use crate::error::{ConfigResult, ConfigurationError};
use crate::events::{EventBus, SharedEventBus, WorkflowEvent};
use crate::registry::HandlerRegistry;
use crate::router::{DecisionOutcome, DecisionRecorder, RoutingDecision, RoutingEngine};
use crate::synthesis::{
    Conflict, ConflictResolver, Resolution, SynthesisPlan, SynthesisReport, SynthesisService,
    Synthesizer,
};
use crate::workflow::{
    CompatibilityTable, ConcurrencyPlan, ExecutionEngine, ExecutionResult, GraphSummary,
    ResourceManager, RunContext, WorkflowCompiler,
};

/// Everything produced for one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageOutcome {
    pub classification: ClassificationResult,
    pub decision: RoutingDecision,
    pub plan: GraphSummary,
    pub concurrency: ConcurrencyPlan,
    pub execution: ExecutionResult,
    pub conflicts: Vec<Conflict>,
    pub resolutions: Vec<Resolution>,
    pub synthesis: SynthesisReport,
}

impl TriageOutcome {
    /// Reduced quality anywhere along the way.
    pub fn is_degraded(&self) -> bool {
        self.classification.is_fallback()
            || self.execution.degraded
            || !self.execution.errors.is_empty()
            || self.synthesis.fallback_reason.is_some()
    }
}

pub struct PipelineBuilder {
    config: TriageConfig,
    registry: Arc<HandlerRegistry>,
    classification_service: Option<Arc<dyn ClassificationService>>,
    synthesis_service: Option<Arc<dyn SynthesisService>>,
    recorder: Option<Arc<dyn DecisionRecorder>>,
    table: CompatibilityTable,
    events: Option<SharedEventBus>,
}

impl PipelineBuilder {
    pub fn classification_service(mut self, service: Arc<dyn ClassificationService>) -> Self {
        self.classification_service = Some(service);
        self
    }

    pub fn synthesis_service(mut self, service: Arc<dyn SynthesisService>) -> Self {
        self.synthesis_service = Some(service);
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn DecisionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn compatibility_table(mut self, table: CompatibilityTable) -> Self {
        self.table = table;
        self
    }

    pub fn events(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate configuration and the compatibility table.
    pub fn build(self) -> ConfigResult<TriagePipeline> {
        self.config.validate()?;
        if self.registry.is_empty() {
            return Err(ConfigurationError::InvalidSetting {
                name: "registry".into(),
                reason: "no handlers registered".into(),
            });
        }

        let compiler = WorkflowCompiler::new(self.table, self.config.execution.clone())?;
        let events = self.events.unwrap_or_else(|| EventBus::new().shared());

        let mut classifier = ContentClassifier::new(self.config.classifier.clone());
        if let Some(service) = self.classification_service {
            classifier = classifier.with_service(service);
        }
        let mut synthesizer = Synthesizer::new(self.config.execution.synthesis_timeout());
        if let Some(service) = self.synthesis_service {
            synthesizer = synthesizer.with_service(service);
        }

        Ok(TriagePipeline {
            router: RoutingEngine::from_config(&self.config),
            resources: ResourceManager::new(self.config.resources.clone()),
            engine: ExecutionEngine::new(Arc::clone(&self.registry)).with_events(Arc::clone(&events)),
            resolver: ConflictResolver::new(),
            classifier,
            compiler,
            synthesizer,
            registry: self.registry,
            recorder: self.recorder,
            events,
            config: self.config,
        })
    }
}

/// Classification-to-synthesis orchestration over a shared registry.
pub struct TriagePipeline {
    config: TriageConfig,
    classifier: ContentClassifier,
    router: RoutingEngine,
    compiler: WorkflowCompiler,
    resources: ResourceManager,
    engine: ExecutionEngine,
    resolver: ConflictResolver,
    synthesizer: Synthesizer,
    registry: Arc<HandlerRegistry>,
    recorder: Option<Arc<dyn DecisionRecorder>>,
    events: SharedEventBus,
}

impl TriagePipeline {
    pub fn builder(config: TriageConfig, registry: Arc<HandlerRegistry>) -> PipelineBuilder {
        PipelineBuilder {
            config,
            registry,
            classification_service: None,
            synthesis_service: None,
            recorder: None,
            table: CompatibilityTable::default(),
            events: None,
        }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Classify, route, execute and synthesize one input.
    pub async fn process(&self, text: &str, origin_hint: Option<&str>) -> ConfigResult<TriageOutcome> {
        let classification = self.classifier.classify(text, origin_hint).await;
        let decision = self.router.route(&classification, text, &self.registry)?;

        let graph = self.compiler.compile(&decision, text, &self.registry)?;
        let (graph, concurrency) = self.resources.apply(graph, &self.registry);
        let plan = graph.summary();

        let execution = self
            .engine
            .execute(graph, &RunContext::from_decision(&decision))
            .await;

        let conflicts = self.resolver.detect(&execution, &self.registry);
        let resolutions = self.resolver.resolve_all(&conflicts);

        let synthesis_plan = SynthesisPlan {
            decision: decision.clone(),
            graph: plan.clone(),
        };
        let synthesis = self
            .synthesizer
            .synthesize(&execution, &synthesis_plan, &resolutions, &self.registry)
            .await;

        let outcome = TriageOutcome {
            classification,
            decision,
            plan,
            concurrency,
            execution,
            conflicts,
            resolutions,
            synthesis,
        };
        self.record(&outcome).await;

        info!(
            decision_id = %outcome.decision.id,
            category = %outcome.decision.category,
            completed = outcome.execution.completed_count(),
            failed = outcome.execution.failed_count(),
            degraded = outcome.is_degraded(),
            "Triage complete"
        );
        Ok(outcome)
    }

    async fn record(&self, outcome: &TriageOutcome) {
        let Some(ref recorder) = self.recorder else {
            return;
        };
        let record = DecisionOutcome {
            workflow_id: outcome.execution.workflow_id.clone(),
            strategy: outcome.execution.strategy,
            completed: outcome.execution.outputs.keys().cloned().collect(),
            failed: outcome
                .execution
                .errors
                .iter()
                .map(|(id, e)| (id.clone(), e.to_string()))
                .collect::<BTreeMap<_, _>>(),
            degraded: outcome.is_degraded(),
            summary: outcome.synthesis.summary.clone(),
            total_ms: outcome.execution.total_ms,
        };
        if let Err(e) = recorder.record(&outcome.decision, &record).await {
            warn!(decision_id = %outcome.decision.id, error = %e, "Failed to record decision");
        }
    }
}
