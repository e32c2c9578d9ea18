//! Triage Coordination Library
//!
//! Classifies short free-text notes and orchestrates the handlers that
//! process them:
//! - Content classification fusing keyword/phrase rules with an external model
//! - Routing decisions with two-gate secondary admission
//! - Dependency-graph workflows with parallel, sequential and hierarchical
//!   execution under per-node timeouts
//! - Conflict resolution and best-effort synthesis of handler outputs
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use triage_coordination::{HandlerProfile, HandlerRegistry, TriageConfig, TriagePipeline};
//!
//! let registry = HandlerRegistry::builder()
//!     .register(HandlerProfile::default_for(HandlerKind::Work), Arc::new(work_handler))?
//!     .build()
//!     .shared();
//! let pipeline = TriagePipeline::builder(TriageConfig::from_env(), registry).build()?;
//! let outcome = pipeline.process("Standup moved to 10am", Some("work/inbox")).await?;
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod model_client;
pub mod pipeline;
pub mod registry;
pub mod router;
pub mod synthesis;
pub mod workflow;

pub use classifier::{
    Category, ClassificationResult, ClassificationService, ClassificationSource,
    ContentClassifier, SecondaryCategory,
};
pub use config::{ModelEndpointConfig, TriageConfig};
pub use error::{
    ClassificationServiceError, ConfigResult, ConfigurationError, HandlerError, RecordError,
    SynthesisServiceError,
};
pub use events::{EventBus, SharedEventBus, WorkflowEvent};
pub use pipeline::{TriageOutcome, TriagePipeline};
pub use registry::{
    Handler, HandlerKind, HandlerProfile, HandlerRegistry, InvocationMetadata, Trigger,
};
pub use router::{
    DecisionRecorder, JsonlRecorder, MemoryRecorder, RoutingDecision, RoutingEngine,
};
pub use synthesis::{ConflictResolver, SynthesisReport, SynthesisService, Synthesizer};
pub use workflow::{
    ExecutionEngine, ExecutionResult, ExecutionStrategy, TaskNode, WorkflowCompiler,
    WorkflowGraph,
};
