//! Workflow event stream
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ ExecutionEngine  │────▶│  Event Bus   │────▶│  Subscribers │
//! │    (publish)     │     │  (broadcast) │     │   (recv)     │
//! └──────────────────┘     └──────────────┘     └──────────────┘
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, SharedEventBus};
pub use types::WorkflowEvent;
