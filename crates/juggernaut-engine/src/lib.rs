//! The agentic loop: budgets, guardrails, recovery, tools, and the controller
//! that ties them together.

pub mod answer;
pub mod budget;
pub mod controller;
pub mod error;
pub mod evidence;
pub mod fallback;
pub mod fingerprint;
pub mod guardrails;
pub mod modes;
pub mod notify;
pub mod recovery;
pub mod registry;
pub mod services;
pub mod tools;
pub mod truncate;

pub use budget::{BudgetConfig, BudgetSnapshot, BudgetTracker};
pub use controller::{
    ControllerConfig, EventSink, LoopController, SessionHandle, SessionOutcome, SessionRequest,
};
pub use error::EngineError;
pub use guardrails::{GuardrailConfig, GuardrailSnapshot, GuardrailTracker};
pub use registry::ToolRegistry;
pub use services::SessionServices;
