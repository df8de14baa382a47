//! Flow execution for FlowPilot.
//!
//! A flow is a YAML-declared sequence of browser steps. The executor runs
//! each step's primary action and, on failure, walks the fallback chain:
//! template match against the live screenshot, then vision-model detection,
//! both projected back onto page coordinates before acting.

pub mod errors;
pub mod executor;
pub mod loader;
pub mod report;
pub mod types;
pub mod validate;

pub use errors::FlowError;
pub use executor::FlowExecutor;
pub use loader::load_flow;
pub use report::{NullReporter, RunReporter, StepRecord};
pub use types::{
    Coordinates, Flow, FlowRunResult, ResolutionPhase, Step, StepAction, StepOutcome,
};
pub use validate::{validate_flow, ValidationIssue};
