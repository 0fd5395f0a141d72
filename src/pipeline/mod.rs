//! The four orchestration stages and the data they pass along.
//!
//! ```text
//! registry ──► prober ──► matcher ──► negotiator ──► executor
//!  (load)      (probe)    (match)     (negotiate)    (execute)
//! ```
//!
//! Each stage takes the previous stage's output plus its own settings and
//! returns a fresh value; no stage mutates another stage's collection.

pub mod executor;
pub mod matcher;
pub mod negotiator;
pub mod prober;
pub mod registry;
pub mod types;

pub use executor::WorkflowExecutor;
pub use matcher::{match_steps, MatchPolicy, MatchResult};
pub use negotiator::{NegotiationPolicy, NegotiationVerdict, Negotiator};
pub use prober::CapabilityProber;
pub use registry::{RegistryLoader, RegistrySource};
pub use types::{
    AgentDescriptor, ExecutionLogEntry, ExecutionMode, ExecutionResult, ExecutionStatus,
    MatchAssignment, NegotiationOutcome, NegotiationSignal, WorkflowStep,
};
