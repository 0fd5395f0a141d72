//! # agentflow
//!
//! Coordinates independent, remotely hosted agents through a multi-step
//! workflow. Agents advertise capabilities, are matched to workflow steps,
//! confirm participation through a negotiation handshake, and are then
//! invoked in order with each step's output piped into the next.
//!
//! The pipeline lives in [`pipeline`]; [`orchestrator::Orchestrator`]
//! composes it, and [`server`] exposes the orchestrator over HTTP using the
//! same protocol it speaks to agents.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod server;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::OrchestratorConfig;
pub use error::{CallError, OrchestratorError};
pub use orchestrator::{Orchestrator, WorkflowReport, WorkflowRequest};
pub use pipeline::{
    AgentDescriptor, ExecutionLogEntry, ExecutionMode, ExecutionResult, ExecutionStatus,
    MatchAssignment, MatchPolicy, NegotiationOutcome, NegotiationPolicy, WorkflowStep,
};

/// Crate version reported by the HTTP service.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
