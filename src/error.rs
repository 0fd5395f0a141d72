//! Error types.
//!
//! Two layers: [`CallError`] describes one failed attempt against one agent
//! and never leaves a stage, while [`OrchestratorError`] is what a caller of
//! [`Orchestrator`](crate::orchestrator::Orchestrator) sees. Stages resolve
//! their own retries and report per-item outcomes; only coverage failures,
//! pipeline aborts and cancellation escape.

use serde_json::Value;
use thiserror::Error;

use crate::pipeline::types::{ExecutionLogEntry, NegotiationOutcome};

/// Failure of a single call to an agent.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// No response within the per-call deadline.
    #[error("call timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Connection refused, reset, DNS failure and the like.
    #[error("transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    /// The agent answered, but not in a shape this stage accepts.
    #[error("unexpected response from {url}: {message}")]
    Protocol {
        url: String,
        message: String,
        status: Option<u16>,
        body: Option<Value>,
    },

    /// The caller cancelled the workflow while the call was in flight.
    #[error("call cancelled")]
    Cancelled,
}

impl CallError {
    pub fn transport(url: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            message: message.to_string(),
        }
    }

    pub fn protocol(
        url: impl Into<String>,
        message: impl Into<String>,
        status: Option<u16>,
        body: Option<Value>,
    ) -> Self {
        Self::Protocol {
            url: url.into(),
            message: message.into(),
            status,
            body,
        }
    }

    /// Everything except cancellation is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// HTTP status of the offending response, when there was one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Protocol { status, .. } => *status,
            _ => None,
        }
    }

    /// Raw body of the offending response, when there was one.
    pub fn body(&self) -> Option<&Value> {
        match self {
            Self::Protocol { body, .. } => body.as_ref(),
            _ => None,
        }
    }
}

/// Failure of a whole workflow run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The registry yielded nothing and no default population was supplied.
    #[error("no agents available: registry is empty and no default agents are configured")]
    NoAgents,

    /// The workflow was submitted without steps.
    #[error("workflow has no steps")]
    EmptyWorkflow,

    /// Two steps share an id.
    #[error("workflow step id '{step}' is used more than once")]
    DuplicateStep { step: String },

    /// At least one step has no agent advertising its capability.
    #[error("no agent satisfies step(s): {}", steps.join(", "))]
    Unmatched { steps: Vec<String> },

    /// A matched agent did not accept its assignment.
    #[error("negotiation not accepted by agent(s): {}", agents.join(", "))]
    NegotiationRejected {
        agents: Vec<String>,
        outcomes: Vec<NegotiationOutcome>,
    },

    /// A step exhausted its retry budget; later steps were not run.
    #[error("workflow aborted at step '{step}' (agent '{agent}'): {message}")]
    PipelineAborted {
        step: String,
        agent: String,
        message: String,
        log: Vec<ExecutionLogEntry>,
    },

    /// The caller cancelled the run.
    #[error("workflow cancelled")]
    Cancelled { log: Vec<ExecutionLogEntry> },

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl OrchestratorError {
    /// Execution log accumulated before the failure. Empty when the run
    /// failed before anything was executed.
    pub fn log(&self) -> &[ExecutionLogEntry] {
        match self {
            Self::PipelineAborted { log, .. } | Self::Cancelled { log } => log,
            _ => &[],
        }
    }

    /// Step that caused the failure, when known.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::PipelineAborted { step, .. } | Self::DuplicateStep { step } => Some(step),
            Self::Unmatched { steps } => steps.first().map(String::as_str),
            _ => None,
        }
    }

    /// Agent that caused the failure, when known.
    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::PipelineAborted { agent, .. } => Some(agent),
            Self::NegotiationRejected { agents, .. } => agents.first().map(String::as_str),
            _ => None,
        }
    }
}
