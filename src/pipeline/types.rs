//! Data model shared by every orchestration stage.
//!
//! Descriptors flow forward through the pipeline as immutable snapshots:
//! the registry loader creates them, the prober returns refreshed copies,
//! and the matcher pairs them with [`WorkflowStep`]s. Negotiation and
//! execution only ever read them.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// A remote agent known to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique, non-empty identifier.
    pub id: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Base address, e.g. `http://10.0.0.4:8080`.
    pub address: String,
    /// Advertised capability names. Empty until probed when the registry
    /// carries none.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Opaque metadata carried through the pipeline untouched.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl AgentDescriptor {
    /// Create a descriptor with no capabilities.
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            address: address.into(),
            capabilities: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Builder: set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: set the capability list.
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the agent advertises `capability` (exact match).
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    /// Absolute URL of one of the agent's operations.
    pub fn endpoint(&self, operation: &str) -> String {
        format!(
            "{}/{}",
            self.address.trim_end_matches('/'),
            operation.trim_start_matches('/')
        )
    }

    /// Name for log lines: the display name when set, the id otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

// ---------------------------------------------------------------------------
// Workflow steps and assignments
// ---------------------------------------------------------------------------

/// One step of a workflow, identified by the capability it needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step identifier, unique within a workflow.
    pub id: String,
    /// Capability an agent must advertise to run this step.
    pub capability: String,
    /// Fixed input that replaces the pipelined payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// When set, the pipelined payload is sent as `{input_key: payload}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_key: Option<String>,
}

/// First step id that appears more than once in `steps`.
pub fn duplicate_step_id(steps: &[WorkflowStep]) -> Option<&str> {
    let mut seen = HashSet::with_capacity(steps.len());
    steps
        .iter()
        .map(|s| s.id.as_str())
        .find(|id| !seen.insert(*id))
}

impl WorkflowStep {
    /// Create a step with an explicit id.
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            input: None,
            input_key: None,
        }
    }

    /// Create a step whose id is its capability name.
    pub fn for_capability(capability: impl Into<String>) -> Self {
        let capability = capability.into();
        Self::new(capability.clone(), capability)
    }

    /// Builder: pin the step's input.
    pub fn with_input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Builder: wrap the pipelined payload under `key`.
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    /// Build the request body for this step from the payload handed to it.
    pub fn request_body(&self, piped: &Value) -> Value {
        if let Some(ref fixed) = self.input {
            return fixed.clone();
        }
        match self.input_key {
            Some(ref key) => {
                let mut wrapped = serde_json::Map::new();
                wrapped.insert(key.clone(), piped.clone());
                Value::Object(wrapped)
            }
            None => piped.clone(),
        }
    }
}

/// A step resolved to the agent that will run it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchAssignment {
    pub step: WorkflowStep,
    pub agent: AgentDescriptor,
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// Normalized meaning of a negotiation response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationSignal {
    Accepted,
    Rejected,
    Unknown,
}

/// Result of negotiating one assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationOutcome {
    pub agent_id: String,
    pub step_id: String,
    pub accepted: bool,
    pub signal: NegotiationSignal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Last raw response body observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of negotiate calls made.
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// How the executor schedules steps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One step at a time, each step's output piped into the next.
    #[default]
    Sequential,
    /// All steps at once, each fed the initial payload.
    Parallel,
}

/// Overall outcome of an execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Succeeded,
    Partial,
    Failed,
}

/// One line of the execution log. Exactly one per executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub step_id: String,
    pub agent_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Wall time across all attempts, including backoff.
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The agent's `output` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Last raw body of a failed step, kept for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

/// Everything the executor knows after a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub mode: ExecutionMode,
    pub status: ExecutionStatus,
    pub log: Vec<ExecutionLogEntry>,
    /// Final pipeline output (sequential) or step-id keyed outputs (parallel).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// Outputs of the successful steps keyed by step id.
    pub fn outputs(&self) -> serde_json::Map<String, Value> {
        self.log
            .iter()
            .filter(|entry| entry.success)
            .filter_map(|entry| {
                entry
                    .payload
                    .as_ref()
                    .map(|p| (entry.step_id.clone(), p.clone()))
            })
            .collect()
    }

    /// Distinct agent ids in log order.
    pub fn agents_used(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for entry in &self.log {
            if !seen.contains(&entry.agent_id) {
                seen.push(entry.agent_id.clone());
            }
        }
        seen
    }
}
