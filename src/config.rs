//! Orchestrator configuration.
//!
//! Loaded from a YAML or JSON file, then overridden field by field from
//! `AGENTFLOW_*` environment variables. Every field has a default, so an
//! empty document is a valid configuration.
//!
//! ```yaml
//! registry: https://registry.internal/agents.json
//! probe_concurrency: 4
//! retry_attempts: 2
//! matching:
//!   policy: preference
//!   order: [ledger-scanner]
//! workflow:
//!   - { id: scan, capability: scan }
//!   - { id: report, capability: report, input_key: wallet }
//! default_agents:
//!   - { id: ledger-scanner, address: "http://127.0.0.1:7001", capabilities: [scan] }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::OrchestratorError;
use crate::pipeline::matcher::MatchPolicy;
use crate::pipeline::negotiator::NegotiationPolicy;
use crate::pipeline::registry::RegistrySource;
use crate::pipeline::types::{
    duplicate_step_id, AgentDescriptor, ExecutionMode, WorkflowStep,
};
use crate::transport::{Backoff, RetryPolicy};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "AGENTFLOW_CONFIG";

/// How the orchestrator presents itself when exposed as an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    #[serde(default = "default_service_id")]
    pub id: String,
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_service_capabilities")]
    pub capabilities: Vec<String>,
}

fn default_service_id() -> String { "agentflow".to_string() }
fn default_service_name() -> String { "Agent Workflow Orchestrator".to_string() }
fn default_service_capabilities() -> Vec<String> { vec!["orchestrate".to_string()] }

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            id: default_service_id(),
            name: default_service_name(),
            capabilities: default_service_capabilities(),
        }
    }
}

/// Configuration for the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub service: ServiceIdentity,
    /// Registry URL or file path. `None` uses `default_agents` directly.
    #[serde(default)]
    pub registry: Option<String>,
    /// Deadline for fetching the registry.
    #[serde(default = "default_registry_timeout_ms")]
    pub registry_timeout_ms: u64,
    /// Population used when the registry is missing, unreachable or empty.
    #[serde(default)]
    pub default_agents: Vec<AgentDescriptor>,
    /// Maximum capability probes in flight.
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
    /// Per-call deadline for probe, negotiate and execute calls.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Retries after the first attempt, per call.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default)]
    pub matching: MatchPolicy,
    #[serde(default)]
    pub negotiation: NegotiationPolicy,
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Steps run by the HTTP service's `/execute`.
    #[serde(default)]
    pub workflow: Vec<WorkflowStep>,
    /// Proposal sent to every matched agent.
    #[serde(default = "default_proposal")]
    pub proposal: Value,
}

fn default_registry_timeout_ms() -> u64 { 5_000 }
fn default_probe_concurrency() -> usize { 8 }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_retry_attempts() -> u32 { 2 }
fn default_proposal() -> Value { Value::Object(serde_json::Map::new()) }

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            service: ServiceIdentity::default(),
            registry: None,
            registry_timeout_ms: default_registry_timeout_ms(),
            default_agents: Vec::new(),
            probe_concurrency: default_probe_concurrency(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            backoff: Backoff::default(),
            matching: MatchPolicy::default(),
            negotiation: NegotiationPolicy::default(),
            mode: ExecutionMode::default(),
            workflow: Vec::new(),
            proposal: default_proposal(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse a YAML document (JSON is valid YAML).
    pub fn from_yaml_str(content: &str) -> Result<Self, OrchestratorError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| OrchestratorError::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML or JSON file.
    pub fn from_file(path: &Path) -> Result<Self, OrchestratorError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let is_json = path.extension().map_or(false, |ext| ext == "json");
        if is_json {
            let config: Self = serde_json::from_str(&content).map_err(|e| {
                OrchestratorError::Config(format!("invalid configuration {}: {}", path.display(), e))
            })?;
            config.validate()?;
            return Ok(config);
        }
        Self::from_yaml_str(&content)
    }

    /// File named by `AGENTFLOW_CONFIG` (or defaults), then env overrides.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `AGENTFLOW_REGISTRY_URL`, `AGENTFLOW_CONCURRENCY`,
    /// `AGENTFLOW_TIMEOUT_MS`, `AGENTFLOW_RETRIES` and `AGENTFLOW_MODE`
    /// from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), OrchestratorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(registry) = lookup("AGENTFLOW_REGISTRY_URL") {
            let registry = registry.trim();
            self.registry = (!registry.is_empty()).then(|| registry.to_string());
        }
        if let Some(v) = lookup("AGENTFLOW_CONCURRENCY") {
            self.probe_concurrency = parse_number("AGENTFLOW_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("AGENTFLOW_TIMEOUT_MS") {
            self.timeout_ms = parse_number("AGENTFLOW_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("AGENTFLOW_RETRIES") {
            self.retry_attempts = parse_number("AGENTFLOW_RETRIES", &v)?;
        }
        if let Some(v) = lookup("AGENTFLOW_MODE") {
            self.mode = match v.trim().to_ascii_lowercase().as_str() {
                "sequential" => ExecutionMode::Sequential,
                "parallel" => ExecutionMode::Parallel,
                other => {
                    return Err(OrchestratorError::Config(format!(
                        "AGENTFLOW_MODE must be 'sequential' or 'parallel', got '{}'",
                        other
                    )))
                }
            };
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.probe_concurrency == 0 {
            return Err(OrchestratorError::Config("probe_concurrency must be at least 1".into()));
        }
        if self.timeout_ms == 0 {
            return Err(OrchestratorError::Config("timeout_ms must be positive".into()));
        }
        if self.backoff.min_ms > self.backoff.max_ms {
            return Err(OrchestratorError::Config(format!(
                "backoff.min_ms ({}) exceeds backoff.max_ms ({})",
                self.backoff.min_ms, self.backoff.max_ms
            )));
        }
        if let Some(agent) = self.default_agents.iter().find(|a| a.id.trim().is_empty()) {
            return Err(OrchestratorError::Config(format!(
                "default agent at {} has an empty id",
                agent.address
            )));
        }
        if let Some(step) = duplicate_step_id(&self.workflow) {
            return Err(OrchestratorError::DuplicateStep { step: step.to_string() });
        }
        Ok(())
    }

    /// Retry policy shared by probe, negotiate and execute calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.timeout_ms))
            .with_backoff(self.backoff)
    }

    pub fn registry_source(&self) -> Option<RegistrySource> {
        self.registry.as_deref().map(RegistrySource::parse)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, OrchestratorError> {
    value
        .trim()
        .parse()
        .map_err(|_| OrchestratorError::Config(format!("{} must be a number, got '{}'", key, value)))
}
