//! Orchestrator facade — runs the whole pipeline for one workflow.
//!
//! ```rust,no_run
//! use agentflow::config::OrchestratorConfig;
//! use agentflow::orchestrator::{Orchestrator, WorkflowRequest};
//! use agentflow::pipeline::{AgentDescriptor, WorkflowStep};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = OrchestratorConfig::default();
//! config.default_agents = vec![
//!     AgentDescriptor::new("a1", "http://127.0.0.1:7001"),
//!     AgentDescriptor::new("a2", "http://127.0.0.1:7002"),
//! ];
//! let orchestrator = Orchestrator::new(config)?;
//! let request = WorkflowRequest::new(vec![
//!     WorkflowStep::for_capability("scan"),
//!     WorkflowStep::for_capability("report"),
//! ])
//! .with_payload(serde_json::json!({"address": "0xabc"}));
//! let report = orchestrator.run(request).await?;
//! println!("{}", report.output.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::pipeline::matcher::match_steps;
use crate::pipeline::negotiator::rejected_agents;
use crate::pipeline::types::{
    duplicate_step_id, AgentDescriptor, ExecutionLogEntry, ExecutionMode, ExecutionStatus,
    NegotiationOutcome, WorkflowStep,
};
use crate::pipeline::{CapabilityProber, Negotiator, RegistryLoader, WorkflowExecutor};
use crate::transport::{AgentTransport, HttpAgentTransport};

/// One workflow to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub steps: Vec<WorkflowStep>,
    /// Input of the first step (sequential) or of every step (parallel).
    #[serde(default)]
    pub initial_payload: Value,
    /// Overrides the configured proposal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal: Option<Value>,
    /// Overrides the configured execution mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
}

impl WorkflowRequest {
    pub fn new(steps: Vec<WorkflowStep>) -> Self {
        Self {
            steps,
            initial_payload: Value::Null,
            proposal: None,
            mode: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.initial_payload = payload;
        self
    }

    pub fn with_proposal(mut self, proposal: Value) -> Self {
        self.proposal = Some(proposal);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// Result of a workflow that ran to completion (fully or, in parallel
/// mode, partially).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub workflow_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Successful step outputs keyed by step id.
    pub outputs: serde_json::Map<String, Value>,
    pub log: Vec<ExecutionLogEntry>,
    pub negotiation: Vec<NegotiationOutcome>,
    pub agents_used: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Composes registry → probe → match → negotiate → execute.
pub struct Orchestrator {
    config: OrchestratorConfig,
    transport: Arc<dyn AgentTransport>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("transport", &"<transport>")
            .finish()
    }
}

impl Orchestrator {
    /// Orchestrator over HTTP.
    pub fn new(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let transport = HttpAgentTransport::new()
            .map_err(|e| OrchestratorError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Orchestrator over a caller-supplied transport.
    pub fn with_transport(config: OrchestratorConfig, transport: Arc<dyn AgentTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Load the population (or defaults) and probe it.
    pub async fn discover(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<AgentDescriptor>, OrchestratorError> {
        let loader = RegistryLoader::new(self.transport.clone());
        let source = self.config.registry_source();
        let candidates = loader
            .load_or_default(
                source.as_ref(),
                self.config.registry_timeout(),
                &self.config.default_agents,
            )
            .await?;

        let prober = CapabilityProber::new(
            self.transport.clone(),
            self.config.probe_concurrency,
            self.config.retry_policy(),
        );
        let agents = prober.probe(candidates, cancel).await;
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled { log: Vec::new() });
        }
        Ok(agents)
    }

    /// Run a workflow to completion.
    pub async fn run(&self, request: WorkflowRequest) -> Result<WorkflowReport, OrchestratorError> {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run a workflow, stopping promptly once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        request: WorkflowRequest,
        cancel: &CancellationToken,
    ) -> Result<WorkflowReport, OrchestratorError> {
        if request.steps.is_empty() {
            return Err(OrchestratorError::EmptyWorkflow);
        }
        if let Some(step) = duplicate_step_id(&request.steps) {
            return Err(OrchestratorError::DuplicateStep { step: step.to_string() });
        }
        let workflow_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        log::info!("Workflow {}: {} step(s)", workflow_id, request.steps.len());

        let agents = self.discover(cancel).await?;

        let assignments =
            match_steps(&agents, &request.steps, &self.config.matching).require_complete()?;

        let proposal = request
            .proposal
            .clone()
            .unwrap_or_else(|| self.config.proposal.clone());
        let negotiator = Negotiator::new(
            self.transport.clone(),
            self.config.retry_policy(),
            self.config.negotiation,
        );
        let negotiation = negotiator.negotiate(&assignments, &proposal, cancel).await;
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled { log: Vec::new() });
        }
        let refused = rejected_agents(&negotiation);
        if !refused.is_empty() {
            return Err(OrchestratorError::NegotiationRejected {
                agents: refused,
                outcomes: negotiation,
            });
        }

        let mode = request.mode.unwrap_or(self.config.mode);
        let executor = WorkflowExecutor::new(self.transport.clone(), self.config.retry_policy());
        let result = executor
            .execute(&assignments, request.initial_payload, mode, cancel)
            .await;
        // A run that finished every step stands even if the token fired late.
        if result.status != ExecutionStatus::Succeeded && cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled { log: result.log });
        }

        if result.status == ExecutionStatus::Failed {
            return Err(OrchestratorError::PipelineAborted {
                step: result.failed_step.clone().unwrap_or_default(),
                agent: result.failed_agent.clone().unwrap_or_default(),
                message: result
                    .error
                    .clone()
                    .unwrap_or_else(|| "step failed".to_string()),
                log: result.log,
            });
        }

        log::info!("Workflow {} finished: {:?}", workflow_id, result.status);
        Ok(WorkflowReport {
            workflow_id,
            status: result.status,
            outputs: result.outputs(),
            agents_used: result.agents_used(),
            output: result.output,
            log: result.log,
            negotiation,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::matcher::MatchPolicy;
    use crate::testing::ScriptedTransport;
    use crate::transport::{AgentResponse, Backoff};
    use serde_json::json;
    use std::time::Duration;

    const REGISTRY: &str = "http://registry/agents";

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            registry: Some(REGISTRY.to_string()),
            timeout_ms: 300,
            retry_attempts: 1,
            backoff: Backoff::none(),
            ..OrchestratorConfig::default()
        }
    }

    /// a1 scans a wallet, a2 renders a report from the scan.
    fn wallet_agents() -> ScriptedTransport {
        ScriptedTransport::new()
            .respond(
                REGISTRY,
                200,
                json!([
                    {"id": "a1", "address": "http://x", "capabilities": ["scan"]},
                    {"id": "a2", "address": "http://y", "capabilities": ["report"]}
                ]),
            )
            .respond(
                "http://x/capabilities",
                200,
                json!({"id": "a1", "name": "scanner", "capabilities": ["scan"]}),
            )
            .respond(
                "http://y/capabilities",
                200,
                json!({"id": "a2", "name": "reporter", "capabilities": ["report"]}),
            )
            .respond("http://x/negotiate", 200, json!({"status": "accept"}))
            .on("http://x/execute", |_, body| {
                assert_eq!(body.unwrap()["address"], "0xabc");
                Ok(AgentResponse::new(200, json!({"status": "done", "output": {"balance": "1.5"}})))
            })
            .on("http://y/execute", |_, body| {
                assert_eq!(body.unwrap(), &json!({"balance": "1.5"}));
                Ok(AgentResponse::new(
                    200,
                    json!({"status": "done", "output": {"report": "balance 1.5, risk low"}}),
                ))
            })
    }

    fn scan_then_report() -> WorkflowRequest {
        WorkflowRequest::new(vec![
            WorkflowStep::for_capability("scan"),
            WorkflowStep::for_capability("report"),
        ])
        .with_payload(json!({"address": "0xabc"}))
    }

    #[tokio::test]
    async fn test_end_to_end_success() {
        let transport = Arc::new(
            wallet_agents().respond("http://y/negotiate", 200, json!({"accept": true})),
        );
        let orchestrator = Orchestrator::with_transport(config(), transport.clone());

        let report = orchestrator.run(scan_then_report()).await.unwrap();

        assert_eq!(report.status, ExecutionStatus::Succeeded);
        assert_eq!(report.log.len(), 2);
        assert_eq!(report.log[0].agent_id, "a1");
        assert_eq!(report.log[1].agent_id, "a2");
        assert_eq!(report.output, Some(json!({"report": "balance 1.5, risk low"})));
        assert_eq!(report.outputs["scan"], json!({"balance": "1.5"}));
        assert_eq!(report.agents_used, vec!["a1".to_string(), "a2".to_string()]);
        assert!(report.negotiation.iter().all(|o| o.accepted));
        assert_eq!(transport.calls("http://x/capabilities"), 1);
    }

    #[tokio::test]
    async fn test_rejected_negotiation_blocks_execution() {
        let transport = Arc::new(
            wallet_agents().respond("http://y/negotiate", 200, json!({"status": "rejected"})),
        );
        let orchestrator = Orchestrator::with_transport(config(), transport.clone());

        let err = orchestrator.run(scan_then_report()).await.unwrap_err();

        match err {
            OrchestratorError::NegotiationRejected { ref agents, ref outcomes } => {
                assert_eq!(agents, &vec!["a2".to_string()]);
                assert_eq!(outcomes.len(), 2);
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(transport.calls("http://x/execute"), 0);
        assert_eq!(transport.calls("http://y/execute"), 0);
    }

    #[tokio::test]
    async fn test_unmatched_step_skips_negotiation() {
        let transport = Arc::new(
            wallet_agents().respond("http://y/negotiate", 200, json!({"accept": true})),
        );
        let orchestrator = Orchestrator::with_transport(config(), transport.clone());
        let request = WorkflowRequest::new(vec![
            WorkflowStep::for_capability("scan"),
            WorkflowStep::for_capability("archive"),
        ]);

        let err = orchestrator.run(request).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Unmatched { ref steps } if steps == &["archive"]));
        assert_eq!(transport.calls("http://x/negotiate"), 0);
        assert_eq!(transport.calls("http://x/execute"), 0);
    }

    #[tokio::test]
    async fn test_empty_registry_uses_defaults() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .respond(REGISTRY, 503, json!({}))
                .agent("http://fallback", "fb", &["scan"]),
        );
        let mut cfg = config();
        cfg.default_agents = vec![AgentDescriptor::new("fb", "http://fallback")];
        let orchestrator = Orchestrator::with_transport(cfg, transport);

        let agents = orchestrator.discover(&CancellationToken::new()).await.unwrap();
        assert_eq!(agents.len(), 1);
        assert!(agents[0].has_capability("scan"));

        let report = orchestrator
            .run(WorkflowRequest::new(vec![WorkflowStep::for_capability("scan")]).with_payload(json!(1)))
            .await
            .unwrap();
        assert_eq!(report.output, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_no_agents_anywhere() {
        let orchestrator = Orchestrator::with_transport(config(), Arc::new(ScriptedTransport::new()));
        let err = orchestrator.run(scan_then_report()).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NoAgents));
    }

    #[tokio::test]
    async fn test_pipeline_abort_carries_log() {
        let transport = Arc::new(
            wallet_agents()
                .respond("http://y/negotiate", 200, json!({"accept": true}))
                .respond("http://y/execute", 200, json!({"status": "error", "message": "disk full"})),
        );
        let orchestrator = Orchestrator::with_transport(config(), transport.clone());

        let err = orchestrator.run(scan_then_report()).await.unwrap_err();

        assert_eq!(err.step(), Some("report"));
        assert_eq!(err.agent(), Some("a2"));
        assert_eq!(err.log().len(), 2);
        assert!(err.log()[0].success);
        assert_eq!(err.log()[1].response.as_ref().unwrap()["message"], "disk full");
        assert_eq!(transport.calls("http://y/execute"), 2);
    }

    #[tokio::test]
    async fn test_goal_driven_policy_from_config() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .agent("http://p", "p", &["scan"])
                .agent("http://q", "q", &["scan", "deep-scan"]),
        );
        let mut cfg = config();
        cfg.registry = None;
        cfg.default_agents = vec![
            AgentDescriptor::new("p", "http://p"),
            AgentDescriptor::new("q", "http://q"),
        ];
        cfg.matching = MatchPolicy::GoalDriven { keywords: Default::default() };
        let orchestrator = Orchestrator::with_transport(cfg, transport);

        let report = orchestrator
            .run(WorkflowRequest::new(vec![
                WorkflowStep::new("first", "scan"),
                WorkflowStep::new("second", "scan"),
            ]))
            .await
            .unwrap();
        assert_eq!(report.agents_used, vec!["q".to_string(), "p".to_string()]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_run() {
        let transport = Arc::new(
            wallet_agents()
                .respond("http://y/negotiate", 200, json!({"accept": true}))
                .with_delay("http://x/execute", Duration::from_secs(30)),
        );
        let mut cfg = config();
        cfg.timeout_ms = 60_000;
        let orchestrator = Orchestrator::with_transport(cfg, transport.clone());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = orchestrator
            .run_with_cancel(scan_then_report(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled { .. }));
        assert_eq!(err.log().len(), 1);
        assert_eq!(transport.calls("http://y/execute"), 0);
    }

    fn cancel_after(delay: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            trigger.cancel();
        });
        cancel
    }

    #[tokio::test]
    async fn test_cancellation_stops_discovery() {
        let transport = Arc::new(
            wallet_agents().with_delay("http://x/capabilities", Duration::from_secs(30)),
        );
        let mut cfg = config();
        cfg.timeout_ms = 60_000;
        let orchestrator = Orchestrator::with_transport(cfg, transport.clone());
        let cancel = cancel_after(Duration::from_millis(100));

        let started = std::time::Instant::now();
        let err = orchestrator.discover(&cancel).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.calls("http://x/capabilities"), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_negotiation() {
        let transport = Arc::new(
            wallet_agents()
                .respond("http://y/negotiate", 200, json!({"accept": true}))
                .with_delay("http://x/negotiate", Duration::from_secs(30)),
        );
        let mut cfg = config();
        cfg.timeout_ms = 60_000;
        let orchestrator = Orchestrator::with_transport(cfg, transport.clone());
        let cancel = cancel_after(Duration::from_millis(100));

        let started = std::time::Instant::now();
        let err = orchestrator
            .run_with_cancel(scan_then_report(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled { .. }));
        assert!(err.log().is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(transport.calls("http://x/execute"), 0);
        assert_eq!(transport.calls("http://y/execute"), 0);
    }

    #[tokio::test]
    async fn test_late_cancellation_keeps_finished_run() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let transport = Arc::new(
            wallet_agents()
                .respond("http://y/negotiate", 200, json!({"accept": true}))
                .on("http://y/execute", move |_, _| {
                    // The last step answers, then the caller gives up.
                    trigger.cancel();
                    Ok(AgentResponse::new(200, json!({"status": "done", "output": "ok"})))
                }),
        );
        let orchestrator = Orchestrator::with_transport(config(), transport);

        let report = orchestrator
            .run_with_cancel(scan_then_report(), &cancel)
            .await
            .unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(report.status, ExecutionStatus::Succeeded);
        assert_eq!(report.output, Some(json!("ok")));
        assert_eq!(report.log.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_step_ids_rejected() {
        let transport = Arc::new(
            wallet_agents().respond("http://y/negotiate", 200, json!({"accept": true})),
        );
        let orchestrator = Orchestrator::with_transport(config(), transport.clone());
        let request = WorkflowRequest::new(vec![
            WorkflowStep::new("step", "scan"),
            WorkflowStep::new("step", "report"),
        ]);

        let err = orchestrator.run(request).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateStep { ref step } if step == "step"));
        assert_eq!(err.step(), Some("step"));
        assert_eq!(transport.calls(REGISTRY), 0);
    }

    #[tokio::test]
    async fn test_empty_workflow_rejected() {
        let orchestrator = Orchestrator::with_transport(config(), Arc::new(ScriptedTransport::new()));
        let err = orchestrator.run(WorkflowRequest::new(Vec::new())).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::EmptyWorkflow));
    }
}
