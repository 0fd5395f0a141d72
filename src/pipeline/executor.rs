//! Workflow executor.
//!
//! Sequential runs pipe each step's validated `output` into the next step
//! and stop at the first step that exhausts its attempts. Parallel runs
//! fire every step at once with the initial payload and never stop early.
//!
//! An execute call is only accepted when the agent answers
//! `{"status": "done", "output": ...}`; anything else, including a 2xx with
//! a different shape, burns an attempt like a network failure would.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::types::{
    ExecutionLogEntry, ExecutionMode, ExecutionResult, ExecutionStatus, MatchAssignment,
};
use crate::error::CallError;
use crate::transport::{AgentResponse, AgentTransport, RetryPolicy, EXECUTE_PATH};

/// Status token that marks a finished execute call.
pub const DONE_STATUS: &str = "done";

/// Extract `output` from a finished execute response.
pub fn validate_execution(url: &str, resp: &AgentResponse) -> Result<Value, CallError> {
    let reject = |message: String| {
        CallError::protocol(url, message, Some(resp.status), Some(resp.body.clone()))
    };
    if !resp.is_success() {
        return Err(reject(format!("execute returned HTTP {}", resp.status)));
    }
    let status = resp.body.get("status").and_then(Value::as_str);
    if status != Some(DONE_STATUS) {
        return Err(reject(format!(
            "execute status is {:?}, expected \"{}\"",
            status.unwrap_or("<missing>"),
            DONE_STATUS
        )));
    }
    resp.body
        .get("output")
        .cloned()
        .ok_or_else(|| reject("execute response has no output".to_string()))
}

/// Runs matched assignments against their agents.
pub struct WorkflowExecutor {
    transport: Arc<dyn AgentTransport>,
    policy: RetryPolicy,
}

impl WorkflowExecutor {
    pub fn new(transport: Arc<dyn AgentTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Execute `assignments` in `mode`, starting from `initial`.
    pub async fn execute(
        &self,
        assignments: &[MatchAssignment],
        initial: Value,
        mode: ExecutionMode,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        log::info!("Executing {} step(s) in {:?} mode", assignments.len(), mode);
        match mode {
            ExecutionMode::Sequential => self.run_sequential(assignments, initial, cancel).await,
            ExecutionMode::Parallel => self.run_parallel(assignments, initial, cancel).await,
        }
    }

    async fn run_sequential(
        &self,
        assignments: &[MatchAssignment],
        initial: Value,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let mut log = Vec::with_capacity(assignments.len());
        let mut payload = initial;

        for assignment in assignments {
            let body = assignment.step.request_body(&payload);
            let entry = self.run_step(assignment, &body, cancel).await;
            let succeeded = entry.success;
            let error = entry.error.clone();
            if let Some(ref output) = entry.payload {
                payload = output.clone();
            }
            log.push(entry);

            if !succeeded {
                log::warn!(
                    "Aborting workflow at step '{}' (agent {})",
                    assignment.step.id,
                    assignment.agent.id
                );
                return ExecutionResult {
                    mode: ExecutionMode::Sequential,
                    status: ExecutionStatus::Failed,
                    log,
                    output: None,
                    failed_step: Some(assignment.step.id.clone()),
                    failed_agent: Some(assignment.agent.id.clone()),
                    error,
                };
            }
        }

        ExecutionResult {
            mode: ExecutionMode::Sequential,
            status: ExecutionStatus::Succeeded,
            log,
            output: Some(payload),
            failed_step: None,
            failed_agent: None,
            error: None,
        }
    }

    async fn run_parallel(
        &self,
        assignments: &[MatchAssignment],
        initial: Value,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let bodies: Vec<Value> = assignments
            .iter()
            .map(|a| a.step.request_body(&initial))
            .collect();
        let calls = assignments
            .iter()
            .zip(bodies.iter())
            .map(|(assignment, body)| self.run_step(assignment, body, cancel));
        let log = futures::future::join_all(calls).await;

        let succeeded = log.iter().filter(|e| e.success).count();
        let status = if succeeded == log.len() {
            ExecutionStatus::Succeeded
        } else if succeeded > 0 {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Failed
        };
        let (failed_step, failed_agent, error) = match log.iter().find(|e| !e.success) {
            Some(e) => (Some(e.step_id.clone()), Some(e.agent_id.clone()), e.error.clone()),
            None => (None, None, None),
        };

        let mut result = ExecutionResult {
            mode: ExecutionMode::Parallel,
            status,
            log,
            output: None,
            failed_step,
            failed_agent,
            error,
        };
        if succeeded > 0 {
            result.output = Some(Value::Object(result.outputs()));
        }
        result
    }

    /// One step, all attempts, one log entry.
    async fn run_step(
        &self,
        assignment: &MatchAssignment,
        body: &Value,
        cancel: &CancellationToken,
    ) -> ExecutionLogEntry {
        let url = assignment.agent.endpoint(EXECUTE_PATH);
        let url_ref = url.as_str();
        let transport = self.transport.as_ref();

        let attempted = self
            .policy
            .run(cancel, move |attempt| async move {
                log::debug!("POST {} (attempt {})", url_ref, attempt);
                let resp = transport.post(url_ref, body).await?;
                let output = validate_execution(url_ref, &resp)?;
                Ok((resp.status, output))
            })
            .await;

        let mut entry = ExecutionLogEntry {
            step_id: assignment.step.id.clone(),
            agent_id: assignment.agent.id.clone(),
            success: false,
            status_code: None,
            duration_ms: attempted.elapsed.as_millis() as u64,
            attempts: attempted.attempts,
            error: None,
            payload: None,
            response: None,
        };
        match attempted.result {
            Ok((status, output)) => {
                log::debug!(
                    "Step '{}' done by {} in {} ms",
                    entry.step_id,
                    entry.agent_id,
                    entry.duration_ms
                );
                entry.success = true;
                entry.status_code = Some(status);
                entry.payload = Some(output);
            }
            Err(e) => {
                entry.status_code = e.status_code();
                entry.response = e.body().cloned();
                entry.error = Some(e.to_string());
            }
        }
        entry
    }
}
