//! Capability prober.
//!
//! Asks every candidate for its live capability set instead of trusting the
//! registry. A fixed pool of workers pulls agents off a queue, so at most
//! `concurrency_limit` probes are in flight and a hung agent only holds up
//! its own worker until the per-call deadline expires.
//!
//! The prober never fails: an agent that cannot be probed passes through
//! with whatever capabilities it already had.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use super::types::AgentDescriptor;
use crate::error::CallError;
use crate::transport::{AgentResponse, AgentTransport, RetryPolicy, CAPABILITIES_PATH};

/// Well-formed answer to a capability query.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityReport {
    pub id: Option<String>,
    pub name: Option<String>,
    pub capabilities: Vec<String>,
    /// Any other top-level fields.
    pub extra: serde_json::Map<String, Value>,
}

/// Validate a capability response. Anything but a 2xx object with a
/// `capabilities` array of strings is a protocol error.
pub fn parse_capability_report(url: &str, resp: &AgentResponse) -> Result<CapabilityReport, CallError> {
    let reject = |message: &str| {
        Err(CallError::protocol(
            url,
            message,
            Some(resp.status),
            Some(resp.body.clone()),
        ))
    };
    if !resp.is_success() {
        return reject("capability query returned a non-success status");
    }
    let Some(obj) = resp.body.as_object() else {
        return reject("capability response is not an object");
    };
    let Some(list) = obj.get("capabilities").and_then(Value::as_array) else {
        return reject("capability response has no capabilities array");
    };
    let mut capabilities = Vec::with_capacity(list.len());
    for item in list {
        match item.as_str() {
            Some(cap) => capabilities.push(cap.to_string()),
            None => return reject("capabilities must be strings"),
        }
    }

    let extra = obj
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "id" | "name" | "capabilities"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(CapabilityReport {
        id: obj.get("id").and_then(Value::as_str).map(str::to_string),
        name: obj
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        capabilities,
        extra,
    })
}

/// Fold a fresh report into a copy of `agent`.
///
/// The registry id is authoritative; a differing self-reported id is kept
/// in metadata as `reported_id`.
pub fn merge_report(agent: &AgentDescriptor, report: CapabilityReport) -> AgentDescriptor {
    let mut merged = agent.clone();
    merged.capabilities = report.capabilities;
    if report.name.is_some() {
        merged.name = report.name;
    }
    for (key, value) in report.extra {
        merged.metadata.insert(key, value);
    }
    if let Some(reported) = report.id.filter(|id| *id != agent.id) {
        merged
            .metadata
            .insert("reported_id".to_string(), Value::String(reported));
    }
    merged
}

/// Keep one record per id, the one that settled last, and order the
/// survivors by the input position where each id first appeared.
///
/// `settled` is in completion order; each record carries its input index.
pub fn dedup_last_wins(settled: Vec<(usize, AgentDescriptor)>) -> Vec<AgentDescriptor> {
    let mut by_id: HashMap<String, (usize, AgentDescriptor)> =
        HashMap::with_capacity(settled.len());
    for (position, agent) in settled {
        match by_id.get_mut(&agent.id) {
            Some(slot) => {
                slot.0 = slot.0.min(position);
                slot.1 = agent;
            }
            None => {
                by_id.insert(agent.id.clone(), (position, agent));
            }
        }
    }
    let mut survivors: Vec<(usize, AgentDescriptor)> = by_id.into_values().collect();
    survivors.sort_by_key(|(position, _)| *position);
    survivors.into_iter().map(|(_, agent)| agent).collect()
}

/// Bounded-concurrency capability prober.
pub struct CapabilityProber {
    transport: Arc<dyn AgentTransport>,
    concurrency_limit: usize,
    policy: RetryPolicy,
}

impl CapabilityProber {
    /// `concurrency_limit` is clamped to at least 1.
    pub fn new(transport: Arc<dyn AgentTransport>, concurrency_limit: usize, policy: RetryPolicy) -> Self {
        Self {
            transport,
            concurrency_limit: concurrency_limit.max(1),
            policy,
        }
    }

    /// Probe every agent and return the refreshed, deduplicated population.
    ///
    /// Output keeps input order regardless of which probes finish first.
    pub async fn probe(&self, agents: Vec<AgentDescriptor>, cancel: &CancellationToken) -> Vec<AgentDescriptor> {
        if agents.is_empty() {
            return agents;
        }
        let total = agents.len();
        let workers = self.concurrency_limit.min(total);

        let (task_tx, task_rx) = mpsc::channel::<(usize, AgentDescriptor)>(total);
        for record in agents.into_iter().enumerate() {
            // Capacity equals the number of agents, so this never waits.
            if task_tx.send(record).await.is_err() {
                break;
            }
        }
        drop(task_tx);
        let task_rx = Mutex::new(task_rx);
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<(usize, AgentDescriptor)>();

        let task_rx = &task_rx;
        let pool: Vec<_> = (0..workers)
            .map(|_| {
                let done_tx = done_tx.clone();
                async move {
                    loop {
                        let next = task_rx.lock().await.recv().await;
                        let Some((position, agent)) = next else { break };
                        let probed = self.probe_one(agent, cancel).await;
                        if done_tx.send((position, probed)).is_err() {
                            break;
                        }
                    }
                }
            })
            .collect();
        drop(done_tx);
        futures::future::join_all(pool).await;

        let mut settled = Vec::with_capacity(total);
        while let Ok(record) = done_rx.try_recv() {
            settled.push(record);
        }
        let probed = dedup_last_wins(settled);
        log::info!(
            "Probed {} agent(s) with {} worker(s); {} unique",
            total,
            workers,
            probed.len()
        );
        probed
    }

    async fn probe_one(&self, agent: AgentDescriptor, cancel: &CancellationToken) -> AgentDescriptor {
        let url = agent.endpoint(CAPABILITIES_PATH);
        let url_ref = url.as_str();
        let transport = self.transport.as_ref();

        let attempted = self
            .policy
            .run(cancel, move |_| async move {
                let resp = transport.get(url_ref).await?;
                parse_capability_report(url_ref, &resp)
            })
            .await;

        match attempted.result {
            Ok(report) => {
                log::debug!(
                    "Probed {} ({}): {:?}",
                    agent.id,
                    agent.label(),
                    report.capabilities
                );
                merge_report(&agent, report)
            }
            Err(e) => {
                log::warn!(
                    "Probe of {} failed after {} attempt(s), keeping registry capabilities: {}",
                    agent.id,
                    attempted.attempts,
                    e
                );
                agent
            }
        }
    }
}
