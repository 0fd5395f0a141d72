//! Negotiator — asks each matched agent to commit to its step.
//!
//! Agents signal acceptance in several ways: a status token
//! (`"accept"`, `{"status": "accepted"}`), a boolean flag
//! (`{"accept": true}`), or, for lenient agents, nothing but a 2xx.
//! [`normalize_negotiation`] is the single place that reads those raw
//! shapes; everything else works on [`NegotiationSignal`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::types::{MatchAssignment, NegotiationOutcome, NegotiationSignal};
use crate::error::CallError;
use crate::transport::{AgentResponse, AgentTransport, RetryPolicy, NEGOTIATE_PATH};

const ACCEPT_TOKENS: &[&str] = &["accept", "accepted", "ok", "agree", "agreed", "yes", "confirmed"];
const REJECT_TOKENS: &[&str] = &[
    "reject", "rejected", "decline", "declined", "refuse", "refused", "deny", "denied", "no",
];

/// How a response without an explicit signal is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationPolicy {
    /// Only an explicit affirmative counts (fail-closed).
    #[default]
    Strict,
    /// A bare 2xx without a contrary signal also counts as acceptance.
    Permissive,
}

/// Map a raw negotiate response to a signal.
pub fn normalize_negotiation(resp: &AgentResponse, policy: NegotiationPolicy) -> NegotiationSignal {
    let explicit = explicit_signal(&resp.body);
    match explicit {
        Some(NegotiationSignal::Accepted) if resp.is_success() => NegotiationSignal::Accepted,
        Some(NegotiationSignal::Rejected) => NegotiationSignal::Rejected,
        // An affirmative body on an error status is not trusted.
        Some(_) => NegotiationSignal::Unknown,
        None if resp.is_success() && policy == NegotiationPolicy::Permissive => {
            NegotiationSignal::Accepted
        }
        None => NegotiationSignal::Unknown,
    }
}

fn explicit_signal(body: &Value) -> Option<NegotiationSignal> {
    match body {
        Value::String(token) => token_signal(token),
        Value::Bool(flag) => Some(flag_signal(*flag)),
        Value::Object(obj) => {
            for key in ["accept", "accepted"] {
                if let Some(flag) = obj.get(key).and_then(Value::as_bool) {
                    return Some(flag_signal(flag));
                }
            }
            ["status", "decision", "result"]
                .iter()
                .filter_map(|key| obj.get(*key).and_then(Value::as_str))
                .find_map(token_signal)
        }
        _ => None,
    }
}

fn token_signal(token: &str) -> Option<NegotiationSignal> {
    let token = token.trim().to_ascii_lowercase();
    if ACCEPT_TOKENS.contains(&token.as_str()) {
        Some(NegotiationSignal::Accepted)
    } else if REJECT_TOKENS.contains(&token.as_str()) {
        Some(NegotiationSignal::Rejected)
    } else {
        None
    }
}

fn flag_signal(flag: bool) -> NegotiationSignal {
    if flag {
        NegotiationSignal::Accepted
    } else {
        NegotiationSignal::Rejected
    }
}

/// Aggregate view over a negotiation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationVerdict {
    AllAccepted,
    SomeAccepted,
    NoneAccepted,
}

impl NegotiationVerdict {
    /// An empty round counts as all accepted.
    pub fn from_outcomes(outcomes: &[NegotiationOutcome]) -> Self {
        let accepted = outcomes.iter().filter(|o| o.accepted).count();
        if accepted == outcomes.len() {
            Self::AllAccepted
        } else if accepted > 0 {
            Self::SomeAccepted
        } else {
            Self::NoneAccepted
        }
    }
}

/// Distinct ids of agents that did not accept, in outcome order.
pub fn rejected_agents(outcomes: &[NegotiationOutcome]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for outcome in outcomes.iter().filter(|o| !o.accepted) {
        if !ids.contains(&outcome.agent_id) {
            ids.push(outcome.agent_id.clone());
        }
    }
    ids
}

/// Sends proposals and collects one outcome per assignment.
pub struct Negotiator {
    transport: Arc<dyn AgentTransport>,
    policy: RetryPolicy,
    mode: NegotiationPolicy,
}

impl Negotiator {
    pub fn new(transport: Arc<dyn AgentTransport>, policy: RetryPolicy, mode: NegotiationPolicy) -> Self {
        Self {
            transport,
            policy,
            mode,
        }
    }

    /// Negotiate every assignment concurrently.
    ///
    /// Never short-circuits: a rejection by one agent does not stop the
    /// others. Outcomes come back in assignment order.
    pub async fn negotiate(
        &self,
        assignments: &[MatchAssignment],
        proposal: &Value,
        cancel: &CancellationToken,
    ) -> Vec<NegotiationOutcome> {
        let rounds = assignments
            .iter()
            .map(|assignment| self.negotiate_one(assignment, proposal, cancel));
        let outcomes = futures::future::join_all(rounds).await;

        log::info!(
            "Negotiation: {}/{} accepted ({:?})",
            outcomes.iter().filter(|o| o.accepted).count(),
            outcomes.len(),
            NegotiationVerdict::from_outcomes(&outcomes)
        );
        outcomes
    }

    async fn negotiate_one(
        &self,
        assignment: &MatchAssignment,
        proposal: &Value,
        cancel: &CancellationToken,
    ) -> NegotiationOutcome {
        let agent = &assignment.agent;
        let url = agent.endpoint(NEGOTIATE_PATH);
        let body = proposal_for(assignment, proposal);
        let (url_ref, body_ref) = (url.as_str(), &body);
        let transport = self.transport.as_ref();
        let mode = self.mode;

        let attempted = self
            .policy
            .run(cancel, move |_| async move {
                let resp = transport.post(url_ref, body_ref).await?;
                match normalize_negotiation(&resp, mode) {
                    NegotiationSignal::Accepted => Ok(resp),
                    signal => Err(CallError::protocol(
                        url_ref,
                        format!("negotiation {:?}", signal).to_lowercase(),
                        Some(resp.status),
                        Some(resp.body),
                    )),
                }
            })
            .await;

        let mut outcome = NegotiationOutcome {
            agent_id: agent.id.clone(),
            step_id: assignment.step.id.clone(),
            accepted: false,
            signal: NegotiationSignal::Unknown,
            status_code: None,
            response: None,
            error: None,
            attempts: attempted.attempts,
        };
        match attempted.result {
            Ok(resp) => {
                outcome.accepted = true;
                outcome.signal = NegotiationSignal::Accepted;
                outcome.status_code = Some(resp.status);
                outcome.response = Some(resp.body);
            }
            Err(e) => {
                if let (Some(status), Some(body)) = (e.status_code(), e.body()) {
                    outcome.signal =
                        normalize_negotiation(&AgentResponse::new(status, body.clone()), mode);
                    outcome.response = Some(body.clone());
                }
                outcome.status_code = e.status_code();
                log::warn!(
                    "Agent {} did not accept step '{}' after {} attempt(s): {}",
                    agent.id,
                    assignment.step.id,
                    attempted.attempts,
                    e
                );
                outcome.error = Some(e.to_string());
            }
        }
        outcome
    }
}

/// Object proposals gain `step` and `capability` fields unless the caller
/// already set them; other proposals are sent unchanged.
fn proposal_for(assignment: &MatchAssignment, proposal: &Value) -> Value {
    let mut body = proposal.clone();
    if let Value::Object(ref mut obj) = body {
        obj.entry("step")
            .or_insert_with(|| Value::String(assignment.step.id.clone()));
        obj.entry("capability")
            .or_insert_with(|| Value::String(assignment.step.capability.clone()));
    }
    body
}
