//! Capability matcher — resolves workflow steps to agents.
//!
//! Two policies:
//!
//! - [`MatchPolicy::Preference`]: exact capability match, preferred ids
//!   first, then population order. One agent may serve several steps.
//! - [`MatchPolicy::GoalDriven`]: keyword scoring, each agent serves at
//!   most one step. Falls back to any unused agent when nothing scores.
//!
//! Matching is a pure function of its inputs, so re-running it on the same
//! population and steps yields the same assignments.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::types::{AgentDescriptor, MatchAssignment, WorkflowStep};
use crate::error::OrchestratorError;

/// How steps are resolved to agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Exact capability match with an optional preference order of agent ids.
    Preference {
        #[serde(default)]
        order: Vec<String>,
    },
    /// Exclusive assignment by keyword score. `keywords` maps a capability
    /// name to extra keywords on top of the capability name itself.
    GoalDriven {
        #[serde(default)]
        keywords: HashMap<String, Vec<String>>,
    },
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self::Preference { order: Vec::new() }
    }
}

impl MatchPolicy {
    pub fn preferring<I, S>(order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Preference {
            order: order.into_iter().map(Into::into).collect(),
        }
    }

    /// Goal-driven policy whose per-step keywords are the goal tokens that
    /// mention (or are mentioned by) each step's capability.
    pub fn goal_driven(goal: &str, steps: &[WorkflowStep]) -> Self {
        let tokens = keywords_from_goal(goal);
        let mut keywords = HashMap::new();
        for step in steps {
            let cap = step.capability.to_lowercase();
            let related: Vec<String> = tokens
                .iter()
                .filter(|t| t.contains(&cap) || cap.contains(t.as_str()))
                .cloned()
                .collect();
            if !related.is_empty() {
                keywords.insert(step.capability.clone(), related);
            }
        }
        Self::GoalDriven { keywords }
    }
}

/// Lowercase alphanumeric tokens of at least three characters, in order of
/// first appearance.
pub fn keywords_from_goal(goal: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    goal.split(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= 3)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Assignments plus the steps nobody could take.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchResult {
    /// In step order.
    pub assignments: Vec<MatchAssignment>,
    /// Ids of steps without an agent.
    pub unmatched: Vec<String>,
}

impl MatchResult {
    pub fn is_complete(&self) -> bool {
        self.unmatched.is_empty()
    }

    /// Assignments, or [`OrchestratorError::Unmatched`] when any step is
    /// uncovered. Partial assignment never proceeds.
    pub fn require_complete(self) -> Result<Vec<MatchAssignment>, OrchestratorError> {
        if self.unmatched.is_empty() {
            Ok(self.assignments)
        } else {
            Err(OrchestratorError::Unmatched {
                steps: self.unmatched,
            })
        }
    }
}

/// Resolve every step to an agent under `policy`.
pub fn match_steps(agents: &[AgentDescriptor], steps: &[WorkflowStep], policy: &MatchPolicy) -> MatchResult {
    let result = match policy {
        MatchPolicy::Preference { order } => match_by_preference(agents, steps, order),
        MatchPolicy::GoalDriven { keywords } => match_by_score(agents, steps, keywords),
    };
    for a in &result.assignments {
        log::debug!("Matched step '{}' ({}) -> {}", a.step.id, a.step.capability, a.agent.id);
    }
    if !result.unmatched.is_empty() {
        log::warn!("Unmatched step(s): {}", result.unmatched.join(", "));
    }
    result
}

fn match_by_preference(agents: &[AgentDescriptor], steps: &[WorkflowStep], order: &[String]) -> MatchResult {
    let mut result = MatchResult::default();
    for step in steps {
        let preferred = order.iter().find_map(|id| {
            agents
                .iter()
                .find(|a| &a.id == id && a.has_capability(&step.capability))
        });
        let chosen = preferred.or_else(|| agents.iter().find(|a| a.has_capability(&step.capability)));
        match chosen {
            Some(agent) => result.assignments.push(MatchAssignment {
                step: step.clone(),
                agent: agent.clone(),
            }),
            None => result.unmatched.push(step.id.clone()),
        }
    }
    result
}

/// Number of the agent's capability names containing any keyword.
pub fn score(agent: &AgentDescriptor, keywords: &[String]) -> usize {
    agent
        .capabilities
        .iter()
        .map(|c| c.to_lowercase())
        .filter(|c| keywords.iter().any(|k| c.contains(k.as_str())))
        .count()
}

fn match_by_score(
    agents: &[AgentDescriptor],
    steps: &[WorkflowStep],
    extra_keywords: &HashMap<String, Vec<String>>,
) -> MatchResult {
    let mut result = MatchResult::default();
    let mut chosen: HashSet<usize> = HashSet::new();

    for step in steps {
        let mut keywords = vec![step.capability.to_lowercase()];
        if let Some(extra) = extra_keywords.get(&step.capability) {
            keywords.extend(extra.iter().map(|k| k.to_lowercase()));
        }

        let mut ranked: Vec<(usize, usize)> = agents
            .iter()
            .enumerate()
            .map(|(idx, agent)| (idx, score(agent, &keywords)))
            .collect();
        // Stable: equal scores keep population order.
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        // Highest scorer first, zero scorers last; either way not yet chosen.
        let pick = ranked.iter().map(|(idx, _)| *idx).find(|idx| !chosen.contains(idx));
        match pick {
            Some(idx) => {
                chosen.insert(idx);
                result.assignments.push(MatchAssignment {
                    step: step.clone(),
                    agent: agents[idx].clone(),
                });
            }
            None => result.unmatched.push(step.id.clone()),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn population() -> Vec<AgentDescriptor> {
        vec![
            AgentDescriptor::new("a1", "http://a1").with_capabilities(["scan"]),
            AgentDescriptor::new("a2", "http://a2").with_capabilities(["report"]),
            AgentDescriptor::new("a3", "http://a3").with_capabilities(["scan", "report"]),
        ]
    }

    fn steps(caps: &[&str]) -> Vec<WorkflowStep> {
        caps.iter().map(|c| WorkflowStep::for_capability(*c)).collect()
    }

    fn ids(result: &MatchResult) -> Vec<&str> {
        result.assignments.iter().map(|a| a.agent.id.as_str()).collect()
    }

    #[test]
    fn test_population_order_wins_without_preferences() {
        let result = match_steps(&population(), &steps(&["scan", "report"]), &MatchPolicy::default());
        assert!(result.is_complete());
        assert_eq!(ids(&result), vec!["a1", "a2"]);
    }

    #[test]
    fn test_preference_order_and_shared_agents() {
        let policy = MatchPolicy::preferring(["a3", "a1"]);
        let result = match_steps(&population(), &steps(&["scan", "report"]), &policy);
        assert_eq!(ids(&result), vec!["a3", "a3"]);
    }

    #[test]
    fn test_preferred_agent_without_capability_is_skipped() {
        let policy = MatchPolicy::preferring(["a2", "missing"]);
        let result = match_steps(&population(), &steps(&["scan"]), &policy);
        assert_eq!(ids(&result), vec!["a1"]);
    }

    #[test]
    fn test_unmatched_steps_are_reported() {
        let result = match_steps(&population(), &steps(&["scan", "render"]), &MatchPolicy::default());
        assert_eq!(result.unmatched, vec!["render".to_string()]);
        let err = result.require_complete().unwrap_err();
        assert!(matches!(err, OrchestratorError::Unmatched { ref steps } if steps == &["render"]));
    }

    #[test]
    fn test_matching_is_idempotent() {
        let agents = population();
        let wanted = steps(&["report", "scan"]);
        for policy in [MatchPolicy::default(), MatchPolicy::GoalDriven { keywords: HashMap::new() }] {
            let first = match_steps(&agents, &wanted, &policy);
            let second = match_steps(&agents, &wanted, &policy);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_goal_driven_is_exclusive() {
        let policy = MatchPolicy::GoalDriven { keywords: HashMap::new() };
        // a3 scores 1 for both, but ties keep population order.
        let steps = vec![
            WorkflowStep::new("scan-1", "scan"),
            WorkflowStep::new("report", "report"),
            WorkflowStep::new("scan-2", "scan"),
        ];
        let result = match_steps(&population(), &steps, &policy);
        assert!(result.is_complete());
        assert_eq!(ids(&result), vec!["a1", "a2", "a3"]);
    }

    #[test]
    fn test_goal_driven_prefers_higher_score() {
        let agents = vec![
            AgentDescriptor::new("plain", "http://p").with_capabilities(["wallet-scan"]),
            AgentDescriptor::new("rich", "http://r")
                .with_capabilities(["wallet-scan", "balance-scan", "risk"]),
        ];
        let policy = MatchPolicy::GoalDriven { keywords: HashMap::new() };
        let result = match_steps(&agents, &steps(&["scan"]), &policy);
        assert_eq!(ids(&result), vec!["rich"]);
    }

    #[test]
    fn test_goal_driven_falls_back_to_unused_zero_scorer() {
        let agents = vec![
            AgentDescriptor::new("scanner", "http://s").with_capabilities(["scan"]),
            AgentDescriptor::new("idle", "http://i"),
        ];
        let policy = MatchPolicy::GoalDriven { keywords: HashMap::new() };
        let result = match_steps(&agents, &steps(&["scan", "archive", "render"]), &policy);
        assert_eq!(ids(&result), vec!["scanner", "idle"]);
        assert_eq!(result.unmatched, vec!["render".to_string()]);
    }

    #[test]
    fn test_extra_keywords_raise_score() {
        let agents = vec![
            AgentDescriptor::new("a", "http://a").with_capabilities(["pdf"]),
            AgentDescriptor::new("b", "http://b").with_capabilities(["report", "pdf-render"]),
        ];
        let mut keywords = HashMap::new();
        keywords.insert("report".to_string(), vec!["PDF".to_string()]);
        let result = match_steps(&agents, &steps(&["report"]), &MatchPolicy::GoalDriven { keywords });
        assert_eq!(ids(&result), vec!["b"]);
        assert_eq!(score(&agents[1], &["report".into(), "pdf".into()]), 2);
    }

    #[test]
    fn test_keywords_from_goal() {
        assert_eq!(
            keywords_from_goal("Scan the wallet, then REPORT on the wallet risk"),
            vec!["scan", "the", "wallet", "then", "report", "risk"]
        );
        let policy = MatchPolicy::goal_driven("wallet-scan and pdf report", &steps(&["scan", "archive"]));
        match policy {
            MatchPolicy::GoalDriven { keywords } => {
                assert_eq!(keywords["scan"], vec!["wallet-scan".to_string()]);
                assert!(!keywords.contains_key("archive"));
            }
            other => panic!("unexpected policy {:?}", other),
        }
    }
}
