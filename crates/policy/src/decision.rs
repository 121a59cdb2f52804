//! Policy verdicts.

use serde::{Deserialize, Serialize};

/// The policy engine's verdict for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Deny,
    Review,
    Simulate,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Decision::Allow => "ALLOW",
            Decision::Deny => "DENY",
            Decision::Review => "REVIEW",
            Decision::Simulate => "SIMULATE",
        })
    }
}

/// Follow-up steps a decision demands before the action may run for real.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Requirement {
    HumanApproval,
    Capability,
    AuditTrail,
    BudgetCheck,
    BackupRequired,
}

/// Overrides the engine forces onto a working copy of the request metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_gate: Option<bool>,
}

impl MetaPatch {
    /// Safe defaults for anything routed to human review.
    pub fn force_review() -> Self {
        Self {
            dry_run: Some(true),
            human_gate: Some(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<Requirement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<MetaPatch>,
    /// Name of the rule that produced this decision.
    pub rule: String,
}

impl PolicyDecision {
    pub fn new(decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            decision,
            reason: reason.into(),
            required: Vec::new(),
            patch: None,
            rule: String::new(),
        }
    }

    pub fn allow(reason: impl Into<String>) -> Self {
        Self::new(Decision::Allow, reason)
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self::new(Decision::Deny, reason)
    }

    pub fn review(reason: impl Into<String>) -> Self {
        Self::new(Decision::Review, reason)
    }

    pub fn simulate(reason: impl Into<String>) -> Self {
        Self::new(Decision::Simulate, reason)
    }

    pub fn with_required(mut self, required: impl IntoIterator<Item = Requirement>) -> Self {
        self.required = required.into_iter().collect();
        self
    }

    pub fn with_patch(mut self, patch: MetaPatch) -> Self {
        self.patch = Some(patch);
        self
    }
}
