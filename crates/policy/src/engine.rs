//! The policy decision engine.
//!
//! [`PolicyEngine::decide`] walks an ordered list of independent [`Rule`]s and
//! returns the first verdict produced. Rules only read the request, the
//! [`Environment`] and the [`Policy`] tables, so a decision is a pure function
//! of those three inputs.

use tracing::debug;
use url::Url;

use crate::{
    ActionKind, ActionParams, ActionRequest, Decision, Environment, MetaPatch, Policy,
    PolicyDecision, Requirement,
};

/// What a rule may look at.
pub struct RuleContext<'a> {
    pub request: &'a ActionRequest,
    pub policy: &'a Policy,
    pub env: &'a Environment,
}

impl RuleContext<'_> {
    fn kind(&self) -> ActionKind {
        self.request.kind()
    }

    fn wants_dry_run(&self) -> bool {
        self.request.meta.dry_run.unwrap_or(self.policy.dry_run_default)
    }
}

/// One step of the priority chain. Returning `None` passes to the next rule.
pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision>;
}

pub struct KillSwitch;

impl Rule for KillSwitch {
    fn name(&self) -> &'static str {
        "kill-switch"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        ctx.env
            .kill_switch
            .then(|| PolicyDecision::deny("Global kill switch active"))
    }
}

pub struct HardDeny;

impl Rule for HardDeny {
    fn name(&self) -> &'static str {
        "hard-deny"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        let kind = ctx.kind();
        ctx.policy
            .hard_deny
            .contains(&kind)
            .then(|| PolicyDecision::deny(format!("{kind} is forbidden")))
    }
}

pub struct HighSensitivity;

impl Rule for HighSensitivity {
    fn name(&self) -> &'static str {
        "high-sensitivity"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        let kind = ctx.kind();
        if !ctx.policy.high_sensitivity.contains(&kind) {
            return None;
        }
        let mut required = vec![
            Requirement::HumanApproval,
            Requirement::Capability,
            Requirement::AuditTrail,
        ];
        if kind.is_transfer() {
            required.push(Requirement::BudgetCheck);
        }
        Some(
            PolicyDecision::review(format!("{kind} requires human approval"))
                .with_required(required)
                .with_patch(MetaPatch::force_review()),
        )
    }
}

pub struct Confidentiality;

impl Rule for Confidentiality {
    fn name(&self) -> &'static str {
        "confidentiality"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        if !ctx.policy.confidential_kinds.contains(&ctx.kind()) {
            return None;
        }
        let classification = ctx
            .request
            .capability
            .as_ref()
            .and_then(|c| c.constraints().classification)
            .filter(|c| c.is_sensitive())?;
        Some(
            PolicyDecision::review(format!("{classification:?} data requires review"))
                .with_required([
                    Requirement::HumanApproval,
                    Requirement::Capability,
                    Requirement::AuditTrail,
                    Requirement::BackupRequired,
                ])
                .with_patch(MetaPatch::force_review()),
        )
    }
}

pub struct AutoApprove;

impl Rule for AutoApprove {
    fn name(&self) -> &'static str {
        "auto-approve"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        if !ctx.policy.auto_approve.contains(&ctx.kind()) {
            return None;
        }
        Some(if ctx.request.meta.is_dry_run() {
            PolicyDecision::simulate("Auto-approved kind, dry run requested")
        } else {
            PolicyDecision::allow("Auto-approved kind")
        })
    }
}

pub struct Credential;

impl Rule for Credential {
    fn name(&self) -> &'static str {
        "credential"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        let credential = ctx.request.capability.as_ref()?.constraints().credential.as_ref()?;
        (!ctx.policy.credential_trusted(credential))
            .then(|| PolicyDecision::deny(format!("Credential '{credential}' is not trusted")))
    }
}

pub struct QualityAssurance;

impl Rule for QualityAssurance {
    fn name(&self) -> &'static str {
        "quality-assurance"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        let capability = ctx.request.capability.as_ref()?;
        if !capability.constraints().qa_required || ctx.request.meta.is_human_gated() {
            return None;
        }
        Some(
            PolicyDecision::review("Quality assurance review required")
                .with_required([Requirement::HumanApproval, Requirement::AuditTrail])
                .with_patch(MetaPatch::force_review()),
        )
    }
}

pub struct NetworkHost;

impl Rule for NetworkHost {
    fn name(&self) -> &'static str {
        "network-host"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        let ActionParams::NetworkFetch { url, .. } = &ctx.request.params else {
            return None;
        };
        let Ok(parsed) = Url::parse(url) else {
            return Some(PolicyDecision::deny("Malformed URL"));
        };
        match parsed.host_str() {
            Some(host) if ctx.policy.host_allowed(host) => None,
            Some(host) => Some(PolicyDecision::deny(format!("Domain not allowed: {host}"))),
            None => Some(PolicyDecision::deny("Malformed URL")),
        }
    }
}

pub struct FilePath;

impl Rule for FilePath {
    fn name(&self) -> &'static str {
        "file-path"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        let ActionParams::FileWrite { path, .. } = &ctx.request.params else {
            return None;
        };
        ctx.policy
            .path_denied(path)
            .then(|| PolicyDecision::deny("Path not permitted"))
    }
}

pub struct ReviewRequired;

impl Rule for ReviewRequired {
    fn name(&self) -> &'static str {
        "review-required"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        let kind = ctx.kind();
        if !ctx.policy.review_required.contains(&kind) {
            return None;
        }
        Some(
            PolicyDecision::review(format!("{kind} requires review"))
                .with_required([Requirement::HumanApproval, Requirement::AuditTrail])
                .with_patch(MetaPatch::force_review()),
        )
    }
}

pub struct DefaultPosture;

impl Rule for DefaultPosture {
    fn name(&self) -> &'static str {
        "default"
    }

    fn evaluate(&self, ctx: &RuleContext<'_>) -> Option<PolicyDecision> {
        Some(if ctx.wants_dry_run() {
            PolicyDecision::simulate("Dry run (default safety posture)")
        } else {
            PolicyDecision::allow("Permitted by policy")
        })
    }
}

/// Stateless request → decision function over an ordered rule chain.
pub struct PolicyEngine {
    policy: Policy,
    env: Environment,
    rules: Vec<Box<dyn Rule>>,
    guards: Vec<Box<dyn Rule>>,
}

impl PolicyEngine {
    pub fn new(policy: Policy, env: Environment) -> Self {
        Self {
            policy,
            env,
            rules: Self::standard_rules(),
            guards: Self::guard_rules(),
        }
    }

    /// The built-in chain, highest priority first.
    pub fn standard_rules() -> Vec<Box<dyn Rule>> {
        vec![
            Box::new(KillSwitch),
            Box::new(HardDeny),
            Box::new(HighSensitivity),
            Box::new(Confidentiality),
            Box::new(AutoApprove),
            Box::new(Credential),
            Box::new(QualityAssurance),
            Box::new(NetworkHost),
            Box::new(FilePath),
            Box::new(ReviewRequired),
            Box::new(DefaultPosture),
        ]
    }

    /// The rules that only ever deny. A request that was sent to review by
    /// an earlier rule never reached these, so they are re-run before an
    /// approved request executes.
    pub fn guard_rules() -> Vec<Box<dyn Rule>> {
        vec![
            Box::new(KillSwitch),
            Box::new(HardDeny),
            Box::new(Credential),
            Box::new(NetworkHost),
            Box::new(FilePath),
        ]
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn decide(&self, request: &ActionRequest) -> PolicyDecision {
        // Unreachable fallback with the standard chain, which ends in DefaultPosture.
        self.first_match(&self.rules, request).unwrap_or_else(|| PolicyDecision {
            rule: "fallthrough".to_string(),
            ..PolicyDecision::new(Decision::Deny, "No rule matched")
        })
    }

    /// Run only the guard rules. `None` means nothing objects.
    pub fn screen(&self, request: &ActionRequest) -> Option<PolicyDecision> {
        self.first_match(&self.guards, request)
    }

    fn first_match(
        &self,
        rules: &[Box<dyn Rule>],
        request: &ActionRequest,
    ) -> Option<PolicyDecision> {
        let ctx = RuleContext {
            request,
            policy: &self.policy,
            env: &self.env,
        };
        rules.iter().find_map(|rule| {
            let mut decision = rule.evaluate(&ctx)?;
            decision.rule = rule.name().to_string();
            debug!(
                request_id = %request.id,
                kind = %request.kind(),
                rule = rule.name(),
                decision = %decision.decision,
                "policy decided"
            );
            Some(decision)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        Capability, CapabilityBody, CapabilityVerifier, Classification, Constraints, Secret,
    };

    fn engine() -> PolicyEngine {
        PolicyEngine::new(Policy::default_preset(), Environment::default())
    }

    fn capability(scope: &str, constraints: Constraints) -> Capability {
        CapabilityVerifier::new(Secret::from("s"))
            .issue(
                CapabilityBody::new("issuer", "agent", scope, ActionKind::ALL)
                    .with_constraints(constraints),
            )
            .unwrap()
    }

    fn decide(params: ActionParams) -> PolicyDecision {
        engine().decide(&ActionRequest::new("agent", params))
    }

    #[test]
    fn kill_switch_overrides_everything() {
        let engine = PolicyEngine::new(Policy::default_preset(), Environment { kill_switch: true });
        let d = engine.decide(&ActionRequest::new("agent", ActionParams::log("hi")));
        assert_eq!(d.decision, Decision::Deny);
        assert_eq!(d.rule, "kill-switch");
    }

    #[test]
    fn hard_denied_kinds_deny_regardless_of_fields() {
        let cap = capability("root", Constraints::default());
        for request in [
            ActionRequest::new("agent", ActionParams::DisableAudit),
            ActionRequest::new("agent", ActionParams::DisableAudit)
                .dry_run(true)
                .human_gate(true)
                .with_capability(cap.clone()),
            ActionRequest::new("agent", ActionParams::ElevatePrivileges { reason: "x".into() })
                .with_capability(cap.clone()),
        ] {
            let d = engine().decide(&request);
            assert_eq!(d.decision, Decision::Deny);
            assert_eq!(d.rule, "hard-deny");
        }
    }

    #[test]
    fn transfer_under_wallet_capability_goes_to_review() {
        let cap = capability(
            "wallet:albion",
            Constraints {
                budget: Some(10.0),
                ..Default::default()
            },
        );
        let request = ActionRequest::new("agent", ActionParams::transfer(5.0, "bob", "ALBION"))
            .dry_run(false)
            .with_capability(cap);
        let d = engine().decide(&request);
        assert_eq!(d.decision, Decision::Review);
        assert_eq!(d.patch, Some(MetaPatch::force_review()));
        assert!(d.required.contains(&Requirement::HumanApproval));
        assert!(d.required.contains(&Requirement::BudgetCheck));
    }

    #[test]
    fn restricted_export_needs_backup() {
        let cap = capability(
            "data",
            Constraints { classification: Some(Classification::Restricted), ..Default::default() },
        );
        let request = ActionRequest::new(
            "agent",
            ActionParams::ExportData { dataset: "users".into(), destination: "s3".into() },
        )
        .with_capability(cap);
        let d = engine().decide(&request);
        assert_eq!(d.decision, Decision::Review);
        assert!(d.required.contains(&Requirement::BackupRequired));
    }

    #[test]
    fn public_export_falls_through_to_default() {
        let cap = capability(
            "data",
            Constraints { classification: Some(Classification::Public), ..Default::default() },
        );
        let request = ActionRequest::new(
            "agent",
            ActionParams::ExportData { dataset: "docs".into(), destination: "s3".into() },
        )
        .with_capability(cap);
        assert_eq!(engine().decide(&request).rule, "default");
    }

    #[test]
    fn auto_approve_respects_dry_run() {
        let d = engine().decide(&ActionRequest::new("a", ActionParams::log("x")));
        assert_eq!(d.decision, Decision::Allow);
        let d = engine().decide(&ActionRequest::new("a", ActionParams::log("x")).dry_run(true));
        assert_eq!(d.decision, Decision::Simulate);
    }

    #[test]
    fn untrusted_credential_denies() {
        let cap = capability(
            "legal",
            Constraints {
                credential: Some("self-taught".into()),
                ..Default::default()
            },
        );
        let request = ActionRequest::new("agent", ActionParams::fetch("https://example.com"))
            .with_capability(cap);
        let d = engine().decide(&request);
        assert_eq!(d.decision, Decision::Deny);
        assert_eq!(d.rule, "credential");

        let cap = capability(
            "legal",
            Constraints {
                credential: Some("registered-auditor".into()),
                ..Default::default()
            },
        );
        let request = ActionRequest::new("agent", ActionParams::fetch("https://example.com"))
            .with_capability(cap);
        assert_eq!(engine().decide(&request).decision, Decision::Simulate);
    }

    #[test]
    fn qa_capability_reviews_unless_gated() {
        let cap = capability(
            "qa",
            Constraints {
                qa_required: true,
                ..Default::default()
            },
        );
        let request = ActionRequest::new("agent", ActionParams::fetch("https://example.com"))
            .with_capability(cap.clone());
        assert_eq!(engine().decide(&request).rule, "quality-assurance");

        let gated = ActionRequest::new("agent", ActionParams::fetch("https://example.com"))
            .human_gate(true)
            .with_capability(cap);
        assert_eq!(engine().decide(&gated).rule, "default");
    }

    #[test]
    fn network_fetch_checks_host() {
        let fetch = |url: &str| decide(ActionParams::fetch(url)).decision;
        assert_eq!(fetch("https://example.com/x"), Decision::Simulate);
        assert_eq!(fetch("https://api.example.com"), Decision::Simulate);

        let d = decide(ActionParams::fetch("https://evil.io/steal"));
        assert_eq!(d.decision, Decision::Deny);
        assert_eq!(d.reason, "Domain not allowed: evil.io");

        let d = decide(ActionParams::fetch("not a url"));
        assert_eq!(d.decision, Decision::Deny);
        assert_eq!(d.reason, "Malformed URL");
    }

    #[test]
    fn file_write_to_etc_is_denied() {
        let d = decide(ActionParams::file_write("/etc/passwd", "root::0:0"));
        assert_eq!(d.decision, Decision::Deny);
        assert_eq!(d.reason, "Path not permitted");

        let d = decide(ActionParams::file_write("/tmp/report.txt", "ok"));
        assert_eq!(d.decision, Decision::Simulate);
    }

    #[test]
    fn generic_review_set() {
        let d = decide(ActionParams::SpawnProcess { cmd: "ls".into(), args: vec![], cwd: None });
        assert_eq!(d.decision, Decision::Review);
        assert_eq!(d.rule, "review-required");
    }

    #[test]
    fn default_honours_explicit_live_request() {
        let request =
            ActionRequest::new("a", ActionParams::fetch("https://example.com")).dry_run(false);
        assert_eq!(engine().decide(&request).decision, Decision::Allow);

        let mut policy = Policy::default_preset();
        policy.dry_run_default = false;
        let engine = PolicyEngine::new(policy, Environment::default());
        let request = ActionRequest::new("a", ActionParams::fetch("https://example.com"));
        assert_eq!(engine.decide(&request).decision, Decision::Allow);
    }

    #[test]
    fn decide_is_deterministic_and_leaves_request_alone() {
        let request = ActionRequest::new("a", ActionParams::PurgeData { target: "db".into() });
        let snapshot = request.clone();
        let first = engine().decide(&request);
        let second = engine().decide(&request);
        assert_eq!(first, second);
        assert_eq!(request, snapshot);
    }

    #[test]
    fn screen_catches_what_review_hid() {
        let cap = capability(
            "qa",
            Constraints {
                qa_required: true,
                ..Default::default()
            },
        );
        let request = ActionRequest::new("agent", ActionParams::fetch("https://evil.io/steal"))
            .with_capability(cap);
        assert_eq!(engine().decide(&request).rule, "quality-assurance");

        let screened = engine().screen(&request).unwrap();
        assert_eq!(screened.decision, Decision::Deny);
        assert_eq!(screened.reason, "Domain not allowed: evil.io");
        assert_eq!(screened.rule, "network-host");

        let fine = ActionRequest::new("agent", ActionParams::fetch("https://example.com"));
        assert!(engine().screen(&fine).is_none());
        let review_only =
            ActionRequest::new("agent", ActionParams::PurgeData { target: "db".into() });
        assert!(engine().screen(&review_only).is_none());
    }

    #[test]
    fn chain_order_is_explicit() {
        assert_eq!(
            engine().rule_names(),
            vec![
                "kill-switch",
                "hard-deny",
                "high-sensitivity",
                "confidentiality",
                "auto-approve",
                "credential",
                "quality-assurance",
                "network-host",
                "file-path",
                "review-required",
                "default",
            ]
        );
    }
}
