//! The action broker: the single path from a request to a side effect.
//!
//! [`ActionBroker::handle`] audits the request, asks the policy engine for a
//! verdict, and then either parks the request for review, rejects it, or runs
//! it through the capability, rate and budget checks before simulating it or
//! dispatching it to a provider. Every outcome is an [`ActionOutcome`]; no
//! check failure escapes as an error.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ledger::{
    ApprovalQueue, AuditEntry, AuditKind, AuditLog, BudgetManager, RateLimiter, ReviewItem,
};
use policy::{
    ActionKind, ActionParams, ActionRequest, Capability, CapabilityVerifier, Decision, PolicyEngine,
    RequestMeta,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{Clock, ProviderError, ProviderRegistry, Result, SystemClock};

const POLICY_ACTOR: &str = "policy-engine";
const BROKER_ACTOR: &str = "broker";

/// What happened to a request.
///
/// `ok` alone does not say whether anything ran: a request accepted into
/// review is `ok` too. Branch on `decision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub ok: bool,
    pub dry_run: bool,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_id: Option<Uuid>,
}

impl ActionOutcome {
    fn review(review_id: Uuid) -> Self {
        Self {
            ok: true,
            dry_run: true,
            decision: Decision::Review,
            data: None,
            error: None,
            review_id: Some(review_id),
        }
    }

    fn denied(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            dry_run: true,
            decision: Decision::Deny,
            data: None,
            error: Some(error.into()),
            review_id: None,
        }
    }

    fn simulated(decision: Decision, data: Value) -> Self {
        Self {
            ok: true,
            dry_run: true,
            decision,
            data: Some(data),
            error: None,
            review_id: None,
        }
    }

    fn executed(data: Value) -> Self {
        Self {
            ok: true,
            dry_run: false,
            decision: Decision::Allow,
            data: Some(data),
            error: None,
            review_id: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            dry_run: false,
            decision: Decision::Allow,
            data: None,
            error: Some(error.into()),
            review_id: None,
        }
    }
}

/// Requests per minute allowed for `kind` when the capability sets no limit.
pub fn default_rate_limit(kind: ActionKind) -> u32 {
    match kind {
        ActionKind::Log => 120,
        ActionKind::FileRead => 60,
        ActionKind::FileWrite | ActionKind::NetworkFetch => 30,
        ActionKind::WriteDb => 20,
        ActionKind::SpawnProcess => 10,
        ActionKind::TokenTransfer
        | ActionKind::GenerateLegalDocument
        | ActionKind::ExportData => 5,
        ActionKind::PurgeData | ActionKind::DisableAudit | ActionKind::ElevatePrivileges => 1,
    }
}

/// Whether a capability must be presented for `kind` under `decision`.
///
/// Only plain reads and logs that policy fully allows run without one.
pub fn capability_required(kind: ActionKind, decision: Decision) -> bool {
    !matches!(
        (kind, decision),
        (ActionKind::Log | ActionKind::FileRead, Decision::Allow)
    )
}

/// Whether the capability scope names a wallet or ledger anywhere in its
/// path. Escalated scopes embed their sources, so the root alone is not
/// enough.
fn restricted_destination_scope(capability: &Capability) -> bool {
    capability
        .scope()
        .segments()
        .any(|segment| matches!(segment, "wallet" | "ledger"))
}

/// Environment-level broker settings.
#[derive(Debug, Clone)]
pub struct BrokerSettings {
    /// Destinations transfers under wallet/ledger scopes may reach. Empty
    /// means unrestricted.
    pub allowed_destinations: Vec<String>,
    pub provider_timeout: Duration,
    pub rate_window: Duration,
    /// Overrides for [`default_rate_limit`].
    pub rate_limits: BTreeMap<ActionKind, u32>,
    pub anchor_label: String,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            allowed_destinations: Vec::new(),
            provider_timeout: Duration::from_secs(30),
            rate_window: RateLimiter::DEFAULT_WINDOW,
            rate_limits: BTreeMap::new(),
            anchor_label: "warden".to_string(),
        }
    }
}

impl BrokerSettings {
    pub fn rate_limit(&self, kind: ActionKind) -> u32 {
        self.rate_limits
            .get(&kind)
            .copied()
            .unwrap_or_else(|| default_rate_limit(kind))
    }

    fn destination_allowed(&self, to: &str) -> bool {
        self.allowed_destinations.is_empty() || self.allowed_destinations.iter().any(|d| d == to)
    }
}

/// Operator-facing summary.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStatus {
    pub kill_switch: bool,
    pub dry_run_default: bool,
    pub providers: Vec<ActionKind>,
    pub anchor_label: String,
    pub audit_entries: usize,
    pub audit_intact: bool,
    pub audit_head: Option<String>,
    pub pending_reviews: usize,
}

/// Builder for [`ActionBroker`].
pub struct ActionBrokerBuilder {
    engine: PolicyEngine,
    verifier: CapabilityVerifier,
    providers: ProviderRegistry,
    settings: BrokerSettings,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditLog>>,
    approvals: Option<Arc<ApprovalQueue>>,
    budgets: Option<Arc<BudgetManager>>,
}

impl ActionBrokerBuilder {
    pub fn new(engine: PolicyEngine, verifier: CapabilityVerifier) -> Self {
        Self {
            engine,
            verifier,
            providers: ProviderRegistry::new(),
            settings: BrokerSettings::default(),
            clock: Arc::new(SystemClock),
            audit: None,
            approvals: None,
            budgets: None,
        }
    }

    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    pub fn settings(mut self, settings: BrokerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share an audit log with other components. By default the broker owns
    /// a fresh one anchored at `settings.anchor_label`.
    pub fn audit_log(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn approval_queue(mut self, approvals: Arc<ApprovalQueue>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    pub fn budgets(mut self, budgets: Arc<BudgetManager>) -> Self {
        self.budgets = Some(budgets);
        self
    }

    pub fn build(self) -> ActionBroker {
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(AuditLog::new(self.settings.anchor_label.clone())));
        ActionBroker {
            engine: self.engine,
            verifier: self.verifier,
            providers: self.providers,
            audit,
            approvals: self.approvals.unwrap_or_default(),
            rates: RateLimiter::new(self.settings.rate_window),
            budgets: self.budgets.unwrap_or_default(),
            settings: self.settings,
            clock: self.clock,
        }
    }
}

/// Mediates every side effect. Shareable across tasks behind an `Arc`.
pub struct ActionBroker {
    engine: PolicyEngine,
    verifier: CapabilityVerifier,
    providers: ProviderRegistry,
    audit: Arc<AuditLog>,
    approvals: Arc<ApprovalQueue>,
    rates: RateLimiter,
    budgets: Arc<BudgetManager>,
    settings: BrokerSettings,
    clock: Arc<dyn Clock>,
}

impl ActionBroker {
    pub fn builder(engine: PolicyEngine, verifier: CapabilityVerifier) -> ActionBrokerBuilder {
        ActionBrokerBuilder::new(engine, verifier)
    }

    /// Mediate one request.
    pub async fn handle(&self, request: ActionRequest) -> ActionOutcome {
        let request_id = request.id;
        match self.process(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(%request_id, error = %e, "request aborted");
                ActionOutcome::denied(format!("Broker failure: {e}"))
            }
        }
    }

    async fn process(&self, request: ActionRequest) -> Result<ActionOutcome> {
        let kind = request.kind();
        self.audit.append(
            request.meta.agent_id.clone(),
            AuditKind::ActionReq,
            json!({ "request": &request, "environment": self.environment_snapshot() }),
        )?;

        let decision = self.engine.decide(&request);
        self.audit.append(
            POLICY_ACTOR,
            AuditKind::Policy,
            json!({ "request_id": request.id, "kind": kind, "decision": &decision }),
        )?;
        let meta = request.meta.patched(decision.patch.as_ref());

        match decision.decision {
            Decision::Review => {
                let item = self.approvals.enqueue(request, decision.reason.clone());
                info!(review_id = %item.id, %kind, reason = %decision.reason, "queued for review");
                Ok(ActionOutcome::review(item.id))
            }
            Decision::Deny => {
                warn!(
                    request_id = %request.id,
                    %kind,
                    reason = %decision.reason,
                    "denied by policy"
                );
                Ok(ActionOutcome::denied(decision.reason))
            }
            Decision::Allow | Decision::Simulate => {
                self.execute(&request, &meta, decision.decision, &decision.reason)
                    .await
            }
        }
    }

    /// Capability, rate and transfer checks, then simulate or dispatch.
    async fn execute(
        &self,
        request: &ActionRequest,
        meta: &RequestMeta,
        decision: Decision,
        reason: &str,
    ) -> Result<ActionOutcome> {
        let kind = request.kind();
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let capability = request.capability.as_ref();

        if capability_required(kind, decision) {
            if let Err(e) = self.verifier.assert(capability, &meta.agent_id, kind, now) {
                return self.reject(request, "capability", e.to_string());
            }
        }
        if let Some(capability) = capability {
            if let Err(e) = capability.check_target(&request.params) {
                return self.reject(request, "capability", e.to_string());
            }
        }

        let limit = capability
            .and_then(|c| c.constraints().rate_per_min)
            .unwrap_or_else(|| self.settings.rate_limit(kind));
        let rate_key = format!("{}:{kind}", meta.agent_id);
        if !self.rates.allow(&rate_key, limit, now_ms) {
            return self.reject(request, "rate-limit", "Rate limit exceeded".to_string());
        }

        // Transfers debit the budget here, before the simulate branch, so a
        // dry run reserves spend exactly like a live one.
        if let ActionParams::TokenTransfer { amount, to, .. } = &request.params {
            if let Err(error) = self.guard_transfer(capability, *amount, to) {
                return self.reject(request, "transfer", error);
            }
        }

        if decision == Decision::Simulate || meta.is_dry_run() {
            let data = json!({
                "simulated": true,
                "kind": kind,
                "params": &request.params,
                "reason": reason,
                "telemetry": {
                    "simulated_at": now,
                    "provider_registered": self.providers.contains(kind),
                    "capability_scope": capability.map(|c| c.scope().as_str()),
                    "rate_window_count": self.rates.count(&rate_key, now_ms),
                },
            });
            self.audit.append(
                meta.agent_id.clone(),
                AuditKind::ActionRes,
                json!({ "request_id": request.id, "kind": kind, "dry_run": true, "data": &data }),
            )?;
            return Ok(ActionOutcome::simulated(decision, data));
        }

        self.dispatch(request, meta).await
    }

    fn guard_transfer(
        &self,
        capability: Option<&Capability>,
        amount: f64,
        to: &str,
    ) -> std::result::Result<(), String> {
        if !amount.is_finite() || amount <= 0.0 {
            return Err("Transfer amount must be a positive number".to_string());
        }
        let Some(capability) = capability else {
            return Err("Transfer requires a capability".to_string());
        };
        if restricted_destination_scope(capability) && !self.settings.destination_allowed(to) {
            return Err(format!("Destination not allowed: {to}"));
        }
        let Some(limit) = capability.constraints().budget else {
            return Err("Capability declares no budget ceiling".to_string());
        };
        self.budgets
            .spend(capability.scope().as_str(), amount, limit)
            .map(|_| ())
            .map_err(|e| format!("Budget exceeded: {e}"))
    }

    async fn dispatch(&self, request: &ActionRequest, meta: &RequestMeta) -> Result<ActionOutcome> {
        let kind = request.kind();
        let Some(provider) = self.providers.get(kind) else {
            return self.reject(request, "dispatch", format!("No provider for {kind}"));
        };

        info!(request_id = %request.id, %kind, agent = %meta.agent_id, "dispatching to provider");
        let timeout = self.settings.provider_timeout;
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, provider.execute(&request.params)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(millis(timeout))),
        };
        let elapsed_ms = millis(started.elapsed());

        match result {
            Ok(data) => {
                self.audit.append(
                    meta.agent_id.clone(),
                    AuditKind::ActionRes,
                    json!({
                        "request_id": request.id,
                        "kind": kind,
                        "dry_run": false,
                        "elapsed_ms": elapsed_ms,
                        "data": &data,
                    }),
                )?;
                Ok(ActionOutcome::executed(data))
            }
            Err(e) => {
                error!(request_id = %request.id, %kind, error = %e, elapsed_ms, "provider failed");
                self.audit.append(
                    meta.agent_id.clone(),
                    AuditKind::Error,
                    json!({
                        "request_id": request.id,
                        "error": e.to_string(),
                        "diagnostics": {
                            "kind": kind,
                            "agent_id": &meta.agent_id,
                            "provider_error": &e,
                            "elapsed_ms": elapsed_ms,
                            "timeout_ms": millis(timeout),
                        },
                    }),
                )?;
                Ok(ActionOutcome::failed(e.to_string()))
            }
        }
    }

    /// Turn a post-policy check failure into a DENY outcome and record it.
    fn reject(
        &self,
        request: &ActionRequest,
        stage: &'static str,
        error: String,
    ) -> Result<ActionOutcome> {
        warn!(request_id = %request.id, kind = %request.kind(), stage, %error, "request rejected");
        self.audit.append(
            BROKER_ACTOR,
            AuditKind::Policy,
            json!({
                "request_id": request.id,
                "kind": request.kind(),
                "decision": Decision::Deny,
                "stage": stage,
                "reason": &error,
            }),
        )?;
        Ok(ActionOutcome::denied(error))
    }

    fn environment_snapshot(&self) -> Value {
        json!({
            "kill_switch": self.engine.environment().kill_switch,
            "dry_run_default": self.engine.policy().dry_run_default,
            "providers": self.providers.kinds(),
        })
    }

    /// Review items, newest first.
    pub fn approvals(&self) -> Vec<ReviewItem> {
        self.approvals.list()
    }

    pub fn pending_reviews(&self) -> Vec<ReviewItem> {
        self.approvals.pending()
    }

    pub fn review(&self, id: Uuid) -> Option<ReviewItem> {
        self.approvals.get(id)
    }

    pub fn approve(&self, id: Uuid, operator: &str) -> Result<ReviewItem> {
        let item = self.approvals.approve(id)?;
        self.record_resolution(&item, operator)?;
        Ok(item)
    }

    pub fn deny(&self, id: Uuid, operator: &str) -> Result<ReviewItem> {
        let item = self.approvals.deny(id)?;
        self.record_resolution(&item, operator)?;
        Ok(item)
    }

    fn record_resolution(&self, item: &ReviewItem, operator: &str) -> Result<()> {
        info!(review_id = %item.id, status = %item.status, operator, "review resolved");
        self.audit.append(
            operator,
            AuditKind::Policy,
            json!({
                "review_id": item.id,
                "request_id": item.request.id,
                "status": item.status,
            }),
        )?;
        Ok(())
    }

    /// Run an approved review item through the deny-only policy rules, then
    /// the capability, rate and budget checks, and finally simulate or
    /// dispatch it as its requester asked.
    ///
    /// Each approved item runs at most once.
    pub async fn execute_approved(&self, review_id: Uuid) -> ActionOutcome {
        match self.run_approved(review_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(%review_id, error = %e, "approved execution refused");
                ActionOutcome::denied(e.to_string())
            }
        }
    }

    async fn run_approved(&self, review_id: Uuid) -> Result<ActionOutcome> {
        let item = self.approvals.mark_executed(review_id)?;
        let request = item.request;
        if let Some(denial) = self.engine.screen(&request) {
            return self.reject(&request, "policy", denial.reason);
        }
        let reason = "Approved by operator";
        self.audit.append(
            BROKER_ACTOR,
            AuditKind::Policy,
            json!({
                "request_id": request.id,
                "review_id": review_id,
                "kind": request.kind(),
                "decision": Decision::Allow,
                "reason": reason,
            }),
        )?;
        self.execute(&request, &request.meta, Decision::Allow, reason).await
    }

    pub fn audit_export(&self) -> Vec<AuditEntry> {
        self.audit.export()
    }

    /// Replay the audit chain. Operators must treat an error as an incident.
    pub fn audit_verify(&self) -> Result<()> {
        Ok(self.audit.verify()?)
    }

    pub fn budget_usage(&self, scope: &str) -> f64 {
        self.budgets.usage(scope)
    }

    pub fn status(&self) -> BrokerStatus {
        BrokerStatus {
            kill_switch: self.engine.environment().kill_switch,
            dry_run_default: self.engine.policy().dry_run_default,
            providers: self.providers.kinds(),
            anchor_label: self.audit.anchor_label().to_string(),
            audit_entries: self.audit.len(),
            audit_intact: self.audit.is_intact(),
            audit_head: self.audit.head(),
            pending_reviews: self.approvals.pending().len(),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
