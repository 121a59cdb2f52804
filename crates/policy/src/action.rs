//! Side-effecting operations a requester can ask the broker to perform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{Capability, MetaPatch};

/// Operation tags. The set is closed: every kind has a typed parameter
/// variant in [`ActionParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Log,
    FileRead,
    FileWrite,
    NetworkFetch,
    SpawnProcess,
    WriteDb,
    TokenTransfer,
    PurgeData,
    GenerateLegalDocument,
    ExportData,
    DisableAudit,
    ElevatePrivileges,
}

impl ActionKind {
    pub const ALL: [ActionKind; 12] = [
        ActionKind::Log,
        ActionKind::FileRead,
        ActionKind::FileWrite,
        ActionKind::NetworkFetch,
        ActionKind::SpawnProcess,
        ActionKind::WriteDb,
        ActionKind::TokenTransfer,
        ActionKind::PurgeData,
        ActionKind::GenerateLegalDocument,
        ActionKind::ExportData,
        ActionKind::DisableAudit,
        ActionKind::ElevatePrivileges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Log => "LOG",
            ActionKind::FileRead => "FILE_READ",
            ActionKind::FileWrite => "FILE_WRITE",
            ActionKind::NetworkFetch => "NETWORK_FETCH",
            ActionKind::SpawnProcess => "SPAWN_PROCESS",
            ActionKind::WriteDb => "WRITE_DB",
            ActionKind::TokenTransfer => "TOKEN_TRANSFER",
            ActionKind::PurgeData => "PURGE_DATA",
            ActionKind::GenerateLegalDocument => "GENERATE_LEGAL_DOCUMENT",
            ActionKind::ExportData => "EXPORT_DATA",
            ActionKind::DisableAudit => "DISABLE_AUDIT",
            ActionKind::ElevatePrivileges => "ELEVATE_PRIVILEGES",
        }
    }

    /// Value transfers debit a budget and pass destination guardrails.
    pub fn is_transfer(&self) -> bool {
        matches!(self, ActionKind::TokenTransfer)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed parameters, one variant per [`ActionKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionParams {
    Log {
        level: String,
        message: String,
    },
    FileRead {
        path: String,
    },
    FileWrite {
        path: String,
        data: String,
    },
    NetworkFetch {
        url: String,
        #[serde(default = "default_method")]
        method: String,
    },
    SpawnProcess {
        cmd: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        cwd: Option<String>,
    },
    WriteDb {
        table: String,
        record: Value,
    },
    TokenTransfer {
        amount: f64,
        to: String,
        ledger: String,
    },
    PurgeData {
        target: String,
    },
    GenerateLegalDocument {
        template: String,
        jurisdiction: String,
    },
    ExportData {
        dataset: String,
        destination: String,
    },
    DisableAudit,
    ElevatePrivileges {
        reason: String,
    },
}

fn default_method() -> String {
    "GET".to_string()
}

impl ActionParams {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionParams::Log { .. } => ActionKind::Log,
            ActionParams::FileRead { .. } => ActionKind::FileRead,
            ActionParams::FileWrite { .. } => ActionKind::FileWrite,
            ActionParams::NetworkFetch { .. } => ActionKind::NetworkFetch,
            ActionParams::SpawnProcess { .. } => ActionKind::SpawnProcess,
            ActionParams::WriteDb { .. } => ActionKind::WriteDb,
            ActionParams::TokenTransfer { .. } => ActionKind::TokenTransfer,
            ActionParams::PurgeData { .. } => ActionKind::PurgeData,
            ActionParams::GenerateLegalDocument { .. } => ActionKind::GenerateLegalDocument,
            ActionParams::ExportData { .. } => ActionKind::ExportData,
            ActionParams::DisableAudit => ActionKind::DisableAudit,
            ActionParams::ElevatePrivileges { .. } => ActionKind::ElevatePrivileges,
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        ActionParams::Log {
            level: "info".to_string(),
            message: message.into(),
        }
    }

    pub fn file_write(path: impl Into<String>, data: impl Into<String>) -> Self {
        ActionParams::FileWrite {
            path: path.into(),
            data: data.into(),
        }
    }

    pub fn fetch(url: impl Into<String>) -> Self {
        ActionParams::NetworkFetch {
            url: url.into(),
            method: default_method(),
        }
    }

    pub fn transfer(amount: f64, to: impl Into<String>, ledger: impl Into<String>) -> Self {
        ActionParams::TokenTransfer {
            amount,
            to: to.into(),
            ledger: ledger.into(),
        }
    }
}

/// Requester-supplied metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_gate: Option<bool>,
}

impl RequestMeta {
    /// A copy of this metadata with `patch` applied on top.
    pub fn patched(&self, patch: Option<&MetaPatch>) -> RequestMeta {
        let mut meta = self.clone();
        if let Some(patch) = patch {
            if let Some(dry_run) = patch.dry_run {
                meta.dry_run = Some(dry_run);
            }
            if let Some(human_gate) = patch.human_gate {
                meta.human_gate = Some(human_gate);
            }
        }
        meta
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run == Some(true)
    }

    pub fn is_human_gated(&self) -> bool {
        self.human_gate == Some(true)
    }
}

/// A single request to perform a side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: Uuid,
    #[serde(flatten)]
    pub params: ActionParams,
    pub meta: RequestMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
}

impl ActionRequest {
    pub fn new(agent_id: impl Into<String>, params: ActionParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            params,
            meta: RequestMeta {
                agent_id: agent_id.into(),
                timestamp: Utc::now(),
                dry_run: None,
                human_gate: None,
            },
            capability: None,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capability = Some(capability);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.meta.dry_run = Some(dry_run);
        self
    }

    pub fn human_gate(mut self, human_gate: bool) -> Self {
        self.meta.human_gate = Some(human_gate);
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.params.kind()
    }
}
