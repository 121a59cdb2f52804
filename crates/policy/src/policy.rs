//! Policy preset tables and environment flags.

use crate::{ActionKind, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// Static tables the policy engine consults, loadable from TOML.
///
/// Fields missing from a TOML document keep their [`Policy::default_preset`]
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Kinds that are always denied.
    pub hard_deny: BTreeSet<ActionKind>,

    /// Value transfers, irreversible operations and regulated documents.
    /// Always routed to human review.
    pub high_sensitivity: BTreeSet<ActionKind>,

    /// Kinds whose data carries a confidentiality classification.
    pub confidential_kinds: BTreeSet<ActionKind>,

    /// Kinds approved without further checks.
    pub auto_approve: BTreeSet<ActionKind>,

    /// Kinds that need review once every other rule has passed.
    pub review_required: BTreeSet<ActionKind>,

    /// Allowed HTTP hosts (exact or parent domain, `*` for any).
    pub allowed_hosts: Vec<String>,

    /// Path prefixes no file write may target.
    pub denied_path_prefixes: Vec<String>,

    /// Professional credentials a capability may demand.
    pub trusted_credentials: Vec<String>,

    /// Simulate requests that do not say whether they are a dry run.
    pub dry_run_default: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self::default_preset()
    }
}

impl Policy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        let policy: Policy = toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// The preset used when no policy file is present.
    pub fn default_preset() -> Self {
        use ActionKind::*;
        Self {
            hard_deny: [DisableAudit, ElevatePrivileges].into(),
            high_sensitivity: [TokenTransfer, PurgeData, GenerateLegalDocument].into(),
            confidential_kinds: [ExportData].into(),
            auto_approve: [Log, FileRead].into(),
            review_required: [SpawnProcess, WriteDb].into(),
            allowed_hosts: vec![
                "example.com".to_string(),
                "api.github.com".to_string(),
                "crates.io".to_string(),
            ],
            denied_path_prefixes: [
                "/etc", "/bin", "/sbin", "/usr", "/boot", "/sys", "/proc", "/dev", "/root",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            trusted_credentials: vec![
                "licensed-attorney".to_string(),
                "certified-public-accountant".to_string(),
                "registered-auditor".to_string(),
            ],
            dry_run_default: true,
        }
    }

    /// Reject contradictory or unusable tables.
    pub fn validate(&self) -> Result<()> {
        if let Some(kind) = self.hard_deny.intersection(&self.auto_approve).next() {
            return Err(Error::Invalid(format!(
                "{kind} is both hard-denied and auto-approved"
            )));
        }
        if let Some(prefix) = self.denied_path_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(Error::Invalid(format!(
                "denied path prefix '{prefix}' must be absolute"
            )));
        }
        Ok(())
    }

    pub fn host_allowed(&self, host: &str) -> bool {
        host_matches(&self.allowed_hosts, host)
    }

    /// Whether `path` (after lexical normalization) lies under a denied prefix.
    pub fn path_denied(&self, path: &str) -> bool {
        let normalized = normalize(Path::new(path));
        self.denied_path_prefixes
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
    }

    pub fn credential_trusted(&self, credential: &str) -> bool {
        self.trusted_credentials.iter().any(|c| c == credential)
    }
}

/// Exact, dot-suffix or `*` match of `host` against `allowed`.
pub(crate) fn host_matches(allowed: &[String], host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    allowed
        .iter()
        .any(|a| a == "*" || host == *a || host.ends_with(&format!(".{a}")))
}

/// Resolve `.` and `..` without touching the filesystem.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Process-wide switches read from the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Deny everything while set.
    pub kill_switch: bool,
}

impl Environment {
    pub const KILL_SWITCH_VAR: &'static str = "WARDEN_KILL_SWITCH";

    pub fn from_env() -> Self {
        let kill_switch = std::env::var(Self::KILL_SWITCH_VAR)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes"))
            .unwrap_or(false);
        Self { kill_switch }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preset_denies_etc() {
        let policy = Policy::default_preset();
        assert!(policy.path_denied("/etc/passwd"));
        assert!(policy.path_denied("/tmp/../etc/shadow"));
        assert!(!policy.path_denied("/tmp/report.json"));
        assert!(!policy.path_denied("/etcetera/notes"));
        assert!(!policy.path_denied("./out/etc"));
    }

    #[test]
    fn test_host_matching() {
        let policy = Policy::default_preset();
        assert!(policy.host_allowed("example.com"));
        assert!(policy.host_allowed("cdn.example.com"));
        assert!(policy.host_allowed("EXAMPLE.com."));
        assert!(!policy.host_allowed("badexample.com"));
        assert!(!policy.host_allowed("example.com.evil.io"));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
hard_deny = ["SPAWN_PROCESS"]
allowed_hosts = ["api.anthropic.com"]
dry_run_default = false
"#;
        let policy = Policy::parse(toml).unwrap();

        assert!(policy.hard_deny.contains(&ActionKind::SpawnProcess));
        assert!(policy.host_allowed("api.anthropic.com"));
        assert!(!policy.host_allowed("example.com"));
        assert!(!policy.dry_run_default);
        // Unspecified tables keep their defaults.
        assert!(policy.high_sensitivity.contains(&ActionKind::TokenTransfer));
    }

    #[test]
    fn test_parse_rejects_contradictions() {
        let toml = r#"
hard_deny = ["LOG"]
auto_approve = ["LOG"]
"#;
        assert!(matches!(Policy::parse(toml), Err(Error::Invalid(_))));
        assert!(matches!(Policy::parse("hard_deny = 3"), Err(Error::Parse(_))));
    }
}
