use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::policy::{host_matches, normalize};
use crate::{ActionKind, ActionParams, CapabilityError};

/// Hierarchical `:`-separated tag partitioning budgets, rates and trust
/// domains, e.g. `wallet:albion:ops`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(String);

impl Scope {
    pub fn new(scope: impl Into<String>) -> Self {
        Self(scope.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(':').filter(|s| !s.is_empty())
    }

    pub fn root(&self) -> Option<&str> {
        self.segments().next()
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Low,
    Medium,
    High,
    Critical,
}

/// Confidentiality level, least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Public,
    Internal,
    Confidential,
    Restricted,
}

impl Classification {
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Classification::Confidential | Classification::Restricted)
    }
}

/// Limits attached to a capability. Absent fields impose no limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Requests per minute for each `(agent, kind)` pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_per_min: Option<u32>,

    /// Cumulative spend ceiling for the capability scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_domains: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_paths: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub criticality: Option<Criticality>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,

    /// Professional credential the holder must carry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub qa_required: bool,
}

impl Constraints {
    /// Whether `host` is covered by `allowed_domains`. An empty list allows
    /// any host.
    pub fn permits_host(&self, host: &str) -> bool {
        self.allowed_domains.is_empty() || host_matches(&self.allowed_domains, host)
    }

    /// Whether `path` lies under one of `allowed_paths`. An empty list allows
    /// any path.
    pub fn permits_path(&self, path: &str) -> bool {
        if self.allowed_paths.is_empty() {
            return true;
        }
        let path = normalize(Path::new(path));
        self.allowed_paths
            .iter()
            .any(|allowed| path.starts_with(normalize(Path::new(allowed))))
    }
}

/// Everything a capability states except its signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityBody {
    pub issuer: String,
    pub subject: String,
    pub actions: BTreeSet<ActionKind>,
    pub scope: Scope,
    #[serde(default)]
    pub constraints: Constraints,
}

impl CapabilityBody {
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        scope: impl Into<String>,
        actions: impl IntoIterator<Item = ActionKind>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
            actions: actions.into_iter().collect(),
            scope: Scope::new(scope),
            constraints: Constraints::default(),
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn permits(&self, kind: ActionKind) -> bool {
        self.actions.contains(&kind)
    }
}

/// A signed grant. Immutable once signed: any change to `body` invalidates
/// `signature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    #[serde(flatten)]
    pub body: CapabilityBody,
    pub signature: String,
}

impl Capability {
    pub fn subject(&self) -> &str {
        &self.body.subject
    }

    pub fn scope(&self) -> &Scope {
        &self.body.scope
    }

    pub fn constraints(&self) -> &Constraints {
        &self.body.constraints
    }

    /// Check the target of `params` against the signed domain and path
    /// limits. Kinds without a host or path always pass.
    pub fn check_target(&self, params: &ActionParams) -> Result<(), CapabilityError> {
        let constraints = self.constraints();
        match params {
            ActionParams::NetworkFetch { url, .. } => {
                let host = url::Url::parse(url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string));
                match host {
                    Some(host) if constraints.permits_host(&host) => Ok(()),
                    Some(host) => Err(CapabilityError::DomainNotPermitted(host)),
                    None if constraints.allowed_domains.is_empty() => Ok(()),
                    None => Err(CapabilityError::DomainNotPermitted(url.clone())),
                }
            }
            ActionParams::FileRead { path } | ActionParams::FileWrite { path, .. } => {
                if constraints.permits_path(path) {
                    Ok(())
                } else {
                    Err(CapabilityError::PathNotPermitted(path.clone()))
                }
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limited(domains: &[&str], paths: &[&str]) -> Capability {
        let body = CapabilityBody::new("issuer", "agent", "sandbox", ActionKind::ALL)
            .with_constraints(Constraints {
                allowed_domains: domains.iter().map(|d| d.to_string()).collect(),
                allowed_paths: paths.iter().map(|p| p.to_string()).collect(),
                ..Default::default()
            });
        Capability {
            body,
            signature: String::new(),
        }
    }

    #[test]
    fn scope_segments() {
        let scope = Scope::new("escalated:wallet:albion::ops");
        assert_eq!(scope.root(), Some("escalated"));
        assert_eq!(
            scope.segments().collect::<Vec<_>>(),
            vec!["escalated", "wallet", "albion", "ops"]
        );
    }

    #[test]
    fn domain_limits_apply_to_fetches() {
        let cap = limited(&["example.com"], &[]);
        assert!(cap.check_target(&ActionParams::fetch("https://example.com/a")).is_ok());
        assert!(cap.check_target(&ActionParams::fetch("https://cdn.example.com/a")).is_ok());
        assert_eq!(
            cap.check_target(&ActionParams::fetch("https://api.github.com/x")),
            Err(CapabilityError::DomainNotPermitted("api.github.com".into()))
        );
        assert!(cap.check_target(&ActionParams::fetch("not a url")).is_err());

        let open = limited(&[], &[]);
        assert!(open.check_target(&ActionParams::fetch("https://anywhere.io")).is_ok());
    }

    #[test]
    fn path_limits_apply_to_reads_and_writes() {
        let cap = limited(&[], &["/srv/reports"]);
        assert!(cap.check_target(&ActionParams::file_write("/srv/reports/q1.csv", "")).is_ok());
        assert_eq!(
            cap.check_target(&ActionParams::file_write("/srv/reports/../secrets", "")),
            Err(CapabilityError::PathNotPermitted("/srv/reports/../secrets".into()))
        );
        assert!(cap
            .check_target(&ActionParams::FileRead { path: "/srv/reportsx/a".into() })
            .is_err());
        assert!(cap.check_target(&ActionParams::log("unaffected")).is_ok());
    }

    #[test]
    fn classification_ordering() {
        assert!(Classification::Restricted > Classification::Confidential);
        assert!(!Classification::Internal.is_sensitive());
        assert!(Classification::Confidential.is_sensitive());
    }

    #[test]
    fn capability_wire_form_is_flat() {
        let cap = Capability {
            body: CapabilityBody::new("issuer", "agent", "sandbox", [ActionKind::Log]),
            signature: "00".into(),
        };
        let value = serde_json::to_value(&cap).unwrap();
        assert_eq!(value["subject"], "agent");
        assert_eq!(value["signature"], "00");
        assert_eq!(value["actions"][0], "LOG");
    }
}
