//! Capability signing, verification and escalation.
//!
//! A signature is the hex HMAC-SHA-256 of the canonical JSON form of a
//! [`CapabilityBody`]. Verification recomputes it and compares in constant
//! time.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::canonical::to_canonical_string;
use crate::{ActionKind, Capability, CapabilityBody, CapabilityError, Constraints, Result, Scope};

type HmacSha256 = Hmac<Sha256>;

/// HMAC signing secret. Never printed.
#[derive(Clone)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

/// Sign `body` with `secret`, returning the lowercase hex signature.
pub fn sign(body: &CapabilityBody, secret: &Secret) -> Result<String> {
    Ok(hex::encode(mac(body, secret)?))
}

fn mac(body: &CapabilityBody, secret: &Secret) -> Result<Vec<u8>> {
    let canonical = to_canonical_string(body)?;
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| crate::Error::Invalid(format!("hmac key: {e}")))?;
    mac.update(canonical.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verifies and asserts capabilities against one secret.
#[derive(Debug, Clone)]
pub struct CapabilityVerifier {
    secret: Secret,
}

impl CapabilityVerifier {
    pub fn new(secret: Secret) -> Self {
        Self { secret }
    }

    /// Sign a body into a capability. Used by issuers, never by the broker's
    /// request path.
    pub fn issue(&self, body: CapabilityBody) -> Result<Capability> {
        let signature = sign(&body, &self.secret)?;
        Ok(Capability { body, signature })
    }

    pub fn verify(&self, capability: &Capability) -> bool {
        let Ok(presented) = hex::decode(&capability.signature) else {
            return false;
        };
        let Ok(expected) = mac(&capability.body, &self.secret) else {
            return false;
        };
        if presented.len() != expected.len() {
            return false;
        }
        presented.as_slice().ct_eq(expected.as_slice()).into()
    }

    /// Check that `capability` lets `subject` perform `action` at `now`.
    pub fn assert(
        &self,
        capability: Option<&Capability>,
        subject: &str,
        action: ActionKind,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), CapabilityError> {
        let capability = capability.ok_or(CapabilityError::Missing)?;
        if !self.verify(capability) {
            return Err(CapabilityError::InvalidSignature);
        }
        if capability.subject() != subject {
            return Err(CapabilityError::SubjectMismatch {
                expected: subject.to_string(),
                actual: capability.subject().to_string(),
            });
        }
        if !capability.body.permits(action) {
            return Err(CapabilityError::ActionNotPermitted(action));
        }
        if let Some(expires_at) = capability.constraints().expires_at {
            if expires_at < now {
                return Err(CapabilityError::Expired);
            }
        }
        Ok(())
    }

    /// Merge two capabilities into a new, freshly signed one.
    ///
    /// Actions are unioned and every constraint takes its most permissive
    /// value. Neither input is modified.
    pub fn escalate(
        &self,
        a: &Capability,
        b: &Capability,
        issuer: impl Into<String>,
    ) -> Result<Capability> {
        if a.subject() != b.subject() {
            return Err(CapabilityError::SubjectConflict(
                a.subject().to_string(),
                b.subject().to_string(),
            )
            .into());
        }

        let body = CapabilityBody {
            issuer: issuer.into(),
            subject: a.subject().to_string(),
            actions: a.body.actions.union(&b.body.actions).copied().collect(),
            scope: Scope::new(format!("escalated:{}:{}", a.scope(), b.scope())),
            constraints: merge_constraints(a.constraints(), b.constraints()),
        };
        self.issue(body)
    }
}

fn merge_constraints(a: &Constraints, b: &Constraints) -> Constraints {
    Constraints {
        // No expiry on either side wins.
        expires_at: a.expires_at.zip(b.expires_at).map(|(x, y)| x.max(y)),
        rate_per_min: max_opt(a.rate_per_min, b.rate_per_min),
        budget: match (a.budget, b.budget) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (x, y) => x.or(y),
        },
        allowed_domains: union(&a.allowed_domains, &b.allowed_domains),
        allowed_paths: union(&a.allowed_paths, &b.allowed_paths),
        criticality: max_opt(a.criticality, b.criticality),
        classification: a.classification.zip(b.classification).map(|(x, y)| x.min(y)),
        credential: match (&a.credential, &b.credential) {
            (Some(x), Some(y)) if x == y => Some(x.clone()),
            _ => None,
        },
        qa_required: a.qa_required && b.qa_required,
    }
}

fn max_opt<T: Ord + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = a.to_vec();
    for item in b {
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Classification, Criticality};
    use chrono::Duration;

    fn verifier() -> CapabilityVerifier {
        CapabilityVerifier::new(Secret::from("test-secret"))
    }

    fn body() -> CapabilityBody {
        CapabilityBody::new(
            "issuer@web8",
            "agent-7",
            "sandbox:web8",
            [ActionKind::Log, ActionKind::NetworkFetch],
        )
        .with_constraints(Constraints {
            rate_per_min: Some(10),
            budget: Some(100.0),
            allowed_domains: vec!["example.com".into()],
            ..Default::default()
        })
    }

    #[test]
    fn issued_capability_verifies() {
        let cap = verifier().issue(body()).unwrap();
        assert!(verifier().verify(&cap));
    }

    #[test]
    fn wrong_secret_fails() {
        let cap = verifier().issue(body()).unwrap();
        let other = CapabilityVerifier::new(Secret::from("other"));
        assert!(!other.verify(&cap));
    }

    #[test]
    fn any_field_mutation_breaks_signature() {
        let cap = verifier().issue(body()).unwrap();
        let mutations: Vec<Box<dyn Fn(&mut CapabilityBody)>> = vec![
            Box::new(|b: &mut CapabilityBody| b.issuer.push('x')),
            Box::new(|b: &mut CapabilityBody| b.subject = "agent-8".into()),
            Box::new(|b: &mut CapabilityBody| {
                b.actions.insert(ActionKind::TokenTransfer);
            }),
            Box::new(|b: &mut CapabilityBody| b.scope = Scope::new("sandbox")),
            Box::new(|b: &mut CapabilityBody| b.constraints.rate_per_min = Some(11)),
            Box::new(|b: &mut CapabilityBody| b.constraints.budget = Some(1000.0)),
            Box::new(|b: &mut CapabilityBody| {
                b.constraints.allowed_domains.push("evil.com".into())
            }),
            Box::new(|b: &mut CapabilityBody| b.constraints.allowed_paths.push("/".into())),
            Box::new(|b: &mut CapabilityBody| b.constraints.criticality = Some(Criticality::Low)),
            Box::new(|b: &mut CapabilityBody| {
                b.constraints.classification = Some(Classification::Public)
            }),
            Box::new(|b: &mut CapabilityBody| b.constraints.credential = Some("cpa".into())),
            Box::new(|b: &mut CapabilityBody| b.constraints.qa_required = true),
            Box::new(|b: &mut CapabilityBody| b.constraints.expires_at = Some(Utc::now())),
        ];
        for mutate in mutations {
            let mut tampered = cap.clone();
            mutate(&mut tampered.body);
            assert!(!verifier().verify(&tampered), "mutation went undetected: {tampered:?}");
        }
    }

    #[test]
    fn garbage_signature_is_rejected() {
        let mut cap = verifier().issue(body()).unwrap();
        cap.signature = "not-hex".into();
        assert!(!verifier().verify(&cap));
        cap.signature = "abcd".into();
        assert!(!verifier().verify(&cap));
    }

    #[test]
    fn assert_checks_in_order() {
        let v = verifier();
        let now = Utc::now();
        assert_eq!(
            v.assert(None, "agent-7", ActionKind::Log, now),
            Err(CapabilityError::Missing)
        );

        let cap = v.issue(body()).unwrap();
        assert_eq!(v.assert(Some(&cap), "agent-7", ActionKind::Log, now), Ok(()));
        assert!(matches!(
            v.assert(Some(&cap), "agent-9", ActionKind::Log, now),
            Err(CapabilityError::SubjectMismatch { .. })
        ));
        assert_eq!(
            v.assert(Some(&cap), "agent-7", ActionKind::FileWrite, now),
            Err(CapabilityError::ActionNotPermitted(ActionKind::FileWrite))
        );

        let mut forged = cap.clone();
        forged.body.subject = "agent-9".into();
        assert_eq!(
            v.assert(Some(&forged), "agent-9", ActionKind::Log, now),
            Err(CapabilityError::InvalidSignature)
        );
    }

    #[test]
    fn expired_capability_is_rejected() {
        let v = verifier();
        let mut b = body();
        b.constraints.expires_at = Some(Utc::now() - Duration::minutes(1));
        let cap = v.issue(b).unwrap();
        assert_eq!(
            v.assert(Some(&cap), "agent-7", ActionKind::Log, Utc::now()),
            Err(CapabilityError::Expired)
        );
    }

    #[test]
    fn escalation_merges_permissively() {
        let v = verifier();
        let a = v.issue(body()).unwrap();
        let b = v
            .issue(
                CapabilityBody::new(
                    "issuer",
                    "agent-7",
                    "wallet:albion",
                    [ActionKind::TokenTransfer],
                )
                .with_constraints(Constraints {
                    rate_per_min: Some(5),
                    budget: Some(1000.0),
                    allowed_domains: vec!["example.com".into(), "api.web8.io".into()],
                    qa_required: true,
                    ..Default::default()
                }),
            )
            .unwrap();
        let before = (a.clone(), b.clone());

        let merged = v.escalate(&a, &b, "escalator").unwrap();
        assert!(v.verify(&merged));
        assert_eq!(merged.scope().as_str(), "escalated:sandbox:web8:wallet:albion");
        assert!(merged.body.permits(ActionKind::Log));
        assert!(merged.body.permits(ActionKind::TokenTransfer));
        assert_eq!(merged.constraints().rate_per_min, Some(10));
        assert_eq!(merged.constraints().budget, Some(1000.0));
        assert_eq!(merged.constraints().allowed_domains, vec!["example.com", "api.web8.io"]);
        assert!(!merged.constraints().qa_required);
        assert_eq!((a, b), before);
    }

    #[test]
    fn escalation_across_subjects_fails() {
        let v = verifier();
        let a = v.issue(body()).unwrap();
        let b = v
            .issue(CapabilityBody::new("issuer", "someone-else", "x", [ActionKind::Log]))
            .unwrap();
        assert!(matches!(
            v.escalate(&a, &b, "escalator"),
            Err(crate::Error::Capability(CapabilityError::SubjectConflict(_, _)))
        ));
    }
}
