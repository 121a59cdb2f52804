//! Hash-chained, append-only audit log.
//!
//! Every entry commits to its predecessor:
//! `hash = sha256(canonical({id, timestamp, actor, kind, payload, prev_hash, anchor_label}))`.
//! The first entry has an empty `prev_hash`. Appends are serialized through
//! one mutex because each hash depends on the one before it.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use policy::canonical::to_canonical_string;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::error;
use uuid::Uuid;

use crate::{Error, Result};

/// The kind of event an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    /// A request arrived.
    ActionReq,
    /// The policy engine (or a later check) reached a verdict.
    Policy,
    /// An action completed, simulated or real.
    ActionRes,
    /// A provider failed.
    Error,
}

/// One committed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub kind: AuditKind,
    pub payload: Value,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Serialize)]
struct HashInput<'a> {
    id: &'a Uuid,
    timestamp: &'a DateTime<Utc>,
    actor: &'a str,
    kind: AuditKind,
    payload: &'a Value,
    prev_hash: &'a str,
    anchor_label: &'a str,
}

impl AuditEntry {
    fn compute_hash(&self, anchor_label: &str) -> Result<String> {
        let input = HashInput {
            id: &self.id,
            timestamp: &self.timestamp,
            actor: &self.actor,
            kind: self.kind,
            payload: &self.payload,
            prev_hash: &self.prev_hash,
            anchor_label,
        };
        let canonical = to_canonical_string(&input)?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }
}

/// In-memory audit chain.
pub struct AuditLog {
    anchor_label: String,
    entries: Mutex<Vec<AuditEntry>>,
}

impl AuditLog {
    /// Create an empty chain. `anchor_label` is mixed into every hash, so
    /// entries cannot be replayed into a chain with a different label.
    pub fn new(anchor_label: impl Into<String>) -> Self {
        Self {
            anchor_label: anchor_label.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn anchor_label(&self) -> &str {
        &self.anchor_label
    }

    /// Append an entry, linking it to the current head.
    pub fn append(
        &self,
        actor: impl Into<String>,
        kind: AuditKind,
        payload: Value,
    ) -> Result<AuditEntry> {
        let mut entries = self.entries.lock();
        let prev_hash = entries.last().map(|e| e.hash.clone()).unwrap_or_default();
        let mut entry = AuditEntry {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: actor.into(),
            kind,
            payload,
            prev_hash,
            hash: String::new(),
        };
        entry.hash = entry.compute_hash(&self.anchor_label)?;
        entries.push(entry.clone());
        Ok(entry)
    }

    /// Replay the chain from entry 0.
    ///
    /// A break is reported through `tracing` only; diagnostics never go back
    /// into the chain.
    pub fn verify(&self) -> Result<()> {
        let entries = self.entries.lock();
        verify_chain(&entries, &self.anchor_label).inspect_err(|e| {
            error!(anchor = %self.anchor_label, error = %e, "audit chain verification failed");
        })
    }

    pub fn is_intact(&self) -> bool {
        self.verify().is_ok()
    }

    /// A full copy of every entry, oldest first.
    pub fn export(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn head(&self) -> Option<String> {
        self.entries.lock().last().map(|e| e.hash.clone())
    }
}

/// Check linkage and recompute every hash of an exported chain.
pub fn verify_chain(entries: &[AuditEntry], anchor_label: &str) -> Result<()> {
    let mut expected_prev = String::new();
    for (index, entry) in entries.iter().enumerate() {
        if entry.prev_hash != expected_prev {
            return Err(Error::ChainBroken {
                index,
                reason: "prev_hash does not match preceding entry".to_string(),
            });
        }
        let recomputed = entry.compute_hash(anchor_label)?;
        if recomputed != entry.hash {
            return Err(Error::ChainBroken {
                index,
                reason: "hash does not match entry contents".to_string(),
            });
        }
        expected_prev = entry.hash.clone();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filled(n: usize) -> AuditLog {
        let log = AuditLog::new("test");
        for i in 0..n {
            log.append("agent", AuditKind::ActionReq, json!({ "seq": i })).unwrap();
        }
        log
    }

    #[test]
    fn chain_links_entries() {
        let log = filled(3);
        let entries = log.export();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].prev_hash, "");
        assert_eq!(entries[1].prev_hash, entries[0].hash);
        assert_eq!(entries[2].prev_hash, entries[1].hash);
        assert_eq!(log.head(), Some(entries[2].hash.clone()));
        assert!(log.verify().is_ok());
    }

    #[test]
    fn empty_chain_verifies() {
        assert!(AuditLog::new("x").is_intact());
    }

    #[test]
    fn tampered_payload_is_detected() {
        let log = filled(5);
        log.entries.lock()[2].payload = json!({ "seq": 99 });
        match log.verify() {
            Err(Error::ChainBroken { index, .. }) => assert_eq!(index, 2),
            other => panic!("expected broken chain, got {other:?}"),
        }
        assert_eq!(log.export().len(), 5);
    }

    #[test]
    fn rehashed_entry_breaks_the_link() {
        let log = filled(3);
        {
            let mut entries = log.entries.lock();
            entries[0].payload = json!("forged");
            entries[0].hash = entries[0].compute_hash("test").unwrap();
        }
        match log.verify() {
            Err(Error::ChainBroken { index, .. }) => assert_eq!(index, 1),
            other => panic!("expected broken chain, got {other:?}"),
        }
    }

    #[test]
    fn export_is_a_copy() {
        let log = filled(2);
        let mut exported = log.export();
        exported[0].actor = "mallory".into();
        assert!(log.is_intact());
        assert!(verify_chain(&exported, "test").is_err());
    }

    #[test]
    fn anchor_label_is_bound_into_hashes() {
        let log = filled(2);
        assert!(verify_chain(&log.export(), "test").is_ok());
        assert!(verify_chain(&log.export(), "other").is_err());
    }

    #[test]
    fn exported_chain_survives_json() {
        let log = filled(4);
        let json = serde_json::to_string(&log.export()).unwrap();
        let back: Vec<AuditEntry> = serde_json::from_str(&json).unwrap();
        assert!(verify_chain(&back, "test").is_ok());
    }

    #[test]
    fn concurrent_appends_keep_chain_intact() {
        let log = std::sync::Arc::new(AuditLog::new("threads"));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        log.append(format!("t{t}"), AuditKind::Policy, json!(i)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(log.len(), 200);
        assert!(log.is_intact());
    }
}
