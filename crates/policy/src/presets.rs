//! Standard capability packs issued to agents.

use crate::{ActionKind, CapabilityBody, Constraints, Criticality};

/// Sandbox-scoped pack for maintenance work: logging, fetches, file access
/// and process spawns.
pub fn basic(issuer: &str, subject: &str, scope: &str, rate_per_min: u32) -> CapabilityBody {
    use ActionKind::*;
    let actions = [Log, NetworkFetch, FileRead, FileWrite, SpawnProcess];
    CapabilityBody::new(issuer, subject, scope, actions).with_constraints(Constraints {
        rate_per_min: Some(rate_per_min),
        criticality: Some(Criticality::Low),
        ..Default::default()
    })
}

/// Wallet pack for the given ledger (`wallet:<ledger>` scope) with a spend
/// ceiling. `with_db` adds database writes.
pub fn wallet(
    issuer: &str,
    subject: &str,
    ledger: &str,
    rate_per_min: u32,
    budget: f64,
    with_db: bool,
) -> CapabilityBody {
    use ActionKind::*;
    let mut actions = vec![TokenTransfer, NetworkFetch, Log, FileRead, FileWrite];
    if with_db {
        actions.push(WriteDb);
    }
    CapabilityBody::new(
        issuer,
        subject,
        format!("wallet:{}", ledger.to_ascii_lowercase()),
        actions,
    )
    .with_constraints(Constraints {
        rate_per_min: Some(rate_per_min),
        budget: Some(budget),
        criticality: Some(Criticality::High),
        ..Default::default()
    })
}

/// The junior wallet: ten transfers a minute, 100 units total.
pub fn junior(issuer: &str, subject: &str) -> CapabilityBody {
    wallet(issuer, subject, "junior", 10, 100.0, false)
}

/// The albion wallet: five transfers a minute, 1000 units total, database
/// writes included.
pub fn albion(issuer: &str, subject: &str) -> CapabilityBody {
    wallet(issuer, subject, "albion", 5, 1000.0, true)
}
