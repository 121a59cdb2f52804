//! In-memory state stores for the Warden broker.
//!
//! This crate holds everything the broker remembers between requests: the
//! tamper-evident audit chain, the human review queue, sliding-window rate
//! counters and cumulative budgets. Nothing is written to disk; callers that
//! need durability export the audit chain and verify it offline with
//! [`verify_chain`].
//!
//! # Overview
//!
//! ## AuditLog
//!
//! The [`AuditLog`] is an append-only list of [`AuditEntry`] values. Each
//! entry stores the hash of its predecessor and its own SHA-256 hash over a
//! canonical JSON form, so changing any stored entry is detectable by
//! [`AuditLog::verify`].
//!
//! ## ApprovalQueue
//!
//! The [`ApprovalQueue`] parks requests the policy engine sent to review.
//! Items move from `PENDING` to `APPROVED` or `DENIED` exactly once.
//!
//! ## RateLimiter and BudgetManager
//!
//! [`RateLimiter`] keeps a true sliding window per key. [`BudgetManager`]
//! debits cumulative spend per scope and never commits a partial amount.
//!
//! All four types are internally synchronized and can be shared through an
//! `Arc`.
//!
//! # Example
//!
//! ```
//! use ledger::{AuditKind, AuditLog};
//! use serde_json::json;
//!
//! let log = AuditLog::new("warden");
//! log.append("agent-7", AuditKind::ActionReq, json!({"kind": "LOG"}))?;
//! log.append("policy", AuditKind::Policy, json!({"decision": "ALLOW"}))?;
//! assert!(log.verify().is_ok());
//! assert_eq!(log.export().len(), 2);
//! # Ok::<(), ledger::Error>(())
//! ```

mod approvals;
mod audit;
mod budget;
mod error;
mod rate;

pub use approvals::{ApprovalQueue, ReviewItem, ReviewStatus};
pub use audit::{AuditEntry, AuditKind, AuditLog, verify_chain};
pub use budget::BudgetManager;
pub use error::{Error, Result};
pub use rate::RateLimiter;
