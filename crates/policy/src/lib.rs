//! Capability-based policy system.
//!
//! Core principle: **All side effects require an explicit decision.**
//!
//! This crate holds the request model ([`ActionRequest`]), signed
//! [`Capability`] grants and their [`CapabilityVerifier`], the static
//! [`Policy`] tables and the [`PolicyEngine`] that turns a request into a
//! [`PolicyDecision`]. Nothing here keeps state between calls.

mod action;
pub mod canonical;
mod capability;
mod decision;
pub mod engine;
mod error;
mod policy;
pub mod presets;
mod verifier;

pub use action::{ActionKind, ActionParams, ActionRequest, RequestMeta};
pub use capability::{Capability, CapabilityBody, Classification, Constraints, Criticality, Scope};
pub use decision::{Decision, MetaPatch, PolicyDecision, Requirement};
pub use engine::{PolicyEngine, Rule, RuleContext};
pub use error::{CapabilityError, Error, Result};
pub use policy::{Environment, Policy};
pub use verifier::{CapabilityVerifier, Secret, sign};
