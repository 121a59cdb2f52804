//! Warden broker: capability-checked mediation of agent side effects.
//!
//! This crate ties the policy engine and the ledger stores together into a
//! single entry point that every agent-initiated action must pass through.
//!
//! # Overview
//!
//! The broker is organized around these concepts:
//!
//! - **ActionBroker**: Audits each request, asks the
//!   [`PolicyEngine`](policy::PolicyEngine) for a verdict, enforces
//!   capabilities, rate limits and budgets, then simulates or dispatches.
//! - **Provider**: A trait for the component that performs the real side
//!   effect for one action kind. Built-in providers live in [`providers`].
//! - **Clock**: The time source for capability expiry and rate windows.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use broker::{ActionBroker, ProviderRegistry, providers::LogProvider};
//! use policy::{
//!     ActionKind, ActionParams, ActionRequest, CapabilityVerifier, Environment, Policy,
//!     PolicyEngine,
//! };
//!
//! # async fn example() {
//! let engine = PolicyEngine::new(Policy::default(), Environment::from_env());
//! let verifier = CapabilityVerifier::new("secret".into());
//! let providers = ProviderRegistry::new().with(ActionKind::Log, Arc::new(LogProvider));
//! let broker = ActionBroker::builder(engine, verifier).providers(providers).build();
//!
//! let outcome = broker
//!     .handle(ActionRequest::new("agent-7", ActionParams::log("hello")).dry_run(false))
//!     .await;
//! assert!(outcome.ok);
//! # }
//! ```

mod broker;
mod clock;
mod error;
mod provider;
pub mod providers;

// Orchestration
pub use broker::{
    ActionBroker, ActionBrokerBuilder, ActionOutcome, BrokerSettings, BrokerStatus,
    capability_required, default_rate_limit,
};

// Time
pub use clock::{Clock, ManualClock, SystemClock};

// Error types
pub use error::{Error, Result};

// Provider contract
pub use provider::{Provider, ProviderError, ProviderRegistry};
