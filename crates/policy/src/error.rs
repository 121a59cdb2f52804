//! Policy error types.

use thiserror::Error;

use crate::ActionKind;

/// Policy errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The policy configuration is invalid.
    #[error("invalid policy: {0}")]
    Invalid(String),

    /// Failed to parse a policy file.
    #[error("failed to parse policy: {0}")]
    Parse(String),

    /// A value could not be brought into canonical form.
    #[error("canonical serialization failed: {0}")]
    Canonical(#[from] serde_json::Error),

    /// A capability failed verification or assertion.
    #[error(transparent)]
    Capability(#[from] CapabilityError),

    /// An I/O error occurred while reading policy.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a capability fails [`CapabilityVerifier::assert`](crate::CapabilityVerifier::assert).
///
/// Variants are listed in the order the checks run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("capability required but none attached")]
    Missing,

    #[error("capability signature invalid")]
    InvalidSignature,

    #[error("capability subject '{actual}' does not match requester '{expected}'")]
    SubjectMismatch { expected: String, actual: String },

    #[error("capability does not permit {0}")]
    ActionNotPermitted(ActionKind),

    #[error("capability expired")]
    Expired,

    #[error("capability does not permit host '{0}'")]
    DomainNotPermitted(String),

    #[error("capability does not permit path '{0}'")]
    PathNotPermitted(String),

    #[error("cannot escalate capabilities of different subjects ('{0}' vs '{1}')")]
    SubjectConflict(String, String),
}

pub type Result<T> = std::result::Result<T, Error>;
