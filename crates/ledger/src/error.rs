use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),

    #[error("audit chain broken at entry {index}: {reason}")]
    ChainBroken { index: usize, reason: String },

    #[error("budget exceeded for '{key}': usage {usage} + {amount} > limit {limit}")]
    BudgetExceeded {
        key: String,
        usage: f64,
        amount: f64,
        limit: f64,
    },

    #[error("invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("review item not found: {0}")]
    NotFound(Uuid),

    #[error("review item {id} already resolved as {status}")]
    AlreadyResolved { id: Uuid, status: String },

    #[error("review item {0} is not approved")]
    NotApproved(Uuid),

    #[error("review item {0} was already executed")]
    AlreadyExecuted(Uuid),
}

pub type Result<T> = std::result::Result<T, Error>;
