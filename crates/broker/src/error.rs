use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Ledger(#[from] ledger::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
