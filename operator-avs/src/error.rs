//! Error types for the operator-AVS ledger

use thiserror::Error;

/// Result type for value ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Value ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] restaking_ledger::Error),

    /// Update would leave an aggregate negative or overflowed
    #[error("Invalid aggregate: {0}")]
    AggregateInvalid(String),

    /// Key not present
    #[error("Not found: {0}")]
    NotFound(String),

    /// Identifier cannot be used as a key component
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

impl Error {
    /// Map a numeric-primitive failure onto [`Error::AggregateInvalid`]
    pub(crate) fn from_update(err: restaking_ledger::Error) -> Self {
        match err {
            restaking_ledger::Error::NegativeBalance(msg)
            | restaking_ledger::Error::Overflow(msg)
            | restaking_ledger::Error::InvalidDelta(msg) => Error::AggregateInvalid(msg),
            other => Error::Ledger(other),
        }
    }
}
