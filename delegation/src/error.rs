//! Error types for delegation

use thiserror::Error;

/// Result type for delegation operations
pub type Result<T> = std::result::Result<T, Error>;

/// Delegation errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] restaking_ledger::Error),

    /// Malformed cross-chain payload
    #[error("Decode error: {0}")]
    Decode(String),

    /// Target is not a registered operator
    #[error("Operator does not exist: {0}")]
    OperatorNotExist(String),

    /// Target operator is frozen
    #[error("Operator is frozen: {0}")]
    OperatorFrozen(String),

    /// Requested amount is negative
    #[error("Negative amount: {0}")]
    NegativeAmount(String),

    /// Free balance is below the requested delegation
    #[error("Delegation amount too big: {0}")]
    DelegationAmountTooBig(String),

    /// Undelegatable balance is below the requested undelegation
    #[error("Undelegation amount too big: {0}")]
    UndelegationAmountTooBig(String),

    /// An undelegation with the same (operator, tx hash, nonce) already exists
    #[error("Duplicate undelegation: {0}")]
    DuplicateUndelegation(String),

    /// State is inconsistent; the block must not be committed
    #[error("Inconsistent state: {0}")]
    Inconsistent(String),
}

impl Error {
    /// Whether the error must abort the block instead of failing one tx
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Inconsistent(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_inconsistent_is_fatal() {
        assert!(Error::Inconsistent("x".into()).is_fatal());
        assert!(!Error::OperatorFrozen("x".into()).is_fatal());
        assert!(!Error::Ledger(restaking_ledger::Error::NegativeBalance("x".into())).is_fatal());
    }
}
