//! Error types for the node

use thiserror::Error;

/// Result type for node operations
pub type Result<T> = std::result::Result<T, Error>;

/// Node errors
#[derive(Error, Debug)]
pub enum Error {
    /// Delegation error
    #[error("Delegation error: {0}")]
    Delegation(#[from] delegation::Error),

    /// Operator-AVS ledger error
    #[error("Operator AVS error: {0}")]
    OperatorAvs(#[from] operator_avs::Error),

    /// Ledger error
    #[error("Ledger error: {0}")]
    Ledger(#[from] restaking_ledger::Error),

    /// Block could not be applied; nothing of it was committed
    #[error("Fatal error at height {height}: {reason}")]
    Fatal {
        /// Block height
        height: u64,
        /// What went wrong
        reason: String,
    },

    /// Block out of sequence
    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Metrics error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error must abort the block instead of failing one tx
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Fatal { .. } => true,
            Error::Delegation(delegation::Error::Ledger(inner)) | Error::Ledger(inner) => {
                is_storage_failure(inner)
            }
            Error::OperatorAvs(operator_avs::Error::Ledger(inner)) => is_storage_failure(inner),
            Error::Delegation(err) => err.is_fatal(),
            _ => false,
        }
    }
}

fn is_storage_failure(err: &restaking_ledger::Error) -> bool {
    matches!(
        err,
        restaking_ledger::Error::Storage(_)
            | restaking_ledger::Error::Io(_)
            | restaking_ledger::Error::Serialization(_)
    )
}
