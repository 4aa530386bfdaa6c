//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB or store misuse)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Malformed composite key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Address does not parse as an account address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Applying a delta would drive a balance below zero
    #[error("Negative balance: {0}")]
    NegativeBalance(String),

    /// Arithmetic overflow
    #[error("Overflow: {0}")]
    Overflow(String),

    /// Delta or factor outside the accepted domain
    #[error("Invalid delta: {0}")]
    InvalidDelta(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
