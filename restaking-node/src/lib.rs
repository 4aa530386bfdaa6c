//! Restaking Node
//!
//! Block host for the restaking accounting core: applies each block's
//! transactions in order, runs end-of-block undelegation settlement and
//! commits the block atomically.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Block (height, txs)                         │
//! └────────────────────┬─────────────────────────┘
//!                      │ per tx: own cache, failed tx → receipt only
//!                      ↓
//! ┌──────────────────────────────────────────────┐
//! │  Delegation keeper  |  Operator-AVS ledger   │
//! └────────────────────┬─────────────────────────┘
//!                      │ end_block(height)
//!                      ↓
//! ┌──────────────────────────────────────────────┐
//! │  Block cache → commit → app hash (SHA-256)   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - A fatal error aborts the whole block; nothing of it is committed
//! - Same blocks on the same initial state → same app hash

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod processor;

// Re-exports
pub use config::NodeConfig;
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use processor::{Block, BlockProcessor, BlockResult, BlockTx, TxReceipt};
