//! Operator-AVS Value Ledger
//!
//! Aggregates the stake operators have opted into each AVS, at four
//! granularities: per AVS, per (AVS, operator), per (asset, AVS, operator)
//! and per (AVS, staker, operator) share.
//!
//! # Invariants
//!
//! - Every stored aggregate is ≥ 0 after any update
//! - A zero delta never touches the store
//! - Batch updates apply keys in ascending order; a failing key leaves the
//!   keys before it applied

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod error;
pub mod ledger;
pub mod types;

// Re-exports
pub use error::{Error, Result};
pub use ledger::OperatorAvsLedger;
pub use types::{AssetOptedInDelta, AssetOptedInState, AvsId, StakerShareKey, ValueField};
