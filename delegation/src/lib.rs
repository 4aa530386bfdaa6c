//! Delegation
//!
//! Turns cross-chain delegate/undelegate actions into balance changes and
//! settles undelegations once their unbonding period has elapsed.
//!
//! # Architecture
//!
//! 1. **Decode**: fixed-layout event logs → [`DelegationAction`]
//! 2. **Apply**: [`DelegationKeeper`] mutates staker, operator and delegation
//!    balances immediately; an undelegation also files a pending record
//! 3. **Settle**: [`UndelegationScheduler`] runs at the end of each block and
//!    completes the records due at that height, net of any slashing
//!
//! Collaborators the module does not own (chain registry, operator set,
//! slashing state, unbonding period) are injected through the traits in
//! [`expected`].
//!
//! # Invariants
//!
//! - Conservation: for each (staker, asset), the sum over operators of
//!   `can_undelegation + wait_undelegation` equals the staker's total delegated
//! - Settled records are immutable and never settled twice
//! - `actual_completed_amount ≤ amount`, with equality iff nothing was slashed

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod decoder;
pub mod error;
pub mod expected;
pub mod keeper;
pub mod memory;
pub mod scheduler;
pub mod types;

// Re-exports
pub use decoder::decode_delegation_action;
pub use error::{Error, Result};
pub use expected::{ClientChainRegistry, OperatorRegistry, SlashingOracle, UnbondingSchedule};
pub use keeper::{ActionOutcome, DelegationKeeper};
pub use scheduler::{BlockSettlement, UndelegationScheduler};
pub use types::{
    ClientChainInfo, CrossChainOpType, DelegationAction, DelegationActionKind, DelegationAmounts,
    EventLog, UndelegationRecord, H256,
};
