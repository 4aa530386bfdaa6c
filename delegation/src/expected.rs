//! Collaborators the delegation module consumes but does not own
//!
//! The block host wires concrete implementations in; [`crate::memory`]
//! provides in-process ones.

use crate::types::ClientChainInfo;
use restaking_ledger::{AssetId, OperatorAddress};
use rust_decimal::Decimal;
use std::fmt::Debug;

/// Client-chain metadata lookup
pub trait ClientChainRegistry: Debug + Send + Sync {
    /// Metadata for a bridge chain id, `None` if unknown
    fn client_chain_info(&self, chain_id: u64) -> Option<ClientChainInfo>;
}

/// Operator registration lookup
pub trait OperatorRegistry: Debug + Send + Sync {
    /// Whether the address is a registered operator
    fn is_operator(&self, operator: &OperatorAddress) -> bool;
}

/// Slashing state queries
pub trait SlashingOracle: Debug + Send + Sync {
    /// Whether the operator is currently frozen
    fn is_operator_frozen(&self, operator: &OperatorAddress) -> bool;

    /// Fraction of the operator's stake in `asset` slashed over `[from, to]`
    ///
    /// `None` means the proportion is undefined for that window.
    fn slashed_proportion(
        &self,
        operator: &OperatorAddress,
        asset: &AssetId,
        from: u64,
        to: u64,
    ) -> Option<Decimal>;
}

/// Unbonding period source
pub trait UnbondingSchedule: Debug + Send + Sync {
    /// Height at which an undelegation requested at `request_height` completes
    fn can_undelegate_height(
        &self,
        asset: &AssetId,
        operator: &OperatorAddress,
        request_height: u64,
    ) -> u64;
}
