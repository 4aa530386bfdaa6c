//! In-process collaborator implementations
//!
//! Used by the node binary and by tests. Mutable ones sit behind
//! `parking_lot::RwLock` so they can be shared through `Arc` with the
//! keeper while the host keeps updating them.

use crate::{
    expected::{ClientChainRegistry, OperatorRegistry, SlashingOracle, UnbondingSchedule},
    types::ClientChainInfo,
    Error, Result,
};
use parking_lot::RwLock;
use restaking_ledger::{AssetId, OperatorAddress};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/// Fixed set of client chains
#[derive(Debug, Clone, Default)]
pub struct StaticChainRegistry {
    chains: BTreeMap<u64, ClientChainInfo>,
}

impl StaticChainRegistry {
    /// Build from a chain list (later entries win on duplicate ids)
    pub fn new(chains: impl IntoIterator<Item = ClientChainInfo>) -> Self {
        Self {
            chains: chains.into_iter().map(|c| (c.chain_id, c)).collect(),
        }
    }
}

impl ClientChainRegistry for StaticChainRegistry {
    fn client_chain_info(&self, chain_id: u64) -> Option<ClientChainInfo> {
        self.chains.get(&chain_id).cloned()
    }
}

/// Registered operators
#[derive(Debug, Default)]
pub struct MemoryOperatorRegistry {
    operators: RwLock<BTreeSet<OperatorAddress>>,
}

impl MemoryOperatorRegistry {
    /// Create with an initial operator set
    pub fn new(operators: impl IntoIterator<Item = OperatorAddress>) -> Self {
        Self {
            operators: RwLock::new(operators.into_iter().collect()),
        }
    }

    /// Register an operator
    pub fn register(&self, operator: OperatorAddress) {
        self.operators.write().insert(operator);
    }
}

impl OperatorRegistry for MemoryOperatorRegistry {
    fn is_operator(&self, operator: &OperatorAddress) -> bool {
        self.operators.read().contains(operator)
    }
}

/// Recorded slash event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashEvent {
    /// Height the slash was applied at
    pub height: u64,
    /// Fraction of remaining stake slashed, in [0, 1]
    pub proportion: Decimal,
}

/// Freeze flags and slash history
#[derive(Debug, Default)]
pub struct MemorySlashing {
    frozen: RwLock<BTreeSet<OperatorAddress>>,
    slashes: RwLock<BTreeMap<(OperatorAddress, AssetId), Vec<SlashEvent>>>,
}

impl MemorySlashing {
    /// Create with nothing frozen or slashed
    pub fn new() -> Self {
        Self::default()
    }

    /// Freeze an operator
    pub fn freeze(&self, operator: &OperatorAddress) {
        self.frozen.write().insert(operator.clone());
        tracing::info!(operator = %operator, "Operator frozen");
    }

    /// Unfreeze an operator
    pub fn unfreeze(&self, operator: &OperatorAddress) {
        self.frozen.write().remove(operator);
        tracing::info!(operator = %operator, "Operator unfrozen");
    }

    /// Record a slash of `proportion` of the operator's remaining stake
    pub fn record_slash(
        &self,
        operator: &OperatorAddress,
        asset: &AssetId,
        height: u64,
        proportion: Decimal,
    ) -> Result<()> {
        if proportion < Decimal::ZERO || proportion > Decimal::ONE {
            return Err(Error::Ledger(restaking_ledger::Error::InvalidDelta(format!(
                "slash proportion {} outside [0, 1]",
                proportion
            ))));
        }

        self.slashes
            .write()
            .entry((operator.clone(), asset.clone()))
            .or_default()
            .push(SlashEvent { height, proportion });

        tracing::info!(
            operator = %operator,
            asset = %asset,
            height = height,
            proportion = %proportion,
            "Slash recorded"
        );
        Ok(())
    }
}

impl SlashingOracle for MemorySlashing {
    fn is_operator_frozen(&self, operator: &OperatorAddress) -> bool {
        self.frozen.read().contains(operator)
    }

    /// Composes every slash in `[from, to]` as `1 − Π(1 − pᵢ)`
    fn slashed_proportion(
        &self,
        operator: &OperatorAddress,
        asset: &AssetId,
        from: u64,
        to: u64,
    ) -> Option<Decimal> {
        if from > to {
            return None;
        }

        let slashes = self.slashes.read();
        let events = match slashes.get(&(operator.clone(), asset.clone())) {
            Some(events) => events,
            None => return Some(Decimal::ZERO),
        };

        let mut remaining = Decimal::ONE;
        for event in events.iter().filter(|e| e.height >= from && e.height <= to) {
            remaining = remaining.checked_mul(Decimal::ONE - event.proportion)?;
        }
        Some(Decimal::ONE - remaining)
    }
}

/// Same unbonding period for every asset and operator
#[derive(Debug, Clone, Copy)]
pub struct FixedUnbondingPeriod {
    blocks: u64,
}

impl FixedUnbondingPeriod {
    /// Unbond after `blocks` blocks
    pub fn new(blocks: u64) -> Self {
        Self { blocks }
    }
}

impl UnbondingSchedule for FixedUnbondingPeriod {
    fn can_undelegate_height(
        &self,
        _asset: &AssetId,
        _operator: &OperatorAddress,
        request_height: u64,
    ) -> u64 {
        request_height.saturating_add(self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn operator() -> OperatorAddress {
        OperatorAddress::from_bytes("stake", &[3u8; 20]).unwrap()
    }

    #[test]
    fn test_slash_composition() {
        let slashing = MemorySlashing::new();
        let asset = AssetId::from_parts(1, &[1]);
        let half = Decimal::from_str("0.5").unwrap();

        slashing.record_slash(&operator(), &asset, 12, half).unwrap();
        slashing.record_slash(&operator(), &asset, 15, half).unwrap();
        slashing.record_slash(&operator(), &asset, 40, half).unwrap();

        assert_eq!(
            slashing.slashed_proportion(&operator(), &asset, 10, 20),
            Some(Decimal::from_str("0.75").unwrap())
        );
        assert_eq!(
            slashing.slashed_proportion(&operator(), &asset, 20, 30),
            Some(Decimal::ZERO)
        );
        assert_eq!(slashing.slashed_proportion(&operator(), &asset, 30, 20), None);
    }

    #[test]
    fn test_slash_rejects_out_of_range() {
        let slashing = MemorySlashing::new();
        let asset = AssetId::from_parts(1, &[1]);
        assert!(slashing
            .record_slash(&operator(), &asset, 1, Decimal::from_str("1.01").unwrap())
            .is_err());
        assert!(slashing
            .record_slash(&operator(), &asset, 1, Decimal::from(-1))
            .is_err());
    }

    #[test]
    fn test_freeze_toggle() {
        let slashing = MemorySlashing::new();
        slashing.freeze(&operator());
        assert!(slashing.is_operator_frozen(&operator()));
        slashing.unfreeze(&operator());
        assert!(!slashing.is_operator_frozen(&operator()));
    }

    #[test]
    fn test_fixed_unbonding() {
        let period = FixedUnbondingPeriod::new(10);
        let asset = AssetId::from_parts(1, &[1]);
        assert_eq!(period.can_undelegate_height(&asset, &operator(), 10), 20);
        assert_eq!(period.can_undelegate_height(&asset, &operator(), u64::MAX), u64::MAX);
    }
}
