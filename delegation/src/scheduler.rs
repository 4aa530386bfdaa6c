//! End-of-block undelegation settlement
//!
//! Runs once per block, after every transaction of the block. Records due
//! at the current height are either pushed back (operator frozen) or
//! settled net of the slashed proportion over their unbonding window.
//!
//! Every error raised here is [`Error::Inconsistent`]: the host must abort
//! the block rather than commit a partial settlement.

use crate::{
    keeper::DelegationKeeper,
    types::{DelegationAmounts, UndelegationRecord},
    Error, Result,
};
use restaking_ledger::{
    numeric::mul_truncate, CacheStore, KvStore, OperatorAssetDelta, StakerAssetDelta,
};
use rust_decimal::Decimal;

/// What one `end_block` call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockSettlement {
    /// Height processed
    pub height: u64,
    /// Records completed, as persisted
    pub settled: Vec<UndelegationRecord>,
    /// Records pushed to a later height, as persisted
    pub rescheduled: Vec<UndelegationRecord>,
}

/// Settles due undelegations
#[derive(Debug, Clone, Copy)]
pub struct UndelegationScheduler<'k> {
    keeper: &'k DelegationKeeper,
}

impl<'k> UndelegationScheduler<'k> {
    /// Create scheduler over a keeper
    pub fn new(keeper: &'k DelegationKeeper) -> Self {
        Self { keeper }
    }

    /// Settle or reschedule every record due at `height`
    ///
    /// Nothing is written unless every record was processed.
    pub fn end_block(&self, store: &mut dyn KvStore, height: u64) -> Result<BlockSettlement> {
        let mut cache = CacheStore::new(store);
        let due = self
            .keeper
            .due_undelegation_records(&cache, height)
            .map_err(|e| fatal(height, e))?;

        let mut outcome = BlockSettlement {
            height,
            ..BlockSettlement::default()
        };
        if due.is_empty() {
            return Ok(outcome);
        }

        for record in due {
            if !record.is_pending {
                return Err(Error::Inconsistent(format!(
                    "settled record {} (nonce {}) is still indexed at height {}",
                    record.tx_hash, record.nonce, height
                )));
            }

            if self.keeper.slashing().is_operator_frozen(&record.operator) {
                let moved = self.reschedule(&mut cache, record, height)?;
                outcome.rescheduled.push(moved);
            } else {
                let settled = self.settle(&mut cache, record, height)?;
                outcome.settled.push(settled);
            }
        }

        cache.commit().map_err(|e| fatal(height, e))?;

        tracing::info!(
            height = height,
            settled = outcome.settled.len(),
            rescheduled = outcome.rescheduled.len(),
            "Undelegations processed"
        );
        Ok(outcome)
    }

    fn reschedule(
        &self,
        store: &mut dyn KvStore,
        mut record: UndelegationRecord,
        height: u64,
    ) -> Result<UndelegationRecord> {
        let next = self.keeper.unbonding().can_undelegate_height(
            &record.asset_id,
            &record.operator,
            height,
        );
        if next <= height {
            return Err(Error::Inconsistent(format!(
                "rescheduled completion height {} is not after current height {}",
                next, height
            )));
        }

        self.keeper
            .remove_height_index(store, &record)
            .map_err(|e| fatal(height, e))?;
        let previous = record.completion_height;
        record.completion_height = next;
        self.keeper
            .set_undelegation_record(store, &record)
            .map_err(|e| fatal(height, e))?;

        tracing::warn!(
            operator = %record.operator,
            staker = %record.staker_id,
            nonce = record.nonce,
            previous = previous,
            next = next,
            "Operator frozen, undelegation rescheduled"
        );
        Ok(record)
    }

    fn settle(
        &self,
        store: &mut dyn KvStore,
        mut record: UndelegationRecord,
        height: u64,
    ) -> Result<UndelegationRecord> {
        let proportion = self
            .keeper
            .slashing()
            .slashed_proportion(
                &record.operator,
                &record.asset_id,
                record.block_number,
                record.completion_height,
            )
            .ok_or_else(|| {
                Error::Inconsistent(format!(
                    "slashed proportion undefined for {} over [{}, {}]",
                    record.operator, record.block_number, record.completion_height
                ))
            })?;
        if proportion < Decimal::ZERO || proportion > Decimal::ONE {
            return Err(Error::Inconsistent(format!(
                "slashed proportion {} outside [0, 1]",
                proportion
            )));
        }

        let amount = record.amount;
        let actual =
            mul_truncate(amount, Decimal::ONE - proportion).map_err(|e| fatal(height, e))?;
        let amount_neg = amount.neg().map_err(|e| fatal(height, e))?;
        let actual_neg = actual.neg().map_err(|e| fatal(height, e))?;

        let assets = self.keeper.assets();
        self.keeper
            .update_delegation_state(
                store,
                &record.staker_id,
                &record.asset_id,
                &record.operator,
                DelegationAmounts {
                    wait_undelegation_amount: amount_neg,
                    ..DelegationAmounts::default()
                },
            )
            .map_err(|e| fatal(height, e))?;
        self.keeper
            .update_staker_delegation_total(store, &record.staker_id, &record.asset_id, amount_neg)
            .map_err(|e| fatal(height, e))?;
        assets
            .update_staker_asset_state(
                store,
                &record.staker_id,
                &record.asset_id,
                StakerAssetDelta {
                    can_withdraw_amount: actual,
                    wait_undelegation_amount: amount_neg,
                    ..StakerAssetDelta::default()
                },
            )
            .map_err(|e| fatal(height, e))?;
        assets
            .update_operator_asset_state(
                store,
                &record.operator,
                &record.asset_id,
                OperatorAssetDelta {
                    total_amount: actual_neg,
                    wait_undelegation_amount: amount_neg,
                },
            )
            .map_err(|e| fatal(height, e))?;

        self.keeper
            .remove_height_index(store, &record)
            .map_err(|e| fatal(height, e))?;
        record.actual_completed_amount = actual;
        record.is_pending = false;
        self.keeper
            .set_undelegation_record(store, &record)
            .map_err(|e| fatal(height, e))?;

        tracing::info!(
            operator = %record.operator,
            staker = %record.staker_id,
            asset = %record.asset_id,
            amount = %amount,
            actual = %actual,
            proportion = %proportion,
            "Undelegation completed"
        );
        Ok(record)
    }
}

impl DelegationKeeper {
    /// Run end-of-block settlement at `height`
    pub fn end_block(&self, store: &mut dyn KvStore, height: u64) -> Result<BlockSettlement> {
        UndelegationScheduler::new(self).end_block(store, height)
    }
}

/// Escalate any error met during settlement
fn fatal(height: u64, err: impl Into<Error>) -> Error {
    match err.into() {
        Error::Inconsistent(msg) => Error::Inconsistent(msg),
        other => Error::Inconsistent(format!("settlement at height {} failed: {}", height, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expected::{SlashingOracle, UnbondingSchedule};
    use crate::memory::{FixedUnbondingPeriod, MemoryOperatorRegistry, MemorySlashing, StaticChainRegistry};
    use crate::types::{ClientChainInfo, DelegationAction, DelegationActionKind, H256};
    use restaking_ledger::{Amount, AssetId, MemoryStore, OperatorAddress};
    use std::str::FromStr;
    use std::sync::Arc;

    fn operator() -> OperatorAddress {
        OperatorAddress::from_bytes("stake", &[1u8; 20]).unwrap()
    }

    fn keeper_with(
        slashing: Arc<dyn SlashingOracle>,
        unbonding: Arc<dyn UnbondingSchedule>,
    ) -> DelegationKeeper {
        DelegationKeeper::new(
            Arc::new(StaticChainRegistry::new(vec![ClientChainInfo {
                name: "sepolia".to_string(),
                chain_id: 101,
                address_length: 20,
            }])),
            Arc::new(MemoryOperatorRegistry::new(vec![operator()])),
            slashing,
            unbonding,
        )
    }

    fn action(kind: DelegationActionKind, amount: i64, nonce: u64) -> DelegationAction {
        DelegationAction {
            client_chain_id: 101,
            kind,
            asset_address: vec![0xaa; 20],
            operator: operator(),
            staker_address: vec![0x11; 20],
            amount: Amount::from(amount),
            nonce,
            tx_hash: H256([nonce as u8; 32]),
        }
    }

    /// Deposit 1000, delegate 100, undelegate 40 at height 10
    fn setup(keeper: &DelegationKeeper, store: &mut MemoryStore) -> UndelegationRecord {
        let d = action(DelegationActionKind::DelegateTo, 100, 1);
        keeper
            .assets()
            .deposit(store, &d.staker_id(), &d.asset_id(), Amount::from(1000))
            .unwrap();
        keeper.delegate_to(store, &d).unwrap();
        let u = action(DelegationActionKind::UndelegateFrom, 40, 2);
        keeper.undelegate_from(store, &u, 10).unwrap()
    }

    #[test]
    fn test_settle_with_slash() {
        let slashing = Arc::new(MemorySlashing::new());
        let keeper = keeper_with(slashing.clone(), Arc::new(FixedUnbondingPeriod::new(10)));
        let mut store = MemoryStore::new();
        let record = setup(&keeper, &mut store);
        slashing
            .record_slash(&operator(), &record.asset_id, 15, Decimal::from_str("0.25").unwrap())
            .unwrap();

        assert!(keeper.end_block(&mut store, 19).unwrap().settled.is_empty());
        let outcome = keeper.end_block(&mut store, 20).unwrap();
        assert_eq!(outcome.settled.len(), 1);

        let settled = &outcome.settled[0];
        assert!(!settled.is_pending);
        assert_eq!(settled.actual_completed_amount, Amount::from(30));

        let staker = action(DelegationActionKind::DelegateTo, 0, 0).staker_id();
        let state = keeper
            .assets()
            .staker_asset_state(&store, &staker, &record.asset_id)
            .unwrap();
        assert_eq!(state.can_withdraw_amount, Amount::from(930));
        assert_eq!(state.wait_undelegation_amount, Amount::ZERO);

        let op_state = keeper
            .assets()
            .operator_asset_state(&store, &operator(), &record.asset_id)
            .unwrap();
        assert_eq!(op_state.total_amount, Amount::from(70));
        assert_eq!(op_state.wait_undelegation_amount, Amount::ZERO);

        assert_eq!(
            keeper
                .staker_delegation_total(&store, &staker, &record.asset_id)
                .unwrap(),
            Amount::from(60)
        );

        // Settled records never come back
        assert!(keeper.end_block(&mut store, 20).unwrap().settled.is_empty());
        assert!(keeper.pending_undelegation_records(&store).unwrap().is_empty());
    }

    #[test]
    fn test_frozen_operator_reschedules() {
        let slashing = Arc::new(MemorySlashing::new());
        let keeper = keeper_with(slashing.clone(), Arc::new(FixedUnbondingPeriod::new(10)));
        let mut store = MemoryStore::new();
        setup(&keeper, &mut store);

        slashing.freeze(&operator());
        let outcome = keeper.end_block(&mut store, 20).unwrap();
        assert!(outcome.settled.is_empty());
        assert_eq!(outcome.rescheduled.len(), 1);
        assert_eq!(outcome.rescheduled[0].completion_height, 30);
        assert!(outcome.rescheduled[0].is_pending);

        assert!(keeper.due_undelegation_records(&store, 20).unwrap().is_empty());
        assert_eq!(keeper.due_undelegation_records(&store, 30).unwrap().len(), 1);

        slashing.unfreeze(&operator());
        let outcome = keeper.end_block(&mut store, 30).unwrap();
        assert_eq!(outcome.settled[0].actual_completed_amount, Amount::from(40));
    }

    #[derive(Debug)]
    struct StuckUnbonding;

    impl UnbondingSchedule for StuckUnbonding {
        fn can_undelegate_height(&self, _: &AssetId, _: &OperatorAddress, request: u64) -> u64 {
            if request == 10 {
                20
            } else {
                request
            }
        }
    }

    #[test]
    fn test_non_advancing_reschedule_is_fatal() {
        let slashing = Arc::new(MemorySlashing::new());
        let keeper = keeper_with(slashing.clone(), Arc::new(StuckUnbonding));
        let mut store = MemoryStore::new();
        setup(&keeper, &mut store);
        let before = restaking_ledger::state_digest(&store).unwrap();

        slashing.freeze(&operator());
        let err = keeper.end_block(&mut store, 20).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(restaking_ledger::state_digest(&store).unwrap(), before);
    }

    #[derive(Debug)]
    struct BrokenOracle(Option<Decimal>);

    impl SlashingOracle for BrokenOracle {
        fn is_operator_frozen(&self, _: &OperatorAddress) -> bool {
            false
        }

        fn slashed_proportion(&self, _: &OperatorAddress, _: &AssetId, _: u64, _: u64) -> Option<Decimal> {
            self.0
        }
    }

    #[test]
    fn test_invalid_proportion_is_fatal() {
        for proportion in [None, Some(Decimal::from(2)), Some(Decimal::from(-1))] {
            let keeper = keeper_with(
                Arc::new(BrokenOracle(proportion)),
                Arc::new(FixedUnbondingPeriod::new(10)),
            );
            let mut store = MemoryStore::new();
            setup(&keeper, &mut store);
            let err = keeper.end_block(&mut store, 20).unwrap_err();
            assert!(err.is_fatal(), "{:?} should be fatal", proportion);
            assert_eq!(keeper.due_undelegation_records(&store, 20).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_same_height_settles_in_nonce_order() {
        let keeper = keeper_with(
            Arc::new(MemorySlashing::new()),
            Arc::new(FixedUnbondingPeriod::new(10)),
        );
        let mut store = MemoryStore::new();
        setup(&keeper, &mut store);
        let u = action(DelegationActionKind::UndelegateFrom, 5, 0);
        keeper.undelegate_from(&mut store, &u, 10).unwrap();

        let outcome = keeper.end_block(&mut store, 20).unwrap();
        let nonces: Vec<u64> = outcome.settled.iter().map(|r| r.nonce).collect();
        assert_eq!(nonces, vec![0, 2]);
    }
}
