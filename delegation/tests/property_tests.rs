//! Property-based tests for delegation invariants
//!
//! These tests use proptest to verify:
//! - Non-negativity: no balance ever drops below zero
//! - Conservation: Σ over operators (can + wait) == staker total delegated
//! - Slash monotonicity: actual completed ≤ requested, equal iff unslashed
//! - Settlement idempotence: settled records never re-enter settlement

use delegation::{
    memory::{FixedUnbondingPeriod, MemoryOperatorRegistry, MemorySlashing, StaticChainRegistry},
    ClientChainInfo, DelegationAction, DelegationActionKind, DelegationKeeper, H256,
};
use proptest::prelude::*;
use restaking_ledger::{Amount, AssetId, MemoryStore, OperatorAddress, StakerId};
use rust_decimal::Decimal;
use std::sync::Arc;

const UNBONDING_BLOCKS: u64 = 5;

fn operators() -> Vec<OperatorAddress> {
    (1u8..=3)
        .map(|n| OperatorAddress::from_bytes("stake", &[n; 20]).unwrap())
        .collect()
}

fn keeper(slashing: Arc<MemorySlashing>) -> DelegationKeeper {
    DelegationKeeper::new(
        Arc::new(StaticChainRegistry::new(vec![ClientChainInfo {
            name: "sepolia".to_string(),
            chain_id: 101,
            address_length: 20,
        }])),
        Arc::new(MemoryOperatorRegistry::new(operators())),
        slashing,
        Arc::new(FixedUnbondingPeriod::new(UNBONDING_BLOCKS)),
    )
}

/// One step of a random scenario
#[derive(Debug, Clone)]
enum Step {
    Delegate { operator: usize, amount: i64 },
    Undelegate { operator: usize, amount: i64 },
    Slash { operator: usize, bps: i64 },
    Freeze { operator: usize },
    Unfreeze { operator: usize },
    EndBlock,
}

/// Strategy for generating scenario steps
fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0usize..3, 0i64..400).prop_map(|(operator, amount)| Step::Delegate { operator, amount }),
        3 => (0usize..3, 0i64..200).prop_map(|(operator, amount)| Step::Undelegate { operator, amount }),
        1 => (0usize..3, 0i64..=10_000).prop_map(|(operator, bps)| Step::Slash { operator, bps }),
        1 => (0usize..3).prop_map(|operator| Step::Freeze { operator }),
        1 => (0usize..3).prop_map(|operator| Step::Unfreeze { operator }),
        3 => Just(Step::EndBlock),
    ]
}

fn action(kind: DelegationActionKind, operator: &OperatorAddress, amount: i64, nonce: u64) -> DelegationAction {
    DelegationAction {
        client_chain_id: 101,
        kind,
        asset_address: vec![0xaa; 20],
        operator: operator.clone(),
        staker_address: vec![0x11; 20],
        amount: Amount::from(amount),
        nonce,
        tx_hash: H256::from_u64_prefix(nonce),
    }
}

fn ids() -> (StakerId, AssetId) {
    let probe = action(DelegationActionKind::DelegateTo, &operators()[0], 0, 0);
    (probe.staker_id(), probe.asset_id())
}

fn assert_invariants(keeper: &DelegationKeeper, store: &MemoryStore) -> Result<(), TestCaseError> {
    let (staker, asset) = ids();

    let staker_state = keeper.assets().staker_asset_state(store, &staker, &asset).unwrap();
    prop_assert!(!staker_state.can_withdraw_amount.is_negative());
    prop_assert!(!staker_state.wait_undelegation_amount.is_negative());

    let mut delegated = Amount::ZERO;
    let mut waiting = Amount::ZERO;
    for operator in operators() {
        let d = keeper.delegation_info(store, &staker, &asset, &operator).unwrap();
        prop_assert!(!d.can_undelegation_amount.is_negative());
        prop_assert!(!d.wait_undelegation_amount.is_negative());
        delegated = delegated
            .checked_add(d.can_undelegation_amount)
            .and_then(|x| x.checked_add(d.wait_undelegation_amount))
            .unwrap();
        waiting = waiting.checked_add(d.wait_undelegation_amount).unwrap();

        let op = keeper.assets().operator_asset_state(store, &operator, &asset).unwrap();
        prop_assert!(!op.total_amount.is_negative());
        prop_assert!(!op.wait_undelegation_amount.is_negative());
    }

    prop_assert_eq!(delegated, keeper.staker_delegation_total(store, &staker, &asset).unwrap());
    prop_assert_eq!(waiting, staker_state.wait_undelegation_amount);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Balances stay non-negative and delegations stay conserved under
    /// any interleaving of actions, slashes, freezes and block ends
    #[test]
    fn prop_balances_conserved(steps in prop::collection::vec(step_strategy(), 1..60)) {
        let slashing = Arc::new(MemorySlashing::new());
        let keeper = keeper(slashing.clone());
        let mut store = MemoryStore::new();
        let operators = operators();
        let (staker, asset) = ids();

        keeper.assets().deposit(&mut store, &staker, &asset, Amount::from(2_000)).unwrap();

        let mut height = 1u64;
        let mut nonce = 1u64;
        for step in steps {
            match step {
                Step::Delegate { operator, amount } => {
                    let a = action(DelegationActionKind::DelegateTo, &operators[operator], amount, nonce);
                    // Rejections are fine, partial writes are not
                    let _ = keeper.delegate_to(&mut store, &a);
                    nonce += 1;
                }
                Step::Undelegate { operator, amount } => {
                    let a = action(DelegationActionKind::UndelegateFrom, &operators[operator], amount, nonce);
                    let _ = keeper.undelegate_from(&mut store, &a, height);
                    nonce += 1;
                }
                Step::Slash { operator, bps } => {
                    slashing
                        .record_slash(&operators[operator], &asset, height, Decimal::new(bps, 4))
                        .unwrap();
                }
                Step::Freeze { operator } => slashing.freeze(&operators[operator]),
                Step::Unfreeze { operator } => slashing.unfreeze(&operators[operator]),
                Step::EndBlock => {
                    let outcome = keeper.end_block(&mut store, height).unwrap();
                    for record in &outcome.settled {
                        prop_assert!(record.actual_completed_amount <= record.amount);
                        prop_assert!(!record.actual_completed_amount.is_negative());
                    }
                    height += 1;
                }
            }
            assert_invariants(&keeper, &store)?;
        }
    }

    /// actual == amount iff the proportion is zero, else strictly less
    #[test]
    fn prop_slash_monotonic(amount in 1i64..1_000_000, bps in 0i64..=10_000) {
        let slashing = Arc::new(MemorySlashing::new());
        let keeper = keeper(slashing.clone());
        let mut store = MemoryStore::new();
        let operator = &operators()[0];
        let (staker, asset) = ids();

        keeper.assets().deposit(&mut store, &staker, &asset, Amount::from(amount)).unwrap();
        keeper
            .delegate_to(&mut store, &action(DelegationActionKind::DelegateTo, operator, amount, 1))
            .unwrap();
        let record = keeper
            .undelegate_from(&mut store, &action(DelegationActionKind::UndelegateFrom, operator, amount, 2), 1)
            .unwrap();
        slashing.record_slash(operator, &asset, 2, Decimal::new(bps, 4)).unwrap();

        let outcome = keeper.end_block(&mut store, record.completion_height).unwrap();
        prop_assert_eq!(outcome.settled.len(), 1);
        let actual = outcome.settled[0].actual_completed_amount;

        if bps == 0 {
            prop_assert_eq!(actual, Amount::from(amount));
        } else {
            // floor(amount * (1 - p)) < amount for any p > 0
            prop_assert!(actual < Amount::from(amount));
        }

        // Settling the same height again is a no-op
        let again = keeper.end_block(&mut store, record.completion_height).unwrap();
        prop_assert!(again.settled.is_empty());
    }
}
