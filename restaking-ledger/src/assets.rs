//! Per-asset balances of stakers and operators
//!
//! Balances are only ever changed through signed deltas. Every field of a
//! delta is validated before anything is written, so a rejected update
//! leaves the stored state untouched.

use crate::{
    keys::{KeyReader, Namespace, StoreKey},
    numeric::apply_amount_delta,
    store::{KvStore, KvStoreExt},
    types::{Amount, AssetId, OperatorAddress, StakerId},
    Error, Result,
};
use serde::{Deserialize, Serialize};

/// Balances of one staker in one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StakerAssetState {
    /// Everything ever deposited minus withdrawals
    pub total_deposit_amount: Amount,
    /// Free balance (deposited, not delegated)
    pub can_withdraw_amount: Amount,
    /// Amount in the unbonding queue
    pub wait_undelegation_amount: Amount,
}

/// Signed change to a [`StakerAssetState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StakerAssetDelta {
    /// Change to `total_deposit_amount`
    pub total_deposit_amount: Amount,
    /// Change to `can_withdraw_amount`
    pub can_withdraw_amount: Amount,
    /// Change to `wait_undelegation_amount`
    pub wait_undelegation_amount: Amount,
}

/// Balances delegated to one operator in one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OperatorAssetState {
    /// Total delegated amount
    pub total_amount: Amount,
    /// Amount in the unbonding queue
    pub wait_undelegation_amount: Amount,
}

/// Signed change to an [`OperatorAssetState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperatorAssetDelta {
    /// Change to `total_amount`
    pub total_amount: Amount,
    /// Change to `wait_undelegation_amount`
    pub wait_undelegation_amount: Amount,
}

/// Asset ledger over an injected store
#[derive(Debug, Clone, Copy, Default)]
pub struct AssetLedger;

impl AssetLedger {
    /// Create ledger handle
    pub fn new() -> Self {
        Self
    }

    fn staker_key(staker: &StakerId, asset: &AssetId) -> StoreKey {
        StoreKey::new(Namespace::StakerAsset)
            .segment(staker.as_str())
            .segment(asset.as_str())
    }

    fn operator_key(operator: &OperatorAddress, asset: &AssetId) -> StoreKey {
        StoreKey::new(Namespace::OperatorAsset)
            .segment(operator.as_str())
            .segment(asset.as_str())
    }

    /// Staker balances, zero if never touched
    pub fn staker_asset_state(
        &self,
        store: &dyn KvStore,
        staker: &StakerId,
        asset: &AssetId,
    ) -> Result<StakerAssetState> {
        store.get_or_default(Self::staker_key(staker, asset).as_bytes())
    }

    /// Apply a signed delta to a staker's balances
    pub fn update_staker_asset_state(
        &self,
        store: &mut dyn KvStore,
        staker: &StakerId,
        asset: &AssetId,
        delta: StakerAssetDelta,
    ) -> Result<StakerAssetState> {
        let key = Self::staker_key(staker, asset);
        let current: StakerAssetState = store.get_or_default(key.as_bytes())?;

        let updated = StakerAssetState {
            total_deposit_amount: apply_amount_delta(
                current.total_deposit_amount,
                delta.total_deposit_amount,
                "total_deposit_amount",
            )?,
            can_withdraw_amount: apply_amount_delta(
                current.can_withdraw_amount,
                delta.can_withdraw_amount,
                "can_withdraw_amount",
            )?,
            wait_undelegation_amount: apply_amount_delta(
                current.wait_undelegation_amount,
                delta.wait_undelegation_amount,
                "wait_undelegation_amount",
            )?,
        };

        if updated != current {
            store.put_typed(key.as_bytes(), &updated)?;
        }

        tracing::debug!(
            staker = %staker,
            asset = %asset,
            can_withdraw = %updated.can_withdraw_amount,
            wait_undelegation = %updated.wait_undelegation_amount,
            "Staker asset state updated"
        );

        Ok(updated)
    }

    /// Credit a deposit to both the deposit total and the free balance
    pub fn deposit(
        &self,
        store: &mut dyn KvStore,
        staker: &StakerId,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<StakerAssetState> {
        if amount.is_negative() {
            return Err(Error::InvalidDelta(format!("negative deposit {}", amount)));
        }

        self.update_staker_asset_state(
            store,
            staker,
            asset,
            StakerAssetDelta {
                total_deposit_amount: amount,
                can_withdraw_amount: amount,
                ..StakerAssetDelta::default()
            },
        )
    }

    /// Operator balances, zero if never touched
    pub fn operator_asset_state(
        &self,
        store: &dyn KvStore,
        operator: &OperatorAddress,
        asset: &AssetId,
    ) -> Result<OperatorAssetState> {
        store.get_or_default(Self::operator_key(operator, asset).as_bytes())
    }

    /// Apply a signed delta to an operator's balances
    pub fn update_operator_asset_state(
        &self,
        store: &mut dyn KvStore,
        operator: &OperatorAddress,
        asset: &AssetId,
        delta: OperatorAssetDelta,
    ) -> Result<OperatorAssetState> {
        let key = Self::operator_key(operator, asset);
        let current: OperatorAssetState = store.get_or_default(key.as_bytes())?;

        let updated = OperatorAssetState {
            total_amount: apply_amount_delta(current.total_amount, delta.total_amount, "total_amount")?,
            wait_undelegation_amount: apply_amount_delta(
                current.wait_undelegation_amount,
                delta.wait_undelegation_amount,
                "wait_undelegation_amount",
            )?,
        };

        if updated != current {
            store.put_typed(key.as_bytes(), &updated)?;
        }

        tracing::debug!(
            operator = %operator,
            asset = %asset,
            total = %updated.total_amount,
            wait_undelegation = %updated.wait_undelegation_amount,
            "Operator asset state updated"
        );

        Ok(updated)
    }

    /// Every asset a staker holds, ordered by asset id
    pub fn staker_assets(
        &self,
        store: &dyn KvStore,
        staker: &StakerId,
    ) -> Result<Vec<(AssetId, StakerAssetState)>> {
        let prefix = StoreKey::new(Namespace::StakerAsset).segment(staker.as_str());
        Self::scan_assets(store, &prefix, Namespace::StakerAsset)
    }

    /// Every asset delegated to an operator, ordered by asset id
    pub fn operator_assets(
        &self,
        store: &dyn KvStore,
        operator: &OperatorAddress,
    ) -> Result<Vec<(AssetId, OperatorAssetState)>> {
        let prefix = StoreKey::new(Namespace::OperatorAsset).segment(operator.as_str());
        Self::scan_assets(store, &prefix, Namespace::OperatorAsset)
    }

    fn scan_assets<T: serde::de::DeserializeOwned>(
        store: &dyn KvStore,
        prefix: &StoreKey,
        namespace: Namespace,
    ) -> Result<Vec<(AssetId, T)>> {
        store
            .prefix_scan(prefix.as_bytes())?
            .into_iter()
            .map(|(key, value)| -> Result<(AssetId, T)> {
                let mut reader = KeyReader::new(&key, namespace)?;
                let _owner = reader.segment()?;
                let asset = AssetId::new(reader.string()?);
                reader.finish()?;
                Ok((asset, bincode::deserialize(&value)?))
            })
            .collect()
    }
}
