//! Operator-AVS aggregates over an injected store
//!
//! # Storage layout
//!
//! - `AvsTotalValue` (avs) → [`ValueField`]
//! - `AvsOperatorTotalValue` (avs, operator) → [`ValueField`]
//! - `OperatorAvsAssetState` (asset, avs, operator) → [`AssetOptedInState`]
//! - `AvsOperatorStakerShare` (avs, staker, operator) → [`ValueField`]

use crate::{
    types::{AssetOptedInDelta, AssetOptedInState, AvsId, StakerShareKey, ValueField},
    Error, Result,
};
use restaking_ledger::{
    keys::{KeyReader, Namespace, StoreKey},
    numeric::{apply_amount_delta, apply_value_delta},
    AssetId, CacheStore, KvStore, KvStoreExt, OperatorAddress, StakerId,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Operator-AVS value ledger
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorAvsLedger;

impl OperatorAvsLedger {
    /// Create ledger handle
    pub fn new() -> Self {
        Self
    }

    // Keys

    fn avs_total_key(avs: &AvsId) -> StoreKey {
        StoreKey::new(Namespace::AvsTotalValue).segment(avs.as_str())
    }

    fn avs_operator_key(avs: &AvsId, operator: &OperatorAddress) -> StoreKey {
        StoreKey::new(Namespace::AvsOperatorTotalValue)
            .segment(avs.as_str())
            .segment(operator.as_str())
    }

    fn asset_state_key(asset: &AssetId, avs: &AvsId, operator: &OperatorAddress) -> StoreKey {
        StoreKey::new(Namespace::OperatorAvsAssetState)
            .segment(asset.as_str())
            .segment(avs.as_str())
            .segment(operator.as_str())
    }

    fn staker_share_key(avs: &AvsId, staker: &StakerId, operator: &OperatorAddress) -> StoreKey {
        StoreKey::new(Namespace::AvsOperatorStakerShare)
            .segment(avs.as_str())
            .segment(staker.as_str())
            .segment(operator.as_str())
    }

    /// Fetch-or-zero, add, persist
    fn accumulate(store: &mut dyn KvStore, key: &StoreKey, delta: Decimal, field: &str) -> Result<Decimal> {
        if delta.is_zero() {
            return Self::value_or_zero(store, key);
        }
        let current: ValueField = store.get_or_default(key.as_bytes())?;
        let amount = apply_value_delta(current.amount, delta, field).map_err(Error::from_update)?;
        store.put_typed(key.as_bytes(), &ValueField { amount })?;
        Ok(amount)
    }

    fn value_or_zero(store: &dyn KvStore, key: &StoreKey) -> Result<Decimal> {
        let field: ValueField = store.get_or_default(key.as_bytes())?;
        Ok(field.amount)
    }

    fn value(store: &dyn KvStore, key: &StoreKey, what: &str) -> Result<Decimal> {
        store
            .get_typed::<ValueField>(key.as_bytes())?
            .map(|field| field.amount)
            .ok_or_else(|| Error::NotFound(what.to_string()))
    }

    // (AVS, operator) total

    /// Add `delta` to the operator's total value in the AVS
    pub fn update_avs_operator_total_value(
        &self,
        store: &mut dyn KvStore,
        avs: &AvsId,
        operator: &OperatorAddress,
        delta: Decimal,
    ) -> Result<Decimal> {
        let key = Self::avs_operator_key(avs, operator);
        let updated = Self::accumulate(store, &key, delta, "avs_operator_total_value")?;
        tracing::debug!(avs = %avs, operator = %operator, delta = %delta, total = %updated, "AVS operator value updated");
        Ok(updated)
    }

    /// Operator's total value in the AVS
    pub fn avs_operator_total_value(
        &self,
        store: &dyn KvStore,
        avs: &AvsId,
        operator: &OperatorAddress,
    ) -> Result<Decimal> {
        Self::value(
            store,
            &Self::avs_operator_key(avs, operator),
            &format!("avs operator total value for ({}, {})", avs, operator),
        )
    }

    /// Remove the operator's total value in the AVS
    pub fn delete_avs_operator_total_value(
        &self,
        store: &mut dyn KvStore,
        avs: &AvsId,
        operator: &OperatorAddress,
    ) -> Result<()> {
        store.delete(Self::avs_operator_key(avs, operator).as_bytes())?;
        Ok(())
    }

    // AVS total

    /// Add `delta` to the AVS total value
    pub fn update_avs_total_value(
        &self,
        store: &mut dyn KvStore,
        avs: &AvsId,
        delta: Decimal,
    ) -> Result<Decimal> {
        let updated = Self::accumulate(store, &Self::avs_total_key(avs), delta, "avs_total_value")?;
        tracing::debug!(avs = %avs, delta = %delta, total = %updated, "AVS total value updated");
        Ok(updated)
    }

    /// Apply several AVS total deltas, in ascending AVS order
    ///
    /// Each key is updated atomically. A failure stops the batch and keeps
    /// the keys already applied.
    pub fn batch_update_avs_total_value(
        &self,
        store: &mut dyn KvStore,
        changes: &BTreeMap<AvsId, Decimal>,
    ) -> Result<()> {
        for (avs, delta) in changes {
            self.update_avs_total_value(store, avs, *delta)?;
        }
        Ok(())
    }

    /// AVS total value
    pub fn avs_total_value(&self, store: &dyn KvStore, avs: &AvsId) -> Result<Decimal> {
        Self::value(store, &Self::avs_total_key(avs), &format!("avs total value for {}", avs))
    }

    /// Remove the AVS total value
    pub fn delete_avs_total_value(&self, store: &mut dyn KvStore, avs: &AvsId) -> Result<()> {
        store.delete(Self::avs_total_key(avs).as_bytes())?;
        Ok(())
    }

    // (asset, AVS, operator) state

    /// Apply a signed delta to the operator's opted-in stake in one asset
    pub fn update_operator_avs_asset_state(
        &self,
        store: &mut dyn KvStore,
        asset: &AssetId,
        avs: &AvsId,
        operator: &OperatorAddress,
        delta: AssetOptedInDelta,
    ) -> Result<AssetOptedInState> {
        let key = Self::asset_state_key(asset, avs, operator);
        let current: AssetOptedInState = store.get_or_default(key.as_bytes())?;
        if delta.is_zero() {
            return Ok(current);
        }

        let updated = AssetOptedInState {
            amount: apply_amount_delta(current.amount, delta.amount, "opted_in_amount")
                .map_err(Error::from_update)?,
            value: apply_value_delta(current.value, delta.value, "opted_in_value")
                .map_err(Error::from_update)?,
        };
        store.put_typed(key.as_bytes(), &updated)?;

        tracing::debug!(
            asset = %asset,
            avs = %avs,
            operator = %operator,
            amount = %updated.amount,
            value = %updated.value,
            "Operator AVS asset state updated"
        );
        Ok(updated)
    }

    /// Operator's opted-in stake in one asset
    pub fn operator_avs_asset_state(
        &self,
        store: &dyn KvStore,
        asset: &AssetId,
        avs: &AvsId,
        operator: &OperatorAddress,
    ) -> Result<AssetOptedInState> {
        store
            .get_typed(Self::asset_state_key(asset, avs, operator).as_bytes())?
            .ok_or_else(|| {
                Error::NotFound(format!("asset state for ({}, {}, {})", asset, avs, operator))
            })
    }

    /// Remove the operator's opted-in stake in one asset
    pub fn delete_operator_avs_asset_state(
        &self,
        store: &mut dyn KvStore,
        asset: &AssetId,
        avs: &AvsId,
        operator: &OperatorAddress,
    ) -> Result<()> {
        store.delete(Self::asset_state_key(asset, avs, operator).as_bytes())?;
        Ok(())
    }

    /// Rewrite every (AVS, operator) state of `asset` through `f`
    ///
    /// Entries are visited in ascending (AVS, operator) order. Nothing is
    /// written if `f` fails or leaves a state negative.
    pub fn iterate_update_operator_avs_assets<F>(
        &self,
        store: &mut dyn KvStore,
        asset: &AssetId,
        mut f: F,
    ) -> Result<usize>
    where
        F: FnMut(&AvsId, &OperatorAddress, &mut AssetOptedInState) -> Result<()>,
    {
        let prefix = StoreKey::new(Namespace::OperatorAvsAssetState).segment(asset.as_str());
        let mut cache = CacheStore::new(store);
        let entries = cache.prefix_scan(prefix.as_bytes())?;
        let count = entries.len();

        for (key, value) in entries {
            let mut reader = KeyReader::new(&key, Namespace::OperatorAvsAssetState)?;
            reader.segment()?;
            let avs = AvsId::new(reader.string()?)?;
            let operator = OperatorAddress::parse(&reader.string()?)?;
            reader.finish()?;

            let mut state: AssetOptedInState =
                bincode::deserialize(&value).map_err(restaking_ledger::Error::from)?;
            f(&avs, &operator, &mut state)?;

            if state.amount.is_negative() || state.value < Decimal::ZERO {
                return Err(Error::AggregateInvalid(format!(
                    "negative opted-in state for ({}, {}, {})",
                    asset, avs, operator
                )));
            }
            cache.put_typed(&key, &state)?;
        }

        cache.commit()?;
        Ok(count)
    }

    // (AVS, staker, operator) share

    /// Add `delta` to a staker's share under (AVS, operator)
    pub fn update_avs_operator_staker_share_value(
        &self,
        store: &mut dyn KvStore,
        avs: &AvsId,
        staker: &StakerId,
        operator: &OperatorAddress,
        delta: Decimal,
    ) -> Result<Decimal> {
        let key = Self::staker_share_key(avs, staker, operator);
        let updated = Self::accumulate(store, &key, delta, "staker_share_value")?;
        tracing::debug!(avs = %avs, staker = %staker, operator = %operator, share = %updated, "Staker share updated");
        Ok(updated)
    }

    /// Apply several staker share deltas, in ascending key order
    ///
    /// Same failure behaviour as [`Self::batch_update_avs_total_value`].
    pub fn batch_update_avs_operator_staker_share(
        &self,
        store: &mut dyn KvStore,
        changes: &BTreeMap<StakerShareKey, Decimal>,
    ) -> Result<()> {
        for ((avs, staker, operator), delta) in changes {
            self.update_avs_operator_staker_share_value(store, avs, staker, operator, *delta)?;
        }
        Ok(())
    }

    /// Staker's share under (AVS, operator)
    pub fn avs_operator_staker_share_value(
        &self,
        store: &dyn KvStore,
        avs: &AvsId,
        staker: &StakerId,
        operator: &OperatorAddress,
    ) -> Result<Decimal> {
        Self::value(
            store,
            &Self::staker_share_key(avs, staker, operator),
            &format!("staker share for ({}, {}, {})", avs, staker, operator),
        )
    }

    /// Remove a staker's share under (AVS, operator)
    pub fn delete_avs_operator_staker_share_value(
        &self,
        store: &mut dyn KvStore,
        avs: &AvsId,
        staker: &StakerId,
        operator: &OperatorAddress,
    ) -> Result<()> {
        store.delete(Self::staker_share_key(avs, staker, operator).as_bytes())?;
        Ok(())
    }

    /// Stakers holding a share under (AVS, operator), ordered by staker
    pub fn avs_operator_stakers(
        &self,
        store: &dyn KvStore,
        avs: &AvsId,
        operator: &OperatorAddress,
    ) -> Result<Vec<StakerId>> {
        let prefix = StoreKey::new(Namespace::AvsOperatorStakerShare).segment(avs.as_str());
        let mut stakers = Vec::new();
        for (key, _) in store.prefix_scan(prefix.as_bytes())? {
            let mut reader = KeyReader::new(&key, Namespace::AvsOperatorStakerShare)?;
            reader.segment()?;
            let staker = reader.string()?;
            let share_operator = reader.string()?;
            reader.finish()?;
            if share_operator == operator.as_str() {
                stakers.push(StakerId::new(staker));
            }
        }
        Ok(stakers)
    }
}
