//! Delegation state engine
//!
//! # Storage layout
//!
//! - `StakerDelegationTotal` (staker, asset) → total delegated [`Amount`]
//! - `Delegation` (staker, asset, operator) → [`DelegationAmounts`]
//! - `UndelegationRecord` (operator, tx hash, nonce) → [`UndelegationRecord`]
//! - `UndelegationByHeight` (completion height, nonce, record key) → `()`
//! - `UndelegationByStaker` (staker, asset, nonce, record key) → `()`
//!
//! `delegate_to` and `undelegate_from` run every write through a
//! [`CacheStore`] and commit only once all of them succeeded.

use crate::{
    decoder::decode_delegation_action,
    expected::{ClientChainRegistry, OperatorRegistry, SlashingOracle, UnbondingSchedule},
    types::{DelegationAction, DelegationActionKind, DelegationAmounts, EventLog, UndelegationRecord, H256},
    Error, Result,
};
use restaking_ledger::{
    keys::{KeyReader, Namespace, StoreKey},
    numeric::apply_amount_delta,
    Amount, AssetId, AssetLedger, CacheStore, KvStore, KvStoreExt, OperatorAddress,
    OperatorAssetDelta, StakerAssetDelta, StakerId,
};
use std::sync::Arc;

/// What an applied action did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Delegation applied
    Delegated(DelegationAction),
    /// Undelegation queued
    Undelegated(UndelegationRecord),
}

/// Delegation keeper
#[derive(Debug, Clone)]
pub struct DelegationKeeper {
    assets: AssetLedger,
    chains: Arc<dyn ClientChainRegistry>,
    operators: Arc<dyn OperatorRegistry>,
    slashing: Arc<dyn SlashingOracle>,
    unbonding: Arc<dyn UnbondingSchedule>,
}

impl DelegationKeeper {
    /// Create keeper over its collaborators
    pub fn new(
        chains: Arc<dyn ClientChainRegistry>,
        operators: Arc<dyn OperatorRegistry>,
        slashing: Arc<dyn SlashingOracle>,
        unbonding: Arc<dyn UnbondingSchedule>,
    ) -> Self {
        Self {
            assets: AssetLedger::new(),
            chains,
            operators,
            slashing,
            unbonding,
        }
    }

    /// Asset ledger handle
    pub fn assets(&self) -> &AssetLedger {
        &self.assets
    }

    pub(crate) fn slashing(&self) -> &dyn SlashingOracle {
        self.slashing.as_ref()
    }

    pub(crate) fn unbonding(&self) -> &dyn UnbondingSchedule {
        self.unbonding.as_ref()
    }

    /// Decode a log and apply it if it is a delegation action
    pub fn process_log(
        &self,
        store: &mut dyn KvStore,
        log: &EventLog,
        height: u64,
    ) -> Result<Option<ActionOutcome>> {
        let action = match decode_delegation_action(log, self.chains.as_ref())? {
            Some(action) => action,
            None => return Ok(None),
        };

        match action.kind {
            DelegationActionKind::DelegateTo => {
                self.delegate_to(store, &action)?;
                Ok(Some(ActionOutcome::Delegated(action)))
            }
            DelegationActionKind::UndelegateFrom => {
                let record = self.undelegate_from(store, &action, height)?;
                Ok(Some(ActionOutcome::Undelegated(record)))
            }
        }
    }

    /// Move `action.amount` of the staker's free balance into a delegation
    pub fn delegate_to(&self, store: &mut dyn KvStore, action: &DelegationAction) -> Result<()> {
        if !self.operators.is_operator(&action.operator) {
            return Err(Error::OperatorNotExist(action.operator.to_string()));
        }
        if self.slashing.is_operator_frozen(&action.operator) {
            return Err(Error::OperatorFrozen(action.operator.to_string()));
        }
        if action.amount.is_negative() {
            return Err(Error::NegativeAmount(action.amount.to_string()));
        }

        let staker = action.staker_id();
        let asset = action.asset_id();
        let amount = action.amount;

        let info = self.assets.staker_asset_state(store, &staker, &asset)?;
        if info.can_withdraw_amount < amount {
            return Err(Error::DelegationAmountTooBig(format!(
                "amount {} exceeds withdrawable {}",
                amount, info.can_withdraw_amount
            )));
        }

        let mut cache = CacheStore::new(store);
        self.assets.update_staker_asset_state(
            &mut cache,
            &staker,
            &asset,
            StakerAssetDelta {
                can_withdraw_amount: amount.neg()?,
                ..StakerAssetDelta::default()
            },
        )?;
        self.assets.update_operator_asset_state(
            &mut cache,
            &action.operator,
            &asset,
            OperatorAssetDelta {
                total_amount: amount,
                ..OperatorAssetDelta::default()
            },
        )?;
        self.update_delegation_state(
            &mut cache,
            &staker,
            &asset,
            &action.operator,
            DelegationAmounts {
                can_undelegation_amount: amount,
                ..DelegationAmounts::default()
            },
        )?;
        self.update_staker_delegation_total(&mut cache, &staker, &asset, amount)?;
        cache.commit()?;

        tracing::info!(
            staker = %staker,
            asset = %asset,
            operator = %action.operator,
            amount = %amount,
            nonce = action.nonce,
            "Delegated"
        );
        Ok(())
    }

    /// Queue `action.amount` of a delegation for unbonding
    pub fn undelegate_from(
        &self,
        store: &mut dyn KvStore,
        action: &DelegationAction,
        height: u64,
    ) -> Result<UndelegationRecord> {
        if !self.operators.is_operator(&action.operator) {
            return Err(Error::OperatorNotExist(action.operator.to_string()));
        }
        if action.amount.is_negative() {
            return Err(Error::NegativeAmount(action.amount.to_string()));
        }

        let staker = action.staker_id();
        let asset = action.asset_id();
        let amount = action.amount;

        let delegation = self.delegation_info(store, &staker, &asset, &action.operator)?;
        if amount > delegation.can_undelegation_amount {
            return Err(Error::UndelegationAmountTooBig(format!(
                "amount {} exceeds undelegatable {}",
                amount, delegation.can_undelegation_amount
            )));
        }

        if self
            .undelegation_record(store, &action.operator, &action.tx_hash, action.nonce)?
            .is_some()
        {
            return Err(Error::DuplicateUndelegation(format!(
                "operator {} tx {} nonce {}",
                action.operator, action.tx_hash, action.nonce
            )));
        }

        let record = UndelegationRecord {
            staker_id: staker.clone(),
            asset_id: asset.clone(),
            operator: action.operator.clone(),
            tx_hash: action.tx_hash,
            is_pending: true,
            nonce: action.nonce,
            block_number: height,
            completion_height: self
                .unbonding
                .can_undelegate_height(&asset, &action.operator, height),
            amount,
            actual_completed_amount: Amount::ZERO,
        };

        let mut cache = CacheStore::new(store);
        self.set_undelegation_record(&mut cache, &record)?;
        self.update_delegation_state(
            &mut cache,
            &staker,
            &asset,
            &action.operator,
            DelegationAmounts {
                can_undelegation_amount: amount.neg()?,
                wait_undelegation_amount: amount,
            },
        )?;
        self.assets.update_staker_asset_state(
            &mut cache,
            &staker,
            &asset,
            StakerAssetDelta {
                wait_undelegation_amount: amount,
                ..StakerAssetDelta::default()
            },
        )?;
        self.assets.update_operator_asset_state(
            &mut cache,
            &action.operator,
            &asset,
            OperatorAssetDelta {
                wait_undelegation_amount: amount,
                ..OperatorAssetDelta::default()
            },
        )?;
        cache.commit()?;

        tracing::info!(
            staker = %staker,
            asset = %asset,
            operator = %action.operator,
            amount = %amount,
            completion_height = record.completion_height,
            "Undelegation queued"
        );
        Ok(record)
    }

    // Delegation state

    fn delegation_key(staker: &StakerId, asset: &AssetId) -> StoreKey {
        StoreKey::new(Namespace::Delegation)
            .segment(staker.as_str())
            .segment(asset.as_str())
    }

    fn staker_total_key(staker: &StakerId, asset: &AssetId) -> StoreKey {
        StoreKey::new(Namespace::StakerDelegationTotal)
            .segment(staker.as_str())
            .segment(asset.as_str())
    }

    /// Delegation balances for (staker, asset, operator), zero if absent
    pub fn delegation_info(
        &self,
        store: &dyn KvStore,
        staker: &StakerId,
        asset: &AssetId,
        operator: &OperatorAddress,
    ) -> Result<DelegationAmounts> {
        let key = Self::delegation_key(staker, asset).segment(operator.as_str());
        Ok(store.get_or_default(key.as_bytes())?)
    }

    /// Apply a signed delta to one delegation entry
    pub fn update_delegation_state(
        &self,
        store: &mut dyn KvStore,
        staker: &StakerId,
        asset: &AssetId,
        operator: &OperatorAddress,
        delta: DelegationAmounts,
    ) -> Result<DelegationAmounts> {
        let key = Self::delegation_key(staker, asset).segment(operator.as_str());
        let current: DelegationAmounts = store.get_or_default(key.as_bytes())?;

        let updated = DelegationAmounts {
            can_undelegation_amount: apply_amount_delta(
                current.can_undelegation_amount,
                delta.can_undelegation_amount,
                "can_undelegation_amount",
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
        Ok(updated)
    }

    /// Every operator the staker delegated `asset` to, ordered by operator
    pub fn staker_delegations(
        &self,
        store: &dyn KvStore,
        staker: &StakerId,
        asset: &AssetId,
    ) -> Result<Vec<(OperatorAddress, DelegationAmounts)>> {
        let prefix = Self::delegation_key(staker, asset);
        store
            .prefix_scan(prefix.as_bytes())?
            .into_iter()
            .map(|(key, value)| -> Result<(OperatorAddress, DelegationAmounts)> {
                let mut reader = KeyReader::new(&key, Namespace::Delegation)?;
                reader.segment()?;
                reader.segment()?;
                let operator = OperatorAddress::parse(&reader.string()?)?;
                reader.finish()?;
                let amounts = bincode::deserialize(&value).map_err(restaking_ledger::Error::from)?;
                Ok((operator, amounts))
            })
            .collect()
    }

    /// Staker's total delegated amount in `asset`
    pub fn staker_delegation_total(
        &self,
        store: &dyn KvStore,
        staker: &StakerId,
        asset: &AssetId,
    ) -> Result<Amount> {
        Ok(store.get_or_default(Self::staker_total_key(staker, asset).as_bytes())?)
    }

    /// Apply a signed delta to the staker's total delegated amount
    pub fn update_staker_delegation_total(
        &self,
        store: &mut dyn KvStore,
        staker: &StakerId,
        asset: &AssetId,
        delta: Amount,
    ) -> Result<Amount> {
        let key = Self::staker_total_key(staker, asset);
        let current: Amount = store.get_or_default(key.as_bytes())?;
        let updated = apply_amount_delta(current, delta, "staker_delegation_total")?;
        if updated != current {
            store.put_typed(key.as_bytes(), &updated)?;
        }
        Ok(updated)
    }

    // Undelegation records

    fn height_index_key(record: &UndelegationRecord) -> StoreKey {
        StoreKey::new(Namespace::UndelegationByHeight)
            .number(record.completion_height)
            .number(record.nonce)
            .raw(record.key())
    }

    fn staker_index_prefix(staker: &StakerId, asset: &AssetId) -> StoreKey {
        StoreKey::new(Namespace::UndelegationByStaker)
            .segment(staker.as_str())
            .segment(asset.as_str())
    }

    fn staker_index_key(record: &UndelegationRecord) -> StoreKey {
        Self::staker_index_prefix(&record.staker_id, &record.asset_id)
            .number(record.nonce)
            .raw(record.key())
    }

    /// Persist a record and its indices
    ///
    /// Pending records are indexed by completion height; the caller removes
    /// the old height entry when the completion height changes. Overwriting
    /// a settled record is [`Error::Inconsistent`].
    pub fn set_undelegation_record(
        &self,
        store: &mut dyn KvStore,
        record: &UndelegationRecord,
    ) -> Result<()> {
        let key = record.key();
        if let Some(existing) = store.get_typed::<UndelegationRecord>(key.as_bytes())? {
            if !existing.is_pending {
                return Err(Error::Inconsistent(format!(
                    "undelegation record {} (nonce {}) is already settled",
                    existing.tx_hash, existing.nonce
                )));
            }
        }

        store.put_typed(key.as_bytes(), record)?;
        if record.is_pending {
            store.set(Self::height_index_key(record).as_bytes(), &[])?;
        }
        store.set(Self::staker_index_key(record).as_bytes(), &[])?;
        Ok(())
    }

    /// Remove a record's entry from the height index
    pub fn remove_height_index(
        &self,
        store: &mut dyn KvStore,
        record: &UndelegationRecord,
    ) -> Result<()> {
        store.delete(Self::height_index_key(record).as_bytes())?;
        Ok(())
    }

    /// Look up a record by its canonical key
    pub fn undelegation_record(
        &self,
        store: &dyn KvStore,
        operator: &OperatorAddress,
        tx_hash: &H256,
        nonce: u64,
    ) -> Result<Option<UndelegationRecord>> {
        let key = UndelegationRecord::key_for(operator, tx_hash, nonce);
        Ok(store.get_typed(key.as_bytes())?)
    }

    /// Records due at exactly `height`, ordered by (nonce, record key)
    pub fn due_undelegation_records(
        &self,
        store: &dyn KvStore,
        height: u64,
    ) -> Result<Vec<UndelegationRecord>> {
        let prefix = StoreKey::new(Namespace::UndelegationByHeight).number(height);
        self.records_from_index(store, &prefix, Namespace::UndelegationByHeight, |reader| {
            reader.number()?;
            reader.number()?;
            Ok(())
        })
    }

    /// Every pending record, ordered by completion height
    pub fn pending_undelegation_records(
        &self,
        store: &dyn KvStore,
    ) -> Result<Vec<UndelegationRecord>> {
        let prefix = StoreKey::new(Namespace::UndelegationByHeight);
        self.records_from_index(store, &prefix, Namespace::UndelegationByHeight, |reader| {
            reader.number()?;
            reader.number()?;
            Ok(())
        })
    }

    /// Full undelegation history of a staker in one asset, ordered by nonce
    pub fn staker_undelegation_records(
        &self,
        store: &dyn KvStore,
        staker: &StakerId,
        asset: &AssetId,
    ) -> Result<Vec<UndelegationRecord>> {
        let prefix = Self::staker_index_prefix(staker, asset);
        self.records_from_index(store, &prefix, Namespace::UndelegationByStaker, |reader| {
            reader.segment()?;
            reader.segment()?;
            reader.number()?;
            Ok(())
        })
    }

    /// Resolve index entries to records; a dangling entry is inconsistent
    fn records_from_index(
        &self,
        store: &dyn KvStore,
        prefix: &StoreKey,
        namespace: Namespace,
        skip_leading: impl Fn(&mut KeyReader<'_>) -> restaking_ledger::Result<()>,
    ) -> Result<Vec<UndelegationRecord>> {
        let mut records = Vec::new();
        for (index_key, _) in store.prefix_scan(prefix.as_bytes())? {
            let mut reader = KeyReader::new(&index_key, namespace)?;
            skip_leading(&mut reader)?;
            let record_key = reader.remaining();

            let record = store
                .get_typed::<UndelegationRecord>(record_key)?
                .ok_or_else(|| {
                    Error::Inconsistent(format!(
                        "index entry {} points at a missing record",
                        hex::encode(&index_key)
                    ))
                })?;
            records.push(record);
        }
        Ok(records)
    }
}
