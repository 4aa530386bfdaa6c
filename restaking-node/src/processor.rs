//! Block processor
//!
//! Each block runs inside one [`CacheStore`] over the node's store and each
//! transaction inside its own cache over the block's. A transaction that
//! fails with a recoverable error is dropped with a failed receipt; a fatal
//! error drops the block cache, so the store is left exactly as it was
//! before the block.
//!
//! Collaborator updates (operator registration, freezes, slashes) live in
//! memory and are not rolled back by an aborted block; the node stops on
//! the first fatal error.

use crate::{config::NodeConfig, metrics::Metrics, Error, Result};
use delegation::{
    memory::{FixedUnbondingPeriod, MemoryOperatorRegistry, MemorySlashing, StaticChainRegistry},
    ActionOutcome, BlockSettlement, ClientChainRegistry, DelegationKeeper, EventLog,
    UnbondingSchedule,
};
use operator_avs::{AssetOptedInDelta, AvsId, OperatorAvsLedger};
use restaking_ledger::{
    keys::{Namespace, StoreKey},
    state_digest, Amount, AssetId, CacheStore, KvStore, KvStoreExt, OperatorAddress, StakerId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// A block of transactions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Block height (strictly increasing)
    pub height: u64,
    /// Transactions in execution order
    #[serde(default)]
    pub txs: Vec<BlockTx>,
}

/// Transactions the host understands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockTx {
    /// Cross-chain event log (delegate / undelegate; other kinds are skipped)
    CrossChain {
        /// Raw log
        log: EventLog,
    },
    /// Credit a staker deposit
    Deposit {
        /// Source chain
        client_chain_id: u64,
        /// Token address on the client chain
        #[serde(with = "hex")]
        asset_address: Vec<u8>,
        /// Staker address on the client chain
        #[serde(with = "hex")]
        staker_address: Vec<u8>,
        /// Deposited amount
        amount: Amount,
    },
    /// Register an operator
    RegisterOperator {
        /// Operator address
        operator: OperatorAddress,
    },
    /// Freeze an operator
    Freeze {
        /// Operator address
        operator: OperatorAddress,
    },
    /// Unfreeze an operator
    Unfreeze {
        /// Operator address
        operator: OperatorAddress,
    },
    /// Record a slash against an operator's stake in one asset
    Slash {
        /// Operator address
        operator: OperatorAddress,
        /// Slashed asset
        asset: AssetId,
        /// Fraction of remaining stake slashed
        proportion: Decimal,
    },
    /// Opt an operator's stake in one asset into an AVS
    OptIn {
        /// Target AVS
        avs: AvsId,
        /// Operator address
        operator: OperatorAddress,
        /// Asset opted in
        asset: AssetId,
        /// Raw amount opted in
        amount: Amount,
        /// Value of that amount
        value: Decimal,
    },
    /// Withdraw an operator's stake in one asset from an AVS
    OptOut {
        /// Target AVS
        avs: AvsId,
        /// Operator address
        operator: OperatorAddress,
        /// Asset opted out
        asset: AssetId,
    },
}

/// Outcome of one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Position in the block
    pub index: usize,
    /// Whether the transaction's writes were kept
    pub success: bool,
    /// Human-readable result
    pub log: String,
}

/// Outcome of one committed block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockResult {
    /// Block height
    pub height: u64,
    /// One receipt per transaction
    pub receipts: Vec<TxReceipt>,
    /// End-of-block settlement
    pub settlement: BlockSettlement,
    /// SHA-256 over the whole store after commit
    pub app_hash: [u8; 32],
}

impl BlockResult {
    /// App hash as lowercase hex
    pub fn app_hash_hex(&self) -> String {
        hex::encode(self.app_hash)
    }
}

/// Last applied block, persisted with the block itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct BlockMeta {
    height: u64,
}

fn block_meta_key() -> StoreKey {
    StoreKey::new(Namespace::BlockMeta)
}

/// Applies blocks to a store
#[derive(Debug)]
pub struct BlockProcessor {
    keeper: DelegationKeeper,
    avs: OperatorAvsLedger,
    operators: Arc<MemoryOperatorRegistry>,
    slashing: Arc<MemorySlashing>,
    metrics: Metrics,
}

impl BlockProcessor {
    /// Build from configuration with in-memory collaborators
    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        config.validate()?;
        Self::with_collaborators(
            Arc::new(StaticChainRegistry::new(config.client_chains.clone())),
            Arc::new(MemoryOperatorRegistry::new(config.operators.clone())),
            Arc::new(MemorySlashing::new()),
            Arc::new(FixedUnbondingPeriod::new(config.unbonding_blocks)),
        )
    }

    /// Build over explicit collaborators
    pub fn with_collaborators(
        chains: Arc<dyn ClientChainRegistry>,
        operators: Arc<MemoryOperatorRegistry>,
        slashing: Arc<MemorySlashing>,
        unbonding: Arc<dyn UnbondingSchedule>,
    ) -> Result<Self> {
        let keeper = DelegationKeeper::new(chains, operators.clone(), slashing.clone(), unbonding);
        Ok(Self {
            keeper,
            avs: OperatorAvsLedger::new(),
            operators,
            slashing,
            metrics: Metrics::new()?,
        })
    }

    /// Delegation keeper (read accessors)
    pub fn keeper(&self) -> &DelegationKeeper {
        &self.keeper
    }

    /// Operator-AVS ledger (read accessors)
    pub fn avs_ledger(&self) -> &OperatorAvsLedger {
        &self.avs
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Height of the last block committed to `store`
    pub fn last_height(&self, store: &dyn KvStore) -> Result<Option<u64>> {
        let meta: Option<BlockMeta> = store.get_typed(block_meta_key().as_bytes())?;
        Ok(meta.map(|m| m.height))
    }

    /// Apply and commit one block
    pub fn apply_block(&self, store: &mut dyn KvStore, block: &Block) -> Result<BlockResult> {
        if let Some(last) = self.last_height(store)? {
            if block.height <= last {
                return Err(Error::InvalidBlock(format!(
                    "height {} does not follow last applied height {}",
                    block.height, last
                )));
            }
        }

        let started = Instant::now();
        let height = block.height;
        let mut block_cache = CacheStore::new(store);
        let mut receipts = Vec::with_capacity(block.txs.len());

        for (index, tx) in block.txs.iter().enumerate() {
            let mut tx_cache = CacheStore::new(&mut block_cache);
            match self.apply_tx(&mut tx_cache, tx, height) {
                Ok(log) => {
                    tx_cache.commit()?;
                    receipts.push(TxReceipt {
                        index,
                        success: true,
                        log,
                    });
                }
                Err(err) if err.is_fatal() => {
                    self.metrics.blocks_aborted_total.inc();
                    tracing::error!(height = height, index = index, error = %err, "Block aborted");
                    return Err(Error::Fatal {
                        height,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    self.metrics.actions_rejected_total.inc();
                    tracing::warn!(height = height, index = index, error = %err, "Transaction rejected");
                    receipts.push(TxReceipt {
                        index,
                        success: false,
                        log: err.to_string(),
                    });
                }
            }
        }

        let settlement = match self.keeper.end_block(&mut block_cache, height) {
            Ok(settlement) => settlement,
            Err(err) => {
                self.metrics.blocks_aborted_total.inc();
                tracing::error!(height = height, error = %err, "End-of-block settlement failed, block aborted");
                return Err(Error::Fatal {
                    height,
                    reason: err.to_string(),
                });
            }
        };
        self.metrics
            .undelegations_settled_total
            .inc_by(settlement.settled.len() as u64);
        self.metrics
            .undelegations_rescheduled_total
            .inc_by(settlement.rescheduled.len() as u64);

        block_cache.put_typed(block_meta_key().as_bytes(), &BlockMeta { height })?;
        block_cache.commit()?;

        let app_hash = state_digest(store)?;
        self.metrics.blocks_applied_total.inc();
        self.metrics
            .block_duration
            .observe(started.elapsed().as_secs_f64());

        tracing::info!(
            height = height,
            txs = receipts.len(),
            failed = receipts.iter().filter(|r| !r.success).count(),
            settled = settlement.settled.len(),
            rescheduled = settlement.rescheduled.len(),
            app_hash = %hex::encode(app_hash),
            "Block committed"
        );

        Ok(BlockResult {
            height,
            receipts,
            settlement,
            app_hash,
        })
    }

    fn apply_tx(&self, store: &mut dyn KvStore, tx: &BlockTx, height: u64) -> Result<String> {
        match tx {
            BlockTx::CrossChain { log } => match self.keeper.process_log(store, log, height)? {
                Some(ActionOutcome::Delegated(action)) => {
                    self.metrics.delegations_total.inc();
                    Ok(format!(
                        "delegated {} of {} to {}",
                        action.amount,
                        action.asset_id(),
                        action.operator
                    ))
                }
                Some(ActionOutcome::Undelegated(record)) => {
                    self.metrics.undelegations_total.inc();
                    Ok(format!(
                        "undelegation of {} queued until height {}",
                        record.amount, record.completion_height
                    ))
                }
                None => Ok("not a delegation action".to_string()),
            },
            BlockTx::Deposit {
                client_chain_id,
                asset_address,
                staker_address,
                amount,
            } => {
                let staker = StakerId::from_parts(*client_chain_id, staker_address);
                let asset = AssetId::from_parts(*client_chain_id, asset_address);
                let state = self.keeper.assets().deposit(store, &staker, &asset, *amount)?;
                Ok(format!(
                    "deposited {} of {} for {}, withdrawable {}",
                    amount, asset, staker, state.can_withdraw_amount
                ))
            }
            BlockTx::RegisterOperator { operator } => {
                self.operators.register(operator.clone());
                Ok(format!("registered operator {}", operator))
            }
            BlockTx::Freeze { operator } => {
                self.slashing.freeze(operator);
                Ok(format!("froze {}", operator))
            }
            BlockTx::Unfreeze { operator } => {
                self.slashing.unfreeze(operator);
                Ok(format!("unfroze {}", operator))
            }
            BlockTx::Slash {
                operator,
                asset,
                proportion,
            } => {
                self.slashing
                    .record_slash(operator, asset, height, *proportion)?;
                Ok(format!("slashed {} of {} in {}", proportion, operator, asset))
            }
            BlockTx::OptIn {
                avs,
                operator,
                asset,
                amount,
                value,
            } => {
                let state = self.avs.update_operator_avs_asset_state(
                    store,
                    asset,
                    avs,
                    operator,
                    AssetOptedInDelta {
                        amount: *amount,
                        value: *value,
                    },
                )?;
                self.avs
                    .update_avs_operator_total_value(store, avs, operator, *value)?;
                self.avs.update_avs_total_value(store, avs, *value)?;
                Ok(format!(
                    "{} opted {} of {} into {}",
                    operator, state.amount, asset, avs
                ))
            }
            BlockTx::OptOut {
                avs,
                operator,
                asset,
            } => {
                let state = self.avs.operator_avs_asset_state(store, asset, avs, operator)?;
                let value_neg = -state.value;
                self.avs
                    .update_avs_operator_total_value(store, avs, operator, value_neg)?;
                self.avs.update_avs_total_value(store, avs, value_neg)?;
                self.avs
                    .delete_operator_avs_asset_state(store, asset, avs, operator)?;
                Ok(format!("{} opted {} out of {}", operator, asset, avs))
            }
        }
    }
}
