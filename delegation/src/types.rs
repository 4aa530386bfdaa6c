//! Delegation domain types

use crate::{Error, Result};
use restaking_ledger::{
    keys::{Namespace, StoreKey},
    Amount, AssetId, OperatorAddress, StakerId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Cross-chain action kinds, as encoded in the first payload byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CrossChainOpType {
    /// Deposit into the restaking contract
    Deposit = 0,
    /// Withdraw deposited principal
    WithdrawPrinciple = 1,
    /// Withdraw accrued rewards
    WithdrawReward = 2,
    /// Delegate to an operator
    DelegateTo = 3,
    /// Undelegate from an operator
    UndelegateFrom = 4,
    /// Slash notification
    Slash = 5,
}

impl TryFrom<u8> for CrossChainOpType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(CrossChainOpType::Deposit),
            1 => Ok(CrossChainOpType::WithdrawPrinciple),
            2 => Ok(CrossChainOpType::WithdrawReward),
            3 => Ok(CrossChainOpType::DelegateTo),
            4 => Ok(CrossChainOpType::UndelegateFrom),
            5 => Ok(CrossChainOpType::Slash),
            other => Err(Error::Decode(format!("unknown action kind {}", other))),
        }
    }
}

/// The two action kinds this module applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelegationActionKind {
    /// Move free balance into a delegation
    DelegateTo,
    /// Queue a delegation for unbonding
    UndelegateFrom,
}

/// 32-byte hash (tx hashes, log topics)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct H256(#[serde(with = "hex")] pub [u8; 32]);

impl H256 {
    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Topic carrying a u64 in its first 8 bytes (big-endian)
    pub fn from_u64_prefix(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Read the u64 stored in the first 8 bytes (big-endian)
    pub fn u64_prefix(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(buf)
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({})", self)
    }
}

impl FromStr for H256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s.trim_start_matches("0x"), &mut bytes)
            .map_err(|e| Error::Decode(format!("invalid hash '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }
}

/// Cross-chain event log as delivered by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    /// Packed action payload
    #[serde(with = "hex")]
    pub data: Vec<u8>,
    /// Indexed topics (client chain id at 0, nonce at 2)
    pub topics: Vec<H256>,
    /// Originating transaction
    pub tx_hash: H256,
}

/// Client-chain metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientChainInfo {
    /// Display name
    pub name: String,
    /// Bridge chain id
    pub chain_id: u64,
    /// Length of addresses on that chain, in bytes
    pub address_length: u32,
}

/// A decoded delegate/undelegate action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegationAction {
    /// Source chain
    pub client_chain_id: u64,
    /// What to do
    pub kind: DelegationActionKind,
    /// Token address on the client chain
    pub asset_address: Vec<u8>,
    /// Target operator
    pub operator: OperatorAddress,
    /// Staker address on the client chain
    pub staker_address: Vec<u8>,
    /// Amount of the asset
    pub amount: Amount,
    /// Bridge nonce
    pub nonce: u64,
    /// Originating transaction
    pub tx_hash: H256,
}

impl DelegationAction {
    /// Derived staker id
    pub fn staker_id(&self) -> StakerId {
        StakerId::from_parts(self.client_chain_id, &self.staker_address)
    }

    /// Derived asset id
    pub fn asset_id(&self) -> AssetId {
        AssetId::from_parts(self.client_chain_id, &self.asset_address)
    }
}

/// Per (staker, asset, operator) delegation balances
///
/// Also used as a signed delta by [`crate::DelegationKeeper::update_delegation_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DelegationAmounts {
    /// Delegated and still undelegatable
    pub can_undelegation_amount: Amount,
    /// In the unbonding queue
    pub wait_undelegation_amount: Amount,
}

/// Undelegation request, pending until its completion height
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndelegationRecord {
    /// Requesting staker
    pub staker_id: StakerId,
    /// Asset being undelegated
    pub asset_id: AssetId,
    /// Operator being undelegated from
    pub operator: OperatorAddress,
    /// Originating transaction
    pub tx_hash: H256,
    /// False once settled
    pub is_pending: bool,
    /// Bridge nonce
    pub nonce: u64,
    /// Height the request was filed at
    pub block_number: u64,
    /// Height the record settles at
    pub completion_height: u64,
    /// Requested amount
    pub amount: Amount,
    /// Amount returned after slashing (zero while pending)
    pub actual_completed_amount: Amount,
}

impl UndelegationRecord {
    /// Canonical key: (operator, tx hash, nonce)
    pub fn key(&self) -> StoreKey {
        Self::key_for(&self.operator, &self.tx_hash, self.nonce)
    }

    /// Canonical key from its parts
    pub fn key_for(operator: &OperatorAddress, tx_hash: &H256, nonce: u64) -> StoreKey {
        StoreKey::new(Namespace::UndelegationRecord)
            .segment(operator.as_str())
            .segment(tx_hash.as_bytes())
            .number(nonce)
    }
}
