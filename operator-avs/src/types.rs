//! Value ledger types

use crate::{Error, Result};
use restaking_ledger::{keys::MAX_SEGMENT_LEN, Amount, OperatorAddress, StakerId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// AVS identifier (contract address string)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AvsId(String);

impl AvsId {
    /// Wrap a non-empty identifier that fits one key segment
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidKey("empty AVS id".to_string()));
        }
        if id.len() > MAX_SEGMENT_LEN {
            return Err(Error::InvalidKey(format!(
                "AVS id of {} bytes exceeds {} bytes",
                id.len(),
                MAX_SEGMENT_LEN
            )));
        }
        Ok(Self(id))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AvsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for AvsId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<AvsId> for String {
    fn from(avs: AvsId) -> Self {
        avs.0
    }
}

/// Single decimal aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValueField {
    /// Aggregated value
    pub amount: Decimal,
}

/// Opted-in stake of one operator in one asset for one AVS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetOptedInState {
    /// Raw asset amount
    pub amount: Amount,
    /// Value of that amount
    pub value: Decimal,
}

/// Signed change to an [`AssetOptedInState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AssetOptedInDelta {
    /// Change to `amount`
    pub amount: Amount,
    /// Change to `value`
    pub value: Decimal,
}

impl AssetOptedInDelta {
    /// True if neither field changes
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero() && self.value.is_zero()
    }
}

/// (AVS, staker, operator) key of a staker share
pub type StakerShareKey = (AvsId, StakerId, OperatorAddress);
