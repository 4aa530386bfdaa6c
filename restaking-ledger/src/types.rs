//! Core identifier and amount types
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Stable, collision-free use as store key segments
//! - Exact arithmetic (256-bit integers for raw amounts)

use crate::{Error, Result};
use bech32::{FromBase32, ToBase32, Variant};
use ethnum::I256;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Raw token amount (signed 256-bit integer)
///
/// The wire format carries 32-byte unsigned amounts; deltas are signed.
/// All arithmetic is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(I256);

impl Amount {
    /// Zero amount
    pub const ZERO: Amount = Amount(I256::ZERO);

    /// Create from a 128-bit integer
    pub fn new(value: i128) -> Self {
        Self(I256::new(value))
    }

    /// Create from an unsigned 64-bit integer
    pub fn from_u64(value: u64) -> Self {
        Self(I256::new(value as i128))
    }

    /// Interpret 32 big-endian bytes as an unsigned amount
    ///
    /// Returns `None` when the value does not fit the signed range.
    pub fn from_be_bytes_unsigned(bytes: [u8; 32]) -> Option<Self> {
        let value = I256::from_be_bytes(bytes);
        if value.is_negative() {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Underlying 256-bit integer
    pub fn as_i256(&self) -> I256 {
        self.0
    }

    /// Wrap a 256-bit integer
    pub fn from_i256(value: I256) -> Self {
        Self(value)
    }

    /// True if below zero
    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// True if zero
    pub fn is_zero(&self) -> bool {
        self.0 == I256::ZERO
    }

    /// Checked addition
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Checked subtraction
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Checked negation
    pub fn checked_neg(self) -> Option<Amount> {
        self.0.checked_neg().map(Amount)
    }

    /// Negation for amounts produced by the decoder or the ledger
    ///
    /// Those are never `I256::MIN`, so this only fails on corrupted input.
    pub fn neg(self) -> Result<Amount> {
        self.checked_neg()
            .ok_or_else(|| Error::Overflow(format!("cannot negate amount {}", self)))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Amount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        I256::from_str_radix(s, 10)
            .map(Amount)
            .map_err(|e| Error::InvalidDelta(format!("invalid amount '{}': {}", s, e)))
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(I256::new(value as i128))
    }
}

// Amounts are persisted as decimal strings so the encoding does not depend
// on the integer crate's own serde support.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(de::Error::custom)
    }
}

/// Build `0x<hex address>_0x<hex chain id>`
fn composite_id(client_chain_id: u64, address: &[u8]) -> String {
    format!("0x{}_0x{:x}", hex::encode(address), client_chain_id)
}

/// Asset identifier derived from (client chain, token address)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetId(String);

impl AssetId {
    /// Derive from client-chain id and raw token address bytes
    pub fn from_parts(client_chain_id: u64, address: &[u8]) -> Self {
        Self(composite_id(client_chain_id, address))
    }

    /// Wrap an already-derived identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Staker identifier derived from (client chain, staker address)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StakerId(String);

impl StakerId {
    /// Derive from client-chain id and raw staker address bytes
    pub fn from_parts(client_chain_id: u64, address: &[u8]) -> Self {
        Self(composite_id(client_chain_id, address))
    }

    /// Wrap an already-derived identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StakerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operator account address (bech32)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OperatorAddress(String);

impl OperatorAddress {
    /// Parse and validate a bech32 account address
    pub fn parse(s: &str) -> Result<Self> {
        let (_, data, variant) = bech32::decode(s)
            .map_err(|e| Error::InvalidAddress(format!("'{}': {}", s, e)))?;

        if variant != Variant::Bech32 {
            return Err(Error::InvalidAddress(format!("'{}': not a bech32 address", s)));
        }

        let bytes = Vec::<u8>::from_base32(&data)
            .map_err(|e| Error::InvalidAddress(format!("'{}': {}", s, e)))?;
        if bytes.is_empty() {
            return Err(Error::InvalidAddress(format!("'{}': empty address", s)));
        }

        Ok(Self(s.to_lowercase()))
    }

    /// Encode raw account bytes under a human-readable prefix
    pub fn from_bytes(hrp: &str, bytes: &[u8]) -> Result<Self> {
        let encoded = bech32::encode(hrp, bytes.to_base32(), Variant::Bech32)
            .map_err(|e| Error::InvalidAddress(format!("cannot encode under '{}': {}", hrp, e)))?;
        Ok(Self(encoded))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for OperatorAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<OperatorAddress> for String {
    fn from(address: OperatorAddress) -> Self {
        address.0
    }
}
