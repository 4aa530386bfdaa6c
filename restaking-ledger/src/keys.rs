//! Composite store keys
//!
//! Layout: `namespace byte || segment*` where each variable-width segment is
//! `u16 BE length || bytes` and numeric segments are fixed 8-byte big-endian.
//! A key built from the first N components of a longer key is a strict byte
//! prefix of it, so prefix scans enumerate exactly the sub-entries of one
//! component and never bleed into a sibling whose name shares leading bytes.

use crate::{Error, Result};

/// Entity namespaces (one per entity type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Namespace {
    /// (staker, asset) → StakerAssetState
    StakerAsset = 0x01,
    /// (operator, asset) → OperatorAssetState
    OperatorAsset = 0x02,
    /// (staker, asset) → total delegated amount
    StakerDelegationTotal = 0x10,
    /// (staker, asset, operator) → DelegationAmounts
    Delegation = 0x11,
    /// (operator, tx hash, nonce) → UndelegationRecord
    UndelegationRecord = 0x12,
    /// (completion height, nonce, record key) → ()
    UndelegationByHeight = 0x13,
    /// (staker, asset, nonce, record key) → ()
    UndelegationByStaker = 0x14,
    /// (avs, operator) → ValueField
    AvsOperatorTotalValue = 0x20,
    /// (avs) → ValueField
    AvsTotalValue = 0x21,
    /// (asset, avs, operator) → AssetOptedInState
    OperatorAvsAssetState = 0x22,
    /// (avs, staker, operator) → ValueField
    AvsOperatorStakerShare = 0x23,
    /// () → last applied block header
    BlockMeta = 0x30,
}

impl Namespace {
    /// Prefix byte
    pub fn prefix(self) -> u8 {
        self as u8
    }
}

/// Longest variable-width segment a key can carry
pub const MAX_SEGMENT_LEN: usize = u16::MAX as usize;

/// Composite key builder
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey(Vec<u8>);

impl StoreKey {
    /// Start a key in a namespace
    pub fn new(namespace: Namespace) -> Self {
        Self(vec![namespace.prefix()])
    }

    /// Append a length-prefixed segment
    ///
    /// Identifiers are validated against [`MAX_SEGMENT_LEN`] when they are
    /// constructed; longer input is cut at that length.
    pub fn segment(mut self, bytes: impl AsRef<[u8]>) -> Self {
        let bytes = bytes.as_ref();
        let len = u16::try_from(bytes.len()).unwrap_or(u16::MAX);
        self.0.extend_from_slice(&len.to_be_bytes());
        self.0.extend_from_slice(&bytes[..len as usize]);
        self
    }

    /// Append a fixed-width big-endian integer (orders numerically)
    pub fn number(mut self, value: u64) -> Self {
        self.0.extend_from_slice(&value.to_be_bytes());
        self
    }

    /// Append raw bytes of an already-encoded key
    pub fn raw(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.0.extend_from_slice(bytes.as_ref());
        self
    }

    /// Key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consume into bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for StoreKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Cursor for decoding a key produced by [`StoreKey`]
#[derive(Debug)]
pub struct KeyReader<'a> {
    bytes: &'a [u8],
}

impl<'a> KeyReader<'a> {
    /// Start reading after the namespace byte, checking it matches
    pub fn new(key: &'a [u8], namespace: Namespace) -> Result<Self> {
        match key.split_first() {
            Some((prefix, rest)) if *prefix == namespace.prefix() => Ok(Self { bytes: rest }),
            _ => Err(Error::InvalidKey(format!(
                "expected namespace {:?} in key {}",
                namespace,
                hex::encode(key)
            ))),
        }
    }

    /// Read a length-prefixed segment
    pub fn segment(&mut self) -> Result<&'a [u8]> {
        if self.bytes.len() < 2 {
            return Err(Error::InvalidKey("truncated segment length".to_string()));
        }
        let len = u16::from_be_bytes([self.bytes[0], self.bytes[1]]) as usize;
        let rest = &self.bytes[2..];
        if rest.len() < len {
            return Err(Error::InvalidKey(format!(
                "segment length {} exceeds remaining {} bytes",
                len,
                rest.len()
            )));
        }
        let (segment, remaining) = rest.split_at(len);
        self.bytes = remaining;
        Ok(segment)
    }

    /// Read a length-prefixed UTF-8 segment
    pub fn string(&mut self) -> Result<String> {
        let segment = self.segment()?;
        String::from_utf8(segment.to_vec())
            .map_err(|e| Error::InvalidKey(format!("non-UTF-8 segment: {}", e)))
    }

    /// Read a fixed-width big-endian integer
    pub fn number(&mut self) -> Result<u64> {
        if self.bytes.len() < 8 {
            return Err(Error::InvalidKey("truncated numeric segment".to_string()));
        }
        let (head, rest) = self.bytes.split_at(8);
        self.bytes = rest;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(head);
        Ok(u64::from_be_bytes(buf))
    }

    /// Everything not yet consumed
    pub fn remaining(&self) -> &'a [u8] {
        self.bytes
    }

    /// Fail unless the whole key was consumed
    pub fn finish(self) -> Result<()> {
        if self.bytes.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidKey(format!(
                "{} trailing bytes in key",
                self.bytes.len()
            )))
        }
    }
}
