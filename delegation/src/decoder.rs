//! Cross-chain action decoder
//!
//! Payload layout (big-endian, no padding):
//!
//! | field          | length                            |
//! |----------------|-----------------------------------|
//! | action kind    | 1                                 |
//! | asset address  | `address_length` of the chain     |
//! | operator       | 44 (bech32 ASCII)                 |
//! | staker address | `address_length` of the chain     |
//! | amount         | 32 (unsigned)                     |
//!
//! The client-chain id and the bridge nonce travel in topics 0 and 2.

use crate::{
    expected::ClientChainRegistry,
    types::{CrossChainOpType, DelegationAction, DelegationActionKind, EventLog, H256},
    Error, Result,
};
use restaking_ledger::OperatorAddress;

/// Length of the action kind field
pub const CROSS_CHAIN_ACTION_LENGTH: usize = 1;
/// Length of the operator address field
pub const OPERATOR_ADDRESS_LENGTH: usize = 44;
/// Length of the amount field
pub const CROSS_CHAIN_AMOUNT_LENGTH: usize = 32;
/// Topic holding the client-chain id
pub const CLIENT_CHAIN_ID_TOPIC: usize = 0;
/// Topic holding the bridge nonce
pub const NONCE_TOPIC: usize = 2;

/// Decode a delegate/undelegate action
///
/// Returns `Ok(None)` for any other action kind.
pub fn decode_delegation_action(
    log: &EventLog,
    chains: &dyn ClientChainRegistry,
) -> Result<Option<DelegationAction>> {
    let mut cursor = Cursor::new(&log.data);

    let kind_byte = cursor.take(CROSS_CHAIN_ACTION_LENGTH, "action kind")?[0];
    let kind = match CrossChainOpType::try_from(kind_byte) {
        Ok(CrossChainOpType::DelegateTo) => DelegationActionKind::DelegateTo,
        Ok(CrossChainOpType::UndelegateFrom) => DelegationActionKind::UndelegateFrom,
        _ => {
            tracing::debug!(kind = kind_byte, tx_hash = %log.tx_hash, "Skipping non-delegation action");
            return Ok(None);
        }
    };

    let client_chain_id = topic(log, CLIENT_CHAIN_ID_TOPIC, "client chain id")?.u64_prefix();
    let chain = chains
        .client_chain_info(client_chain_id)
        .ok_or_else(|| Error::Decode(format!("unknown client chain {}", client_chain_id)))?;
    let nonce = topic(log, NONCE_TOPIC, "nonce")?.u64_prefix();

    let address_length = chain.address_length as usize;
    let asset_address = cursor.take(address_length, "asset address")?.to_vec();

    let operator_bytes = cursor.take(OPERATOR_ADDRESS_LENGTH, "operator address")?;
    let operator_str = std::str::from_utf8(operator_bytes)
        .map_err(|e| Error::Decode(format!("operator address is not ASCII: {}", e)))?;
    let operator = OperatorAddress::parse(operator_str)
        .map_err(|e| Error::Decode(format!("operator address: {}", e)))?;

    let staker_address = cursor.take(address_length, "staker address")?.to_vec();

    let mut amount_bytes = [0u8; CROSS_CHAIN_AMOUNT_LENGTH];
    amount_bytes.copy_from_slice(cursor.take(CROSS_CHAIN_AMOUNT_LENGTH, "amount")?);
    let amount = restaking_ledger::Amount::from_be_bytes_unsigned(amount_bytes)
        .ok_or_else(|| Error::Decode("amount exceeds the signed 256-bit range".to_string()))?;

    Ok(Some(DelegationAction {
        client_chain_id,
        kind,
        asset_address,
        operator,
        staker_address,
        amount,
        nonce,
        tx_hash: log.tx_hash,
    }))
}

/// Pack an action into the log layout [`decode_delegation_action`] reads
///
/// Negative amounts cannot be represented on the wire and are rejected.
pub fn encode_delegation_action(action: &DelegationAction) -> Result<EventLog> {
    if action.amount.is_negative() {
        return Err(Error::NegativeAmount(action.amount.to_string()));
    }

    let kind = match action.kind {
        DelegationActionKind::DelegateTo => CrossChainOpType::DelegateTo,
        DelegationActionKind::UndelegateFrom => CrossChainOpType::UndelegateFrom,
    };

    let mut data = Vec::with_capacity(
        CROSS_CHAIN_ACTION_LENGTH
            + action.asset_address.len()
            + OPERATOR_ADDRESS_LENGTH
            + action.staker_address.len()
            + CROSS_CHAIN_AMOUNT_LENGTH,
    );
    data.push(kind as u8);
    data.extend_from_slice(&action.asset_address);
    data.extend_from_slice(action.operator.as_str().as_bytes());
    data.extend_from_slice(&action.staker_address);
    data.extend_from_slice(&action.amount.as_i256().to_be_bytes());

    Ok(EventLog {
        data,
        topics: vec![
            H256::from_u64_prefix(action.client_chain_id),
            H256::default(),
            H256::from_u64_prefix(action.nonce),
        ],
        tx_hash: action.tx_hash,
    })
}

fn topic<'a>(log: &'a EventLog, index: usize, what: &str) -> Result<&'a H256> {
    log.topics
        .get(index)
        .ok_or_else(|| Error::Decode(format!("missing {} topic at index {}", what, index)))
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.offset.checked_add(len).filter(|end| *end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.offset..end];
                self.offset = end;
                Ok(slice)
            }
            None => Err(Error::Decode(format!(
                "{} needs {} bytes at offset {}, payload is {} bytes",
                what,
                len,
                self.offset,
                self.data.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StaticChainRegistry;
    use crate::types::ClientChainInfo;
    use restaking_ledger::Amount;

    fn chains() -> StaticChainRegistry {
        StaticChainRegistry::new(vec![ClientChainInfo {
            name: "sepolia".to_string(),
            chain_id: 101,
            address_length: 20,
        }])
    }

    fn action(kind: DelegationActionKind) -> DelegationAction {
        DelegationAction {
            client_chain_id: 101,
            kind,
            asset_address: vec![0xaa; 20],
            operator: OperatorAddress::from_bytes("stake", &[1u8; 20]).unwrap(),
            staker_address: vec![0x11; 20],
            amount: Amount::from(100),
            nonce: 7,
            tx_hash: H256([5u8; 32]),
        }
    }

    #[test]
    fn test_decode_delegate() {
        let expected = action(DelegationActionKind::DelegateTo);
        let log = encode_delegation_action(&expected).unwrap();
        assert_eq!(log.data.len(), 1 + 20 + 44 + 20 + 32);

        let decoded = decode_delegation_action(&log, &chains()).unwrap().unwrap();
        assert_eq!(decoded, expected);
        assert_eq!(decoded.staker_id().as_str(), format!("0x{}_0x65", "11".repeat(20)));
    }

    #[test]
    fn test_other_kinds_not_applicable() {
        let mut log = encode_delegation_action(&action(DelegationActionKind::DelegateTo)).unwrap();
        for kind in [0u8, 1, 2, 5, 200] {
            log.data[0] = kind;
            assert_eq!(decode_delegation_action(&log, &chains()).unwrap(), None);
        }
    }

    #[test]
    fn test_truncated_payload() {
        let mut log =
            encode_delegation_action(&action(DelegationActionKind::UndelegateFrom)).unwrap();
        log.data.truncate(log.data.len() - 1);
        assert!(matches!(
            decode_delegation_action(&log, &chains()),
            Err(Error::Decode(_))
        ));

        log.data.clear();
        assert!(decode_delegation_action(&log, &chains()).is_err());
    }

    #[test]
    fn test_missing_topic_and_unknown_chain() {
        let mut log = encode_delegation_action(&action(DelegationActionKind::DelegateTo)).unwrap();
        log.topics.truncate(2);
        assert!(matches!(
            decode_delegation_action(&log, &chains()),
            Err(Error::Decode(_))
        ));

        let mut other_chain = action(DelegationActionKind::DelegateTo);
        other_chain.client_chain_id = 9;
        let log = encode_delegation_action(&other_chain).unwrap();
        assert!(decode_delegation_action(&log, &chains()).is_err());
    }

    #[test]
    fn test_bad_operator_and_amount() {
        let mut log = encode_delegation_action(&action(DelegationActionKind::DelegateTo)).unwrap();
        log.data[1 + 20 + 43] ^= 0x01;
        assert!(decode_delegation_action(&log, &chains()).is_err());

        let mut log = encode_delegation_action(&action(DelegationActionKind::DelegateTo)).unwrap();
        let amount_start = log.data.len() - 32;
        log.data[amount_start] = 0xff;
        assert!(matches!(
            decode_delegation_action(&log, &chains()),
            Err(Error::Decode(_))
        ));
    }
}
