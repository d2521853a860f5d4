//! Compact protocol variant
//!
//! Shapes broadcast payloads into validated fill requests and supplies the
//! base rule list. This protocol has no origin-chain resolution leg, so the
//! default no-op hooks apply.

use anyhow::Result;
use async_trait::async_trait;

use crate::chains::{abi, LogEntry};
use crate::crypto::derive_claim_hash;
use crate::filler::{IntentProtocol, Rule};
use crate::intent::{FillRequest, RawFillRequest};
use crate::rules;
use crate::sources::onchain::LogDecoder;
use std::sync::Arc;

pub struct CompactProtocol;

#[async_trait]
impl IntentProtocol for CompactProtocol {
    fn name(&self) -> &'static str {
        "compactx"
    }

    fn prepare(&self, raw: &serde_json::Value) -> Result<FillRequest, String> {
        let raw: RawFillRequest =
            serde_json::from_value(raw.clone()).map_err(|e| e.to_string())?;
        let mut request = FillRequest::parse(&raw).map_err(|e| e.to_string())?;
        let claim_hash = derive_claim_hash(&request.compact);
        request.attach_claim_hash(claim_hash);
        Ok(request)
    }

    fn base_rules(&self) -> Vec<Rule> {
        rules::base_rules()
    }
}

/// Decoder for on-chain broadcast events carrying an ABI-encoded `bytes`
/// payload of request JSON.
pub fn broadcast_log_decoder() -> LogDecoder {
    Arc::new(|log: &LogEntry| {
        let word = ethereum_types::U256::from(32u64);
        let data_len = ethereum_types::U256::from(log.data.len());
        let offset = abi::decode_u256(&log.data, 0)?;
        if offset + word > data_len {
            anyhow::bail!("log data too short for payload offset");
        }
        let offset = offset.as_usize();
        let length = abi::decode_u256(&log.data[offset..], 0)?;
        if ethereum_types::U256::from(offset) + word + length > data_len {
            anyhow::bail!("log data too short for payload body");
        }
        let start = offset + 32;
        let end = start + length.as_usize();
        let value = serde_json::from_slice(&log.data[start..end])?;
        Ok(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::abi::Token;
    use ethereum_types::{H160, H256};

    #[test]
    fn decodes_broadcast_payload() {
        let payload = br#"{"hello":"world"}"#.to_vec();
        let data = abi::encode(&[Token::Bytes(payload)]);
        let log = LogEntry {
            address: H160::zero(),
            topics: vec![H256::zero()],
            data,
            block_number: 1,
            transaction_hash: H256::zero(),
            log_index: 0,
        };
        let decoder = broadcast_log_decoder();
        let value = decoder(&log).unwrap();
        assert_eq!(value["hello"], "world");
    }

    #[test]
    fn rejects_truncated_payload() {
        let payload = br#"{"hello":"world"}"#.to_vec();
        let mut data = abi::encode(&[Token::Bytes(payload)]);
        data.truncate(40);
        let log = LogEntry {
            address: H160::zero(),
            topics: vec![H256::zero()],
            data,
            block_number: 1,
            transaction_hash: H256::zero(),
            log_index: 0,
        };
        assert!(broadcast_log_decoder()(&log).is_err());
    }
}
