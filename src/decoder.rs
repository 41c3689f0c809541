//! Event Decoder: turns raw log records into typed bridge events.
//!
//! Logs from foreign contracts or with unrecognized signatures are skipped
//! (returned as `None`); logs that match a known signature but carry bad
//! payloads fail with `MalformedEvent` so the caller can quarantine them.

use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::rpc::types::Log;
use serde::Serialize;

use crate::error::{RelayerError, Result};
use crate::types::{EventIdentity, EventKind};

/// A decoded, validated bridge event. Identity is (chain, tx, log index);
/// everything else is payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeEvent {
    pub identity: EventIdentity,
    pub kind: EventKind,
    pub token: String,
    pub account: String,
    /// Decimal string; amounts are uint256 and stored as NUMERIC(78,0)
    pub amount: String,
    pub block_number: u64,
    pub block_hash: String,
}

/// Decodes logs emitted by the bridge contracts on one chain.
///
/// All four event kinds share the shape
/// `Event(address indexed token, address indexed account, uint256 amount)`.
pub struct EventDecoder {
    chain_id: u64,
    locked_sig: B256,
    released_sig: B256,
    minted_sig: B256,
    burned_sig: B256,
}

impl EventDecoder {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            locked_sig: keccak256(b"Locked(address,address,uint256)"),
            released_sig: keccak256(b"Released(address,address,uint256)"),
            minted_sig: keccak256(b"Minted(address,address,uint256)"),
            burned_sig: keccak256(b"Burned(address,address,uint256)"),
        }
    }

    /// Decode a raw log. Returns `None` for logs that are not bridge events.
    pub fn decode(&self, log: &Log) -> Result<Option<BridgeEvent>> {
        let topics = log.topics();
        if topics.is_empty() {
            return Ok(None);
        }

        let kind = if topics[0] == self.locked_sig {
            EventKind::Locked
        } else if topics[0] == self.released_sig {
            EventKind::Released
        } else if topics[0] == self.minted_sig {
            EventKind::Minted
        } else if topics[0] == self.burned_sig {
            EventKind::Burned
        } else {
            return Ok(None);
        };

        let tx_hash = log
            .transaction_hash
            .map(|h| format!("{:?}", h))
            .unwrap_or_default();
        let log_index = log.log_index.unwrap_or(u64::MAX);

        let malformed = |reason: &str| RelayerError::MalformedEvent {
            tx_hash: tx_hash.clone(),
            log_index,
            reason: reason.to_string(),
        };

        if log.transaction_hash.is_none() {
            return Err(malformed("missing transaction hash"));
        }
        if log.log_index.is_none() {
            return Err(malformed("missing log index"));
        }
        let block_number = log.block_number.ok_or_else(|| malformed("missing block number"))?;
        let block_hash = log.block_hash.ok_or_else(|| malformed("missing block hash"))?;

        // topics[1] = token, topics[2] = account, both address-in-bytes32
        if topics.len() != 3 {
            return Err(malformed("wrong indexed topic count"));
        }
        let token = Address::from_slice(&topics[1].as_slice()[12..]);
        let account = Address::from_slice(&topics[2].as_slice()[12..]);
        if token == Address::ZERO {
            return Err(malformed("zero token address"));
        }
        if account == Address::ZERO {
            return Err(malformed("zero account address"));
        }

        // Non-indexed data: amount (uint256)
        let data = log.data().data.as_ref();
        if data.len() < 32 {
            return Err(malformed("truncated event data"));
        }
        let amount = U256::from_be_slice(&data[..32]);

        Ok(Some(BridgeEvent {
            identity: EventIdentity {
                source_chain_id: self.chain_id,
                source_tx_hash: tx_hash,
                log_index,
            },
            kind,
            token: format!("{:?}", token),
            account: format!("{:?}", account),
            amount: amount.to_string(),
            block_number,
            block_hash: format!("{:?}", block_hash),
        }))
    }
}
