use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::decoder::BridgeEvent;
use crate::types::{EventIdentity, EventKind, RecordStatus};

// Amounts are uint256 and stored as NUMERIC(78,0). We keep them as decimal
// strings in Rust and cast with $n::NUMERIC on insert / ::TEXT on read.

/// One row of the idempotency ledger.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub id: i64,
    pub source_chain_id: i64,
    pub source_tx_hash: String,
    pub log_index: i64,
    pub event_kind: EventKind,
    pub token: String,
    pub account: String,
    pub amount: String,
    pub block_number: i64,
    pub block_hash: String,
    pub status: RecordStatus,
    /// Hash of the destination action transaction, once submitted
    pub dest_tx_hash: Option<String>,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingRecord {
    pub fn identity(&self) -> EventIdentity {
        EventIdentity::new(
            self.source_chain_id as u64,
            self.source_tx_hash.clone(),
            self.log_index as u64,
        )
    }
}

/// For inserting new ledger rows
#[derive(Debug, Clone)]
pub struct NewProcessingRecord {
    pub source_chain_id: i64,
    pub source_tx_hash: String,
    pub log_index: i64,
    pub event_kind: EventKind,
    pub token: String,
    pub account: String,
    pub amount: String,
    pub block_number: i64,
    pub block_hash: String,
}

impl From<&BridgeEvent> for NewProcessingRecord {
    fn from(event: &BridgeEvent) -> Self {
        Self {
            source_chain_id: event.identity.source_chain_id as i64,
            source_tx_hash: event.identity.source_tx_hash.clone(),
            log_index: event.identity.log_index as i64,
            event_kind: event.kind,
            token: event.token.clone(),
            account: event.account.clone(),
            amount: event.amount.clone(),
            block_number: event.block_number as i64,
            block_hash: event.block_hash.clone(),
        }
    }
}

/// Per-chain scan checkpoint
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Checkpoint {
    pub chain_id: i64,
    pub last_safe_block: i64,
    pub updated_at: DateTime<Utc>,
}
