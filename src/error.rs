//! Error taxonomy for the relayer pipeline.
//!
//! Per-event failures never abort a worker loop; the loop logs the error
//! and moves on to the next event. Invariant violations (`IllegalTransition`,
//! `CheckpointRegression`) are fatal to the invoking call only.

use thiserror::Error;

use crate::types::RecordStatus;

#[derive(Debug, Error)]
pub enum RelayerError {
    /// Transport or node failure talking to a chain RPC. Retryable.
    #[error("chain {chain_id} unavailable: {reason}")]
    ChainUnavailable { chain_id: u64, reason: String },

    /// Caller asked for a block range with from > to.
    #[error("invalid block range: from {from} > to {to}")]
    InvalidRange { from: u64, to: u64 },

    /// A raw log could not be decoded into a bridge event. Not retryable;
    /// indicates a contract/ABI mismatch and must be alerted, never dropped.
    #[error("malformed event in tx {tx_hash} log {log_index}: {reason}")]
    MalformedEvent {
        tx_hash: String,
        log_index: u64,
        reason: String,
    },

    /// The source block containing the event was replaced before the event
    /// reached confirmation depth.
    #[error("event at block {block_number} reorged: recorded hash {recorded_hash}, chain now has {current_hash}")]
    Reorged {
        block_number: u64,
        recorded_hash: String,
        current_hash: String,
    },

    /// A status advance violated the monotonic transition table.
    #[error("illegal transition {from} -> {to} for event {identity}")]
    IllegalTransition {
        identity: String,
        from: RecordStatus,
        to: RecordStatus,
    },

    /// A checkpoint set would move the last safe block backwards.
    #[error("checkpoint regression on chain {chain_id}: {current} -> {requested}")]
    CheckpointRegression {
        chain_id: u64,
        current: i64,
        requested: i64,
    },

    /// All dispatch attempts for an event were used up.
    #[error("dispatch exhausted after {attempts} attempts: {last_error}")]
    DispatchExhausted { attempts: u32, last_error: String },

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl RelayerError {
    /// Whether the error class should be retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayerError::ChainUnavailable { .. })
    }
}

pub type Result<T, E = RelayerError> = std::result::Result<T, E>;
