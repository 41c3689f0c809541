//! Confirmation Tracker: promotes pending events to Confirmed once they are
//! buried under enough blocks, and fails them when their block reorgs away.
//!
//! Depth is re-checked against the live head every pass rather than assumed
//! from scan order, and the block hash recorded at observation time is
//! re-fetched at the same height. A changed or missing hash means the event
//! no longer exists on the canonical chain.

use sqlx::postgres::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db;
use crate::error::Result;
use crate::reader::ChainReader;
use crate::types::{failure_reason, RecordStatus};

/// Number of blocks built on top of `block_number` at `head`. An event is
/// final once this reaches the chain's confirmation depth; the containing
/// block itself does not count.
pub fn confirmations(head: u64, block_number: u64) -> u64 {
    head.saturating_sub(block_number)
}

pub struct ConfirmationTracker {
    pool: PgPool,
    reader: Arc<ChainReader>,
    chain_name: String,
    confirmation_depth: u64,
}

impl ConfirmationTracker {
    pub fn new(
        pool: PgPool,
        reader: Arc<ChainReader>,
        chain_name: String,
        confirmation_depth: u64,
    ) -> Self {
        Self {
            pool,
            reader,
            chain_name,
            confirmation_depth,
        }
    }

    /// One tracking pass: examine every Pending record on this chain and
    /// either confirm it, fail it as reorged, or leave it for a later pass.
    ///
    /// Per-record database races lose gracefully: a concurrent mover causes
    /// the CAS to fail and the record is simply skipped this pass.
    pub async fn run_pass(&self) -> Result<usize> {
        let pending = db::get_records_by_status(
            &self.pool,
            self.reader.chain_id(),
            RecordStatus::Pending,
        )
        .await?;

        if pending.is_empty() {
            return Ok(0);
        }

        let head = self.reader.head().await?;
        let mut confirmed = 0;

        for record in pending {
            if confirmations(head, record.block_number as u64) < self.confirmation_depth {
                continue;
            }

            // Depth reached; re-validate the containing block before promoting.
            let current_hash = self.reader.block_hash_at(record.block_number as u64).await?;
            let identity = record.identity();

            match current_hash {
                Some(hash) if hash == record.block_hash => {
                    if let Err(e) = db::advance_status(
                        &self.pool,
                        record.id,
                        &identity,
                        RecordStatus::Pending,
                        RecordStatus::Confirmed,
                    )
                    .await
                    {
                        warn!(event = %identity, error = %e, "Skipping confirm, record moved concurrently");
                        continue;
                    }

                    crate::metrics::record_event_confirmed(&self.chain_name);
                    info!(
                        event = %identity,
                        kind = %record.event_kind,
                        block = record.block_number,
                        "Event confirmed"
                    );
                    confirmed += 1;
                }
                other => {
                    // Block replaced (or pruned below the head we just saw).
                    if let Err(e) = db::mark_failed(
                        &self.pool,
                        record.id,
                        &identity,
                        RecordStatus::Pending,
                        failure_reason::REORGED,
                    )
                    .await
                    {
                        warn!(event = %identity, error = %e, "Skipping reorg marking, record moved concurrently");
                        continue;
                    }

                    crate::metrics::record_reorg(&self.chain_name);
                    warn!(
                        event = %identity,
                        block = record.block_number,
                        recorded_hash = %record.block_hash,
                        current_hash = ?other,
                        "Event invalidated by reorg"
                    );
                }
            }
        }

        Ok(confirmed)
    }
}
