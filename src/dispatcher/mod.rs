//! Action Dispatcher: turns confirmed events into destination-chain
//! transactions, exactly once per event identity.
//!
//! The claim is written before the submission: a record moves
//! Confirmed -> Dispatched in the ledger, then the transaction goes out.
//! A crash between the two leaves a Dispatched record with no destination
//! hash, which the recovery sweep re-drives on the next pass. The ledger
//! CAS means two dispatchers can never both claim the same record.

pub mod evm;
pub mod retry;

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::db::{self, ProcessingRecord};
use crate::error::{RelayerError, Result};
use crate::types::{failure_reason, EventKind, RecordStatus};

pub use retry::{classify_error, ErrorClass, RetryConfig};

/// A destination-chain action derived from a confirmed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Mint wrapped tokens on the destination (drives from Locked)
    Mint {
        token: Address,
        account: Address,
        amount: U256,
    },
    /// Release vault collateral on the source (drives from Burned)
    Release {
        token: Address,
        account: Address,
        amount: U256,
    },
}

impl Action {
    /// Derive the action for a ledger record. Non-actionable kinds
    /// (Minted, Released) yield None.
    pub fn from_record(record: &ProcessingRecord) -> Result<Option<Self>> {
        if !record.event_kind.is_actionable() {
            return Ok(None);
        }

        let malformed = |reason: String| RelayerError::MalformedEvent {
            tx_hash: record.source_tx_hash.clone(),
            log_index: record.log_index as u64,
            reason,
        };

        let token = Address::from_str(&record.token)
            .map_err(|e| malformed(format!("bad token address: {}", e)))?;
        let account = Address::from_str(&record.account)
            .map_err(|e| malformed(format!("bad account address: {}", e)))?;
        let amount = U256::from_str(&record.amount)
            .map_err(|e| malformed(format!("bad amount: {}", e)))?;

        Ok(Some(match record.event_kind {
            EventKind::Locked => Action::Mint {
                token,
                account,
                amount,
            },
            EventKind::Burned => Action::Release {
                token,
                account,
                amount,
            },
            EventKind::Minted | EventKind::Released => unreachable!(),
        }))
    }
}

/// Submits actions to a destination chain. The implementation owns the
/// signing key; serializing submissions through one mutator serializes the
/// account's nonce space.
#[async_trait]
pub trait DestinationMutator: Send + Sync {
    /// Direction label for logs and metrics, e.g. "lock_mint"
    fn direction(&self) -> &str;

    /// Submit the action and wait for inclusion. Returns the destination
    /// transaction hash on success; an error on revert or transport failure.
    async fn submit(&self, action: &Action) -> Result<String>;

    /// Look up an earlier submission: Some(true) landed successfully,
    /// Some(false) reverted, None not found on chain.
    async fn check_settled(&self, tx_hash: &str) -> Result<Option<bool>>;
}

/// Drives confirmed records for one source chain through dispatch to
/// settlement.
pub struct ActionDispatcher<M: DestinationMutator> {
    pool: PgPool,
    mutator: M,
    retry: RetryConfig,
    source_chain_id: u64,
}

impl<M: DestinationMutator> ActionDispatcher<M> {
    pub fn new(pool: PgPool, mutator: M, retry: RetryConfig, source_chain_id: u64) -> Self {
        Self {
            pool,
            mutator,
            retry,
            source_chain_id,
        }
    }

    pub fn direction(&self) -> &str {
        self.mutator.direction()
    }

    /// One dispatch pass: first re-drive records already claimed (restart
    /// recovery and operator re-queues), then claim and submit newly
    /// confirmed ones. Per-record failures are contained to that record.
    pub async fn run_pass(&self) -> Result<()> {
        self.recover_claimed().await?;
        self.dispatch_confirmed().await?;
        Ok(())
    }

    /// Records sitting in Dispatched: either the process died between claim
    /// and submission, the settle write was lost, or an operator re-queued a
    /// failure. Resolve each by checking the destination chain before
    /// resubmitting.
    async fn recover_claimed(&self) -> Result<()> {
        let claimed = db::get_records_by_status(
            &self.pool,
            self.source_chain_id,
            RecordStatus::Dispatched,
        )
        .await?;

        for record in claimed {
            if let Err(e) = self.resolve_claimed(&record).await {
                error!(
                    event = %record.identity(),
                    direction = self.direction(),
                    error = %e,
                    "Failed to resolve claimed record"
                );
            }
        }

        Ok(())
    }

    async fn resolve_claimed(&self, record: &ProcessingRecord) -> Result<()> {
        let identity = record.identity();

        if let Some(dest_tx_hash) = &record.dest_tx_hash {
            match self.mutator.check_settled(dest_tx_hash).await? {
                Some(true) => {
                    db::advance_status(
                        &self.pool,
                        record.id,
                        &identity,
                        RecordStatus::Dispatched,
                        RecordStatus::Settled,
                    )
                    .await?;
                    info!(
                        event = %identity,
                        dest_tx_hash = %dest_tx_hash,
                        "Recovered in-flight dispatch as settled"
                    );
                    return Ok(());
                }
                Some(false) => {
                    warn!(
                        event = %identity,
                        dest_tx_hash = %dest_tx_hash,
                        "Earlier submission reverted, resubmitting"
                    );
                }
                None => {
                    warn!(
                        event = %identity,
                        dest_tx_hash = %dest_tx_hash,
                        "Earlier submission not found on chain, resubmitting"
                    );
                }
            }
        }

        self.submit_record(record).await
    }

    /// Claim newly confirmed records and submit their actions in observation
    /// order.
    async fn dispatch_confirmed(&self) -> Result<()> {
        let confirmed = db::get_records_by_status(
            &self.pool,
            self.source_chain_id,
            RecordStatus::Confirmed,
        )
        .await?;

        for record in confirmed {
            let identity = record.identity();

            // Claim before submitting. Losing the CAS means another
            // dispatcher instance took it.
            if let Err(e) = db::advance_status(
                &self.pool,
                record.id,
                &identity,
                RecordStatus::Confirmed,
                RecordStatus::Dispatched,
            )
            .await
            {
                warn!(event = %identity, error = %e, "Lost dispatch claim, skipping");
                continue;
            }

            if let Err(e) = self.submit_record(&record).await {
                error!(
                    event = %identity,
                    direction = self.direction(),
                    error = %e,
                    "Dispatch failed"
                );
            }
        }

        Ok(())
    }

    /// Submit the action for a claimed record, with bounded retries, then
    /// settle or fail it. Non-actionable kinds settle immediately: they are
    /// acknowledgments of our own earlier actions, recorded for the ledger
    /// and reconciliation only.
    async fn submit_record(&self, record: &ProcessingRecord) -> Result<()> {
        let identity = record.identity();

        let action = match Action::from_record(record)? {
            Some(action) => action,
            None => {
                db::advance_status(
                    &self.pool,
                    record.id,
                    &identity,
                    RecordStatus::Dispatched,
                    RecordStatus::Settled,
                )
                .await?;
                return Ok(());
            }
        };

        let claimed_at = std::time::Instant::now();
        let mut attempts = record.attempts as u32;
        let mut last_error;

        loop {
            if !self.retry.should_retry(attempts) {
                db::mark_failed(
                    &self.pool,
                    record.id,
                    &identity,
                    RecordStatus::Dispatched,
                    failure_reason::DISPATCH_EXHAUSTED,
                )
                .await?;
                crate::metrics::record_dispatch(self.direction(), false);
                return Err(RelayerError::DispatchExhausted {
                    attempts,
                    last_error: format!("attempt budget used for {}", identity),
                });
            }

            db::record_dispatch_attempt(&self.pool, record.id).await?;
            attempts += 1;

            match self.mutator.submit(&action).await {
                Ok(dest_tx_hash) => {
                    db::set_dest_tx_hash(&self.pool, record.id, &dest_tx_hash).await?;
                    db::advance_status(
                        &self.pool,
                        record.id,
                        &identity,
                        RecordStatus::Dispatched,
                        RecordStatus::Settled,
                    )
                    .await?;

                    crate::metrics::record_dispatch(self.direction(), true);
                    crate::metrics::record_dispatch_latency(
                        self.direction(),
                        claimed_at.elapsed().as_secs_f64(),
                    );
                    info!(
                        event = %identity,
                        kind = %record.event_kind,
                        dest_tx_hash = %dest_tx_hash,
                        direction = self.direction(),
                        "Action settled"
                    );
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    match classify_error(&last_error) {
                        ErrorClass::AlreadyProcessed => {
                            // The destination contract itself reverted the
                            // call as a duplicate: the action landed under an
                            // earlier transaction. Settle on that proof.
                            db::advance_status(
                                &self.pool,
                                record.id,
                                &identity,
                                RecordStatus::Dispatched,
                                RecordStatus::Settled,
                            )
                            .await?;
                            info!(event = %identity, "Action already on chain, settled");
                            return Ok(());
                        }
                        ErrorClass::Permanent => {
                            db::mark_failed(
                                &self.pool,
                                record.id,
                                &identity,
                                RecordStatus::Dispatched,
                                failure_reason::DISPATCH_EXHAUSTED,
                            )
                            .await?;
                            crate::metrics::record_dispatch(self.direction(), false);
                            return Err(RelayerError::DispatchExhausted {
                                attempts,
                                last_error,
                            });
                        }
                        ErrorClass::Transient | ErrorClass::Unknown => {
                            let backoff = self.retry.backoff_for_attempt(attempts - 1);
                            warn!(
                                event = %identity,
                                attempt = attempts,
                                max = self.retry.max_attempts,
                                ?backoff,
                                error = %last_error,
                                "Submission failed, backing off"
                            );
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
        }
    }
}
