//! Direction workers: one independent pipeline per bridge direction.
//!
//! Each worker owns a reader, decoder, tracker, and dispatcher for its
//! source chain, and cycles scan -> record -> checkpoint -> track ->
//! dispatch. The two directions share nothing but the database, so a stall
//! on one chain never blocks the other.

use eyre::Result;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;
use crate::decoder::EventDecoder;
use crate::dispatcher::evm::EvmDispatcher;
use crate::dispatcher::{ActionDispatcher, RetryConfig};
use crate::error::RelayerError;
use crate::reader::{scan_window, ChainReader};
use crate::tracker::ConfirmationTracker;

/// Consecutive cycle failures before the worker pauses.
const CIRCUIT_BREAKER_THRESHOLD: u32 = 10;
const CIRCUIT_BREAKER_PAUSE: Duration = Duration::from_secs(300);

/// One bridge direction: scans a source chain and dispatches the resulting
/// actions to the opposite chain.
pub struct DirectionWorker {
    chain_label: &'static str,
    pool: PgPool,
    reader: Arc<ChainReader>,
    decoder: EventDecoder,
    tracker: ConfirmationTracker,
    dispatcher: ActionDispatcher<EvmDispatcher>,
    confirmation_depth: u64,
    poll_interval: Duration,
    consecutive_failures: u32,
}

impl DirectionWorker {
    fn new(
        chain_label: &'static str,
        direction: &'static str,
        pool: PgPool,
        source: &crate::config::ChainConfig,
        target: &crate::config::ChainConfig,
        retry: RetryConfig,
        poll_interval: Duration,
    ) -> Result<Self, RelayerError> {
        let reader = Arc::new(ChainReader::new(source)?);
        let decoder = EventDecoder::new(source.chain_id);
        let tracker = ConfirmationTracker::new(
            pool.clone(),
            reader.clone(),
            chain_label.to_string(),
            source.confirmation_depth,
        );
        let mutator = EvmDispatcher::new(direction, target)?;
        let dispatcher = ActionDispatcher::new(pool.clone(), mutator, retry, source.chain_id);

        info!(
            direction,
            chain_id = source.chain_id,
            confirmation_depth = source.confirmation_depth,
            "Direction worker created"
        );

        Ok(Self {
            chain_label,
            pool,
            reader,
            decoder,
            tracker,
            dispatcher,
            confirmation_depth: source.confirmation_depth,
            poll_interval,
            consecutive_failures: 0,
        })
    }

    /// Run the poll loop until the task is aborted.
    pub async fn run(mut self) -> Result<()> {
        info!(
            direction = self.dispatcher.direction(),
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Worker starting poll loop"
        );

        loop {
            if self.consecutive_failures >= CIRCUIT_BREAKER_THRESHOLD {
                warn!(
                    direction = self.dispatcher.direction(),
                    failures = self.consecutive_failures,
                    pause_secs = CIRCUIT_BREAKER_PAUSE.as_secs(),
                    "Circuit breaker tripped, pausing worker"
                );
                tokio::time::sleep(CIRCUIT_BREAKER_PAUSE).await;
                self.consecutive_failures = 0;
            }

            match self.run_cycle().await {
                Ok(()) => {
                    self.consecutive_failures = 0;
                    crate::metrics::record_successful_poll(self.chain_label);
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    crate::metrics::record_error(self.chain_label, error_label(&e));
                    error!(
                        direction = self.dispatcher.direction(),
                        consecutive_failures = self.consecutive_failures,
                        error = %e,
                        "Worker cycle failed"
                    );
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// One full pipeline cycle for this direction.
    async fn run_cycle(&self) -> Result<(), RelayerError> {
        self.scan_and_record().await?;
        self.tracker.run_pass().await?;
        self.dispatcher.run_pass().await?;
        self.update_status_gauges().await?;
        Ok(())
    }

    /// Scan the safe window above the checkpoint, record every decodable
    /// event, then advance the checkpoint. The checkpoint moves only after
    /// the whole window is durably recorded, so a crash mid-window rescans
    /// it and the identity constraint absorbs the duplicates. Recorded rows
    /// are never deleted and keep flowing through the tracker and dispatcher
    /// regardless of the checkpoint, so advancing past a still-Pending block
    /// loses nothing; the one case needing an actual rescan, a record failed
    /// as reorged, goes through the operator checkpoint rewind.
    async fn scan_and_record(&self) -> Result<(), RelayerError> {
        let chain_id = self.reader.chain_id();
        let head = self.reader.head().await?;

        let checkpoint = match db::checkpoint_get(&self.pool, chain_id).await? {
            Some(block) => block,
            None => {
                // First run: start at the current safe head instead of
                // scanning from genesis.
                let initial = head.saturating_sub(self.confirmation_depth);
                db::checkpoint_set(&self.pool, chain_id, initial).await?;
                info!(chain_id, initial, "Initialized checkpoint");
                initial
            }
        };

        let (from, to) = match scan_window(checkpoint, head, self.confirmation_depth) {
            Some(window) => window,
            None => return Ok(()),
        };

        let logs = self.reader.logs(from, Some(to)).await?;

        for log in &logs {
            match self.decoder.decode(log) {
                Ok(Some(event)) => {
                    let (created, _) = db::record_if_new(&self.pool, &(&event).into()).await?;
                    if created {
                        crate::metrics::record_event_observed(
                            self.chain_label,
                            event.kind.as_str(),
                        );
                        info!(
                            event = %event.identity,
                            kind = %event.kind,
                            token = %event.token,
                            amount = %event.amount,
                            block = event.block_number,
                            "New bridge event recorded"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // Contract/ABI mismatch. Loud, never silently dropped.
                    crate::metrics::record_error(self.chain_label, "malformed_event");
                    error!(
                        chain_id,
                        tx_hash = ?log.transaction_hash,
                        log_index = ?log.log_index,
                        error = %e,
                        "Malformed bridge event"
                    );
                }
            }
        }

        db::checkpoint_set(&self.pool, chain_id, to).await?;
        crate::metrics::record_scan(self.chain_label, to - from + 1, to);

        Ok(())
    }

    async fn update_status_gauges(&self) -> Result<(), RelayerError> {
        for (status, count) in db::count_records_by_status(&self.pool).await? {
            crate::metrics::set_records_by_status(&status, count);
        }
        Ok(())
    }
}

fn error_label(e: &RelayerError) -> &'static str {
    match e {
        RelayerError::ChainUnavailable { .. } => "chain_unavailable",
        RelayerError::InvalidRange { .. } => "invalid_range",
        RelayerError::MalformedEvent { .. } => "malformed_event",
        RelayerError::Reorged { .. } => "reorged",
        RelayerError::IllegalTransition { .. } => "illegal_transition",
        RelayerError::CheckpointRegression { .. } => "checkpoint_regression",
        RelayerError::DispatchExhausted { .. } => "dispatch_exhausted",
        RelayerError::Database(_) => "database",
        RelayerError::Other(_) => "other",
    }
}

/// Runs both bridge directions concurrently.
pub struct WorkerManager {
    lock_mint: DirectionWorker,
    burn_release: DirectionWorker,
}

impl WorkerManager {
    pub fn new(config: &Config, pool: PgPool) -> Result<Self, RelayerError> {
        let retry = RetryConfig::from_relayer_config(&config.relayer);
        let poll_interval = Duration::from_millis(config.relayer.poll_interval_ms);

        // Locked on the source vault -> mint on the destination
        let lock_mint = DirectionWorker::new(
            "source",
            "lock_mint",
            pool.clone(),
            &config.source,
            &config.destination,
            retry.clone(),
            poll_interval,
        )?;

        // Burned on the destination wrapped token -> release from the vault
        let burn_release = DirectionWorker::new(
            "destination",
            "burn_release",
            pool,
            &config.destination,
            &config.source,
            retry,
            poll_interval,
        )?;

        Ok(Self {
            lock_mint,
            burn_release,
        })
    }

    /// Run both workers concurrently.
    /// Returns when any worker fails or the shutdown signal is received.
    pub async fn run(self, mut shutdown: mpsc::Receiver<()>) -> Result<()> {
        let mut join_set = tokio::task::JoinSet::new();

        join_set.spawn(self.lock_mint.run());
        join_set.spawn(self.burn_release.run());

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown signal received, stopping workers");
                join_set.abort_all();
                Ok(())
            }
            maybe_done = join_set.join_next() => {
                match maybe_done {
                    Some(Ok(Ok(()))) => {
                        error!("A worker exited unexpectedly without error");
                        Err(eyre::eyre!("worker exited unexpectedly"))
                    }
                    Some(Ok(Err(e))) => {
                        error!("A worker stopped with error: {:?}", e);
                        Err(e)
                    }
                    Some(Err(e)) => {
                        error!("A worker task panicked: {:?}", e);
                        Err(eyre::eyre!("worker task panicked: {}", e))
                    }
                    None => {
                        error!("All worker tasks exited unexpectedly");
                        Err(eyre::eyre!("all worker tasks exited unexpectedly"))
                    }
                }
            }
        }
    }
}
