//! Prometheus metrics for the peg relayer.
//!
//! Exposed on the /metrics endpoint for scraping.

#![allow(dead_code)]

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

lazy_static! {
    // Scan metrics
    pub static ref BLOCKS_SCANNED: CounterVec = register_counter_vec!(
        "relayer_blocks_scanned_total",
        "Total number of blocks scanned",
        &["chain"]
    ).unwrap();

    pub static ref CHECKPOINT_BLOCK: GaugeVec = register_gauge_vec!(
        "relayer_checkpoint_block",
        "Last safe block recorded per chain",
        &["chain"]
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_OBSERVED: CounterVec = register_counter_vec!(
        "relayer_events_observed_total",
        "Total bridge events recorded in the ledger",
        &["chain", "kind"]
    ).unwrap();

    pub static ref EVENTS_CONFIRMED: CounterVec = register_counter_vec!(
        "relayer_events_confirmed_total",
        "Total events that reached confirmation depth",
        &["chain"]
    ).unwrap();

    pub static ref REORGS_DETECTED: CounterVec = register_counter_vec!(
        "relayer_reorgs_detected_total",
        "Total events invalidated by block reorganizations",
        &["chain"]
    ).unwrap();

    // Dispatch metrics
    pub static ref DISPATCHES_SUBMITTED: CounterVec = register_counter_vec!(
        "relayer_dispatches_submitted_total",
        "Total destination actions submitted",
        &["direction", "status"]
    ).unwrap();

    pub static ref DISPATCH_LATENCY: HistogramVec = register_histogram_vec!(
        "relayer_dispatch_latency_seconds",
        "Time from confirmation to settled destination action",
        &["direction"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();

    // Queue sizes
    pub static ref RECORDS_BY_STATUS: GaugeVec = register_gauge_vec!(
        "relayer_records_by_status",
        "Number of ledger records per status",
        &["status"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "relayer_errors_total",
        "Total number of errors",
        &["chain", "type"]
    ).unwrap();

    // Reconciliation metrics
    pub static ref LOCKED_BALANCE_DRIFT: GaugeVec = register_gauge_vec!(
        "relayer_locked_balance_drift",
        "Vault balance minus settled net flow per token (base units, lossy above 2^53)",
        &["token"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "relayer_up",
        "Whether the relayer is up and running"
    ).unwrap();

    pub static ref LAST_SUCCESSFUL_POLL: GaugeVec = register_gauge_vec!(
        "relayer_last_successful_poll_timestamp",
        "Unix timestamp of last successful poll",
        &["chain"]
    ).unwrap();
}

/// Record a completed scan up to a block
pub fn record_scan(chain: &str, blocks: u64, checkpoint: u64) {
    BLOCKS_SCANNED.with_label_values(&[chain]).inc_by(blocks as f64);
    CHECKPOINT_BLOCK
        .with_label_values(&[chain])
        .set(checkpoint as f64);
}

/// Record a newly observed event
pub fn record_event_observed(chain: &str, kind: &str) {
    EVENTS_OBSERVED.with_label_values(&[chain, kind]).inc();
}

/// Record an event reaching confirmation depth
pub fn record_event_confirmed(chain: &str) {
    EVENTS_CONFIRMED.with_label_values(&[chain]).inc();
}

/// Record a reorg invalidating an event
pub fn record_reorg(chain: &str) {
    REORGS_DETECTED.with_label_values(&[chain]).inc();
}

/// Record a dispatch submission outcome
pub fn record_dispatch(direction: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    DISPATCHES_SUBMITTED
        .with_label_values(&[direction, status])
        .inc();
}

/// Record confirmation-to-settlement latency
pub fn record_dispatch_latency(direction: &str, seconds: f64) {
    DISPATCH_LATENCY
        .with_label_values(&[direction])
        .observe(seconds);
}

/// Update the per-status record gauges
pub fn set_records_by_status(status: &str, count: i64) {
    RECORDS_BY_STATUS
        .with_label_values(&[status])
        .set(count as f64);
}

/// Record an error
pub fn record_error(chain: &str, error_type: &str) {
    ERRORS.with_label_values(&[chain, error_type]).inc();
}

/// Update the reconciliation drift gauge for a token
pub fn set_locked_balance_drift(token: &str, drift: f64) {
    LOCKED_BALANCE_DRIFT.with_label_values(&[token]).set(drift);
}

/// Record last successful poll
pub fn record_successful_poll(chain: &str) {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64();
    LAST_SUCCESSFUL_POLL
        .with_label_values(&[chain])
        .set(timestamp);
}
