//! Health & Status API endpoints
//!
//! Provides HTTP endpoints for monitoring and operator intervention:
//! - GET /health - Simple health check
//! - GET /metrics - Prometheus metrics
//! - GET /status - Checkpoints, ledger counts, uptime
//! - GET /records?status=<status> - Recent ledger records in a status
//! - GET /scan?chain=source|destination[&from=..] - One read-only scan cycle
//! - POST /requeue?chain_id=..&tx_hash=..&log_index=.. - Re-queue a failed record
//! - POST /rewind?chain_id=..&block=.. - Rewind a checkpoint for re-observation

#![allow(dead_code)]

use eyre::Result;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use crate::config::{ChainConfig, Config};
use crate::db;
use crate::decoder::{BridgeEvent, EventDecoder};
use crate::error::RelayerError;
use crate::metrics;
use crate::reader::{scan_window, ChainReader};
use crate::types::{EventIdentity, RecordStatus};

/// Server start time for uptime calculation
static mut START_TIME: Option<Instant> = None;

#[derive(Serialize)]
struct StatusResponse {
    status: String,
    uptime_seconds: u64,
    checkpoints: Vec<CheckpointInfo>,
    records: HashMap<String, i64>,
}

#[derive(Serialize)]
struct CheckpointInfo {
    chain_id: i64,
    last_safe_block: i64,
}

#[derive(Serialize)]
struct ScanResponse {
    chain_id: u64,
    checkpoint: u64,
    safe_head: u64,
    malformed: u64,
    events: Vec<BridgeEvent>,
}

#[derive(Serialize)]
struct RecordInfo {
    source_chain_id: i64,
    source_tx_hash: String,
    log_index: i64,
    kind: String,
    token: String,
    account: String,
    amount: String,
    status: String,
    dest_tx_hash: Option<String>,
    attempts: i32,
    failure_reason: Option<String>,
}

/// Start the API server (combines metrics and status endpoints)
pub async fn start_api_server(addr: SocketAddr, db: PgPool, config: Config) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server started");

    unsafe {
        START_TIME = Some(Instant::now());
    }

    // Mark relayer as up
    metrics::UP.set(1.0);

    loop {
        let (mut socket, _) = listener.accept().await?;
        let db = db.clone();
        let config = config.clone();

        tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            if socket.readable().await.is_ok() {
                let _ = socket.try_read(&mut buf);
            }

            let request = String::from_utf8_lossy(&buf);

            if request.contains("GET /metrics") {
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                let _ = encoder.encode(&metric_families, &mut buffer);

                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
                    buffer.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(&buffer).await;
            } else if request.contains("GET /health") {
                let response =
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            } else if request.contains("GET /status") {
                let status = build_status_response(&db).await;
                let body = serde_json::to_string(&status).unwrap_or_else(|_| "{}".to_string());
                let _ = socket.write_all(json_response(200, &body).as_bytes()).await;
            } else if request.contains("GET /records") {
                let params = query_params(&request);
                let status = params
                    .get("status")
                    .and_then(|s| parse_status(s))
                    .unwrap_or(RecordStatus::Failed);
                let records = build_records_response(&db, status).await;
                let body = serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string());
                let _ = socket.write_all(json_response(200, &body).as_bytes()).await;
            } else if request.contains("GET /scan") {
                let (code, body) = handle_scan(&db, &config, &request).await;
                let _ = socket.write_all(json_response(code, &body).as_bytes()).await;
            } else if request.contains("POST /requeue") {
                let (code, body) = handle_requeue(&db, &request).await;
                let _ = socket.write_all(json_response(code, &body).as_bytes()).await;
            } else if request.contains("POST /rewind") {
                let (code, body) = handle_rewind(&db, &request).await;
                let _ = socket.write_all(json_response(code, &body).as_bytes()).await;
            } else {
                let response = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

fn json_response(code: u16, body: &str) -> String {
    let reason = match code {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
        code,
        reason,
        body.len(),
        body
    )
}

/// Parse the query string of the request line into a key/value map.
fn query_params(request: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    let Some(first_line) = request.lines().next() else {
        return params;
    };
    let Some(path) = first_line.split_whitespace().nth(1) else {
        return params;
    };
    let Some((_, query)) = path.split_once('?') else {
        return params;
    };

    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            params.insert(key.to_string(), value.to_string());
        }
    }

    params
}

fn parse_status(s: &str) -> Option<RecordStatus> {
    match s {
        "pending" => Some(RecordStatus::Pending),
        "confirmed" => Some(RecordStatus::Confirmed),
        "dispatched" => Some(RecordStatus::Dispatched),
        "settled" => Some(RecordStatus::Settled),
        "failed" => Some(RecordStatus::Failed),
        _ => None,
    }
}

async fn build_status_response(db: &PgPool) -> StatusResponse {
    let uptime = unsafe { START_TIME.map(|t| t.elapsed().as_secs()).unwrap_or(0) };

    let checkpoints = db::checkpoint_all(db)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|c| CheckpointInfo {
            chain_id: c.chain_id,
            last_safe_block: c.last_safe_block,
        })
        .collect();

    let records = db::count_records_by_status(db)
        .await
        .unwrap_or_default()
        .into_iter()
        .collect();

    StatusResponse {
        status: "ok".to_string(),
        uptime_seconds: uptime,
        checkpoints,
        records,
    }
}

async fn build_records_response(db: &PgPool, status: RecordStatus) -> Vec<RecordInfo> {
    db::get_recent_records(db, status, 50)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|r| RecordInfo {
            source_chain_id: r.source_chain_id,
            source_tx_hash: r.source_tx_hash,
            log_index: r.log_index,
            kind: r.event_kind.to_string(),
            token: r.token,
            account: r.account,
            amount: r.amount,
            status: r.status.to_string(),
            dest_tx_hash: r.dest_tx_hash,
            attempts: r.attempts,
            failure_reason: r.failure_reason,
        })
        .collect()
}

/// One read-only scan cycle for external visibility and testing: reads the
/// safe window above the persisted checkpoint (or an explicit `from` block)
/// and returns the decoded events, without writing the ledger or moving the
/// checkpoint. The worker loop remains the authoritative processing path.
async fn handle_scan(db: &PgPool, config: &Config, request: &str) -> (u16, String) {
    let params = query_params(request);

    let chain: &ChainConfig = match params.get("chain").map(|s| s.as_str()) {
        Some("source") => &config.source,
        Some("destination") => &config.destination,
        _ => {
            return (
                400,
                r#"{"error":"chain must be source or destination"}"#.to_string(),
            )
        }
    };

    let from_override = params.get("from").and_then(|v| v.parse::<u64>().ok());

    match run_scan_cycle(db, chain, from_override).await {
        Ok(scan) => {
            let body = serde_json::to_string(&scan).unwrap_or_else(|_| "{}".to_string());
            (200, body)
        }
        Err(e) => {
            tracing::error!(chain_id = chain.chain_id, error = %e, "Scan cycle failed");
            (500, format!(r#"{{"error":"{}"}}"#, e))
        }
    }
}

async fn run_scan_cycle(
    db: &PgPool,
    chain: &ChainConfig,
    from_override: Option<u64>,
) -> Result<ScanResponse, RelayerError> {
    let reader = ChainReader::new(chain)?;
    let decoder = EventDecoder::new(chain.chain_id);

    let head = reader.head().await?;
    let checkpoint = match from_override {
        Some(from) => from.saturating_sub(1),
        None => match db::checkpoint_get(db, chain.chain_id).await? {
            Some(block) => block,
            None => head.saturating_sub(chain.confirmation_depth),
        },
    };

    let mut events = Vec::new();
    let mut malformed = 0u64;

    if let Some((from, to)) = scan_window(checkpoint, head, chain.confirmation_depth) {
        for log in reader.logs(from, Some(to)).await? {
            match decoder.decode(&log) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(_) => malformed += 1,
            }
        }
    }

    Ok(ScanResponse {
        chain_id: chain.chain_id,
        checkpoint,
        safe_head: head.saturating_sub(chain.confirmation_depth),
        malformed,
        events,
    })
}

/// Operator re-queue of a failed record. The record re-enters Dispatched
/// with a fresh attempt budget and the dispatcher re-drives it.
async fn handle_requeue(db: &PgPool, request: &str) -> (u16, String) {
    let params = query_params(request);

    let (Some(chain_id), Some(tx_hash), Some(log_index)) = (
        params.get("chain_id").and_then(|v| v.parse::<u64>().ok()),
        params.get("tx_hash"),
        params.get("log_index").and_then(|v| v.parse::<u64>().ok()),
    ) else {
        return (
            400,
            r#"{"error":"chain_id, tx_hash and log_index are required"}"#.to_string(),
        );
    };

    let identity = EventIdentity::new(chain_id, tx_hash.clone(), log_index);

    match db::requeue_failed(db, &identity).await {
        Ok(true) => {
            tracing::info!(event = %identity, "Failed record re-queued by operator");
            (200, r#"{"requeued":true}"#.to_string())
        }
        Ok(false) => (
            404,
            r#"{"error":"no failed record with that identity"}"#.to_string(),
        ),
        Err(e) => {
            tracing::error!(event = %identity, error = %e, "Re-queue failed");
            (500, format!(r#"{{"error":"{}"}}"#, e))
        }
    }
}

/// Operator rewind of a chain's checkpoint, the only sanctioned way to move
/// it backwards. Used after a reorg failure so the replaced history can be
/// re-observed; already-known events in the rescanned window dedupe through
/// the ledger's identity constraint.
async fn handle_rewind(db: &PgPool, request: &str) -> (u16, String) {
    let params = query_params(request);

    let (Some(chain_id), Some(block)) = (
        params.get("chain_id").and_then(|v| v.parse::<u64>().ok()),
        params.get("block").and_then(|v| v.parse::<u64>().ok()),
    ) else {
        return (
            400,
            r#"{"error":"chain_id and block are required"}"#.to_string(),
        );
    };

    match db::checkpoint_rewind(db, chain_id, block).await {
        Ok(true) => {
            tracing::warn!(chain_id, block, "Checkpoint rewound by operator");
            (200, r#"{"rewound":true}"#.to_string())
        }
        Ok(false) => (
            404,
            r#"{"error":"no checkpoint for that chain"}"#.to_string(),
        ),
        Err(e) => {
            tracing::error!(chain_id, block, error = %e, "Checkpoint rewind failed");
            (500, format!(r#"{{"error":"{}"}}"#, e))
        }
    }
}
