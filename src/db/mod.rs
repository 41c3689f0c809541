//! Postgres persistence: the idempotency ledger and the checkpoint store.
//!
//! The database is the only state shared between pipeline stages (and
//! between relayer instances), so every mutation here is a single atomic
//! statement. Status advances are compare-and-swap updates; duplicate
//! event inserts resolve through the unique identity constraint.

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::error;

pub mod models;

pub use models::*;

use crate::error::{RelayerError, Result};
use crate::types::{EventIdentity, RecordStatus};

const RECORD_COLUMNS: &str = r#"id, source_chain_id, source_tx_hash, log_index, event_kind,
    token, account, amount::TEXT as amount, block_number, block_hash, status,
    dest_tx_hash, attempts, last_attempt_at, failure_reason, created_at, updated_at"#;

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| eyre::eyre!("failed to run database migrations: {}", e))?;
    Ok(())
}

/// Atomically record an event if its identity has not been seen before.
///
/// Returns `(true, row)` when a new row was created, `(false, existing)`
/// when the identity was already in the ledger. Safe under concurrent
/// callers: the unique constraint on (source_chain_id, source_tx_hash,
/// log_index) arbitrates, and rows are never deleted, so the conflict
/// branch always finds the winner's row.
pub async fn record_if_new(
    pool: &PgPool,
    record: &NewProcessingRecord,
) -> Result<(bool, ProcessingRecord)> {
    let inserted = sqlx::query_as::<_, ProcessingRecord>(&format!(
        r#"
        INSERT INTO processing_records (source_chain_id, source_tx_hash, log_index,
            event_kind, token, account, amount, block_number, block_hash, status)
        VALUES ($1, $2, $3, $4, $5, $6, $7::NUMERIC, $8, $9, 'pending')
        ON CONFLICT ON CONSTRAINT uq_event_identity DO NOTHING
        RETURNING {RECORD_COLUMNS}
        "#,
    ))
    .bind(record.source_chain_id)
    .bind(&record.source_tx_hash)
    .bind(record.log_index)
    .bind(record.event_kind)
    .bind(&record.token)
    .bind(&record.account)
    .bind(&record.amount)
    .bind(record.block_number)
    .bind(&record.block_hash)
    .fetch_optional(pool)
    .await?;

    if let Some(row) = inserted {
        return Ok((true, row));
    }

    let identity = EventIdentity::new(
        record.source_chain_id as u64,
        record.source_tx_hash.clone(),
        record.log_index as u64,
    );
    let existing = get_record(pool, &identity)
        .await?
        .ok_or_else(|| RelayerError::Other(eyre::eyre!("ledger row vanished for {}", identity)))?;

    Ok((false, existing))
}

/// Fetch a record by event identity
pub async fn get_record(pool: &PgPool, identity: &EventIdentity) -> Result<Option<ProcessingRecord>> {
    let row = sqlx::query_as::<_, ProcessingRecord>(&format!(
        r#"SELECT {RECORD_COLUMNS} FROM processing_records
           WHERE source_chain_id = $1 AND source_tx_hash = $2 AND log_index = $3"#,
    ))
    .bind(identity.source_chain_id as i64)
    .bind(&identity.source_tx_hash)
    .bind(identity.log_index as i64)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Records on one chain in a given status, oldest block first so dispatch
/// order follows observation order.
pub async fn get_records_by_status(
    pool: &PgPool,
    source_chain_id: u64,
    status: RecordStatus,
) -> Result<Vec<ProcessingRecord>> {
    let rows = sqlx::query_as::<_, ProcessingRecord>(&format!(
        r#"SELECT {RECORD_COLUMNS} FROM processing_records
           WHERE source_chain_id = $1 AND status = $2
           ORDER BY block_number ASC, log_index ASC"#,
    ))
    .bind(source_chain_id as i64)
    .bind(status)
    .fetch_all(pool)
    .await
    .map_err(|e| {
        error!(status = %status, "SQL error fetching records by status: {:?}", e);
        e
    })?;

    Ok(rows)
}

/// Most recent records in a status across both chains, for the API.
pub async fn get_recent_records(
    pool: &PgPool,
    status: RecordStatus,
    limit: i64,
) -> Result<Vec<ProcessingRecord>> {
    let rows = sqlx::query_as::<_, ProcessingRecord>(&format!(
        r#"SELECT {RECORD_COLUMNS} FROM processing_records
           WHERE status = $1
           ORDER BY updated_at DESC
           LIMIT $2"#,
    ))
    .bind(status)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// All chain checkpoints.
pub async fn checkpoint_all(pool: &PgPool) -> Result<Vec<Checkpoint>> {
    let rows = sqlx::query_as::<_, Checkpoint>(
        r#"SELECT chain_id, last_safe_block, updated_at FROM checkpoints ORDER BY chain_id"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Count of records per status, for the status endpoint and metrics.
pub async fn count_records_by_status(pool: &PgPool) -> Result<Vec<(String, i64)>> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        r#"SELECT status, COUNT(*) FROM processing_records GROUP BY status"#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Advance a record's status with a compare-and-swap on the expected current
/// status. Rejects transitions outside the monotonic table, and detects
/// concurrent movers: if the row is no longer in `from`, the actual status
/// is read back and reported as an `IllegalTransition`.
pub async fn advance_status(
    pool: &PgPool,
    record_id: i64,
    identity: &EventIdentity,
    from: RecordStatus,
    to: RecordStatus,
) -> Result<()> {
    if !from.can_advance_to(to) {
        return Err(RelayerError::IllegalTransition {
            identity: identity.to_string(),
            from,
            to,
        });
    }

    let result = sqlx::query(
        r#"UPDATE processing_records SET status = $1, updated_at = NOW()
           WHERE id = $2 AND status = $3"#,
    )
    .bind(to)
    .bind(record_id)
    .bind(from)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let actual = sqlx::query_as::<_, (RecordStatus,)>(
            r#"SELECT status FROM processing_records WHERE id = $1"#,
        )
        .bind(record_id)
        .fetch_one(pool)
        .await?;

        return Err(RelayerError::IllegalTransition {
            identity: identity.to_string(),
            from: actual.0,
            to,
        });
    }

    Ok(())
}

/// Move a record to Failed with a recorded reason (same CAS discipline as
/// `advance_status`).
pub async fn mark_failed(
    pool: &PgPool,
    record_id: i64,
    identity: &EventIdentity,
    from: RecordStatus,
    reason: &str,
) -> Result<()> {
    if !from.can_advance_to(RecordStatus::Failed) {
        return Err(RelayerError::IllegalTransition {
            identity: identity.to_string(),
            from,
            to: RecordStatus::Failed,
        });
    }

    let result = sqlx::query(
        r#"UPDATE processing_records
           SET status = 'failed', failure_reason = $1, updated_at = NOW()
           WHERE id = $2 AND status = $3"#,
    )
    .bind(reason)
    .bind(record_id)
    .bind(from)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let actual = sqlx::query_as::<_, (RecordStatus,)>(
            r#"SELECT status FROM processing_records WHERE id = $1"#,
        )
        .bind(record_id)
        .fetch_one(pool)
        .await?;

        return Err(RelayerError::IllegalTransition {
            identity: identity.to_string(),
            from: actual.0,
            to: RecordStatus::Failed,
        });
    }

    Ok(())
}

/// Operator re-queue: put a Failed record back into Dispatched so the
/// dispatcher re-drives it with a fresh attempt budget. Returns false if
/// the record was not in Failed.
pub async fn requeue_failed(pool: &PgPool, identity: &EventIdentity) -> Result<bool> {
    let result = sqlx::query(
        r#"UPDATE processing_records
           SET status = 'dispatched', attempts = 0, failure_reason = NULL, updated_at = NOW()
           WHERE source_chain_id = $1 AND source_tx_hash = $2 AND log_index = $3
             AND status = 'failed'"#,
    )
    .bind(identity.source_chain_id as i64)
    .bind(&identity.source_tx_hash)
    .bind(identity.log_index as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Bump the attempt counter before a dispatch submission.
pub async fn record_dispatch_attempt(pool: &PgPool, record_id: i64) -> Result<()> {
    sqlx::query(
        r#"UPDATE processing_records
           SET attempts = attempts + 1, last_attempt_at = NOW(), updated_at = NOW()
           WHERE id = $1"#,
    )
    .bind(record_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist the destination transaction hash once a submission is accepted.
pub async fn set_dest_tx_hash(pool: &PgPool, record_id: i64, dest_tx_hash: &str) -> Result<()> {
    sqlx::query(
        r#"UPDATE processing_records SET dest_tx_hash = $1, updated_at = NOW() WHERE id = $2"#,
    )
    .bind(dest_tx_hash)
    .bind(record_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Sum of settled amounts per (token, kind) on one chain. Feeds the
/// reconciliation task's expected-balance calculation.
pub async fn settled_amount_sums(
    pool: &PgPool,
    source_chain_id: u64,
) -> Result<Vec<(String, crate::types::EventKind, String)>> {
    let rows = sqlx::query_as::<_, (String, crate::types::EventKind, String)>(
        r#"SELECT token, event_kind, COALESCE(SUM(amount), 0)::TEXT
           FROM processing_records
           WHERE source_chain_id = $1 AND status = 'settled'
           GROUP BY token, event_kind"#,
    )
    .bind(source_chain_id as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Last safe block recorded for a chain, if any.
pub async fn checkpoint_get(pool: &PgPool, chain_id: u64) -> Result<Option<u64>> {
    let row = sqlx::query_as::<_, (i64,)>(
        r#"SELECT last_safe_block FROM checkpoints WHERE chain_id = $1"#,
    )
    .bind(chain_id as i64)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.0 as u64))
}

/// Advance a chain's checkpoint. Monotonic: the guard in the upsert refuses
/// to move backwards, and a refused write surfaces as `CheckpointRegression`.
pub async fn checkpoint_set(pool: &PgPool, chain_id: u64, last_safe_block: u64) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO checkpoints (chain_id, last_safe_block, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (chain_id) DO UPDATE
        SET last_safe_block = EXCLUDED.last_safe_block, updated_at = NOW()
        WHERE checkpoints.last_safe_block <= EXCLUDED.last_safe_block
        "#,
    )
    .bind(chain_id as i64)
    .bind(last_safe_block as i64)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        let current = checkpoint_get(pool, chain_id).await?.unwrap_or(0);
        return Err(RelayerError::CheckpointRegression {
            chain_id,
            current: current as i64,
            requested: last_safe_block as i64,
        });
    }

    Ok(())
}

/// Operator rewind of a chain's checkpoint, the one path allowed to move it
/// backwards. A record failed as reorged can only be seen again by
/// re-scanning from below its block; the identity constraint absorbs every
/// already-known event the rescan re-surfaces.
pub async fn checkpoint_rewind(pool: &PgPool, chain_id: u64, last_safe_block: u64) -> Result<bool> {
    let result = sqlx::query(
        r#"UPDATE checkpoints SET last_safe_block = $1, updated_at = NOW()
           WHERE chain_id = $2"#,
    )
    .bind(last_safe_block as i64)
    .bind(chain_id as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}
