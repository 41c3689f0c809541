//! Periodic locked-balance reconciliation.
//!
//! The vault's on-chain holdings for a token should equal the settled net
//! flow recorded in the ledger (locked minus released) plus any locks still
//! in flight through the pipeline. A positive difference is expected
//! in-flight volume; a negative difference means the vault holds less than
//! the ledger accounts for and is reported loudly.

use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use eyre::Result;
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::contracts::BridgeVault;
use crate::db;
use crate::types::EventKind;

/// Run reconciliation on startup and on the configured interval until
/// shutdown.
pub async fn run_reconcile_task(
    config: &Config,
    pool: PgPool,
    mut shutdown: mpsc::Receiver<()>,
) -> Result<()> {
    let vault_address = Address::from_str(&config.source.contract_address)
        .map_err(|e| eyre::eyre!("invalid vault address: {}", e))?;
    let interval_duration = Duration::from_secs(config.relayer.reconcile_interval_secs);

    info!(
        interval_secs = interval_duration.as_secs(),
        vault = %vault_address,
        "Reconciliation task starting"
    );

    reconcile_once(config, &pool, vault_address).await;

    let mut interval = tokio::time::interval(interval_duration);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately and would double the startup run.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("Reconciliation task shutdown");
                break;
            }
            _ = interval.tick() => {
                reconcile_once(config, &pool, vault_address).await;
            }
        }
    }

    Ok(())
}

async fn reconcile_once(config: &Config, pool: &PgPool, vault_address: Address) {
    match check_vault_balances(config, pool, vault_address).await {
        Ok(checked) => {
            info!(tokens = checked, "Reconciliation pass complete");
        }
        Err(e) => {
            warn!(error = %e, "Reconciliation pass failed");
        }
    }
}

/// Compare each token's on-chain vault total against the ledger's settled
/// net flow. Returns the number of tokens checked.
async fn check_vault_balances(
    config: &Config,
    pool: &PgPool,
    vault_address: Address,
) -> Result<usize> {
    let expected = expected_vault_balances(pool, config.source.chain_id).await?;
    if expected.is_empty() {
        return Ok(0);
    }

    let url = config
        .source
        .rpc_url
        .parse()
        .map_err(|e| eyre::eyre!("invalid RPC URL: {}", e))?;
    let provider = ProviderBuilder::new().on_http(url);
    let vault = BridgeVault::new(vault_address, &provider);

    for (token, expected_balance) in &expected {
        let token_address = Address::from_str(token)
            .map_err(|e| eyre::eyre!("bad token address in ledger {}: {}", token, e))?;

        let on_chain = vault.totalLocked(token_address).call().await?._0;

        if on_chain >= *expected_balance {
            let drift = on_chain - expected_balance;
            crate::metrics::set_locked_balance_drift(token, u256_to_f64(drift));
            if !drift.is_zero() {
                info!(
                    token = %token,
                    on_chain = %on_chain,
                    settled_net = %expected_balance,
                    in_flight = %drift,
                    "Vault balance ahead of settled net flow (in-flight volume)"
                );
            }
        } else {
            let deficit = expected_balance - on_chain;
            crate::metrics::set_locked_balance_drift(token, -u256_to_f64(deficit));
            error!(
                token = %token,
                on_chain = %on_chain,
                settled_net = %expected_balance,
                deficit = %deficit,
                "Vault under-collateralized against the ledger"
            );
        }
    }

    Ok(expected.len())
}

/// Settled net flow per token: locked minus released, floored at zero.
async fn expected_vault_balances(pool: &PgPool, chain_id: u64) -> Result<HashMap<String, U256>> {
    let sums = db::settled_amount_sums(pool, chain_id).await?;

    let mut locked: HashMap<String, U256> = HashMap::new();
    let mut released: HashMap<String, U256> = HashMap::new();

    for (token, kind, amount) in sums {
        let amount = U256::from_str(&amount)
            .map_err(|e| eyre::eyre!("bad amount sum for {}: {}", token, e))?;
        match kind {
            EventKind::Locked => {
                *locked.entry(token).or_default() += amount;
            }
            EventKind::Released => {
                *released.entry(token).or_default() += amount;
            }
            // Minted and Burned live on the destination chain
            _ => {}
        }
    }

    let mut expected = HashMap::new();
    for (token, locked_sum) in locked {
        let released_sum = released.get(&token).copied().unwrap_or(U256::ZERO);
        let net = locked_sum.saturating_sub(released_sum);
        expected.insert(token, net);
    }

    Ok(expected)
}

/// Lossy conversion for the drift gauge; exact values are in the logs.
fn u256_to_f64(value: U256) -> f64 {
    f64::from_str(&value.to_string()).unwrap_or(f64::MAX)
}
