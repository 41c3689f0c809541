//! Chain Reader: range-scans raw log records from a chain's bridge contract.
//!
//! Pure reads, restartable from any `from` block. Transport failures map to
//! `ChainUnavailable` (retryable); `from > to` is `InvalidRange`.

use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{Filter, Log};
use alloy::transports::http::{Client, Http};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::config::ChainConfig;
use crate::error::{RelayerError, Result};

/// Raw JSON-RPC response wrapper for block queries
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i32,
    message: String,
}

/// Minimal block shape: we only need the hash at a given height
#[derive(Debug, Deserialize)]
struct BlockHeader {
    hash: String,
}

/// Reads raw logs and block metadata from one chain.
pub struct ChainReader {
    provider: RootProvider<Http<Client>>,
    client: reqwest::Client,
    rpc_url: String,
    contract_address: Address,
    chain_id: u64,
}

impl ChainReader {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let url = config
            .rpc_url
            .parse()
            .map_err(|e| RelayerError::ChainUnavailable {
                chain_id: config.chain_id,
                reason: format!("invalid RPC URL: {}", e),
            })?;
        let provider = ProviderBuilder::new().on_http(url);

        let contract_address = Address::from_str(&config.contract_address).map_err(|e| {
            RelayerError::ChainUnavailable {
                chain_id: config.chain_id,
                reason: format!("invalid contract address: {}", e),
            }
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RelayerError::ChainUnavailable {
                chain_id: config.chain_id,
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            provider,
            client,
            rpc_url: config.rpc_url.clone(),
            contract_address,
            chain_id: config.chain_id,
        })
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn contract_address(&self) -> Address {
        self.contract_address
    }

    /// Current chain head height.
    pub async fn head(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| self.unavailable(e))
    }

    /// Raw log records from the bridge contract over `[from, to]`, ascending
    /// by (block number, log index). `to = None` means the current head.
    pub async fn logs(&self, from: u64, to: Option<u64>) -> Result<Vec<Log>> {
        let to = match to {
            Some(to) => to,
            None => self.head().await?,
        };

        if from > to {
            return Err(RelayerError::InvalidRange { from, to });
        }

        let filter = Filter::new()
            .address(self.contract_address)
            .from_block(from)
            .to_block(to);

        let mut logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| self.unavailable(e))?;

        // Nodes return logs ordered, but the ascending guarantee is part of
        // this reader's contract, so enforce it.
        logs.sort_by_key(|log| (log.block_number.unwrap_or(0), log.log_index.unwrap_or(0)));

        Ok(logs)
    }

    /// Block hash at the given height, or None past the current head.
    /// Used by the confirmation tracker to detect reorgs.
    pub async fn block_hash_at(&self, height: u64) -> Result<Option<String>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_getBlockByNumber",
            "params": [format!("0x{:x}", height), false],
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?
            .json::<RpcResponse<BlockHeader>>()
            .await
            .map_err(|e| self.unavailable(e))?;

        if let Some(error) = response.error {
            return Err(RelayerError::ChainUnavailable {
                chain_id: self.chain_id,
                reason: format!("RPC error {}: {}", error.code, error.message),
            });
        }

        Ok(response.result.map(|b| b.hash))
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> RelayerError {
        RelayerError::ChainUnavailable {
            chain_id: self.chain_id,
            reason: e.to_string(),
        }
    }
}

/// The block window that is safe to scan this cycle: everything from the
/// checkpoint successor up to `head - confirmation_depth`. Blocks above the
/// safe head may still reorg away and are left for later cycles.
pub fn scan_window(checkpoint: u64, head: u64, confirmation_depth: u64) -> Option<(u64, u64)> {
    let safe_head = head.saturating_sub(confirmation_depth);
    let from = checkpoint + 1;
    if from > safe_head {
        return None;
    }
    Some((from, safe_head))
}
