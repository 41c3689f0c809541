//! EVM destination mutator: signs and submits mint/release transactions
//! through the bridge contracts, and looks up earlier submissions by
//! receipt when recovering in-flight dispatches.

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::ProviderBuilder;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use serde::Deserialize;
use std::str::FromStr;
use tracing::info;

use crate::config::ChainConfig;
use crate::contracts::{BridgeVault, WrappedToken};
use crate::error::{RelayerError, Result};

use super::{Action, DestinationMutator};

#[derive(Debug, Deserialize)]
struct TransactionReceipt {
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
    status: Option<String>,
}

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

/// Submits actions to one EVM chain with one signing key. All submissions
/// for a direction flow through a single instance, so the authority
/// account's nonce space is never contended.
pub struct EvmDispatcher {
    direction: String,
    rpc_url: String,
    contract_address: Address,
    chain_id: u64,
    signer: PrivateKeySigner,
    client: reqwest::Client,
}

impl EvmDispatcher {
    pub fn new(direction: impl Into<String>, target: &ChainConfig) -> Result<Self> {
        let contract_address = Address::from_str(&target.contract_address).map_err(|e| {
            eyre::eyre!("invalid contract address {}: {}", target.contract_address, e)
        })?;

        let signer: PrivateKeySigner = target
            .authority
            .private_key
            .parse()
            .map_err(|e| eyre::eyre!("invalid authority key: {}", e))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| eyre::eyre!("failed to build HTTP client: {}", e))?;

        let direction = direction.into();
        info!(
            direction = %direction,
            authority = %signer.address(),
            chain_id = target.chain_id,
            contract = %contract_address,
            "EVM dispatcher initialized"
        );

        Ok(Self {
            direction,
            rpc_url: target.rpc_url.clone(),
            contract_address,
            chain_id: target.chain_id,
            signer,
            client,
        })
    }

    pub fn authority_address(&self) -> Address {
        self.signer.address()
    }

    fn unavailable(&self, e: impl std::fmt::Display) -> RelayerError {
        RelayerError::ChainUnavailable {
            chain_id: self.chain_id,
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl DestinationMutator for EvmDispatcher {
    fn direction(&self) -> &str {
        &self.direction
    }

    async fn submit(&self, action: &Action) -> Result<String> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let url = self
            .rpc_url
            .parse()
            .map_err(|e| eyre::eyre!("invalid RPC URL: {}", e))?;
        let provider = ProviderBuilder::new().wallet(wallet).on_http(url);

        let pending_tx = match action {
            Action::Mint {
                token,
                account,
                amount,
            } => {
                let contract = WrappedToken::new(self.contract_address, &provider);
                contract
                    .mint(*token, *account, *amount)
                    .send()
                    .await
                    .map_err(|e| self.unavailable(format!("failed to send mint: {}", e)))?
            }
            Action::Release {
                token,
                account,
                amount,
            } => {
                let contract = BridgeVault::new(self.contract_address, &provider);
                contract
                    .release(*token, *account, *amount)
                    .send()
                    .await
                    .map_err(|e| self.unavailable(format!("failed to send release: {}", e)))?
            }
        };

        let tx_hash = *pending_tx.tx_hash();

        let receipt = pending_tx
            .get_receipt()
            .await
            .map_err(|e| self.unavailable(format!("failed to get receipt: {}", e)))?;

        if !receipt.status() {
            return Err(RelayerError::Other(eyre::eyre!(
                "transaction reverted: {:?}",
                tx_hash
            )));
        }

        Ok(format!("{:?}", tx_hash))
    }

    async fn check_settled(&self, tx_hash: &str) -> Result<Option<bool>> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "eth_getTransactionReceipt",
            "params": [tx_hash],
            "id": 1
        });

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.unavailable(e))?
            .json::<RpcResponse<TransactionReceipt>>()
            .await
            .map_err(|e| self.unavailable(e))?;

        if let Some(error) = response.error {
            return Err(RelayerError::ChainUnavailable {
                chain_id: self.chain_id,
                reason: format!("RPC error {}: {}", error.code, error.message),
            });
        }

        Ok(response.result.map(|receipt| {
            receipt.block_number.is_some() && receipt.status.as_deref() != Some("0x0")
        }))
    }
}
