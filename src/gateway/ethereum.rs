use alloy_json_rpc::RpcError;
use alloy_primitives::{hex, Address, U256};
use alloy_rpc_client::{ClientBuilder, RpcClient};
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{trace, warn};
use url::Url;

use super::{ChainGateway, GatewayError, SubmitOutcome, TxInclusion};

sol! {
    function balanceOf(address owner) external view returns (uint256);
}

/// JSON-RPC gateway to an Ethereum node. Every call carries a bounded
/// timeout; a timed-out submission is reported as ambiguous, never retried.
pub struct EthereumGateway {
    client: RpcClient,
    request_timeout: Duration,
}

impl EthereumGateway {
    pub fn new(rpc_url: Url, request_timeout: Duration) -> Self {
        let client = ClientBuilder::default().http(rpc_url);

        Self {
            client,
            request_timeout,
        }
    }

    fn parse_address(address: &str) -> Result<Address, GatewayError> {
        address
            .parse::<Address>()
            .map_err(|e| GatewayError::InvalidAddress(format!("{address}: {e}")))
    }

    fn map_rpc_error<E: std::fmt::Display>(e: RpcError<E>) -> GatewayError {
        match e {
            RpcError::ErrorResp(payload) => {
                GatewayError::Rpc(format!("RPC error {} - {}", payload.code, payload.message))
            }
            RpcError::Transport(e) => GatewayError::Transport(e.to_string()),
            other => GatewayError::Rpc(other.to_string()),
        }
    }

    fn parse_hex_quantity(value: &serde_json::Value, field: &str) -> Result<u64, GatewayError> {
        let raw = value[field]
            .as_str()
            .ok_or_else(|| GatewayError::InvalidResponse(format!("missing field {field}")))?;

        u64::from_str_radix(raw.trim_start_matches("0x"), 16)
            .map_err(|_| GatewayError::InvalidResponse(format!("invalid hex in {field}: {raw}")))
    }

    async fn block_number(&self) -> Result<u64, GatewayError> {
        let call = self.client.request_noparams::<U256>("eth_blockNumber");
        let block = timeout(self.request_timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(Self::map_rpc_error)?;

        Ok(block.to::<u64>())
    }
}

#[async_trait]
impl ChainGateway for EthereumGateway {
    async fn next_nonce(&self, address: &str) -> Result<u64, GatewayError> {
        let address = Self::parse_address(address)?;

        // "pending" so queued-but-unmined transactions count.
        let call = self
            .client
            .request::<_, U256>("eth_getTransactionCount", (address, "pending"));
        let nonce = timeout(self.request_timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(Self::map_rpc_error)?;

        Ok(nonce.to::<u64>())
    }

    async fn gas_price(&self) -> Result<U256, GatewayError> {
        let call = self.client.request_noparams::<U256>("eth_gasPrice");
        let price = timeout(self.request_timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(Self::map_rpc_error)?;

        Ok(price)
    }

    async fn native_balance(&self, address: &str) -> Result<U256, GatewayError> {
        let address = Self::parse_address(address)?;

        let call = self
            .client
            .request::<_, U256>("eth_getBalance", (address, "latest"));
        let balance = timeout(self.request_timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(Self::map_rpc_error)?;

        Ok(balance)
    }

    async fn token_balance(&self, contract: &str, owner: &str) -> Result<U256, GatewayError> {
        let contract = Self::parse_address(contract)?;
        let owner = Self::parse_address(owner)?;

        let data = balanceOfCall { owner }.abi_encode();
        let params = serde_json::json!({
            "to": contract,
            "data": format!("0x{}", hex::encode(&data)),
        });

        let call = self
            .client
            .request::<_, U256>("eth_call", (params, "latest"));
        let balance = timeout(self.request_timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(Self::map_rpc_error)?;

        Ok(balance)
    }

    async fn submit(&self, raw_tx: &[u8]) -> SubmitOutcome {
        let raw = format!("0x{}", hex::encode(raw_tx));

        let call = self
            .client
            .request::<_, String>("eth_sendRawTransaction", [raw]);

        match timeout(self.request_timeout, call).await {
            Err(_) => {
                warn!("broadcast timed out without acknowledgement");
                SubmitOutcome::Ambiguous { tx_hash: None }
            }
            Ok(Ok(tx_hash)) => {
                trace!(%tx_hash, "broadcast accepted");
                SubmitOutcome::Accepted { tx_hash }
            }
            Ok(Err(RpcError::ErrorResp(payload))) => SubmitOutcome::Rejected {
                reason: format!("RPC error {} - {}", payload.code, payload.message),
            },
            Ok(Err(e)) => {
                // Transport failures after the request left the process: the
                // node may or may not have seen the broadcast.
                warn!("broadcast outcome unknown: {e}");
                SubmitOutcome::Ambiguous { tx_hash: None }
            }
        }
    }

    async fn transaction_status(&self, tx_hash: &str) -> Result<TxInclusion, GatewayError> {
        let call = self
            .client
            .request::<_, Option<serde_json::Value>>("eth_getTransactionReceipt", [tx_hash]);
        let receipt = timeout(self.request_timeout, call)
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(Self::map_rpc_error)?;

        let Some(receipt) = receipt else {
            return Ok(TxInclusion::NotFound);
        };

        let included_block = Self::parse_hex_quantity(&receipt, "blockNumber")?;
        let status = Self::parse_hex_quantity(&receipt, "status")?;
        let current_block = self.block_number().await?;

        Ok(TxInclusion::Included {
            confirmations: current_block.saturating_sub(included_block),
            success: status == 1,
        })
    }
}
