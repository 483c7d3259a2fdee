use async_trait::async_trait;
use mockall::automock;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::tx::UnsignedTransaction;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("Signer request failed: {0}")]
    Request(String),

    #[error("Signer refused to sign: {0}")]
    Refused(String),

    #[error("Invalid signer response: {0}")]
    InvalidResponse(String),
}

/// Signing capability for custodied addresses. Keys never enter this
/// process; failures surface to the submission worker as rejections.
#[automock]
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Signs a prepared transfer on behalf of `address`, returning the raw
    /// RLP-encoded transaction ready for broadcast.
    async fn sign(
        &self,
        address: &str,
        tx: &UnsignedTransaction,
    ) -> Result<Vec<u8>, SignerError>;
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    raw_transaction: String,
}

/// Signing sidecar reached over HTTP. POST /sign with the unsigned transfer
/// and the owning address; the response carries the signed raw transaction.
pub struct RemoteSigner {
    client: reqwest::Client,
    endpoint: Url,
}

impl RemoteSigner {
    pub fn new(endpoint: Url, request_timeout: Duration) -> Result<Self, SignerError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| SignerError::Request(e.to_string()))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl TransactionSigner for RemoteSigner {
    async fn sign(
        &self,
        address: &str,
        tx: &UnsignedTransaction,
    ) -> Result<Vec<u8>, SignerError> {
        let url = self
            .endpoint
            .join("sign")
            .map_err(|e| SignerError::Request(e.to_string()))?;

        let body = serde_json::json!({
            "address": address,
            "transaction": tx,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| SignerError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SignerError::Refused(format!("{status}: {detail}")));
        }

        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| SignerError::InvalidResponse(e.to_string()))?;

        let raw = signed
            .raw_transaction
            .strip_prefix("0x")
            .unwrap_or(&signed.raw_transaction);
        let raw_tx = hex::decode(raw).map_err(|e| SignerError::InvalidResponse(e.to_string()))?;

        debug!(address, "transaction signed");
        Ok(raw_tx)
    }
}
