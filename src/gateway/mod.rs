pub mod ethereum;

pub use ethereum::EthereumGateway;

use alloy_primitives::U256;
use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Result of broadcasting a signed transaction.
///
/// Deliberately a tri-state rather than a Result: a timeout or a dropped
/// connection does not tell us whether the network accepted the broadcast,
/// and collapsing that uncertainty either way would be wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The node acknowledged the broadcast and returned the hash.
    Accepted { tx_hash: String },
    /// No definitive acknowledgement. The hash is present if a partial
    /// response carried one.
    Ambiguous { tx_hash: Option<String> },
    /// The node rejected the transaction before broadcast.
    Rejected { reason: String },
}

/// Inclusion state of a previously broadcast transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxInclusion {
    /// The node does not know the transaction (still propagating, dropped,
    /// or replaced).
    NotFound,
    /// Mined. `confirmations` counts blocks on top of the including block;
    /// `success` is false for reverted transactions.
    Included { confirmations: u64, success: bool },
}

/// Read/write access to the ledger.
#[automock]
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// The chain's next acceptable nonce for the address, pending included.
    async fn next_nonce(&self, address: &str) -> Result<u64, GatewayError>;

    /// Current network gas price in wei.
    async fn gas_price(&self) -> Result<U256, GatewayError>;

    async fn native_balance(&self, address: &str) -> Result<U256, GatewayError>;

    async fn token_balance(&self, contract: &str, owner: &str) -> Result<U256, GatewayError>;

    /// Broadcasts a signed raw transaction. Never retried internally.
    async fn submit(&self, raw_tx: &[u8]) -> SubmitOutcome;

    async fn transaction_status(&self, tx_hash: &str) -> Result<TxInclusion, GatewayError>;
}
