use async_trait::async_trait;
use mockall::automock;
use rust_decimal::Decimal;
use thiserror::Error;

use super::models::{Address, NewWithdrawal, Token, Withdrawal, WithdrawalStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(i64),
}

/// Persistence boundary of the withdrawal engine.
///
/// Withdrawal rows are the single source of truth shared by the API and the
/// background workers. Every state transition is a conditional update keyed
/// on the current status, so concurrent worker instances can never record
/// the same transition twice.
#[automock]
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_withdrawal(&self, new: NewWithdrawal) -> Result<Withdrawal, StoreError>;

    async fn get_withdrawal(&self, id: i64) -> Result<Option<Withdrawal>, StoreError>;

    /// Rows in the given status, oldest first.
    async fn withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
        limit: i64,
    ) -> Result<Vec<Withdrawal>, StoreError>;

    async fn count_withdrawals(&self) -> Result<i64, StoreError>;

    /// Listing projection, newest first.
    async fn list_withdrawals(&self, offset: i64, limit: i64)
        -> Result<Vec<Withdrawal>, StoreError>;

    async fn get_active_address(&self, id: i64) -> Result<Option<Address>, StoreError>;

    async fn find_active_address(&self, address: &str) -> Result<Option<Address>, StoreError>;

    async fn get_active_token(&self, id: i64) -> Result<Option<Token>, StoreError>;

    async fn find_active_token_by_symbol(&self, symbol: &str)
        -> Result<Option<Token>, StoreError>;

    /// Takes a processing lease on a PENDING row. Returns false when another
    /// worker instance holds an unexpired lease (younger than `lease_secs`)
    /// or the row already left PENDING.
    async fn claim_pending(&self, id: i64, lease_secs: i64) -> Result<bool, StoreError>;

    /// Releases a processing lease so a deferred row is retried next cycle.
    async fn release_claim(&self, id: i64) -> Result<(), StoreError>;

    /// PENDING -> SUBMITTED. Records the broadcast hash, the nonce used and
    /// the offered max fee. Returns false if the row was not PENDING.
    async fn mark_submitted(
        &self,
        id: i64,
        tx_hash: &str,
        nonce: i64,
        gas_cost: Decimal,
    ) -> Result<bool, StoreError>;

    /// PENDING -> FAILED. tx_hash stays null: nothing reached the chain.
    async fn mark_failed_before_broadcast(&self, id: i64, reason: &str)
        -> Result<bool, StoreError>;

    /// SUBMITTED -> FAILED. tx_hash is retained for audit.
    async fn mark_failed_in_flight(&self, id: i64, reason: &str) -> Result<bool, StoreError>;

    /// SUBMITTED -> CONFIRMED, freezing the confirmation count.
    async fn mark_confirmed(&self, id: i64, confirmations: i64) -> Result<bool, StoreError>;

    /// Monotonically advances the confirmation count of a SUBMITTED row.
    /// No-op on terminal rows.
    async fn record_confirmations(&self, id: i64, confirmations: i64) -> Result<bool, StoreError>;

    /// Atomically reserves the next nonce for an address. The reservation
    /// counter is seeded from max(stored high-water mark, chain next-nonce)
    /// so restarts and external transactions cannot cause reuse.
    async fn reserve_nonce(&self, address_id: i64, chain_next: i64) -> Result<i64, StoreError>;

    /// Hands a reserved nonce back after a pre-broadcast rejection. Only
    /// succeeds while the reservation still sits exactly one above it;
    /// otherwise the nonce stays burned.
    async fn release_nonce(&self, address_id: i64, nonce: i64) -> Result<bool, StoreError>;
}
