use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::trace;

use super::models::{Address, NewWithdrawal, Token, Withdrawal, WithdrawalStatus};
use super::store::{Store, StoreError};

/// Postgres-backed store. All transitions are single conditional statements;
/// only nonce reservation needs an explicit transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_withdrawal(&self, new: NewWithdrawal) -> Result<Withdrawal, StoreError> {
        let withdrawal = sqlx::query_as::<_, Withdrawal>(
            r#"
            INSERT INTO withdrawals (address_id, to_address, token_id, amount, status)
            VALUES ($1, $2, $3, $4, 'PENDING')
            RETURNING *
            "#,
        )
        .bind(new.address_id)
        .bind(&new.to_address)
        .bind(new.token_id)
        .bind(new.amount)
        .fetch_one(&self.pool)
        .await?;

        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: i64) -> Result<Option<Withdrawal>, StoreError> {
        let withdrawal =
            sqlx::query_as::<_, Withdrawal>("SELECT * FROM withdrawals WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(withdrawal)
    }

    async fn withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
        limit: i64,
    ) -> Result<Vec<Withdrawal>, StoreError> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT * FROM withdrawals
            WHERE status = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }

    async fn count_withdrawals(&self) -> Result<i64, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM withdrawals")
            .fetch_one(&self.pool)
            .await?;

        Ok(total)
    }

    async fn list_withdrawals(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Withdrawal>, StoreError> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT * FROM withdrawals
            ORDER BY created_at DESC, id DESC
            OFFSET $1
            LIMIT $2
            "#,
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }

    async fn get_active_address(&self, id: i64) -> Result<Option<Address>, StoreError> {
        let address = sqlx::query_as::<_, Address>(
            "SELECT * FROM addresses WHERE id = $1 AND is_active = TRUE",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(address)
    }

    async fn find_active_address(&self, address: &str) -> Result<Option<Address>, StoreError> {
        let address = sqlx::query_as::<_, Address>(
            "SELECT * FROM addresses WHERE address = $1 AND is_active = TRUE",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(address)
    }

    async fn get_active_token(&self, id: i64) -> Result<Option<Token>, StoreError> {
        let token =
            sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE id = $1 AND is_active = TRUE")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(token)
    }

    async fn find_active_token_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<Token>, StoreError> {
        let token = sqlx::query_as::<_, Token>(
            "SELECT * FROM tokens WHERE symbol = $1 AND is_active = TRUE",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        Ok(token)
    }

    async fn claim_pending(&self, id: i64, lease_secs: i64) -> Result<bool, StoreError> {
        // The lease expires so rows claimed by a crashed worker are retried.
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET claimed_at = NOW(), updated_at = NOW()
            WHERE id = $1
              AND status = 'PENDING'
              AND (claimed_at IS NULL OR claimed_at < NOW() - $2 * INTERVAL '1 second')
            "#,
        )
        .bind(id)
        .bind(lease_secs)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_claim(&self, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE withdrawals SET claimed_at = NULL, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn mark_submitted(
        &self,
        id: i64,
        tx_hash: &str,
        nonce: i64,
        gas_cost: Decimal,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = 'SUBMITTED', tx_hash = $2, nonce = $3, gas_cost = $4,
                confirmations = 0, submitted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(tx_hash)
        .bind(nonce)
        .bind(gas_cost)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed_before_broadcast(
        &self,
        id: i64,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = 'FAILED', fail_reason = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed_in_flight(&self, id: i64, reason: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = 'FAILED', fail_reason = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'SUBMITTED'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_confirmed(&self, id: i64, confirmations: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET status = 'CONFIRMED', confirmations = GREATEST(confirmations, $2),
                updated_at = NOW()
            WHERE id = $1 AND status = 'SUBMITTED'
            "#,
        )
        .bind(id)
        .bind(confirmations)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_confirmations(
        &self,
        id: i64,
        confirmations: i64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawals
            SET confirmations = GREATEST(confirmations, $2), updated_at = NOW()
            WHERE id = $1 AND status = 'SUBMITTED'
            "#,
        )
        .bind(id)
        .bind(confirmations)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reserve_nonce(&self, address_id: i64, chain_next: i64) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO nonce_reservations (address_id, next_nonce)
            VALUES ($1, 0)
            ON CONFLICT (address_id) DO NOTHING
            "#,
        )
        .bind(address_id)
        .execute(&mut *tx)
        .await?;

        // Row lock scopes the mutual exclusion to this address only.
        let reserved: i64 = sqlx::query(
            "SELECT next_nonce FROM nonce_reservations WHERE address_id = $1 FOR UPDATE",
        )
        .bind(address_id)
        .fetch_one(&mut *tx)
        .await?
        .get("next_nonce");

        let high_water: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(MAX(nonce) + 1, 0) FROM withdrawals
            WHERE address_id = $1 AND status IN ('SUBMITTED', 'CONFIRMED')
            "#,
        )
        .bind(address_id)
        .fetch_one(&mut *tx)
        .await?;

        let nonce = reserved.max(high_water).max(chain_next);

        sqlx::query(
            r#"
            UPDATE nonce_reservations
            SET next_nonce = $2, updated_at = NOW()
            WHERE address_id = $1
            "#,
        )
        .bind(address_id)
        .bind(nonce + 1)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        trace!(address_id, nonce, "reserved nonce");
        Ok(nonce)
    }

    async fn release_nonce(&self, address_id: i64, nonce: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE nonce_reservations
            SET next_nonce = $2, updated_at = NOW()
            WHERE address_id = $1 AND next_nonce = $2 + 1
            "#,
        )
        .bind(address_id)
        .bind(nonce)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
