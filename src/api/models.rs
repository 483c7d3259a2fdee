use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::{Withdrawal, WithdrawalStatus};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWithdrawalRequest {
    pub from_address: String,
    pub to_address: String,
    pub symbol: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    50
}

/// Read-only projection of a withdrawal row.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalView {
    pub id: i64,
    pub status: WithdrawalStatus,
    pub to_address: String,
    pub amount: Decimal,
    pub tx_hash: Option<String>,
    pub confirmations: i64,
    pub gas_cost: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalView {
    fn from(w: Withdrawal) -> Self {
        Self {
            id: w.id,
            status: w.status,
            to_address: w.to_address,
            amount: w.amount,
            tx_hash: w.tx_hash,
            confirmations: w.confirmations,
            gas_cost: w.gas_cost,
            created_at: w.created_at,
            updated_at: w.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateWithdrawalResponse {
    pub withdrawal: WithdrawalView,
}

#[derive(Debug, Serialize)]
pub struct ListWithdrawalsResponse {
    pub withdrawals: Vec<WithdrawalView>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}
