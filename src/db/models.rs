use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of a withdrawal row.
///
/// PENDING and FAILED rows never carry a tx_hash; SUBMITTED and CONFIRMED
/// rows always do. The storage layer enforces this with a CHECK constraint,
/// the workers enforce it through the conditional updates in [`crate::db::Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "withdrawal_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum WithdrawalStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalStatus::Confirmed | WithdrawalStatus::Failed)
    }

    /// Legal transitions. Terminal states never move; self-transitions are
    /// not transitions (confirmation updates keep the row SUBMITTED).
    pub fn can_transition_to(&self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted) | (Pending, Failed) | (Submitted, Confirmed) | (Submitted, Failed)
        )
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Submitted => "SUBMITTED",
            WithdrawalStatus::Confirmed => "CONFIRMED",
            WithdrawalStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Withdrawal {
    pub id: i64,
    pub address_id: i64,
    pub to_address: String,
    pub token_id: i64,
    pub amount: Decimal,
    pub status: WithdrawalStatus,
    pub tx_hash: Option<String>,
    pub nonce: Option<i64>,
    pub confirmations: i64,
    /// Offered max fee in native units, recorded at submission time.
    pub gas_cost: Decimal,
    pub fail_reason: Option<String>,
    /// Processing lease taken by a submission worker instance.
    pub claimed_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Intake payload for a new PENDING row.
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub address_id: i64,
    pub to_address: String,
    pub token_id: i64,
    pub amount: Decimal,
}

/// A custodied address. The private key never leaves the signing service;
/// this record only carries the public address and its active flag.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Address {
    pub id: i64,
    pub address: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "token_kind", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenKind {
    /// The chain's native asset, moved by a plain value transfer.
    Native,
    /// An ERC-20 asset, moved by a transfer() contract call.
    Erc20,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Token {
    pub id: i64,
    pub name: String,
    pub symbol: String,
    /// Contract address for ERC-20 tokens, sentinel zero address for native.
    pub address: String,
    pub decimals: i32,
    pub kind: TokenKind,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_move() {
        for next in [
            WithdrawalStatus::Pending,
            WithdrawalStatus::Submitted,
            WithdrawalStatus::Confirmed,
            WithdrawalStatus::Failed,
        ] {
            assert!(!WithdrawalStatus::Confirmed.can_transition_to(next));
            assert!(!WithdrawalStatus::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn pending_moves_to_submitted_or_failed() {
        assert!(WithdrawalStatus::Pending.can_transition_to(WithdrawalStatus::Submitted));
        assert!(WithdrawalStatus::Pending.can_transition_to(WithdrawalStatus::Failed));
        assert!(!WithdrawalStatus::Pending.can_transition_to(WithdrawalStatus::Confirmed));
        assert!(!WithdrawalStatus::Pending.can_transition_to(WithdrawalStatus::Pending));
    }

    #[test]
    fn submitted_moves_to_confirmed_or_failed() {
        assert!(WithdrawalStatus::Submitted.can_transition_to(WithdrawalStatus::Confirmed));
        assert!(WithdrawalStatus::Submitted.can_transition_to(WithdrawalStatus::Failed));
        assert!(!WithdrawalStatus::Submitted.can_transition_to(WithdrawalStatus::Pending));
    }
}
