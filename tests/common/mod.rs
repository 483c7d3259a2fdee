use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

use hotwallet::db::{
    Address, NewWithdrawal, Store, StoreError, Token, TokenKind, Withdrawal, WithdrawalStatus,
};

/// In-memory stand-in for the Postgres store, faithful to its conditional
/// update semantics (status-guarded transitions, claim lease, monotonic
/// confirmations, per-address nonce reservation). Panics on a duplicate
/// non-null tx_hash, standing in for the partial unique index.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<State>,
}

#[derive(Default)]
struct State {
    withdrawals: Vec<Withdrawal>,
    addresses: Vec<Address>,
    tokens: Vec<Token>,
    reservations: HashMap<i64, i64>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_address(&self, address: &str, is_active: bool) -> i64 {
        let mut state = self.inner.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.addresses.push(Address {
            id,
            address: address.to_lowercase(),
            is_active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        id
    }

    pub fn add_token(
        &self,
        symbol: &str,
        address: &str,
        decimals: i32,
        kind: TokenKind,
        is_active: bool,
    ) -> i64 {
        let mut state = self.inner.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        state.tokens.push(Token {
            id,
            name: symbol.to_string(),
            symbol: symbol.to_string(),
            address: address.to_lowercase(),
            decimals,
            kind,
            is_active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        id
    }

    pub fn withdrawal(&self, id: i64) -> Withdrawal {
        let state = self.inner.lock().unwrap();
        state
            .withdrawals
            .iter()
            .find(|w| w.id == id)
            .cloned()
            .expect("withdrawal exists")
    }

    /// Backdates a submission so grace-period expiry can be exercised.
    pub fn backdate_submission(&self, id: i64, seconds: i64) {
        let mut state = self.inner.lock().unwrap();
        let w = state
            .withdrawals
            .iter_mut()
            .find(|w| w.id == id)
            .expect("withdrawal exists");
        w.submitted_at = Some(Utc::now() - Duration::seconds(seconds));
    }

    pub fn reserved_next_nonce(&self, address_id: i64) -> Option<i64> {
        let state = self.inner.lock().unwrap();
        state.reservations.get(&address_id).copied()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_withdrawal(&self, new: NewWithdrawal) -> Result<Withdrawal, StoreError> {
        let mut state = self.inner.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let now = Utc::now();
        let withdrawal = Withdrawal {
            id,
            address_id: new.address_id,
            to_address: new.to_address,
            token_id: new.token_id,
            amount: new.amount,
            status: WithdrawalStatus::Pending,
            tx_hash: None,
            nonce: None,
            confirmations: 0,
            gas_cost: Decimal::ZERO,
            fail_reason: None,
            claimed_at: None,
            submitted_at: None,
            created_at: now,
            updated_at: now,
        };
        state.withdrawals.push(withdrawal.clone());
        Ok(withdrawal)
    }

    async fn get_withdrawal(&self, id: i64) -> Result<Option<Withdrawal>, StoreError> {
        let state = self.inner.lock().unwrap();
        Ok(state.withdrawals.iter().find(|w| w.id == id).cloned())
    }

    async fn withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
        limit: i64,
    ) -> Result<Vec<Withdrawal>, StoreError> {
        let state = self.inner.lock().unwrap();
        let mut rows: Vec<Withdrawal> = state
            .withdrawals
            .iter()
            .filter(|w| w.status == status)
            .cloned()
            .collect();
        rows.sort_by_key(|w| (w.created_at, w.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn count_withdrawals(&self) -> Result<i64, StoreError> {
        let state = self.inner.lock().unwrap();
        Ok(state.withdrawals.len() as i64)
    }

    async fn list_withdrawals(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Withdrawal>, StoreError> {
        let state = self.inner.lock().unwrap();
        let mut rows: Vec<Withdrawal> = state.withdrawals.clone();
        rows.sort_by_key(|w| std::cmp::Reverse((w.created_at, w.id)));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn get_active_address(&self, id: i64) -> Result<Option<Address>, StoreError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .addresses
            .iter()
            .find(|a| a.id == id && a.is_active)
            .cloned())
    }

    async fn find_active_address(&self, address: &str) -> Result<Option<Address>, StoreError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .addresses
            .iter()
            .find(|a| a.address == address && a.is_active)
            .cloned())
    }

    async fn get_active_token(&self, id: i64) -> Result<Option<Token>, StoreError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .tokens
            .iter()
            .find(|t| t.id == id && t.is_active)
            .cloned())
    }

    async fn find_active_token_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<Option<Token>, StoreError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .tokens
            .iter()
            .find(|t| t.symbol == symbol && t.is_active)
            .cloned())
    }

    async fn claim_pending(&self, id: i64, lease_secs: i64) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let now = Utc::now();
        let Some(w) = state.withdrawals.iter_mut().find(|w| w.id == id) else {
            return Ok(false);
        };
        let lease_free = w
            .claimed_at
            .map(|t| t < now - Duration::seconds(lease_secs))
            .unwrap_or(true);
        if w.status == WithdrawalStatus::Pending && lease_free {
            w.claimed_at = Some(now);
            w.updated_at = now;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn release_claim(&self, id: i64) -> Result<(), StoreError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(w) = state.withdrawals.iter_mut().find(|w| w.id == id) {
            w.claimed_at = None;
            w.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_submitted(
        &self,
        id: i64,
        tx_hash: &str,
        nonce: i64,
        gas_cost: Decimal,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().unwrap();
        assert!(
            !state
                .withdrawals
                .iter()
                .any(|w| w.tx_hash.as_deref() == Some(tx_hash)),
            "unique constraint violation on tx_hash: {tx_hash}"
        );
        let Some(w) = state.withdrawals.iter_mut().find(|w| w.id == id) else {
            return Ok(false);
        };
        if w.status != WithdrawalStatus::Pending {
            return Ok(false);
        }
        w.status = WithdrawalStatus::Submitted;
        w.tx_hash = Some(tx_hash.to_string());
        w.nonce = Some(nonce);
        w.gas_cost = gas_cost;
        w.confirmations = 0;
        w.submitted_at = Some(Utc::now());
        w.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_failed_before_broadcast(
        &self,
        id: i64,
        reason: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let Some(w) = state.withdrawals.iter_mut().find(|w| w.id == id) else {
            return Ok(false);
        };
        if w.status != WithdrawalStatus::Pending {
            return Ok(false);
        }
        w.status = WithdrawalStatus::Failed;
        w.fail_reason = Some(reason.to_string());
        w.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_failed_in_flight(&self, id: i64, reason: &str) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let Some(w) = state.withdrawals.iter_mut().find(|w| w.id == id) else {
            return Ok(false);
        };
        if w.status != WithdrawalStatus::Submitted {
            return Ok(false);
        }
        w.status = WithdrawalStatus::Failed;
        w.fail_reason = Some(reason.to_string());
        w.updated_at = Utc::now();
        Ok(true)
    }

    async fn mark_confirmed(&self, id: i64, confirmations: i64) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let Some(w) = state.withdrawals.iter_mut().find(|w| w.id == id) else {
            return Ok(false);
        };
        if w.status != WithdrawalStatus::Submitted {
            return Ok(false);
        }
        w.status = WithdrawalStatus::Confirmed;
        w.confirmations = w.confirmations.max(confirmations);
        w.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_confirmations(
        &self,
        id: i64,
        confirmations: i64,
    ) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let Some(w) = state.withdrawals.iter_mut().find(|w| w.id == id) else {
            return Ok(false);
        };
        if w.status != WithdrawalStatus::Submitted {
            return Ok(false);
        }
        w.confirmations = w.confirmations.max(confirmations);
        w.updated_at = Utc::now();
        Ok(true)
    }

    async fn reserve_nonce(&self, address_id: i64, chain_next: i64) -> Result<i64, StoreError> {
        let mut state = self.inner.lock().unwrap();
        let reserved = state.reservations.get(&address_id).copied().unwrap_or(0);
        let high_water = state
            .withdrawals
            .iter()
            .filter(|w| {
                w.address_id == address_id
                    && matches!(
                        w.status,
                        WithdrawalStatus::Submitted | WithdrawalStatus::Confirmed
                    )
            })
            .filter_map(|w| w.nonce)
            .max()
            .map(|n| n + 1)
            .unwrap_or(0);
        let nonce = reserved.max(high_water).max(chain_next);
        state.reservations.insert(address_id, nonce + 1);
        Ok(nonce)
    }

    async fn release_nonce(&self, address_id: i64, nonce: i64) -> Result<bool, StoreError> {
        let mut state = self.inner.lock().unwrap();
        match state.reservations.get_mut(&address_id) {
            Some(next) if *next == nonce + 1 => {
                *next = nonce;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
