use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::SubmissionConfig;
use crate::db::{Store, StoreError, Token, TokenKind, Withdrawal};
use crate::fee::{FeePolicy, Urgency};
use crate::gateway::{ChainGateway, SubmitOutcome};
use crate::nonce::NonceAllocator;
use crate::signer::TransactionSigner;
use crate::tx;

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a PENDING row was left untouched this cycle. Deferred rows are
/// retried on the next scheduled cycle, never in a tight loop. Quarantined
/// rows keep their claim: the broadcast went out but could not be recorded,
/// so returning them to the PENDING pool would pay the destination twice.
#[derive(Debug)]
enum RowOutcome {
    Submitted,
    Deferred(String),
    Failed(String),
    Quarantined(String),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub submitted: usize,
    pub deferred: usize,
    pub failed: usize,
    pub quarantined: usize,
}

/// Attempts at writing the SUBMITTED transition once a broadcast has been
/// acknowledged, before the row is quarantined for operator reconciliation.
const RECORD_ATTEMPTS: usize = 3;

/// Background loop turning PENDING withdrawals into broadcast transactions.
///
/// Rows are processed oldest first, grouped per source address so each
/// address's transfers go out in creation order with sequential nonces.
pub struct SubmissionWorker {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ChainGateway>,
    signer: Arc<dyn TransactionSigner>,
    fee_policy: FeePolicy,
    allocator: NonceAllocator,
    config: SubmissionConfig,
    chain_id: u64,
}

impl SubmissionWorker {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn ChainGateway>,
        signer: Arc<dyn TransactionSigner>,
        fee_policy: FeePolicy,
        config: SubmissionConfig,
        chain_id: u64,
    ) -> Self {
        let allocator = NonceAllocator::new(store.clone(), gateway.clone());

        Self {
            store,
            gateway,
            signer,
            fee_policy,
            allocator,
            config,
            chain_id,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting submission worker");

        loop {
            match self.process_pending(&shutdown).await {
                Ok(stats) => info!(
                    submitted = stats.submitted,
                    deferred = stats.deferred,
                    failed = stats.failed,
                    "Submission cycle completed"
                ),
                Err(e) => error!("Submission cycle failed: {:?}", e),
            }

            tokio::select! {
                _ = sleep(Duration::from_secs(self.config.interval_secs)) => {}
                _ = shutdown.changed() => {}
            }

            if *shutdown.borrow() {
                info!("Submission worker stopping");
                break;
            }
        }
    }

    /// One scheduled cycle. Checks the shutdown signal between rows so a
    /// graceful stop drains the row in flight instead of abandoning it.
    pub async fn process_pending(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<CycleStats, SubmissionError> {
        let pending = self
            .store
            .withdrawals_by_status(crate::db::WithdrawalStatus::Pending, self.config.batch_size)
            .await?;

        let mut stats = CycleStats::default();

        for (address_id, withdrawals) in group_by_address(pending) {
            for withdrawal in withdrawals {
                if *shutdown.borrow() {
                    return Ok(stats);
                }

                // The lease keeps a second worker instance off this row.
                if !self
                    .store
                    .claim_pending(withdrawal.id, self.config.claim_lease_secs)
                    .await?
                {
                    continue;
                }

                let id = withdrawal.id;
                match self.process_one(withdrawal).await {
                    Ok(RowOutcome::Submitted) => stats.submitted += 1,
                    Ok(RowOutcome::Deferred(reason)) => {
                        stats.deferred += 1;
                        warn!(withdrawal_id = id, address_id, reason, "Withdrawal deferred");
                        self.store.release_claim(id).await?;
                    }
                    Ok(RowOutcome::Failed(reason)) => {
                        stats.failed += 1;
                        error!(withdrawal_id = id, address_id, reason, "Withdrawal failed");
                    }
                    Ok(RowOutcome::Quarantined(reason)) => {
                        // Claim kept. Operators reconcile by address + nonce.
                        stats.quarantined += 1;
                        error!(withdrawal_id = id, address_id, reason, "Withdrawal quarantined");
                    }
                    Err(e) => {
                        // Only reachable before a broadcast leaves the
                        // process; requeueing is safe.
                        stats.deferred += 1;
                        error!(withdrawal_id = id, "Error processing withdrawal: {:?}", e);
                        self.store.release_claim(id).await?;
                    }
                }
            }
        }

        Ok(stats)
    }

    async fn process_one(&self, withdrawal: Withdrawal) -> Result<RowOutcome, SubmissionError> {
        let Some(address) = self.store.get_active_address(withdrawal.address_id).await? else {
            return Ok(RowOutcome::Deferred(format!(
                "source address {} not found or inactive",
                withdrawal.address_id
            )));
        };

        let Some(token) = self.store.get_active_token(withdrawal.token_id).await? else {
            return Ok(RowOutcome::Deferred(format!(
                "token {} not found or inactive",
                withdrawal.token_id
            )));
        };

        let destination = match tx::validate_destination(&withdrawal.to_address) {
            Ok(destination) => destination,
            Err(e) => return Ok(RowOutcome::Deferred(e.to_string())),
        };

        let amount_wei = match tx::to_wei(withdrawal.amount, token.decimals as u32) {
            Ok(amount_wei) => amount_wei,
            Err(e) => return Ok(RowOutcome::Deferred(e.to_string())),
        };

        let fee = match self
            .fee_policy
            .quote(self.gateway.as_ref(), token.kind, Urgency::Normal)
            .await
        {
            Ok(fee) => fee,
            Err(e) => return Ok(RowOutcome::Deferred(e.to_string())),
        };

        if let Err(reason) = self
            .check_balances(&address.address, &token, amount_wei, fee.max_cost())
            .await
        {
            return Ok(RowOutcome::Deferred(reason));
        }

        let nonce = match self.allocator.allocate(&address).await {
            Ok(nonce) => nonce,
            Err(e) => return Ok(RowOutcome::Deferred(e.to_string())),
        };

        let unsigned = match token.kind {
            TokenKind::Native => {
                tx::build_native_transfer(destination, amount_wei, nonce, fee, self.chain_id)
            }
            TokenKind::Erc20 => {
                let contract = match tx::validate_destination(&token.address) {
                    Ok(contract) => contract,
                    Err(e) => {
                        self.release_nonce(&address, nonce).await;
                        return Ok(RowOutcome::Deferred(format!(
                            "token contract address invalid: {e}"
                        )));
                    }
                };
                tx::build_token_transfer(contract, destination, amount_wei, nonce, fee, self.chain_id)
            }
        };

        let signed = match self.signer.sign(&address.address, &unsigned).await {
            Ok(signed) => signed,
            Err(e) => {
                // Nothing was broadcast; the nonce can go back.
                self.release_nonce(&address, nonce).await;
                let reason = format!("signing failed: {e}");
                self.store
                    .mark_failed_before_broadcast(withdrawal.id, &reason)
                    .await?;
                return Ok(RowOutcome::Failed(reason));
            }
        };

        let gas_cost =
            tx::from_wei(fee.max_cost(), 18).unwrap_or_else(|_| Decimal::ZERO);

        match self.gateway.submit(&signed).await {
            SubmitOutcome::Accepted { tx_hash } => {
                Ok(self.record_submission(withdrawal.id, &tx_hash, nonce, gas_cost).await)
            }
            SubmitOutcome::Ambiguous { tx_hash: Some(tx_hash) } => {
                // Partial acknowledgement: record the provisional hash and
                // let the confirmation worker reconcile.
                warn!(
                    withdrawal_id = withdrawal.id,
                    tx_hash, "Ambiguous broadcast with provisional hash"
                );
                Ok(self.record_submission(withdrawal.id, &tx_hash, nonce, gas_cost).await)
            }
            SubmitOutcome::Ambiguous { tx_hash: None } => {
                // No feedback at all. The transaction may be in flight, so
                // the nonce stays burned and the row is terminal; operators
                // reconcile by address+nonce if it ever lands.
                let reason = format!(
                    "ambiguous broadcast with no acknowledgement, nonce {nonce} burned"
                );
                match self
                    .store
                    .mark_failed_before_broadcast(withdrawal.id, &reason)
                    .await
                {
                    Ok(_) => Ok(RowOutcome::Failed(reason)),
                    // Can't requeue either: a retry would broadcast a second
                    // transfer while this one may still land.
                    Err(e) => {
                        warn!(
                            withdrawal_id = withdrawal.id,
                            "Could not record ambiguous broadcast: {:?}", e
                        );
                        Ok(RowOutcome::Quarantined(reason))
                    }
                }
            }
            SubmitOutcome::Rejected { reason } => {
                // Rejected before broadcast: safe to hand the nonce back,
                // and safe to requeue if this write fails.
                self.release_nonce(&address, nonce).await;
                let reason = format!("broadcast rejected: {reason}");
                self.store
                    .mark_failed_before_broadcast(withdrawal.id, &reason)
                    .await?;
                Ok(RowOutcome::Failed(reason))
            }
        }
    }

    /// Records an acknowledged broadcast. From here on the transaction is on
    /// the wire, so a storage failure must never put the row back in the
    /// PENDING pool: the next cycle would pay the destination a second time
    /// under a fresh nonce. The conditional update is retried, then the row
    /// is quarantined with its claim held.
    async fn record_submission(
        &self,
        id: i64,
        tx_hash: &str,
        nonce: u64,
        gas_cost: Decimal,
    ) -> RowOutcome {
        for attempt in 1..=RECORD_ATTEMPTS {
            match self
                .store
                .mark_submitted(id, tx_hash, nonce as i64, gas_cost)
                .await
            {
                Ok(true) => {
                    info!(withdrawal_id = id, tx_hash, nonce, "Withdrawal submitted");
                    return RowOutcome::Submitted;
                }
                Ok(false) => {
                    error!(
                        withdrawal_id = id,
                        tx_hash, "Row left PENDING while we were submitting"
                    );
                    return RowOutcome::Submitted;
                }
                Err(e) => {
                    warn!(
                        withdrawal_id = id,
                        tx_hash, attempt, "Could not record submission: {:?}", e
                    );
                    sleep(Duration::from_millis(200)).await;
                }
            }
        }

        RowOutcome::Quarantined(format!(
            "broadcast {tx_hash} acknowledged but not recorded, nonce {nonce} in flight"
        ))
    }

    /// Preflight: the source must cover amount plus worst-case fee.
    /// Insufficiency defers rather than fails, balances change over time.
    async fn check_balances(
        &self,
        source: &str,
        token: &Token,
        amount_wei: alloy_primitives::U256,
        max_fee: alloy_primitives::U256,
    ) -> Result<(), String> {
        match token.kind {
            TokenKind::Native => {
                let balance = self
                    .gateway
                    .native_balance(source)
                    .await
                    .map_err(|e| e.to_string())?;
                if balance < amount_wei + max_fee {
                    return Err(format!(
                        "insufficient native balance: have {balance}, need {}",
                        amount_wei + max_fee
                    ));
                }
            }
            TokenKind::Erc20 => {
                let token_balance = self
                    .gateway
                    .token_balance(&token.address, source)
                    .await
                    .map_err(|e| e.to_string())?;
                if token_balance < amount_wei {
                    return Err(format!(
                        "insufficient {} balance: have {token_balance}, need {amount_wei}",
                        token.symbol
                    ));
                }

                let native = self
                    .gateway
                    .native_balance(source)
                    .await
                    .map_err(|e| e.to_string())?;
                if native < max_fee {
                    return Err(format!(
                        "insufficient native balance for gas: have {native}, need {max_fee}"
                    ));
                }
            }
        }

        Ok(())
    }

    async fn release_nonce(&self, address: &crate::db::Address, nonce: u64) {
        if let Err(e) = self.allocator.release(address, nonce).await {
            error!(address = %address.address, nonce, "Failed to release nonce: {:?}", e);
        }
    }
}

/// Groups rows by source address, preserving oldest-first order both across
/// groups and within each group.
fn group_by_address(withdrawals: Vec<Withdrawal>) -> Vec<(i64, Vec<Withdrawal>)> {
    let mut groups: Vec<(i64, Vec<Withdrawal>)> = Vec::new();

    for withdrawal in withdrawals {
        match groups.iter_mut().find(|(id, _)| *id == withdrawal.address_id) {
            Some((_, group)) => group.push(withdrawal),
            None => groups.push((withdrawal.address_id, vec![withdrawal])),
        }
    }

    groups
}
