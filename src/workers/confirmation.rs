use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::ConfirmationConfig;
use crate::db::{Store, StoreError, Withdrawal, WithdrawalStatus};
use crate::gateway::{ChainGateway, TxInclusion};

#[derive(Debug, Error)]
pub enum ConfirmationError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    pub confirmed: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Background loop converging SUBMITTED rows with the chain.
///
/// Idempotent by construction: it only ever reads SUBMITTED rows, and every
/// write is conditional on the row still being SUBMITTED, so re-polling a
/// row that another instance already finalized is a no-op.
pub struct ConfirmationWorker {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ChainGateway>,
    config: ConfirmationConfig,
}

impl ConfirmationWorker {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn ChainGateway>,
        config: ConfirmationConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting confirmation worker");

        loop {
            match self.poll_submitted(&shutdown).await {
                Ok(stats) => info!(
                    confirmed = stats.confirmed,
                    updated = stats.updated,
                    failed = stats.failed,
                    "Confirmation cycle completed"
                ),
                Err(e) => error!("Confirmation cycle failed: {:?}", e),
            }

            tokio::select! {
                _ = sleep(Duration::from_secs(self.config.interval_secs)) => {}
                _ = shutdown.changed() => {}
            }

            if *shutdown.borrow() {
                info!("Confirmation worker stopping");
                break;
            }
        }
    }

    pub async fn poll_submitted(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<PollStats, ConfirmationError> {
        let submitted = self
            .store
            .withdrawals_by_status(WithdrawalStatus::Submitted, self.config.batch_size)
            .await?;

        let mut stats = PollStats::default();

        for withdrawal in submitted {
            if *shutdown.borrow() {
                return Ok(stats);
            }

            match self.poll_one(&withdrawal).await {
                Ok(outcome) => match outcome {
                    PollOutcome::Confirmed => stats.confirmed += 1,
                    PollOutcome::Updated => stats.updated += 1,
                    PollOutcome::Failed => stats.failed += 1,
                    PollOutcome::Unchanged => {}
                },
                Err(e) => {
                    error!(
                        withdrawal_id = withdrawal.id,
                        "Error polling withdrawal: {:?}", e
                    );
                }
            }
        }

        Ok(stats)
    }

    async fn poll_one(&self, withdrawal: &Withdrawal) -> Result<PollOutcome, ConfirmationError> {
        let Some(tx_hash) = withdrawal.tx_hash.as_deref() else {
            // The storage constraint makes this unreachable; a SUBMITTED row
            // without a hash is corrupt, not retryable.
            error!(
                withdrawal_id = withdrawal.id,
                "SUBMITTED withdrawal has no tx_hash"
            );
            return Ok(PollOutcome::Unchanged);
        };

        let inclusion = match self.gateway.transaction_status(tx_hash).await {
            Ok(inclusion) => inclusion,
            Err(e) => {
                // Transient gateway trouble: retried next cycle.
                warn!(
                    withdrawal_id = withdrawal.id,
                    tx_hash, "Could not query transaction status: {e}"
                );
                return Ok(PollOutcome::Unchanged);
            }
        };

        match inclusion {
            TxInclusion::NotFound => {
                if self.grace_expired(withdrawal) {
                    let reason = format!(
                        "transaction not found on chain after {}s grace period",
                        self.config.not_found_grace_secs
                    );
                    self.store
                        .mark_failed_in_flight(withdrawal.id, &reason)
                        .await?;
                    error!(withdrawal_id = withdrawal.id, tx_hash, reason, "Withdrawal dropped");
                    return Ok(PollOutcome::Failed);
                }

                Ok(PollOutcome::Unchanged)
            }
            TxInclusion::Included { success: false, .. } => {
                self.store
                    .mark_failed_in_flight(withdrawal.id, "transaction reverted on chain")
                    .await?;
                error!(withdrawal_id = withdrawal.id, tx_hash, "Withdrawal reverted");
                Ok(PollOutcome::Failed)
            }
            TxInclusion::Included {
                confirmations,
                success: true,
            } => {
                if confirmations >= self.config.confirmation_threshold {
                    self.store
                        .mark_confirmed(withdrawal.id, confirmations as i64)
                        .await?;
                    info!(
                        withdrawal_id = withdrawal.id,
                        tx_hash, confirmations, "Withdrawal confirmed"
                    );
                    return Ok(PollOutcome::Confirmed);
                }

                let advanced = self
                    .store
                    .record_confirmations(withdrawal.id, confirmations as i64)
                    .await?;

                Ok(if advanced {
                    PollOutcome::Updated
                } else {
                    PollOutcome::Unchanged
                })
            }
        }
    }

    fn grace_expired(&self, withdrawal: &Withdrawal) -> bool {
        let since = withdrawal.submitted_at.unwrap_or(withdrawal.created_at);
        (Utc::now() - since).num_seconds() > self.config.not_found_grace_secs
    }
}

#[derive(Debug)]
enum PollOutcome {
    Confirmed,
    Updated,
    Failed,
    Unchanged,
}
