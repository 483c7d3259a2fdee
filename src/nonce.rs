use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::db::{Address, Store, StoreError};
use crate::gateway::{ChainGateway, GatewayError};

#[derive(Debug, Error)]
pub enum NonceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Per-address sequence allocator.
///
/// The reservation row in storage is the authority; the chain's reported
/// next-nonce only raises the baseline, so transactions sent outside this
/// service (or lost reservations after a restart) cannot cause reuse.
/// Reservation is an atomic row-locked update, which also serves as the
/// per-address mutual exclusion between concurrent worker instances.
pub struct NonceAllocator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn ChainGateway>,
}

impl NonceAllocator {
    pub fn new(store: Arc<dyn Store>, gateway: Arc<dyn ChainGateway>) -> Self {
        Self { store, gateway }
    }

    /// Reserves the next nonce for the address. Called once per withdrawal,
    /// immediately before submission.
    pub async fn allocate(&self, address: &Address) -> Result<u64, NonceError> {
        let chain_next = self.gateway.next_nonce(&address.address).await?;
        let nonce = self
            .store
            .reserve_nonce(address.id, chain_next as i64)
            .await?;

        debug!(address = %address.address, nonce, "allocated nonce");
        Ok(nonce as u64)
    }

    /// Returns a nonce after a pre-broadcast rejection. If another
    /// reservation has happened since, the nonce stays burned: reusing a
    /// sequence number that may be in flight risks double-submission.
    pub async fn release(&self, address: &Address, nonce: u64) -> Result<(), NonceError> {
        let released = self.store.release_nonce(address.id, nonce as i64).await?;

        if released {
            debug!(address = %address.address, nonce, "released nonce");
        } else {
            warn!(
                address = %address.address,
                nonce, "nonce could not be released, leaving it burned"
            );
        }

        Ok(())
    }
}
