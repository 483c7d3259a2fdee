use alloy_primitives::U256;
use thiserror::Error;
use tracing::warn;

use crate::config::FeeConfig;
use crate::db::TokenKind;
use crate::gateway::{ChainGateway, GatewayError};

#[derive(Debug, Error)]
pub enum FeeError {
    /// The gateway could not be reached or returned an implausible price.
    /// Callers defer the withdrawal to the next cycle.
    #[error("Fee unavailable: {0}")]
    Unavailable(String),

    /// The network price exceeds the configured ceiling; submitting now
    /// would cost more than the operator allows.
    #[error("Network gas price {observed} wei exceeds ceiling {ceiling} wei")]
    ExceedsCeiling { observed: U256, ceiling: U256 },
}

impl From<GatewayError> for FeeError {
    fn from(e: GatewayError) -> Self {
        FeeError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Fast,
}

/// A bounded, deterministic fee offer for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeOffer {
    pub gas_price: U256,
    pub gas_limit: u64,
}

impl FeeOffer {
    /// Worst-case cost of the transaction in wei.
    pub fn max_cost(&self) -> U256 {
        self.gas_price * U256::from(self.gas_limit)
    }
}

/// Computes gas offers from the observed network price: safety margin on
/// top, chain minimum below, operator ceiling above. Percent-based integer
/// math keeps the offer deterministic for a given observation.
#[derive(Debug, Clone)]
pub struct FeePolicy {
    config: FeeConfig,
}

impl FeePolicy {
    pub fn new(config: FeeConfig) -> Self {
        Self { config }
    }

    pub async fn quote(
        &self,
        gateway: &dyn ChainGateway,
        kind: TokenKind,
        urgency: Urgency,
    ) -> Result<FeeOffer, FeeError> {
        let observed = gateway.gas_price().await?;

        if observed.is_zero() {
            warn!("gateway reported a zero gas price");
            return Err(FeeError::Unavailable("gateway reported zero gas price".into()));
        }

        let ceiling = U256::from(self.config.max_gas_price_wei);
        if observed > ceiling {
            return Err(FeeError::ExceedsCeiling { observed, ceiling });
        }

        let margin = match urgency {
            Urgency::Normal => self.config.margin_percent,
            Urgency::Fast => self.config.margin_percent + self.config.fast_extra_percent,
        };

        let offered = observed * U256::from(100 + margin) / U256::from(100);
        let floor = U256::from(self.config.min_gas_price_wei);
        let gas_price = offered.max(floor).min(ceiling);

        let gas_limit = match kind {
            TokenKind::Native => self.config.native_gas_limit,
            TokenKind::Erc20 => self.config.token_gas_limit,
        };

        Ok(FeeOffer {
            gas_price,
            gas_limit,
        })
    }
}
