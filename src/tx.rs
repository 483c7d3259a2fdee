use alloy_primitives::{hex, Address, U256};
use alloy_sol_types::{sol, SolCall};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::fee::FeeOffer;

sol! {
    function transfer(address to, uint256 value) external returns (bool);
}

#[derive(Debug, Error)]
pub enum TxError {
    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    #[error("Amount has more than {decimals} decimal places")]
    AmountPrecision { decimals: u32 },

    #[error("Amount must be positive")]
    AmountNotPositive,

    #[error("Amount does not fit the token's integer range")]
    AmountOverflow,
}

/// A prepared transfer, ready to be handed to the signing capability.
/// Serialized as the JSON body of the remote signer request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub to: Address,
    pub value: U256,
    pub nonce: u64,
    pub gas: u64,
    pub gas_price: U256,
    /// 0x-prefixed call data, "0x" for plain value transfers.
    pub data: String,
    pub chain_id: u64,
}

/// Validates an externally supplied destination: 0x-prefixed, 40 hex chars.
pub fn validate_destination(address: &str) -> Result<Address, TxError> {
    let address = address.trim();

    if !address.starts_with("0x") || address.len() != 42 {
        return Err(TxError::InvalidAddress(address.to_string()));
    }

    address
        .parse::<Address>()
        .map_err(|_| TxError::InvalidAddress(address.to_string()))
}

/// Converts a fixed-point amount to the token's integer unit.
pub fn to_wei(amount: Decimal, decimals: u32) -> Result<U256, TxError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(TxError::AmountNotPositive);
    }

    let amount = amount.normalize();
    let scale = amount.scale();
    if scale > decimals {
        return Err(TxError::AmountPrecision { decimals });
    }

    let mantissa: u128 = amount
        .mantissa()
        .try_into()
        .map_err(|_| TxError::AmountOverflow)?;

    Ok(U256::from(mantissa) * U256::from(10u64).pow(U256::from(decimals - scale)))
}

/// Converts an integer wei value back to a fixed-point amount.
pub fn from_wei(wei: U256, decimals: u32) -> Result<Decimal, TxError> {
    let value: i128 = wei.try_into().map_err(|_| TxError::AmountOverflow)?;

    Decimal::try_from_i128_with_scale(value, decimals).map_err(|_| TxError::AmountOverflow)
}

pub fn build_native_transfer(
    to: Address,
    amount_wei: U256,
    nonce: u64,
    fee: FeeOffer,
    chain_id: u64,
) -> UnsignedTransaction {
    UnsignedTransaction {
        to,
        value: amount_wei,
        nonce,
        gas: fee.gas_limit,
        gas_price: fee.gas_price,
        data: "0x".to_string(),
        chain_id,
    }
}

pub fn build_token_transfer(
    contract: Address,
    to: Address,
    amount_wei: U256,
    nonce: u64,
    fee: FeeOffer,
    chain_id: u64,
) -> UnsignedTransaction {
    let call = transferCall {
        to,
        value: amount_wei,
    };

    UnsignedTransaction {
        to: contract,
        value: U256::ZERO,
        nonce,
        gas: fee.gas_limit,
        gas_price: fee.gas_price,
        data: format!("0x{}", hex::encode(call.abi_encode())),
        chain_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn offer() -> FeeOffer {
        FeeOffer {
            gas_price: U256::from(12_000_000_000u64),
            gas_limit: 65_000,
        }
    }

    #[test]
    fn converts_amount_to_token_units() {
        assert_eq!(to_wei(dec!(10), 6).unwrap(), U256::from(10_000_000u64));
        assert_eq!(to_wei(dec!(0.5), 18).unwrap(), U256::from(500_000_000_000_000_000u64));
        // Trailing zeros do not count against the token's precision.
        assert_eq!(to_wei(dec!(1.500000), 2).unwrap(), U256::from(150u64));
    }

    #[test]
    fn rejects_excess_precision() {
        assert!(matches!(
            to_wei(dec!(1.0000001), 6),
            Err(TxError::AmountPrecision { decimals: 6 })
        ));
    }

    #[test]
    fn rejects_non_positive_amounts() {
        assert!(matches!(to_wei(dec!(0), 18), Err(TxError::AmountNotPositive)));
        assert!(matches!(to_wei(dec!(-1), 18), Err(TxError::AmountNotPositive)));
    }

    #[test]
    fn round_trips_gas_cost() {
        let wei = U256::from(780_000_000_000_000u64); // 65_000 * 12 gwei
        assert_eq!(from_wei(wei, 18).unwrap(), dec!(0.00078));
    }

    #[test]
    fn validates_destination_format() {
        assert!(validate_destination("0x1111111111111111111111111111111111111111").is_ok());
        assert!(validate_destination("1111111111111111111111111111111111111111").is_err());
        assert!(validate_destination("0x1111").is_err());
        assert!(validate_destination("0xzz11111111111111111111111111111111111111").is_err());
    }

    #[test]
    fn token_transfer_encodes_erc20_call() {
        let contract = "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"
            .parse::<Address>()
            .unwrap();
        let to = "0x2222222222222222222222222222222222222222"
            .parse::<Address>()
            .unwrap();

        let tx = build_token_transfer(contract, to, U256::from(10_000_000u64), 7, offer(), 1);

        assert_eq!(tx.value, U256::ZERO);
        assert_eq!(tx.nonce, 7);
        // ERC-20 transfer selector
        assert!(tx.data.starts_with("0xa9059cbb"));
    }

    #[test]
    fn native_transfer_carries_value_and_empty_data() {
        let to = "0x2222222222222222222222222222222222222222"
            .parse::<Address>()
            .unwrap();

        let tx = build_native_transfer(to, U256::from(1_000u64), 3, offer(), 1);

        assert_eq!(tx.value, U256::from(1_000u64));
        assert_eq!(tx.data, "0x");
        assert_eq!(tx.gas, 65_000);
    }
}
