use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use rust_decimal::prelude::ToPrimitive;

use crate::constants::{
    EVM_NATIVE_DECIMALS, SOLANA_NATIVE_DECIMALS, STABLE_DECIMALS, TOKEN_DECIMALS,
};

/// Which chain a settlement transaction lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Evm,
    Solana,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Evm => write!(f, "evm"),
            Network::Solana => write!(f, "solana"),
        }
    }
}

/// What the buyer pays with: the chain's native coin or a stable token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementCurrency {
    Native,
    Stable,
}

impl SettlementCurrency {
    /// Only ERC-20 stable purchases go through the approve-then-spend path.
    /// Native coins have no allowance concept, and SPL transfers are signed
    /// directly by the owner.
    pub fn requires_allowance(self, network: Network) -> bool {
        network == Network::Evm && self == SettlementCurrency::Stable
    }
}

/// Chain-reported status of a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainTxStatus {
    Pending,
    Confirmed,
    Failed,
}

/// The chain-specific identifier of a submitted transaction (EVM hash or
/// Solana signature) plus where it lives. Immutable once submitted; the
/// reference string is the idempotency key for the purchase ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxReference {
    pub network: Network,
    pub currency: SettlementCurrency,
    pub reference: String,
}

impl TxReference {
    pub fn new(network: Network, currency: SettlementCurrency, reference: impl Into<String>) -> Self {
        Self {
            network,
            currency,
            reference: reference.into(),
        }
    }
}

impl fmt::Display for TxReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.network, self.reference)
    }
}

/// Session data handed to the pipeline by the identity collaborator. The
/// pipeline never reads referral state from anywhere else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub user_id: String,
    pub referrer_id: Option<String>,
}

/// Token base units as a decimal token count.
pub fn tokens_to_decimal(base_units: u64) -> Decimal {
    Decimal::from(base_units) / Decimal::from(TOKEN_DECIMALS)
}

/// USD value of a token amount at a given per-token price.
pub fn usd_value(token_amount: u64, price_per_token_usd: Decimal) -> Decimal {
    tokens_to_decimal(token_amount) * price_per_token_usd
}

/// USD value as stable-token base units, rounded up so the payment always
/// covers the price.
pub fn stable_units(usd: Decimal) -> u64 {
    (usd * Decimal::from(STABLE_DECIMALS))
        .ceil()
        .to_u64()
        .unwrap_or(0)
}

/// USD value as native-coin base units (wei or lamports) at the given
/// native price, rounded up.
pub fn native_units(usd: Decimal, native_price_usd: Decimal, network: Network) -> u128 {
    if native_price_usd <= Decimal::ZERO {
        return 0;
    }
    let scale = match network {
        Network::Evm => EVM_NATIVE_DECIMALS,
        Network::Solana => SOLANA_NATIVE_DECIMALS,
    };
    (usd / native_price_usd * Decimal::from(scale))
        .ceil()
        .to_u128()
        .unwrap_or(0)
}
