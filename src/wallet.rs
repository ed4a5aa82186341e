//! Wallet-side submission boundary. Broadcasting is done by the user's
//! wallet, so the pipeline only sees these two calls. Either can block for
//! as long as the user stares at the signing prompt, and either can return
//! [`CoordinatorError::UserRejectedSignature`].

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::CoordinatorError;
use crate::types::{Network, SettlementCurrency, TxReference};

/// A priced purchase ready for wallet submission.
#[derive(Debug, Clone)]
pub struct PreparedPurchase {
    pub network: Network,
    pub currency: SettlementCurrency,
    /// Token base units being bought.
    pub token_amount: u64,
    pub price_per_token_usd: Decimal,
    pub purchase_usd: Decimal,
    /// Settlement-currency base units the wallet should send: stable base
    /// units, wei or lamports depending on `{network, currency}`.
    pub pay_amount: u128,
}

/// An ERC-20 approval ready for wallet submission.
#[derive(Debug, Clone)]
pub struct ApprovalRequest {
    pub owner: String,
    pub spender: String,
    pub token: String,
    /// Base units to approve; already includes the headroom multiplier.
    pub amount: u64,
}

impl ApprovalRequest {
    /// Builds an approval covering `required` with the standard headroom, so
    /// the next purchase of similar size skips the approval transaction.
    pub fn with_headroom(owner: &str, spender: &str, token: &str, required: u64) -> Self {
        Self {
            owner: owner.to_string(),
            spender: spender.to_string(),
            token: token.to_string(),
            amount: required
                .checked_mul(crate::constants::APPROVAL_HEADROOM_MULTIPLIER)
                .unwrap_or(u64::MAX),
        }
    }
}

#[async_trait]
pub trait WalletAdapter: Send + Sync {
    /// Asks the wallet to sign and broadcast the purchase; returns the
    /// transaction reference once broadcast.
    async fn submit_purchase(
        &self,
        prepared: &PreparedPurchase,
    ) -> Result<TxReference, CoordinatorError>;

    /// Asks the wallet to sign and broadcast an ERC-20 approval; returns the
    /// transaction hash once broadcast.
    async fn submit_approval(&self, request: &ApprovalRequest)
        -> Result<String, CoordinatorError>;
}
