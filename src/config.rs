use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::constants::{
    MAX_VERIFY_ATTEMPTS, PRESALE_MAX_PURCHASE_USD, PRESALE_MIN_PURCHASE_USD, REFERRAL_POOL_CAP,
    VERIFY_RETRY_INTERVAL_SECS,
};
use crate::referral::PolicyKind;

/// Deployment configuration for the coordinator. Zero values for limits and
/// polling knobs mean "use the built-in constant", so a partial config file
/// stays valid as defaults evolve.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    pub evm_rpc_url: String,
    pub solana_rpc_url: String,

    /// Sale contract that pulls ERC-20 stable payments (the allowance spender).
    pub evm_sale_contract: String,
    /// ERC-20 stable token accepted on the EVM side.
    pub evm_stable_token: String,

    /// Mint of the token referral bonuses are paid in.
    pub bonus_token_mint: String,
    pub bonus_token_decimals: u8,
    /// Fixed second-tier wallet; receives a cut of every bonus.
    pub platform_wallet: String,

    #[serde(default)]
    pub poll_interval_secs: u64, // 0 = VERIFY_RETRY_INTERVAL_SECS
    #[serde(default)]
    pub max_verify_attempts: u32, // 0 = MAX_VERIFY_ATTEMPTS

    #[serde(default)]
    pub min_purchase_usd: Decimal, // 0 = PRESALE_MIN_PURCHASE_USD
    #[serde(default)]
    pub max_purchase_usd: Decimal, // 0 = PRESALE_MAX_PURCHASE_USD

    #[serde(default)]
    pub referral_pool_cap: u64, // 0 = REFERRAL_POOL_CAP

    #[serde(default)]
    pub referral_policy: PolicyKind,
}

impl CoordinatorConfig {
    pub fn poll_interval(&self) -> Duration {
        if self.poll_interval_secs > 0 {
            Duration::from_secs(self.poll_interval_secs)
        } else {
            Duration::from_secs(VERIFY_RETRY_INTERVAL_SECS)
        }
    }

    pub fn verify_attempts(&self) -> u32 {
        if self.max_verify_attempts > 0 {
            self.max_verify_attempts
        } else {
            MAX_VERIFY_ATTEMPTS
        }
    }

    pub fn min_purchase(&self) -> Decimal {
        if self.min_purchase_usd > Decimal::ZERO {
            self.min_purchase_usd
        } else {
            PRESALE_MIN_PURCHASE_USD
        }
    }

    pub fn max_purchase(&self) -> Decimal {
        if self.max_purchase_usd > Decimal::ZERO {
            self.max_purchase_usd
        } else {
            PRESALE_MAX_PURCHASE_USD
        }
    }

    pub fn pool_cap(&self) -> u64 {
        if self.referral_pool_cap > 0 {
            self.referral_pool_cap
        } else {
            REFERRAL_POOL_CAP
        }
    }
}
