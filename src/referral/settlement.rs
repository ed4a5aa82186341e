//! Referral settlement: turns a completed purchase into a bonus payment,
//! paid immediately when the referrer's payout wallet is verified, queued as
//! PENDING when it is not. Settlement failures are logged and leave a row
//! behind; they never block or reverse the purchase itself.

use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::constants::{SECOND_TIER_PERCENT, TOKEN_DECIMALS};
use crate::error::CoordinatorError;
use crate::ledger::PurchaseRecord;
use crate::oracle::PriceOracle;
use crate::referral::{
    BonusSender, PaymentStatus, PaymentStore, ReferralPayment, ReferralPolicy, ReferrerProfile,
};

/// Bonus split computed at settlement time. Both legs are fixed here and
/// reused verbatim by the deferred payout path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BonusSplit {
    /// Referrer's share in bonus-token base units.
    pub referrer_amount: u64,
    /// Platform wallet's share in bonus-token base units.
    pub second_tier_amount: u64,
}

impl BonusSplit {
    /// Splits a bonus: the second tier takes its percentage, the referrer
    /// takes the remainder, so the legs always sum to the whole bonus.
    pub fn of(bonus_units: u64) -> Self {
        let second_tier_amount =
            ((bonus_units as u128) * (SECOND_TIER_PERCENT as u128) / 100) as u64;
        Self {
            referrer_amount: bonus_units - second_tier_amount,
            second_tier_amount,
        }
    }

    pub fn total(&self) -> u64 {
        self.referrer_amount + self.second_tier_amount
    }
}

pub struct SettlementEngine {
    oracle: Arc<dyn PriceOracle>,
    payments: Arc<dyn PaymentStore>,
    sender: Arc<dyn BonusSender>,
    policy: ReferralPolicy,
    /// Cap on total bonus units ever issued; exhaustion skips the bonus and
    /// never touches the purchase.
    pool_cap: u64,
    payment_currency: String,
}

impl SettlementEngine {
    pub fn new(
        oracle: Arc<dyn PriceOracle>,
        payments: Arc<dyn PaymentStore>,
        sender: Arc<dyn BonusSender>,
        policy: ReferralPolicy,
        pool_cap: u64,
        payment_currency: impl Into<String>,
    ) -> Self {
        Self {
            oracle,
            payments,
            sender,
            policy,
            pool_cap,
            payment_currency: payment_currency.into(),
        }
    }

    /// Converts a bonus USD value to bonus-token base units at the token's
    /// current price, flooring to whole base units.
    fn bonus_units(bonus_usd: Decimal, bonus_token_price: Decimal) -> u64 {
        if bonus_token_price <= Decimal::ZERO {
            return 0;
        }
        let tokens = bonus_usd / bonus_token_price;
        (tokens * Decimal::from(TOKEN_DECIMALS))
            .floor()
            .to_u64()
            .unwrap_or(0)
    }

    /// Settles the referral bonus for one completed purchase. Returns the
    /// payment row that was written, or `None` when there was nothing to
    /// settle (no referrer, zero bonus, pool exhausted).
    pub async fn settle(
        &self,
        record: &PurchaseRecord,
        referrer: Option<&ReferrerProfile>,
    ) -> Option<ReferralPayment> {
        let referrer = referrer?;

        // Purchase value uses the purchase-time price carried on the record;
        // the bonus conversion below deliberately uses the current price.
        let purchase_usd = record.purchase_usd();
        let bonus_usd = purchase_usd * self.policy.first_tier_rate();
        let bonus_token_price = self.oracle.bonus_token_price().await;
        let bonus = Self::bonus_units(bonus_usd, bonus_token_price);

        if bonus == 0 {
            info!(reference = %record.reference, "bonus rounds to zero, skipping");
            return None;
        }

        // Pool check: exhaustion skips the bonus, the purchase stands
        let issued = self.payments.total_bonus_issued().await;
        if issued.saturating_add(bonus) > self.pool_cap {
            warn!(
                reference = %record.reference,
                issued,
                bonus,
                cap = self.pool_cap,
                "referral pool exhausted, no bonus awarded"
            );
            return None;
        }

        let split = BonusSplit::of(bonus);
        let referrer_usd = bonus_usd * Decimal::from(split.referrer_amount)
            / Decimal::from(split.total());

        let mut payment = ReferralPayment {
            id: Uuid::new_v4(),
            referrer_id: referrer.referrer_id.clone(),
            amount: split.referrer_amount,
            second_tier_amount: split.second_tier_amount,
            amount_usd: referrer_usd,
            status: PaymentStatus::Pending,
            transaction_signature: None,
            payment_currency: self.payment_currency.clone(),
        };

        match &referrer.payout_wallet {
            // Verified wallet: pay both legs now, in one transaction
            Some(wallet) => match self.send_split(wallet, &split).await {
                Ok(signature) => {
                    info!(
                        reference = %record.reference,
                        referrer = %referrer.referrer_id,
                        amount = split.referrer_amount,
                        second_tier = split.second_tier_amount,
                        %signature,
                        "referral bonus paid"
                    );
                    payment.status = PaymentStatus::Completed;
                    payment.transaction_signature = Some(signature);
                }
                Err(err) => {
                    // Leaves a FAILED row for manual re-trigger; the
                    // purchase record is untouched
                    error!(
                        reference = %record.reference,
                        referrer = %referrer.referrer_id,
                        %err,
                        "bonus transfer failed"
                    );
                    payment.status = PaymentStatus::Failed;
                }
            },
            // Unverified wallet: queue for the reconciler
            None => {
                info!(
                    reference = %record.reference,
                    referrer = %referrer.referrer_id,
                    amount = split.referrer_amount,
                    "payout wallet unverified, bonus queued"
                );
            }
        }

        self.payments.insert(payment.clone()).await;
        Some(payment)
    }

    async fn send_split(
        &self,
        referrer_wallet: &str,
        split: &BonusSplit,
    ) -> Result<String, CoordinatorError> {
        self.sender
            .send_split(referrer_wallet, split.referrer_amount, split.second_tier_amount)
            .await
    }
}
