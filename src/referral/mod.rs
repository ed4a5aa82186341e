//! Referral bonus model: one [`ReferralPayment`] row per settled purchase,
//! a selectable rate policy, and the payment store whose lease transition
//! keeps a bonus from ever being paid twice.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{REFERRAL_BONUS_RATE, TIERED_REFERRAL_RATES};

pub mod payout;
pub mod reconciler;
pub mod settlement;

pub use payout::{BonusSender, SolanaBonusSender};
pub use reconciler::{PendingPaymentReconciler, ReconcileReport};
pub use settlement::SettlementEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Bonus computed; payout wallet not yet verified or payout not yet
    /// attempted.
    Pending,
    /// Leased by a payout attempt. Blocks concurrent senders.
    Processing,
    Completed,
    /// Payout attempted and failed. Manual re-trigger only.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReferralPayment {
    pub id: Uuid,
    pub referrer_id: String,
    /// Referrer's share in bonus-token base units (bonus minus second tier).
    pub amount: u64,
    /// Platform wallet's share in bonus-token base units, stored so a
    /// deferred payout sends the same split that was computed at settlement.
    pub second_tier_amount: u64,
    /// USD value of the referrer's share at settlement time.
    pub amount_usd: Decimal,
    pub status: PaymentStatus,
    pub transaction_signature: Option<String>,
    pub payment_currency: String,
}

/// Which bonus-rate structure is active. The flat 10% presale rate and the
/// 5-level referral-tree rates are distinct products; the coordinator runs
/// one or the other, never a blend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Flat,
    Tiered,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferralPolicy {
    /// Flat first-tier rate applied to every referred purchase.
    Flat(Decimal),
    /// Per-level rates for the 5-level referral tree.
    Tiered([Decimal; 5]),
}

impl ReferralPolicy {
    pub fn from_kind(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Flat => ReferralPolicy::Flat(REFERRAL_BONUS_RATE),
            PolicyKind::Tiered => ReferralPolicy::Tiered(TIERED_REFERRAL_RATES),
        }
    }

    /// Rate applied to the buyer's direct referrer.
    pub fn first_tier_rate(&self) -> Decimal {
        match self {
            ReferralPolicy::Flat(rate) => *rate,
            ReferralPolicy::Tiered(rates) => rates[0],
        }
    }

    /// Rate for a referral-tree level, 1-based. Zero beyond the tree depth.
    pub fn rate_for_level(&self, level: usize) -> Decimal {
        match self {
            ReferralPolicy::Flat(rate) => {
                if level == 1 {
                    *rate
                } else {
                    Decimal::ZERO
                }
            }
            ReferralPolicy::Tiered(rates) => {
                rates.get(level.saturating_sub(1)).copied().unwrap_or(Decimal::ZERO)
            }
        }
    }

    /// Per-level bonus USD amounts for a purchase, used by the referral-tree
    /// view. The purchase pipeline itself only ever settles level 1.
    pub fn level_amounts(&self, purchase_usd: Decimal) -> Vec<Decimal> {
        match self {
            ReferralPolicy::Flat(rate) => vec![purchase_usd * rate],
            ReferralPolicy::Tiered(rates) => {
                rates.iter().map(|rate| purchase_usd * rate).collect()
            }
        }
    }
}

/// Referrer identity plus payout-wallet verification state, supplied by the
/// identity collaborator. A present wallet is a verified wallet.
#[derive(Debug, Clone)]
pub struct ReferrerProfile {
    pub referrer_id: String,
    pub payout_wallet: Option<String>,
}

/// Resolves a buyer to their referrer. Implemented by the identity
/// collaborator; the in-crate implementation exists for tests.
#[async_trait]
pub trait ReferrerDirectory: Send + Sync {
    async fn referrer_of(&self, user_id: &str) -> Option<ReferrerProfile>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert(&self, payment: ReferralPayment);

    async fn find(&self, id: Uuid) -> Option<ReferralPayment>;

    async fn pending_for_referrer(&self, referrer_id: &str) -> Vec<ReferralPayment>;

    /// Atomically moves PENDING to PROCESSING. Returns false when the row is
    /// in any other state, which is how a second concurrent trigger loses.
    async fn try_lease(&self, id: Uuid) -> bool;

    async fn mark_completed(&self, id: Uuid, signature: &str);

    async fn mark_failed(&self, id: Uuid);

    /// Total bonus-token base units ever computed, both legs included. Feeds
    /// the bonus pool cap.
    async fn total_bonus_issued(&self) -> u64;
}

pub mod store;
pub use store::InMemoryPaymentStore;
