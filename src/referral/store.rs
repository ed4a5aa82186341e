use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{PaymentStatus, PaymentStore, ReferralPayment};

/// In-memory payment table. The lease transition runs under the map's
/// per-entry lock, so two concurrent reconcile triggers can never both own
/// the same PENDING row.
pub struct InMemoryPaymentStore {
    payments: DashMap<Uuid, ReferralPayment>,
    total_issued: AtomicU64,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self {
            payments: DashMap::new(),
            total_issued: AtomicU64::new(0),
        }
    }
}

impl Default for InMemoryPaymentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: ReferralPayment) {
        let issued = payment.amount.saturating_add(payment.second_tier_amount);
        self.total_issued.fetch_add(issued, Ordering::SeqCst);
        self.payments.insert(payment.id, payment);
    }

    async fn find(&self, id: Uuid) -> Option<ReferralPayment> {
        self.payments.get(&id).map(|p| p.clone())
    }

    async fn pending_for_referrer(&self, referrer_id: &str) -> Vec<ReferralPayment> {
        self.payments
            .iter()
            .filter(|p| p.referrer_id == referrer_id && p.status == PaymentStatus::Pending)
            .map(|p| p.clone())
            .collect()
    }

    async fn try_lease(&self, id: Uuid) -> bool {
        match self.payments.get_mut(&id) {
            Some(mut payment) if payment.status == PaymentStatus::Pending => {
                payment.status = PaymentStatus::Processing;
                true
            }
            _ => false,
        }
    }

    async fn mark_completed(&self, id: Uuid, signature: &str) {
        if let Some(mut payment) = self.payments.get_mut(&id) {
            payment.status = PaymentStatus::Completed;
            payment.transaction_signature = Some(signature.to_string());
        }
    }

    async fn mark_failed(&self, id: Uuid) {
        if let Some(mut payment) = self.payments.get_mut(&id) {
            payment.status = PaymentStatus::Failed;
        }
    }

    async fn total_bonus_issued(&self) -> u64 {
        self.total_issued.load(Ordering::SeqCst)
    }
}
