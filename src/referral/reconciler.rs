//! Pending payment reconciler. When the identity collaborator reports that a
//! referrer verified a payout wallet, every bonus queued for them is leased
//! and paid. The lease transition is what makes a re-verification or a
//! concurrent trigger harmless: a row that is not PENDING is skipped.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::referral::{BonusSender, PaymentStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
}

pub struct PendingPaymentReconciler {
    payments: Arc<dyn PaymentStore>,
    sender: Arc<dyn BonusSender>,
}

impl PendingPaymentReconciler {
    pub fn new(payments: Arc<dyn PaymentStore>, sender: Arc<dyn BonusSender>) -> Self {
        Self { payments, sender }
    }

    /// Pays all PENDING bonuses for `user_id` to the newly verified
    /// `wallet_address`. Batch semantics: each row settles on its own, and a
    /// failure marks only that row FAILED, never unwinding earlier
    /// successes. FAILED rows wait for a manual re-trigger.
    pub async fn on_wallet_verified(&self, user_id: &str, wallet_address: &str) -> ReconcileReport {
        let pending = self.payments.pending_for_referrer(user_id).await;
        let mut report = ReconcileReport::default();

        info!(
            referrer = user_id,
            wallet = wallet_address,
            pending = pending.len(),
            "reconciling pending referral payments"
        );

        for payment in pending {
            // Lease before paying; a concurrent trigger already holding the
            // row makes this a no-op
            if !self.payments.try_lease(payment.id).await {
                continue;
            }
            report.processed += 1;

            match self
                .sender
                .send_split(wallet_address, payment.amount, payment.second_tier_amount)
                .await
            {
                Ok(signature) => {
                    self.payments.mark_completed(payment.id, &signature).await;
                    info!(
                        payment = %payment.id,
                        amount = payment.amount,
                        %signature,
                        "pending bonus paid"
                    );
                    report.succeeded += 1;
                }
                Err(err) => {
                    self.payments.mark_failed(payment.id).await;
                    warn!(payment = %payment.id, %err, "pending bonus payout failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            referrer = user_id,
            processed = report.processed,
            succeeded = report.succeeded,
            failed = report.failed,
            "reconcile finished"
        );
        report
    }
}
