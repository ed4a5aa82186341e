//! Verification poller: resolves a submitted transaction reference to a
//! final purchase outcome. The ledger is consulted before the chain so a
//! reference that was already counted never costs another RPC call and never
//! re-triggers referral settlement; the chain poll itself is a bounded retry
//! loop that holds no locks while it waits.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::chain::ChainRouter;
use crate::error::CoordinatorError;
use crate::ledger::{PurchaseLedger, PurchaseRecord, PurchaseStatus, UpsertOutcome};
use crate::scheduler::{Clock, Scheduler};
use crate::types::{ChainTxStatus, TxReference};

/// The facts needed to register a purchase before it is confirmed.
#[derive(Debug, Clone)]
pub struct PurchaseDraft {
    pub reference: TxReference,
    pub user_id: String,
    pub token_amount: u64,
    pub price_per_token_usd: Decimal,
}

impl PurchaseDraft {
    fn to_record(&self, status: PurchaseStatus, created_at: i64) -> PurchaseRecord {
        PurchaseRecord {
            reference: self.reference.clone(),
            user_id: self.user_id.clone(),
            token_amount: self.token_amount,
            price_per_token_usd: self.price_per_token_usd,
            status,
            created_at,
        }
    }
}

#[derive(Debug)]
pub struct VerifyOutcome {
    pub verified: bool,
    pub status: PurchaseStatus,
    /// True only for the call that performed the PENDING-to-COMPLETED
    /// transition. Referral settlement keys off this so a re-verified
    /// purchase can never pay a bonus twice.
    pub newly_completed: bool,
    /// Why verification did not succeed, when it did not.
    pub failure: Option<CoordinatorError>,
}

impl VerifyOutcome {
    fn verified(status: PurchaseStatus, newly_completed: bool) -> Self {
        Self {
            verified: true,
            status,
            newly_completed,
            failure: None,
        }
    }

    fn not_verified(status: PurchaseStatus, failure: CoordinatorError) -> Self {
        Self {
            verified: false,
            status,
            newly_completed: false,
            failure: Some(failure),
        }
    }
}

pub struct VerificationPoller {
    ledger: Arc<dyn PurchaseLedger>,
    chains: ChainRouter,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    retry_interval: Duration,
}

impl VerificationPoller {
    pub fn new(
        ledger: Arc<dyn PurchaseLedger>,
        chains: ChainRouter,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
        retry_interval: Duration,
    ) -> Self {
        Self {
            ledger,
            chains,
            scheduler,
            clock,
            max_attempts,
            retry_interval,
        }
    }

    /// Drives one reference to a terminal answer.
    ///
    /// 1. Ledger first: a COMPLETED record answers immediately, a FAILED
    ///    record stays failed. Idempotent by reference.
    /// 2. Otherwise register the purchase as PENDING and poll the chain,
    ///    up to the attempt bound. Transient RPC errors consume an attempt
    ///    instead of failing the purchase.
    /// 3. Terminal writes go through the ledger's keyed upsert, so when two
    ///    polls race the first write wins and the loser reports the stored
    ///    status.
    pub async fn verify(&self, draft: PurchaseDraft) -> VerifyOutcome {
        let key = draft.reference.reference.clone();

        // 1. Idempotency check against the ledger
        if let Some(existing) = self.ledger.find(&key).await {
            match existing.status {
                PurchaseStatus::Completed => {
                    info!(reference = %key, "already verified, skipping chain poll");
                    return VerifyOutcome::verified(PurchaseStatus::Completed, false);
                }
                PurchaseStatus::Failed => {
                    return VerifyOutcome::not_verified(
                        PurchaseStatus::Failed,
                        CoordinatorError::VerificationFailed { reference: key },
                    );
                }
                PurchaseStatus::Pending => {}
            }
        } else {
            self.ledger
                .upsert(draft.to_record(PurchaseStatus::Pending, self.clock.now_unix()))
                .await;
        }

        // 2. Chain confirmation loop
        let client = self.chains.client_for(draft.reference.network);
        for attempt in 1..=self.max_attempts {
            match client.transaction_status(&key).await {
                Ok(ChainTxStatus::Confirmed) => {
                    return self.record_confirmed(&draft).await;
                }
                Ok(ChainTxStatus::Failed) => {
                    return self
                        .record_failed(
                            &draft,
                            CoordinatorError::VerificationFailed {
                                reference: key.clone(),
                            },
                        )
                        .await;
                }
                Ok(ChainTxStatus::Pending) => {
                    info!(reference = %key, attempt, max = self.max_attempts, "still pending");
                }
                Err(err) if err.is_transient() => {
                    // Transient errors burn an attempt, never the purchase
                    warn!(reference = %key, attempt, %err, "status check failed");
                }
                Err(err) => {
                    return self.record_failed(&draft, err).await;
                }
            }
            if attempt < self.max_attempts {
                self.scheduler.sleep(self.retry_interval).await;
            }
        }

        // 3. Attempts exhausted: soft timeout, recorded as FAILED
        self.record_failed(
            &draft,
            CoordinatorError::ConfirmationTimeout {
                attempts: self.max_attempts,
            },
        )
        .await
    }

    async fn record_confirmed(&self, draft: &PurchaseDraft) -> VerifyOutcome {
        let outcome = self
            .ledger
            .upsert(draft.to_record(PurchaseStatus::Completed, self.clock.now_unix()))
            .await;

        match outcome {
            UpsertOutcome::Created | UpsertOutcome::Transitioned => {
                info!(reference = %draft.reference, "purchase verified");
                VerifyOutcome::verified(PurchaseStatus::Completed, true)
            }
            // A concurrent poll got there first; report whatever it wrote
            UpsertOutcome::AlreadyTerminal | UpsertOutcome::Unchanged => {
                match self.ledger.find(&draft.reference.reference).await {
                    Some(existing) if existing.status == PurchaseStatus::Completed => {
                        VerifyOutcome::verified(PurchaseStatus::Completed, false)
                    }
                    _ => VerifyOutcome::not_verified(
                        PurchaseStatus::Failed,
                        CoordinatorError::LedgerWriteConflict {
                            reference: draft.reference.reference.clone(),
                        },
                    ),
                }
            }
        }
    }

    async fn record_failed(
        &self,
        draft: &PurchaseDraft,
        failure: CoordinatorError,
    ) -> VerifyOutcome {
        let outcome = self
            .ledger
            .upsert(draft.to_record(PurchaseStatus::Failed, self.clock.now_unix()))
            .await;

        if outcome == UpsertOutcome::AlreadyTerminal {
            // Lost the race to a writer that may have confirmed it
            if let Some(existing) = self.ledger.find(&draft.reference.reference).await {
                if existing.status == PurchaseStatus::Completed {
                    return VerifyOutcome::verified(PurchaseStatus::Completed, false);
                }
            }
        }

        warn!(reference = %draft.reference, %failure, "verification failed");
        VerifyOutcome::not_verified(PurchaseStatus::Failed, failure)
    }
}
