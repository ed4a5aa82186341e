//! HTTP boundary for the verify endpoints. Transport-agnostic: the host
//! binds these handlers to whatever server it runs; both endpoints are
//! idempotent for a given reference because every write funnels through the
//! ledger's keyed upsert.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ledger::{PurchaseLedger, PurchaseStatus};
use crate::poller::{PurchaseDraft, VerificationPoller};
use crate::referral::{ReferrerDirectory, SettlementEngine};

/// `POST /verify` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyRequest {
    pub reference: String,
}

/// `POST /verify` response body.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
    pub status: PurchaseStatus,
}

/// `POST /check-status` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckStatusRequest {
    pub reference: String,
}

/// `POST /check-status` response body.
#[derive(Debug, Clone, Serialize)]
pub struct CheckStatusResponse {
    pub verified: bool,
}

pub struct ApiContext {
    pub ledger: Arc<dyn PurchaseLedger>,
    pub poller: Arc<VerificationPoller>,
    pub settlement: Arc<SettlementEngine>,
    pub referrers: Arc<dyn ReferrerDirectory>,
}

/// Verifies a submitted reference. Only references the pipeline has already
/// registered are eligible: an unknown reference answers unverified without
/// touching the chain, because a purchase that was never registered cannot
/// be credited. Settlement runs only for the call that completed the
/// purchase, so repeated calls never double-pay a bonus.
pub async fn verify(ctx: &ApiContext, request: VerifyRequest) -> VerifyResponse {
    let record = match ctx.ledger.find(&request.reference).await {
        Some(record) => record,
        None => {
            return VerifyResponse {
                verified: false,
                status: PurchaseStatus::Pending,
            }
        }
    };

    let draft = PurchaseDraft {
        reference: record.reference.clone(),
        user_id: record.user_id.clone(),
        token_amount: record.token_amount,
        price_per_token_usd: record.price_per_token_usd,
    };
    let outcome = ctx.poller.verify(draft).await;

    if outcome.newly_completed {
        if let Some(profile) = ctx.referrers.referrer_of(&record.user_id).await {
            // Refetch so settlement sees the completed record
            if let Some(completed) = ctx.ledger.find(&request.reference).await {
                ctx.settlement.settle(&completed, Some(&profile)).await;
            }
        }
    }

    VerifyResponse {
        verified: outcome.verified,
        status: outcome.status,
    }
}

/// Ledger-only fast path: answers from the recorded status and never polls
/// the chain.
pub async fn check_status(ctx: &ApiContext, request: CheckStatusRequest) -> CheckStatusResponse {
    let verified = matches!(
        ctx.ledger.find(&request.reference).await,
        Some(record) if record.status == PurchaseStatus::Completed
    );
    CheckStatusResponse { verified }
}
