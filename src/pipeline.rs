//! The purchase pipeline: one parametrized orchestrator for every
//! `{network, currency}` combination, keyed on whether the currency needs an
//! allowance. It drives the step machines the UI observes, runs the approval
//! gate when required, hands the submitted reference to the poller, and
//! kicks off referral settlement exactly once per newly completed purchase.
//!
//! The pipeline receives the session and referrer as explicit inputs; it
//! never reads either from ambient state.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::info;

use crate::allowance::AllowanceGate;
use crate::error::CoordinatorError;
use crate::ledger::{PurchaseLedger, PurchaseRecord};
use crate::oracle::PriceOracle;
use crate::poller::{PurchaseDraft, VerificationPoller};
use crate::referral::{ReferralPayment, ReferrerProfile, SettlementEngine};
use crate::steps::{StepId, StepMachine};
use crate::types::{
    native_units, stable_units, usd_value, Network, SessionContext, SettlementCurrency,
};
use crate::wallet::{ApprovalRequest, PreparedPurchase, WalletAdapter};

/// Everything one purchase attempt needs, supplied by the caller.
#[derive(Debug, Clone)]
pub struct PurchaseRequest {
    pub session: SessionContext,
    pub network: Network,
    pub currency: SettlementCurrency,
    /// Token base units being bought.
    pub token_amount: u64,
    pub price_per_token_usd: Decimal,
    /// Buyer wallet address on the settlement chain.
    pub buyer_address: String,
    /// Referrer identity and payout-wallet state, resolved by the identity
    /// collaborator before the attempt starts.
    pub referrer: Option<ReferrerProfile>,
}

/// One in-flight attempt. The step machines are shared so the UI can observe
/// progress; dropping the observers does not stop the attempt.
pub struct PurchaseAttempt {
    pub request: PurchaseRequest,
    pub approval_steps: Option<Arc<RwLock<StepMachine>>>,
    pub purchase_steps: Arc<RwLock<StepMachine>>,
}

#[derive(Debug)]
pub struct PurchaseOutcome {
    pub record: PurchaseRecord,
    pub referral_payment: Option<ReferralPayment>,
}

pub struct PurchasePipeline {
    ledger: Arc<dyn PurchaseLedger>,
    poller: Arc<VerificationPoller>,
    gate: Arc<AllowanceGate>,
    settlement: Arc<SettlementEngine>,
    oracle: Arc<dyn PriceOracle>,
    evm_sale_contract: String,
    evm_stable_token: String,
    min_purchase_usd: Decimal,
    max_purchase_usd: Decimal,
}

impl PurchasePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn PurchaseLedger>,
        poller: Arc<VerificationPoller>,
        gate: Arc<AllowanceGate>,
        settlement: Arc<SettlementEngine>,
        oracle: Arc<dyn PriceOracle>,
        evm_sale_contract: impl Into<String>,
        evm_stable_token: impl Into<String>,
        min_purchase_usd: Decimal,
        max_purchase_usd: Decimal,
    ) -> Self {
        Self {
            ledger,
            poller,
            gate,
            settlement,
            oracle,
            evm_sale_contract: evm_sale_contract.into(),
            evm_stable_token: evm_stable_token.into(),
            min_purchase_usd,
            max_purchase_usd,
        }
    }

    /// Builds the step machines for an attempt so the UI can subscribe
    /// before anything runs.
    pub fn begin(&self, request: PurchaseRequest) -> PurchaseAttempt {
        let requires_allowance = request.currency.requires_allowance(request.network);
        PurchaseAttempt {
            purchase_steps: Arc::new(RwLock::new(StepMachine::for_purchase(
                request.network,
                request.currency,
            ))),
            approval_steps: requires_allowance
                .then(|| Arc::new(RwLock::new(StepMachine::approval_flow()))),
            request,
        }
    }

    /// Runs an attempt to completion: approval flow when the currency needs
    /// one, then prepare, send, verify, record and settle. Failures mark the
    /// failing step and stop the attempt; a fresh attempt needs fresh
    /// machines from [`PurchasePipeline::begin`].
    pub async fn execute(
        &self,
        attempt: &PurchaseAttempt,
        wallet: &dyn WalletAdapter,
    ) -> Result<PurchaseOutcome, CoordinatorError> {
        let request = &attempt.request;
        let purchase_usd = usd_value(request.token_amount, request.price_per_token_usd);
        let requires_allowance = request.currency.requires_allowance(request.network);
        // Stable payments cover the USD price in stable base units
        let required_payment = stable_units(purchase_usd);

        if let Some(approval_steps) = &attempt.approval_steps {
            self.run_approval_flow(approval_steps, wallet, request, required_payment)
                .await?;
        }

        self.run_purchase_flow(
            &attempt.purchase_steps,
            wallet,
            request,
            purchase_usd,
            requires_allowance,
            required_payment,
        )
        .await
    }

    /// 4-step approval flow: connect, check-balance, send-approval,
    /// confirm-approval. Completes before the purchase flow begins.
    async fn run_approval_flow(
        &self,
        steps: &Arc<RwLock<StepMachine>>,
        wallet: &dyn WalletAdapter,
        request: &PurchaseRequest,
        required_payment: u64,
    ) -> Result<(), CoordinatorError> {
        {
            let mut machine = steps.write().await;
            machine.set_current_step(StepId::Connect);
            machine.advance();
        }

        // Check balance
        if let Err(err) = self
            .gate
            .check_balance(&request.buyer_address, &self.evm_stable_token, required_payment)
            .await
        {
            steps.write().await.fail(StepId::CheckBalance, err.to_string());
            return Err(err);
        }

        // Fresh allowance; an already-sufficient allowance completes the
        // flow without an on-chain action
        let state = match self
            .gate
            .allowance_state(
                &request.buyer_address,
                &self.evm_sale_contract,
                &self.evm_stable_token,
                required_payment,
            )
            .await
        {
            Ok(state) => state,
            Err(err) => {
                steps.write().await.fail(StepId::CheckBalance, err.to_string());
                return Err(err);
            }
        };

        if state.is_sufficient() {
            let mut machine = steps.write().await;
            machine.advance();
            machine.advance();
            machine.advance();
            info!(owner = %request.buyer_address, "existing allowance covers the purchase");
            return Ok(());
        }

        steps.write().await.advance(); // send-approval loading

        let approval = ApprovalRequest::with_headroom(
            &request.buyer_address,
            &self.evm_sale_contract,
            &self.evm_stable_token,
            required_payment,
        );
        let reference = match wallet.submit_approval(&approval).await {
            Ok(reference) => reference,
            Err(err) => {
                steps.write().await.fail(StepId::SendApproval, err.to_string());
                return Err(err);
            }
        };

        steps.write().await.advance(); // confirm-approval loading

        if let Err(err) = self.gate.await_confirmation(&reference).await {
            steps
                .write()
                .await
                .fail(StepId::ConfirmApproval, err.to_string());
            return Err(err);
        }

        steps.write().await.advance(); // approval flow complete
        Ok(())
    }

    /// 5- or 6-step purchase flow: connect, (check-approval,) prepare, send,
    /// verify, record.
    async fn run_purchase_flow(
        &self,
        steps: &Arc<RwLock<StepMachine>>,
        wallet: &dyn WalletAdapter,
        request: &PurchaseRequest,
        purchase_usd: Decimal,
        requires_allowance: bool,
        required_payment: u64,
    ) -> Result<PurchaseOutcome, CoordinatorError> {
        {
            let mut machine = steps.write().await;
            machine.set_current_step(StepId::Connect);
            machine.advance();
        }

        if requires_allowance {
            // Fresh read; a stale cache here is how purchases get submitted
            // only to be rejected by the contract
            match self
                .gate
                .allowance_state(
                    &request.buyer_address,
                    &self.evm_sale_contract,
                    &self.evm_stable_token,
                    required_payment,
                )
                .await
            {
                Ok(state) if state.is_sufficient() => {
                    steps.write().await.advance();
                }
                Ok(state) => {
                    let err = CoordinatorError::InsufficientAllowance {
                        approved: state.current_allowance,
                        need: state.required_amount,
                    };
                    steps.write().await.fail(StepId::CheckApproval, err.to_string());
                    return Err(err);
                }
                Err(err) => {
                    steps.write().await.fail(StepId::CheckApproval, err.to_string());
                    return Err(err);
                }
            }
        }

        // Prepare: price the purchase and validate limits
        if purchase_usd < self.min_purchase_usd {
            let err = CoordinatorError::BelowMinimumPurchase {
                min: self.min_purchase_usd,
            };
            steps.write().await.fail(StepId::Prepare, err.to_string());
            return Err(err);
        }
        if purchase_usd > self.max_purchase_usd {
            let err = CoordinatorError::ExceedsMaximumPurchase {
                max: self.max_purchase_usd,
            };
            steps.write().await.fail(StepId::Prepare, err.to_string());
            return Err(err);
        }
        // Settlement-currency amount: stable units directly, native units at
        // the oracle's current price
        let pay_amount = match request.currency {
            SettlementCurrency::Stable => required_payment as u128,
            SettlementCurrency::Native => {
                let prices = self.oracle.prices(request.network).await;
                native_units(purchase_usd, prices.native, request.network)
            }
        };
        let prepared = PreparedPurchase {
            network: request.network,
            currency: request.currency,
            token_amount: request.token_amount,
            price_per_token_usd: request.price_per_token_usd,
            purchase_usd,
            pay_amount,
        };
        steps.write().await.advance(); // send loading

        // Send: the wallet signs and broadcasts
        let reference = match wallet.submit_purchase(&prepared).await {
            Ok(reference) => reference,
            Err(err) => {
                steps.write().await.fail(StepId::Send, err.to_string());
                return Err(err);
            }
        };
        info!(%reference, user = %request.session.user_id, "purchase submitted");
        steps.write().await.advance(); // verify loading

        // Verify: bounded polling against the chain, idempotent by reference
        let draft = PurchaseDraft {
            reference: reference.clone(),
            user_id: request.session.user_id.clone(),
            token_amount: request.token_amount,
            price_per_token_usd: request.price_per_token_usd,
        };
        let outcome = self.poller.verify(draft).await;
        if !outcome.verified {
            let err = outcome.failure.unwrap_or(CoordinatorError::VerificationFailed {
                reference: reference.reference.clone(),
            });
            steps.write().await.fail(StepId::Verify, err.to_string());
            return Err(err);
        }
        steps.write().await.advance(); // record loading

        // Record: the ledger row was written by the poller; settle the
        // referral bonus for the write that completed the purchase. A
        // settlement failure never fails the purchase.
        let record = match self.ledger.find(&reference.reference).await {
            Some(record) => record,
            None => {
                let err = CoordinatorError::LedgerWriteConflict {
                    reference: reference.reference.clone(),
                };
                steps.write().await.fail(StepId::Record, err.to_string());
                return Err(err);
            }
        };

        let referral_payment = if outcome.newly_completed {
            self.settlement
                .settle(&record, request.referrer.as_ref())
                .await
        } else {
            None
        };

        steps.write().await.advance(); // machine complete
        Ok(PurchaseOutcome {
            record,
            referral_payment,
        })
    }
}
