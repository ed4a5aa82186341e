//! Approve-then-spend gate for ERC-20 settlement. A purchase with an
//! allowance-gated currency may only proceed once the spender's fresh
//! allowance covers the payment; stale reads are the classic way to submit
//! a purchase the contract then rejects, so nothing here is ever cached.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::error::CoordinatorError;
use crate::scheduler::Scheduler;
use crate::types::ChainTxStatus;
use crate::wallet::{ApprovalRequest, WalletAdapter};

/// Fresh allowance snapshot against a required amount.
#[derive(Debug, Clone)]
pub struct AllowanceState {
    pub owner: String,
    pub spender: String,
    pub current_allowance: u64,
    pub required_amount: u64,
}

impl AllowanceState {
    pub fn is_sufficient(&self) -> bool {
        self.current_allowance >= self.required_amount
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Existing allowance already covers the purchase; nothing was sent.
    AlreadyApproved,
    /// An approval transaction was sent and confirmed.
    Approved { reference: String },
}

pub struct AllowanceGate {
    chain: Arc<dyn ChainClient>,
    scheduler: Arc<dyn Scheduler>,
    max_attempts: u32,
    retry_interval: Duration,
}

impl AllowanceGate {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        scheduler: Arc<dyn Scheduler>,
        max_attempts: u32,
        retry_interval: Duration,
    ) -> Self {
        Self {
            chain,
            scheduler,
            max_attempts,
            retry_interval,
        }
    }

    /// Refetches the allowance and compares it against `required`. Always a
    /// fresh read.
    pub async fn is_approved(
        &self,
        owner: &str,
        spender: &str,
        token: &str,
        required: u64,
    ) -> Result<bool, CoordinatorError> {
        Ok(self
            .allowance_state(owner, spender, token, required)
            .await?
            .is_sufficient())
    }

    pub async fn allowance_state(
        &self,
        owner: &str,
        spender: &str,
        token: &str,
        required: u64,
    ) -> Result<AllowanceState, CoordinatorError> {
        let current = self.chain.token_allowance(owner, spender, token).await?;
        Ok(AllowanceState {
            owner: owner.to_string(),
            spender: spender.to_string(),
            current_allowance: current,
            required_amount: required,
        })
    }

    /// Makes sure `spender` can pull `required` base units from `owner`.
    ///
    /// 1. Refetch the balance; fail if the owner cannot pay at all.
    /// 2. Refetch the allowance; short-circuit when it already covers.
    /// 3. Submit an approval for 2x the requirement and wait for it to
    ///    confirm within the polling bound.
    pub async fn ensure_approval(
        &self,
        wallet: &dyn WalletAdapter,
        owner: &str,
        spender: &str,
        token: &str,
        required: u64,
    ) -> Result<ApprovalOutcome, CoordinatorError> {
        // 1. Balance check
        self.check_balance(owner, token, required).await?;

        // 2. Fresh allowance check
        let state = self.allowance_state(owner, spender, token, required).await?;
        if state.is_sufficient() {
            info!(owner, spender, allowance = state.current_allowance, "allowance already sufficient");
            return Ok(ApprovalOutcome::AlreadyApproved);
        }

        // 3. Submit approval with headroom and wait for confirmation
        let request = ApprovalRequest::with_headroom(owner, spender, token, required);
        let reference = wallet.submit_approval(&request).await?;
        info!(%reference, amount = request.amount, "approval submitted");

        self.await_confirmation(&reference).await?;
        Ok(ApprovalOutcome::Approved { reference })
    }

    /// Refetches the owner's token balance, failing when it cannot cover
    /// `required`.
    pub async fn check_balance(
        &self,
        owner: &str,
        token: &str,
        required: u64,
    ) -> Result<u64, CoordinatorError> {
        let balance = self.chain.token_balance(owner, token).await?;
        if balance < required {
            return Err(CoordinatorError::InsufficientBalance {
                have: balance,
                need: required,
            });
        }
        Ok(balance)
    }

    /// Waits for an approval transaction to confirm within the polling
    /// bound.
    pub async fn await_confirmation(&self, reference: &str) -> Result<(), CoordinatorError> {
        for attempt in 1..=self.max_attempts {
            match self.chain.transaction_status(reference).await {
                Ok(ChainTxStatus::Confirmed) => {
                    info!(%reference, attempt, "approval confirmed");
                    return Ok(());
                }
                Ok(ChainTxStatus::Failed) => {
                    return Err(CoordinatorError::VerificationFailed {
                        reference: reference.to_string(),
                    });
                }
                Ok(ChainTxStatus::Pending) => {}
                Err(err) if err.is_transient() => {
                    warn!(%reference, attempt, %err, "approval status check failed");
                }
                Err(err) => return Err(err),
            }
            if attempt < self.max_attempts {
                self.scheduler.sleep(self.retry_interval).await;
            }
        }

        // Soft failure: the approval may still confirm; the caller retries
        // rather than assuming loss of funds
        Err(CoordinatorError::ConfirmationTimeout {
            attempts: self.max_attempts,
        })
    }
}
