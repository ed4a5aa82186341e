//! Per-purchase step machine. One instance lives for exactly one attempt;
//! the UI observes it and a failed machine is thrown away, never resumed.

use serde::Serialize;

use crate::types::{Network, SettlementCurrency};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepId {
    Connect,
    CheckBalance,
    SendApproval,
    ConfirmApproval,
    CheckApproval,
    Prepare,
    Send,
    Verify,
    Record,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseStep {
    pub id: StepId,
    pub title: &'static str,
    pub description: &'static str,
    pub status: StepStatus,
    pub error_message: Option<String>,
}

impl PurchaseStep {
    fn new(id: StepId, title: &'static str, description: &'static str) -> Self {
        Self {
            id,
            title,
            description,
            status: StepStatus::Pending,
            error_message: None,
        }
    }
}

/// Ordered step sequence for one purchase attempt. Callers drive monotonic
/// progression; the machine records status and terminal flags but does not
/// validate ordering or abort on its own.
#[derive(Debug, Clone, Serialize)]
pub struct StepMachine {
    steps: Vec<PurchaseStep>,
    current: usize,
    is_complete: bool,
    is_error: bool,
}

impl StepMachine {
    fn new(steps: Vec<PurchaseStep>) -> Self {
        Self {
            steps,
            current: 0,
            is_complete: false,
            is_error: false,
        }
    }

    /// 5-step flow for currencies without an allowance gate.
    pub fn buy_flow() -> Self {
        Self::new(vec![
            PurchaseStep::new(StepId::Connect, "Connect wallet", "Confirm the wallet connection"),
            PurchaseStep::new(StepId::Prepare, "Prepare purchase", "Price the purchase and validate limits"),
            PurchaseStep::new(StepId::Send, "Send transaction", "Approve the transaction in your wallet"),
            PurchaseStep::new(StepId::Verify, "Verify transaction", "Wait for on-chain confirmation"),
            PurchaseStep::new(StepId::Record, "Record purchase", "Credit the purchase to your account"),
        ])
    }

    /// 4-step approval flow that must finish before an allowance-gated
    /// purchase begins.
    pub fn approval_flow() -> Self {
        Self::new(vec![
            PurchaseStep::new(StepId::Connect, "Connect wallet", "Confirm the wallet connection"),
            PurchaseStep::new(StepId::CheckBalance, "Check balance", "Verify you hold enough tokens"),
            PurchaseStep::new(StepId::SendApproval, "Send approval", "Approve spending in your wallet"),
            PurchaseStep::new(StepId::ConfirmApproval, "Confirm approval", "Wait for the approval to confirm"),
        ])
    }

    /// 6-step purchase flow used after the approval flow completes.
    pub fn approval_purchase_flow() -> Self {
        Self::new(vec![
            PurchaseStep::new(StepId::Connect, "Connect wallet", "Confirm the wallet connection"),
            PurchaseStep::new(StepId::CheckApproval, "Check approval", "Verify the spending approval"),
            PurchaseStep::new(StepId::Prepare, "Prepare purchase", "Price the purchase and validate limits"),
            PurchaseStep::new(StepId::Send, "Send transaction", "Approve the transaction in your wallet"),
            PurchaseStep::new(StepId::Verify, "Verify transaction", "Wait for on-chain confirmation"),
            PurchaseStep::new(StepId::Record, "Record purchase", "Credit the purchase to your account"),
        ])
    }

    /// Flow template for a `{network, currency}` pair.
    pub fn for_purchase(network: Network, currency: SettlementCurrency) -> Self {
        if currency.requires_allowance(network) {
            Self::approval_purchase_flow()
        } else {
            Self::buy_flow()
        }
    }

    /// Marks `id` as the loading step. No ordering validation; the caller
    /// owns monotonic progression.
    pub fn set_current_step(&mut self, id: StepId) {
        if let Some(index) = self.steps.iter().position(|s| s.id == id) {
            self.steps[index].status = StepStatus::Loading;
            self.current = index;
        }
    }

    /// Marks the current step successful and the next one loading. With no
    /// next step the machine completes.
    pub fn advance(&mut self) {
        if self.is_error || self.is_complete {
            return;
        }
        if let Some(step) = self.steps.get_mut(self.current) {
            step.status = StepStatus::Success;
        }
        match self.steps.get_mut(self.current + 1) {
            Some(next) => {
                next.status = StepStatus::Loading;
                self.current += 1;
            }
            None => self.is_complete = true,
        }
    }

    /// Marks `id` failed. Other steps keep their status; the caller stops
    /// driving the machine after this.
    pub fn fail(&mut self, id: StepId, message: impl Into<String>) {
        if let Some(step) = self.steps.iter_mut().find(|s| s.id == id) {
            step.status = StepStatus::Error;
            step.error_message = Some(message.into());
        }
        self.is_error = true;
    }

    pub fn complete(&mut self) {
        if let Some(step) = self.steps.get_mut(self.current) {
            if step.status == StepStatus::Loading {
                step.status = StepStatus::Success;
            }
        }
        self.is_complete = true;
    }

    pub fn reset(&mut self) {
        for step in &mut self.steps {
            step.status = StepStatus::Pending;
            step.error_message = None;
        }
        self.current = 0;
        self.is_complete = false;
        self.is_error = false;
    }

    pub fn steps(&self) -> &[PurchaseStep] {
        &self.steps
    }

    pub fn current_step(&self) -> Option<&PurchaseStep> {
        self.steps.get(self.current)
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}
