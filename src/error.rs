use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::Network;

/// Every failure the pipeline can surface. Purchase-flow variants carry
/// actionable text for the user; settlement variants are logged and never
/// unwind a recorded purchase.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("User rejected the signature request")]
    UserRejectedSignature,

    #[error("Insufficient token balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("Insufficient allowance: approved {approved}, need {need}")]
    InsufficientAllowance { approved: u64, need: u64 },

    /// Soft failure: the transaction was sent but never confirmed within the
    /// polling bound. It may still land on-chain, so the message tells the
    /// user to check a wallet or explorer, never that the purchase failed.
    #[error(
        "Transaction sent but unconfirmed after {attempts} checks - check your wallet or a block explorer before retrying"
    )]
    ConfirmationTimeout { attempts: u32 },

    #[error("Transaction {reference} failed on-chain")]
    VerificationFailed { reference: String },

    #[error("Purchase below minimum of ${min}")]
    BelowMinimumPurchase { min: Decimal },

    #[error("Purchase exceeds maximum of ${max}")]
    ExceedsMaximumPurchase { max: Decimal },

    /// Internal: two writers raced on the same reference. Resolved by the
    /// ledger's idempotent upsert and never surfaced to the user.
    #[error("Ledger write conflict for {reference}")]
    LedgerWriteConflict { reference: String },

    #[error("Bonus transfer failed: {reason}")]
    SettlementTransferFailed { reason: String },

    #[error("{network} does not support token allowances")]
    AllowanceUnsupported { network: Network },

    #[error("Invalid {kind} address: {value}")]
    InvalidAddress { kind: &'static str, value: String },

    #[error("Invalid transaction reference: {0}")]
    InvalidReference(String),

    #[error("Price oracle unavailable")]
    OracleUnavailable,

    #[error("Chain RPC error: {0}")]
    Rpc(String),
}

impl CoordinatorError {
    /// Transient errors consume a polling attempt instead of failing the
    /// purchase outright.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoordinatorError::Rpc(_))
    }
}
