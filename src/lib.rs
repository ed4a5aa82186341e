//! Off-chain coordinator for the cross-chain token presale.
//!
//! The coordinator turns a wallet-submitted transaction on an EVM or Solana
//! chain into a confirmed, exactly-once-recorded purchase, then settles the
//! buyer's referral bonus or queues it until the referrer verifies a payout
//! wallet. Submission and signing stay in the user's wallet; this crate owns
//! everything after a transaction reference exists:
//!
//! - per-purchase step machine ([`steps`])
//! - approve-then-spend gating for allowance-based currencies ([`allowance`])
//! - bounded verification polling against chain RPC ([`poller`])
//! - the idempotent purchase ledger ([`ledger`])
//! - referral bonus settlement and deferred payout ([`referral`])
//! - the parametrized purchase pipeline that drives one attempt ([`pipeline`])
//! - request/response types for the verify endpoints ([`api`])

pub mod allowance;
pub mod api;
pub mod chain;
pub mod config;
pub mod constants;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod pipeline;
pub mod poller;
pub mod referral;
pub mod scheduler;
pub mod steps;
pub mod types;
pub mod wallet;

pub use config::CoordinatorConfig;
pub use error::CoordinatorError;
pub use types::{Network, SettlementCurrency, SessionContext, TxReference};
