//! Durable record of purchases keyed by transaction reference. The ledger is
//! the single source of truth for "already counted": at most one record ever
//! exists per reference, and a record moves PENDING to COMPLETED or FAILED
//! exactly once. Retried verifications and duplicate client submissions all
//! collapse into no-ops here.

use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::types::{usd_value, TxReference};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Failed,
}

impl PurchaseStatus {
    pub fn is_terminal(self) -> bool {
        self != PurchaseStatus::Pending
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseRecord {
    pub reference: TxReference,
    pub user_id: String,
    /// Token base units credited by this purchase.
    pub token_amount: u64,
    pub price_per_token_usd: Decimal,
    pub status: PurchaseStatus,
    pub created_at: i64,
}

impl PurchaseRecord {
    pub fn purchase_usd(&self) -> Decimal {
        usd_value(self.token_amount, self.price_per_token_usd)
    }
}

/// What an upsert did. `Created` with a terminal status and `Transitioned`
/// are the only outcomes that may trigger referral settlement; every other
/// outcome means an earlier write already owned the credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No record existed; this write created it.
    Created,
    /// An existing PENDING record moved to a terminal status.
    Transitioned,
    /// The record was already terminal; the write was a no-op.
    AlreadyTerminal,
    /// PENDING over PENDING; nothing changed.
    Unchanged,
}

/// Running sale totals, updated as purchases complete.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SaleStats {
    pub purchases_recorded: u64,
    pub purchases_completed: u64,
    pub tokens_sold: u64,
    pub usd_raised: Decimal,
}

#[async_trait]
pub trait PurchaseLedger: Send + Sync {
    /// Creates the record if absent; otherwise applies at most one
    /// PENDING-to-terminal transition. Terminal records never change, so
    /// concurrent writers converge on the first successful write.
    async fn upsert(&self, record: PurchaseRecord) -> UpsertOutcome;

    async fn find(&self, reference: &str) -> Option<PurchaseRecord>;

    async fn stats(&self) -> SaleStats;
}

/// In-memory ledger. Entry-level locking in the map makes each upsert for a
/// given reference atomic; no lock is ever held across an await.
pub struct InMemoryLedger {
    records: DashMap<String, PurchaseRecord>,
    stats: Mutex<SaleStats>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            stats: Mutex::new(SaleStats::default()),
        }
    }

    fn note_recorded(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.purchases_recorded += 1;
        }
    }

    fn note_completed(&self, token_amount: u64, usd: Decimal) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.purchases_completed += 1;
            stats.tokens_sold = stats.tokens_sold.saturating_add(token_amount);
            stats.usd_raised += usd;
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PurchaseLedger for InMemoryLedger {
    async fn upsert(&self, record: PurchaseRecord) -> UpsertOutcome {
        let key = record.reference.reference.clone();

        match self.records.entry(key.clone()) {
            Entry::Vacant(slot) => {
                let completed = record.status == PurchaseStatus::Completed;
                let token_amount = record.token_amount;
                let usd = record.purchase_usd();
                slot.insert(record);
                self.note_recorded();
                if completed {
                    self.note_completed(token_amount, usd);
                }
                UpsertOutcome::Created
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                if existing.status.is_terminal() {
                    // First terminal write won; later writers are no-ops
                    info!(reference = %key, status = ?existing.status, "duplicate write ignored");
                    UpsertOutcome::AlreadyTerminal
                } else if record.status.is_terminal() {
                    existing.status = record.status;
                    let token_amount = existing.token_amount;
                    let usd = existing.purchase_usd();
                    let completed = record.status == PurchaseStatus::Completed;
                    drop(slot);
                    if completed {
                        self.note_completed(token_amount, usd);
                    }
                    info!(reference = %key, status = ?record.status, "purchase recorded");
                    UpsertOutcome::Transitioned
                } else {
                    UpsertOutcome::Unchanged
                }
            }
        }
    }

    async fn find(&self, reference: &str) -> Option<PurchaseRecord> {
        self.records.get(reference).map(|r| r.clone())
    }

    async fn stats(&self) -> SaleStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}
