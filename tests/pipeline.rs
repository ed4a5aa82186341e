//! End-to-end pipeline tests with scripted collaborators: a scripted chain
//! client, a no-delay scheduler, and a recording bonus sender. Every path
//! runs the real poller, ledger, settlement engine and reconciler.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use presale_coordinator::allowance::AllowanceGate;
use presale_coordinator::chain::{ChainClient, ChainRouter};
use presale_coordinator::constants::{REFERRAL_POOL_CAP, TOKEN_DECIMALS};
use presale_coordinator::error::CoordinatorError;
use presale_coordinator::ledger::{InMemoryLedger, PurchaseLedger, PurchaseStatus};
use presale_coordinator::oracle::{PriceOracle, PricePair};
use presale_coordinator::pipeline::{PurchasePipeline, PurchaseRequest};
use presale_coordinator::poller::{PurchaseDraft, VerificationPoller};
use presale_coordinator::referral::{
    BonusSender, InMemoryPaymentStore, PaymentStatus, PaymentStore, PendingPaymentReconciler,
    PolicyKind, ReferralPayment, ReferralPolicy, ReferrerProfile, SettlementEngine,
};
use presale_coordinator::scheduler::{Clock, Scheduler};
use presale_coordinator::types::{ChainTxStatus, Network, SessionContext, SettlementCurrency, TxReference};
use presale_coordinator::wallet::{ApprovalRequest, PreparedPurchase, WalletAdapter};
use uuid::Uuid;

// =====================================================
// SCRIPTED COLLABORATORS
// =====================================================

#[derive(Clone, Copy)]
enum Scripted {
    Pending,
    Confirmed,
    Failed,
    RpcError,
}

struct ScriptedChainClient {
    network: Network,
    statuses: Mutex<VecDeque<Scripted>>,
    status_calls: AtomicU32,
    allowances: Mutex<VecDeque<u64>>,
    allowance_calls: AtomicU32,
    balance: u64,
}

impl ScriptedChainClient {
    fn new(network: Network) -> Self {
        Self {
            network,
            statuses: Mutex::new(VecDeque::new()),
            status_calls: AtomicU32::new(0),
            allowances: Mutex::new(VecDeque::new()),
            allowance_calls: AtomicU32::new(0),
            balance: 0,
        }
    }

    fn with_statuses(self, statuses: &[Scripted]) -> Self {
        *self.statuses.lock().unwrap() = statuses.iter().copied().collect();
        self
    }

    fn with_allowances(self, allowances: &[u64]) -> Self {
        *self.allowances.lock().unwrap() = allowances.iter().copied().collect();
        self
    }

    fn with_balance(mut self, balance: u64) -> Self {
        self.balance = balance;
        self
    }
}

#[async_trait]
impl ChainClient for ScriptedChainClient {
    fn network(&self) -> Network {
        self.network
    }

    async fn transaction_status(&self, _reference: &str) -> Result<ChainTxStatus, CoordinatorError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Pending);
        match next {
            Scripted::Pending => Ok(ChainTxStatus::Pending),
            Scripted::Confirmed => Ok(ChainTxStatus::Confirmed),
            Scripted::Failed => Ok(ChainTxStatus::Failed),
            Scripted::RpcError => Err(CoordinatorError::Rpc("scripted outage".to_string())),
        }
    }

    async fn token_allowance(
        &self,
        _owner: &str,
        _spender: &str,
        _token: &str,
    ) -> Result<u64, CoordinatorError> {
        self.allowance_calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.allowances.lock().unwrap();
        // The last scripted value repeats, like a chain that settled
        if queue.len() > 1 {
            Ok(queue.pop_front().unwrap())
        } else {
            Ok(queue.front().copied().unwrap_or(0))
        }
    }

    async fn token_balance(&self, _owner: &str, _token: &str) -> Result<u64, CoordinatorError> {
        Ok(self.balance)
    }
}

struct CountingScheduler {
    sleeps: AtomicU32,
}

#[async_trait]
impl Scheduler for CountingScheduler {
    async fn sleep(&self, _duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
    }
}

struct FixedClock;

impl Clock for FixedClock {
    fn now_unix(&self) -> i64 {
        1_700_000_000
    }
}

struct StaticOracle {
    bonus_price: Decimal,
}

#[async_trait]
impl PriceOracle for StaticOracle {
    async fn prices(&self, _network: Network) -> PricePair {
        PricePair {
            native: dec!(150.00),
            stable: dec!(1.00),
        }
    }

    async fn bonus_token_price(&self) -> Decimal {
        self.bonus_price
    }
}

struct RecordingSender {
    fail: bool,
    counter: AtomicU32,
    transfers: Mutex<Vec<(String, u64, u64)>>,
}

impl RecordingSender {
    fn new() -> Self {
        Self {
            fail: false,
            counter: AtomicU32::new(0),
            transfers: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BonusSender for RecordingSender {
    async fn send_split(
        &self,
        referrer_wallet: &str,
        referrer_amount: u64,
        second_tier_amount: u64,
    ) -> Result<String, CoordinatorError> {
        if self.fail {
            return Err(CoordinatorError::SettlementTransferFailed {
                reason: "scripted transfer failure".to_string(),
            });
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.transfers.lock().unwrap().push((
            referrer_wallet.to_string(),
            referrer_amount,
            second_tier_amount,
        ));
        Ok(format!("payout-sig-{n}"))
    }
}

struct TestWallet {
    reference: TxReference,
    reject: bool,
    purchase_calls: AtomicU32,
    approved_amounts: Mutex<Vec<u64>>,
}

impl TestWallet {
    fn new(reference: TxReference) -> Self {
        Self {
            reference,
            reject: false,
            purchase_calls: AtomicU32::new(0),
            approved_amounts: Mutex::new(Vec::new()),
        }
    }

    fn rejecting(reference: TxReference) -> Self {
        Self {
            reject: true,
            ..Self::new(reference)
        }
    }
}

#[async_trait]
impl WalletAdapter for TestWallet {
    async fn submit_purchase(
        &self,
        _prepared: &PreparedPurchase,
    ) -> Result<TxReference, CoordinatorError> {
        self.purchase_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(CoordinatorError::UserRejectedSignature);
        }
        Ok(self.reference.clone())
    }

    async fn submit_approval(
        &self,
        request: &ApprovalRequest,
    ) -> Result<String, CoordinatorError> {
        self.approved_amounts.lock().unwrap().push(request.amount);
        Ok("0xapproval".to_string())
    }
}

// =====================================================
// HARNESS
// =====================================================

struct Harness {
    ledger: Arc<InMemoryLedger>,
    payments: Arc<InMemoryPaymentStore>,
    sender: Arc<RecordingSender>,
    scheduler: Arc<CountingScheduler>,
    evm: Arc<ScriptedChainClient>,
    solana: Arc<ScriptedChainClient>,
    poller: Arc<VerificationPoller>,
    settlement: Arc<SettlementEngine>,
    pipeline: PurchasePipeline,
}

fn harness(evm: ScriptedChainClient, solana: ScriptedChainClient) -> Harness {
    let ledger = Arc::new(InMemoryLedger::new());
    let payments = Arc::new(InMemoryPaymentStore::new());
    let sender = Arc::new(RecordingSender::new());
    let scheduler = Arc::new(CountingScheduler {
        sleeps: AtomicU32::new(0),
    });
    let clock = Arc::new(FixedClock);
    let evm = Arc::new(evm);
    let solana = Arc::new(solana);

    let router = ChainRouter::new(evm.clone(), solana.clone());
    let poller = Arc::new(VerificationPoller::new(
        ledger.clone(),
        router,
        scheduler.clone(),
        clock,
        30,
        Duration::from_secs(5),
    ));
    let gate = Arc::new(AllowanceGate::new(
        evm.clone(),
        scheduler.clone(),
        30,
        Duration::from_secs(5),
    ));
    let settlement = Arc::new(SettlementEngine::new(
        Arc::new(StaticOracle {
            bonus_price: dec!(8.00),
        }),
        payments.clone(),
        sender.clone(),
        ReferralPolicy::from_kind(PolicyKind::Flat),
        REFERRAL_POOL_CAP,
        "BONUS",
    ));
    let pipeline = PurchasePipeline::new(
        ledger.clone(),
        poller.clone(),
        gate,
        settlement.clone(),
        Arc::new(StaticOracle {
            bonus_price: dec!(8.00),
        }),
        "0xsale-contract",
        "0xstable-token",
        dec!(1.00),
        dec!(50000.00),
    );

    Harness {
        ledger,
        payments,
        sender,
        scheduler,
        evm,
        solana,
        poller,
        settlement,
        pipeline,
    }
}

fn solana_reference(reference: &str) -> TxReference {
    TxReference::new(Network::Solana, SettlementCurrency::Native, reference)
}

fn request(reference_network: Network, currency: SettlementCurrency) -> PurchaseRequest {
    PurchaseRequest {
        session: SessionContext {
            user_id: "buyer-1".to_string(),
            referrer_id: Some("referrer-1".to_string()),
        },
        network: reference_network,
        currency,
        token_amount: 1000 * TOKEN_DECIMALS,
        price_per_token_usd: dec!(0.014),
        buyer_address: "0xbuyer".to_string(),
        referrer: Some(ReferrerProfile {
            referrer_id: "referrer-1".to_string(),
            payout_wallet: None,
        }),
    }
}

fn pending_payment(referrer: &str, whole_tokens: u64) -> ReferralPayment {
    let amount = whole_tokens * TOKEN_DECIMALS;
    ReferralPayment {
        id: Uuid::new_v4(),
        referrer_id: referrer.to_string(),
        amount,
        second_tier_amount: amount / 9,
        amount_usd: Decimal::from(whole_tokens) * dec!(8.00),
        status: PaymentStatus::Pending,
        transaction_signature: None,
        payment_currency: "BONUS".to_string(),
    }
}

// =====================================================
// VERIFICATION & LEDGER PROPERTIES
// =====================================================

#[tokio::test]
async fn verifying_the_same_reference_twice_records_and_settles_once() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana).with_statuses(&[Scripted::Confirmed]),
    );
    let wallet = TestWallet::new(solana_reference("sig-dup"));
    let request = request(Network::Solana, SettlementCurrency::Native);

    let first = h.pipeline.begin(request.clone());
    let outcome = h.pipeline.execute(&first, &wallet).await.unwrap();
    assert_eq!(outcome.record.status, PurchaseStatus::Completed);
    assert!(outcome.referral_payment.is_some());

    // Same reference resubmitted: the ledger answers, the chain is not
    // polled again, and no second bonus is computed
    let chain_calls_before = h.solana.status_calls.load(Ordering::SeqCst);
    let second = h.pipeline.begin(request);
    let outcome = h.pipeline.execute(&second, &wallet).await.unwrap();
    assert_eq!(outcome.record.status, PurchaseStatus::Completed);
    assert!(outcome.referral_payment.is_none());
    assert_eq!(h.solana.status_calls.load(Ordering::SeqCst), chain_calls_before);

    let stats = h.ledger.stats().await;
    assert_eq!(stats.purchases_recorded, 1);
    assert_eq!(stats.purchases_completed, 1);
    assert_eq!(
        h.payments.pending_for_referrer("referrer-1").await.len(),
        1
    );
    assert_eq!(h.sender.counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn confirms_on_the_thirtieth_attempt() {
    let mut script = vec![Scripted::Pending; 29];
    script.push(Scripted::Confirmed);
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana).with_statuses(&script),
    );

    let draft = PurchaseDraft {
        reference: solana_reference("sig-slow"),
        user_id: "buyer-1".to_string(),
        token_amount: 1000 * TOKEN_DECIMALS,
        price_per_token_usd: dec!(0.014),
    };
    let outcome = h.poller.verify(draft).await;

    assert!(outcome.verified);
    assert!(outcome.newly_completed);
    assert_eq!(outcome.status, PurchaseStatus::Completed);
    // 30 polls, 29 waits, then polling stops
    assert_eq!(h.solana.status_calls.load(Ordering::SeqCst), 30);
    assert_eq!(h.scheduler.sleeps.load(Ordering::SeqCst), 29);
    assert_eq!(
        h.ledger.find("sig-slow").await.unwrap().status,
        PurchaseStatus::Completed
    );
}

#[tokio::test]
async fn exhausted_polling_marks_failed_and_queues_no_bonus() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana), // never confirms
    );
    let wallet = TestWallet::new(solana_reference("sig-stuck"));
    let attempt = h.pipeline.begin(request(Network::Solana, SettlementCurrency::Native));

    let err = h.pipeline.execute(&attempt, &wallet).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::ConfirmationTimeout { attempts: 30 }
    ));
    // Soft-failure phrasing: sent but unconfirmed, never "failed"
    assert!(err.to_string().contains("sent but unconfirmed"));

    assert_eq!(
        h.ledger.find("sig-stuck").await.unwrap().status,
        PurchaseStatus::Failed
    );
    assert!(h.payments.pending_for_referrer("referrer-1").await.is_empty());
    assert_eq!(h.payments.total_bonus_issued().await, 0);
}

#[tokio::test]
async fn chain_reported_failure_is_terminal() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana).with_statuses(&[Scripted::Failed]),
    );
    let wallet = TestWallet::new(solana_reference("sig-bad"));
    let attempt = h.pipeline.begin(request(Network::Solana, SettlementCurrency::Native));

    let err = h.pipeline.execute(&attempt, &wallet).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::VerificationFailed { .. }));
    assert_eq!(
        h.ledger.find("sig-bad").await.unwrap().status,
        PurchaseStatus::Failed
    );
}

#[tokio::test]
async fn transient_rpc_errors_consume_attempts_not_the_purchase() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana).with_statuses(&[
            Scripted::RpcError,
            Scripted::RpcError,
            Scripted::Confirmed,
        ]),
    );

    let draft = PurchaseDraft {
        reference: solana_reference("sig-flaky"),
        user_id: "buyer-1".to_string(),
        token_amount: 1000 * TOKEN_DECIMALS,
        price_per_token_usd: dec!(0.014),
    };
    let outcome = h.poller.verify(draft).await;

    assert!(outcome.verified);
    assert_eq!(h.solana.status_calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.scheduler.sleeps.load(Ordering::SeqCst), 2);
}

// =====================================================
// ALLOWANCE GATE PROPERTIES
// =====================================================

#[tokio::test]
async fn allowance_gated_purchase_approves_twice_the_payment_then_buys() {
    // $14.00 purchase = 14_000_000 stable base units
    let required = 14_000_000_u64;
    let h = harness(
        ScriptedChainClient::new(Network::Evm)
            .with_balance(100_000_000)
            .with_allowances(&[0, 2 * required])
            .with_statuses(&[Scripted::Confirmed, Scripted::Confirmed]),
        ScriptedChainClient::new(Network::Solana),
    );
    let wallet = TestWallet::new(TxReference::new(
        Network::Evm,
        SettlementCurrency::Stable,
        "0xpurchase",
    ));
    let attempt = h.pipeline.begin(request(Network::Evm, SettlementCurrency::Stable));
    assert!(attempt.approval_steps.is_some());

    let outcome = h.pipeline.execute(&attempt, &wallet).await.unwrap();
    assert_eq!(outcome.record.status, PurchaseStatus::Completed);

    // The wallet was asked to approve exactly 2x the payment
    assert_eq!(
        h.evm.allowance_calls.load(Ordering::SeqCst),
        2,
        "one fresh read per flow, nothing cached"
    );
    assert_eq!(*wallet.approved_amounts.lock().unwrap(), vec![2 * required]);
    assert!(attempt.approval_steps.unwrap().read().await.is_complete());
    assert!(attempt.purchase_steps.read().await.is_complete());
}

#[tokio::test]
async fn purchase_is_not_submitted_while_allowance_is_short() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm)
            .with_balance(100_000_000)
            .with_allowances(&[0]) // never grows, approval never lands
            .with_statuses(&[Scripted::Confirmed]),
        ScriptedChainClient::new(Network::Solana),
    );
    let wallet = TestWallet::new(TxReference::new(
        Network::Evm,
        SettlementCurrency::Stable,
        "0xnever",
    ));
    let attempt = h.pipeline.begin(request(Network::Evm, SettlementCurrency::Stable));

    let err = h.pipeline.execute(&attempt, &wallet).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InsufficientAllowance { .. }));
    assert_eq!(wallet.purchase_calls.load(Ordering::SeqCst), 0);
    assert!(attempt.purchase_steps.read().await.is_error());
}

#[tokio::test]
async fn ensure_approval_short_circuits_and_submits_with_headroom() {
    use presale_coordinator::allowance::ApprovalOutcome;

    let scheduler = Arc::new(CountingScheduler {
        sleeps: AtomicU32::new(0),
    });

    // Already approved: no on-chain action
    let chain = Arc::new(
        ScriptedChainClient::new(Network::Evm)
            .with_balance(100_000_000)
            .with_allowances(&[50_000_000]),
    );
    let gate = AllowanceGate::new(chain, scheduler.clone(), 30, Duration::from_secs(5));
    let wallet = TestWallet::new(TxReference::new(
        Network::Evm,
        SettlementCurrency::Stable,
        "0xunused",
    ));
    let outcome = gate
        .ensure_approval(&wallet, "0xbuyer", "0xsale-contract", "0xstable-token", 14_000_000)
        .await
        .unwrap();
    assert_eq!(outcome, ApprovalOutcome::AlreadyApproved);
    assert!(wallet.approved_amounts.lock().unwrap().is_empty());

    // Short allowance: approval goes out for 2x and waits to confirm
    let chain = Arc::new(
        ScriptedChainClient::new(Network::Evm)
            .with_balance(100_000_000)
            .with_allowances(&[0])
            .with_statuses(&[Scripted::Pending, Scripted::Confirmed]),
    );
    let gate = AllowanceGate::new(chain, scheduler.clone(), 30, Duration::from_secs(5));
    let outcome = gate
        .ensure_approval(&wallet, "0xbuyer", "0xsale-contract", "0xstable-token", 14_000_000)
        .await
        .unwrap();
    assert!(matches!(outcome, ApprovalOutcome::Approved { .. }));
    assert_eq!(*wallet.approved_amounts.lock().unwrap(), vec![28_000_000]);
}

#[tokio::test]
async fn insufficient_balance_fails_before_any_approval() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm).with_balance(1_000), // far short of $14
        ScriptedChainClient::new(Network::Solana),
    );
    let wallet = TestWallet::new(TxReference::new(
        Network::Evm,
        SettlementCurrency::Stable,
        "0xpoor",
    ));
    let attempt = h.pipeline.begin(request(Network::Evm, SettlementCurrency::Stable));

    let err = h.pipeline.execute(&attempt, &wallet).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::InsufficientBalance { .. }));
    assert!(wallet.approved_amounts.lock().unwrap().is_empty());
    assert_eq!(wallet.purchase_calls.load(Ordering::SeqCst), 0);
}

// =====================================================
// REFERRAL SETTLEMENT PROPERTIES
// =====================================================

#[tokio::test]
async fn unverified_referrer_queues_exactly_one_pending_payment() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana).with_statuses(&[Scripted::Confirmed]),
    );
    let wallet = TestWallet::new(solana_reference("sig-ref"));
    let attempt = h.pipeline.begin(request(Network::Solana, SettlementCurrency::Native));

    let outcome = h.pipeline.execute(&attempt, &wallet).await.unwrap();
    let payment = outcome.referral_payment.unwrap();

    // purchase_usd 14.00, bonus_usd 1.40, bonus price 8.00:
    // bonus 0.175 tokens, second tier 0.0175, referrer 0.1575
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, 157_500_000);
    assert_eq!(payment.second_tier_amount, 17_500_000);
    assert_eq!(payment.amount_usd, dec!(1.26));
    assert!(payment.transaction_signature.is_none());
    // No transfer was attempted
    assert_eq!(h.sender.counter.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn verified_referrer_is_paid_immediately_with_one_transaction() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana).with_statuses(&[Scripted::Confirmed]),
    );
    let wallet = TestWallet::new(solana_reference("sig-paid"));
    let mut req = request(Network::Solana, SettlementCurrency::Native);
    req.referrer = Some(ReferrerProfile {
        referrer_id: "referrer-1".to_string(),
        payout_wallet: Some("ReferrerWallet111".to_string()),
    });
    let attempt = h.pipeline.begin(req);

    let outcome = h.pipeline.execute(&attempt, &wallet).await.unwrap();
    let payment = outcome.referral_payment.unwrap();

    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.transaction_signature.as_deref(), Some("payout-sig-1"));
    let transfers = h.sender.transfers.lock().unwrap();
    assert_eq!(
        *transfers,
        vec![("ReferrerWallet111".to_string(), 157_500_000, 17_500_000)]
    );
}

#[tokio::test]
async fn purchase_without_referrer_settles_nothing() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana).with_statuses(&[Scripted::Confirmed]),
    );
    let wallet = TestWallet::new(solana_reference("sig-solo"));
    let mut req = request(Network::Solana, SettlementCurrency::Native);
    req.session.referrer_id = None;
    req.referrer = None;
    let attempt = h.pipeline.begin(req);

    let outcome = h.pipeline.execute(&attempt, &wallet).await.unwrap();
    assert_eq!(outcome.record.status, PurchaseStatus::Completed);
    assert!(outcome.referral_payment.is_none());
    assert_eq!(h.payments.total_bonus_issued().await, 0);
}

#[tokio::test]
async fn failed_bonus_transfer_never_unwinds_the_purchase() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana).with_statuses(&[Scripted::Confirmed]),
    );
    // Replace the sender with a failing one
    let failing = Arc::new(RecordingSender {
        fail: true,
        counter: AtomicU32::new(0),
        transfers: Mutex::new(Vec::new()),
    });
    let settlement = SettlementEngine::new(
        Arc::new(StaticOracle {
            bonus_price: dec!(8.00),
        }),
        h.payments.clone(),
        failing,
        ReferralPolicy::from_kind(PolicyKind::Flat),
        REFERRAL_POOL_CAP,
        "BONUS",
    );

    let draft = PurchaseDraft {
        reference: solana_reference("sig-settle-fail"),
        user_id: "buyer-1".to_string(),
        token_amount: 1000 * TOKEN_DECIMALS,
        price_per_token_usd: dec!(0.014),
    };
    let outcome = h.poller.verify(draft).await;
    assert!(outcome.newly_completed);

    let record = h.ledger.find("sig-settle-fail").await.unwrap();
    let payment = settlement
        .settle(
            &record,
            Some(&ReferrerProfile {
                referrer_id: "referrer-1".to_string(),
                payout_wallet: Some("ReferrerWallet111".to_string()),
            }),
        )
        .await
        .unwrap();

    assert_eq!(payment.status, PaymentStatus::Failed);
    // The purchase record is untouched by the settlement failure
    assert_eq!(
        h.ledger.find("sig-settle-fail").await.unwrap().status,
        PurchaseStatus::Completed
    );
}

#[tokio::test]
async fn exhausted_bonus_pool_skips_the_bonus_and_keeps_the_purchase() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana).with_statuses(&[Scripted::Confirmed]),
    );
    // A pool cap smaller than the bonus this purchase would earn
    let settlement = SettlementEngine::new(
        Arc::new(StaticOracle {
            bonus_price: dec!(8.00),
        }),
        h.payments.clone(),
        h.sender.clone(),
        ReferralPolicy::from_kind(PolicyKind::Flat),
        100_000_000, // < 175_000_000
        "BONUS",
    );

    let draft = PurchaseDraft {
        reference: solana_reference("sig-capped"),
        user_id: "buyer-1".to_string(),
        token_amount: 1000 * TOKEN_DECIMALS,
        price_per_token_usd: dec!(0.014),
    };
    h.poller.verify(draft).await;
    let record = h.ledger.find("sig-capped").await.unwrap();

    let payment = settlement
        .settle(
            &record,
            Some(&ReferrerProfile {
                referrer_id: "referrer-1".to_string(),
                payout_wallet: None,
            }),
        )
        .await;

    assert!(payment.is_none());
    assert_eq!(
        h.ledger.find("sig-capped").await.unwrap().status,
        PurchaseStatus::Completed
    );
}

// =====================================================
// PENDING PAYMENT RECONCILER PROPERTIES
// =====================================================

#[tokio::test]
async fn reconciler_pays_every_pending_bonus_with_distinct_signatures() {
    let payments = Arc::new(InMemoryPaymentStore::new());
    let sender = Arc::new(RecordingSender::new());
    let reconciler = PendingPaymentReconciler::new(payments.clone(), sender.clone());

    let mut ids = Vec::new();
    for whole_tokens in [5_u64, 7, 2] {
        let row = pending_payment("referrer-1", whole_tokens);
        ids.push(row.id);
        payments.insert(row).await;
    }

    let report = reconciler
        .on_wallet_verified("referrer-1", "ReferrerWallet111")
        .await;
    assert_eq!(report.processed, 3);
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);

    let mut signatures = Vec::new();
    for id in ids {
        let row = payments.find(id).await.unwrap();
        assert_eq!(row.status, PaymentStatus::Completed);
        signatures.push(row.transaction_signature.unwrap());
    }
    signatures.sort();
    signatures.dedup();
    assert_eq!(signatures.len(), 3, "every payout got its own transaction");
}

#[tokio::test]
async fn concurrent_reconcile_triggers_pay_each_row_once() {
    let payments = Arc::new(InMemoryPaymentStore::new());
    let sender = Arc::new(RecordingSender::new());
    let reconciler = PendingPaymentReconciler::new(payments.clone(), sender.clone());

    let row = pending_payment("referrer-1", 5);
    let id = row.id;
    payments.insert(row).await;

    // The user re-verifies while the first trigger is still running
    let (first, second) = tokio::join!(
        reconciler.on_wallet_verified("referrer-1", "ReferrerWallet111"),
        reconciler.on_wallet_verified("referrer-1", "ReferrerWallet111"),
    );

    assert_eq!(first.processed + second.processed, 1);
    assert_eq!(first.succeeded + second.succeeded, 1);
    assert_eq!(sender.counter.load(Ordering::SeqCst), 1);
    assert_eq!(
        payments.find(id).await.unwrap().status,
        PaymentStatus::Completed
    );
}

#[tokio::test]
async fn reconciler_failure_marks_only_that_row_and_keeps_going() {
    let payments = Arc::new(InMemoryPaymentStore::new());
    let sender = Arc::new(RecordingSender {
        fail: true,
        counter: AtomicU32::new(0),
        transfers: Mutex::new(Vec::new()),
    });
    let reconciler = PendingPaymentReconciler::new(payments.clone(), sender);

    let row = pending_payment("referrer-1", 5);
    let id = row.id;
    payments.insert(row).await;

    let report = reconciler
        .on_wallet_verified("referrer-1", "ReferrerWallet111")
        .await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 1);
    // FAILED rows wait for a manual re-trigger, the automatic path skips them
    assert_eq!(payments.find(id).await.unwrap().status, PaymentStatus::Failed);
    let rerun = reconciler
        .on_wallet_verified("referrer-1", "ReferrerWallet111")
        .await;
    assert_eq!(rerun.processed, 0);
}

#[tokio::test]
async fn rejected_signature_stops_the_attempt_before_any_record() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana),
    );
    let wallet = TestWallet::rejecting(solana_reference("sig-rejected"));
    let attempt = h.pipeline.begin(request(Network::Solana, SettlementCurrency::Native));

    let err = h.pipeline.execute(&attempt, &wallet).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::UserRejectedSignature));
    assert!(attempt.purchase_steps.read().await.is_error());
    // Nothing was broadcast, so nothing may be recorded or polled
    assert!(h.ledger.find("sig-rejected").await.is_none());
    assert_eq!(h.solana.status_calls.load(Ordering::SeqCst), 0);
}

// =====================================================
// PURCHASE LIMITS
// =====================================================

#[tokio::test]
async fn purchase_below_the_minimum_is_rejected_at_prepare() {
    let h = harness(
        ScriptedChainClient::new(Network::Evm),
        ScriptedChainClient::new(Network::Solana),
    );
    // Rebuild the pipeline with the production $25 minimum
    let gate = Arc::new(AllowanceGate::new(
        h.evm.clone(),
        h.scheduler.clone(),
        30,
        Duration::from_secs(5),
    ));
    let pipeline = PurchasePipeline::new(
        h.ledger.clone(),
        h.poller.clone(),
        gate,
        h.settlement.clone(),
        Arc::new(StaticOracle {
            bonus_price: dec!(8.00),
        }),
        "0xsale-contract",
        "0xstable-token",
        dec!(25.00),
        dec!(50000.00),
    );
    let wallet = TestWallet::new(solana_reference("sig-small"));
    let attempt = pipeline.begin(request(Network::Solana, SettlementCurrency::Native));

    // $14.00 is below the $25.00 floor
    let err = pipeline.execute(&attempt, &wallet).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::BelowMinimumPurchase { .. }));
    assert_eq!(wallet.purchase_calls.load(Ordering::SeqCst), 0);
    assert!(h.ledger.find("sig-small").await.is_none());
}
