//! End-to-end reconciliation over the in-memory store and the mock chain.

use std::sync::Arc;
use std::time::Duration;

use chain::{ChainClient, MockChainClient, Receipt};
use chrono::Utc;
use common::{ChainAddress, RetryPolicy, TransactionId, TxHash};
use domain::{
    FulfillmentStatus, NewProduct, PaymentEvent, Product, RawPayment, TokenRegistry, Transaction,
    TransactionStatus,
};
use payment_store::{InMemoryPaymentStore, PaymentStore};
use reconciler::{
    Correlation, Correlator, IntakeError, IntegrityViolation, PaymentIntake, ReconcilerConfig,
    ReconciliationEngine, SweepOutcome,
};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

const WALLET: &str = "0xABC0000000000000000000000000000000000042";
const OTHER_WALLET: &str = "0xDEF0000000000000000000000000000000000007";
const USDT: &str = "0xdAC17F958D2ee523a2206206994597C13D831ec7";

fn usdt() -> ChainAddress {
    ChainAddress::parse(USDT).unwrap()
}

fn config() -> ReconcilerConfig {
    ReconcilerConfig {
        lookup_retry: RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(4)),
        store_retry: RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(10)),
        reconnect: RetryPolicy::unbounded(Duration::from_secs(1), Duration::from_secs(5)),
        ..ReconcilerConfig::default()
    }
}

struct TestHarness {
    store: InMemoryPaymentStore,
    chain: MockChainClient,
    tokens: TokenRegistry,
    intake: PaymentIntake<InMemoryPaymentStore>,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryPaymentStore::new();
        let tokens = TokenRegistry::new().with_known_token("USDT", usdt()).unwrap();
        Self {
            intake: PaymentIntake::new(store.clone(), tokens.clone()),
            store,
            chain: MockChainClient::new(),
            tokens,
        }
    }

    fn engine(&self, shutdown: CancellationToken) -> ReconciliationEngine<InMemoryPaymentStore> {
        let chain: Arc<dyn ChainClient> = Arc::new(self.chain.clone());
        ReconciliationEngine::new(self.store.clone(), chain, config(), shutdown)
    }

    fn correlator(&self) -> Correlator<InMemoryPaymentStore> {
        let config = config();
        Correlator::new(self.store.clone(), config.lookup_retry, config.store_retry)
    }

    /// Wallet with a two-line cart and a pending USDT payment of 100.
    async fn checkout(&self) -> (TransactionId, Product, Product) {
        self.checkout_as(WALLET).await
    }

    async fn checkout_as(&self, wallet_str: &str) -> (TransactionId, Product, Product) {
        let wallet = ChainAddress::parse(wallet_str).unwrap();
        let user = self.store.upsert_user(&wallet).await.unwrap();
        let mug = self
            .store
            .create_product(NewProduct::new("Mug", Decimal::new(1250, 2), 10))
            .await
            .unwrap();
        let shirt = self
            .store
            .create_product(NewProduct::new("Shirt", Decimal::new(3000, 2), 5))
            .await
            .unwrap();
        self.store
            .save_cart(user.id, &[(mug.id, 2), (shirt.id, 1)])
            .await
            .unwrap();

        let id = self
            .intake
            .register_pending_transaction(wallet_str, Decimal::from(100), "USDT")
            .await
            .unwrap();
        (id, mug, shirt)
    }

    fn payment(&self, id: TransactionId, sender: &str, block: u64, log_index: u64) -> PaymentEvent {
        RawPayment {
            transaction_id: id.as_i64() as u64,
            sender: ChainAddress::parse(sender).unwrap(),
            raw_amount: 100_000_000,
            token_address: usdt(),
            currency: "USDT".to_string(),
            tx_hash: TxHash::parse(&format!("0x{:032x}{:032x}", block, log_index)).unwrap(),
            block_number: block,
            log_index,
        }
        .decode(&self.tokens)
        .unwrap()
    }

    async fn transaction(&self, id: TransactionId) -> Transaction {
        self.store.get_transaction(id).await.unwrap().unwrap()
    }

    async fn backdate(&self, id: TransactionId, age: chrono::Duration) {
        self.store
            .backdate_transaction(id, Utc::now() - age)
            .await
            .unwrap();
    }

    async fn wait_for_status(&self, id: TransactionId, status: TransactionStatus) -> Transaction {
        for _ in 0..200 {
            let transaction = self.transaction(id).await;
            if transaction.status == status {
                return transaction;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("transaction {id} never reached {status}");
    }
}

fn lowercase_wallet() -> String {
    WALLET.to_lowercase()
}

#[tokio::test(start_paused = true)]
async fn test_live_event_settles_checkout() {
    let h = TestHarness::new();
    let (id, mug, shirt) = h.checkout().await;
    let shutdown = CancellationToken::new();
    let engine = h.engine(shutdown.clone());
    let handle = engine.spawn();

    h.chain
        .push_live_event(h.payment(id, &lowercase_wallet(), 500, 3))
        .await;
    let confirmed = h.wait_for_status(id, TransactionStatus::Confirmed).await;

    assert_eq!(confirmed.amount, Decimal::from(100));
    assert_eq!(confirmed.block_number, Some(500));
    assert!(confirmed.confirmed_at.is_some());

    let items = h.intake.order_items(id).await.unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.status == FulfillmentStatus::Pending));
    assert_eq!(h.store.get_product(mug.id).await.unwrap().unwrap().quantity, 8);
    assert_eq!(h.store.get_product(shirt.id).await.unwrap().unwrap().quantity, 4);

    let cart = h.store.get_cart(confirmed.cart_id.unwrap()).await.unwrap().unwrap();
    assert!(!cart.is_active);
    assert!(h.store.get_cart_items(cart.id).await.unwrap().is_empty());

    let summary = confirmed.purchase_summary.unwrap();
    assert_eq!(summary.total_items, 3);
    assert_eq!(summary.total_usd, Decimal::new(5500, 2));
    assert_eq!(summary.token, "USDT");

    let health = engine.health().snapshot().await;
    assert!(health.is_healthy());
    assert!(health.live.last_activity.is_some());

    shutdown.cancel();
    handle.join().await;
    assert!(!engine.health().snapshot().await.is_healthy());
}

#[tokio::test]
async fn test_sender_mismatch_is_integrity_failure() {
    let h = TestHarness::new();
    let (id, mug, _) = h.checkout().await;

    let outcome = h
        .correlator()
        .correlate(&h.payment(id, "0x00000000000000000000000000000000000000ff", 500, 0))
        .await
        .unwrap();

    assert!(matches!(
        outcome,
        Correlation::IntegrityFailure {
            violation: IntegrityViolation::SenderMismatch { .. },
            ..
        }
    ));
    assert!(h.transaction(id).await.is_pending());
    assert!(h.intake.order_items(id).await.unwrap().is_empty());
    assert_eq!(h.store.get_product(mug.id).await.unwrap().unwrap().quantity, 10);
}

#[tokio::test]
async fn test_second_sender_never_confirms_again() {
    let h = TestHarness::new();
    let (id, _, _) = h.checkout().await;
    let correlator = h.correlator();

    let first = correlator
        .correlate(&h.payment(id, WALLET, 500, 0))
        .await
        .unwrap();
    let second = correlator
        .correlate(&h.payment(id, "0x00000000000000000000000000000000000000ff", 501, 0))
        .await
        .unwrap();

    assert!(matches!(first, Correlation::Confirmed { .. }));
    assert!(matches!(second, Correlation::IntegrityFailure { .. }));
    assert_eq!(h.intake.order_items(id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_duplicate_event_after_confirmation_is_noop() {
    let h = TestHarness::new();
    let (id, mug, _) = h.checkout().await;
    let correlator = h.correlator();
    let event = h.payment(id, WALLET, 500, 0);

    correlator.correlate(&event).await.unwrap();
    let confirmed = h.transaction(id).await;
    let again = correlator.correlate(&event).await.unwrap();

    assert_eq!(again, Correlation::AlreadyConfirmed(id));
    assert_eq!(h.transaction(id).await, confirmed);
    assert_eq!(h.intake.order_items(id).await.unwrap().len(), 2);
    assert_eq!(h.store.get_product(mug.id).await.unwrap().unwrap().quantity, 8);
}

#[tokio::test]
async fn test_expired_pending_transaction_fails_and_keeps_cart() {
    let h = TestHarness::new();
    let (id, _, _) = h.checkout().await;
    h.backdate(id, chrono::Duration::minutes(61)).await;
    h.chain.set_latest_block(1_000).await;

    let engine = h.engine(CancellationToken::new());
    let report = engine.sweeper().sweep_once().await.unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.expired, 1);

    let failed = h.transaction(id).await;
    assert_eq!(failed.status, TransactionStatus::Failed);
    let cart = h.store.get_cart(failed.cart_id.unwrap()).await.unwrap().unwrap();
    assert!(cart.is_active);
    assert_eq!(cart.transaction_id, Some(id));
    assert_eq!(h.store.get_cart_items(cart.id).await.unwrap().len(), 2);

    // A payment arriving afterwards changes nothing
    let late = h
        .correlator()
        .correlate(&h.payment(id, WALLET, 1_001, 0))
        .await
        .unwrap();
    assert_eq!(late, Correlation::LatePayment(id));
    assert_eq!(h.transaction(id).await.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn test_sweep_recovers_missed_event() {
    let h = TestHarness::new();
    let (id, _, _) = h.checkout().await;
    let (fresh, _, _) = h.checkout_as(OTHER_WALLET).await;
    h.backdate(id, chrono::Duration::minutes(10)).await;

    // Emitted while the live subscription was down
    h.chain.add_event(h.payment(id, WALLET, 700, 1)).await;
    h.chain.add_event(h.payment(id, WALLET, 650, 4)).await;

    let engine = h.engine(CancellationToken::new());
    let report = engine.sweeper().sweep_once().await.unwrap();

    assert_eq!(report.examined, 1);
    assert_eq!(report.confirmed, 1);
    // The earliest log wins
    assert_eq!(h.transaction(id).await.block_number, Some(650));
    // Within the grace period, left to the live loop
    assert!(h.transaction(fresh).await.is_pending());
}

#[tokio::test]
async fn test_sweep_stays_within_provider_block_range() {
    let h = TestHarness::new();
    let (id, _, _) = h.checkout().await;
    h.backdate(id, chrono::Duration::minutes(30)).await;

    // Twelve second blocks with the head at 10_000, mined now
    h.chain.limit_block_range(100).await;
    h.chain
        .set_block_times(Utc::now() - chrono::Duration::seconds(10_000 * 12), 12)
        .await;
    h.chain.add_event(h.payment(id, WALLET, 9_950, 0)).await;
    h.chain.set_latest_block(10_000).await;

    let engine = h.engine(CancellationToken::new());
    let report = engine.sweeper().sweep_once().await.unwrap();

    assert_eq!(report.errors, 0);
    assert_eq!(report.confirmed, 1);
    assert_eq!(h.transaction(id).await.block_number, Some(9_950));
    // Only the blocks since creation are searched, not the whole chain
    assert!(h.chain.lookup_count() < 10);
}

#[tokio::test]
async fn test_expiry_under_block_range_limit_without_timestamps() {
    let h = TestHarness::new();
    let (id, _, _) = h.checkout().await;
    h.backdate(id, chrono::Duration::hours(2)).await;
    h.chain.limit_block_range(100).await;
    h.chain.set_latest_block(1_050).await;

    let engine = h.engine(CancellationToken::new());
    let report = engine.sweeper().sweep_once().await.unwrap();

    assert_eq!(report.errors, 0);
    assert_eq!(report.expired, 1);
    assert_eq!(h.transaction(id).await.status, TransactionStatus::Failed);
    // Searched from block zero in chunks of 100
    assert_eq!(h.chain.lookup_count(), 11);
}

#[tokio::test(start_paused = true)]
async fn test_paid_intent_keeps_cart_when_another_is_attempted() {
    let h = TestHarness::new();
    let (id, mug, shirt) = h.checkout().await;

    let second = h
        .intake
        .register_pending_transaction(WALLET, Decimal::from(1), "ETH")
        .await;
    assert!(matches!(second, Err(IntakeError::CartInUse { pending, .. }) if pending == id));

    let outcome = h
        .correlator()
        .correlate(&h.payment(id, WALLET, 500, 0))
        .await
        .unwrap();

    let Correlation::Confirmed { order_items, .. } = outcome else {
        panic!("expected confirmation, got {outcome:?}");
    };
    assert_eq!(order_items, 2);
    assert_eq!(h.intake.order_items(id).await.unwrap().len(), 2);
    assert_eq!(h.store.get_product(mug.id).await.unwrap().unwrap().quantity, 8);
    assert_eq!(h.store.get_product(shirt.id).await.unwrap().unwrap().quantity, 4);
}

#[tokio::test]
async fn test_sweep_searches_receipt_block_only() {
    let h = TestHarness::new();
    let (id, _, _) = h.checkout().await;
    let event = h.payment(id, WALLET, 800, 0);
    h.intake
        .update_transaction(id, WALLET, event.tx_hash.as_str())
        .await
        .unwrap();
    h.backdate(id, chrono::Duration::minutes(5)).await;

    // Only the receipt's block is searched, so this earlier log is ignored
    h.chain.add_event(h.payment(id, WALLET, 100, 0)).await;
    h.chain.add_event(event.clone()).await;
    h.chain
        .add_receipt(Receipt {
            tx_hash: event.tx_hash.clone(),
            block_number: 800,
            success: true,
        })
        .await;

    let engine = h.engine(CancellationToken::new());
    let outcome = engine.sweeper().check_transaction(id).await.unwrap();

    assert!(matches!(
        outcome,
        SweepOutcome::Correlated(Correlation::Confirmed { .. })
    ));
    let confirmed = h.transaction(id).await;
    assert_eq!(confirmed.block_number, Some(800));
    assert_eq!(confirmed.tx_hash, Some(event.tx_hash));
}

#[tokio::test]
async fn test_reverted_receipt_counts_as_no_event() {
    let h = TestHarness::new();
    let (id, _, _) = h.checkout().await;
    let event = h.payment(id, WALLET, 900, 0);
    h.intake
        .update_transaction(id, WALLET, event.tx_hash.as_str())
        .await
        .unwrap();
    h.chain.add_event(event.clone()).await;
    h.chain
        .add_receipt(Receipt {
            tx_hash: event.tx_hash.clone(),
            block_number: 900,
            success: false,
        })
        .await;

    let engine = h.engine(CancellationToken::new());
    let outcome = engine.sweeper().check_transaction(id).await.unwrap();

    assert_eq!(outcome, SweepOutcome::NoEvent(id));
    assert!(h.transaction(id).await.is_pending());
}

#[tokio::test]
async fn test_check_transaction_reports_settled_state() {
    let h = TestHarness::new();
    let (id, _, _) = h.checkout().await;
    h.correlator()
        .correlate(&h.payment(id, WALLET, 500, 0))
        .await
        .unwrap();

    let engine = h.engine(CancellationToken::new());
    let sweeper = engine.sweeper();

    let SweepOutcome::NotPending(transaction) = sweeper.check_transaction(id).await.unwrap() else {
        panic!("expected a settled transaction");
    };
    assert_eq!(transaction.status, TransactionStatus::Confirmed);
    assert!(sweeper.check_transaction(TransactionId::new(9_999)).await.is_err());
}

#[tokio::test]
async fn test_live_and_sweep_converge() {
    let h = TestHarness::new();
    let (id, mug, _) = h.checkout().await;
    h.backdate(id, chrono::Duration::minutes(2)).await;
    let event = h.payment(id, WALLET, 500, 0);
    h.chain.add_event(event.clone()).await;

    let engine = h.engine(CancellationToken::new());
    let sweeper = engine.sweeper();
    let correlator = h.correlator();

    let (live, swept) = tokio::join!(correlator.correlate(&event), sweeper.sweep_once());
    let live = live.unwrap();
    let swept = swept.unwrap();

    let settled = usize::from(matches!(live, Correlation::Confirmed { .. })) + swept.confirmed;
    assert_eq!(settled, 1);
    assert_eq!(h.intake.order_items(id).await.unwrap().len(), 2);
    assert_eq!(h.store.get_product(mug.id).await.unwrap().unwrap().quantity, 8);
}

#[tokio::test]
async fn test_failed_settlement_rolls_back_and_sweep_retries() {
    let h = TestHarness::new();
    let (id, mug, _) = h.checkout().await;
    let event = h.payment(id, WALLET, 500, 0);

    h.store.fail_next_settlement();
    assert!(h.correlator().correlate(&event).await.is_err());

    let pending = h.transaction(id).await;
    assert!(pending.is_pending());
    assert!(pending.tx_hash.is_none());
    assert_eq!(h.store.get_product(mug.id).await.unwrap().unwrap().quantity, 10);

    h.backdate(id, chrono::Duration::minutes(2)).await;
    h.chain.add_event(event).await;
    let report = h
        .engine(CancellationToken::new())
        .sweeper()
        .sweep_once()
        .await
        .unwrap();

    assert_eq!(report.confirmed, 1);
    assert_eq!(h.store.get_product(mug.id).await.unwrap().unwrap().quantity, 8);
}

#[tokio::test(start_paused = true)]
async fn test_live_loop_survives_disconnect() {
    let h = TestHarness::new();
    let (first, _, _) = h.checkout().await;
    let shutdown = CancellationToken::new();
    let engine = h.engine(shutdown.clone());
    let handle = engine.spawn();

    h.chain.push_live_event(h.payment(first, WALLET, 500, 0)).await;
    h.wait_for_status(first, TransactionStatus::Confirmed).await;

    h.chain.drop_connection();
    let (second, _, _) = h.checkout().await;
    h.chain.push_live_event(h.payment(second, WALLET, 501, 0)).await;
    h.wait_for_status(second, TransactionStatus::Confirmed).await;

    assert_eq!(h.chain.subscription_count(), 2);
    shutdown.cancel();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_event_before_intent_is_matched_on_retry() {
    let h = TestHarness::new();
    let shutdown = CancellationToken::new();
    let engine = h.engine(shutdown.clone());
    let handle = engine.spawn();

    let wallet = ChainAddress::parse(WALLET).unwrap();
    let user = h.store.upsert_user(&wallet).await.unwrap();
    // The next id the store hands out belongs to the upcoming intent
    let expected = TransactionId::new(user.id.as_i64() + 1);

    h.chain.push_live_event(h.payment(expected, WALLET, 500, 0)).await;
    tokio::time::sleep(Duration::from_millis(500)).await;
    let id = h
        .intake
        .register_pending_transaction(WALLET, Decimal::from(100), "USDT")
        .await
        .unwrap();
    assert_eq!(id, expected);

    h.wait_for_status(id, TransactionStatus::Confirmed).await;
    shutdown.cancel();
    handle.join().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_event_is_discarded() {
    let h = TestHarness::new();
    let outcome = h
        .correlator()
        .correlate(&h.payment(TransactionId::new(4_242), WALLET, 500, 0))
        .await
        .unwrap();

    assert_eq!(outcome, Correlation::Discarded(TransactionId::new(4_242)));
}
