//! End-to-end marketplace scenarios
//!
//! One storage instance, three ledgers, flows driven the way a client would.

use delivery::DeliveryStatus;
use escrow::{LedgerBalances, MockTransfer, PaymentStatus};
use market_core::{Address, Config, EncryptedInput, Error, LedgerContext, MarketEvent, RecordId};
use marketplace::Marketplace;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_stream::StreamExt;

const REQUESTER: Address = Address::from_bytes([0x11; 20]);
const COURIER: Address = Address::from_bytes([0x22; 20]);
const OWNER: Address = Address::from_bytes([0xfe; 20]);

fn test_config(temp_dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.rocksdb.sync_writes = false;
    config.escrow.fee_rate_percent = dec!(2);
    config.escrow.max_payment = dec!(1000);
    config.escrow.platform_owner = OWNER;
    config
}

async fn create_test_market(temp_dir: &tempfile::TempDir) -> Marketplace {
    Marketplace::open(test_config(temp_dir)).await.unwrap()
}

fn sealed(label: &str) -> EncryptedInput {
    EncryptedInput::new(format!("ct-{label}").into_bytes(), b"proof".to_vec())
}

async fn create_delivery(market: &Marketplace) -> RecordId {
    market
        .delivery()
        .create_request(REQUESTER, sealed("recipient"), sealed("pickup"), sealed("dropoff"))
        .await
        .unwrap()
}

async fn create_payment(market: &Marketplace, delivery_id: RecordId, amount: Decimal) -> RecordId {
    market
        .escrow()
        .create_payment(REQUESTER, delivery_id, sealed("amount"), COURIER, amount)
        .await
        .unwrap()
}

/// Scenario A: a courier cannot accept the same delivery twice
#[tokio::test]
async fn test_double_accept_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let market = create_test_market(&temp_dir).await;

    let d1 = create_delivery(&market).await;
    assert!(market
        .delivery()
        .accept_request(COURIER, d1, sealed("location"))
        .await
        .unwrap());

    let err = market
        .delivery()
        .accept_request(COURIER, d1, sealed("location"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStatus { .. }));
    assert!(err.is_retryable());

    market.shutdown().await.unwrap();
}

/// Scenario B: 100 units at 2% pays 98 to the payee and 2 to the platform
#[tokio::test]
async fn test_escrow_release_splits_fee() {
    let temp_dir = tempfile::tempdir().unwrap();
    let market = create_test_market(&temp_dir).await;
    let d1 = create_delivery(&market).await;

    let p1 = create_payment(&market, d1, dec!(100)).await;
    assert_eq!(market.escrow().get_payment(&p1).unwrap().fee, dec!(2));

    market.escrow().escrow(REQUESTER, p1).await.unwrap();
    market.escrow().complete(REQUESTER, p1).await.unwrap();

    assert_eq!(market.escrow().balance_of(&COURIER).unwrap(), dec!(98));
    assert_eq!(market.escrow().platform_balance().unwrap(), dec!(2));

    market.shutdown().await.unwrap();
}

/// Scenario C: refund while PENDING returns everything and is terminal
#[tokio::test]
async fn test_refund_then_complete_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let market = create_test_market(&temp_dir).await;
    let d1 = create_delivery(&market).await;

    let p1 = create_payment(&market, d1, dec!(100)).await;
    market
        .escrow()
        .refund(REQUESTER, p1, sealed("amount"))
        .await
        .unwrap();

    assert_eq!(market.escrow().balance_of(&REQUESTER).unwrap(), dec!(100));
    assert_eq!(
        market.escrow().get_payment(&p1).unwrap().status,
        PaymentStatus::Refunded
    );

    let err = market.escrow().complete(REQUESTER, p1).await.unwrap_err();
    assert!(matches!(err, Error::InvalidStatus { current: "REFUNDED", .. }));

    market.shutdown().await.unwrap();
}

/// Scenario D: the second rating for a delivery fails whoever submits it
#[tokio::test]
async fn test_duplicate_rating_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    let market = create_test_market(&temp_dir).await;
    let d1 = create_delivery(&market).await;

    market
        .reputation()
        .submit_rating(REQUESTER, d1, COURIER, sealed("score"), sealed("comment"))
        .await
        .unwrap();
    let err = market
        .reputation()
        .submit_rating(COURIER, d1, REQUESTER, sealed("score"), sealed("comment"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DuplicateRating(id) if id == d1));

    market.shutdown().await.unwrap();
}

/// Scenario E: degenerate payment arguments
#[tokio::test]
async fn test_create_payment_rejects_degenerate_arguments() {
    let temp_dir = tempfile::tempdir().unwrap();
    let market = create_test_market(&temp_dir).await;
    let d1 = create_delivery(&market).await;

    let err = market
        .escrow()
        .create_payment(REQUESTER, d1, sealed("amount"), Address::ZERO, dec!(10))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ZeroAddress(_)));

    let err = market
        .escrow()
        .create_payment(REQUESTER, d1, sealed("amount"), COURIER, Decimal::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidAmount(_)));
    assert!(!err.is_retryable());

    assert_eq!(market.escrow().total_payments().unwrap(), 0);
    market.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_flow_and_event_history() {
    let temp_dir = tempfile::tempdir().unwrap();
    let market = create_test_market(&temp_dir).await;
    let mut live = market.events();

    let d1 = create_delivery(&market).await;
    market
        .delivery()
        .accept_request(COURIER, d1, sealed("location"))
        .await
        .unwrap();
    let p1 = create_payment(&market, d1, dec!(50)).await;
    market.escrow().escrow(REQUESTER, p1).await.unwrap();
    market.delivery().complete_request(COURIER, d1).await.unwrap();
    market.escrow().complete(REQUESTER, p1).await.unwrap();
    market
        .reputation()
        .submit_rating(REQUESTER, d1, COURIER, sealed("score"), sealed("comment"))
        .await
        .unwrap();
    market
        .escrow()
        .withdraw_platform_fees(OWNER, dec!(1))
        .await
        .unwrap();

    assert_eq!(
        market.delivery().get_request(&d1).unwrap().status,
        DeliveryStatus::Completed
    );
    assert_eq!(market.escrow().balance_of(&COURIER).unwrap(), dec!(49));
    assert_eq!(market.escrow().balance_of(&OWNER).unwrap(), dec!(1));
    assert_eq!(market.escrow().platform_balance().unwrap(), Decimal::ZERO);
    assert_eq!(market.reputation().get_average_rating(&COURIER).unwrap(), 5);

    let history = market.history().unwrap();
    assert_eq!(history.len(), 8);
    assert!(history
        .iter()
        .any(|record| matches!(record.event, MarketEvent::PlatformFeesWithdrawn { .. })));
    assert!(history
        .windows(2)
        .all(|pair| pair[0].emitted_at <= pair[1].emitted_at));

    let mut seen = 0;
    while seen < history.len() {
        live.next().await.unwrap();
        seen += 1;
    }

    let stats = market.storage_stats().unwrap();
    assert!(stats.deliveries > 0);
    assert!(stats.payments > 0);
    assert!(stats.events > 0);

    let metrics = market.render_metrics().unwrap();
    assert!(metrics.contains("delivery_operations_total"));
    assert!(metrics.contains("escrow_held_value"));

    market.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rail_outage_keeps_payment_in_escrow() {
    let temp_dir = tempfile::tempdir().unwrap();
    let ctx = LedgerContext::open(test_config(&temp_dir)).unwrap();
    let rail = Arc::new(MockTransfer::new(LedgerBalances::new(ctx.storage.clone())));
    let market = Marketplace::with_transfer(ctx, rail.clone()).await.unwrap();

    let d1 = create_delivery(&market).await;
    let p1 = create_payment(&market, d1, dec!(20)).await;
    market.escrow().escrow(REQUESTER, p1).await.unwrap();

    rail.set_available(false);
    let err = market.escrow().complete(REQUESTER, p1).await.unwrap_err();
    assert!(matches!(err, Error::TransferFailed(_)));
    assert!(err.is_retryable());
    assert_eq!(
        market.escrow().get_payment(&p1).unwrap().status,
        PaymentStatus::Escrow
    );

    rail.set_available(true);
    market.escrow().complete(REQUESTER, p1).await.unwrap();
    assert_eq!(market.escrow().balance_of(&COURIER).unwrap(), dec!(19.6));

    market.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_payment_for_unknown_delivery_is_accepted() {
    let temp_dir = tempfile::tempdir().unwrap();
    let market = create_test_market(&temp_dir).await;

    // Ledgers are correlated by id only
    let unknown = RecordId::from_bytes([0x42; 32]);
    let p1 = create_payment(&market, unknown, dec!(5)).await;

    assert_eq!(market.escrow().get_payment(&p1).unwrap().delivery_id, unknown);
    assert!(matches!(
        market.delivery().get_request(&unknown),
        Err(Error::NotFound { .. })
    ));

    market.shutdown().await.unwrap();
}
