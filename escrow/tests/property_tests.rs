//! Property-based tests for escrow invariants
//!
//! - Fee is fixed at creation and conserved on release
//! - Value is conserved: payouts + held (open payments and fees) == attached
//! - Status changes only along PENDING→ESCROW→COMPLETED and
//!   {PENDING, ESCROW}→REFUNDED

use escrow::{compute_fee, EscrowPaymentLedger, PaymentStatus};
use market_core::{Address, Config, EncryptedInput, LedgerContext, RecordId};
use proptest::prelude::*;
use rust_decimal::Decimal;

/// Strategy for valid amounts (0.001 ..= 100, three decimal places)
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..=100_000i64).prop_map(|milli| Decimal::new(milli, 3))
}

/// Strategy for fee rates between 0 and 10 percent (two decimal places)
fn fee_rate_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..=1_000i64).prop_map(|bp| Decimal::new(bp, 2))
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Escrow,
    Complete,
    Refund,
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Escrow),
        Just(Action::Complete),
        Just(Action::Refund),
    ]
}

fn blob() -> EncryptedInput {
    EncryptedInput::new(b"ct".to_vec(), b"proof".to_vec())
}

async fn create_test_ledger(temp_dir: &tempfile::TempDir, fee_rate: Decimal) -> EscrowPaymentLedger {
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.rocksdb.sync_writes = false;
    config.escrow.fee_rate_percent = fee_rate;
    let ctx = LedgerContext::open(config).unwrap();
    EscrowPaymentLedger::open(ctx).await.unwrap()
}

fn allowed_edge(from: PaymentStatus, to: PaymentStatus) -> bool {
    matches!(
        (from, to),
        (PaymentStatus::Pending, PaymentStatus::Escrow)
            | (PaymentStatus::Escrow, PaymentStatus::Completed)
            | (PaymentStatus::Pending, PaymentStatus::Refunded)
            | (PaymentStatus::Escrow, PaymentStatus::Refunded)
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Property: fee never changes and release conserves value
    #[test]
    fn prop_fee_fixed_and_conserved(amount in amount_strategy(), fee_rate in fee_rate_strategy()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let temp_dir = tempfile::tempdir().unwrap();
            let ledger = create_test_ledger(&temp_dir, fee_rate).await;
            let (payer, payee) = (Address::from_bytes([1u8; 20]), Address::from_bytes([2u8; 20]));

            let id = ledger
                .create_payment(payer, RecordId::from_bytes([9u8; 32]), blob(), payee, amount)
                .await
                .unwrap();
            let created = ledger.get_payment(&id).unwrap();
            prop_assert_eq!(created.fee, compute_fee(amount, fee_rate).unwrap());
            prop_assert!(created.fee <= amount);

            ledger.escrow(payer, id).await.unwrap();
            ledger.complete(payer, id).await.unwrap();

            let completed = ledger.get_payment(&id).unwrap();
            prop_assert_eq!(completed.fee, created.fee);
            prop_assert_eq!(ledger.balance_of(&payee).unwrap(), amount - created.fee);
            prop_assert_eq!(ledger.platform_balance().unwrap(), created.fee);
            prop_assert_eq!(
                ledger.balance_of(&payee).unwrap() + ledger.platform_balance().unwrap(),
                amount
            );

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: random action sequences only follow legal edges and conserve value
    #[test]
    fn prop_transitions_follow_edges(
        amount in amount_strategy(),
        steps in prop::collection::vec((action_strategy(), any::<bool>()), 1..10)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let temp_dir = tempfile::tempdir().unwrap();
            let ledger = create_test_ledger(&temp_dir, Decimal::new(2, 0)).await;
            let (payer, payee) = (Address::from_bytes([1u8; 20]), Address::from_bytes([2u8; 20]));

            let id = ledger
                .create_payment(payer, RecordId::from_bytes([9u8; 32]), blob(), payee, amount)
                .await
                .unwrap();
            let mut status = PaymentStatus::Pending;

            for (action, as_payer) in steps {
                let caller = if as_payer { payer } else { payee };
                let result = match action {
                    Action::Escrow => ledger.escrow(caller, id).await,
                    Action::Complete => ledger.complete(caller, id).await,
                    Action::Refund => ledger.refund(caller, id, blob()).await,
                };

                let current = ledger.get_payment(&id).unwrap().status;
                match result {
                    Ok(_) => {
                        prop_assert!(as_payer);
                        prop_assert!(allowed_edge(status, current));
                    }
                    Err(_) => prop_assert_eq!(current, status),
                }
                status = current;
            }

            let paid_out = ledger.balance_of(&payer).unwrap() + ledger.balance_of(&payee).unwrap();
            // Held value includes unwithdrawn platform fees
            prop_assert_eq!(paid_out + ledger.held_value().unwrap(), amount);

            ledger.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}
