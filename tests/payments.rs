//! Payment orchestration rules: fee arithmetic, refund guards, and the
//! shared gateway-status mapping.

mod common;

use common::*;
use salonpay::error::AppError;
use salonpay::handlers::payments::{percentage_cents, validate_refund};
use salonpay::payments::map_intent_status;

#[test]
fn test_percentage_rounding() {
    // 30% deposit of $100.00
    assert_eq!(percentage_cents(10_000, 30), 3_000);
    // 3% fee of $100.00
    assert_eq!(percentage_cents(10_000, 3), 300);
    // Half-up rounding: 50% of $1.05 = 52.5 cents -> 53
    assert_eq!(percentage_cents(105, 50), 53);
    // 3% of $0.10 = 0.3 cents -> 0
    assert_eq!(percentage_cents(10, 3), 0);
}

#[test]
fn test_deposit_amount_property() {
    // The persisted deposit equals round(amount * percent / 100) and the
    // row starts pending, before any webhook fires.
    let conn = setup_test_db();
    let deposit_cents = percentage_cents(10_000, 30);
    let tx = create_test_transaction(
        &conn,
        Some("pi_dep"),
        TransactionType::Deposit,
        TransactionStatus::Pending,
        deposit_cents,
    );

    assert_eq!(tx.amount_cents, 3_000);
    assert_eq!(tx.status, TransactionStatus::Pending);
}

#[test]
fn test_full_payment_fee_split() {
    // $100 full payment, 3% platform fee, fully-onboarded merchant.
    let remaining = 10_000;
    let fee = percentage_cents(remaining, 3);
    let net = remaining - fee;

    assert_eq!(fee, 300);
    assert_eq!(net, 9_700);
}

#[test]
fn test_refund_requires_succeeded_status() {
    let conn = setup_test_db();

    let pending = create_test_transaction(
        &conn,
        Some("pi_p"),
        TransactionType::FullPayment,
        TransactionStatus::Pending,
        5_000,
    );
    let failed = create_test_transaction(
        &conn,
        Some("pi_f"),
        TransactionType::FullPayment,
        TransactionStatus::Failed,
        5_000,
    );

    assert!(matches!(
        validate_refund(&pending, None),
        Err(AppError::InvalidStatus(_))
    ));
    assert!(matches!(
        validate_refund(&failed, None),
        Err(AppError::InvalidStatus(_))
    ));
}

#[test]
fn test_refund_defaults_to_full_amount() {
    let conn = setup_test_db();
    let succeeded = create_test_transaction(
        &conn,
        Some("pi_s"),
        TransactionType::FullPayment,
        TransactionStatus::Succeeded,
        5_000,
    );

    assert_eq!(validate_refund(&succeeded, None).unwrap(), 5_000);
    assert_eq!(validate_refund(&succeeded, Some(2_000)).unwrap(), 2_000);
}

#[test]
fn test_refund_amount_bounds() {
    let conn = setup_test_db();
    let succeeded = create_test_transaction(
        &conn,
        Some("pi_s2"),
        TransactionType::FullPayment,
        TransactionStatus::Succeeded,
        5_000,
    );

    assert!(matches!(
        validate_refund(&succeeded, Some(0)),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        validate_refund(&succeeded, Some(-100)),
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        validate_refund(&succeeded, Some(5_001)),
        Err(AppError::Validation(_))
    ));
}

#[test]
fn test_refund_requires_payment_intent() {
    let conn = setup_test_db();
    let no_intent = create_test_transaction(
        &conn,
        None,
        TransactionType::FullPayment,
        TransactionStatus::Succeeded,
        5_000,
    );

    assert!(matches!(
        validate_refund(&no_intent, None),
        Err(AppError::InvalidStatus(_))
    ));
}

#[test]
fn test_intent_status_mapping() {
    assert_eq!(map_intent_status("succeeded"), Some(TransactionStatus::Succeeded));
    assert_eq!(map_intent_status("canceled"), Some(TransactionStatus::Cancelled));
    // Still in flight: no local transition.
    assert_eq!(map_intent_status("requires_action"), None);
    assert_eq!(map_intent_status("requires_payment_method"), None);
    assert_eq!(map_intent_status("processing"), None);
    // Forward compatibility: unknown statuses do nothing.
    assert_eq!(map_intent_status("some_future_status"), None);
}

#[test]
fn test_transaction_status_machine() {
    use TransactionStatus::*;

    assert!(Pending.can_transition_to(Succeeded));
    assert!(Pending.can_transition_to(Failed));
    assert!(Pending.can_transition_to(Cancelled));
    assert!(Succeeded.can_transition_to(Refunded));

    assert!(!Succeeded.can_transition_to(Succeeded));
    assert!(!Failed.can_transition_to(Succeeded));
    assert!(!Cancelled.can_transition_to(Succeeded));
    assert!(!Refunded.can_transition_to(Succeeded));
    assert!(!Pending.can_transition_to(Refunded));

    assert!(!Pending.is_terminal());
    assert!(Succeeded.is_terminal());
    assert!(Failed.is_terminal());
}
