//! Ledger store tests: row creation, external-id uniqueness, and the
//! conditional status updates that make reconciliation idempotent.

mod common;

use common::*;
use salonpay::db::queries::ApplyOutcome;

#[test]
fn test_create_and_get_transaction() {
    let conn = setup_test_db();

    let tx = create_test_transaction(
        &conn,
        Some("pi_1"),
        TransactionType::Deposit,
        TransactionStatus::Pending,
        3_000,
    );

    let loaded = queries::get_transaction(&conn, &tx.id)
        .expect("Query should succeed")
        .expect("Transaction should exist");

    assert_eq!(loaded.id, tx.id);
    assert_eq!(loaded.customer_id, "customer-1");
    assert_eq!(loaded.owner_id, "owner-1");
    assert_eq!(loaded.stripe_payment_intent_id.as_deref(), Some("pi_1"));
    assert_eq!(loaded.amount_cents, 3_000);
    assert_eq!(loaded.status, TransactionStatus::Pending);
    assert_eq!(loaded.tx_type, TransactionType::Deposit);
}

#[test]
fn test_intent_id_unique_for_payments() {
    let conn = setup_test_db();

    create_test_transaction(
        &conn,
        Some("pi_dup"),
        TransactionType::Deposit,
        TransactionStatus::Pending,
        1_000,
    );

    // A second payment row for the same intent violates the unique index.
    let result = queries::create_transaction(
        &conn,
        &CreateTransaction {
            customer_id: "customer-2".to_string(),
            owner_id: "owner-2".to_string(),
            booking_id: None,
            stripe_payment_intent_id: Some("pi_dup".to_string()),
            stripe_charge_id: None,
            stripe_account_id: None,
            amount_cents: 1_000,
            platform_fee_cents: 0,
            net_amount_cents: 1_000,
            currency: "usd".to_string(),
            tx_type: TransactionType::FullPayment,
            status: TransactionStatus::Pending,
            metadata: None,
        },
    );
    assert!(result.is_err(), "Duplicate intent id should be rejected");
}

#[test]
fn test_refund_row_may_share_intent_id() {
    let conn = setup_test_db();

    create_test_transaction(
        &conn,
        Some("pi_orig"),
        TransactionType::FullPayment,
        TransactionStatus::Succeeded,
        10_000,
    );

    // Refund rows reference the intent they reverse; uniqueness only
    // covers payment rows.
    let refund = queries::create_transaction(
        &conn,
        &CreateTransaction {
            customer_id: "customer-1".to_string(),
            owner_id: "owner-1".to_string(),
            booking_id: None,
            stripe_payment_intent_id: Some("pi_orig".to_string()),
            stripe_charge_id: None,
            stripe_account_id: None,
            amount_cents: 10_000,
            platform_fee_cents: 0,
            net_amount_cents: 10_000,
            currency: "usd".to_string(),
            tx_type: TransactionType::Refund,
            status: TransactionStatus::Succeeded,
            metadata: None,
        },
    );
    assert!(refund.is_ok(), "Refund row should share the intent id");

    // Intent lookups keep resolving to the original payment row.
    let by_intent = queries::get_transaction_by_intent(&conn, "pi_orig")
        .expect("Query should succeed")
        .expect("Payment row should be found");
    assert_eq!(by_intent.tx_type, TransactionType::FullPayment);
}

#[test]
fn test_mark_intent_succeeded_cas() {
    let conn = setup_test_db();

    create_test_transaction(
        &conn,
        Some("pi_cas"),
        TransactionType::Deposit,
        TransactionStatus::Pending,
        3_000,
    );

    let first = queries::mark_intent_succeeded(&conn, "pi_cas", Some("ch_1"), None)
        .expect("Update should succeed");
    assert_eq!(first, ApplyOutcome::Applied);

    let loaded = queries::get_transaction_by_intent(&conn, "pi_cas")
        .unwrap()
        .unwrap();
    assert_eq!(loaded.status, TransactionStatus::Succeeded);
    assert_eq!(loaded.stripe_charge_id.as_deref(), Some("ch_1"));

    // Second application is a no-op.
    let second = queries::mark_intent_succeeded(&conn, "pi_cas", Some("ch_other"), None)
        .expect("Update should succeed");
    assert_eq!(second, ApplyOutcome::AlreadyApplied);

    let reloaded = queries::get_transaction_by_intent(&conn, "pi_cas")
        .unwrap()
        .unwrap();
    assert_eq!(
        reloaded.stripe_charge_id.as_deref(),
        Some("ch_1"),
        "Replay must not overwrite the captured charge"
    );
}

#[test]
fn test_failed_row_never_advances_to_succeeded() {
    let conn = setup_test_db();

    create_test_transaction(
        &conn,
        Some("pi_failed"),
        TransactionType::Deposit,
        TransactionStatus::Failed,
        3_000,
    );

    let outcome = queries::mark_intent_succeeded(&conn, "pi_failed", None, None)
        .expect("Update should succeed");
    assert_eq!(outcome, ApplyOutcome::AlreadyApplied);

    let loaded = queries::get_transaction_by_intent(&conn, "pi_failed")
        .unwrap()
        .unwrap();
    assert_eq!(
        loaded.status,
        TransactionStatus::Failed,
        "Terminal state must not regress"
    );
}

#[test]
fn test_mark_intent_on_unknown_row() {
    let conn = setup_test_db();
    let outcome = queries::mark_intent_succeeded(&conn, "pi_ghost", None, None)
        .expect("Update should succeed");
    assert_eq!(outcome, ApplyOutcome::NotFound);
}

#[test]
fn test_charge_refunded_requires_succeeded() {
    let conn = setup_test_db();

    let tx = create_test_transaction(
        &conn,
        Some("pi_ref"),
        TransactionType::FullPayment,
        TransactionStatus::Pending,
        10_000,
    );
    conn.execute(
        "UPDATE transactions SET stripe_charge_id = 'ch_ref' WHERE id = ?1",
        rusqlite::params![tx.id],
    )
    .unwrap();

    // Pending rows are not refundable targets.
    let outcome = queries::mark_charge_refunded(&conn, "ch_ref").unwrap();
    assert_eq!(outcome, ApplyOutcome::AlreadyApplied);

    queries::mark_intent_succeeded(&conn, "pi_ref", Some("ch_ref"), None).unwrap();

    let outcome = queries::mark_charge_refunded(&conn, "ch_ref").unwrap();
    assert_eq!(outcome, ApplyOutcome::Applied);

    let loaded = queries::get_transaction(&conn, &tx.id).unwrap().unwrap();
    assert_eq!(loaded.status, TransactionStatus::Refunded);

    // Replay: already refunded.
    let outcome = queries::mark_charge_refunded(&conn, "ch_ref").unwrap();
    assert_eq!(outcome, ApplyOutcome::AlreadyApplied);
}

#[test]
fn test_gateway_customer_first_write_wins() {
    let conn = setup_test_db();

    assert_eq!(queries::get_gateway_customer(&conn, "user-1").unwrap(), None);

    let stored = queries::save_gateway_customer(&conn, "user-1", "cus_a").unwrap();
    assert_eq!(stored, "cus_a");

    // A losing concurrent write gets the canonical id back.
    let stored = queries::save_gateway_customer(&conn, "user-1", "cus_b").unwrap();
    assert_eq!(stored, "cus_a");

    assert_eq!(
        queries::get_gateway_customer(&conn, "user-1").unwrap().as_deref(),
        Some("cus_a")
    );
}

#[test]
fn test_customer_transaction_pagination() {
    let conn = setup_test_db();

    for i in 0..5 {
        create_test_transaction(
            &conn,
            Some(&format!("pi_page_{}", i)),
            TransactionType::Deposit,
            TransactionStatus::Pending,
            1_000 + i,
        );
    }

    let (items, total) = queries::list_customer_transactions(&conn, "customer-1", 2, 0).unwrap();
    assert_eq!(total, 5);
    assert_eq!(items.len(), 2);

    let (items, total) = queries::list_customer_transactions(&conn, "customer-1", 2, 4).unwrap();
    assert_eq!(total, 5);
    assert_eq!(items.len(), 1);
}

#[test]
fn test_booking_transactions_ordered() {
    let conn = setup_test_db();

    create_test_transaction(
        &conn,
        Some("pi_b1"),
        TransactionType::Deposit,
        TransactionStatus::Succeeded,
        3_000,
    );
    create_test_transaction(
        &conn,
        Some("pi_b2"),
        TransactionType::FullPayment,
        TransactionStatus::Pending,
        7_000,
    );

    let items = queries::list_booking_transactions(&conn, "booking-1").unwrap();
    assert_eq!(items.len(), 2);
}

#[test]
fn test_webhook_event_replay_guard() {
    let conn = setup_test_db();

    assert!(queries::try_record_webhook_event(&conn, "evt_1", "invoice.payment_succeeded").unwrap());
    assert!(
        !queries::try_record_webhook_event(&conn, "evt_1", "invoice.payment_succeeded").unwrap(),
        "Second recording of the same event id must report a duplicate"
    );
    assert!(queries::try_record_webhook_event(&conn, "evt_2", "invoice.payment_failed").unwrap());
}
