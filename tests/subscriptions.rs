//! Subscription state machine tests: upsert-by-owner, cancellation
//! semantics, invoice effects, and plan switching.

mod common;

use common::*;
use salonpay::db::queries::ApplyOutcome;

#[test]
fn test_upsert_reuses_row_for_owner() {
    let conn = setup_test_db();

    let first = create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Active,
    );

    // Cancel, then subscribe again: same primary key, revived state.
    queries::cancel_subscription_now(&conn, "owner-1", now()).unwrap();

    let second = create_test_subscription(
        &conn,
        "owner-1",
        "sub_2",
        SubscriptionPlan::Premium,
        SubscriptionStatus::Active,
    );

    assert_eq!(first.id, second.id, "Upsert must reuse the owner's row");
    assert_eq!(second.plan, SubscriptionPlan::Premium);
    assert_eq!(second.status, SubscriptionStatus::Active);
    assert_eq!(second.stripe_subscription_id.as_deref(), Some("sub_2"));
    assert_eq!(second.failed_payment_count, 0);
    assert!(!second.cancel_at_period_end);
    assert_eq!(second.cancelled_at, None);

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM subscriptions", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1, "Never a second row per owner");
}

#[test]
fn test_immediate_cancel_is_synchronous() {
    let conn = setup_test_db();
    create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Active,
    );

    let cancelled = queries::cancel_subscription_now(&conn, "owner-1", now())
        .unwrap()
        .expect("Subscription should exist");

    // Terminal locally at once, no webhook dependency.
    assert_eq!(cancelled.status, SubscriptionStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert!(!cancelled.cancel_at_period_end);
}

#[test]
fn test_period_end_cancel_leaves_status_untouched() {
    let conn = setup_test_db();
    create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Active,
    );

    let flagged = queries::set_cancel_at_period_end(&conn, "owner-1", true)
        .unwrap()
        .expect("Subscription should exist");

    assert_eq!(flagged.status, SubscriptionStatus::Active);
    assert!(flagged.cancel_at_period_end);
    assert_eq!(flagged.cancelled_at, None);
}

#[test]
fn test_plan_switch_mutates_in_place() {
    let conn = setup_test_db();
    let original = create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Active,
    );

    let updated =
        queries::update_subscription_plan(&conn, "owner-1", SubscriptionPlan::Premium, "price_premium_test", 2_000)
            .unwrap()
            .expect("Subscription should exist");

    assert_eq!(updated.id, original.id);
    assert_eq!(updated.plan, SubscriptionPlan::Premium);
    assert_eq!(updated.amount_cents, 2_000);
    assert_eq!(
        updated.stripe_subscription_id.as_deref(),
        Some("sub_1"),
        "Plan change keeps the gateway subscription"
    );

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM subscriptions", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_invoice_failure_escalates() {
    let conn = setup_test_db();
    create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Active,
    );

    // Two prior failures.
    queries::record_invoice_failed(&conn, "sub_1").unwrap();
    queries::record_invoice_failed(&conn, "sub_1").unwrap();

    let after = queries::record_invoice_failed(&conn, "sub_1")
        .unwrap()
        .expect("Subscription should exist");

    assert_eq!(after.failed_payment_count, 3);
    assert_eq!(after.status, SubscriptionStatus::PastDue);
    assert!(after.is_past_due());
}

#[test]
fn test_invoice_success_recovers_past_due() {
    let conn = setup_test_db();
    create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Active,
    );
    queries::record_invoice_failed(&conn, "sub_1").unwrap();

    let paid_at = now();
    let recovered = queries::record_invoice_paid(&conn, "sub_1", paid_at)
        .unwrap()
        .expect("Subscription should exist");

    assert_eq!(recovered.status, SubscriptionStatus::Active);
    assert_eq!(recovered.failed_payment_count, 0);
    assert_eq!(recovered.last_payment_date, Some(paid_at));
}

#[test]
fn test_invoice_success_preserves_trialing() {
    let conn = setup_test_db();
    create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Trialing,
    );

    let after = queries::record_invoice_paid(&conn, "sub_1", now())
        .unwrap()
        .expect("Subscription should exist");

    // Only past_due recovers to active; other statuses are mirrored by
    // the subscription.updated events, not by invoices.
    assert_eq!(after.status, SubscriptionStatus::Trialing);
}

#[test]
fn test_subscription_snapshot_mirrors_period() {
    let conn = setup_test_db();
    create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Active,
    );

    let start = now();
    let end = start + 30 * 86_400;
    let applied = queries::apply_subscription_snapshot(
        &conn,
        "sub_1",
        SubscriptionStatus::Active,
        Some(start),
        Some(end),
        Some(false),
    )
    .unwrap();
    assert!(applied);

    let sub = queries::get_subscription_by_owner(&conn, "owner-1")
        .unwrap()
        .unwrap();
    assert_eq!(sub.current_period_start, Some(start));
    assert_eq!(sub.current_period_end, Some(end));
    assert_eq!(sub.next_payment_date, Some(end), "next payment = period end");
}

#[test]
fn test_snapshot_absent_fields_keep_current_values() {
    let conn = setup_test_db();
    let original = create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Active,
    );

    queries::apply_subscription_snapshot(
        &conn,
        "sub_1",
        SubscriptionStatus::PastDue,
        None,
        None,
        None,
    )
    .unwrap();

    let sub = queries::get_subscription_by_owner(&conn, "owner-1")
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::PastDue);
    assert_eq!(sub.current_period_start, original.current_period_start);
    assert_eq!(sub.current_period_end, original.current_period_end);
    assert!(!sub.cancel_at_period_end);
}

#[test]
fn test_mark_deleted_idempotent() {
    let conn = setup_test_db();
    create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Active,
    );

    let stamp = now() - 100;
    assert_eq!(
        queries::mark_subscription_deleted(&conn, "sub_1", stamp).unwrap(),
        ApplyOutcome::Applied
    );
    assert_eq!(
        queries::mark_subscription_deleted(&conn, "sub_1", now()).unwrap(),
        ApplyOutcome::AlreadyApplied
    );

    let sub = queries::get_subscription_by_owner(&conn, "owner-1")
        .unwrap()
        .unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Cancelled);
    assert_eq!(sub.cancelled_at, Some(stamp), "Replay must not restamp");
}

#[test]
fn test_mark_deleted_unknown_subscription() {
    let conn = setup_test_db();
    assert_eq!(
        queries::mark_subscription_deleted(&conn, "sub_ghost", now()).unwrap(),
        ApplyOutcome::NotFound
    );
}

#[test]
fn test_gateway_status_mapping() {
    assert_eq!(SubscriptionStatus::from_gateway("active"), Some(SubscriptionStatus::Active));
    assert_eq!(SubscriptionStatus::from_gateway("trialing"), Some(SubscriptionStatus::Trialing));
    assert_eq!(SubscriptionStatus::from_gateway("past_due"), Some(SubscriptionStatus::PastDue));
    assert_eq!(SubscriptionStatus::from_gateway("unpaid"), Some(SubscriptionStatus::PastDue));
    assert_eq!(SubscriptionStatus::from_gateway("canceled"), Some(SubscriptionStatus::Cancelled));
    assert_eq!(SubscriptionStatus::from_gateway("incomplete"), Some(SubscriptionStatus::Inactive));
    assert_eq!(SubscriptionStatus::from_gateway("paused"), None);
}

#[test]
fn test_is_active_predicate() {
    let conn = setup_test_db();
    let active = create_test_subscription(
        &conn,
        "owner-1",
        "sub_1",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Active,
    );
    assert!(active.is_active());

    let trialing = create_test_subscription(
        &conn,
        "owner-2",
        "sub_2",
        SubscriptionPlan::Basic,
        SubscriptionStatus::Trialing,
    );
    assert!(trialing.is_active());

    let cancelled = queries::cancel_subscription_now(&conn, "owner-1", now())
        .unwrap()
        .unwrap();
    assert!(!cancelled.is_active());
}
