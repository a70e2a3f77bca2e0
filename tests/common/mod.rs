//! Test fixtures shared by the salonpay integration tests.

#![allow(dead_code)]

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

pub use salonpay::config::{PlanCatalog, PlanPricing};
pub use salonpay::db::{init_db, queries, AppState};
pub use salonpay::middleware::IdentityClient;
pub use salonpay::models::*;
pub use salonpay::payments::{StripeClient, StripeWebhookEvent};

/// Create an in-memory ledger with the schema initialized.
pub fn setup_test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Gateway client with fixed test secrets (no network calls in tests).
pub fn test_stripe_client() -> StripeClient {
    StripeClient::new("sk_test_xxx", "whsec_test_secret")
}

pub fn test_plan_catalog() -> PlanCatalog {
    PlanCatalog {
        basic: PlanPricing {
            price_id: "price_basic_test".to_string(),
            amount_cents: 1_000,
            interval: "month".to_string(),
        },
        premium: PlanPricing {
            price_id: "price_premium_test".to_string(),
            amount_cents: 2_000,
            interval: "month".to_string(),
        },
    }
}

/// AppState over a single pooled in-memory connection. Suitable for
/// router-level tests that touch the ledger through one connection.
pub fn create_test_app_state() -> AppState {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }

    AppState {
        db: pool,
        stripe: test_stripe_client(),
        identity: IdentityClient::new("http://127.0.0.1:4000"),
        base_url: "http://localhost:3000".to_string(),
        deposit_percent: 30,
        platform_fee_percent: 3,
        currency: "usd".to_string(),
        plans: test_plan_catalog(),
    }
}

/// Insert a transaction with sensible defaults.
pub fn create_test_transaction(
    conn: &Connection,
    intent_id: Option<&str>,
    tx_type: TransactionType,
    status: TransactionStatus,
    amount_cents: i64,
) -> Transaction {
    queries::create_transaction(
        conn,
        &CreateTransaction {
            customer_id: "customer-1".to_string(),
            owner_id: "owner-1".to_string(),
            booking_id: Some("booking-1".to_string()),
            stripe_payment_intent_id: intent_id.map(|s| s.to_string()),
            stripe_charge_id: None,
            stripe_account_id: None,
            amount_cents,
            platform_fee_cents: 0,
            net_amount_cents: amount_cents,
            currency: "usd".to_string(),
            tx_type,
            status,
            metadata: None,
        },
    )
    .expect("Failed to create test transaction")
}

/// Insert (or revive) a subscription for an owner.
pub fn create_test_subscription(
    conn: &Connection,
    owner_id: &str,
    stripe_subscription_id: &str,
    plan: SubscriptionPlan,
    status: SubscriptionStatus,
) -> Subscription {
    queries::upsert_subscription(
        conn,
        &UpsertSubscription {
            owner_id: owner_id.to_string(),
            stripe_subscription_id: Some(stripe_subscription_id.to_string()),
            stripe_customer_id: Some("cus_test".to_string()),
            stripe_price_id: Some("price_basic_test".to_string()),
            plan,
            amount_cents: 1_000,
            currency: "usd".to_string(),
            billing_interval: "month".to_string(),
            status,
            current_period_start: Some(now()),
            current_period_end: Some(now() + 30 * 86_400),
        },
    )
    .expect("Failed to create test subscription")
}

pub fn create_test_connect_account(
    conn: &Connection,
    owner_id: &str,
    stripe_account_id: &str,
) -> ConnectAccount {
    queries::create_connect_account(conn, owner_id, stripe_account_id)
        .expect("Failed to create test connect account")
}

/// Fully-onboarded account: all three capability flags set.
pub fn onboard_test_account(conn: &Connection, stripe_account_id: &str) -> ConnectAccount {
    queries::apply_account_snapshot(
        conn,
        stripe_account_id,
        &AccountSnapshot {
            charges_enabled: true,
            payouts_enabled: true,
            details_submitted: true,
            ..Default::default()
        },
    )
    .expect("Failed to apply snapshot")
    .expect("Account should exist")
}

/// Build a webhook envelope from an event type and object payload.
pub fn webhook_event(
    event_id: &str,
    event_type: &str,
    object: serde_json::Value,
) -> StripeWebhookEvent {
    serde_json::from_value(serde_json::json!({
        "id": event_id,
        "type": event_type,
        "data": { "object": object },
    }))
    .expect("Failed to build webhook event")
}
