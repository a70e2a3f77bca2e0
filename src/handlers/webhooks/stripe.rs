//! Webhook reconciler: the single authority allowed to advance ledger
//! rows to terminal state from external confirmation.
//!
//! The gateway delivers at-least-once, unordered, from an untrusted
//! network caller, so every handler here is defensive:
//!
//! - nothing in the payload is trusted before the signature verifies;
//! - every mutation is a conditional update keyed by external id, so a
//!   duplicate delivery is a no-op;
//! - an event for a row this system never created is logged and answered
//!   200 (the gateway must not retry it forever);
//! - a database failure applying a known-good event answers 500 so the
//!   gateway redelivers;
//! - handlers only apply fields present on their own payload and never
//!   assume a related event has already run.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use rusqlite::Connection;

use crate::db::{queries, AppState};
use crate::db::queries::ApplyOutcome;
use crate::models::SubscriptionStatus;
use crate::payments::{
    StripeAccount, StripeCharge, StripeInvoice, StripePaymentIntent, StripeSubscription,
    StripeWebhookEvent,
};

/// Status + short text answered to the gateway.
pub type WebhookResult = (StatusCode, &'static str);

const DB_ERROR: WebhookResult = (StatusCode::INTERNAL_SERVER_ERROR, "Database error");

fn db_error(context: &str, e: crate::error::AppError) -> WebhookResult {
    tracing::error!("webhook {}: {}", context, e);
    DB_ERROR
}

/// Axum handler for the gateway webhook endpoint.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let signature = match headers.get("stripe-signature").and_then(|v| v.to_str().ok()) {
        Some(s) => s.to_string(),
        None => return (StatusCode::BAD_REQUEST, "Missing stripe-signature header"),
    };

    // Authenticity gate. A failure here is permanent: no retry guidance.
    match state.stripe.verify_webhook_signature(&body, &signature) {
        Ok(true) => {}
        Ok(false) => return (StatusCode::BAD_REQUEST, "Invalid signature"),
        Err(e) => {
            tracing::warn!("webhook signature verification error: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid signature");
        }
    }

    let event: StripeWebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("webhook payload is not valid JSON: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let conn = match state.db.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("webhook: failed to get db connection: {}", e);
            return DB_ERROR;
        }
    };

    dispatch_event(&conn, &event)
}

/// Parse the event payload for its type and apply it. One match arm per
/// known kind; anything else is deliberately ignored so new gateway event
/// types never break delivery.
pub fn dispatch_event(conn: &Connection, event: &StripeWebhookEvent) -> WebhookResult {
    let object = event.data.object.clone();
    let event_id = event.id.as_deref();

    match event.event_type.as_str() {
        "payment_intent.succeeded" => match serde_json::from_value::<StripePaymentIntent>(object) {
            Ok(intent) => apply_payment_intent_succeeded(conn, &intent),
            Err(e) => invalid_payload(&event.event_type, e),
        },
        "payment_intent.payment_failed" => {
            match serde_json::from_value::<StripePaymentIntent>(object) {
                Ok(intent) => apply_payment_intent_failed(conn, &intent),
                Err(e) => invalid_payload(&event.event_type, e),
            }
        }
        "charge.refunded" => match serde_json::from_value::<StripeCharge>(object) {
            Ok(charge) => apply_charge_refunded(conn, &charge),
            Err(e) => invalid_payload(&event.event_type, e),
        },
        "customer.subscription.created" | "customer.subscription.updated" => {
            match serde_json::from_value::<StripeSubscription>(object) {
                Ok(subscription) => apply_subscription_updated(conn, &subscription),
                Err(e) => invalid_payload(&event.event_type, e),
            }
        }
        "customer.subscription.deleted" => {
            match serde_json::from_value::<StripeSubscription>(object) {
                Ok(subscription) => apply_subscription_deleted(conn, &subscription),
                Err(e) => invalid_payload(&event.event_type, e),
            }
        }
        "invoice.payment_succeeded" => match serde_json::from_value::<StripeInvoice>(object) {
            Ok(invoice) => apply_invoice_paid(conn, event_id, &invoice),
            Err(e) => invalid_payload(&event.event_type, e),
        },
        "invoice.payment_failed" => match serde_json::from_value::<StripeInvoice>(object) {
            Ok(invoice) => apply_invoice_failed(conn, event_id, &invoice),
            Err(e) => invalid_payload(&event.event_type, e),
        },
        "account.updated" => match serde_json::from_value::<StripeAccount>(object) {
            Ok(account) => apply_account_updated(conn, &account),
            Err(e) => invalid_payload(&event.event_type, e),
        },
        other => {
            tracing::debug!("webhook: ignoring event type {}", other);
            (StatusCode::OK, "Ignored")
        }
    }
}

fn invalid_payload(event_type: &str, e: serde_json::Error) -> WebhookResult {
    tracing::warn!("webhook: failed to parse {} payload: {}", event_type, e);
    (StatusCode::BAD_REQUEST, "Invalid event payload")
}

fn outcome_result(context: &str, external_id: &str, outcome: ApplyOutcome) -> WebhookResult {
    match outcome {
        ApplyOutcome::Applied => (StatusCode::OK, "OK"),
        ApplyOutcome::AlreadyApplied => {
            tracing::debug!("webhook {}: {} already in target state", context, external_id);
            (StatusCode::OK, "Already applied")
        }
        ApplyOutcome::NotFound => {
            // Gateway-originated or test objects this system never created.
            tracing::info!("webhook {}: no local row for {}", context, external_id);
            (StatusCode::OK, "No matching row")
        }
    }
}

/// `payment_intent.succeeded`: pending -> succeeded, capturing the charge.
pub fn apply_payment_intent_succeeded(
    conn: &Connection,
    intent: &StripePaymentIntent,
) -> WebhookResult {
    match queries::mark_intent_succeeded(
        conn,
        &intent.id,
        intent.charge_id().as_deref(),
        intent.receipt_url().as_deref(),
    ) {
        Ok(outcome) => outcome_result("payment_intent.succeeded", &intent.id, outcome),
        Err(e) => db_error("payment_intent.succeeded", e),
    }
}

/// `payment_intent.payment_failed`: pending -> failed with the gateway's
/// error message.
pub fn apply_payment_intent_failed(
    conn: &Connection,
    intent: &StripePaymentIntent,
) -> WebhookResult {
    match queries::mark_intent_failed(conn, &intent.id, intent.error_message().as_deref()) {
        Ok(outcome) => outcome_result("payment_intent.payment_failed", &intent.id, outcome),
        Err(e) => db_error("payment_intent.payment_failed", e),
    }
}

/// `charge.refunded`: marks the ORIGINAL transaction refunded, matched by
/// charge id. The orchestrator's refund flow separately inserts a
/// refund-type row; both legitimately fire for one user action.
pub fn apply_charge_refunded(conn: &Connection, charge: &StripeCharge) -> WebhookResult {
    match queries::mark_charge_refunded(conn, &charge.id) {
        Ok(outcome) => outcome_result("charge.refunded", &charge.id, outcome),
        Err(e) => db_error("charge.refunded", e),
    }
}

/// `customer.subscription.created` / `.updated`: mirror status, billing
/// window, and the period-end cancellation flag. Fields absent from the
/// payload keep their current values.
pub fn apply_subscription_updated(
    conn: &Connection,
    subscription: &StripeSubscription,
) -> WebhookResult {
    let status = match SubscriptionStatus::from_gateway(&subscription.status) {
        Some(status) => status,
        None => {
            tracing::info!(
                "webhook subscription.updated: unknown gateway status '{}' for {}",
                subscription.status,
                subscription.id
            );
            return (StatusCode::OK, "Unknown subscription status");
        }
    };

    match queries::apply_subscription_snapshot(
        conn,
        &subscription.id,
        status,
        subscription.current_period_start,
        subscription.current_period_end,
        subscription.cancel_at_period_end,
    ) {
        Ok(true) => (StatusCode::OK, "OK"),
        Ok(false) => {
            tracing::info!(
                "webhook subscription.updated: no local row for {}",
                subscription.id
            );
            (StatusCode::OK, "No matching row")
        }
        Err(e) => db_error("subscription.updated", e),
    }
}

/// `customer.subscription.deleted`: terminal cancellation confirmed by
/// the gateway.
pub fn apply_subscription_deleted(
    conn: &Connection,
    subscription: &StripeSubscription,
) -> WebhookResult {
    let cancelled_at = subscription
        .canceled_at
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    match queries::mark_subscription_deleted(conn, &subscription.id, cancelled_at) {
        Ok(outcome) => outcome_result("subscription.deleted", &subscription.id, outcome),
        Err(e) => db_error("subscription.deleted", e),
    }
}

/// `invoice.payment_succeeded`: reset the failure counter, stamp the
/// payment date, and record the charge in the transaction ledger.
///
/// The charge record is an insert (or, for the first invoice, the
/// completion of the pending initial-charge row), so a replay guard on
/// the event id backs up the conditional updates.
pub fn apply_invoice_paid(
    conn: &Connection,
    event_id: Option<&str>,
    invoice: &StripeInvoice,
) -> WebhookResult {
    let subscription_id = match invoice.subscription_id() {
        Some(id) => id,
        None => return (StatusCode::OK, "Not a subscription invoice"),
    };

    if let Some(event_id) = event_id {
        match queries::try_record_webhook_event(conn, event_id, "invoice.payment_succeeded") {
            Ok(true) => {}
            Ok(false) => return (StatusCode::OK, "Already processed"),
            Err(e) => return db_error("invoice.payment_succeeded", e),
        }
    }

    let paid_at = invoice
        .created
        .unwrap_or_else(|| chrono::Utc::now().timestamp());
    let subscription = match queries::record_invoice_paid(conn, &subscription_id, paid_at) {
        Ok(Some(subscription)) => subscription,
        Ok(None) => {
            tracing::info!(
                "webhook invoice.payment_succeeded: no local row for {}",
                subscription_id
            );
            return (StatusCode::OK, "No matching row");
        }
        Err(e) => return db_error("invoice.payment_succeeded", e),
    };

    // First invoice: the orchestrator already wrote a pending row for this
    // intent; complete it instead of inserting a duplicate.
    if let Some(intent_id) = invoice.payment_intent_id() {
        match queries::get_transaction_by_intent(conn, &intent_id) {
            Ok(Some(_)) => {
                return match queries::mark_intent_succeeded(conn, &intent_id, None, None) {
                    Ok(_) => (StatusCode::OK, "OK"),
                    Err(e) => db_error("invoice.payment_succeeded", e),
                };
            }
            Ok(None) => {}
            Err(e) => return db_error("invoice.payment_succeeded", e),
        }
    }

    let amount_cents = invoice.amount_paid.unwrap_or(subscription.amount_cents);
    if amount_cents <= 0 {
        // Trial or fully-credited invoice; nothing moved.
        return (StatusCode::OK, "Zero-amount invoice");
    }

    let result = queries::create_transaction(
        conn,
        &crate::models::CreateTransaction {
            customer_id: subscription.owner_id.clone(),
            owner_id: subscription.owner_id.clone(),
            booking_id: None,
            stripe_payment_intent_id: invoice.payment_intent_id(),
            stripe_charge_id: None,
            stripe_account_id: None,
            amount_cents,
            platform_fee_cents: 0,
            net_amount_cents: amount_cents,
            currency: invoice
                .currency
                .clone()
                .unwrap_or_else(|| subscription.currency.clone()),
            tx_type: crate::models::TransactionType::Subscription,
            status: crate::models::TransactionStatus::Succeeded,
            metadata: Some(serde_json::json!({ "invoice_id": invoice.id }).to_string()),
        },
    );
    match result {
        Ok(_) => (StatusCode::OK, "OK"),
        Err(e) => db_error("invoice.payment_succeeded", e),
    }
}

/// `invoice.payment_failed`: escalate to past_due and bump the counter.
/// The increment makes this non-idempotent by itself, so it shares the
/// event-id replay guard.
pub fn apply_invoice_failed(
    conn: &Connection,
    event_id: Option<&str>,
    invoice: &StripeInvoice,
) -> WebhookResult {
    let subscription_id = match invoice.subscription_id() {
        Some(id) => id,
        None => return (StatusCode::OK, "Not a subscription invoice"),
    };

    if let Some(event_id) = event_id {
        match queries::try_record_webhook_event(conn, event_id, "invoice.payment_failed") {
            Ok(true) => {}
            Ok(false) => return (StatusCode::OK, "Already processed"),
            Err(e) => return db_error("invoice.payment_failed", e),
        }
    }

    match queries::record_invoice_failed(conn, &subscription_id) {
        Ok(Some(subscription)) => {
            tracing::warn!(
                "invoice payment failed for subscription {} (failures: {})",
                subscription_id,
                subscription.failed_payment_count
            );
            (StatusCode::OK, "OK")
        }
        Ok(None) => {
            tracing::info!(
                "webhook invoice.payment_failed: no local row for {}",
                subscription_id
            );
            (StatusCode::OK, "No matching row")
        }
        Err(e) => db_error("invoice.payment_failed", e),
    }
}

/// `account.updated`: refresh the capability flags and snapshots; the
/// derived onboarding status follows automatically at read time.
pub fn apply_account_updated(conn: &Connection, account: &StripeAccount) -> WebhookResult {
    match queries::apply_account_snapshot(conn, &account.id, &account.snapshot()) {
        Ok(Some(_)) => (StatusCode::OK, "OK"),
        Ok(None) => {
            tracing::info!("webhook account.updated: no local row for {}", account.id);
            (StatusCode::OK, "No matching row")
        }
        Err(e) => db_error("account.updated", e),
    }
}
