pub mod connect;
pub mod payments;
pub mod subscriptions;
pub mod webhooks;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};

use crate::db::AppState;
use crate::middleware::require_auth;

pub async fn health() -> &'static str {
    "ok"
}

/// Bearer-authenticated API surface. Every route passes the access gate
/// before its handler runs; the webhook router is mounted separately and
/// relies on signature verification instead.
pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        // Payments
        .route("/payments/deposit", post(payments::create_deposit))
        .route("/payments/full", post(payments::create_full_payment))
        .route("/payments/confirm", post(payments::confirm_payment))
        .route("/payments/{transaction_id}/refund", post(payments::refund_payment))
        .route("/transactions/{transaction_id}", get(payments::get_transaction))
        .route("/customers/{customer_id}/transactions", get(payments::list_customer_transactions))
        .route("/owners/{owner_id}/transactions", get(payments::list_owner_transactions))
        .route("/bookings/{booking_id}/transactions", get(payments::list_booking_transactions))
        // Subscriptions
        .route("/subscriptions", post(subscriptions::create_subscription))
        .route("/subscriptions", get(subscriptions::get_subscription))
        .route("/subscriptions", put(subscriptions::update_subscription))
        .route("/subscriptions/cancel", post(subscriptions::cancel_subscription))
        .route("/subscriptions/reactivate", post(subscriptions::reactivate_subscription))
        .route("/subscriptions/invoices", get(subscriptions::list_invoices))
        // Connect onboarding
        .route("/connect/account", post(connect::create_account))
        .route("/connect/account", get(connect::get_account))
        .route("/connect/account", delete(connect::delete_account))
        .route("/connect/account/onboarding-link", post(connect::create_account_link))
        .route("/connect/account/login-link", post(connect::create_login_link))
        .layer(middleware::from_fn_with_state(state, require_auth))
}
