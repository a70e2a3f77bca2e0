//! Recurring-billing orchestration for merchant subscriptions.
//!
//! The local row tracks the gateway subscription; period rollover,
//! payment failure escalation, and gateway-confirmed cancellation arrive
//! through the webhook reconciler. Everything here is the synchronous
//! request path.

use axum::{extract::State, Extension};
use serde::Deserialize;

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::Json;
use crate::models::{
    AuthContext, CreateTransaction, Subscription, SubscriptionPlan, SubscriptionStatus,
    TransactionStatus, TransactionType, UpsertSubscription,
};
use crate::payments::StripeInvoice;

use super::payments::resolve_gateway_customer;

#[derive(Debug, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan: SubscriptionPlan,
    pub email: Option<String>,
    pub payment_method_id: String,
}

/// POST /subscriptions
pub async fn create_subscription(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<Json<Subscription>> {
    let owner_id = ctx.require_owner()?.to_string();

    {
        let conn = state.db.get()?;
        if let Some(existing) = queries::get_subscription_by_owner(&conn, &owner_id)? {
            if existing.is_active() {
                return Err(AppError::Conflict(msg::SUBSCRIPTION_EXISTS.into()));
            }
        }
    }

    let gateway_customer =
        resolve_gateway_customer(&state, &ctx.user.user_id, request.email.as_deref()).await?;

    // Two dependent gateway calls, executed sequentially. If setting the
    // default fails after attach, the attached method persists at the
    // gateway; a retry re-attaches the same method, which is benign.
    state
        .stripe
        .attach_payment_method(&request.payment_method_id, &gateway_customer)
        .await?;
    state
        .stripe
        .set_default_payment_method(&gateway_customer, &request.payment_method_id)
        .await?;

    let pricing = state.plans.pricing(request.plan).clone();
    let gateway_sub = state
        .stripe
        .create_subscription(&gateway_customer, &pricing.price_id)
        .await?;

    let status = SubscriptionStatus::from_gateway(&gateway_sub.status)
        .unwrap_or(SubscriptionStatus::Active);

    let conn = state.db.get()?;
    let subscription = queries::upsert_subscription(
        &conn,
        &UpsertSubscription {
            owner_id: owner_id.clone(),
            stripe_subscription_id: Some(gateway_sub.id.clone()),
            stripe_customer_id: Some(gateway_customer),
            stripe_price_id: Some(pricing.price_id.clone()),
            plan: request.plan,
            amount_cents: pricing.amount_cents,
            currency: state.currency.clone(),
            billing_interval: pricing.interval.clone(),
            status,
            current_period_start: gateway_sub.current_period_start,
            current_period_end: gateway_sub.current_period_end,
        },
    )?;

    // Record the first charge attempt. The invoice-success webhook flips
    // it to succeeded via the shared intent-status path.
    queries::create_transaction(
        &conn,
        &CreateTransaction {
            customer_id: ctx.user.user_id.clone(),
            owner_id,
            booking_id: None,
            stripe_payment_intent_id: gateway_sub.latest_invoice_payment_intent(),
            stripe_charge_id: None,
            stripe_account_id: None,
            amount_cents: pricing.amount_cents,
            platform_fee_cents: 0,
            net_amount_cents: pricing.amount_cents,
            currency: state.currency.clone(),
            tx_type: TransactionType::Subscription,
            status: TransactionStatus::Pending,
            metadata: None,
        },
    )?;

    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub plan: SubscriptionPlan,
}

/// PUT /subscriptions
///
/// Plan switch with proration. The existing row is mutated in place;
/// there is never a second subscription row for an owner.
pub async fn update_subscription(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> Result<Json<Subscription>> {
    let owner_id = ctx.require_owner()?.to_string();

    let existing = {
        let conn = state.db.get()?;
        queries::get_subscription_by_owner(&conn, &owner_id)
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?
    };
    if existing.plan == request.plan {
        return Err(AppError::Conflict(msg::SAME_PLAN.into()));
    }
    let gateway_sub_id = existing
        .stripe_subscription_id
        .ok_or_else(|| AppError::InvalidStatus("Subscription is not linked to the gateway".into()))?;

    let pricing = state.plans.pricing(request.plan).clone();

    let gateway_sub = state.stripe.retrieve_subscription(&gateway_sub_id).await?;
    let item_id = gateway_sub
        .first_item_id()
        .ok_or_else(|| AppError::Gateway("Gateway subscription has no items".into()))?
        .to_string();
    state
        .stripe
        .update_subscription_price(&gateway_sub_id, &item_id, &pricing.price_id)
        .await?;

    let conn = state.db.get()?;
    let subscription = queries::update_subscription_plan(
        &conn,
        &owner_id,
        request.plan,
        &pricing.price_id,
        pricing.amount_cents,
    )?
    .ok_or_else(|| AppError::NotFound(msg::SUBSCRIPTION_NOT_FOUND.into()))?;

    Ok(Json(subscription))
}

#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    /// true: hard cancel now; false: stop renewing at period end
    #[serde(default)]
    pub immediate: bool,
}

/// POST /subscriptions/cancel
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<CancelSubscriptionRequest>,
) -> Result<Json<Subscription>> {
    let owner_id = ctx.require_owner()?.to_string();

    let existing = {
        let conn = state.db.get()?;
        queries::get_subscription_by_owner(&conn, &owner_id)
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?
    };
    let gateway_sub_id = existing
        .stripe_subscription_id
        .ok_or_else(|| AppError::InvalidStatus("Subscription is not linked to the gateway".into()))?;

    let conn = state.db.get()?;
    let subscription = if request.immediate {
        state.stripe.cancel_subscription(&gateway_sub_id).await?;
        // Synchronous terminal state; no webhook dependency.
        queries::cancel_subscription_now(&conn, &owner_id, chrono::Utc::now().timestamp())?
            .ok_or_else(|| AppError::NotFound(msg::SUBSCRIPTION_NOT_FOUND.into()))?
    } else {
        state
            .stripe
            .set_subscription_cancel_at_period_end(&gateway_sub_id, true)
            .await?;
        // Status stays as-is until the reconciler confirms the rollover.
        queries::set_cancel_at_period_end(&conn, &owner_id, true)?
            .ok_or_else(|| AppError::NotFound(msg::SUBSCRIPTION_NOT_FOUND.into()))?
    };

    Ok(Json(subscription))
}

/// POST /subscriptions/reactivate
///
/// Only undoes a pending period-end cancellation.
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Subscription>> {
    let owner_id = ctx.require_owner()?.to_string();

    let existing = {
        let conn = state.db.get()?;
        queries::get_subscription_by_owner(&conn, &owner_id)
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?
    };
    if !existing.cancel_at_period_end {
        return Err(AppError::Conflict(msg::NOT_CANCELLING.into()));
    }
    let gateway_sub_id = existing
        .stripe_subscription_id
        .ok_or_else(|| AppError::InvalidStatus("Subscription is not linked to the gateway".into()))?;

    state
        .stripe
        .set_subscription_cancel_at_period_end(&gateway_sub_id, false)
        .await?;

    let conn = state.db.get()?;
    let subscription = queries::set_cancel_at_period_end(&conn, &owner_id, false)?
        .ok_or_else(|| AppError::NotFound(msg::SUBSCRIPTION_NOT_FOUND.into()))?;

    Ok(Json(subscription))
}

/// GET /subscriptions
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Subscription>> {
    let owner_id = ctx.require_owner()?.to_string();
    let conn = state.db.get()?;
    let subscription = queries::get_subscription_by_owner(&conn, &owner_id)
        .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
    Ok(Json(subscription))
}

/// GET /subscriptions/invoices
///
/// Pass-through listing from the gateway; invoices are never persisted
/// locally, only their effects on the ledger are.
pub async fn list_invoices(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<StripeInvoice>>> {
    let owner_id = ctx.require_owner()?.to_string();

    let customer_id = {
        let conn = state.db.get()?;
        let subscription = queries::get_subscription_by_owner(&conn, &owner_id)
            .or_not_found(msg::SUBSCRIPTION_NOT_FOUND)?;
        subscription
            .stripe_customer_id
            .or(queries::get_gateway_customer(&conn, &ctx.user.user_id)?)
            .ok_or_else(|| {
                AppError::InvalidStatus("Subscription has no gateway customer".into())
            })?
    };

    let invoices = state.stripe.list_invoices(&customer_id).await?;
    Ok(Json(invoices))
}
