//! Synchronous payment orchestration: deposits, full payments with
//! platform fee + merchant transfer, confirm, refunds, and reads.
//!
//! Rows are created `pending` only after the gateway call succeeds, so a
//! rejected gateway request never leaves an orphan row. Terminal status
//! is otherwise owned by the webhook reconciler; the confirm endpoint is
//! a synchronous shortcut that goes through the exact same conditional
//! updates.

use axum::{extract::State, Extension};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path, Query};
use crate::models::{AuthContext, CreateTransaction, Transaction, TransactionStatus, TransactionType};
use crate::pagination::{Paginated, PaginationQuery};
use crate::payments::{map_intent_status, CreateIntentRequest};

/// Percentage of an amount, rounded half-up in minor units.
pub fn percentage_cents(amount_cents: i64, percent: i64) -> i64 {
    (amount_cents * percent + 50) / 100
}

/// Resolve (or create) the gateway customer for a user through the
/// explicit mapping table. First write wins under concurrent creation.
pub(crate) async fn resolve_gateway_customer(
    state: &AppState,
    user_id: &str,
    email: Option<&str>,
) -> Result<String> {
    let conn = state.db.get()?;
    if let Some(existing) = queries::get_gateway_customer(&conn, user_id)? {
        return Ok(existing);
    }
    let customer = state.stripe.create_customer(user_id, email).await?;
    queries::save_gateway_customer(&conn, user_id, &customer.id)
}

/// Flatten caller metadata into string pairs for the gateway, keeping the
/// raw JSON for the local row.
fn metadata_pairs(metadata: Option<&serde_json::Value>) -> Vec<(String, String)> {
    metadata
        .and_then(|value| value.as_object())
        .map(|object| {
            object
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    /// Merchant being paid
    pub owner_id: String,
    pub booking_id: Option<String>,
    /// Full booking amount; the deposit is a configured percentage of it
    pub amount_cents: i64,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct FullPaymentRequest {
    pub owner_id: String,
    pub booking_id: Option<String>,
    pub amount_cents: i64,
    /// Deposit already collected for this booking
    #[serde(default)]
    pub deposit_paid_cents: i64,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    /// Client-side secret for completing the intent
    pub client_secret: Option<String>,
    pub transaction: Transaction,
}

/// POST /payments/deposit
pub async fn create_deposit(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<DepositRequest>,
) -> Result<Json<PaymentResponse>> {
    if request.amount_cents <= 0 {
        return Err(AppError::Validation(msg::AMOUNT_NOT_POSITIVE.into()));
    }
    let deposit_cents = percentage_cents(request.amount_cents, state.deposit_percent);
    if deposit_cents <= 0 {
        return Err(AppError::Validation(msg::AMOUNT_NOT_POSITIVE.into()));
    }

    let customer_id = ctx.user.user_id.clone();
    let gateway_customer = resolve_gateway_customer(&state, &customer_id, None).await?;

    let mut intent_metadata = metadata_pairs(request.metadata.as_ref());
    intent_metadata.push(("tx_type".to_string(), "deposit".to_string()));
    if let Some(ref booking_id) = request.booking_id {
        intent_metadata.push(("booking_id".to_string(), booking_id.clone()));
    }

    let intent = state
        .stripe
        .create_payment_intent(&CreateIntentRequest {
            amount_cents: deposit_cents,
            currency: state.currency.clone(),
            customer_id: gateway_customer,
            application_fee_cents: None,
            transfer_destination: None,
            metadata: intent_metadata,
        })
        .await?;

    let conn = state.db.get()?;
    let transaction = queries::create_transaction(
        &conn,
        &CreateTransaction {
            customer_id,
            owner_id: request.owner_id.clone(),
            booking_id: request.booking_id.clone(),
            stripe_payment_intent_id: Some(intent.id.clone()),
            stripe_charge_id: None,
            stripe_account_id: None,
            amount_cents: deposit_cents,
            platform_fee_cents: 0,
            net_amount_cents: deposit_cents,
            currency: state.currency.clone(),
            tx_type: TransactionType::Deposit,
            status: TransactionStatus::Pending,
            metadata: request.metadata.as_ref().map(|m| m.to_string()),
        },
    )?;

    Ok(Json(PaymentResponse {
        client_secret: intent.client_secret,
        transaction,
    }))
}

/// POST /payments/full
///
/// The remainder after the deposit, routed to the merchant's connected
/// account net of the platform fee.
pub async fn create_full_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<FullPaymentRequest>,
) -> Result<Json<PaymentResponse>> {
    if request.amount_cents <= 0 {
        return Err(AppError::Validation(msg::AMOUNT_NOT_POSITIVE.into()));
    }
    let remaining_cents = request.amount_cents - request.deposit_paid_cents;
    if remaining_cents <= 0 {
        return Err(AppError::Conflict(msg::ALREADY_PAID.into()));
    }

    // The payee must be able to receive transfers before any money moves.
    let account = {
        let conn = state.db.get()?;
        queries::get_connect_account_by_owner(&conn, &request.owner_id)?
    };
    let account = match account {
        Some(account) if account.is_fully_onboarded() => account,
        _ => return Err(AppError::AccountNotConfigured(msg::NOT_ONBOARDED.into())),
    };

    let fee_cents = percentage_cents(remaining_cents, state.platform_fee_percent);
    let net_cents = remaining_cents - fee_cents;

    let customer_id = ctx.user.user_id.clone();
    let gateway_customer = resolve_gateway_customer(&state, &customer_id, None).await?;

    let mut intent_metadata = metadata_pairs(request.metadata.as_ref());
    intent_metadata.push(("tx_type".to_string(), "full_payment".to_string()));
    if let Some(ref booking_id) = request.booking_id {
        intent_metadata.push(("booking_id".to_string(), booking_id.clone()));
    }

    let intent = state
        .stripe
        .create_payment_intent(&CreateIntentRequest {
            amount_cents: remaining_cents,
            currency: state.currency.clone(),
            customer_id: gateway_customer,
            application_fee_cents: Some(fee_cents),
            transfer_destination: Some(account.stripe_account_id.clone()),
            metadata: intent_metadata,
        })
        .await?;

    let conn = state.db.get()?;
    let transaction = queries::create_transaction(
        &conn,
        &CreateTransaction {
            customer_id,
            owner_id: request.owner_id.clone(),
            booking_id: request.booking_id.clone(),
            stripe_payment_intent_id: Some(intent.id.clone()),
            stripe_charge_id: None,
            stripe_account_id: Some(account.stripe_account_id),
            amount_cents: remaining_cents,
            platform_fee_cents: fee_cents,
            net_amount_cents: net_cents,
            currency: state.currency.clone(),
            tx_type: TransactionType::FullPayment,
            status: TransactionStatus::Pending,
            metadata: request.metadata.as_ref().map(|m| m.to_string()),
        },
    )?;

    Ok(Json(PaymentResponse {
        client_secret: intent.client_secret,
        transaction,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub payment_intent_id: String,
}

/// POST /payments/confirm
///
/// Synchronous reconciliation shortcut: mirrors the gateway's current
/// intent status onto the transaction without waiting for the webhook,
/// through the same status mapping and conditional updates the
/// reconciler uses.
pub async fn confirm_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<Transaction>> {
    {
        let conn = state.db.get()?;
        let transaction = queries::get_transaction_by_intent(&conn, &request.payment_intent_id)
            .or_not_found(msg::TRANSACTION_NOT_FOUND)?;
        ctx.require_party(&transaction.customer_id, &transaction.owner_id)?;
    }

    let intent = state
        .stripe
        .retrieve_payment_intent(&request.payment_intent_id)
        .await?;

    let conn = state.db.get()?;
    match map_intent_status(&intent.status) {
        Some(TransactionStatus::Succeeded) => {
            queries::mark_intent_succeeded(
                &conn,
                &intent.id,
                intent.charge_id().as_deref(),
                intent.receipt_url().as_deref(),
            )?;
        }
        Some(TransactionStatus::Cancelled) => {
            queries::mark_intent_cancelled(&conn, &intent.id)?;
        }
        // Still in flight (requires_action etc.): the row stays pending.
        _ => {}
    }

    let transaction = queries::get_transaction_by_intent(&conn, &request.payment_intent_id)
        .or_not_found(msg::TRANSACTION_NOT_FOUND)?;
    Ok(Json(transaction))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    /// Defaults to the full original amount
    pub amount_cents: Option<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionPath {
    pub transaction_id: String,
}

/// Validate that a transaction can be refunded and resolve the amount.
/// Factored out of the handler so the rules are testable without a
/// gateway round-trip.
pub fn validate_refund(
    transaction: &Transaction,
    requested_cents: Option<i64>,
) -> Result<i64> {
    if transaction.status != TransactionStatus::Succeeded {
        return Err(AppError::InvalidStatus(msg::REFUND_REQUIRES_SUCCESS.into()));
    }
    if transaction.stripe_payment_intent_id.is_none() {
        return Err(AppError::InvalidStatus(msg::NO_PAYMENT_INTENT.into()));
    }
    let amount = requested_cents.unwrap_or(transaction.amount_cents);
    if amount <= 0 {
        return Err(AppError::Validation(msg::AMOUNT_NOT_POSITIVE.into()));
    }
    if amount > transaction.amount_cents {
        return Err(AppError::Validation(msg::REFUND_EXCEEDS_ORIGINAL.into()));
    }
    Ok(amount)
}

/// POST /payments/{transaction_id}/refund
///
/// Issues a gateway refund and records it as a NEW refund-type row born
/// `succeeded`, referencing the same payment intent. The original row is
/// an immutable audit record; only the `charge.refunded` webhook flips
/// its status.
pub async fn refund_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(path): Path<TransactionPath>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<Transaction>> {
    let original = {
        let conn = state.db.get()?;
        queries::get_transaction(&conn, &path.transaction_id)
            .or_not_found(msg::TRANSACTION_NOT_FOUND)?
    };
    ctx.require_party(&original.customer_id, &original.owner_id)?;

    let refund_cents = validate_refund(&original, request.amount_cents)?;
    let intent_id = original
        .stripe_payment_intent_id
        .clone()
        .ok_or_else(|| AppError::InvalidStatus(msg::NO_PAYMENT_INTENT.into()))?;

    let refund = state
        .stripe
        .create_refund(&intent_id, Some(refund_cents), request.reason.as_deref())
        .await?;

    let metadata = serde_json::json!({
        "refund_id": refund.id,
        "refunded_transaction_id": original.id,
        "reason": request.reason,
    });

    // Refund creation is itself the gateway round-trip, so the row is
    // born terminal rather than pending.
    let conn = state.db.get()?;
    let transaction = queries::create_transaction(
        &conn,
        &CreateTransaction {
            customer_id: original.customer_id.clone(),
            owner_id: original.owner_id.clone(),
            booking_id: original.booking_id.clone(),
            stripe_payment_intent_id: Some(intent_id),
            stripe_charge_id: None,
            stripe_account_id: original.stripe_account_id.clone(),
            amount_cents: refund_cents,
            platform_fee_cents: 0,
            net_amount_cents: refund_cents,
            currency: original.currency.clone(),
            tx_type: TransactionType::Refund,
            status: TransactionStatus::Succeeded,
            metadata: Some(metadata.to_string()),
        },
    )?;

    Ok(Json(transaction))
}

// ============ Reads ============

/// GET /transactions/{transaction_id}
pub async fn get_transaction(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(path): Path<TransactionPath>,
) -> Result<Json<Transaction>> {
    let conn = state.db.get()?;
    let transaction = queries::get_transaction(&conn, &path.transaction_id)
        .or_not_found(msg::TRANSACTION_NOT_FOUND)?;
    ctx.require_party(&transaction.customer_id, &transaction.owner_id)?;
    Ok(Json(transaction))
}

#[derive(Debug, Deserialize)]
pub struct CustomerPath {
    pub customer_id: String,
}

/// GET /customers/{customer_id}/transactions
pub async fn list_customer_transactions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(path): Path<CustomerPath>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Paginated<Transaction>>> {
    ctx.require_self_or_staff(&path.customer_id)?;
    let conn = state.db.get()?;
    let (items, total) =
        queries::list_customer_transactions(&conn, &path.customer_id, query.limit(), query.offset())?;
    Ok(Json(Paginated::new(items, total, query.limit(), query.offset())))
}

#[derive(Debug, Deserialize)]
pub struct OwnerPath {
    pub owner_id: String,
}

/// GET /owners/{owner_id}/transactions
pub async fn list_owner_transactions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(path): Path<OwnerPath>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<Paginated<Transaction>>> {
    ctx.require_owner_or_staff(&path.owner_id)?;
    let conn = state.db.get()?;
    let (items, total) =
        queries::list_owner_transactions(&conn, &path.owner_id, query.limit(), query.offset())?;
    Ok(Json(Paginated::new(items, total, query.limit(), query.offset())))
}

#[derive(Debug, Deserialize)]
pub struct BookingPath {
    pub booking_id: String,
}

/// GET /bookings/{booking_id}/transactions
///
/// Non-staff callers see only the rows they are a party to.
pub async fn list_booking_transactions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(path): Path<BookingPath>,
) -> Result<Json<Vec<Transaction>>> {
    let conn = state.db.get()?;
    let mut items = queries::list_booking_transactions(&conn, &path.booking_id)?;
    if !ctx.is_staff() {
        items.retain(|t| {
            t.customer_id == ctx.user.user_id
                || ctx.user.owner_id.as_deref() == Some(t.owner_id.as_str())
        });
    }
    Ok(Json(items))
}
