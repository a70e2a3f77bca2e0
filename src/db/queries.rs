use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

use super::from_row::{
    query_all, query_one, FromRow, CONNECT_ACCOUNT_COLS, SUBSCRIPTION_COLS, TRANSACTION_COLS,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Outcome of a conditional (compare-and-set) status update.
///
/// `AlreadyApplied` covers both "the row is already in the target state"
/// and "the row is in a state this transition may not leave" - in either
/// case nothing was written, which is what makes duplicate webhook
/// delivery safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    AlreadyApplied,
    NotFound,
}

// ============ Transactions ============

pub fn create_transaction(conn: &Connection, input: &CreateTransaction) -> Result<Transaction> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO transactions (id, customer_id, owner_id, booking_id,
             stripe_payment_intent_id, stripe_charge_id, stripe_account_id,
             amount_cents, platform_fee_cents, net_amount_cents, currency,
             tx_type, status, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            &id,
            &input.customer_id,
            &input.owner_id,
            &input.booking_id,
            &input.stripe_payment_intent_id,
            &input.stripe_charge_id,
            &input.stripe_account_id,
            input.amount_cents,
            input.platform_fee_cents,
            input.net_amount_cents,
            &input.currency,
            input.tx_type.as_str(),
            input.status.as_str(),
            &input.metadata,
            now,
            now,
        ],
    )?;

    Ok(Transaction {
        id,
        customer_id: input.customer_id.clone(),
        owner_id: input.owner_id.clone(),
        booking_id: input.booking_id.clone(),
        stripe_payment_intent_id: input.stripe_payment_intent_id.clone(),
        stripe_charge_id: input.stripe_charge_id.clone(),
        stripe_account_id: input.stripe_account_id.clone(),
        amount_cents: input.amount_cents,
        platform_fee_cents: input.platform_fee_cents,
        net_amount_cents: input.net_amount_cents,
        currency: input.currency.clone(),
        tx_type: input.tx_type,
        status: input.status,
        error_message: None,
        receipt_url: None,
        metadata: input.metadata.clone(),
        created_at: now,
        updated_at: now,
    })
}

pub fn get_transaction(conn: &Connection, id: &str) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!("SELECT {} FROM transactions WHERE id = ?1", TRANSACTION_COLS),
        &[&id],
    )
}

/// Look up the payment (non-refund) transaction for a gateway intent.
/// Refund rows share the intent id of the row they reverse and are
/// never the target of intent-status events.
pub fn get_transaction_by_intent(conn: &Connection, intent_id: &str) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM transactions
             WHERE stripe_payment_intent_id = ?1 AND tx_type != 'refund'",
            TRANSACTION_COLS
        ),
        &[&intent_id],
    )
}

pub fn get_transaction_by_charge(conn: &Connection, charge_id: &str) -> Result<Option<Transaction>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM transactions
             WHERE stripe_charge_id = ?1 AND tx_type != 'refund'",
            TRANSACTION_COLS
        ),
        &[&charge_id],
    )
}

pub fn list_customer_transactions(
    conn: &Connection,
    customer_id: &str,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Transaction>, i64)> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE customer_id = ?1",
        params![customer_id],
        |row| row.get(0),
    )?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE customer_id = ?1
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            TRANSACTION_COLS
        ),
        &[&customer_id, &limit, &offset],
    )?;
    Ok((items, total))
}

pub fn list_owner_transactions(
    conn: &Connection,
    owner_id: &str,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Transaction>, i64)> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE owner_id = ?1",
        params![owner_id],
        |row| row.get(0),
    )?;
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE owner_id = ?1
             ORDER BY created_at DESC LIMIT ?2 OFFSET ?3",
            TRANSACTION_COLS
        ),
        &[&owner_id, &limit, &offset],
    )?;
    Ok((items, total))
}

pub fn list_booking_transactions(conn: &Connection, booking_id: &str) -> Result<Vec<Transaction>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM transactions WHERE booking_id = ?1 ORDER BY created_at ASC",
            TRANSACTION_COLS
        ),
        &[&booking_id],
    )
}

/// Resolve what happened after a conditional update matched zero rows:
/// either the row does not exist, or it is already past this transition.
fn zero_rows_outcome(lookup: Result<Option<Transaction>>) -> Result<ApplyOutcome> {
    match lookup? {
        Some(_) => Ok(ApplyOutcome::AlreadyApplied),
        None => Ok(ApplyOutcome::NotFound),
    }
}

/// `pending -> succeeded` for the transaction matching a gateway intent.
/// Captures the charge id (and receipt url when the gateway provided one).
pub fn mark_intent_succeeded(
    conn: &Connection,
    intent_id: &str,
    charge_id: Option<&str>,
    receipt_url: Option<&str>,
) -> Result<ApplyOutcome> {
    let affected = conn.execute(
        "UPDATE transactions
         SET status = 'succeeded',
             stripe_charge_id = COALESCE(?2, stripe_charge_id),
             receipt_url = COALESCE(?3, receipt_url),
             updated_at = ?4
         WHERE stripe_payment_intent_id = ?1 AND tx_type != 'refund' AND status = 'pending'",
        params![intent_id, charge_id, receipt_url, now()],
    )?;
    if affected > 0 {
        return Ok(ApplyOutcome::Applied);
    }
    zero_rows_outcome(get_transaction_by_intent(conn, intent_id))
}

/// `pending -> failed`, storing the gateway's error message.
pub fn mark_intent_failed(
    conn: &Connection,
    intent_id: &str,
    error_message: Option<&str>,
) -> Result<ApplyOutcome> {
    let affected = conn.execute(
        "UPDATE transactions
         SET status = 'failed', error_message = ?2, updated_at = ?3
         WHERE stripe_payment_intent_id = ?1 AND tx_type != 'refund' AND status = 'pending'",
        params![intent_id, error_message, now()],
    )?;
    if affected > 0 {
        return Ok(ApplyOutcome::Applied);
    }
    zero_rows_outcome(get_transaction_by_intent(conn, intent_id))
}

/// `pending -> cancelled`.
pub fn mark_intent_cancelled(conn: &Connection, intent_id: &str) -> Result<ApplyOutcome> {
    let affected = conn.execute(
        "UPDATE transactions
         SET status = 'cancelled', updated_at = ?2
         WHERE stripe_payment_intent_id = ?1 AND tx_type != 'refund' AND status = 'pending'",
        params![intent_id, now()],
    )?;
    if affected > 0 {
        return Ok(ApplyOutcome::Applied);
    }
    zero_rows_outcome(get_transaction_by_intent(conn, intent_id))
}

/// `succeeded -> refunded` for the ORIGINAL transaction, matched by charge.
/// Distinct from the refund-type row the orchestrator inserts; both fire
/// for the same user action.
pub fn mark_charge_refunded(conn: &Connection, charge_id: &str) -> Result<ApplyOutcome> {
    let affected = conn.execute(
        "UPDATE transactions
         SET status = 'refunded', updated_at = ?2
         WHERE stripe_charge_id = ?1 AND tx_type != 'refund' AND status = 'succeeded'",
        params![charge_id, now()],
    )?;
    if affected > 0 {
        return Ok(ApplyOutcome::Applied);
    }
    zero_rows_outcome(get_transaction_by_charge(conn, charge_id))
}

// ============ Gateway customers ============

pub fn get_gateway_customer(conn: &Connection, user_id: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT stripe_customer_id FROM gateway_customers WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .optional()
    .map_err(Into::into)
}

/// Record the mapping for a freshly created gateway customer. First write
/// wins under concurrent creation; the canonical id is read back and
/// returned so the caller always uses the winner.
pub fn save_gateway_customer(
    conn: &Connection,
    user_id: &str,
    stripe_customer_id: &str,
) -> Result<String> {
    conn.execute(
        "INSERT INTO gateway_customers (user_id, stripe_customer_id, created_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id) DO NOTHING",
        params![user_id, stripe_customer_id, now()],
    )?;
    conn.query_row(
        "SELECT stripe_customer_id FROM gateway_customers WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

// ============ Subscriptions ============

pub fn get_subscription_by_owner(conn: &Connection, owner_id: &str) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE owner_id = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&owner_id],
    )
}

pub fn get_subscription_by_stripe_id(
    conn: &Connection,
    stripe_subscription_id: &str,
) -> Result<Option<Subscription>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM subscriptions WHERE stripe_subscription_id = ?1",
            SUBSCRIPTION_COLS
        ),
        &[&stripe_subscription_id],
    )
}

/// Create the merchant's subscription row, or revive the existing
/// inactive/cancelled one. The owner_id uniqueness constraint makes this
/// race-safe: two concurrent checkouts converge on a single row instead of
/// a check-then-insert duplicate.
pub fn upsert_subscription(conn: &Connection, input: &UpsertSubscription) -> Result<Subscription> {
    let id = gen_id();
    let now = now();
    let next_payment = input.current_period_end;

    conn.query_row(
        &format!(
            "INSERT INTO subscriptions (id, owner_id, stripe_subscription_id,
                 stripe_customer_id, stripe_price_id, plan, amount_cents, currency,
                 billing_interval, status, current_period_start, current_period_end,
                 next_payment_date, failed_payment_count, cancel_at_period_end,
                 cancelled_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 0, 0, NULL, ?14, ?14)
             ON CONFLICT(owner_id) DO UPDATE SET
                 stripe_subscription_id = excluded.stripe_subscription_id,
                 stripe_customer_id = excluded.stripe_customer_id,
                 stripe_price_id = excluded.stripe_price_id,
                 plan = excluded.plan,
                 amount_cents = excluded.amount_cents,
                 currency = excluded.currency,
                 billing_interval = excluded.billing_interval,
                 status = excluded.status,
                 current_period_start = excluded.current_period_start,
                 current_period_end = excluded.current_period_end,
                 next_payment_date = excluded.next_payment_date,
                 failed_payment_count = 0,
                 cancel_at_period_end = 0,
                 cancelled_at = NULL,
                 updated_at = excluded.updated_at
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        params![
            &id,
            &input.owner_id,
            &input.stripe_subscription_id,
            &input.stripe_customer_id,
            &input.stripe_price_id,
            input.plan.as_str(),
            input.amount_cents,
            &input.currency,
            &input.billing_interval,
            input.status.as_str(),
            input.current_period_start,
            input.current_period_end,
            next_payment,
            now,
        ],
        Subscription::from_row,
    )
    .map_err(Into::into)
}

/// Plan switch: same row, new catalog reference. Returns None when the
/// owner has no subscription.
pub fn update_subscription_plan(
    conn: &Connection,
    owner_id: &str,
    plan: SubscriptionPlan,
    stripe_price_id: &str,
    amount_cents: i64,
) -> Result<Option<Subscription>> {
    conn.query_row(
        &format!(
            "UPDATE subscriptions
             SET plan = ?2, stripe_price_id = ?3, amount_cents = ?4, updated_at = ?5
             WHERE owner_id = ?1
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        params![owner_id, plan.as_str(), stripe_price_id, amount_cents, now()],
        Subscription::from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn set_cancel_at_period_end(
    conn: &Connection,
    owner_id: &str,
    cancel: bool,
) -> Result<Option<Subscription>> {
    conn.query_row(
        &format!(
            "UPDATE subscriptions
             SET cancel_at_period_end = ?2, updated_at = ?3
             WHERE owner_id = ?1
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        params![owner_id, cancel as i64, now()],
        Subscription::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Immediate cancellation on the synchronous path; no webhook involved.
pub fn cancel_subscription_now(
    conn: &Connection,
    owner_id: &str,
    cancelled_at: i64,
) -> Result<Option<Subscription>> {
    conn.query_row(
        &format!(
            "UPDATE subscriptions
             SET status = 'cancelled', cancelled_at = ?2, cancel_at_period_end = 0, updated_at = ?3
             WHERE owner_id = ?1
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        params![owner_id, cancelled_at, now()],
        Subscription::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Mirror a gateway subscription snapshot (created/updated events). Only
/// the fields present on the payload are written; absent period bounds
/// keep their current values so out-of-order delivery cannot blank them.
pub fn apply_subscription_snapshot(
    conn: &Connection,
    stripe_subscription_id: &str,
    status: SubscriptionStatus,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    cancel_at_period_end: Option<bool>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE subscriptions
         SET status = ?2,
             current_period_start = COALESCE(?3, current_period_start),
             current_period_end = COALESCE(?4, current_period_end),
             next_payment_date = COALESCE(?4, next_payment_date),
             cancel_at_period_end = COALESCE(?5, cancel_at_period_end),
             updated_at = ?6
         WHERE stripe_subscription_id = ?1",
        params![
            stripe_subscription_id,
            status.as_str(),
            current_period_start,
            current_period_end,
            cancel_at_period_end.map(|b| b as i64),
            now(),
        ],
    )?;
    Ok(affected > 0)
}

/// Terminal cancellation confirmed by the gateway. Conditional so a
/// redelivered event does not restamp `cancelled_at`.
pub fn mark_subscription_deleted(
    conn: &Connection,
    stripe_subscription_id: &str,
    cancelled_at: i64,
) -> Result<ApplyOutcome> {
    let affected = conn.execute(
        "UPDATE subscriptions
         SET status = 'cancelled', cancelled_at = ?2, updated_at = ?3
         WHERE stripe_subscription_id = ?1 AND status != 'cancelled'",
        params![stripe_subscription_id, cancelled_at, now()],
    )?;
    if affected > 0 {
        return Ok(ApplyOutcome::Applied);
    }
    match get_subscription_by_stripe_id(conn, stripe_subscription_id)? {
        Some(_) => Ok(ApplyOutcome::AlreadyApplied),
        None => Ok(ApplyOutcome::NotFound),
    }
}

/// Successful invoice: failure counter resets, payment date is stamped,
/// and a past_due subscription recovers to active. Returns the refreshed
/// row so the caller can record the charge transaction.
pub fn record_invoice_paid(
    conn: &Connection,
    stripe_subscription_id: &str,
    paid_at: i64,
) -> Result<Option<Subscription>> {
    conn.query_row(
        &format!(
            "UPDATE subscriptions
             SET failed_payment_count = 0,
                 last_payment_date = ?2,
                 status = CASE WHEN status = 'past_due' THEN 'active' ELSE status END,
                 updated_at = ?3
             WHERE stripe_subscription_id = ?1
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        params![stripe_subscription_id, paid_at, now()],
        Subscription::from_row,
    )
    .optional()
    .map_err(Into::into)
}

/// Failed invoice: escalate to past_due and bump the failure counter.
pub fn record_invoice_failed(
    conn: &Connection,
    stripe_subscription_id: &str,
) -> Result<Option<Subscription>> {
    conn.query_row(
        &format!(
            "UPDATE subscriptions
             SET status = 'past_due',
                 failed_payment_count = failed_payment_count + 1,
                 updated_at = ?2
             WHERE stripe_subscription_id = ?1
             RETURNING {}",
            SUBSCRIPTION_COLS
        ),
        params![stripe_subscription_id, now()],
        Subscription::from_row,
    )
    .optional()
    .map_err(Into::into)
}

// ============ Connected accounts ============

pub fn create_connect_account(
    conn: &Connection,
    owner_id: &str,
    stripe_account_id: &str,
) -> Result<ConnectAccount> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO connect_accounts (id, owner_id, stripe_account_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![&id, owner_id, stripe_account_id, now],
    )?;

    Ok(ConnectAccount {
        id,
        owner_id: owner_id.to_string(),
        stripe_account_id: stripe_account_id.to_string(),
        charges_enabled: false,
        payouts_enabled: false,
        details_submitted: false,
        requirements_currently_due: Vec::new(),
        requirements_eventually_due: Vec::new(),
        requirements_past_due: Vec::new(),
        disabled_reason: None,
        capability_card_payments: None,
        capability_transfers: None,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_connect_account_by_owner(
    conn: &Connection,
    owner_id: &str,
) -> Result<Option<ConnectAccount>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM connect_accounts WHERE owner_id = ?1",
            CONNECT_ACCOUNT_COLS
        ),
        &[&owner_id],
    )
}

pub fn get_connect_account_by_stripe_id(
    conn: &Connection,
    stripe_account_id: &str,
) -> Result<Option<ConnectAccount>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM connect_accounts WHERE stripe_account_id = ?1",
            CONNECT_ACCOUNT_COLS
        ),
        &[&stripe_account_id],
    )
}

/// Persist a refreshed gateway snapshot of the account. Used by both the
/// eager read path and the `account.updated` webhook; last write wins,
/// which is safe because each write is a full snapshot from the gateway.
pub fn apply_account_snapshot(
    conn: &Connection,
    stripe_account_id: &str,
    snapshot: &AccountSnapshot,
) -> Result<Option<ConnectAccount>> {
    let currently_due = serde_json::to_string(&snapshot.requirements_currently_due)?;
    let eventually_due = serde_json::to_string(&snapshot.requirements_eventually_due)?;
    let past_due = serde_json::to_string(&snapshot.requirements_past_due)?;

    conn.query_row(
        &format!(
            "UPDATE connect_accounts
             SET charges_enabled = ?2,
                 payouts_enabled = ?3,
                 details_submitted = ?4,
                 requirements_currently_due = ?5,
                 requirements_eventually_due = ?6,
                 requirements_past_due = ?7,
                 disabled_reason = ?8,
                 capability_card_payments = ?9,
                 capability_transfers = ?10,
                 updated_at = ?11
             WHERE stripe_account_id = ?1
             RETURNING {}",
            CONNECT_ACCOUNT_COLS
        ),
        params![
            stripe_account_id,
            snapshot.charges_enabled as i64,
            snapshot.payouts_enabled as i64,
            snapshot.details_submitted as i64,
            currently_due,
            eventually_due,
            past_due,
            &snapshot.disabled_reason,
            &snapshot.capability_card_payments,
            &snapshot.capability_transfers,
            now(),
        ],
        ConnectAccount::from_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn delete_connect_account(conn: &Connection, owner_id: &str) -> Result<bool> {
    let deleted = conn.execute(
        "DELETE FROM connect_accounts WHERE owner_id = ?1",
        params![owner_id],
    )?;
    Ok(deleted > 0)
}

// ============ Webhook replay guard ============

/// Record that an event id has been processed. Returns false when the id
/// was already recorded (duplicate delivery). Used by handlers whose
/// effect is an insert or an increment, which a conditional update alone
/// cannot make idempotent.
pub fn try_record_webhook_event(
    conn: &Connection,
    event_id: &str,
    event_type: &str,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, event_id, event_type, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![gen_id(), event_id, event_type, now()],
    )?;
    Ok(inserted > 0)
}
