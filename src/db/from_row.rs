//! Row mapping trait and helpers shared by the query layer.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to
/// rusqlite errors instead of panicking on corrupted rows.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// JSON string-array column; a malformed value reads as empty rather than
/// failing the whole row.
fn parse_string_list(row: &Row, col: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(col)?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

/// Trait for constructing a model from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const TRANSACTION_COLS: &str = "id, customer_id, owner_id, booking_id, \
     stripe_payment_intent_id, stripe_charge_id, stripe_account_id, \
     amount_cents, platform_fee_cents, net_amount_cents, currency, \
     tx_type, status, error_message, receipt_url, metadata, created_at, updated_at";

pub const SUBSCRIPTION_COLS: &str = "id, owner_id, stripe_subscription_id, stripe_customer_id, \
     stripe_price_id, plan, amount_cents, currency, billing_interval, status, \
     current_period_start, current_period_end, next_payment_date, last_payment_date, \
     failed_payment_count, cancel_at_period_end, cancelled_at, created_at, updated_at";

pub const CONNECT_ACCOUNT_COLS: &str = "id, owner_id, stripe_account_id, \
     charges_enabled, payouts_enabled, details_submitted, \
     requirements_currently_due, requirements_eventually_due, requirements_past_due, \
     disabled_reason, capability_card_payments, capability_transfers, created_at, updated_at";

// ============ FromRow Implementations ============

impl FromRow for Transaction {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Transaction {
            id: row.get(0)?,
            customer_id: row.get(1)?,
            owner_id: row.get(2)?,
            booking_id: row.get(3)?,
            stripe_payment_intent_id: row.get(4)?,
            stripe_charge_id: row.get(5)?,
            stripe_account_id: row.get(6)?,
            amount_cents: row.get(7)?,
            platform_fee_cents: row.get(8)?,
            net_amount_cents: row.get(9)?,
            currency: row.get(10)?,
            tx_type: parse_enum(row, 11, "tx_type")?,
            status: parse_enum(row, 12, "status")?,
            error_message: row.get(13)?,
            receipt_url: row.get(14)?,
            metadata: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }
}

impl FromRow for Subscription {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Subscription {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            stripe_subscription_id: row.get(2)?,
            stripe_customer_id: row.get(3)?,
            stripe_price_id: row.get(4)?,
            plan: parse_enum(row, 5, "plan")?,
            amount_cents: row.get(6)?,
            currency: row.get(7)?,
            billing_interval: row.get(8)?,
            status: parse_enum(row, 9, "status")?,
            current_period_start: row.get(10)?,
            current_period_end: row.get(11)?,
            next_payment_date: row.get(12)?,
            last_payment_date: row.get(13)?,
            failed_payment_count: row.get(14)?,
            cancel_at_period_end: row.get::<_, i64>(15)? != 0,
            cancelled_at: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }
}

impl FromRow for ConnectAccount {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ConnectAccount {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            stripe_account_id: row.get(2)?,
            charges_enabled: row.get::<_, i64>(3)? != 0,
            payouts_enabled: row.get::<_, i64>(4)? != 0,
            details_submitted: row.get::<_, i64>(5)? != 0,
            requirements_currently_due: parse_string_list(row, 6)?,
            requirements_eventually_due: parse_string_list(row, 7)?,
            requirements_past_due: parse_string_list(row, 8)?,
            disabled_reason: row.get(9)?,
            capability_card_payments: row.get(10)?,
            capability_transfers: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}
