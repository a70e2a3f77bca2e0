use rusqlite::Connection;

/// Initialize the ledger schema.
///
/// Writes are serialized by SQLite; every reconciler mutation is a single
/// conditional UPDATE keyed by external id, so WAL + NORMAL is safe here.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;

        -- Transactions: one row per money movement. Append-only; status is
        -- advanced by the reconciler (or a synchronous confirm), never reset.
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            booking_id TEXT,
            stripe_payment_intent_id TEXT,
            stripe_charge_id TEXT,
            stripe_account_id TEXT,
            amount_cents INTEGER NOT NULL CHECK (amount_cents > 0),
            platform_fee_cents INTEGER NOT NULL DEFAULT 0
                CHECK (platform_fee_cents >= 0 AND platform_fee_cents <= amount_cents),
            net_amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            tx_type TEXT NOT NULL
                CHECK (tx_type IN ('deposit', 'full_payment', 'refund', 'subscription', 'payout')),
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'succeeded', 'failed', 'cancelled', 'refunded')),
            error_message TEXT,
            receipt_url TEXT,
            metadata TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        -- Refund rows reference the intent they reverse, so uniqueness holds
        -- only across non-refund rows.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_transactions_intent
            ON transactions(stripe_payment_intent_id)
            WHERE stripe_payment_intent_id IS NOT NULL AND tx_type != 'refund';
        CREATE INDEX IF NOT EXISTS idx_transactions_charge ON transactions(stripe_charge_id);
        CREATE INDEX IF NOT EXISTS idx_transactions_customer_type ON transactions(customer_id, tx_type);
        CREATE INDEX IF NOT EXISTS idx_transactions_owner_status ON transactions(owner_id, status);
        CREATE INDEX IF NOT EXISTS idx_transactions_booking ON transactions(booking_id);

        -- Explicit user -> gateway customer mapping. First write wins; the
        -- orchestrators read through this instead of scanning transactions.
        CREATE TABLE IF NOT EXISTS gateway_customers (
            user_id TEXT PRIMARY KEY,
            stripe_customer_id TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );

        -- Subscriptions: at most one row per merchant. Plan changes mutate
        -- the row in place.
        CREATE TABLE IF NOT EXISTS subscriptions (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL UNIQUE,
            stripe_subscription_id TEXT UNIQUE,
            stripe_customer_id TEXT,
            stripe_price_id TEXT,
            plan TEXT NOT NULL CHECK (plan IN ('basic', 'premium')),
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            billing_interval TEXT NOT NULL DEFAULT 'month',
            status TEXT NOT NULL
                CHECK (status IN ('active', 'inactive', 'past_due', 'cancelled', 'trialing')),
            current_period_start INTEGER,
            current_period_end INTEGER,
            next_payment_date INTEGER,
            last_payment_date INTEGER,
            failed_payment_count INTEGER NOT NULL DEFAULT 0,
            cancel_at_period_end INTEGER NOT NULL DEFAULT 0,
            cancelled_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_subscriptions_owner_status ON subscriptions(owner_id, status);

        -- Connected accounts: one payout destination per merchant. The
        -- summary onboarding status is derived from the three flags at read
        -- time, never stored.
        CREATE TABLE IF NOT EXISTS connect_accounts (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL UNIQUE,
            stripe_account_id TEXT NOT NULL UNIQUE,
            charges_enabled INTEGER NOT NULL DEFAULT 0,
            payouts_enabled INTEGER NOT NULL DEFAULT 0,
            details_submitted INTEGER NOT NULL DEFAULT 0,
            requirements_currently_due TEXT NOT NULL DEFAULT '[]',
            requirements_eventually_due TEXT NOT NULL DEFAULT '[]',
            requirements_past_due TEXT NOT NULL DEFAULT '[]',
            disabled_reason TEXT,
            capability_card_payments TEXT,
            capability_transfers TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Replay guard for webhook events whose effect is an insert or an
        -- increment (invoice handlers). The gateway delivers at-least-once.
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL UNIQUE,
            event_type TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        "#,
    )?;
    Ok(())
}
