use axum::{routing::get, Router};
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use salonpay::config::Config;
use salonpay::db::{create_pool, init_db, queries, AppState};
use salonpay::handlers;
use salonpay::middleware::IdentityClient;
use salonpay::models::{CreateTransaction, TransactionStatus, TransactionType};
use salonpay::payments::StripeClient;

#[derive(Parser, Debug)]
#[command(name = "salonpay")]
#[command(about = "Payment and subscription ledger for the salon marketplace")]
struct Cli {
    /// Seed the ledger with dev data (connect account, sample transactions)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the ledger with dev data for local testing. Only runs in dev
/// mode and only when the ledger is empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))
        .expect("Failed to count transactions");
    if count > 0 {
        tracing::info!("Ledger already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let owner_id = "owner-dev";
    let customer_id = "customer-dev";

    let account = queries::create_connect_account(&conn, owner_id, "acct_dev_123")
        .expect("Failed to seed connect account");
    tracing::info!("Connect account: {} ({})", account.id, account.stripe_account_id);

    let deposit = queries::create_transaction(
        &conn,
        &CreateTransaction {
            customer_id: customer_id.to_string(),
            owner_id: owner_id.to_string(),
            booking_id: Some("booking-dev-1".to_string()),
            stripe_payment_intent_id: Some("pi_dev_123".to_string()),
            stripe_charge_id: None,
            stripe_account_id: None,
            amount_cents: 3_000,
            platform_fee_cents: 0,
            net_amount_cents: 3_000,
            currency: "usd".to_string(),
            tx_type: TransactionType::Deposit,
            status: TransactionStatus::Pending,
            metadata: None,
        },
    )
    .expect("Failed to seed transaction");
    tracing::info!("Pending deposit: {} ({} cents)", deposit.id, deposit.amount_cents);

    println!();
    println!("--- COPY FROM HERE ---");
    println!("  owner_id: {}", owner_id);
    println!("  customer_id: {}", customer_id);
    println!("  transaction_id: {}", deposit.id);
    println!("  payment_intent_id: pi_dev_123");
    println!("--- END COPY ---");
    println!();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "salonpay=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        stripe: StripeClient::new(&config.stripe_secret_key, &config.stripe_webhook_secret),
        identity: IdentityClient::new(&config.identity_url),
        base_url: config.base_url.clone(),
        deposit_percent: config.deposit_percent,
        platform_fee_percent: config.platform_fee_percent,
        currency: config.currency.clone(),
        plans: config.plans.clone(),
    };

    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set SALONPAY_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    let app = Router::new()
        .route("/health", get(handlers::health))
        // Webhook endpoint (signature-verified, no bearer auth)
        .merge(handlers::webhooks::router())
        // Bearer-authenticated API
        .merge(handlers::api_router(state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();

    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Salonpay server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
