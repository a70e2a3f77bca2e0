mod schema;
pub mod from_row;
pub mod queries;

pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::config::PlanCatalog;
use crate::middleware::IdentityClient;
use crate::payments::StripeClient;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Ledger pool (transactions, subscriptions, connect accounts)
    pub db: DbPool,
    /// Payment gateway adapter
    pub stripe: StripeClient,
    /// Identity service used by the access gate
    pub identity: IdentityClient,
    pub base_url: String,
    /// Deposit as a percentage of the booking amount
    pub deposit_percent: i64,
    /// Platform cut of a full payment
    pub platform_fee_percent: i64,
    pub currency: String,
    pub plans: PlanCatalog,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path);
    Pool::builder().max_size(10).build(manager)
}
