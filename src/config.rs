use std::env;

use crate::models::SubscriptionPlan;

/// Pricing for one entry of the fixed subscription catalog.
#[derive(Debug, Clone)]
pub struct PlanPricing {
    /// Gateway price id (e.g. "price_1ABC...") configured in the gateway dashboard.
    pub price_id: String,
    pub amount_cents: i64,
    pub interval: String,
}

/// The fixed-price subscription catalog. There is no custom pricing:
/// merchants choose basic or premium.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    pub basic: PlanPricing,
    pub premium: PlanPricing,
}

impl PlanCatalog {
    pub fn pricing(&self, plan: SubscriptionPlan) -> &PlanPricing {
        match plan {
            SubscriptionPlan::Basic => &self.basic,
            SubscriptionPlan::Premium => &self.premium,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub base_url: String,
    /// Identity service that turns bearer tokens into user id + role.
    pub identity_url: String,
    pub stripe_secret_key: String,
    pub stripe_webhook_secret: String,
    /// Deposit as a percentage of the full booking amount.
    pub deposit_percent: i64,
    /// Platform cut of a full payment, deducted before transfer to the merchant.
    pub platform_fee_percent: i64,
    pub currency: String,
    pub plans: PlanCatalog,
    pub dev_mode: bool,
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("SALONPAY_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| format!("http://{}:{}", host, port));

        let plans = PlanCatalog {
            basic: PlanPricing {
                price_id: env::var("STRIPE_PRICE_BASIC")
                    .unwrap_or_else(|_| "price_basic".to_string()),
                amount_cents: env_i64("BASIC_PLAN_AMOUNT_CENTS", 1_000),
                interval: "month".to_string(),
            },
            premium: PlanPricing {
                price_id: env::var("STRIPE_PRICE_PREMIUM")
                    .unwrap_or_else(|_| "price_premium".to_string()),
                amount_cents: env_i64("PREMIUM_PLAN_AMOUNT_CENTS", 2_000),
                interval: "month".to_string(),
            },
        };

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "salonpay.db".to_string()),
            base_url,
            identity_url: env::var("IDENTITY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:4000".to_string()),
            stripe_secret_key: env::var("STRIPE_SECRET_KEY").unwrap_or_default(),
            stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default(),
            deposit_percent: env_i64("DEPOSIT_PERCENT", 30),
            platform_fee_percent: env_i64("PLATFORM_FEE_PERCENT", 3),
            currency: env::var("CURRENCY").unwrap_or_else(|_| "usd".to_string()),
            plans,
            dev_mode,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
