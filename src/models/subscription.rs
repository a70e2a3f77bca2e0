use serde::{Deserialize, Serialize};

/// One recurring-billing record per merchant (`owner_id` is unique).
/// Plan changes mutate this row in place; there is never a second row.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: String,
    pub owner_id: String,

    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_price_id: Option<String>,

    pub plan: SubscriptionPlan,
    pub amount_cents: i64,
    pub currency: String,
    pub billing_interval: String,

    pub status: SubscriptionStatus,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    /// Always equal to `current_period_end` when a period is known
    pub next_payment_date: Option<i64>,
    pub last_payment_date: Option<i64>,
    pub failed_payment_count: i64,

    pub cancel_at_period_end: bool,
    pub cancelled_at: Option<i64>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl Subscription {
    /// Derived, never stored: the subscription bills (or is in trial).
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }

    pub fn is_past_due(&self) -> bool {
        self.status == SubscriptionStatus::PastDue
    }
}

/// Fields the orchestrator writes when creating or reviving a subscription.
/// `owner_id` uniqueness makes this an upsert, not an insert.
#[derive(Debug, Clone)]
pub struct UpsertSubscription {
    pub owner_id: String,
    pub stripe_subscription_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub plan: SubscriptionPlan,
    pub amount_cents: i64,
    pub currency: String,
    pub billing_interval: String,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionPlan {
    Basic,
    Premium,
}

impl SubscriptionPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Premium => "premium",
        }
    }
}

impl std::str::FromStr for SubscriptionPlan {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Self::Basic),
            "premium" => Ok(Self::Premium),
            other => Err(format!("unknown plan: {}", other)),
        }
    }
}

impl std::fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    PastDue,
    Cancelled,
    Trialing,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::PastDue => "past_due",
            Self::Cancelled => "cancelled",
            Self::Trialing => "trialing",
        }
    }

    /// Map the gateway's subscription status vocabulary onto ours.
    /// Unknown values map to None so a new gateway status never corrupts
    /// local state; the caller logs and skips.
    pub fn from_gateway(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "trialing" => Some(Self::Trialing),
            "past_due" | "unpaid" => Some(Self::PastDue),
            "canceled" | "cancelled" => Some(Self::Cancelled),
            "incomplete" | "incomplete_expired" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            "past_due" => Ok(Self::PastDue),
            "cancelled" => Ok(Self::Cancelled),
            "trialing" => Ok(Self::Trialing),
            other => Err(format!("unknown subscription status: {}", other)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
