use serde::{Deserialize, Serialize};

/// One money-movement record. Rows are append-only: once written they are
/// only ever advanced along the status machine, never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: String,
    /// Payer
    pub customer_id: String,
    /// Payee / merchant
    pub owner_id: String,
    /// Correlates to the originating booking, when there is one
    pub booking_id: Option<String>,

    // Gateway object ids
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_charge_id: Option<String>,
    /// Present only for transfer-style payments routed to a merchant account
    pub stripe_account_id: Option<String>,

    // Amounts (minor units)
    pub amount_cents: i64,
    pub platform_fee_cents: i64,
    pub net_amount_cents: i64,
    pub currency: String,

    pub tx_type: TransactionType,
    pub status: TransactionStatus,

    pub error_message: Option<String>,
    pub receipt_url: Option<String>,
    /// Free-form JSON passed through from the caller
    pub metadata: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

/// Data required to insert a transaction row.
#[derive(Debug, Clone)]
pub struct CreateTransaction {
    pub customer_id: String,
    pub owner_id: String,
    pub booking_id: Option<String>,
    pub stripe_payment_intent_id: Option<String>,
    pub stripe_charge_id: Option<String>,
    pub stripe_account_id: Option<String>,
    pub amount_cents: i64,
    pub platform_fee_cents: i64,
    pub net_amount_cents: i64,
    pub currency: String,
    pub tx_type: TransactionType,
    /// Refund rows are born `Succeeded`; everything else starts `Pending`.
    pub status: TransactionStatus,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    FullPayment,
    Refund,
    Subscription,
    Payout,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::FullPayment => "full_payment",
            Self::Refund => "refund",
            Self::Subscription => "subscription",
            Self::Payout => "payout",
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "full_payment" => Ok(Self::FullPayment),
            "refund" => Ok(Self::Refund),
            "subscription" => Ok(Self::Subscription),
            "payout" => Ok(Self::Payout),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Succeeded,
    Failed,
    Cancelled,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// A terminal status is one no further transition is expected from,
    /// with the single exception of `Succeeded -> Refunded`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// The full status machine. Everything not listed here is rejected,
    /// which is what makes duplicate webhook delivery a no-op.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Succeeded)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Succeeded, Self::Refunded)
        )
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
