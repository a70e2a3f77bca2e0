use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// The target row exists but is in a state the operation does not allow
    /// (e.g. refunding a transaction that never succeeded).
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Merchant payout prerequisites unmet (connected account not fully onboarded).
    #[error("Account not configured: {0}")]
    AccountNotConfigured(String),

    /// The payment gateway rejected the call or was unreachable.
    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Invalid webhook signature")]
    WebhookSignature,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::InvalidStatus(_) => "invalid_status",
            AppError::AccountNotConfigured(_) => "account_not_configured",
            AppError::Gateway(_) => "gateway_error",
            AppError::WebhookSignature => "invalid_signature",
            AppError::Json(_) => "invalid_json",
            AppError::Database(_) | AppError::Pool(_) | AppError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, Some(msg.clone())),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, Some(msg.clone())),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, Some(msg.clone())),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, Some(msg.clone())),
            AppError::InvalidStatus(msg) => (StatusCode::BAD_REQUEST, Some(msg.clone())),
            AppError::AccountNotConfigured(msg) => (StatusCode::BAD_REQUEST, Some(msg.clone())),
            AppError::Gateway(msg) => {
                tracing::warn!("Gateway error: {}", msg);
                (StatusCode::BAD_GATEWAY, Some(msg.clone()))
            }
            AppError::WebhookSignature => (StatusCode::BAD_REQUEST, None),
            AppError::Json(e) => (StatusCode::BAD_REQUEST, Some(e.to_string())),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = ErrorResponse {
            error: self.code(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Convert `Ok(None)` into a `NotFound` error with a stable message.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Result<Option<T>> {
    fn or_not_found(self, message: &str) -> Result<T> {
        self?.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}

/// Stable user-facing message constants.
pub mod msg {
    pub const TRANSACTION_NOT_FOUND: &str = "Transaction not found";
    pub const SUBSCRIPTION_NOT_FOUND: &str = "Subscription not found";
    pub const ACCOUNT_NOT_FOUND: &str = "Connected account not found";
    pub const SUBSCRIPTION_EXISTS: &str = "An active subscription already exists for this owner";
    pub const ACCOUNT_EXISTS: &str = "A connected account already exists for this owner";
    pub const ALREADY_PAID: &str = "Nothing left to pay: deposit covers the full amount";
    pub const SAME_PLAN: &str = "Subscription is already on the requested plan";
    pub const NOT_CANCELLING: &str = "Subscription is not scheduled for cancellation";
    pub const NOT_ONBOARDED: &str = "Merchant payout account has not completed onboarding";
    pub const REFUND_REQUIRES_SUCCESS: &str = "Only succeeded transactions can be refunded";
    pub const NO_PAYMENT_INTENT: &str = "Transaction has no gateway payment intent";
    pub const AMOUNT_NOT_POSITIVE: &str = "Amount must be positive";
    pub const REFUND_EXCEEDS_ORIGINAL: &str = "Refund amount exceeds the original charge";
    pub const INVALID_SIGNATURE_FORMAT: &str = "Invalid signature header format";
    pub const INVALID_TIMESTAMP_IN_SIGNATURE: &str = "Invalid timestamp in signature header";
    pub const INVALID_WEBHOOK_SECRET: &str = "Webhook secret rejected by HMAC";
    pub const OWNER_ROLE_REQUIRED: &str = "Caller is not a merchant owner";
}
