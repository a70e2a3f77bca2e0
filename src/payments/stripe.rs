//! Thin adapter over the payment gateway's HTTP API.
//!
//! The gateway is the system of record for all monetary truth; local rows
//! are a projection reconciled through the webhook endpoint. Every call
//! here is a blocking network round-trip from the caller's perspective,
//! and a non-2xx response surfaces as `AppError::Gateway` with the
//! gateway's own error message.

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{msg, AppError, Result};
use crate::models::{AccountSnapshot, TransactionStatus};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com/v1";

/// Map a gateway payment-intent status onto the local transaction status.
///
/// This is the single mapping shared by the synchronous confirm path and
/// the webhook reconciler; None means "no transition" (the intent is still
/// in flight: requires_action, requires_payment_method, processing, or a
/// status this system does not know yet).
pub fn map_intent_status(gateway_status: &str) -> Option<TransactionStatus> {
    match gateway_status {
        "succeeded" => Some(TransactionStatus::Succeeded),
        "canceled" => Some(TransactionStatus::Cancelled),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    secret_key: String,
    webhook_secret: String,
}

/// Parameters for a new payment intent. Transfer-style payments carry an
/// application fee and the merchant's connected account as destination.
#[derive(Debug)]
pub struct CreateIntentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub customer_id: String,
    pub application_fee_cents: Option<i64>,
    pub transfer_destination: Option<String>,
    pub metadata: Vec<(String, String)>,
}

impl StripeClient {
    pub fn new(secret_key: &str, webhook_secret: &str) -> Self {
        Self {
            client: Client::new(),
            secret_key: secret_key.to_string(),
            webhook_secret: webhook_secret.to_string(),
        }
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Gateway(gateway_error_message(&body)));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("Failed to parse gateway response: {}", e)))
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .form(params)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Gateway request failed: {}", e)))?;
        Self::parse_response(response).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Gateway request failed: {}", e)))?;
        Self::parse_response(response).await
    }

    async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .client
            .delete(format!("{}{}", API_BASE, path))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(|e| AppError::Gateway(format!("Gateway request failed: {}", e)))?;
        Self::parse_response(response).await
    }

    // ============ Customers ============

    pub async fn create_customer(
        &self,
        user_id: &str,
        email: Option<&str>,
    ) -> Result<StripeCustomer> {
        let mut params = vec![("metadata[user_id]", user_id.to_string())];
        if let Some(email) = email {
            params.push(("email", email.to_string()));
        }
        self.post_form("/customers", &params).await
    }

    // ============ Payment intents ============

    pub async fn create_payment_intent(
        &self,
        request: &CreateIntentRequest,
    ) -> Result<StripePaymentIntent> {
        let mut params = vec![
            ("amount", request.amount_cents.to_string()),
            ("currency", request.currency.clone()),
            ("customer", request.customer_id.clone()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        if let Some(fee) = request.application_fee_cents {
            params.push(("application_fee_amount", fee.to_string()));
        }
        if let Some(ref destination) = request.transfer_destination {
            params.push(("transfer_data[destination]", destination.clone()));
        }
        let metadata: Vec<(String, String)> = request
            .metadata
            .iter()
            .map(|(k, v)| (format!("metadata[{}]", k), v.clone()))
            .collect();
        let mut form: Vec<(&str, String)> = params;
        for (k, v) in &metadata {
            form.push((k.as_str(), v.clone()));
        }
        self.post_form("/payment_intents", &form).await
    }

    /// Retrieve the current intent state with the charge expanded so the
    /// confirm path can capture the charge id and receipt url in one call.
    pub async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<StripePaymentIntent> {
        self.get_json(
            &format!("/payment_intents/{}", intent_id),
            &[("expand[]", "latest_charge".to_string())],
        )
        .await
    }

    // ============ Refunds ============

    pub async fn create_refund(
        &self,
        payment_intent_id: &str,
        amount_cents: Option<i64>,
        reason: Option<&str>,
    ) -> Result<StripeRefund> {
        let mut params = vec![("payment_intent", payment_intent_id.to_string())];
        if let Some(amount) = amount_cents {
            params.push(("amount", amount.to_string()));
        }
        if let Some(reason) = reason {
            params.push(("reason", reason.to_string()));
        }
        self.post_form("/refunds", &params).await
    }

    // ============ Connected accounts ============

    pub async fn create_account(
        &self,
        email: Option<&str>,
        country: Option<&str>,
    ) -> Result<StripeAccount> {
        let mut params = vec![
            ("type", "express".to_string()),
            ("capabilities[card_payments][requested]", "true".to_string()),
            ("capabilities[transfers][requested]", "true".to_string()),
        ];
        if let Some(email) = email {
            params.push(("email", email.to_string()));
        }
        if let Some(country) = country {
            params.push(("country", country.to_string()));
        }
        self.post_form("/accounts", &params).await
    }

    pub async fn retrieve_account(&self, account_id: &str) -> Result<StripeAccount> {
        self.get_json(&format!("/accounts/{}", account_id), &[]).await
    }

    pub async fn delete_account(&self, account_id: &str) -> Result<()> {
        let _: StripeDeleted = self.delete_json(&format!("/accounts/{}", account_id)).await?;
        Ok(())
    }

    pub async fn create_account_link(
        &self,
        account_id: &str,
        refresh_url: &str,
        return_url: &str,
    ) -> Result<String> {
        let params = vec![
            ("account", account_id.to_string()),
            ("refresh_url", refresh_url.to_string()),
            ("return_url", return_url.to_string()),
            ("type", "account_onboarding".to_string()),
        ];
        let link: StripeLink = self.post_form("/account_links", &params).await?;
        Ok(link.url)
    }

    pub async fn create_login_link(&self, account_id: &str) -> Result<String> {
        let link: StripeLink = self
            .post_form(&format!("/accounts/{}/login_links", account_id), &[])
            .await?;
        Ok(link.url)
    }

    // ============ Payment methods ============

    pub async fn attach_payment_method(
        &self,
        payment_method_id: &str,
        customer_id: &str,
    ) -> Result<()> {
        let params = vec![("customer", customer_id.to_string())];
        let _: serde_json::Value = self
            .post_form(&format!("/payment_methods/{}/attach", payment_method_id), &params)
            .await?;
        Ok(())
    }

    pub async fn set_default_payment_method(
        &self,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<()> {
        let params = vec![(
            "invoice_settings[default_payment_method]",
            payment_method_id.to_string(),
        )];
        let _: serde_json::Value = self
            .post_form(&format!("/customers/{}", customer_id), &params)
            .await?;
        Ok(())
    }

    // ============ Subscriptions ============

    pub async fn create_subscription(
        &self,
        customer_id: &str,
        price_id: &str,
    ) -> Result<StripeSubscription> {
        let params = vec![
            ("customer", customer_id.to_string()),
            ("items[0][price]", price_id.to_string()),
            ("expand[]", "latest_invoice.payment_intent".to_string()),
        ];
        self.post_form("/subscriptions", &params).await
    }

    pub async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        self.get_json(&format!("/subscriptions/{}", subscription_id), &[])
            .await
    }

    /// Swap the subscription's single item to a new catalog price, with
    /// proration so the merchant is charged/credited for the partial period.
    pub async fn update_subscription_price(
        &self,
        subscription_id: &str,
        item_id: &str,
        price_id: &str,
    ) -> Result<StripeSubscription> {
        let params = vec![
            ("items[0][id]", item_id.to_string()),
            ("items[0][price]", price_id.to_string()),
            ("proration_behavior", "create_prorations".to_string()),
        ];
        self.post_form(&format!("/subscriptions/{}", subscription_id), &params)
            .await
    }

    pub async fn set_subscription_cancel_at_period_end(
        &self,
        subscription_id: &str,
        cancel: bool,
    ) -> Result<StripeSubscription> {
        let params = vec![("cancel_at_period_end", cancel.to_string())];
        self.post_form(&format!("/subscriptions/{}", subscription_id), &params)
            .await
    }

    /// Hard cancel, effective immediately.
    pub async fn cancel_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        self.delete_json(&format!("/subscriptions/{}", subscription_id))
            .await
    }

    // ============ Invoices ============

    pub async fn list_invoices(&self, customer_id: &str) -> Result<Vec<StripeInvoice>> {
        let list: StripeList<StripeInvoice> = self
            .get_json("/invoices", &[("customer", customer_id.to_string())])
            .await?;
        Ok(list.data)
    }

    // ============ Webhook signature verification ============

    /// Maximum age of a webhook timestamp before it's rejected (seconds).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Verify the `t=...,v1=...` signature header over the raw body.
    /// Nothing in the payload may be trusted before this returns true.
    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        let parts: Vec<&str> = signature.split(',').collect();

        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in parts {
            if let Some(t) = part.strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::Validation(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::Validation(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        // Reject stale timestamps so a captured delivery cannot be replayed
        // after the tolerance window.
        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::Validation(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let now = chrono::Utc::now().timestamp();
        let age = now - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        // Clock skew tolerance: 60 seconds into the future.
        if age < -60 {
            tracing::warn!("webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        let signed_payload = format!("{}.{}", timestamp_str, String::from_utf8_lossy(payload));

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(signed_payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();

        // Length is not secret (always 64 hex chars for SHA-256), so a
        // non-constant-time length check is fine.
        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }
}

fn gateway_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| format!("Gateway rejected the request: {}", body))
}

/// Extract an id from a field the gateway returns either as a bare id
/// string or as an expanded object.
fn id_of(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => {
            obj.get("id").and_then(|v| v.as_str()).map(|s| s.to_string())
        }
        _ => None,
    }
}

// ============ Gateway object shapes ============

#[derive(Debug, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct StripePaymentIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub latest_charge: Option<serde_json::Value>,
    #[serde(default)]
    pub last_payment_error: Option<StripePaymentError>,
}

#[derive(Debug, Deserialize)]
pub struct StripePaymentError {
    #[serde(default)]
    pub message: Option<String>,
}

impl StripePaymentIntent {
    pub fn charge_id(&self) -> Option<String> {
        self.latest_charge.as_ref().and_then(id_of)
    }

    /// Present only when the charge is expanded or embedded as an object.
    pub fn receipt_url(&self) -> Option<String> {
        self.latest_charge
            .as_ref()?
            .get("receipt_url")?
            .as_str()
            .map(|s| s.to_string())
    }

    pub fn error_message(&self) -> Option<String> {
        self.last_payment_error.as_ref()?.message.clone()
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeRefund {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub receipt_url: Option<String>,
    #[serde(default)]
    pub refunded: bool,
}

#[derive(Debug, Deserialize)]
pub struct StripeAccount {
    pub id: String,
    #[serde(default)]
    pub charges_enabled: bool,
    #[serde(default)]
    pub payouts_enabled: bool,
    #[serde(default)]
    pub details_submitted: bool,
    #[serde(default)]
    pub requirements: Option<StripeAccountRequirements>,
    #[serde(default)]
    pub capabilities: Option<StripeAccountCapabilities>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeAccountRequirements {
    #[serde(default)]
    pub currently_due: Vec<String>,
    #[serde(default)]
    pub eventually_due: Vec<String>,
    #[serde(default)]
    pub past_due: Vec<String>,
    #[serde(default)]
    pub disabled_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StripeAccountCapabilities {
    #[serde(default)]
    pub card_payments: Option<String>,
    #[serde(default)]
    pub transfers: Option<String>,
}

impl StripeAccount {
    /// Flatten the account object into the snapshot the ledger stores.
    pub fn snapshot(&self) -> AccountSnapshot {
        let requirements = self.requirements.as_ref();
        let capabilities = self.capabilities.as_ref();
        AccountSnapshot {
            charges_enabled: self.charges_enabled,
            payouts_enabled: self.payouts_enabled,
            details_submitted: self.details_submitted,
            requirements_currently_due: requirements
                .map(|r| r.currently_due.clone())
                .unwrap_or_default(),
            requirements_eventually_due: requirements
                .map(|r| r.eventually_due.clone())
                .unwrap_or_default(),
            requirements_past_due: requirements.map(|r| r.past_due.clone()).unwrap_or_default(),
            disabled_reason: requirements.and_then(|r| r.disabled_reason.clone()),
            capability_card_payments: capabilities.and_then(|c| c.card_payments.clone()),
            capability_transfers: capabilities.and_then(|c| c.transfers.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub customer: Option<serde_json::Value>,
    #[serde(default)]
    pub cancel_at_period_end: Option<bool>,
    #[serde(default)]
    pub canceled_at: Option<i64>,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub items: Option<StripeList<StripeSubscriptionItem>>,
    #[serde(default)]
    pub latest_invoice: Option<serde_json::Value>,
}

impl StripeSubscription {
    pub fn customer_id(&self) -> Option<String> {
        self.customer.as_ref().and_then(id_of)
    }

    pub fn first_item_id(&self) -> Option<&str> {
        self.items.as_ref()?.data.first().map(|item| item.id.as_str())
    }

    /// The payment intent for the first invoice, when it was expanded.
    pub fn latest_invoice_payment_intent(&self) -> Option<String> {
        self.latest_invoice
            .as_ref()?
            .get("payment_intent")
            .and_then(id_of)
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,
    #[serde(default)]
    pub price: Option<StripePrice>,
}

#[derive(Debug, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StripeInvoice {
    pub id: String,
    #[serde(default)]
    pub subscription: Option<serde_json::Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount_paid: Option<i64>,
    #[serde(default)]
    pub amount_due: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub payment_intent: Option<serde_json::Value>,
    #[serde(default)]
    pub hosted_invoice_url: Option<String>,
}

impl StripeInvoice {
    pub fn subscription_id(&self) -> Option<String> {
        self.subscription.as_ref().and_then(id_of)
    }

    pub fn payment_intent_id(&self) -> Option<String> {
        self.payment_intent.as_ref().and_then(id_of)
    }
}

#[derive(Debug, Deserialize)]
pub struct StripeList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeLink {
    url: String,
}

#[derive(Debug, Deserialize)]
struct StripeDeleted {
    #[serde(default)]
    #[allow(dead_code)]
    deleted: bool,
}

// ============ Webhook envelope ============

/// Raw webhook event; `object` is parsed per event type by the reconciler.
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}
