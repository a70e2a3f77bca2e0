//! Merchant payout-account onboarding.
//!
//! Unlike the payment paths, reads here eagerly re-fetch the account from
//! the gateway before returning: onboarding-status checks sit on a
//! human's interactive critical path, so waiting for the next
//! `account.updated` webhook would show stale state.

use axum::{extract::State, Extension};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::Json;
use crate::models::{AuthContext, ConnectAccount, OnboardingStatus};

/// Account plus its derived summary status. The status is computed from
/// the three flags at response time so it can never drift.
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    #[serde(flatten)]
    pub account: ConnectAccount,
    pub onboarding_status: OnboardingStatus,
}

impl From<ConnectAccount> for AccountResponse {
    fn from(account: ConnectAccount) -> Self {
        let onboarding_status = account.onboarding_status();
        Self {
            account,
            onboarding_status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub email: Option<String>,
    pub country: Option<String>,
}

/// POST /connect/account
pub async fn create_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<CreateAccountRequest>,
) -> Result<Json<AccountResponse>> {
    let owner_id = ctx.require_owner()?.to_string();

    {
        let conn = state.db.get()?;
        if queries::get_connect_account_by_owner(&conn, &owner_id)?.is_some() {
            return Err(AppError::Conflict(msg::ACCOUNT_EXISTS.into()));
        }
    }

    let gateway_account = state
        .stripe
        .create_account(request.email.as_deref(), request.country.as_deref())
        .await?;

    let conn = state.db.get()?;
    let account = queries::create_connect_account(&conn, &owner_id, &gateway_account.id)?;

    Ok(Json(account.into()))
}

/// GET /connect/account
///
/// Re-fetches live flags, requirements, and capabilities from the gateway
/// and persists the refreshed snapshot before returning.
pub async fn get_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<AccountResponse>> {
    let owner_id = ctx.require_owner()?.to_string();

    let local = {
        let conn = state.db.get()?;
        queries::get_connect_account_by_owner(&conn, &owner_id)
            .or_not_found(msg::ACCOUNT_NOT_FOUND)?
    };

    let gateway_account = state.stripe.retrieve_account(&local.stripe_account_id).await?;

    let conn = state.db.get()?;
    let account =
        queries::apply_account_snapshot(&conn, &local.stripe_account_id, &gateway_account.snapshot())?
            .ok_or_else(|| AppError::NotFound(msg::ACCOUNT_NOT_FOUND.into()))?;

    Ok(Json(account.into()))
}

#[derive(Debug, Deserialize)]
pub struct AccountLinkRequest {
    pub refresh_url: String,
    pub return_url: String,
}

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub url: String,
}

/// POST /connect/account/onboarding-link
pub async fn create_account_link(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(request): Json<AccountLinkRequest>,
) -> Result<Json<LinkResponse>> {
    let owner_id = ctx.require_owner()?.to_string();

    let local = {
        let conn = state.db.get()?;
        queries::get_connect_account_by_owner(&conn, &owner_id)
            .or_not_found(msg::ACCOUNT_NOT_FOUND)?
    };

    let url = state
        .stripe
        .create_account_link(&local.stripe_account_id, &request.refresh_url, &request.return_url)
        .await?;

    Ok(Json(LinkResponse { url }))
}

/// POST /connect/account/login-link
pub async fn create_login_link(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<LinkResponse>> {
    let owner_id = ctx.require_owner()?.to_string();

    let local = {
        let conn = state.db.get()?;
        queries::get_connect_account_by_owner(&conn, &owner_id)
            .or_not_found(msg::ACCOUNT_NOT_FOUND)?
    };

    let url = state.stripe.create_login_link(&local.stripe_account_id).await?;

    Ok(Json(LinkResponse { url }))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// DELETE /connect/account
///
/// Gateway-side deletion first; the local row is removed only after the
/// gateway confirms, so a gateway failure leaves state fully intact.
pub async fn delete_account(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<DeleteResponse>> {
    let owner_id = ctx.require_owner()?.to_string();

    let local = {
        let conn = state.db.get()?;
        queries::get_connect_account_by_owner(&conn, &owner_id)
            .or_not_found(msg::ACCOUNT_NOT_FOUND)?
    };

    state.stripe.delete_account(&local.stripe_account_id).await?;

    let conn = state.db.get()?;
    let deleted = queries::delete_connect_account(&conn, &owner_id)?;

    Ok(Json(DeleteResponse { deleted }))
}
