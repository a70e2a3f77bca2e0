//! Access gate: resolves bearer tokens through the external identity
//! service and enforces that a caller identity exists before any
//! orchestrator runs. Role and ownership checks happen in the handlers
//! via `AuthContext`.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use reqwest::Client;

use crate::db::AppState;
use crate::error::{AppError, Result};
use crate::models::{AuthContext, AuthUser};

/// Client for the identity service's token-verification endpoint.
#[derive(Debug, Clone)]
pub struct IdentityClient {
    client: Client,
    base_url: String,
}

impl IdentityClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Exchange a bearer token for the caller's identity. An invalid or
    /// expired token is `Unauthorized`; an unreachable identity service is
    /// an internal error, never a silent pass.
    pub async fn verify_token(&self, token: &str) -> Result<AuthUser> {
        let response = self
            .client
            .post(format!("{}/v1/tokens/verify", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AppError::Internal(format!("Identity service unreachable: {}", e)))?;

        match response.status() {
            status if status.is_success() => response
                .json::<AuthUser>()
                .await
                .map_err(|e| AppError::Internal(format!("Invalid identity response: {}", e))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AppError::Unauthorized),
            status => Err(AppError::Internal(format!(
                "Identity service error: {}",
                status
            ))),
        }
    }
}

/// Middleware resolving the caller once per request. Handlers read the
/// inserted `AuthContext` extension. The webhook route does not pass
/// through here; its signature is its authentication.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let user = state.identity.verify_token(token).await?;
    request.extensions_mut().insert(AuthContext { user });

    Ok(next.run(request).await)
}
