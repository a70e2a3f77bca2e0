use serde::{Deserialize, Serialize};

use crate::error::{msg, AppError};

/// Caller identity as resolved by the external identity service.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub role: Role,
    /// Set when the caller is (or acts for) a merchant
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Client,
    Owner,
    Staff,
}

/// Request-scoped auth context inserted by the access-gate middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user: AuthUser,
}

impl AuthContext {
    pub fn is_staff(&self) -> bool {
        self.user.role == Role::Staff
    }

    /// The caller must be a merchant owner; returns their owner id.
    pub fn require_owner(&self) -> Result<&str, AppError> {
        match (self.user.role, self.user.owner_id.as_deref()) {
            (Role::Owner, Some(owner_id)) => Ok(owner_id),
            (Role::Staff, Some(owner_id)) => Ok(owner_id),
            _ => Err(AppError::Forbidden(msg::OWNER_ROLE_REQUIRED.into())),
        }
    }

    /// The caller must be the named user, or staff.
    pub fn require_self_or_staff(&self, user_id: &str) -> Result<(), AppError> {
        if self.is_staff() || self.user.user_id == user_id {
            Ok(())
        } else {
            Err(AppError::Forbidden("Access denied".into()))
        }
    }

    /// The caller must be the named merchant, or staff.
    pub fn require_owner_or_staff(&self, owner_id: &str) -> Result<(), AppError> {
        if self.is_staff() || self.user.owner_id.as_deref() == Some(owner_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden("Access denied".into()))
        }
    }

    /// The caller must be a party to the transaction (payer or payee), or staff.
    pub fn require_party(&self, customer_id: &str, owner_id: &str) -> Result<(), AppError> {
        if self.is_staff()
            || self.user.user_id == customer_id
            || self.user.owner_id.as_deref() == Some(owner_id)
        {
            Ok(())
        } else {
            Err(AppError::Forbidden("Access denied".into()))
        }
    }
}
