use serde::{Deserialize, Serialize};

/// One payout destination per merchant. The three capability flags and the
/// requirements/capabilities snapshots mirror the gateway account object;
/// the summary onboarding status is always derived from the flags.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectAccount {
    pub id: String,
    pub owner_id: String,
    pub stripe_account_id: String,

    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,

    pub requirements_currently_due: Vec<String>,
    pub requirements_eventually_due: Vec<String>,
    pub requirements_past_due: Vec<String>,
    pub disabled_reason: Option<String>,

    pub capability_card_payments: Option<String>,
    pub capability_transfers: Option<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl ConnectAccount {
    pub fn onboarding_status(&self) -> OnboardingStatus {
        derive_onboarding_status(
            self.charges_enabled,
            self.payouts_enabled,
            self.details_submitted,
        )
    }

    /// Full payments require a complete payout account.
    pub fn is_fully_onboarded(&self) -> bool {
        self.onboarding_status() == OnboardingStatus::Complete
    }
}

/// Refreshed account state as reported by the gateway, applied either by
/// the on-demand read path or by the `account.updated` webhook.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
    pub details_submitted: bool,
    pub requirements_currently_due: Vec<String>,
    pub requirements_eventually_due: Vec<String>,
    pub requirements_past_due: Vec<String>,
    pub disabled_reason: Option<String>,
    pub capability_card_payments: Option<String>,
    pub capability_transfers: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    Incomplete,
    Pending,
    Complete,
}

impl OnboardingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Pending => "pending",
            Self::Complete => "complete",
        }
    }
}

impl std::fmt::Display for OnboardingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Complete iff all three capability flags are set. Details submitted but
/// capabilities still being verified reads as pending. Stored nowhere, so
/// the summary can never drift from the flags.
pub fn derive_onboarding_status(
    charges_enabled: bool,
    payouts_enabled: bool,
    details_submitted: bool,
) -> OnboardingStatus {
    if charges_enabled && payouts_enabled && details_submitted {
        OnboardingStatus::Complete
    } else if details_submitted {
        OnboardingStatus::Pending
    } else {
        OnboardingStatus::Incomplete
    }
}
