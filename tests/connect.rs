//! Connected-account onboarding state: derived status over the three
//! capability flags, snapshot refreshes, and deletion.

mod common;

use common::*;
use salonpay::models::derive_onboarding_status;

#[test]
fn test_derived_status_all_permutations() {
    // complete iff all three flags, for any permutation.
    for charges in [false, true] {
        for payouts in [false, true] {
            for details in [false, true] {
                let status = derive_onboarding_status(charges, payouts, details);
                if charges && payouts && details {
                    assert_eq!(status, OnboardingStatus::Complete);
                } else if details {
                    assert_eq!(status, OnboardingStatus::Pending);
                } else {
                    assert_eq!(status, OnboardingStatus::Incomplete);
                }
            }
        }
    }
}

#[test]
fn test_new_account_starts_incomplete() {
    let conn = setup_test_db();
    let account = create_test_connect_account(&conn, "owner-1", "acct_1");

    assert_eq!(account.onboarding_status(), OnboardingStatus::Incomplete);
    assert!(!account.is_fully_onboarded());
    assert!(account.requirements_currently_due.is_empty());
}

#[test]
fn test_one_account_per_owner() {
    let conn = setup_test_db();
    create_test_connect_account(&conn, "owner-1", "acct_1");

    let duplicate = queries::create_connect_account(&conn, "owner-1", "acct_2");
    assert!(duplicate.is_err(), "Owner uniqueness is store-enforced");
}

#[test]
fn test_snapshot_refresh_drives_status() {
    let conn = setup_test_db();
    create_test_connect_account(&conn, "owner-1", "acct_1");

    // Details submitted, capabilities still pending verification.
    let account = queries::apply_account_snapshot(
        &conn,
        "acct_1",
        &AccountSnapshot {
            charges_enabled: false,
            payouts_enabled: false,
            details_submitted: true,
            requirements_currently_due: vec!["external_account".to_string()],
            capability_card_payments: Some("pending".to_string()),
            capability_transfers: Some("pending".to_string()),
            ..Default::default()
        },
    )
    .unwrap()
    .unwrap();

    assert_eq!(account.onboarding_status(), OnboardingStatus::Pending);
    assert_eq!(account.requirements_currently_due, vec!["external_account"]);
    assert_eq!(account.capability_card_payments.as_deref(), Some("pending"));

    // All capabilities verified.
    let account = onboard_test_account(&conn, "acct_1");
    assert_eq!(account.onboarding_status(), OnboardingStatus::Complete);
    assert!(account.is_fully_onboarded());
}

#[test]
fn test_snapshot_can_revoke_capabilities() {
    let conn = setup_test_db();
    create_test_connect_account(&conn, "owner-1", "acct_1");
    onboard_test_account(&conn, "acct_1");

    // The gateway disabled payouts (e.g. new requirements past due).
    let account = queries::apply_account_snapshot(
        &conn,
        "acct_1",
        &AccountSnapshot {
            charges_enabled: true,
            payouts_enabled: false,
            details_submitted: true,
            requirements_past_due: vec!["individual.verification.document".to_string()],
            disabled_reason: Some("requirements.past_due".to_string()),
            ..Default::default()
        },
    )
    .unwrap()
    .unwrap();

    assert_eq!(account.onboarding_status(), OnboardingStatus::Pending);
    assert!(!account.is_fully_onboarded());
    assert_eq!(account.disabled_reason.as_deref(), Some("requirements.past_due"));
}

#[test]
fn test_snapshot_on_unknown_account() {
    let conn = setup_test_db();
    let result = queries::apply_account_snapshot(
        &conn,
        "acct_ghost",
        &AccountSnapshot::default(),
    )
    .unwrap();
    assert!(result.is_none());
}

#[test]
fn test_delete_account() {
    let conn = setup_test_db();
    create_test_connect_account(&conn, "owner-1", "acct_1");

    assert!(queries::delete_connect_account(&conn, "owner-1").unwrap());
    assert!(queries::get_connect_account_by_owner(&conn, "owner-1")
        .unwrap()
        .is_none());
    // Second delete: nothing left.
    assert!(!queries::delete_connect_account(&conn, "owner-1").unwrap());
}

#[test]
fn test_lookup_by_gateway_id() {
    let conn = setup_test_db();
    create_test_connect_account(&conn, "owner-1", "acct_1");

    let account = queries::get_connect_account_by_stripe_id(&conn, "acct_1")
        .unwrap()
        .expect("Account should be found by gateway id");
    assert_eq!(account.owner_id, "owner-1");
}
