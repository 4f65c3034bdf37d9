//! Integration tests for checkout-session tracking and account provisioning
//!
//! Verifies the pending -> verified -> used state machine, webhook-redelivery
//! idempotency, and at-most-once account creation.
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://..."  # migrated test database
//! cargo test -p surveyflow-billing -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use sqlx::PgPool;
use surveyflow_billing::{AccountProvisioner, BillingError, ProfileParams, SessionTracker};
use surveyflow_shared::SessionKind;
use uuid::Uuid;

// ============================================================================
// Test Utilities
// ============================================================================

async fn setup_pool() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

fn test_session_id() -> String {
    format!("cs_test_{}", Uuid::new_v4().simple())
}

fn test_email(session_id: &str) -> String {
    format!("{}@example.com", session_id)
}

fn provisioner(pool: &PgPool) -> AccountProvisioner {
    // No registration backend in tests; the notification step is skipped
    AccountProvisioner::new(pool.clone(), reqwest::Client::new(), None)
}

async fn cleanup_session(pool: &PgPool, session_id: &str, email: &str) {
    sqlx::query("DELETE FROM usage_events WHERE account_id IN (SELECT id FROM accounts WHERE email = $1)")
        .bind(email)
        .execute(pool)
        .await
        .ok();
    sqlx::query("DELETE FROM accounts WHERE email = $1")
        .bind(email)
        .execute(pool)
        .await
        .ok();
    sqlx::query("DELETE FROM checkout_sessions WHERE session_id = $1")
        .bind(session_id)
        .execute(pool)
        .await
        .ok();
}

// ============================================================================
// Test Cases: Session state machine
// ============================================================================

#[tokio::test]
#[ignore] // Requires database
async fn test_mark_verified_is_idempotent() {
    let pool = setup_pool().await;
    let tracker = SessionTracker::new(pool.clone());
    let session_id = test_session_id();
    let email = test_email(&session_id);

    tracker
        .record(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();

    // Webhook delivered twice: first promotes, second is a no-op
    let first = tracker
        .mark_verified(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();
    let second = tracker
        .mark_verified(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();

    assert!(first);
    assert!(!second);

    let session = tracker.get(&session_id).await.unwrap();
    assert_eq!(session.status, "verified");

    cleanup_session(&pool, &session_id, &email).await;
}

#[tokio::test]
#[ignore]
async fn test_mark_verified_creates_row_when_webhook_outruns_record() {
    let pool = setup_pool().await;
    let tracker = SessionTracker::new(pool.clone());
    let session_id = test_session_id();
    let email = test_email(&session_id);

    // No record() call: the webhook arrives first
    let promoted = tracker
        .mark_verified(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();
    assert!(promoted);

    let session = tracker.get(&session_id).await.unwrap();
    assert_eq!(session.status, "verified");
    assert_eq!(session.email, email);

    cleanup_session(&pool, &session_id, &email).await;
}

#[tokio::test]
#[ignore]
async fn test_mark_used_requires_verified() {
    let pool = setup_pool().await;
    let tracker = SessionTracker::new(pool.clone());
    let session_id = test_session_id();
    let email = test_email(&session_id);

    tracker
        .record(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();

    // pending -> used is not a legal transition
    let err = tracker.mark_used(&session_id).await.unwrap_err();
    assert!(matches!(err, BillingError::SessionConflict(_)));

    tracker
        .mark_verified(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();
    tracker.mark_used(&session_id).await.unwrap();

    // used is terminal; a second consume is a conflict
    let err = tracker.mark_used(&session_id).await.unwrap_err();
    assert!(matches!(err, BillingError::SessionConflict(_)));

    let session = tracker.get(&session_id).await.unwrap();
    assert_eq!(session.status, "used");

    cleanup_session(&pool, &session_id, &email).await;
}

#[tokio::test]
#[ignore]
async fn test_verified_session_never_regresses() {
    let pool = setup_pool().await;
    let tracker = SessionTracker::new(pool.clone());
    let session_id = test_session_id();
    let email = test_email(&session_id);

    tracker
        .mark_verified(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();
    tracker.mark_used(&session_id).await.unwrap();

    // A late redelivered webhook must not pull the session back to verified
    let promoted = tracker
        .mark_verified(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();
    assert!(!promoted);

    let session = tracker.get(&session_id).await.unwrap();
    assert_eq!(session.status, "used");

    cleanup_session(&pool, &session_id, &email).await;
}

#[tokio::test]
#[ignore]
async fn test_unknown_session_is_not_found() {
    let pool = setup_pool().await;
    let tracker = SessionTracker::new(pool.clone());

    let err = tracker.get("cs_test_does_not_exist").await.unwrap_err();
    assert!(matches!(err, BillingError::SessionNotFound(_)));
}

// ============================================================================
// Test Cases: Provisioning
// ============================================================================

#[tokio::test]
#[ignore]
async fn test_provision_creates_account_and_consumes_session() {
    let pool = setup_pool().await;
    let tracker = SessionTracker::new(pool.clone());
    let session_id = test_session_id();
    let email = test_email(&session_id);
    let identity_id = Uuid::new_v4();

    tracker
        .mark_verified(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();

    let account = provisioner(&pool)
        .provision(
            &session_id,
            identity_id,
            ProfileParams {
                name: "Ada Lovelace".to_string(),
                phone: Some("+1234567890".to_string()),
            },
            37_000,
        )
        .await
        .unwrap();

    assert_eq!(account.id, identity_id);
    assert_eq!(account.email, email);
    assert_eq!(account.credits, 37_000);

    let session = tracker.get(&session_id).await.unwrap();
    assert_eq!(session.status, "used");

    cleanup_session(&pool, &session_id, &email).await;
}

#[tokio::test]
#[ignore]
async fn test_provision_twice_creates_exactly_one_account() {
    let pool = setup_pool().await;
    let tracker = SessionTracker::new(pool.clone());
    let session_id = test_session_id();
    let email = test_email(&session_id);
    let identity_id = Uuid::new_v4();

    tracker
        .mark_verified(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();

    let svc = provisioner(&pool);
    let profile = ProfileParams {
        name: "Ada Lovelace".to_string(),
        phone: None,
    };

    let first = svc
        .provision(&session_id, identity_id, profile.clone(), 37_000)
        .await
        .unwrap();
    let second = svc
        .provision(&session_id, identity_id, profile, 37_000)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    // Seeded once, not twice
    assert_eq!(second.credits, 37_000);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE email = $1")
        .bind(&email)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1, "exactly one account row per paying customer");

    cleanup_session(&pool, &session_id, &email).await;
}

#[tokio::test]
#[ignore]
async fn test_provision_rejects_pending_session() {
    let pool = setup_pool().await;
    let tracker = SessionTracker::new(pool.clone());
    let session_id = test_session_id();
    let email = test_email(&session_id);

    tracker
        .record(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();

    let err = provisioner(&pool)
        .provision(
            &session_id,
            Uuid::new_v4(),
            ProfileParams {
                name: "Eve".to_string(),
                phone: None,
            },
            37_000,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::SessionConflict(_)));

    // No account may exist for an unpaid session
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM accounts WHERE email = $1")
        .bind(&email)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 0);

    cleanup_session(&pool, &session_id, &email).await;
}

#[tokio::test]
#[ignore]
async fn test_provision_reconciles_newer_identity_id() {
    let pool = setup_pool().await;
    let tracker = SessionTracker::new(pool.clone());
    let session_id = test_session_id();
    let email = test_email(&session_id);
    let old_identity = Uuid::new_v4();
    let new_identity = Uuid::new_v4();

    tracker
        .mark_verified(&session_id, &email, SessionKind::Signup)
        .await
        .unwrap();

    let svc = provisioner(&pool);
    let profile = ProfileParams {
        name: "Ada Lovelace".to_string(),
        phone: None,
    };

    svc.provision(&session_id, old_identity, profile.clone(), 37_000)
        .await
        .unwrap();

    // The customer re-registered with the auth provider and retries with a
    // fresh subject id; the row follows the newer identity
    let account = svc
        .provision(&session_id, new_identity, profile, 37_000)
        .await
        .unwrap();

    assert_eq!(account.id, new_identity);
    assert_eq!(account.credits, 37_000);

    cleanup_session(&pool, &session_id, &email).await;
}
