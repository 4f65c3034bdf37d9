//! Account provisioning
//!
//! Creates exactly one account per paying customer once their checkout
//! session is verified, seeds the initial credit balance, consumes the
//! session, and notifies the registration backend. Every step tolerates
//! retries: the account row is the source of truth, and a session that was
//! already consumed by a successful earlier attempt resolves to that
//! attempt's account instead of an error.

use sqlx::PgPool;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::sessions::SessionTracker;
use surveyflow_shared::{Account, SessionStatus};

/// Bounded retry for the outbound registration notification.
const REGISTRATION_RETRY_ATTEMPTS: usize = 3;
const REGISTRATION_RETRY_BASE_MS: u64 = 500;

/// Profile details collected at sign-up.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ProfileParams {
    pub name: String,
    pub phone: Option<String>,
}

pub struct AccountProvisioner {
    pool: PgPool,
    sessions: SessionTracker,
    http: reqwest::Client,
    /// Base URL of the registration backend; notification is skipped when unset
    registration_base_url: Option<String>,
}

impl AccountProvisioner {
    pub fn new(
        pool: PgPool,
        http: reqwest::Client,
        registration_base_url: Option<String>,
    ) -> Self {
        Self {
            sessions: SessionTracker::new(pool.clone()),
            pool,
            http,
            registration_base_url,
        }
    }

    /// Provision the account paid for by `session_id`.
    ///
    /// `identity_id` is the identity provider's subject id for the customer
    /// and becomes the account's primary key. The session must be `verified`;
    /// a `used` session is accepted only when its account already exists.
    pub async fn provision(
        &self,
        session_id: &str,
        identity_id: Uuid,
        profile: ProfileParams,
        initial_credits: i64,
    ) -> BillingResult<Account> {
        if initial_credits < 0 {
            return Err(BillingError::InvalidAmount(format!(
                "initial credits cannot be negative, got {}",
                initial_credits
            )));
        }

        let session = self.sessions.get(session_id).await?;

        match session.status() {
            Some(SessionStatus::Verified) => {}
            Some(SessionStatus::Used) => {
                // A completed earlier attempt already consumed the session.
                if let Some(account) = self.find_by_email(&session.email).await? {
                    let account = self
                        .reconcile_identity(account, identity_id, &session.email)
                        .await?;
                    tracing::info!(
                        session_id = %session_id,
                        account_id = %account.id,
                        "Session already consumed, returning provisioned account"
                    );
                    return Ok(account);
                }
                return Err(BillingError::SessionConflict(format!(
                    "{}: session consumed but no account exists",
                    session_id
                )));
            }
            Some(SessionStatus::Pending) => {
                return Err(BillingError::SessionConflict(format!(
                    "{}: payment not verified yet",
                    session_id
                )));
            }
            None => {
                return Err(BillingError::Internal(format!(
                    "session {} has unknown status {}",
                    session_id, session.status
                )));
            }
        }

        // At most one row per email, no matter how many attempts race here.
        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, name, phone, credits)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(identity_id)
        .bind(&session.email)
        .bind(&profile.name)
        .bind(&profile.phone)
        .bind(initial_credits)
        .execute(&self.pool)
        .await?;

        let account = self
            .find_by_email(&session.email)
            .await?
            .ok_or_else(|| {
                BillingError::Internal(format!(
                    "account for {} missing after insert",
                    session.email
                ))
            })?;
        let account = self
            .reconcile_identity(account, identity_id, &session.email)
            .await?;

        match self.sessions.mark_used(session_id).await {
            Ok(()) => {}
            // Lost the consume race to a concurrent attempt; the account
            // exists, which is the outcome that matters.
            Err(BillingError::SessionConflict(_)) => {
                tracing::info!(
                    session_id = %session_id,
                    "Session consumed concurrently during provisioning"
                );
            }
            Err(e) => return Err(e),
        }

        self.notify_registration(&session.email).await;

        tracing::info!(
            account_id = %account.id,
            session_id = %session_id,
            initial_credits = initial_credits,
            "Account provisioned"
        );

        Ok(account)
    }

    /// An earlier attempt may have stored a stale identity id (e.g. the user
    /// re-registered with the auth provider). Follow the id the caller just
    /// authenticated with; `usage_events` rows cascade along.
    async fn reconcile_identity(
        &self,
        mut account: Account,
        identity_id: Uuid,
        email: &str,
    ) -> BillingResult<Account> {
        if account.id == identity_id {
            return Ok(account);
        }

        tracing::warn!(
            old_id = %account.id,
            new_id = %identity_id,
            email = %email,
            "Reconciling account identity id"
        );
        sqlx::query("UPDATE accounts SET id = $1, updated_at = NOW() WHERE email = $2")
            .bind(identity_id)
            .bind(email)
            .execute(&self.pool)
            .await?;
        account.id = identity_id;

        Ok(account)
    }

    async fn find_by_email(&self, email: &str) -> BillingResult<Option<Account>> {
        let account: Option<Account> = sqlx::query_as(
            "SELECT id, email, name, phone, credits, created_at, updated_at
             FROM accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// Tell the registration backend that provisioning finished. Idempotent
    /// by email on the receiving side; retried with backoff here. The account
    /// row is the source of truth, so exhausted retries are logged rather
    /// than failing the provisioning that already happened.
    async fn notify_registration(&self, email: &str) {
        let Some(base_url) = self.registration_base_url.as_deref() else {
            return;
        };

        let url = format!("{}/complete-registration", base_url.trim_end_matches('/'));
        let strategy = ExponentialBackoff::from_millis(REGISTRATION_RETRY_BASE_MS)
            .map(jitter)
            .take(REGISTRATION_RETRY_ATTEMPTS);

        let result = Retry::spawn(strategy, || async {
            let response = self
                .http
                .post(&url)
                .json(&serde_json::json!({ "email": email }))
                .send()
                .await
                .map_err(|e| BillingError::Registration(e.to_string()))?;

            if !response.status().is_success() {
                return Err(BillingError::Registration(format!(
                    "registration backend returned {}",
                    response.status()
                )));
            }
            Ok(())
        })
        .await;

        if let Err(e) = result {
            tracing::error!(
                email = %email,
                error = %e,
                "Registration notification failed after retries; replay on next login"
            );
        }
    }
}
