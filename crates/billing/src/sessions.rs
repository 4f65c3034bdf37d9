//! Checkout session tracking
//!
//! Records provider checkout sessions and walks them through the
//! pending -> verified -> used state machine. Verification comes from the
//! payment provider's webhook and may be redelivered any number of times;
//! consumption happens once, at provisioning. Both transitions are single
//! conditional statements, so replays and races resolve at the database.

use sqlx::PgPool;

use crate::error::{BillingError, BillingResult};
use surveyflow_shared::{CheckoutSession, SessionKind, SessionStatus};

pub struct SessionTracker {
    pool: PgPool,
}

impl SessionTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record a freshly created checkout session as `pending`.
    /// Replaying the insert for the same session id is a no-op.
    pub async fn record(
        &self,
        session_id: &str,
        email: &str,
        kind: SessionKind,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO checkout_sessions (session_id, email, kind)
            VALUES ($1, $2, $3)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(email)
        .bind(kind.as_str())
        .execute(&self.pool)
        .await?;

        tracing::info!(
            session_id = %session_id,
            kind = %kind,
            "Recorded checkout session"
        );

        Ok(())
    }

    /// Mark a session as verified after a provider-confirmed payment event.
    ///
    /// Idempotent under webhook redelivery: the conditional upsert promotes a
    /// `pending` row, creates the row directly in `verified` when the webhook
    /// outruns [`record`](Self::record), and leaves `verified`/`used` rows
    /// untouched. Returns whether this call performed the promotion.
    pub async fn mark_verified(
        &self,
        session_id: &str,
        email: &str,
        kind: SessionKind,
    ) -> BillingResult<bool> {
        let promoted: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO checkout_sessions (session_id, email, kind, status, verified_at)
            VALUES ($1, $2, $3, 'verified', NOW())
            ON CONFLICT (session_id) DO UPDATE
                SET status = 'verified', verified_at = NOW(), email = EXCLUDED.email
                WHERE checkout_sessions.status = 'pending'
            RETURNING session_id
            "#,
        )
        .bind(session_id)
        .bind(email)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let newly_verified = promoted.is_some();
        if newly_verified {
            tracing::info!(session_id = %session_id, "Checkout session verified");
        } else {
            tracing::info!(
                session_id = %session_id,
                "Checkout session already verified, ignoring redelivered event"
            );
        }

        Ok(newly_verified)
    }

    /// Consume a verified session. Fails with a conflict when the session is
    /// not currently `verified`, so a replayed or reused session id can never
    /// provision twice.
    pub async fn mark_used(&self, session_id: &str) -> BillingResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE checkout_sessions
            SET status = 'used', used_at = NOW()
            WHERE session_id = $1 AND status = 'verified'
            "#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let session = self.get(session_id).await?;
            let reason = match session.status() {
                Some(SessionStatus::Pending) => "payment not verified yet",
                Some(SessionStatus::Used) => "session already used",
                _ => "session in unexpected state",
            };
            tracing::warn!(
                session_id = %session_id,
                status = %session.status,
                "Rejected attempt to consume checkout session"
            );
            return Err(BillingError::SessionConflict(format!(
                "{}: {}",
                session_id, reason
            )));
        }

        tracing::info!(session_id = %session_id, "Checkout session consumed");
        Ok(())
    }

    /// Fetch a session by provider id.
    pub async fn get(&self, session_id: &str) -> BillingResult<CheckoutSession> {
        let session: Option<CheckoutSession> = sqlx::query_as(
            r#"
            SELECT session_id, email, kind, status, created_at, verified_at, used_at
            FROM checkout_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        session.ok_or_else(|| BillingError::SessionNotFound(session_id.to_string()))
    }
}
