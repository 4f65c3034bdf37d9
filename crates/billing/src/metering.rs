//! Usage metering
//!
//! Two-phase accounting around AI generation calls. The true token cost of a
//! generation is unknown until the provider responds, so the caller reserves
//! an estimated amount up front, then settles to the actual cost (or cancels
//! the whole reservation when the call fails). Every phase is keyed by the
//! caller's `request_id`, so retries have at-most-once effect on the ledger.

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use surveyflow_shared::{UsageEvent, UsageEventStatus};

/// A claimed (or re-observed) reservation.
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub request_id: Uuid,
    pub account_id: Uuid,
    pub reserved_credits: i64,
    /// Balance after the reservation's debit
    pub balance: i64,
    /// True when this call found an existing reservation for `request_id`
    /// and debited nothing
    pub duplicate: bool,
}

/// Result of settling a reservation against the actual cost.
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub request_id: Uuid,
    pub final_credits: i64,
    /// Credits the account could not cover when the actual cost exceeded
    /// the reservation; zero in the normal case
    pub shortfall_credits: i64,
    pub balance: i64,
}

/// Metering service tying generation calls to the credit ledger.
pub struct UsageMetering {
    pool: PgPool,
}

impl UsageMetering {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reserve `estimated_credits` for a generation call.
    ///
    /// The usage-event insert and the conditional debit commit together;
    /// an insufficient balance leaves no trace. Re-invoking with a
    /// `request_id` that already has a reservation returns it unchanged.
    pub async fn reserve(
        &self,
        account_id: Uuid,
        request_id: Uuid,
        estimated_credits: i64,
    ) -> BillingResult<Reservation> {
        if estimated_credits <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "reservation must be positive, got {}",
                estimated_credits
            )));
        }

        let mut tx = self.pool.begin().await?;

        let debited: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET credits = credits - $2, updated_at = NOW()
            WHERE id = $1 AND credits >= $2
            RETURNING credits
            "#,
        )
        .bind(account_id)
        .bind(estimated_credits)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((balance,)) = debited else {
            tx.rollback().await?;
            let available: Option<(i64,)> =
                sqlx::query_as("SELECT credits FROM accounts WHERE id = $1")
                    .bind(account_id)
                    .fetch_optional(&self.pool)
                    .await?;
            return match available {
                Some((available,)) => Err(BillingError::InsufficientCredits {
                    needed: estimated_credits,
                    available,
                }),
                None => Err(BillingError::AccountNotFound(account_id.to_string())),
            };
        };

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO usage_events (account_id, request_id, reserved_credits)
            VALUES ($1, $2, $3)
            ON CONFLICT (request_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(account_id)
        .bind(request_id)
        .bind(estimated_credits)
        .fetch_optional(&mut *tx)
        .await?;

        if inserted.is_none() {
            // Duplicate request id: roll the debit back and surface the
            // original reservation, charging nothing.
            tx.rollback().await?;
            let existing = self.get_event(request_id).await?;
            if existing.account_id != account_id {
                return Err(BillingError::ReservationConflict(format!(
                    "request {} belongs to another account",
                    request_id
                )));
            }

            let balance: i64 = sqlx::query_scalar("SELECT credits FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await?;

            tracing::info!(
                account_id = %account_id,
                request_id = %request_id,
                "Duplicate reservation request, returning existing reservation"
            );

            return Ok(Reservation {
                request_id,
                account_id,
                reserved_credits: existing.reserved_credits,
                balance,
                duplicate: true,
            });
        }

        tx.commit().await?;

        tracing::info!(
            account_id = %account_id,
            request_id = %request_id,
            reserved = estimated_credits,
            balance = balance,
            "Reserved credits for generation"
        );

        Ok(Reservation {
            request_id,
            account_id,
            reserved_credits: estimated_credits,
            balance,
            duplicate: false,
        })
    }

    /// Settle a reservation to the actual cost reported by the provider.
    ///
    /// Cheaper than reserved refunds the difference; more expensive debits
    /// the difference under a row lock, flooring the balance at zero and
    /// recording the uncovered remainder on the event. Settling an
    /// already-settled reservation returns the recorded outcome.
    pub async fn settle(&self, request_id: Uuid, actual_credits: i64) -> BillingResult<Settlement> {
        if actual_credits < 0 {
            return Err(BillingError::InvalidAmount(format!(
                "actual cost cannot be negative, got {}",
                actual_credits
            )));
        }

        let mut tx = self.pool.begin().await?;

        let event: Option<UsageEvent> = sqlx::query_as(
            r#"
            SELECT id, account_id, request_id, reserved_credits, final_credits,
                   shortfall_credits, status, created_at, settled_at
            FROM usage_events
            WHERE request_id = $1
            FOR UPDATE
            "#,
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(event) = event else {
            return Err(BillingError::ReservationNotFound(request_id.to_string()));
        };

        match event.status() {
            Some(UsageEventStatus::Settled) => {
                tx.rollback().await?;
                let balance: i64 =
                    sqlx::query_scalar("SELECT credits FROM accounts WHERE id = $1")
                        .bind(event.account_id)
                        .fetch_one(&self.pool)
                        .await?;
                return Ok(Settlement {
                    request_id,
                    final_credits: event.final_credits.unwrap_or(event.reserved_credits),
                    shortfall_credits: event.shortfall_credits,
                    balance,
                });
            }
            Some(UsageEventStatus::RolledBack) => {
                return Err(BillingError::ReservationConflict(format!(
                    "request {} was already rolled back",
                    request_id
                )));
            }
            Some(UsageEventStatus::Reserved) => {}
            None => {
                return Err(BillingError::Internal(format!(
                    "usage event {} has unknown status {}",
                    event.id, event.status
                )));
            }
        }

        let delta = actual_credits - event.reserved_credits;
        let mut shortfall = 0_i64;

        let balance = if delta < 0 {
            // Over-reserved: refund the unused portion.
            let (balance,): (i64,) = sqlx::query_as(
                r#"
                UPDATE accounts
                SET credits = credits + $2, updated_at = NOW()
                WHERE id = $1
                RETURNING credits
                "#,
            )
            .bind(event.account_id)
            .bind(-delta)
            .fetch_one(&mut *tx)
            .await?;
            balance
        } else if delta > 0 {
            // Under-reserved: take the difference. The row lock makes the
            // read-compute-write a single serialized step.
            let (available,): (i64,) =
                sqlx::query_as("SELECT credits FROM accounts WHERE id = $1 FOR UPDATE")
                    .bind(event.account_id)
                    .fetch_one(&mut *tx)
                    .await?;

            let extra = delta.min(available);
            shortfall = delta - extra;

            let (balance,): (i64,) = sqlx::query_as(
                r#"
                UPDATE accounts
                SET credits = credits - $2, updated_at = NOW()
                WHERE id = $1
                RETURNING credits
                "#,
            )
            .bind(event.account_id)
            .bind(extra)
            .fetch_one(&mut *tx)
            .await?;
            balance
        } else {
            let (balance,): (i64,) =
                sqlx::query_as("SELECT credits FROM accounts WHERE id = $1")
                    .bind(event.account_id)
                    .fetch_one(&mut *tx)
                    .await?;
            balance
        };

        sqlx::query(
            r#"
            UPDATE usage_events
            SET status = 'settled', final_credits = $2, shortfall_credits = $3, settled_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event.id)
        .bind(actual_credits)
        .bind(shortfall)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if shortfall > 0 {
            tracing::warn!(
                account_id = %event.account_id,
                request_id = %request_id,
                actual = actual_credits,
                reserved = event.reserved_credits,
                shortfall = shortfall,
                "Actual cost exceeded both reservation and remaining balance"
            );
        } else {
            tracing::info!(
                account_id = %event.account_id,
                request_id = %request_id,
                actual = actual_credits,
                reserved = event.reserved_credits,
                balance = balance,
                "Settled generation cost"
            );
        }

        Ok(Settlement {
            request_id,
            final_credits: actual_credits,
            shortfall_credits: shortfall,
            balance,
        })
    }

    /// Roll a reservation back after a failed generation call, refunding
    /// the full reserved amount. Safe to retry.
    pub async fn cancel(&self, request_id: Uuid) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        let event: Option<UsageEvent> = sqlx::query_as(
            r#"
            SELECT id, account_id, request_id, reserved_credits, final_credits,
                   shortfall_credits, status, created_at, settled_at
            FROM usage_events
            WHERE request_id = $1
            FOR UPDATE
            "#,
        )
        .bind(request_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(event) = event else {
            return Err(BillingError::ReservationNotFound(request_id.to_string()));
        };

        match event.status() {
            Some(UsageEventStatus::RolledBack) => {
                // Already refunded by an earlier retry
                tx.rollback().await?;
                return Ok(());
            }
            Some(UsageEventStatus::Settled) => {
                return Err(BillingError::ReservationConflict(format!(
                    "request {} was already settled",
                    request_id
                )));
            }
            Some(UsageEventStatus::Reserved) => {}
            None => {
                return Err(BillingError::Internal(format!(
                    "usage event {} has unknown status {}",
                    event.id, event.status
                )));
            }
        }

        sqlx::query(
            r#"
            UPDATE accounts
            SET credits = credits + $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event.account_id)
        .bind(event.reserved_credits)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE usage_events
            SET status = 'rolled_back', final_credits = 0, settled_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(event.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            account_id = %event.account_id,
            request_id = %request_id,
            refunded = event.reserved_credits,
            "Rolled back reservation after failed generation"
        );

        Ok(())
    }

    /// Look up a usage event by its request id.
    pub async fn get_event(&self, request_id: Uuid) -> BillingResult<UsageEvent> {
        let event: Option<UsageEvent> = sqlx::query_as(
            r#"
            SELECT id, account_id, request_id, reserved_credits, final_credits,
                   shortfall_credits, status, created_at, settled_at
            FROM usage_events
            WHERE request_id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        event.ok_or_else(|| BillingError::ReservationNotFound(request_id.to_string()))
    }

    /// Recent usage events for an account, newest first.
    pub async fn recent_events(
        &self,
        account_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<UsageEvent>> {
        let events: Vec<UsageEvent> = sqlx::query_as(
            r#"
            SELECT id, account_id, request_id, reserved_credits, final_credits,
                   shortfall_credits, status, created_at, settled_at
            FROM usage_events
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }
}
