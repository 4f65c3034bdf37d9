//! Credit ledger
//!
//! Every balance mutation is a single conditional UPDATE at the database, so
//! concurrent debits can never drive an account negative. There is no
//! read-then-write path anywhere in this module.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use surveyflow_shared::Account;

/// Ledger over per-account credit balances.
pub struct CreditLedger {
    pool: PgPool,
}

impl CreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Current balance for an account.
    pub async fn balance(&self, account_id: Uuid) -> BillingResult<i64> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT credits FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(credits,)| credits)
            .ok_or_else(|| BillingError::AccountNotFound(account_id.to_string()))
    }

    /// Fetch the full account row.
    pub async fn get_account(&self, account_id: Uuid) -> BillingResult<Account> {
        let account: Option<Account> = sqlx::query_as(
            "SELECT id, email, name, phone, credits, created_at, updated_at
             FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        account.ok_or_else(|| BillingError::AccountNotFound(account_id.to_string()))
    }

    /// Fetch an account by email (used when a webhook only carries the
    /// customer's email address).
    pub async fn find_account_by_email(&self, email: &str) -> BillingResult<Option<Account>> {
        let account: Option<Account> = sqlx::query_as(
            "SELECT id, email, name, phone, credits, created_at, updated_at
             FROM accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    /// Debit `amount` credits, returning the new balance.
    ///
    /// The debit is all-or-nothing: the conditional guard rejects it outright
    /// when the balance cannot cover it, and two concurrent debits whose sum
    /// exceeds the balance cannot both pass the guard.
    pub async fn debit(&self, account_id: Uuid, amount: i64) -> BillingResult<i64> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "debit amount must be positive, got {}",
                amount
            )));
        }

        let updated: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET credits = credits - $2, updated_at = NOW()
            WHERE id = $1 AND credits >= $2
            RETURNING credits
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some((balance,)) => {
                tracing::debug!(
                    account_id = %account_id,
                    amount = amount,
                    balance = balance,
                    "Debited credits"
                );
                Ok(balance)
            }
            // Guard failed: unknown account, or balance too low
            None => match self.try_balance(account_id).await? {
                Some(available) => Err(BillingError::InsufficientCredits {
                    needed: amount,
                    available,
                }),
                None => Err(BillingError::AccountNotFound(account_id.to_string())),
            },
        }
    }

    /// Credit `amount` credits, returning the new balance.
    pub async fn credit(&self, account_id: Uuid, amount: i64) -> BillingResult<i64> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }

        let updated: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET credits = credits + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING credits
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some((balance,)) => {
                tracing::info!(
                    account_id = %account_id,
                    amount = amount,
                    balance = balance,
                    "Credited account"
                );
                Ok(balance)
            }
            None => Err(BillingError::AccountNotFound(account_id.to_string())),
        }
    }

    async fn try_balance(&self, account_id: Uuid) -> BillingResult<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT credits FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(credits,)| credits))
    }
}
