//! Stripe webhook handling
//!
//! Verifies event signatures, claims each event id exactly once, and applies
//! `checkout.session.completed` events to the session tracker and the ledger.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{Event, EventObject, EventType, Webhook};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::sessions::SessionTracker;
use surveyflow_shared::SessionKind;

type HmacSha256 = Hmac<Sha256>;

/// Signed events older than this are rejected outright.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// A claim stuck in `processing` longer than this can be re-claimed.
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    sessions: SessionTracker,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            stripe,
            sessions: SessionTracker::new(pool.clone()),
            pool,
        }
    }

    /// Verify and parse a Stripe webhook event
    ///
    /// Uses manual signature verification as a fallback to work around
    /// async-stripe version incompatibility with newer Stripe API versions.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        // Parse the signature header: t=timestamp,v1=signature
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;
        for part in signature.split(',') {
            match part.splitn(2, '=').collect::<Vec<_>>().as_slice() {
                ["t", value] => timestamp = value.parse().ok(),
                ["v1", value] => v1_signature = Some((*value).to_string()),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
        let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::error!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let computed = compute_signature(webhook_secret, timestamp, payload)?;
        if computed != v1_signature {
            tracing::error!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification succeeded"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event.
    ///
    /// The INSERT...ON CONFLICT...RETURNING claim gives exactly one concurrent
    /// delivery processing rights per event id. Events that previously errored
    /// or have been stuck in `processing` past the timeout can be re-claimed,
    /// so provider redelivery doubles as our retry mechanism.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();
        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = NULL
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.processing_started_at < NOW() - ($4 || ' minutes')::INTERVAL)
            RETURNING id
            "#,
        )
        .bind(&event_id)
        .bind(&event_type_str)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_none() {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event, already processed or in flight"
            );
            return Ok(());
        }

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        let result = self.process_event_internal(&event).await;

        let (processing_result, error_message) = match &result {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };

        if let Err(e) = sqlx::query(
            r#"
            UPDATE stripe_webhook_events
            SET processing_result = $1, error_message = $2
            WHERE stripe_event_id = $3
            "#,
        )
        .bind(processing_result)
        .bind(&error_message)
        .bind(&event_id)
        .execute(&self.pool)
        .await
        {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Failed to record webhook processing result; event may appear stuck"
            );
        }

        result
    }

    async fn process_event_internal(&self, event: &Event) -> BillingResult<()> {
        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event.clone()).await
            }
            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type"
                );
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected CheckoutSession".to_string(),
                ))
            }
        };

        let session_id = session.id.to_string();

        let email = session
            .customer_email
            .clone()
            .or_else(|| {
                session
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("email").cloned())
            })
            .ok_or_else(|| {
                BillingError::Internal(format!(
                    "checkout session {} completed without a customer email",
                    session_id
                ))
            })?;

        let kind = session
            .metadata
            .as_ref()
            .and_then(|m| m.get("checkout_type"))
            .and_then(|s| SessionKind::parse(s))
            .unwrap_or(SessionKind::Signup);

        let quantity: i64 = session
            .metadata
            .as_ref()
            .and_then(|m| m.get("quantity"))
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        self.sessions
            .mark_verified(&session_id, &email, kind)
            .await?;

        match kind {
            // Sign-up sessions wait for the client to complete registration;
            // provisioning consumes them.
            SessionKind::Signup => Ok(()),
            // Credit purchases are applied right here.
            SessionKind::Credits => self.apply_credit_purchase(&session_id, &email, quantity).await,
        }
    }

    /// Grant a purchased credit pack to the matching account.
    ///
    /// Session consumption and the balance increment commit together, so the
    /// top-up lands at most once per session no matter how the surrounding
    /// event processing is retried.
    async fn apply_credit_purchase(
        &self,
        session_id: &str,
        email: &str,
        quantity: i64,
    ) -> BillingResult<()> {
        let granted = self.stripe.config().credit_pack_credits * quantity.max(1);

        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query(
            r#"
            UPDATE checkout_sessions
            SET status = 'used', used_at = NOW()
            WHERE session_id = $1 AND status = 'verified'
            "#,
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        if consumed.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::info!(
                session_id = %session_id,
                "Credit purchase already applied, skipping"
            );
            return Ok(());
        }

        let credited: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE accounts
            SET credits = credits + $2, updated_at = NOW()
            WHERE email = $1
            RETURNING credits
            "#,
        )
        .bind(email)
        .bind(granted)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((balance,)) = credited else {
            // No account yet: leave the session verified so a redelivery can
            // apply the grant once provisioning has happened.
            tx.rollback().await?;
            tracing::warn!(
                session_id = %session_id,
                email = %email,
                "Credit purchase completed for unknown account, deferring"
            );
            return Err(BillingError::AccountNotFound(email.to_string()));
        };

        tx.commit().await?;

        tracing::info!(
            session_id = %session_id,
            email = %email,
            granted = granted,
            balance = balance,
            "Applied credit purchase"
        );

        Ok(())
    }
}

/// HMAC-SHA256 over `"{timestamp}.{payload}"`, hex-encoded, per Stripe's
/// signature scheme.
fn compute_signature(secret: &str, timestamp: i64, payload: &str) -> BillingResult<String> {
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);
    let signed_payload = format!("{}.{}", timestamp, payload);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_compute_signature_strips_whsec_prefix() {
        let sig = compute_signature("whsec_secret", 12345, "{}").unwrap();
        let again = compute_signature("secret", 12345, "{}").unwrap();
        assert_eq!(sig, again);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_compute_signature_varies_with_payload() {
        let a = compute_signature("secret", 1, "{\"a\":1}").unwrap();
        let b = compute_signature("secret", 1, "{\"a\":2}").unwrap();
        let c = compute_signature("secret", 2, "{\"a\":1}").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
