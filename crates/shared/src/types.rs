//! Common types used across the SurveyFlow billing service

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Lifecycle state of a provider checkout session.
///
/// Transitions are strictly forward: `Pending -> Verified -> Used`.
/// `Used` is terminal; no transition ever returns to an earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Verified,
    Used,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Verified => "verified",
            SessionStatus::Used => "used",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "verified" => Some(Self::Verified),
            "used" => Some(Self::Used),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::Verified)
                | (SessionStatus::Verified, SessionStatus::Used)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a checkout session pays for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// First payment that gates account creation
    Signup,
    /// Credit-pack top-up for an existing account
    Credits,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Signup => "signup",
            SessionKind::Credits => "credits",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signup" => Some(Self::Signup),
            "credits" => Some(Self::Credits),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a usage-event reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageEventStatus {
    Reserved,
    Settled,
    RolledBack,
}

impl UsageEventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageEventStatus::Reserved => "reserved",
            UsageEventStatus::Settled => "settled",
            UsageEventStatus::RolledBack => "rolled_back",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reserved" => Some(Self::Reserved),
            "settled" => Some(Self::Settled),
            "rolled_back" => Some(Self::RolledBack),
            _ => None,
        }
    }
}

impl std::fmt::Display for UsageEventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Rows
// =============================================================================

/// A paying customer and their credit balance.
///
/// `id` is the external identity provider's subject id. The balance is kept
/// non-negative by a database constraint and by conditional updates in the
/// ledger; nothing else mutates `credits`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub credits: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One provider checkout attempt, tracked through pending/verified/used.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CheckoutSession {
    pub session_id: String,
    pub email: String,
    pub kind: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub verified_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub used_at: Option<OffsetDateTime>,
}

impl CheckoutSession {
    pub fn status(&self) -> Option<SessionStatus> {
        SessionStatus::parse(&self.status)
    }

    pub fn kind(&self) -> Option<SessionKind> {
        SessionKind::parse(&self.kind)
    }
}

/// One generation call's debit, from reservation through settlement.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageEvent {
    pub id: Uuid,
    pub account_id: Uuid,
    pub request_id: Uuid,
    pub reserved_credits: i64,
    pub final_credits: Option<i64>,
    /// Credits the account could not cover at settlement time
    pub shortfall_credits: i64,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub settled_at: Option<OffsetDateTime>,
}

impl UsageEvent {
    pub fn status(&self) -> Option<UsageEventStatus> {
        UsageEventStatus::parse(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_status_roundtrip() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::Verified,
            SessionStatus::Used,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("expired"), None);
    }

    #[test]
    fn test_session_status_transitions_forward_only() {
        use SessionStatus::*;

        assert!(Pending.can_transition_to(Verified));
        assert!(Verified.can_transition_to(Used));

        // No skips, no self-loops, nothing backwards
        assert!(!Pending.can_transition_to(Used));
        assert!(!Pending.can_transition_to(Pending));
        assert!(!Verified.can_transition_to(Pending));
        assert!(!Verified.can_transition_to(Verified));
        assert!(!Used.can_transition_to(Pending));
        assert!(!Used.can_transition_to(Verified));
        assert!(!Used.can_transition_to(Used));
    }

    #[test]
    fn test_session_kind_parse() {
        assert_eq!(SessionKind::parse("signup"), Some(SessionKind::Signup));
        assert_eq!(SessionKind::parse("credits"), Some(SessionKind::Credits));
        assert_eq!(SessionKind::parse("subscription"), None);
    }

    #[test]
    fn test_usage_event_status_display() {
        assert_eq!(UsageEventStatus::Reserved.to_string(), "reserved");
        assert_eq!(UsageEventStatus::RolledBack.to_string(), "rolled_back");
    }
}
