//! Login session lifecycle
//!
//! A `UserSession` row is created on login and deleted on logout, by an
//! explicit purge, or by cascade from its user. Expiry is a logical state:
//! the row stays in storage after `expiration_time` and it is up to the
//! reader to treat it as invalid.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::UserSession;

/// Default lifetime of a login session
pub const DEFAULT_SESSION_TTL_DAYS: i64 = 7;

pub fn default_session_ttl() -> Duration {
    Duration::days(DEFAULT_SESSION_TTL_DAYS)
}

/// State of a session as seen by an authentication check
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// `now < expiration_time`
    Active,
    /// `now >= expiration_time`; the row may still exist
    Expired,
    /// The row is gone (logout, purge, or user deleted)
    Revoked,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Expired => "expired",
            SessionState::Revoked => "revoked",
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, SessionState::Active)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a looked-up session at `now`
pub fn classify(session: Option<&UserSession>, now: DateTime<Utc>) -> SessionState {
    match session {
        None => SessionState::Revoked,
        Some(s) if s.is_expired_at(now) => SessionState::Expired,
        Some(_) => SessionState::Active,
    }
}
