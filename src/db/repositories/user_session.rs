//! User session repository

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::{format_timestamp, now_utc, parse_timestamp, parse_uuid};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UserSession {
    pub session_id: Uuid,
    /// `None` for an anonymous (pre-auth) session
    pub user_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
}

impl UserSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration_time
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

const SESSION_COLUMNS: &str = "session_id, user_id, start_time, expiration_time";

pub struct UserSessionRepository<'a> {
    conn: &'a Connection,
    ttl: Duration,
}

impl<'a> UserSessionRepository<'a> {
    pub fn new(conn: &'a Connection, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    /// Start a session now, expiring after the configured lifetime
    pub fn create(&self, user_id: Option<Uuid>) -> Result<UserSession> {
        self.create_at(user_id, now_utc())
    }

    /// Start a session at `start_time`, expiring after the configured lifetime
    pub fn create_at(&self, user_id: Option<Uuid>, start_time: DateTime<Utc>) -> Result<UserSession> {
        self.create_with_expiration(user_id, start_time, start_time + self.ttl)
    }

    /// Insert a session with explicit bounds.
    ///
    /// The database rejects `expiration_time <= start_time` and unknown
    /// `user_id`s with a constraint violation.
    pub fn create_with_expiration(
        &self,
        user_id: Option<Uuid>,
        start_time: DateTime<Utc>,
        expiration_time: DateTime<Utc>,
    ) -> Result<UserSession> {
        let session = UserSession {
            session_id: Uuid::new_v4(),
            user_id,
            start_time,
            expiration_time,
        };

        self.conn.execute(
            "INSERT INTO user_sessions (session_id, user_id, start_time, expiration_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                session.session_id.to_string(),
                session.user_id.map(|id| id.to_string()),
                format_timestamp(session.start_time),
                format_timestamp(session.expiration_time),
            ],
        )?;

        tracing::debug!(
            session_id = %session.session_id,
            user_id = ?session.user_id,
            expires = %session.expiration_time,
            "created session"
        );
        Ok(session)
    }

    /// Get a session by id, expired or not
    pub fn get(&self, session_id: Uuid) -> Result<Option<UserSession>> {
        let session = self
            .conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM user_sessions WHERE session_id = ?1"),
                params![session_id.to_string()],
                Self::map_row,
            )
            .optional()?;
        Ok(session)
    }

    /// All sessions of a user, newest first
    pub fn list_for_user(&self, user_id: Uuid) -> Result<Vec<UserSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM user_sessions
              WHERE user_id = ?1
              ORDER BY start_time DESC"
        ))?;
        let sessions = stmt
            .query_map(params![user_id.to_string()], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// Delete one session (logout)
    pub fn delete(&self, session_id: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM user_sessions WHERE session_id = ?1",
            params![session_id.to_string()],
        )?;
        if changed > 0 {
            tracing::debug!(%session_id, "deleted session");
        }
        Ok(changed > 0)
    }

    /// Delete every session of a user
    pub fn delete_for_user(&self, user_id: Uuid) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM user_sessions WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        tracing::debug!(%user_id, removed, "deleted user sessions");
        Ok(removed)
    }

    /// Delete sessions whose expiration is at or before `now`
    pub fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM user_sessions WHERE expiration_time <= ?1",
            params![format_timestamp(now)],
        )?;
        tracing::debug!(removed, "deleted expired sessions");
        Ok(removed)
    }

    fn map_row(row: &Row) -> rusqlite::Result<UserSession> {
        let user_id = row
            .get::<_, Option<String>>(1)?
            .map(|raw| parse_uuid(1, &raw))
            .transpose()?;

        Ok(UserSession {
            session_id: parse_uuid(0, &row.get::<_, String>(0)?)?,
            user_id,
            start_time: parse_timestamp(2, &row.get::<_, String>(2)?)?,
            expiration_time: parse_timestamp(3, &row.get::<_, String>(3)?)?,
        })
    }
}
