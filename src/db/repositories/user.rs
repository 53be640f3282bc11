//! User repository

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use uuid::Uuid;

use super::{format_timestamp, now_utc, parse_timestamp, parse_uuid};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    pub user_id: Uuid,
    pub user_image: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    /// Argon2 PHC string
    #[serde(skip_serializing)]
    pub password: String,
    pub last_updated: DateTime<Utc>,
}

/// Fields supplied at registration. `password` is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub user_image: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    pub password: String,
}

/// Profile fields to change; `None` keeps the stored value
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub user_image: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email_address: Option<String>,
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.user_image.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
            && self.email_address.is_none()
    }
}

const USER_COLUMNS: &str = "user_id, user_image, user_name, first_name, last_name, \
                            email_address, password, last_updated";

pub struct UserRepository<'a> {
    conn: &'a Connection,
}

impl<'a> UserRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new user with a fresh id
    pub fn create(&self, new_user: &NewUser) -> Result<User> {
        let user = User {
            user_id: Uuid::new_v4(),
            user_image: new_user.user_image.clone(),
            user_name: new_user.user_name.clone(),
            first_name: new_user.first_name.clone(),
            last_name: new_user.last_name.clone(),
            email_address: new_user.email_address.clone(),
            password: new_user.password.clone(),
            last_updated: now_utc(),
        };

        self.conn.execute(
            "INSERT INTO users (user_id, user_image, user_name, first_name, last_name,
                                email_address, password, last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user.user_id.to_string(),
                user.user_image,
                user.user_name,
                user.first_name,
                user.last_name,
                user.email_address,
                user.password,
                format_timestamp(user.last_updated),
            ],
        )?;

        tracing::debug!(user_id = %user.user_id, user_name = %user.user_name, "created user");
        Ok(user)
    }

    /// Get a user by id
    pub fn get(&self, user_id: Uuid) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id.to_string()],
                Self::map_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn find_by_user_name(&self, user_name: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_name = ?1"),
                params![user_name],
                Self::map_row,
            )
            .optional()?;
        Ok(user)
    }

    /// List all users by user name
    pub fn list(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY user_name"))?;
        let users = stmt
            .query_map([], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    /// Apply a profile update and refresh `last_updated`.
    /// Returns `None` when the user does not exist.
    pub fn update_profile(&self, user_id: Uuid, update: &UserUpdate) -> Result<Option<User>> {
        let changed = self.conn.execute(
            "UPDATE users
                SET user_image = COALESCE(?1, user_image),
                    first_name = COALESCE(?2, first_name),
                    last_name = COALESCE(?3, last_name),
                    email_address = COALESCE(?4, email_address),
                    last_updated = ?5
              WHERE user_id = ?6",
            params![
                update.user_image,
                update.first_name,
                update.last_name,
                update.email_address,
                format_timestamp(now_utc()),
                user_id.to_string(),
            ],
        )?;

        if changed == 0 {
            return Ok(None);
        }

        tracing::debug!(%user_id, "updated user profile");
        self.get(user_id)
    }

    /// Replace the stored password hash and refresh `last_updated`
    pub fn set_password(&self, user_id: Uuid, password_hash: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE users SET password = ?1, last_updated = ?2 WHERE user_id = ?3",
            params![
                password_hash,
                format_timestamp(now_utc()),
                user_id.to_string()
            ],
        )?;
        Ok(changed > 0)
    }

    /// Delete a user; their sessions go with them (ON DELETE CASCADE)
    pub fn delete(&self, user_id: Uuid) -> Result<bool> {
        let changed = self.conn.execute(
            "DELETE FROM users WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        if changed > 0 {
            tracing::debug!(%user_id, "deleted user");
        }
        Ok(changed > 0)
    }

    fn map_row(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            user_id: parse_uuid(0, &row.get::<_, String>(0)?)?,
            user_image: row.get(1)?,
            user_name: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            email_address: row.get(5)?,
            password: row.get(6)?,
            last_updated: parse_timestamp(7, &row.get::<_, String>(7)?)?,
        })
    }
}
