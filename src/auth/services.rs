//! Account operations built on a unit-of-work
//!
//! None of these commit; the caller decides the transaction boundary.

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::password::{hash_password, verify_against_dummy, verify_password};
use crate::db::repositories::now_utc;
use crate::db::{NewUser, UnitOfWork, User, UserSession};
use crate::error::{Result, StoreError};
use crate::session::{classify, SessionState};

pub const MIN_PASSWORD_LEN: usize = 8;

/// Registration input with the plaintext password
#[derive(Debug, Clone)]
pub struct Registration {
    pub user_image: String,
    pub user_name: String,
    pub first_name: String,
    pub last_name: String,
    pub email_address: String,
    pub password: String,
}

fn validate_registration(reg: &Registration) -> Result<()> {
    if reg.user_name.trim().is_empty() {
        return Err(StoreError::Validation("user_name must not be empty".into()));
    }
    if !reg.email_address.contains('@') {
        return Err(StoreError::Validation("invalid email address".into()));
    }
    if reg.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(StoreError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Create a user with a hashed password.
///
/// A taken `user_name` surfaces as `StoreError::ConstraintViolation`.
#[instrument(skip(uow, reg), fields(user_name = %reg.user_name))]
pub fn register(uow: &UnitOfWork, reg: &Registration) -> Result<User> {
    validate_registration(reg)?;

    let user = uow.users().create(&NewUser {
        user_image: reg.user_image.clone(),
        user_name: reg.user_name.trim().to_string(),
        first_name: reg.first_name.clone(),
        last_name: reg.last_name.clone(),
        email_address: reg.email_address.trim().to_lowercase(),
        password: hash_password(&reg.password)?,
    })?;

    info!(user_id = %user.user_id, "registered user");
    Ok(user)
}

/// Verify credentials and open a session. `None` means the credentials were
/// wrong; unknown user names and bad passwords are not distinguished.
pub fn login(uow: &UnitOfWork, user_name: &str, password: &str) -> Result<Option<UserSession>> {
    login_at(uow, user_name, password, now_utc())
}

#[instrument(skip(uow, password))]
pub fn login_at(
    uow: &UnitOfWork,
    user_name: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<Option<UserSession>> {
    let Some(user) = uow.users().find_by_user_name(user_name.trim())? else {
        verify_against_dummy(password);
        warn!("login for unknown user");
        return Ok(None);
    };

    if !verify_password(password, &user.password)? {
        warn!(user_id = %user.user_id, "login with wrong password");
        return Ok(None);
    }

    let session = uow.sessions().create_at(Some(user.user_id), now)?;
    info!(user_id = %user.user_id, session_id = %session.session_id, "user logged in");
    Ok(Some(session))
}

/// Open a session not yet tied to a user
pub fn start_anonymous_session(uow: &UnitOfWork) -> Result<UserSession> {
    uow.sessions().create(None)
}

/// Classify a session at `now`. Expired rows are reported, not deleted.
pub fn check_session(uow: &UnitOfWork, session_id: Uuid, now: DateTime<Utc>) -> Result<SessionState> {
    let session = uow.sessions().get(session_id)?;
    Ok(classify(session.as_ref(), now))
}

/// The user behind an active, non-anonymous session
pub fn authenticate(uow: &UnitOfWork, session_id: Uuid, now: DateTime<Utc>) -> Result<Option<User>> {
    let session = uow.sessions().get(session_id)?;
    match session {
        Some(s) if classify(Some(&s), now).is_valid() => match s.user_id {
            Some(user_id) => uow.users().get(user_id),
            None => Ok(None),
        },
        _ => Ok(None),
    }
}

/// Delete one session
pub fn logout(uow: &UnitOfWork, session_id: Uuid) -> Result<bool> {
    let removed = uow.sessions().delete(session_id)?;
    if removed {
        info!(%session_id, "session logged out");
    }
    Ok(removed)
}

/// Delete every session of a user
pub fn logout_everywhere(uow: &UnitOfWork, user_id: Uuid) -> Result<usize> {
    let removed = uow.sessions().delete_for_user(user_id)?;
    info!(%user_id, removed, "user logged out everywhere");
    Ok(removed)
}

/// Replace a user's password. Existing sessions are left alone.
pub fn change_password(uow: &UnitOfWork, user_id: Uuid, new_password: &str) -> Result<bool> {
    if new_password.chars().count() < MIN_PASSWORD_LEN {
        return Err(StoreError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    uow.users().set_password(user_id, &hash_password(new_password)?)
}

/// Operator-invoked cleanup of expired rows; nothing runs this automatically
pub fn purge_expired_sessions(uow: &UnitOfWork, now: DateTime<Utc>) -> Result<usize> {
    let removed = uow.sessions().delete_expired(now)?;
    info!(removed, "purged expired sessions");
    Ok(removed)
}
