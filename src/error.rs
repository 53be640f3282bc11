//! Error taxonomy for the persistence layer
//!
//! Raw `rusqlite` and `r2d2` failures are classified here so callers can tell
//! data-integrity errors (never retried) from transient connectivity errors
//! (safe to retry with backoff at a higher layer).

use rusqlite::ffi;
use thiserror::Error;

use crate::config::ConfigError;
use crate::db::migrations::MigrationError;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Which database constraint rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    PrimaryKey,
    ForeignKey,
    NotNull,
    Check,
    Other,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::PrimaryKey => "primary key",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::NotNull => "not null",
            ConstraintKind::Check => "check",
            ConstraintKind::Other => "other",
        }
    }

    fn from_extended_code(code: i32) -> Self {
        match code {
            ffi::SQLITE_CONSTRAINT_UNIQUE => ConstraintKind::Unique,
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintKind::PrimaryKey,
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
            ffi::SQLITE_CONSTRAINT_NOTNULL => ConstraintKind::NotNull,
            ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Check,
            _ => ConstraintKind::Other,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Missing or malformed configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A unique / foreign-key / not-null / check constraint rejected the write.
    #[error("{} constraint violated: {message}", .kind.as_str())]
    ConstraintViolation {
        kind: ConstraintKind,
        message: String,
    },

    /// The database could not be reached or stayed locked past its timeout.
    #[error("database unavailable: {0}")]
    Connection(String),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    /// Input rejected before reaching the database
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("credential error: {0}")]
    Credentials(String),
}

impl StoreError {
    /// True for conditions a caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_))
    }

    pub fn constraint_kind(&self) -> Option<ConstraintKind> {
        match self {
            StoreError::ConstraintViolation { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &err {
            match failure.code {
                ffi::ErrorCode::ConstraintViolation => {
                    return StoreError::ConstraintViolation {
                        kind: ConstraintKind::from_extended_code(failure.extended_code),
                        message: message.clone().unwrap_or_else(|| failure.to_string()),
                    }
                }
                ffi::ErrorCode::DatabaseBusy
                | ffi::ErrorCode::DatabaseLocked
                | ffi::ErrorCode::CannotOpen
                | ffi::ErrorCode::SystemIoFailure => {
                    return StoreError::Connection(err.to_string())
                }
                _ => {}
            }
        }
        StoreError::Database(err)
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Connection(err.to_string())
    }
}
