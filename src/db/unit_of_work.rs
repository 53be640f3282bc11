//! Scoped transactional unit-of-work
//!
//! A `UnitOfWork` owns one pooled connection and one open transaction. It is
//! `Send` but not `Sync`: it can move to another thread, but cannot be shared
//! between concurrent callers. Dropping it without committing rolls the
//! transaction back and returns the connection to the pool, whatever the exit
//! path (error, panic unwind, cancelled task).

use chrono::Duration;
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, error, warn};

use super::repositories::user::UserRepository;
use super::repositories::user_session::UserSessionRepository;
use crate::error::Result;

pub struct UnitOfWork {
    conn: PooledConnection<SqliteConnectionManager>,
    session_ttl: Duration,
    finished: bool,
}

impl UnitOfWork {
    /// Open a transaction on a leased connection.
    ///
    /// `Immediate` takes the write lock up front, so writer contention waits
    /// up to busy_timeout here. `Deferred` reads from the last committed
    /// snapshot and never waits behind an open writer under WAL.
    pub(crate) fn begin(
        conn: PooledConnection<SqliteConnectionManager>,
        session_ttl: Duration,
        behavior: TransactionBehavior,
    ) -> Result<Self> {
        if !conn.is_autocommit() {
            warn!("pooled connection returned with an open transaction, rolling back");
            conn.execute_batch("ROLLBACK")?;
        }
        conn.execute_batch(begin_statement(behavior))?;
        Ok(Self {
            conn,
            session_ttl,
            finished: false,
        })
    }

    /// The underlying connection, inside the open transaction
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.conn)
    }

    pub fn sessions(&self) -> UserSessionRepository<'_> {
        UserSessionRepository::new(&self.conn, self.session_ttl)
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Commit and release the connection
    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    /// Roll back and release the connection
    pub fn rollback(mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }

    /// Release without committing
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.finished || self.conn.is_autocommit() {
            return;
        }
        match self.conn.execute_batch("ROLLBACK") {
            Ok(()) => debug!("rolled back unfinished unit of work"),
            Err(e) if self.conn.is_autocommit() => {
                warn!(error = %e, "rollback failed but no transaction remains open")
            }
            // The next begin() on this connection rolls the leftover back
            Err(e) => error!(error = %e, "failed to roll back unit of work"),
        }
    }
}

fn begin_statement(behavior: TransactionBehavior) -> &'static str {
    match behavior {
        TransactionBehavior::Deferred => "BEGIN DEFERRED",
        TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
        TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
        _ => "BEGIN IMMEDIATE",
    }
}
