//! Database connection management
//!
//! `Database` owns the process-wide connection pool. It is built once at
//! startup from `Config`, passed explicitly to whoever needs it, and hands out
//! one `UnitOfWork` per operation.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{OpenFlags, TransactionBehavior};
use tracing::{info, trace, warn};

use super::migrations::{pending_migrations, run_migrations};
use super::schema::{verify_schema, SchemaDrift};
use super::unit_of_work::UnitOfWork;
use crate::config::{Config, DatabaseUrl};
use crate::error::{Result, StoreError};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    url: DatabaseUrl,
    session_ttl: chrono::Duration,
}

impl Database {
    /// Open the pool described by `config`.
    ///
    /// The connection string is validated before anything touches the
    /// filesystem or network, so a missing or malformed `DATABASE_URL` fails
    /// with `StoreError::Config` and no connection attempt.
    pub fn initialize(config: &Config) -> Result<Self> {
        config.validate()?;
        let url = config.database_url()?;

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let (manager, max_size) = match &url {
            DatabaseUrl::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::Connection(format!("cannot create {:?}: {}", parent, e))
                    })?;
                }
                (SqliteConnectionManager::file(path), config.pool_max_size)
            }
            // Every in-memory connection is its own database
            DatabaseUrl::Memory => (SqliteConnectionManager::memory(), 1),
        };

        let busy_timeout_ms = config.busy_timeout_ms;
        let log_statements = config.log_statements;
        let manager = manager.with_flags(flags).with_init(move |conn| {
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {}",
                        journal_mode
                    )),
                ));
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {};",
                busy_timeout_ms
            ))?;
            if log_statements {
                conn.trace(Some(trace_statement));
            }
            Ok(())
        });

        let mut builder = Pool::builder()
            .max_size(max_size)
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms));
        if url == DatabaseUrl::Memory {
            // Recycling the only connection would silently drop the database
            builder = builder.max_lifetime(None).idle_timeout(None);
        }

        let pool = builder
            .build(manager)
            .map_err(|e| {
                warn!(database = %url, error = %e, "database connection failed");
                StoreError::from(e)
            })?;

        let db = Self {
            pool,
            url,
            session_ttl: config.session_ttl(),
        };
        db.health_check()?;

        info!(database = %db.url, pool_size = max_size, "database connected");
        Ok(db)
    }

    /// Lease a connection and open a write transaction on it
    pub fn unit_of_work(&self) -> Result<UnitOfWork> {
        let conn = self.pool.get()?;
        UnitOfWork::begin(conn, self.session_ttl, TransactionBehavior::Immediate)
    }

    /// Lease a connection for reads. Does not wait behind open writers.
    pub fn read_unit_of_work(&self) -> Result<UnitOfWork> {
        let conn = self.pool.get()?;
        UnitOfWork::begin(conn, self.session_ttl, TransactionBehavior::Deferred)
    }

    /// Run `f` in a fresh unit-of-work: commit on `Ok`, roll back on `Err`
    pub fn with_unit_of_work<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&UnitOfWork) -> Result<T>,
    {
        Self::finish(self.unit_of_work()?, f)
    }

    /// `with_unit_of_work` on a read unit-of-work
    pub fn with_read_unit_of_work<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&UnitOfWork) -> Result<T>,
    {
        Self::finish(self.read_unit_of_work()?, f)
    }

    fn finish<T, F>(uow: UnitOfWork, f: F) -> Result<T>
    where
        F: FnOnce(&UnitOfWork) -> Result<T>,
    {
        match f(&uow) {
            Ok(value) => {
                uow.commit()?;
                Ok(value)
            }
            Err(e) => {
                uow.close();
                Err(e)
            }
        }
    }

    /// `with_unit_of_work` on the Tokio blocking pool, for async callers
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&UnitOfWork) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        match tokio::task::spawn_blocking(move || db.with_unit_of_work(f)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(StoreError::Connection(format!("unit of work cancelled: {e}"))),
        }
    }

    /// Release a unit-of-work without committing
    pub fn close(&self, uow: UnitOfWork) {
        uow.close();
    }

    /// Apply pending migrations (online mode)
    pub fn migrate(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let applied = run_migrations(&conn)?;
        info!(applied, "migrations complete");
        Ok(applied)
    }

    pub fn pending_migrations(&self) -> Result<Vec<&'static str>> {
        let conn = self.pool.get()?;
        Ok(pending_migrations(&conn)?)
    }

    /// Differences between the live schema and the table metadata
    pub fn verify_schema(&self) -> Result<Vec<SchemaDrift>> {
        let conn = self.pool.get()?;
        Ok(verify_schema(&conn)?)
    }

    /// Check if the database answers (for health checks)
    pub fn health_check(&self) -> Result<()> {
        let conn = self.pool.get()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }

    /// Connections currently idle in the pool
    pub fn idle_connections(&self) -> u32 {
        self.pool.state().idle_connections
    }

    pub fn url(&self) -> &DatabaseUrl {
        &self.url
    }

    /// Tear down the pool. Outstanding clones keep it alive until dropped.
    pub fn shutdown(self) {
        info!(database = %self.url, "closing database");
    }
}

fn trace_statement(sql: &str) {
    trace!(target: "authstore::sql", sql, "statement");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn test_initialize_without_url_fails_fast() {
        let err = Database::initialize(&Config::default())
            .err()
            .expect("initialize should fail");
        assert!(matches!(
            err,
            StoreError::Config(ConfigError::MissingDatabaseUrl)
        ));
    }

    #[test]
    fn test_in_memory_pool() {
        let db = Database::initialize(&Config::with_database_url("sqlite::memory:"))
            .expect("pool creation should succeed");
        assert_eq!(db.url(), &DatabaseUrl::Memory);

        let uow = db.unit_of_work().expect("should lease a connection");
        let fk: i32 = uow
            .connection()
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1, "foreign keys should be enabled");
    }

    #[test]
    fn test_in_memory_pool_never_recycles_its_connection() {
        let db = Database::initialize(&Config::with_database_url("sqlite::memory:"))
            .expect("pool creation should succeed");
        assert_eq!(db.pool.max_size(), 1);
        assert_eq!(db.pool.max_lifetime(), None);
        assert_eq!(db.pool.idle_timeout(), None);
    }

    #[test]
    fn test_file_pool_keeps_default_recycling() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("pool.db").display());
        let db = Database::initialize(&Config::with_database_url(url)).unwrap();
        assert!(db.pool.max_lifetime().is_some());
    }

    #[test]
    fn test_leftover_transaction_is_cleared_on_begin() {
        let db = Database::initialize(&Config::with_database_url("sqlite::memory:")).unwrap();

        let conn = db.pool.get().unwrap();
        conn.execute_batch("BEGIN").unwrap();
        drop(conn);

        let uow = db.unit_of_work().expect("begin should recover the connection");
        uow.commit().unwrap();
    }

    #[test]
    fn test_failed_rollback_leaves_connection_usable() {
        let db = Database::initialize(&Config::with_database_url("sqlite::memory:")).unwrap();

        let uow = db.unit_of_work().unwrap();
        uow.connection().execute_batch("COMMIT").unwrap();
        assert!(uow.rollback().is_err(), "no transaction is left to roll back");

        let uow = db.unit_of_work().expect("connection should return to the pool");
        uow.commit().unwrap();
    }
}
