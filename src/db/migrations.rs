//! Embedded SQL migration runner
//!
//! Migrations are SQL files compiled into the binary. Online mode applies the
//! pending ones to a live connection, each inside its own transaction together
//! with its row in `_authstore_migrations`. Offline mode renders the same work
//! as a SQL script without touching a database.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;

/// A single embedded migration.
pub struct Migration {
    pub name: &'static str,
    pub sql: &'static str,
}

/// All migrations in order. New migrations are appended here.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "001_users",
        sql: include_str!("migrations/001_users.sql"),
    },
    Migration {
        name: "002_user_sessions",
        sql: include_str!("migrations/002_user_sessions.sql"),
    },
];

const TRACKING_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS _authstore_migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);";

#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    /// Failed to query migration state.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),
}

/// Applies all pending migrations and returns how many ran.
///
/// # Errors
///
/// Returns `MigrationError` if any migration fails; the failing migration and
/// its tracking row are rolled back together.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    run_migrations_from_list(conn, MIGRATIONS)
}

/// Names of migrations not yet recorded in the tracking table.
pub fn pending_migrations(conn: &Connection) -> Result<Vec<&'static str>, MigrationError> {
    ensure_tracking_table(conn)?;

    let mut pending = Vec::new();
    for migration in MIGRATIONS {
        if !is_applied(conn, migration.name)? {
            pending.push(migration.name);
        }
    }
    Ok(pending)
}

/// Renders every migration as a standalone SQL script.
///
/// The script is safe to pipe into `sqlite3` against an empty database; it
/// records each migration so a later online run applies nothing.
pub fn offline_sql() -> String {
    let mut script = String::from("-- authstore schema migrations\n");
    script.push_str(TRACKING_TABLE_SQL);
    script.push('\n');

    for migration in MIGRATIONS {
        script.push_str(&format!("\n-- {}\nBEGIN;\n", migration.name));
        script.push_str(migration.sql.trim_end());
        script.push_str(&format!(
            "\nINSERT INTO _authstore_migrations (name) VALUES ('{}');\nCOMMIT;\n",
            migration.name
        ));
    }

    script
}

fn ensure_tracking_table(conn: &Connection) -> Result<(), MigrationError> {
    conn.execute_batch(TRACKING_TABLE_SQL)
        .map_err(|e| MigrationError::ExecutionFailed {
            name: "_authstore_migrations_bootstrap".to_string(),
            source: e,
        })
}

fn is_applied(conn: &Connection, name: &str) -> Result<bool, MigrationError> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM _authstore_migrations WHERE name = ?1",
        [name],
        |row| row.get(0),
    )
    .map_err(MigrationError::StateQuery)
}

fn run_migrations_from_list(
    conn: &Connection,
    migrations: &[Migration],
) -> Result<usize, MigrationError> {
    ensure_tracking_table(conn)?;

    let mut applied = 0;

    for migration in migrations {
        let failed = |e: rusqlite::Error| MigrationError::ExecutionFailed {
            name: migration.name.to_string(),
            source: e,
        };

        // Checked under the write lock so a concurrent runner sees our row
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
            .map_err(failed)?;
        if is_applied(&tx, migration.name)? {
            tracing::debug!(
                migration = migration.name,
                "migration already applied, skipping"
            );
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");

        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO _authstore_migrations (name) VALUES (?1)",
            [migration.name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        applied += 1;
    }

    Ok(applied)
}
