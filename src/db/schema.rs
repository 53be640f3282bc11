//! Table metadata for `users` and `user_sessions`
//!
//! The migration SQL creates the tables; this module describes what they are
//! supposed to look like so the live database can be introspected and
//! compared against it (`verify_schema`).

use std::collections::HashSet;
use std::fmt;

use rusqlite::Connection;

/// Logical column type. Every type is stored as SQLite `TEXT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Hyphenated UUID text
    Uuid,
    Text,
    /// Fixed-width RFC 3339 UTC, microsecond precision
    Timestamp,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Uuid | ColumnType::Text | ColumnType::Timestamp => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    NoAction,
    Cascade,
}

impl OnDelete {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnDelete::NoAction => "NO ACTION",
            OnDelete::Cascade => "CASCADE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub references: Option<ForeignKey>,
}

impl Column {
    const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            unique: false,
            primary_key: false,
            references: None,
        }
    }

    const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    const fn references(mut self, table: &'static str, column: &'static str, on_delete: OnDelete) -> Self {
        self.references = Some(ForeignKey {
            table,
            column,
            on_delete,
        });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }
}

pub const USERS: Table = Table {
    name: "users",
    columns: &[
        Column::new("user_id", ColumnType::Uuid).primary_key(),
        Column::new("user_image", ColumnType::Text),
        Column::new("user_name", ColumnType::Text).unique(),
        Column::new("first_name", ColumnType::Text),
        Column::new("last_name", ColumnType::Text),
        Column::new("email_address", ColumnType::Text),
        Column::new("password", ColumnType::Text),
        Column::new("last_updated", ColumnType::Timestamp),
    ],
};

pub const USER_SESSIONS: Table = Table {
    name: "user_sessions",
    columns: &[
        Column::new("session_id", ColumnType::Uuid).primary_key(),
        Column::new("user_id", ColumnType::Uuid)
            .nullable()
            .references("users", "user_id", OnDelete::Cascade),
        Column::new("start_time", ColumnType::Timestamp),
        Column::new("expiration_time", ColumnType::Timestamp),
    ],
};

/// All tables, in creation order
pub const TABLES: &[Table] = &[USERS, USER_SESSIONS];

/// One difference between the live database and `TABLES`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDrift {
    MissingTable(&'static str),
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },
    UnexpectedColumn {
        table: &'static str,
        column: String,
    },
    TypeMismatch {
        table: &'static str,
        column: &'static str,
        actual: String,
    },
    Nullability {
        table: &'static str,
        column: &'static str,
        expected_nullable: bool,
    },
    PrimaryKey {
        table: &'static str,
        column: &'static str,
        expected: bool,
    },
    Unique {
        table: &'static str,
        column: &'static str,
        expected: bool,
    },
    ForeignKey {
        table: &'static str,
        column: &'static str,
        detail: String,
    },
}

impl fmt::Display for SchemaDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaDrift::MissingTable(table) => write!(f, "table {table} is missing"),
            SchemaDrift::MissingColumn { table, column } => {
                write!(f, "{table}.{column} is missing")
            }
            SchemaDrift::UnexpectedColumn { table, column } => {
                write!(f, "{table}.{column} is not declared")
            }
            SchemaDrift::TypeMismatch { table, column, actual } => {
                write!(f, "{table}.{column} has type {actual}")
            }
            SchemaDrift::Nullability {
                table,
                column,
                expected_nullable,
            } => {
                let expected = if *expected_nullable { "NULL" } else { "NOT NULL" };
                write!(f, "{table}.{column} should be {expected}")
            }
            SchemaDrift::PrimaryKey {
                table,
                column,
                expected,
            } => write!(f, "{table}.{column} primary key should be {expected}"),
            SchemaDrift::Unique {
                table,
                column,
                expected,
            } => write!(f, "{table}.{column} unique should be {expected}"),
            SchemaDrift::ForeignKey {
                table,
                column,
                detail,
            } => write!(f, "{table}.{column} foreign key: {detail}"),
        }
    }
}

struct LiveColumn {
    name: String,
    ty: String,
    not_null: bool,
    primary_key: bool,
}

struct LiveForeignKey {
    table: String,
    from: String,
    to: String,
    on_delete: String,
}

/// Compare the live schema against `TABLES`
pub fn verify_schema(conn: &Connection) -> rusqlite::Result<Vec<SchemaDrift>> {
    let mut drift = Vec::new();
    for table in TABLES {
        verify_table(conn, table, &mut drift)?;
    }
    Ok(drift)
}

fn verify_table(
    conn: &Connection,
    table: &Table,
    drift: &mut Vec<SchemaDrift>,
) -> rusqlite::Result<()> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table.name],
        |row| row.get(0),
    )?;
    if !exists {
        drift.push(SchemaDrift::MissingTable(table.name));
        return Ok(());
    }

    let live_columns = live_columns(conn, table.name)?;
    let unique_columns = live_unique_columns(conn, table.name)?;
    let foreign_keys = live_foreign_keys(conn, table.name)?;

    for live in &live_columns {
        if table.column(&live.name).is_none() {
            drift.push(SchemaDrift::UnexpectedColumn {
                table: table.name,
                column: live.name.clone(),
            });
        }
    }

    for column in table.columns {
        let Some(live) = live_columns.iter().find(|c| c.name == column.name) else {
            drift.push(SchemaDrift::MissingColumn {
                table: table.name,
                column: column.name,
            });
            continue;
        };

        if !live.ty.eq_ignore_ascii_case(column.ty.sql_type()) {
            drift.push(SchemaDrift::TypeMismatch {
                table: table.name,
                column: column.name,
                actual: live.ty.clone(),
            });
        }

        if live.not_null == column.nullable {
            drift.push(SchemaDrift::Nullability {
                table: table.name,
                column: column.name,
                expected_nullable: column.nullable,
            });
        }

        if live.primary_key != column.primary_key {
            drift.push(SchemaDrift::PrimaryKey {
                table: table.name,
                column: column.name,
                expected: column.primary_key,
            });
        }

        let live_unique = unique_columns.contains(column.name);
        if live_unique != column.unique {
            drift.push(SchemaDrift::Unique {
                table: table.name,
                column: column.name,
                expected: column.unique,
            });
        }

        let live_fk = foreign_keys.iter().find(|fk| fk.from == column.name);
        match (column.references, live_fk) {
            (None, None) => {}
            (Some(expected), None) => drift.push(SchemaDrift::ForeignKey {
                table: table.name,
                column: column.name,
                detail: format!("missing reference to {}.{}", expected.table, expected.column),
            }),
            (None, Some(live)) => drift.push(SchemaDrift::ForeignKey {
                table: table.name,
                column: column.name,
                detail: format!("undeclared reference to {}.{}", live.table, live.to),
            }),
            (Some(expected), Some(live)) => {
                if live.table != expected.table
                    || live.to != expected.column
                    || !live.on_delete.eq_ignore_ascii_case(expected.on_delete.as_str())
                {
                    drift.push(SchemaDrift::ForeignKey {
                        table: table.name,
                        column: column.name,
                        detail: format!(
                            "references {}.{} on delete {}, expected {}.{} on delete {}",
                            live.table,
                            live.to,
                            live.on_delete,
                            expected.table,
                            expected.column,
                            expected.on_delete.as_str()
                        ),
                    });
                }
            }
        }
    }

    Ok(())
}

fn live_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<LiveColumn>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(LiveColumn {
                name: row.get(1)?,
                ty: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                primary_key: row.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Columns covered by a single-column unique index (primary keys excluded)
fn live_unique_columns(conn: &Connection, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({table})"))?;
    let indexes = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)? != 0,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut unique = HashSet::new();
    for (index, is_unique, origin) in indexes {
        if !is_unique || origin == "pk" {
            continue;
        }
        let mut info = conn.prepare(&format!("PRAGMA index_info('{index}')"))?;
        let columns = info
            .query_map([], |row| row.get::<_, String>(2))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if let [column] = columns.as_slice() {
            unique.insert(column.clone());
        }
    }
    Ok(unique)
}

fn live_foreign_keys(conn: &Connection, table: &str) -> rusqlite::Result<Vec<LiveForeignKey>> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({table})"))?;
    let keys = stmt
        .query_map([], |row| {
            Ok(LiveForeignKey {
                table: row.get(2)?,
                from: row.get(3)?,
                to: row.get(4)?,
                on_delete: row.get(6)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}
