//! # SQLite migration support
//!
//! This module provides SQLite migration support using the [`rusqlite`](https://crates.io/crates/rusqlite) crate.
//!
//! SQLite supports transactional DDL, so a failed `up` or `down` leaves the
//! database exactly as it was before the call, tracking table included.
//!
//! The run's deadline is enforced with a progress handler: once the deadline
//! passes (or the run's [`CancelFlag`](crate::CancelFlag) is raised) the
//! statement being executed is interrupted and the run fails with
//! [`Error::Timeout`](crate::Error::Timeout). The handler is removed again when
//! the transaction ends.
//!
//! ## Example
//!
//! ```
//! use schemastep::sqlite::SqliteTransaction;
//! use schemastep::{DbError, MigrationVersion, Migrator};
//! use rusqlite::Connection;
//!
//! let migrator = Migrator::new(vec![
//!     MigrationVersion::sql(
//!         "create_users",
//!         "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)",
//!         "DROP TABLE users",
//!     ),
//!     MigrationVersion::new(
//!         "seed_admin",
//!         |tx: &mut SqliteTransaction<'_>| -> Result<(), DbError> {
//!             tx.execute("INSERT INTO users (name) VALUES (?1)", ["admin"])?;
//!             Ok(())
//!         },
//!         |tx: &mut SqliteTransaction<'_>| -> Result<(), DbError> {
//!             tx.execute("DELETE FROM users WHERE name = ?1", ["admin"])?;
//!             Ok(())
//!         },
//!     ),
//! ]);
//!
//! let mut conn = Connection::open_in_memory().unwrap();
//! let report = migrator.up(&mut conn).unwrap();
//! assert_eq!(report.migrations_run, vec!["create_users", "seed_admin"]);
//! ```

use crate::core::Step;
use crate::error::DbError;
use crate::store::AppliedRow;
use crate::transaction::{Connection, Deadline, MigrationTransaction};
use rusqlite::TransactionBehavior;
use std::ops::{Deref, DerefMut};

/// Virtual machine instructions between two deadline checks.
const PROGRESS_CHECK_INTERVAL: i32 = 1_000;

/// An open SQLite migration transaction.
///
/// Dereferences to [`rusqlite::Transaction`], so code-defined steps can use the
/// full rusqlite API.
pub struct SqliteTransaction<'conn> {
    // declared first so the handler is removed before the transaction rolls back on drop
    interrupt: InterruptGuard<'conn>,
    tx: rusqlite::Transaction<'conn>,
}

/// Removes the progress handler installed for a run.
struct InterruptGuard<'conn>(&'conn rusqlite::Connection);

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.0.progress_handler(0, None::<fn() -> bool>);
    }
}

impl<'conn> Deref for SqliteTransaction<'conn> {
    type Target = rusqlite::Transaction<'conn>;

    fn deref(&self) -> &Self::Target {
        &self.tx
    }
}

impl DerefMut for SqliteTransaction<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tx
    }
}

impl Connection for rusqlite::Connection {
    type Tx<'conn> = SqliteTransaction<'conn>;

    fn begin(&mut self, deadline: &Deadline) -> Result<Self::Tx<'_>, DbError> {
        let conn: &rusqlite::Connection = self;
        let tx = rusqlite::Transaction::new_unchecked(conn, TransactionBehavior::Deferred)?;
        let watched = deadline.clone();
        conn.progress_handler(
            PROGRESS_CHECK_INTERVAL,
            Some(move || watched.should_abort()),
        );
        Ok(SqliteTransaction {
            interrupt: InterruptGuard(conn),
            tx,
        })
    }
}

impl MigrationTransaction for SqliteTransaction<'_> {
    fn tracking_table_ddl(table: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL
            )"
        )
    }

    fn run_script(&mut self, sql: &str) -> Result<(), DbError> {
        self.tx.execute_batch(sql)?;
        Ok(())
    }

    fn execute_statement(&mut self, sql: &str, params: &[&str]) -> Result<u64, DbError> {
        let changed = self
            .tx
            .execute(sql, rusqlite::params_from_iter(params.iter()))?;
        Ok(changed as u64)
    }

    fn query_applied(&mut self, sql: &str) -> Result<Vec<AppliedRow>, DbError> {
        let mut stmt = self.tx.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<AppliedRow>, _>>()?;
        Ok(rows)
    }

    fn query_count(&mut self, sql: &str) -> Result<i64, DbError> {
        Ok(self.tx.query_row(sql, [], |row| row.get(0))?)
    }

    fn table_exists(&mut self, table: &str) -> Result<bool, DbError> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn commit(self) -> Result<(), DbError> {
        let SqliteTransaction { interrupt, tx } = self;
        drop(interrupt);
        tx.commit()?;
        Ok(())
    }

    fn rollback(self) -> Result<(), DbError> {
        let SqliteTransaction { interrupt, tx } = self;
        drop(interrupt);
        tx.rollback()?;
        Ok(())
    }
}

impl<F> Step<rusqlite::Connection> for F
where
    F: Fn(&mut SqliteTransaction<'_>) -> Result<(), DbError> + Send + Sync,
{
    fn run(&self, tx: &mut SqliteTransaction<'_>) -> Result<(), DbError> {
        self(tx)
    }
}
