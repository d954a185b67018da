#![cfg_attr(docsrs, feature(doc_cfg))]
//! `schemastep` applies and reverts an ordered catalog of named schema migrations.
//!
//! Core concepts:
//! - A [Catalog] is an ordered list of [MigrationVersion]s, each a unique name plus a forward and a backward [Step].
//! - A tracking table in the target database records which names are applied.
//! - [Migrator::up] applies every catalog entry missing from the tracking table; [Migrator::down] reverts every entry present in it.
//!
//! # Guarantees
//!
//! ## One transaction per call
//!
//! Every `up` or `down` call runs inside exactly one transaction. The call either
//! completes every script it needs to run and commits, or fails and leaves the
//! database as it was before the call. This includes the creation (on `up`) or
//! removal (on `down`) of the tracking table itself.
//!
//! ## Bounded time
//!
//! A call is bounded by a wall-clock deadline, five seconds unless configured
//! with [Migrator::with_timeout]. A statement still running when the deadline
//! passes is interrupted, and the call fails with [Error::Timeout] after rolling back.
//! A [CancelFlag] lets another thread abort a call the same way.
//!
//! ## Idempotence
//!
//! Running `up` twice in a row executes no scripts the second time. Running
//! `down` after `down` does the same.
//!
//! # Migrations as code
//!
//! Steps are usually plain SQL ([MigrationVersion::sql]), but each backend also
//! accepts closures over its transaction type, so a migration can query data,
//! transform it in Rust, and write it back:
//!
//! ```
//! # #[cfg(not(feature = "sqlite"))]
//! # fn main() {}
//! # #[cfg(feature = "sqlite")]
//! # fn main() {
//! use schemastep::sqlite::SqliteTransaction;
//! use schemastep::{DbError, MigrationVersion, Migrator};
//!
//! let migrator = Migrator::new(vec![
//!     MigrationVersion::sql(
//!         "create_users",
//!         "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL)",
//!         "DROP TABLE users",
//!     ),
//!     MigrationVersion::new(
//!         "lowercase_emails",
//!         |tx: &mut SqliteTransaction<'_>| -> Result<(), DbError> {
//!             let rows: Vec<(i64, String)> = tx
//!                 .prepare("SELECT id, email FROM users")?
//!                 .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
//!                 .collect::<Result<_, _>>()?;
//!             for (id, email) in rows {
//!                 tx.execute(
//!                     "UPDATE users SET email = ?1 WHERE id = ?2",
//!                     rusqlite::params![email.to_lowercase(), id],
//!                 )?;
//!             }
//!             Ok(())
//!         },
//!         |_tx: &mut SqliteTransaction<'_>| -> Result<(), DbError> { Ok(()) },
//!     ),
//! ]);
//!
//! let mut conn = rusqlite::Connection::open_in_memory().unwrap();
//! let report = migrator.up(&mut conn).unwrap();
//! assert_eq!(report.migrations_run, vec!["create_users", "lowercase_emails"]);
//!
//! let report = migrator.up(&mut conn).unwrap();
//! assert!(report.migrations_run.is_empty());
//! # }
//! ```
//!
//! # Features
//! - Observability hooks ([Migrator::on_migration_start] and friends).
//! - Tracing integration - available with the `tracing` feature flag.
//! - Testing utilities - available with the `testing` feature flag.
//!
//! # Database support
//!
//! - [`SQLite`](sqlite) - available with the `sqlite` feature flag.
//! - [`PostgreSQL`](postgres) - available with the `postgres` feature flag.

mod core;
pub use core::{Catalog, MigrationVersion, Sql, Step};

mod error;
pub use error::{DbError, Direction, Error, SetupPhase, TxPhase};

mod store;
pub use store::{AppliedRecord, AppliedRow, DEFAULT_TRACKING_TABLE_NAME};

mod transaction;
pub use transaction::{CancelFlag, Connection, Deadline, MigrationTransaction, DEFAULT_TIMEOUT};

mod migrator;
pub use migrator::{MigrationReport, Migrator};

#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite;

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

#[cfg(all(test, feature = "postgres"))]
pub(crate) mod test_postgres;
