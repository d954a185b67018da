//! The transaction and deadline that bound a single `up` or `down` call.
//!
//! A run gets exactly one transaction. The work either returns `Ok` and the
//! transaction is committed, or anything else happens (an error, an expired
//! deadline, a cancellation, a panic) and the transaction is rolled back.

use crate::error::{DbError, Error, TxPhase};
use crate::store::AppliedRow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default wall-clock budget for one `up` or `down` call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A shared flag a caller can raise from another thread to abort a run.
///
/// Both backends observe the flag while a statement is executing, and the
/// migrator checks it between migrations and before commit.
///
/// The flag stays raised until [`reset`](CancelFlag::reset) is called: every
/// run started while it is raised fails with [`Error::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Lowers the flag so later runs can proceed.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The deadline of one run, plus the caller's cancellation flag.
#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    limit: Duration,
    cancel: CancelFlag,
}

impl Deadline {
    pub fn start(limit: Duration, cancel: CancelFlag) -> Self {
        Self {
            started: Instant::now(),
            limit,
            cancel,
        }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.limit.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.limit
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether in-flight work should be aborted right now.
    pub fn should_abort(&self) -> bool {
        self.is_cancelled() || self.is_expired()
    }

    /// Fails with [`Error::Cancelled`] or [`Error::Timeout`] if the run must stop.
    pub fn check(&self, migration: Option<&str>) -> Result<(), Error> {
        if self.is_cancelled() {
            return Err(Error::Cancelled {
                migration: migration.map(str::to_string),
            });
        }
        if self.is_expired() {
            return Err(Error::Timeout {
                migration: migration.map(str::to_string),
                limit: self.limit,
            });
        }
        Ok(())
    }

    /// Turns a failure caused by the deadline or a cancellation into
    /// [`Error::Timeout`] or [`Error::Cancelled`].
    pub(crate) fn classify(&self, err: Error) -> Error {
        if matches!(
            err,
            Error::Timeout { .. } | Error::Cancelled { .. } | Error::Catalog(_)
        ) {
            return err;
        }
        let interrupted = err.db_source().is_some_and(DbError::is_interrupt);
        if !interrupted && !self.should_abort() {
            return err;
        }
        let migration = err.migration().map(str::to_string);
        if self.is_cancelled() {
            Error::Cancelled { migration }
        } else {
            Error::Timeout {
                migration,
                limit: self.limit,
            }
        }
    }
}

/// A database connection the migrator can open transactions on.
pub trait Connection {
    /// The transaction handle threaded through every store operation and step.
    type Tx<'conn>: MigrationTransaction
    where
        Self: 'conn;

    /// Opens a transaction and arms the backend's abort mechanism for `deadline`.
    fn begin(&mut self, deadline: &Deadline) -> Result<Self::Tx<'_>, DbError>;
}

/// The operations the engine and the applied-state store need from an open transaction.
///
/// Dropping a transaction without calling [`commit`](MigrationTransaction::commit)
/// must roll it back.
pub trait MigrationTransaction {
    /// SQL that creates the tracking table if it does not exist. `table` is
    /// already quoted.
    fn tracking_table_ddl(table: &str) -> String;

    /// Runs one or more statements verbatim.
    fn run_script(&mut self, sql: &str) -> Result<(), DbError>;

    /// Runs one statement with positional text parameters (`$1`, `$2`, ...),
    /// returning the number of affected rows.
    fn execute_statement(&mut self, sql: &str, params: &[&str]) -> Result<u64, DbError>;

    /// Runs a query returning `(id, name, applied_at)` rows.
    fn query_applied(&mut self, sql: &str) -> Result<Vec<AppliedRow>, DbError>;

    /// Runs a query returning a single integer.
    fn query_count(&mut self, sql: &str) -> Result<i64, DbError>;

    fn table_exists(&mut self, table: &str) -> Result<bool, DbError>;

    /// Re-arms the in-flight abort with the deadline's remaining budget.
    /// Called before every script.
    fn arm(&mut self, _deadline: &Deadline) -> Result<(), DbError> {
        Ok(())
    }

    fn commit(self) -> Result<(), DbError>;

    fn rollback(self) -> Result<(), DbError>;
}

/// Runs `work` inside one transaction bounded by `limit`.
///
/// Commits when `work` succeeds and the deadline still holds; otherwise rolls
/// back and returns the (possibly reclassified) failure.
pub(crate) fn run_bounded<'conn, C, T, F>(
    conn: &'conn mut C,
    limit: Duration,
    cancel: &CancelFlag,
    work: F,
) -> Result<T, Error>
where
    C: Connection,
    F: FnOnce(&mut C::Tx<'conn>, &Deadline) -> Result<T, Error>,
{
    let deadline = Deadline::start(limit, cancel.clone());
    let mut tx = conn.begin(&deadline).map_err(|source| Error::Transaction {
        phase: TxPhase::Begin,
        source,
    })?;

    let outcome = work(&mut tx, &deadline).and_then(|value| {
        deadline.check(None)?;
        Ok(value)
    });

    match outcome {
        Ok(value) => {
            tx.commit().map_err(|source| {
                deadline.classify(Error::Transaction {
                    phase: TxPhase::Commit,
                    source,
                })
            })?;
            Ok(value)
        }
        Err(err) => {
            let err = deadline.classify(err);
            if let Err(_rollback_error) = tx.rollback() {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    error = %_rollback_error,
                    "Rollback failed, the transaction is discarded with the connection"
                );
            }
            Err(err)
        }
    }
}

/// Opens a transaction for read-only work and always rolls it back.
pub(crate) fn run_read_only<'conn, C, T, F>(
    conn: &'conn mut C,
    limit: Duration,
    cancel: &CancelFlag,
    work: F,
) -> Result<T, Error>
where
    C: Connection,
    F: FnOnce(&mut C::Tx<'conn>) -> Result<T, Error>,
{
    let deadline = Deadline::start(limit, cancel.clone());
    let mut tx = conn.begin(&deadline).map_err(|source| Error::Transaction {
        phase: TxPhase::Begin,
        source,
    })?;
    let outcome = work(&mut tx).map_err(|err| deadline.classify(err));
    if let Err(_rollback_error) = tx.rollback() {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            error = %_rollback_error,
            "Rollback of read-only transaction failed"
        );
    }
    outcome
}
