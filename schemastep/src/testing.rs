//! Testing utilities for migration development.
//!
//! [ProbeStep] is a step that records every execution into a shared
//! [ExecutionLog], which makes the order (and absence) of script runs
//! observable from a test. A probe can also run SQL, fail, or stall to
//! exercise rollback and deadline behavior.
//!
//! ```
//! # #[cfg(not(all(feature = "sqlite", feature = "testing")))]
//! # fn main() {}
//! # #[cfg(all(feature = "sqlite", feature = "testing"))]
//! # fn main() {
//! use schemastep::testing::{ExecutionLog, ProbeStep};
//! use schemastep::{MigrationVersion, Migrator};
//!
//! let log = ExecutionLog::new();
//! let migrator = Migrator::new(vec![MigrationVersion::new(
//!     "create_users",
//!     ProbeStep::new(&log, "up").with_sql("CREATE TABLE users (id INTEGER PRIMARY KEY)"),
//!     ProbeStep::new(&log, "down").with_sql("DROP TABLE users"),
//! )]);
//!
//! let mut conn = rusqlite::Connection::open_in_memory().unwrap();
//! migrator.up(&mut conn).unwrap();
//! migrator.up(&mut conn).unwrap();
//! assert_eq!(log.entries(), vec!["up"]);
//! # }
//! ```

use crate::core::{Sql, Step};
use crate::error::DbError;
use crate::transaction::{Connection, MigrationTransaction};
use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A shared, append-only record of probe executions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog(Arc<Mutex<Vec<String>>>);

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, label: impl Into<String>) {
        self.lock().push(label.into());
    }

    /// Labels recorded so far, oldest first.
    pub fn entries(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        // a probe that panicked mid-record leaves a usable log behind
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A step that records its label, then optionally stalls, runs SQL, or fails.
#[derive(Debug, Clone)]
pub struct ProbeStep {
    log: ExecutionLog,
    label: String,
    sql: Option<Sql>,
    stall: Option<Duration>,
    failure: Option<String>,
}

impl ProbeStep {
    pub fn new(log: &ExecutionLog, label: impl Into<String>) -> Self {
        Self {
            log: log.clone(),
            label: label.into(),
            sql: None,
            stall: None,
            failure: None,
        }
    }

    /// Runs `sql` after recording.
    pub fn with_sql(mut self, sql: impl Into<Cow<'static, str>>) -> Self {
        self.sql = Some(Sql::new(sql));
        self
    }

    /// Sleeps for `duration` after recording, before anything else.
    pub fn stalling(mut self, duration: Duration) -> Self {
        self.stall = Some(duration);
        self
    }

    /// Fails with `message` instead of running its SQL.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

impl<C: Connection> Step<C> for ProbeStep {
    fn run(&self, tx: &mut C::Tx<'_>) -> Result<(), DbError> {
        self.log.record(self.label.as_str());
        if let Some(duration) = self.stall {
            std::thread::sleep(duration);
        }
        if let Some(ref message) = self.failure {
            return Err(DbError::Generic(message.clone()));
        }
        match self.sql {
            Some(ref sql) => tx.run_script(sql.as_str()),
            None => Ok(()),
        }
    }
}
