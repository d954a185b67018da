use std::fmt;
use std::time::Duration;

/// Which way a migration run moves the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Forward scripts, recording each migration as applied.
    Up,
    /// Backward scripts, removing each migration's applied record.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("forward"),
            Direction::Down => f.write_str("backward"),
        }
    }
}

/// The tracking-table operation that failed in an [`Error::Setup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    Create,
    Read,
    Drop,
}

impl fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupPhase::Create => f.write_str("create"),
            SetupPhase::Read => f.write_str("read"),
            SetupPhase::Drop => f.write_str("drop"),
        }
    }
}

/// The transaction boundary that failed in an [`Error::Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPhase {
    Begin,
    Commit,
}

impl fmt::Display for TxPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxPhase::Begin => f.write_str("begin"),
            TxPhase::Commit => f.write_str("commit"),
        }
    }
}

/// An error raised by the database driver, or by a code-defined migration step.
#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[cfg(feature = "sqlite")]
    #[error("{0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[cfg(feature = "postgres")]
    #[error("{0}")]
    Postgres(#[from] postgres::Error),
    #[error("{0}")]
    Generic(String),
}

impl DbError {
    /// Whether the driver aborted the statement because of an interrupt or a
    /// statement timeout, rather than because the SQL itself failed.
    pub fn is_interrupt(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            DbError::Rusqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::OperationInterrupted
            }
            #[cfg(feature = "postgres")]
            DbError::Postgres(err) => {
                err.code() == Some(&postgres::error::SqlState::QUERY_CANCELED)
            }
            _ => false,
        }
    }
}

impl From<String> for DbError {
    fn from(value: String) -> Self {
        Self::Generic(value)
    }
}

impl From<&str> for DbError {
    fn from(value: &str) -> Self {
        Self::Generic(value.to_string())
    }
}

/// Error type for the schemastep crate.
///
/// Every variant aborts the current `up` or `down` call, and the enclosing
/// transaction is rolled back before the error reaches the caller.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The catalog or migrator configuration is invalid.
    #[error("invalid migration catalog: {0}")]
    Catalog(String),

    /// The tracking table could not be created, read or dropped.
    #[error("failed to {phase} tracking table: {source}")]
    Setup {
        phase: SetupPhase,
        #[source]
        source: DbError,
    },

    /// A forward or backward script returned an error.
    #[error("{direction} script of migration '{name}' failed: {source}")]
    Script {
        name: String,
        direction: Direction,
        #[source]
        source: DbError,
    },

    /// Inserting or deleting an applied record failed.
    #[error("failed to {} applied record of migration '{name}': {source}", store_verb(.direction))]
    StoreWrite {
        name: String,
        direction: Direction,
        #[source]
        source: DbError,
    },

    /// The run did not finish within its deadline.
    #[error("migration run exceeded its {limit:?} deadline{}", in_migration(.migration))]
    Timeout {
        migration: Option<String>,
        limit: Duration,
    },

    /// The caller cancelled the run.
    #[error("migration run was cancelled{}", in_migration(.migration))]
    Cancelled { migration: Option<String> },

    /// The enclosing transaction could not be opened or committed.
    #[error("failed to {phase} migration transaction: {source}")]
    Transaction {
        phase: TxPhase,
        #[source]
        source: DbError,
    },
}

fn store_verb(direction: &Direction) -> &'static str {
    match direction {
        Direction::Up => "insert",
        Direction::Down => "delete",
    }
}

fn in_migration(migration: &Option<String>) -> String {
    match migration {
        Some(name) => format!(" while running migration '{name}'"),
        None => String::new(),
    }
}

impl Error {
    /// Name of the migration that was running when the error occurred, if any.
    pub fn migration(&self) -> Option<&str> {
        match self {
            Error::Script { name, .. } | Error::StoreWrite { name, .. } => Some(name),
            Error::Timeout { migration, .. } | Error::Cancelled { migration } => {
                migration.as_deref()
            }
            Error::Catalog(_) | Error::Setup { .. } | Error::Transaction { .. } => None,
        }
    }

    /// Whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub(crate) fn db_source(&self) -> Option<&DbError> {
        match self {
            Error::Setup { source, .. }
            | Error::Script { source, .. }
            | Error::StoreWrite { source, .. }
            | Error::Transaction { source, .. } => Some(source),
            Error::Catalog(_) | Error::Timeout { .. } | Error::Cancelled { .. } => None,
        }
    }
}
