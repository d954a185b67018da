use crate::error::{DbError, Direction, Error, SetupPhase};
use crate::transaction::MigrationTransaction;
use chrono::{DateTime, Utc};

/// Default name of the tracking table.
pub const DEFAULT_TRACKING_TABLE_NAME: &str = "migrations";

/// A raw `(id, name, applied_at)` row as read from the tracking table.
pub type AppliedRow = (i64, String, String);

/// Represents a migration that is currently applied to the database.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedRecord {
    /// Surrogate key, increasing in insertion order.
    pub id: i64,
    /// The name of the migration.
    pub name: String,
    /// The timestamp when the migration was applied.
    pub applied_at: DateTime<Utc>,
}

impl TryFrom<AppliedRow> for AppliedRecord {
    type Error = DbError;

    fn try_from((id, name, applied_at): AppliedRow) -> Result<Self, Self::Error> {
        let applied_at = DateTime::parse_from_rfc3339(&applied_at)
            .map_err(|e| {
                DbError::Generic(format!(
                    "Failed to parse applied_at '{applied_at}' of migration '{name}': {e}"
                ))
            })?
            .with_timezone(&Utc);
        Ok(Self {
            id,
            name,
            applied_at,
        })
    }
}

/// Access to the tracking table that records which migrations are applied.
///
/// Every operation runs on the transaction it is handed; the store holds no
/// connection state of its own.
///
/// The table name is always quoted in SQL, so PostgreSQL keeps its case and
/// the catalog lookup in `table_exists` matches what was created.
#[derive(Debug, Clone)]
pub(crate) struct AppliedStore<'a> {
    table: &'a str,
    ident: String,
}

impl<'a> AppliedStore<'a> {
    pub fn new(table: &'a str) -> Self {
        Self {
            table,
            ident: format!("\"{table}\""),
        }
    }

    pub fn table_exists<T: MigrationTransaction>(&self, tx: &mut T) -> Result<bool, Error> {
        tx.table_exists(self.table)
            .map_err(|source| Error::Setup {
                phase: SetupPhase::Read,
                source,
            })
    }

    /// Creates the tracking table if it is absent. Returns whether it already existed.
    pub fn ensure_table_exists<T: MigrationTransaction>(&self, tx: &mut T) -> Result<bool, Error> {
        let existed = self.table_exists(tx)?;
        if !existed {
            #[cfg(feature = "tracing")]
            tracing::info!(table = self.table, "Creating migration tracking table");
        }
        tx.run_script(&T::tracking_table_ddl(&self.ident))
            .map_err(|source| Error::Setup {
                phase: SetupPhase::Create,
                source,
            })?;
        Ok(existed)
    }

    /// Applied records ordered by name. Empty when the table does not exist.
    pub fn list_applied<T: MigrationTransaction>(
        &self,
        tx: &mut T,
    ) -> Result<Vec<AppliedRecord>, Error> {
        if !self.table_exists(tx)? {
            return Ok(vec![]);
        }
        let read_error = |source| Error::Setup {
            phase: SetupPhase::Read,
            source,
        };
        tx.query_applied(&format!(
            "SELECT id, name, applied_at FROM {} ORDER BY name ASC",
            self.ident
        ))
        .map_err(read_error)?
        .into_iter()
        .map(|row| AppliedRecord::try_from(row).map_err(read_error))
        .collect()
    }

    pub fn record_applied<T: MigrationTransaction>(
        &self,
        tx: &mut T,
        name: &str,
    ) -> Result<(), Error> {
        let applied_at = Utc::now().to_rfc3339();
        tx.execute_statement(
            &format!(
                "INSERT INTO {} (name, applied_at) VALUES ($1, $2)",
                self.ident
            ),
            &[name, &applied_at],
        )
        .map_err(|source| Error::StoreWrite {
            name: name.to_string(),
            direction: Direction::Up,
            source,
        })?;
        Ok(())
    }

    pub fn record_reverted<T: MigrationTransaction>(
        &self,
        tx: &mut T,
        name: &str,
    ) -> Result<(), Error> {
        let deleted = tx
            .execute_statement(
                &format!("DELETE FROM {} WHERE name = $1", self.ident),
                &[name],
            )
            .map_err(|source| Error::StoreWrite {
                name: name.to_string(),
                direction: Direction::Down,
                source,
            })?;
        if deleted == 0 {
            #[cfg(feature = "tracing")]
            tracing::debug!(name, "No applied record to delete");
        }
        Ok(())
    }

    /// Drops the tracking table when no records remain. Returns whether it was dropped.
    pub fn drop_table_if_empty<T: MigrationTransaction>(&self, tx: &mut T) -> Result<bool, Error> {
        if !self.table_exists(tx)? {
            return Ok(false);
        }
        let remaining = tx
            .query_count(&format!("SELECT COUNT(*) FROM {}", self.ident))
            .map_err(|source| Error::Setup {
                phase: SetupPhase::Read,
                source,
            })?;
        if remaining > 0 {
            return Ok(false);
        }
        tx.run_script(&format!("DROP TABLE IF EXISTS {}", self.ident))
            .map_err(|source| Error::Setup {
                phase: SetupPhase::Drop,
                source,
            })?;
        #[cfg(feature = "tracing")]
        tracing::info!(table = self.table, "Dropped empty migration tracking table");
        Ok(true)
    }
}

/// Whether `name` can be interpolated into SQL as a table identifier.
pub(crate) fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
