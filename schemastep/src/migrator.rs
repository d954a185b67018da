use crate::core::{Catalog, MigrationVersion, Step};
use crate::error::{Direction, Error};
use crate::store::{
    is_valid_table_name, AppliedRecord, AppliedStore, DEFAULT_TRACKING_TABLE_NAME,
};
use crate::transaction::{
    run_bounded, run_read_only, CancelFlag, Connection, Deadline, MigrationTransaction,
    DEFAULT_TIMEOUT,
};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// A report of actions performed during a successful `up` or `down` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub direction: Direction,
    pub tracking_table_existed: bool,
    pub tracking_table_created: bool,
    pub tracking_table_dropped: bool,
    /// Names of the migrations whose scripts ran, in execution order.
    pub migrations_run: Vec<String>,
    /// Names of the catalog entries that needed no work.
    pub migrations_skipped: Vec<String>,
    /// Applied records with no catalog entry. They are never touched.
    pub orphaned: Vec<String>,
}

impl MigrationReport {
    fn new(direction: Direction, tracking_table_existed: bool) -> Self {
        Self {
            direction,
            tracking_table_existed,
            tracking_table_created: false,
            tracking_table_dropped: false,
            migrations_run: vec![],
            migrations_skipped: vec![],
            orphaned: vec![],
        }
    }
}

type StartHook = Box<dyn Fn(&str, Direction) + Send + Sync>;
type CompleteHook = Box<dyn Fn(&str, Direction, Duration) + Send + Sync>;
type SkippedHook = Box<dyn Fn(&str, Direction) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&str, Direction, &Error) + Send + Sync>;

/// The entrypoint for applying and reverting a [Catalog] of migrations.
///
/// `up` applies every catalog entry that is not yet recorded in the tracking
/// table; `down` reverts every entry that is. Both walk the catalog in
/// declaration order and run inside a single transaction bounded by a deadline
/// (five seconds unless configured with [`with_timeout`](Migrator::with_timeout)):
/// a call either completes entirely or leaves the database untouched.
///
/// `down` runs backward scripts in the same order `up` runs forward scripts,
/// not in reverse. Catalogs whose migrations depend on each other (a foreign
/// key onto a table created by an earlier entry, for example) must make their
/// backward scripts tolerate that order.
///
/// A migrator assumes it is the only one working on its tracking table; it
/// takes no lock, so concurrent calls against the same database are not supported.
pub struct Migrator<C: Connection> {
    catalog: Catalog<C>,
    tracking_table_name: String,
    timeout: Duration,
    cancel: CancelFlag,
    on_migration_start: Option<StartHook>,
    on_migration_complete: Option<CompleteHook>,
    on_migration_skipped: Option<SkippedHook>,
    on_migration_error: Option<ErrorHook>,
}

// Manual Debug impl since closures don't implement Debug
impl<C: Connection> std::fmt::Debug for Migrator<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("catalog", &self.catalog)
            .field("tracking_table_name", &self.tracking_table_name)
            .field("timeout", &self.timeout)
            .field("on_migration_start", &self.on_migration_start.is_some())
            .field(
                "on_migration_complete",
                &self.on_migration_complete.is_some(),
            )
            .field("on_migration_skipped", &self.on_migration_skipped.is_some())
            .field("on_migration_error", &self.on_migration_error.is_some())
            .finish()
    }
}

impl<C: Connection> Migrator<C> {
    /// Create a new Migrator, validating the catalog.
    /// Returns an error if two migrations share a name or a name is empty.
    pub fn try_new(versions: Vec<MigrationVersion<C>>) -> Result<Self, Error> {
        Ok(Self {
            catalog: Catalog::try_new(versions)?,
            tracking_table_name: DEFAULT_TRACKING_TABLE_NAME.to_string(),
            timeout: DEFAULT_TIMEOUT,
            cancel: CancelFlag::new(),
            on_migration_start: None,
            on_migration_complete: None,
            on_migration_skipped: None,
            on_migration_error: None,
        })
    }

    /// Create a new Migrator, panicking if the catalog is invalid.
    /// For a non-panicking version, use `try_new`.
    pub fn new(versions: Vec<MigrationVersion<C>>) -> Self {
        match Self::try_new(versions) {
            Ok(migrator) => migrator,
            Err(err) => panic!("{}", err),
        }
    }

    /// Set a custom name for the tracking table. Defaults to "migrations".
    ///
    /// The name is interpolated into SQL, so only ASCII letters, digits and
    /// underscores are accepted, and it may not start with a digit.
    pub fn with_tracking_table_name(mut self, name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if !is_valid_table_name(&name) {
            return Err(Error::Catalog(format!(
                "Invalid tracking table name '{name}'"
            )));
        }
        self.tracking_table_name = name;
        Ok(self)
    }

    /// Set the wall-clock budget of a whole `up` or `down` call. Defaults to 5 seconds.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share a [CancelFlag] the caller can raise to abort a running call.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Set a callback to be invoked when a migration's script starts.
    pub fn on_migration_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, Direction) + Send + Sync + 'static,
    {
        self.on_migration_start = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a migration's script and its
    /// tracking-table update complete. Receives the time spent on both.
    pub fn on_migration_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, Direction, Duration) + Send + Sync + 'static,
    {
        self.on_migration_complete = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a catalog entry needs no work: already
    /// applied during `up`, not applied during `down`.
    pub fn on_migration_skipped<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, Direction) + Send + Sync + 'static,
    {
        self.on_migration_skipped = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a migration fails. The call is rolled
    /// back after the callback returns.
    pub fn on_migration_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, Direction, &Error) + Send + Sync + 'static,
    {
        self.on_migration_error = Some(Box::new(callback));
        self
    }

    pub fn catalog(&self) -> &Catalog<C> {
        &self.catalog
    }

    pub fn tracking_table_name(&self) -> &str {
        &self.tracking_table_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The migrations currently recorded as applied, ordered by name.
    /// Returns an empty vector if the tracking table does not exist.
    pub fn applied(&self, conn: &mut C) -> Result<Vec<AppliedRecord>, Error> {
        let store = AppliedStore::new(&self.tracking_table_name);
        run_read_only(conn, self.timeout, &self.cancel, |tx| store.list_applied(tx))
    }

    /// Apply every catalog entry that is not recorded as applied.
    pub fn up(&self, conn: &mut C) -> Result<MigrationReport, Error> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("migration_up", table = %self.tracking_table_name).entered();
        #[cfg(feature = "tracing")]
        tracing::info!("Running up migrations");

        run_bounded(conn, self.timeout, &self.cancel, |tx, deadline| {
            self.apply_pending(tx, deadline)
        })
    }

    /// Revert every catalog entry that is recorded as applied, then drop the
    /// tracking table if nothing is left in it.
    pub fn down(&self, conn: &mut C) -> Result<MigrationReport, Error> {
        #[cfg(feature = "tracing")]
        let _span =
            tracing::info_span!("migration_down", table = %self.tracking_table_name).entered();
        #[cfg(feature = "tracing")]
        tracing::info!("Running down migrations");

        run_bounded(conn, self.timeout, &self.cancel, |tx, deadline| {
            self.revert_applied(tx, deadline)
        })
    }

    fn apply_pending(
        &self,
        tx: &mut C::Tx<'_>,
        deadline: &Deadline,
    ) -> Result<MigrationReport, Error> {
        let store = AppliedStore::new(&self.tracking_table_name);
        let existed = store.ensure_table_exists(tx)?;
        let mut report = MigrationReport::new(Direction::Up, existed);
        report.tracking_table_created = !existed;

        let applied = store.list_applied(tx)?;
        report.orphaned = self.orphans(&applied);
        let applied: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();

        for version in self.catalog.versions() {
            let name = version.name();
            if applied.contains(name) {
                #[cfg(feature = "tracing")]
                tracing::debug!(name, "Skipping migration (already applied)");
                self.skipped(name, Direction::Up, &mut report);
                continue;
            }
            self.run_step(tx, deadline, name, Direction::Up, version.forward(), |tx| {
                store.record_applied(tx, name)
            })?;
            report.migrations_run.push(name.to_string());
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            applied = report.migrations_run.len(),
            skipped = report.migrations_skipped.len(),
            "Up migrations completed"
        );
        Ok(report)
    }

    fn revert_applied(
        &self,
        tx: &mut C::Tx<'_>,
        deadline: &Deadline,
    ) -> Result<MigrationReport, Error> {
        let store = AppliedStore::new(&self.tracking_table_name);
        let existed = store.table_exists(tx)?;
        let mut report = MigrationReport::new(Direction::Down, existed);

        let applied = store.list_applied(tx)?;
        report.orphaned = self.orphans(&applied);
        let applied: HashSet<&str> = applied.iter().map(|r| r.name.as_str()).collect();

        for version in self.catalog.versions() {
            let name = version.name();
            if !applied.contains(name) {
                #[cfg(feature = "tracing")]
                tracing::debug!(name, "Skipping migration (not applied)");
                self.skipped(name, Direction::Down, &mut report);
                continue;
            }
            self.run_step(tx, deadline, name, Direction::Down, version.backward(), |tx| {
                store.record_reverted(tx, name)
            })?;
            report.migrations_run.push(name.to_string());
        }

        report.tracking_table_dropped = store.drop_table_if_empty(tx)?;
        if existed && !report.tracking_table_dropped {
            #[cfg(feature = "tracing")]
            tracing::info!(
                table = %self.tracking_table_name,
                "Keeping tracking table, applied records remain"
            );
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            reverted = report.migrations_run.len(),
            skipped = report.migrations_skipped.len(),
            "Down migrations completed"
        );
        Ok(report)
    }

    /// Runs one script followed by its tracking-table update.
    fn run_step<'conn>(
        &self,
        tx: &mut C::Tx<'conn>,
        deadline: &Deadline,
        name: &str,
        direction: Direction,
        step: &dyn Step<C>,
        record: impl FnOnce(&mut C::Tx<'conn>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("migration_step", name, %direction).entered();
        #[cfg(feature = "tracing")]
        tracing::info!("Starting migration");

        if let Some(ref callback) = self.on_migration_start {
            callback(name, direction);
        }
        let started = Instant::now();

        let result = deadline
            .check(Some(name))
            .and_then(|()| {
                tx.arm(deadline).map_err(|source| Error::Script {
                    name: name.to_string(),
                    direction,
                    source,
                })
            })
            .and_then(|()| {
                step.run(tx).map_err(|source| Error::Script {
                    name: name.to_string(),
                    direction,
                    source,
                })
            })
            // a step that returns late still counts as a timeout
            .and_then(|()| deadline.check(Some(name)))
            .and_then(|()| record(tx))
            .map_err(|err| deadline.classify(err));

        match result {
            Ok(()) => {
                let duration = started.elapsed();
                #[cfg(feature = "tracing")]
                tracing::info!(
                    duration_ms = duration.as_millis(),
                    "Migration completed successfully"
                );
                if let Some(ref callback) = self.on_migration_complete {
                    callback(name, direction, duration);
                }
                Ok(())
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %err, "Migration failed");
                if let Some(ref callback) = self.on_migration_error {
                    callback(name, direction, &err);
                }
                Err(err)
            }
        }
    }

    fn skipped(&self, name: &str, direction: Direction, report: &mut MigrationReport) {
        if let Some(ref callback) = self.on_migration_skipped {
            callback(name, direction);
        }
        report.migrations_skipped.push(name.to_string());
    }

    fn orphans(&self, applied: &[AppliedRecord]) -> Vec<String> {
        applied
            .iter()
            .filter(|record| !self.catalog.contains(&record.name))
            .map(|record| {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    name = %record.name,
                    applied_at = %record.applied_at,
                    "Applied migration has no catalog entry, leaving it in place"
                );
                record.name.clone()
            })
            .collect()
    }
}
