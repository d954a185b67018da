use crate::error::{DbError, Error};
use crate::transaction::{Connection, MigrationTransaction};
use std::borrow::Cow;
use std::collections::HashSet;

/// A unit of work run against an open migration transaction.
///
/// Raw SQL is covered by [`Sql`]. Backends also implement `Step` for closures
/// taking their transaction type, and you can implement it on your own types
/// for migrations that need to query data and transform it in Rust.
pub trait Step<C: Connection>: Send + Sync {
    fn run(&self, tx: &mut C::Tx<'_>) -> Result<(), DbError>;
}

/// A step that executes its SQL text verbatim, as a batch of statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sql(pub Cow<'static, str>);

impl Sql {
    pub fn new(sql: impl Into<Cow<'static, str>>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<C: Connection> Step<C> for Sql {
    fn run(&self, tx: &mut C::Tx<'_>) -> Result<(), DbError> {
        tx.run_script(&self.0)
    }
}

/// One named entry of a migration catalog: a forward step and the backward
/// step that undoes it.
///
/// # IMPORTANT WARNING
///
/// **Once a migration has been applied to any database, its name must NEVER be changed.**
/// The name is what the tracking table records. Renaming an applied migration
/// makes the old record an orphan and causes the renamed one to be applied again.
pub struct MigrationVersion<C: Connection> {
    name: String,
    forward: Box<dyn Step<C>>,
    backward: Box<dyn Step<C>>,
}

impl<C: Connection> MigrationVersion<C> {
    pub fn new(
        name: impl Into<String>,
        forward: impl Step<C> + 'static,
        backward: impl Step<C> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            forward: Box::new(forward),
            backward: Box::new(backward),
        }
    }

    /// A migration whose forward and backward steps are plain SQL.
    pub fn sql(
        name: impl Into<String>,
        forward: impl Into<Cow<'static, str>>,
        backward: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(name, Sql::new(forward), Sql::new(backward))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn forward(&self) -> &dyn Step<C> {
        self.forward.as_ref()
    }

    pub(crate) fn backward(&self) -> &dyn Step<C> {
        self.backward.as_ref()
    }
}

impl<C: Connection> std::fmt::Debug for MigrationVersion<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationVersion")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The ordered list of migrations a migrator reconciles against the database.
///
/// Declaration order is execution order, for `up` and for `down` alike.
pub struct Catalog<C: Connection> {
    versions: Vec<MigrationVersion<C>>,
}

impl<C: Connection> Catalog<C> {
    /// Builds a catalog, rejecting empty and duplicate names.
    pub fn try_new(versions: Vec<MigrationVersion<C>>) -> Result<Self, Error> {
        let mut seen = HashSet::with_capacity(versions.len());
        for version in &versions {
            if version.name().trim().is_empty() {
                return Err(Error::Catalog(
                    "Migration name must not be empty".to_string(),
                ));
            }
            if !seen.insert(version.name()) {
                return Err(Error::Catalog(format!(
                    "Duplicate migration name found: {}",
                    version.name()
                )));
            }
        }
        Ok(Self { versions })
    }

    pub fn versions(&self) -> &[MigrationVersion<C>] {
        &self.versions
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.versions.iter().map(MigrationVersion::name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

impl<C: Connection> std::fmt::Debug for Catalog<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
