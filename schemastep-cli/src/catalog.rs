//! Loads a migration catalog from a directory of SQL scripts.
//!
//! Each migration is a pair of files sharing a stem: `<stem>.up.sql` holds the
//! forward script and `<stem>.down.sql` the backward one. The stem is the
//! migration's name, and migrations run in ascending stem order, so stems are
//! usually prefixed with a sortable timestamp or sequence number
//! (`0001_create_users.up.sql`).

use schemastep::{Connection, MigrationVersion};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const UP_SUFFIX: &str = ".up.sql";
const DOWN_SUFFIX: &str = ".down.sql";

/// The forward and backward scripts of one migration, as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPair {
    pub name: String,
    pub up: String,
    pub down: String,
}

impl ScriptPair {
    pub fn into_version<C: Connection>(self) -> MigrationVersion<C> {
        MigrationVersion::sql(self.name, self.up, self.down)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read migrations directory {}: {source}", .dir.display())]
    ReadDir {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read migration script {}: {source}", .path.display())]
    ReadScript {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("migration '{0}' has an up script but no {0}.down.sql")]
    MissingDown(String),
    #[error("migration '{0}' has a down script but no {0}.up.sql")]
    MissingUp(String),
}

#[derive(Default)]
struct Halves {
    up: Option<PathBuf>,
    down: Option<PathBuf>,
}

/// Reads every script pair in `dir`, ordered by name. Files that are not
/// `.up.sql` or `.down.sql` are ignored.
pub fn load_dir(dir: &Path) -> Result<Vec<ScriptPair>, LoadError> {
    let read_dir_error = |source| LoadError::ReadDir {
        dir: dir.to_path_buf(),
        source,
    };

    let mut by_name: BTreeMap<String, Halves> = BTreeMap::new();
    for entry in fs::read_dir(dir).map_err(read_dir_error)? {
        let path = entry.map_err(read_dir_error)?.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(stem) = file_name.strip_suffix(UP_SUFFIX) {
            by_name.entry(stem.to_string()).or_default().up = Some(path.clone());
        } else if let Some(stem) = file_name.strip_suffix(DOWN_SUFFIX) {
            by_name.entry(stem.to_string()).or_default().down = Some(path.clone());
        }
    }

    by_name
        .into_iter()
        .map(|(name, halves)| match (halves.up, halves.down) {
            (Some(up), Some(down)) => Ok(ScriptPair {
                up: read_script(&up)?,
                down: read_script(&down)?,
                name,
            }),
            (Some(_), None) => Err(LoadError::MissingDown(name)),
            (None, _) => Err(LoadError::MissingUp(name)),
        })
        .collect()
}

fn read_script(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::ReadScript {
        path: path.to_path_buf(),
        source,
    })
}
