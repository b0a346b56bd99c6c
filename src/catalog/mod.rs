//! Changeset catalog.
//!
//! The catalog is the ordered, read-only set of changesets available to the
//! engine. It is built once, either from a directory of SQL files or from
//! changesets constructed in code, and is validated as a whole: a malformed
//! source never yields a partial catalog.

mod source;
mod types;

pub use types::{Changeset, CatalogError, MAX_VERSION};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Immutable, ascending sequence of changesets.
#[derive(Debug, Clone, Default)]
pub struct ChangesetCatalog {
    changesets: Vec<Arc<Changeset>>,
}

impl ChangesetCatalog {
    /// Load `{version}_{title}.{up|down}.sql` files from a directory.
    pub async fn load_dir(dir: &Path) -> Result<Self, CatalogError> {
        let changesets = source::read_dir_changesets(dir).await?;
        let catalog = Self::from_changesets(changesets)?;

        info!(
            dir = %dir.display(),
            count = catalog.len(),
            latest = catalog.latest_version().unwrap_or(0),
            "Loaded changeset catalog"
        );

        Ok(catalog)
    }

    /// Build a catalog from changesets constructed in code.
    ///
    /// Versions must be unique and between 1 and [`MAX_VERSION`]; input order
    /// does not matter.
    pub fn from_changesets(changesets: Vec<Changeset>) -> Result<Self, CatalogError> {
        let mut seen: HashMap<u64, &str> = HashMap::new();
        for changeset in &changesets {
            if changeset.version() == 0 || changeset.version() > MAX_VERSION {
                return Err(CatalogError::InvalidVersion(
                    changeset.description().to_string(),
                ));
            }
            if let Some(first) = seen.insert(changeset.version(), changeset.description()) {
                return Err(CatalogError::DuplicateVersion {
                    version: changeset.version(),
                    direction: "up",
                    first: first.to_string(),
                    second: changeset.description().to_string(),
                });
            }
        }

        let mut changesets: Vec<Arc<Changeset>> = changesets.into_iter().map(Arc::new).collect();
        changesets.sort_by_key(|c| c.version());

        Ok(Self { changesets })
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Arc<Changeset>> {
        self.changesets.iter()
    }

    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    /// All versions, ascending.
    pub fn versions(&self) -> Vec<u64> {
        self.changesets.iter().map(|c| c.version()).collect()
    }

    pub fn get(&self, version: u64) -> Option<&Arc<Changeset>> {
        self.changesets
            .binary_search_by_key(&version, |c| c.version())
            .ok()
            .map(|idx| &self.changesets[idx])
    }

    pub fn contains(&self, version: u64) -> bool {
        self.get(version).is_some()
    }

    /// Highest available version, or `None` for an empty catalog.
    pub fn latest_version(&self) -> Option<u64> {
        self.changesets.last().map(|c| c.version())
    }

    /// Largest catalog version strictly below `version`, or 0 when there is none.
    pub fn previous_version(&self, version: u64) -> u64 {
        self.changesets
            .iter()
            .rev()
            .map(|c| c.version())
            .find(|v| *v < version)
            .unwrap_or(0)
    }

    /// Number of catalog versions at or below `version`.
    pub(crate) fn position_of(&self, version: u64) -> usize {
        self.changesets.partition_point(|c| c.version() <= version)
    }

    /// Version reached after applying the first `position` changesets.
    pub(crate) fn version_at(&self, position: usize) -> Option<u64> {
        match position {
            0 => Some(0),
            p => self.changesets.get(p - 1).map(|c| c.version()),
        }
    }
}
