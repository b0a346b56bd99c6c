//! Loading changesets from a directory of SQL files.
//!
//! Files are named `{version}_{title}.up.sql` and `{version}_{title}.down.sql`.
//! Files without a `.sql` extension are ignored.

use super::types::{Changeset, CatalogError, MAX_VERSION};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::debug;

static FILE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]+)_(.*)\.(up|down)\.sql$").expect("changeset file name regex is valid")
});

/// Direction encoded in a changeset file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileDirection {
    Up,
    Down,
}

/// A parsed changeset file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ParsedFileName {
    pub version: u64,
    pub title: String,
    pub direction: FileDirection,
}

/// Parse a file name such as `3_add_index.up.sql`.
///
/// Returns `Ok(None)` for files that are not SQL scripts.
pub(crate) fn parse_file_name(name: &str) -> Result<Option<ParsedFileName>, CatalogError> {
    if !name.ends_with(".sql") {
        return Ok(None);
    }

    let captures = FILE_NAME
        .captures(name)
        .ok_or_else(|| CatalogError::InvalidFileName(name.to_string()))?;

    let version: u64 = captures[1]
        .parse()
        .map_err(|_| CatalogError::InvalidVersion(name.to_string()))?;
    if version == 0 || version > MAX_VERSION {
        return Err(CatalogError::InvalidVersion(name.to_string()));
    }

    let direction = match &captures[3] {
        "up" => FileDirection::Up,
        _ => FileDirection::Down,
    };

    Ok(Some(ParsedFileName {
        version,
        title: captures[2].replace('_', " "),
        direction,
    }))
}

#[derive(Default)]
struct PendingChangeset {
    title: String,
    up: Option<(String, String)>,
    down: Option<(String, String)>,
}

/// Read every changeset file in `dir`, pairing up and down scripts by version.
pub(crate) async fn read_dir_changesets(dir: &Path) -> Result<Vec<Changeset>, CatalogError> {
    let unreadable = |source| CatalogError::Unreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(dir).await.map_err(unreadable)?;
    let mut pending: BTreeMap<u64, PendingChangeset> = BTreeMap::new();

    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy().to_string();
        let Some(parsed) = parse_file_name(&file_name)? else {
            debug!(file = %file_name, "Skipping non-changeset file");
            continue;
        };

        let body = fs::read_to_string(&path)
            .await
            .map_err(|source| CatalogError::Unreadable {
                path: path.clone(),
                source,
            })?;

        let slot = pending.entry(parsed.version).or_default();
        let (existing, direction) = match parsed.direction {
            FileDirection::Up => (&mut slot.up, "up"),
            FileDirection::Down => (&mut slot.down, "down"),
        };

        if let Some((first, _)) = existing {
            return Err(CatalogError::DuplicateVersion {
                version: parsed.version,
                direction,
                first: first.clone(),
                second: file_name,
            });
        }

        if parsed.direction == FileDirection::Up || slot.title.is_empty() {
            slot.title = parsed.title;
        }
        *existing = Some((file_name, body));
    }

    let mut changesets = Vec::with_capacity(pending.len());
    for (version, slot) in pending {
        let (_, up) = slot.up.ok_or(CatalogError::MissingUp(version))?;
        let mut changeset = Changeset::new(version, slot.title, up);
        if let Some((_, down)) = slot.down {
            changeset = changeset.with_down(down);
        }
        changesets.push(changeset);
    }

    debug!(dir = %dir.display(), count = changesets.len(), "Read changeset directory");
    Ok(changesets)
}
