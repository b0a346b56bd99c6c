mod hash;

pub use hash::advisory_lock_key;

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

/// Default name of the table holding the version record
pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";

/// Default time to wait for the migration lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// How often a blocked lock acquisition retries
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The only answer accepted by confirmation prompts
pub const AFFIRMATIVE_ANSWER: &str = "yes";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier regex is valid"));

/// Check that a table name can be interpolated into SQL unquoted
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}
