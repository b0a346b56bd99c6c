use sha2::{Digest, Sha256};

/// Derive a stable advisory lock key for one version table in one database.
///
/// Every engine pointed at the same database, schema and table computes the
/// same key, so they contend on the same lock.
pub fn advisory_lock_key(database: &str, schema: &str, table: &str) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(database.as_bytes());
    hasher.update([0u8]);
    hasher.update(schema.as_bytes());
    hasher.update([0u8]);
    hasher.update(table.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}
