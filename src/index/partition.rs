//! Deterministic partition naming for (tenant, project) pairs.

use regex::Regex;
use sha2::{Digest, Sha256};

/// Maximum partition name length accepted by the search index.
pub const MAX_PARTITION_LEN: usize = 63;

/// Prefix kept when a name is truncated.
const TRUNCATED_PREFIX_LEN: usize = 54;

/// Hex characters of the hash appended to truncated names.
const HASH_SUFFIX_LEN: usize = 8;

/// Derive the search-index partition name for a (tenant, project) pair.
///
/// Each id is sanitized to the `[A-Za-z0-9_]` charset and the two are joined
/// with `__`. Names longer than [`MAX_PARTITION_LEN`] are truncated to a
/// 54-character prefix plus an 8-hex-character SHA-256 suffix of the full
/// untruncated name, so distinct long pairs still map to distinct partitions.
pub fn partition_name(tenant_id: &str, project_id: &str) -> String {
    let full = format!("{}__{}", sanitize(tenant_id), sanitize(project_id));
    if full.len() <= MAX_PARTITION_LEN {
        return full;
    }

    let mut hasher = Sha256::new();
    hasher.update(full.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!(
        "{}_{}",
        &full[..TRUNCATED_PREFIX_LEN],
        &digest[..HASH_SUFFIX_LEN]
    )
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
fn sanitize(id: &str) -> String {
    let re = Regex::new(r"[^A-Za-z0-9_]").unwrap();
    re.replace_all(id, "_").into_owned()
}
