//! Catalog snapshot hashing.

use std::collections::BTreeSet;

use sha2::{Digest, Sha256};

use super::ResourceId;

/// Hash over the sorted, de-duplicated set of image identifiers.
///
/// Two catalogs with the same image set hash identically regardless of
/// row order or duplicates.
pub fn catalog_hash<'a, I>(ids: I) -> String
where
    I: IntoIterator<Item = &'a ResourceId>,
{
    let sorted: BTreeSet<&str> = ids.into_iter().map(ResourceId::as_str).collect();
    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}
