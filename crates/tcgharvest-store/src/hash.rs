//! Blake3 helpers for content-derived keys

/// Hash raw bytes with blake3.
pub fn hash_bytes(data: &[u8]) -> blake3::Hash {
    blake3::hash(data)
}

/// Hash a sequence of fields, each terminated by `sep`.
///
/// Used for cache keys where the same fields must always produce the
/// same key regardless of how they are buffered.
pub fn hash_fields<'a>(fields: impl IntoIterator<Item = &'a [u8]>, sep: u8) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for field in fields {
        hasher.update(field);
        hasher.update(&[sep]);
    }
    hasher.finalize()
}
