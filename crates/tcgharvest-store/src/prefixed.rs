//! Prefix-scoped view over another store

use crate::blob::{BlobError, BlobKeys, BlobStore};

/// Store view that transparently prepends `prefix` to every key.
///
/// Listed keys are returned without the prefix, so callers see the
/// same key space they write to.
#[derive(Debug, Clone)]
pub struct Prefixed<S> {
    inner: S,
    prefix: String,
}

impl<S: BlobStore> Prefixed<S> {
    pub fn new(inner: S, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self { inner, prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn full(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

impl<S: BlobStore> BlobStore for Prefixed<S> {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        self.inner.write(&self.full(key), data)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.inner.read(&self.full(key))
    }

    fn exists(&self, key: &str) -> Result<bool, BlobError> {
        self.inner.exists(&self.full(key))
    }

    fn list(&self, prefix: &str) -> BlobKeys<'_> {
        let strip = self.prefix.len();
        Box::new(
            self.inner
                .list(&self.full(prefix))
                .map(move |k| k.map(|k| k[strip..].to_string())),
        )
    }
}
