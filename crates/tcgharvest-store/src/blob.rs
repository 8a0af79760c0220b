//! Blob store contract shared by every persistence backend

/// Keys produced by [`BlobStore::list`], in ascending order.
pub type BlobKeys<'a> = Box<dyn Iterator<Item = Result<String, BlobError>> + Send + 'a>;

/// Error from a blob store operation.
#[derive(Debug)]
pub enum BlobError {
    /// No record stored under the key
    NotFound { key: String },
    /// Key is empty or escapes the store root
    InvalidKey { key: String },
    /// Underlying I/O failure
    Io { key: String, source: std::io::Error },
}

impl std::fmt::Display for BlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "blob not found: {key}"),
            Self::InvalidKey { key } => write!(f, "invalid blob key: {key:?}"),
            Self::Io { key, source } => write!(f, "blob {key}: {source}"),
        }
    }
}

impl std::error::Error for BlobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound {
                key: key.to_string(),
            }
        } else {
            Self::Io {
                key: key.to_string(),
                source,
            }
        }
    }
}

/// Key-addressed storage with overwrite-on-write semantics.
///
/// Implementations must tolerate concurrent reads and concurrent writes to
/// disjoint keys without external locking.
pub trait BlobStore: Send + Sync {
    /// Store `data` under `key`, replacing any previous value.
    fn write(&self, key: &str, data: &[u8]) -> Result<(), BlobError>;

    /// Read the value stored under `key`.
    fn read(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Whether a value is stored under `key`.
    fn exists(&self, key: &str) -> Result<bool, BlobError>;

    /// List every key starting with `prefix`, sorted ascending.
    fn list(&self, prefix: &str) -> BlobKeys<'_>;
}

impl<S: BlobStore + ?Sized> BlobStore for std::sync::Arc<S> {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        (**self).write(key, data)
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        (**self).read(key)
    }

    fn exists(&self, key: &str) -> Result<bool, BlobError> {
        (**self).exists(key)
    }

    fn list(&self, prefix: &str) -> BlobKeys<'_> {
        (**self).list(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn io_not_found_maps_to_not_found() {
        let err = BlobError::io("a/b.json", std::io::Error::new(ErrorKind::NotFound, "gone"));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "blob not found: a/b.json");
    }

    #[test]
    fn io_other_keeps_source() {
        let err = BlobError::io("k", std::io::Error::new(ErrorKind::PermissionDenied, "nope"));
        assert!(!err.is_not_found());
        assert!(std::error::Error::source(&err).is_some());
    }
}
