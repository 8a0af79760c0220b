//! Filesystem blob store
//!
//! Layout mirrors the key: `magic/mtgtop8/123.json` lives at
//! `{root}/magic/mtgtop8/123.json`. Writes land in a sibling `.tmp` file and
//! are renamed into place, so readers never observe a partial record.
//! Keys ending in `.gz` are gzip-compressed on disk and transparently
//! decompressed on read.

use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::blob::{BlobError, BlobKeys, BlobStore};

const TMP_SUFFIX: &str = ".tmp";

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| BlobError::io(&root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobError> {
        let rel = Path::new(key);
        let valid = !key.is_empty()
            && !key.ends_with(TMP_SUFFIX)
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(BlobError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(rel))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }

    /// Remove `.tmp` files left behind by interrupted writes.
    pub fn cleanup_tmp(&self) -> std::io::Result<usize> {
        let mut removed = 0;
        for path in self.walk().map_err(std::io::Error::other)? {
            if path.to_string_lossy().ends_with(TMP_SUFFIX) {
                log::warn!("Removing stale tmp file: {}", path.display());
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every regular file under the root.
    fn walk(&self) -> Result<Vec<PathBuf>, glob::PatternError> {
        let pattern = format!("{}/**/*", glob::Pattern::escape(&self.root.to_string_lossy()));
        Ok(glob::glob(&pattern)?
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .collect())
    }
}

fn is_gzip(key: &str) -> bool {
    key.ends_with(".gz")
}

impl BlobStore for FsStore {
    fn write(&self, key: &str, data: &[u8]) -> Result<(), BlobError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| BlobError::io(key, e))?;
        }

        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);

        let result = (|| -> std::io::Result<()> {
            let file = fs::File::create(&tmp)?;
            if is_gzip(key) {
                let mut enc = GzEncoder::new(file, Compression::default());
                enc.write_all(data)?;
                enc.finish()?.sync_all()?;
            } else {
                let mut file = file;
                file.write_all(data)?;
                file.sync_all()?;
            }
            fs::rename(&tmp, &path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(BlobError::io(key, e));
        }
        Ok(())
    }

    fn read(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key)?;
        let raw = fs::read(&path).map_err(|e| BlobError::io(key, e))?;
        if !is_gzip(key) {
            return Ok(raw);
        }
        let mut out = Vec::with_capacity(raw.len() * 4);
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut out)
            .map_err(|e| BlobError::Io {
                key: key.to_string(),
                source: e,
            })?;
        Ok(out)
    }

    fn exists(&self, key: &str) -> Result<bool, BlobError> {
        let path = self.path_for(key)?;
        Ok(path.is_file())
    }

    fn list(&self, prefix: &str) -> BlobKeys<'_> {
        let paths = match self.walk() {
            Ok(paths) => paths,
            Err(e) => {
                let err = BlobError::Io {
                    key: prefix.to_string(),
                    source: std::io::Error::other(e),
                };
                return Box::new(std::iter::once(Err(err)));
            }
        };
        let mut keys: Vec<String> = paths
            .iter()
            .filter_map(|p| self.key_for(p))
            .filter(|k| k.starts_with(prefix) && !k.ends_with(TMP_SUFFIX))
            .collect();
        keys.sort_unstable();
        Box::new(keys.into_iter().map(Ok))
    }
}
