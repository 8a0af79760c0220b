//! tcgharvest-store: Key-addressed blob storage for harvested records
//!
//! The harvesting core only needs four operations from storage: write,
//! read, exists and list-by-prefix. [`BlobStore`] captures that contract;
//! [`FsStore`] backs it with a directory tree and [`MemoryStore`] with a map.

pub mod blob;
pub mod fs;
pub mod hash;
pub mod memory;
pub mod prefixed;

pub use blob::{BlobError, BlobKeys, BlobStore};
pub use fs::FsStore;
pub use hash::{hash_bytes, hash_fields};
pub use memory::MemoryStore;
pub use prefixed::Prefixed;
