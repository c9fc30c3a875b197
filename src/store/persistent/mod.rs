//! Persistent storage implementations using RocksDB.
//!
//! This module is only available when the `rocksdb-storage` feature is enabled.

#[cfg(feature = "rocksdb-storage")]
pub mod rocks_versions;

#[cfg(feature = "rocksdb-storage")]
pub use rocks_versions::RocksVersionStore;

#[cfg(feature = "rocksdb-storage")]
use rocksdb::{Options, DB};
#[cfg(feature = "rocksdb-storage")]
use std::path::Path;
#[cfg(feature = "rocksdb-storage")]
use std::sync::Arc;

#[cfg(feature = "rocksdb-storage")]
use crate::error::{VcsError, VcsResult};

/// Column family names
#[cfg(feature = "rocksdb-storage")]
pub const CF_VERSIONS: &str = "versions";
#[cfg(feature = "rocksdb-storage")]
pub const CF_VERSION_INDEX: &str = "version_index";
#[cfg(feature = "rocksdb-storage")]
pub const CF_BRANCH_HEADS: &str = "branch_heads";
#[cfg(feature = "rocksdb-storage")]
pub const CF_META: &str = "meta";

/// Opens a RocksDB instance with all required column families.
#[cfg(feature = "rocksdb-storage")]
pub fn open_db<P: AsRef<Path>>(path: P) -> VcsResult<Arc<DB>> {
    let mut opts = Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);

    let column_families = vec![CF_VERSIONS, CF_VERSION_INDEX, CF_BRANCH_HEADS, CF_META];

    let db = DB::open_cf(&opts, path, &column_families)
        .map_err(|e| VcsError::Storage(format!("Failed to open RocksDB: {}", e)))?;

    Ok(Arc::new(db))
}
