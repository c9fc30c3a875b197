pub mod history;
pub mod persistent;

pub use history::{InMemoryVersionStore, VersionStore};

#[cfg(feature = "rocksdb-storage")]
pub use persistent::{open_db, RocksVersionStore};

use std::sync::Arc;
use tracing::info;

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{VcsError, VcsResult};

/// Build the version store selected by configuration.
pub fn open_store(config: &StorageConfig) -> VcsResult<Arc<dyn VersionStore>> {
    match config.backend {
        StorageBackend::Memory => {
            info!("using in-memory version store");
            Ok(Arc::new(InMemoryVersionStore::new()))
        }
        StorageBackend::Rocksdb => open_rocks_store(config),
    }
}

#[cfg(feature = "rocksdb-storage")]
fn open_rocks_store(config: &StorageConfig) -> VcsResult<Arc<dyn VersionStore>> {
    let path = config.path.as_ref().ok_or_else(|| {
        VcsError::ConfigError("storage.path is required for the rocksdb backend".to_string())
    })?;
    info!(path = %path.display(), "opening RocksDB version store");
    let db = open_db(path)?;
    Ok(Arc::new(RocksVersionStore::new(db)))
}

#[cfg(not(feature = "rocksdb-storage"))]
fn open_rocks_store(_config: &StorageConfig) -> VcsResult<Arc<dyn VersionStore>> {
    Err(VcsError::ConfigError(
        "rocksdb backend requested but this build lacks the `rocksdb-storage` feature".to_string(),
    ))
}
