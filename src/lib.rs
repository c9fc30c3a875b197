pub mod compare;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod model;
pub mod server;
pub mod store;

pub use config::{load_config, AppConfig, LoggingConfig, ServerConfig, StorageConfig, VersioningConfig};
pub use error::{VcsError, VcsResult};
pub use manager::VersionManager;
pub use model::*;
pub use store::{open_store, InMemoryVersionStore, VersionStore};
