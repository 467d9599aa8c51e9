//! Infrastructure layer: configuration loading, logging, sqlite persistence,
//! and the file-backed activation cache.

pub mod activation_file;
pub mod config;
pub mod database;
pub mod logging;

pub use activation_file::FileActivationCache;
pub use config::ConfigLoader;
pub use database::{DatabaseConnection, SqliteMonitorStore};
pub use logging::Logger;
