//! Sqlite-backed persistence for monitor snapshots.

pub mod connection;
pub mod monitor_store;

pub use connection::DatabaseConnection;
pub use monitor_store::SqliteMonitorStore;
