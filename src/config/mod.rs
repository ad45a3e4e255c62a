//! Configuration store

pub mod store;

pub use store::{ConfigError, ConfigStore, ProjectConfig, SyncConfig, UserConfig};
