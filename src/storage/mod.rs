//! Storage providers for task collections

pub mod file;
pub mod id_generator;
pub mod local;
pub mod location;
pub mod provider;

pub use file::FileProvider;
pub use id_generator::IdGenerator;
pub use local::{DEFAULT_QUOTA_BYTES, LocalProvider};
pub use location::{ProjectLocation, TaskLocationError};
pub use provider::{Provider, ProviderError, ProviderMode, ProviderResult, TaskProvider};
