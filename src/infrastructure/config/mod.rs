//! Runtime configuration loading.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
