//! Layered sandboxer configuration
//!
//! Built-in defaults, then user config, then an explicit `--config` file.

pub mod builtin;
pub mod loader;
pub mod schema;

pub use loader::ConfigLoader;
pub use schema::{CommonConfig, Config, RuntimeConfig, SandboxSettings, DEFAULT_IMAGE};
