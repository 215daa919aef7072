//! Built-in default configuration embedded in the binary
//!
//! Lowest-priority configuration layer, parsed once on first access.

use super::schema::Config;
use std::sync::LazyLock;

static BUILTIN_CONFIG: LazyLock<Config> = LazyLock::new(load_builtin_config);

/// Get the builtin configuration
pub fn get_builtin() -> &'static Config {
    &BUILTIN_CONFIG
}

fn load_builtin_config() -> Config {
    const BUILTIN_TOML: &str = include_str!("../builtin-config.toml");
    toml::from_str(BUILTIN_TOML).expect("Failed to parse builtin configuration")
}
