//! Configuration file loading and merging

use super::builtin;
use super::schema::{CommonConfig, Config, RuntimeConfig, SandboxSettings};
use crate::error::{Result, SandboxError};
use sandboxer_net::config::ConfigValidator;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Find user config by checking environment and standard locations
    pub fn find_user_config() -> Option<PathBuf> {
        Self::find_user_config_with(|key| env::var(key).ok())
    }

    fn find_user_config_with(var: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
        // 1. $SANDBOXER_CONFIG
        if let Some(path) = var("SANDBOXER_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
        }

        // 2. $XDG_CONFIG_HOME/sandboxer/config.toml
        if let Some(xdg) = var("XDG_CONFIG_HOME") {
            let p = PathBuf::from(xdg).join("sandboxer/config.toml");
            if p.exists() {
                return Some(p);
            }
        }

        // 3. ~/.config/sandboxer/config.toml
        if let Some(home) = var("HOME") {
            let p = PathBuf::from(home).join(".config/sandboxer/config.toml");
            if p.exists() {
                return Some(p);
            }
        }

        None
    }

    /// Load config from a file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| SandboxError::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load built-in configuration embedded in the binary
    pub fn load_builtin() -> Config {
        builtin::get_builtin().clone()
    }

    /// Merge `override_cfg` on top of `base`
    ///
    /// Network groups and policies are replaced by name; every other setting
    /// only when the override sets it.
    pub fn merge_configs(base: Config, override_cfg: Config) -> Config {
        let Config {
            common,
            runtime,
            sandbox,
            network,
        } = override_cfg;

        Config {
            common: CommonConfig {
                config_version: common.config_version.or(base.common.config_version),
                verbose: common.verbose.or(base.common.verbose),
            },
            runtime: RuntimeConfig {
                engine: runtime.engine.or(base.runtime.engine),
                binary: runtime.binary.or(base.runtime.binary),
                stop_timeout_secs: runtime.stop_timeout_secs.or(base.runtime.stop_timeout_secs),
            },
            sandbox: SandboxSettings {
                image: sandbox.image.or(base.sandbox.image),
                expose_ports: sandbox.expose_ports.or(base.sandbox.expose_ports),
                ports: sandbox.ports.or(base.sandbox.ports),
            },
            network: base.network.merge(network),
        }
    }

    /// Load with full config priority order and validate the result
    ///
    /// Priority: built-in < user < explicit
    pub fn load_with_priority(explicit_config: Option<PathBuf>) -> Result<Config> {
        Self::load_layers(Self::find_user_config(), explicit_config)
    }

    fn load_layers(user: Option<PathBuf>, explicit: Option<PathBuf>) -> Result<Config> {
        let mut config = Self::load_builtin();

        if let Some(user_path) = user {
            tracing::debug!("Loading user config from {:?}", user_path);
            config = Self::merge_configs(config, Self::load_from_file(&user_path)?);
        }

        if let Some(explicit_path) = explicit {
            tracing::debug!("Loading explicit config from {:?}", explicit_path);
            config = Self::merge_configs(config, Self::load_from_file(&explicit_path)?);
        }

        ConfigValidator::validate(&config.network)?;
        Ok(config)
    }
}
