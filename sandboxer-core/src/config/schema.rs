//! Configuration schema types

use crate::runtime::Engine;
use sandboxer_net::NetworkConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_IMAGE: &str = "docker.io/rdubwiley/sandboxer";
pub const DEFAULT_PORT: u16 = 3000;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

/// Complete application configuration
///
/// Every scalar is optional so a layer only overrides what it sets.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CommonConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
}

/// Which container engine to drive and how
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<Engine>,
    /// Explicit path to the engine executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
    /// Grace period between SIGTERM and SIGKILL on `stop`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_timeout_secs: Option<u64>,
}

/// Defaults for newly created sandboxes
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expose_ports: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<u16>>,
}

impl CommonConfig {
    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }
}

impl RuntimeConfig {
    pub fn engine(&self) -> Engine {
        self.engine.unwrap_or_default()
    }

    pub fn binary(&self) -> PathBuf {
        self.binary
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.engine().default_binary()))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs.unwrap_or(DEFAULT_STOP_TIMEOUT_SECS))
    }

    /// Apply `--engine`; a configured binary only applies to its own engine
    pub fn with_engine(mut self, engine: Option<Engine>) -> Self {
        if let Some(engine) = engine {
            if self.engine() != engine {
                self.binary = None;
            }
            self.engine = Some(engine);
        }
        self
    }
}

impl SandboxSettings {
    pub fn image(&self) -> &str {
        self.image.as_deref().unwrap_or(DEFAULT_IMAGE)
    }

    pub fn expose_ports(&self) -> bool {
        self.expose_ports.unwrap_or(true)
    }

    pub fn ports(&self) -> Vec<u16> {
        self.ports.clone().unwrap_or_else(|| vec![DEFAULT_PORT])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.runtime.engine(), Engine::Podman);
        assert_eq!(config.runtime.binary(), PathBuf::from("podman"));
        assert_eq!(config.runtime.stop_timeout(), Duration::from_secs(10));
        assert_eq!(config.sandbox.image(), DEFAULT_IMAGE);
        assert!(config.sandbox.expose_ports());
        assert_eq!(config.sandbox.ports(), vec![3000]);
        assert!(!config.common.verbose());
    }

    #[test]
    fn test_parse_sections() {
        let toml_str = r#"
[runtime]
engine = "docker"
stop_timeout_secs = 3

[sandbox]
image = "localhost/dev:latest"
ports = [8080, 5173]
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runtime.engine(), Engine::Docker);
        assert_eq!(config.runtime.binary(), PathBuf::from("docker"));
        assert_eq!(config.runtime.stop_timeout(), Duration::from_secs(3));
        assert_eq!(config.sandbox.image(), "localhost/dev:latest");
        assert_eq!(config.sandbox.ports(), vec![8080, 5173]);
    }

    #[test]
    fn test_engine_override_drops_foreign_binary() {
        let runtime = RuntimeConfig {
            binary: Some(PathBuf::from("/opt/podman/bin/podman")),
            ..Default::default()
        };

        let same = runtime.clone().with_engine(Some(Engine::Podman));
        assert_eq!(same.binary(), PathBuf::from("/opt/podman/bin/podman"));

        let docker = runtime.clone().with_engine(Some(Engine::Docker));
        assert_eq!(docker.engine(), Engine::Docker);
        assert_eq!(docker.binary(), PathBuf::from("docker"));

        assert_eq!(runtime.with_engine(None).engine(), Engine::Podman);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("[sandbox]\nimgae = \"x\"").is_err());
    }
}
