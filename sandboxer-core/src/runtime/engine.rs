//! Supported container engines

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Container engine whose CLI sandboxer drives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    #[default]
    Podman,
    Docker,
}

impl Engine {
    /// Executable looked up on `PATH` when no explicit binary is configured
    pub fn default_binary(&self) -> &'static str {
        match self {
            Engine::Podman => "podman",
            Engine::Docker => "docker",
        }
    }

    /// Podman maps the invoking user into the container; docker needs an
    /// explicit `--user`
    pub fn keeps_host_identity(&self) -> bool {
        matches!(self, Engine::Podman)
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_binary())
    }
}
