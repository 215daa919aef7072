//! Requested network mode and flag validation

use crate::error::{PolicyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Egress mode selected when a sandbox is created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkMode {
    /// No restriction
    #[default]
    Open,
    /// No network at all
    None,
    /// Claude API only
    ClaudeOnly,
    /// Claude API plus package registries and source hosting
    Dev,
}

impl NetworkMode {
    pub const ALL: [NetworkMode; 4] = [
        NetworkMode::Open,
        NetworkMode::None,
        NetworkMode::ClaudeOnly,
        NetworkMode::Dev,
    ];

    /// Select the mode from the mutually exclusive CLI flags
    ///
    /// Fails with [`PolicyError::ConflictingNetworkMode`] if more than one
    /// flag is set. No flag at all means [`NetworkMode::Open`].
    pub fn from_flags(no_internet: bool, only_claude: bool, only_dev: bool) -> Result<Self> {
        let requested: Vec<NetworkMode> = [
            (no_internet, NetworkMode::None),
            (only_claude, NetworkMode::ClaudeOnly),
            (only_dev, NetworkMode::Dev),
        ]
        .into_iter()
        .filter_map(|(set, mode)| set.then_some(mode))
        .collect();

        match requested.as_slice() {
            [] => Ok(NetworkMode::Open),
            [mode] => Ok(*mode),
            _ => Err(PolicyError::ConflictingNetworkMode { requested }),
        }
    }

    /// Label value and config key for this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Open => "open",
            NetworkMode::None => "none",
            NetworkMode::ClaudeOnly => "claude-only",
            NetworkMode::Dev => "dev",
        }
    }

    /// CLI flag that selects this mode
    pub fn flag(&self) -> &'static str {
        match self {
            NetworkMode::Open => "(no network flag)",
            NetworkMode::None => "--no-internet",
            NetworkMode::ClaudeOnly => "--only-claude",
            NetworkMode::Dev => "--only-dev",
        }
    }

    /// Whether an allowlist is enforced for this mode
    pub fn is_filtered(&self) -> bool {
        matches!(self, NetworkMode::ClaudeOnly | NetworkMode::Dev)
    }

    pub fn disables_web_tools(&self) -> bool {
        self.is_filtered()
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkMode {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        NetworkMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| PolicyError::UnknownMode(s.to_string()))
    }
}
