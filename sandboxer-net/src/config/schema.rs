//! Configuration schema types

use crate::mode::NetworkMode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_RESOLVE_TIMEOUT_MS: u64 = 5_000;

/// Network configuration: endpoint groups and the policy for each mode
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    /// Upper bound for resolving a single allowlisted hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolve_timeout_ms: Option<u64>,
    /// Allow DNS (port 53) from filtered sandboxes so tools can resolve names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_dns: Option<bool>,
    #[serde(default)]
    pub groups: IndexMap<String, EndpointGroup>,
    /// Keyed by mode name (`claude-only`, `dev`)
    #[serde(default)]
    pub policies: IndexMap<String, ModePolicy>,
}

/// A named group of endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointGroup {
    #[serde(default)]
    pub description: String,
    /// Hostnames, resolved when a policy is compiled
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Static CIDR ranges (IPv4 or IPv6)
    #[serde(default)]
    pub ranges: Vec<String>,
    /// TCP ports allowed for this group's hosts and ranges
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// References to other groups (for composition)
    #[serde(default)]
    pub groups: Vec<String>,
}

fn default_ports() -> Vec<u16> {
    vec![443]
}

impl Default for EndpointGroup {
    fn default() -> Self {
        Self {
            description: String::new(),
            hosts: vec![],
            ranges: vec![],
            ports: default_ports(),
            groups: vec![],
        }
    }
}

/// The allowlist for one filtered mode
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModePolicy {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub allow_groups: Vec<String>,
}

impl NetworkConfig {
    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms.unwrap_or(DEFAULT_RESOLVE_TIMEOUT_MS))
    }

    pub fn allow_dns(&self) -> bool {
        self.allow_dns.unwrap_or(true)
    }

    pub fn policy_for(&self, mode: NetworkMode) -> Option<&ModePolicy> {
        self.policies.get(mode.as_str())
    }

    /// Layer `other` on top of `self`: groups and policies are replaced by
    /// name, scalars only when set
    pub fn merge(mut self, other: NetworkConfig) -> NetworkConfig {
        if other.resolve_timeout_ms.is_some() {
            self.resolve_timeout_ms = other.resolve_timeout_ms;
        }
        if other.allow_dns.is_some() {
            self.allow_dns = other.allow_dns;
        }
        for (name, group) in other.groups {
            self.groups.insert(name, group);
        }
        for (name, policy) in other.policies {
            self.policies.insert(name, policy);
        }
        self
    }
}
