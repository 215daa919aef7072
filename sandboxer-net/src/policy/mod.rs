//! Compilation of a network mode into a frozen, enforceable policy

pub mod resolver;
pub mod ruleset;

pub use resolver::{HostResolver, SystemResolver};
pub use ruleset::Ruleset;

use crate::config::{Allowlist, NetworkConfig};
use crate::error::{PolicyError, Result};
use crate::mode::NetworkMode;
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Pause between lookup attempts for a host that failed transiently
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// A hostname with the addresses it resolved to when the policy was compiled
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Endpoint {
    pub hostname: String,
    pub addresses: Vec<IpAddr>,
    pub ports: Vec<u16>,
}

/// A static CIDR range from configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RangeRule {
    pub net: IpNet,
    pub ports: Vec<u16>,
}

/// The egress policy of one sandbox
///
/// Addresses are frozen at compile time and never refreshed; a sandbox that
/// needs fresh addresses has to be recreated.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NetworkPolicy {
    pub mode: NetworkMode,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub ranges: Vec<RangeRule>,
    pub disable_web_tools: bool,
    pub allow_dns: bool,
    pub resolved_at: DateTime<Utc>,
}

impl NetworkPolicy {
    /// Whether a TCP connection to `addr:port` is permitted
    pub fn allows(&self, addr: IpAddr, port: u16) -> bool {
        let via_endpoint = self
            .endpoints
            .iter()
            .any(|e| e.ports.contains(&port) && e.addresses.contains(&addr));
        let via_range = self
            .ranges
            .iter()
            .any(|r| r.ports.contains(&port) && r.net.contains(&addr));
        via_endpoint || via_range
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|e| e.hostname.as_str())
    }

    pub fn ruleset(&self) -> Ruleset {
        Ruleset::from_policy(self)
    }
}

/// Turns a [`NetworkMode`] into a [`NetworkPolicy`]
pub struct PolicyCompiler<R = SystemResolver> {
    network: NetworkConfig,
    resolver: R,
}

impl<R: HostResolver> PolicyCompiler<R> {
    pub fn new(network: NetworkConfig, resolver: R) -> Self {
        Self { network, resolver }
    }

    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Compile the policy for `mode`
    ///
    /// Returns `None` for [`NetworkMode::Open`], which is unrestricted. Every
    /// allowlisted hostname must resolve, otherwise the whole compile fails.
    pub async fn compile(&self, mode: NetworkMode) -> Result<Option<NetworkPolicy>> {
        if mode == NetworkMode::Open {
            return Ok(None);
        }

        let allowlist = Allowlist::for_mode(&self.network, mode)?;

        let mut endpoints = Vec::with_capacity(allowlist.hosts.len());
        for (hostname, ports) in &allowlist.hosts {
            let addresses = self.resolve_host(hostname).await?;
            debug!("Resolved {} to {:?}", hostname, addresses);
            endpoints.push(Endpoint {
                hostname: hostname.clone(),
                addresses,
                ports: ports.clone(),
            });
        }

        let ranges = allowlist
            .ranges
            .into_iter()
            .map(|(net, ports)| RangeRule { net, ports })
            .collect();

        let policy = NetworkPolicy {
            mode,
            endpoints,
            ranges,
            disable_web_tools: mode.disables_web_tools(),
            allow_dns: self.network.allow_dns(),
            resolved_at: Utc::now(),
        };

        info!(
            "Compiled {} policy: {} endpoint(s), {} range(s)",
            mode,
            policy.endpoints.len(),
            policy.ranges.len()
        );

        Ok(Some(policy))
    }

    /// Resolve one host, retrying transient failures until the configured
    /// timeout runs out
    async fn resolve_host(&self, host: &str) -> Result<Vec<IpAddr>> {
        let timeout = self.network.resolve_timeout();
        let mut last_error: Option<String> = None;

        let lookup = async {
            loop {
                match self.resolver.resolve(host).await {
                    Ok(addrs) if !addrs.is_empty() => return addrs,
                    Ok(_) => last_error = Some("no addresses returned".to_string()),
                    Err(e) => last_error = Some(e.to_string()),
                }
                debug!("Lookup of {} failed, retrying: {:?}", host, last_error);
                tokio::time::sleep(RETRY_DELAY).await;
            }
        };

        let outcome = tokio::time::timeout(timeout, lookup).await;
        match outcome {
            Ok(mut addrs) => {
                addrs.sort();
                addrs.dedup();
                Ok(addrs)
            }
            Err(_) => Err(PolicyError::Resolution {
                host: host.to_string(),
                reason: match last_error {
                    Some(reason) => format!("{} (gave up after {:?})", reason, timeout),
                    None => format!("timed out after {:?}", timeout),
                },
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{EndpointGroup, ModePolicy};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver answering from a fixed table; unknown hosts fail
    pub(crate) struct StaticResolver {
        pub table: HashMap<String, Vec<IpAddr>>,
        pub calls: AtomicUsize,
        pub failures_before_success: usize,
    }

    impl StaticResolver {
        pub(crate) fn new(entries: &[(&str, &[&str])]) -> Self {
            let table = entries
                .iter()
                .map(|(host, addrs)| {
                    (
                        host.to_string(),
                        addrs.iter().map(|a| a.parse().unwrap()).collect(),
                    )
                })
                .collect();
            Self {
                table,
                calls: AtomicUsize::new(0),
                failures_before_success: 0,
            }
        }
    }

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn resolve(&self, host: &str) -> io::Result<Vec<IpAddr>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(io::Error::new(io::ErrorKind::Other, "temporary failure"));
            }
            self.table
                .get(host)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown host"))
        }
    }

    pub(crate) fn test_network() -> NetworkConfig {
        let mut network = NetworkConfig {
            resolve_timeout_ms: Some(300),
            ..Default::default()
        };
        network.groups.insert(
            "claude".into(),
            EndpointGroup {
                hosts: vec!["api.anthropic.com".into()],
                ..Default::default()
            },
        );
        network.groups.insert(
            "registries".into(),
            EndpointGroup {
                hosts: vec!["pypi.org".into(), "registry.npmjs.org".into()],
                ranges: vec!["140.82.112.0/20".into()],
                ..Default::default()
            },
        );
        network.policies.insert(
            "claude-only".into(),
            ModePolicy {
                description: String::new(),
                allow_groups: vec!["claude".into()],
            },
        );
        network.policies.insert(
            "dev".into(),
            ModePolicy {
                description: String::new(),
                allow_groups: vec!["claude".into(), "registries".into()],
            },
        );
        network
    }

    pub(crate) fn test_resolver() -> StaticResolver {
        StaticResolver::new(&[
            ("api.anthropic.com", &["160.79.104.10", "2607:6bc0::10"]),
            ("pypi.org", &["151.101.0.223", "151.101.64.223", "151.101.0.223"]),
            ("registry.npmjs.org", &["104.16.1.35"]),
        ])
    }

    #[tokio::test]
    async fn test_open_has_no_policy() {
        let compiler = PolicyCompiler::new(test_network(), test_resolver());
        assert!(compiler.compile(NetworkMode::Open).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_none_denies_everything() {
        let compiler = PolicyCompiler::new(test_network(), test_resolver());
        let policy = compiler.compile(NetworkMode::None).await.unwrap().unwrap();
        assert!(policy.endpoints.is_empty());
        assert!(policy.ranges.is_empty());
        assert!(!policy.disable_web_tools);
        assert!(!policy.allows("160.79.104.10".parse().unwrap(), 443));
    }

    #[tokio::test]
    async fn test_claude_only() {
        let compiler = PolicyCompiler::new(test_network(), test_resolver());
        let policy = compiler
            .compile(NetworkMode::ClaudeOnly)
            .await
            .unwrap()
            .unwrap();

        assert!(policy.disable_web_tools);
        assert_eq!(policy.hostnames().collect::<Vec<_>>(), vec!["api.anthropic.com"]);
        assert!(policy.allows("160.79.104.10".parse().unwrap(), 443));
        assert!(policy.allows("2607:6bc0::10".parse().unwrap(), 443));
        assert!(!policy.allows("160.79.104.10".parse().unwrap(), 80));
        assert!(!policy.allows("151.101.0.223".parse().unwrap(), 443));
    }

    #[tokio::test]
    async fn test_claude_only_endpoints_subset_of_dev() {
        let compiler = PolicyCompiler::new(test_network(), test_resolver());
        let claude = compiler
            .compile(NetworkMode::ClaudeOnly)
            .await
            .unwrap()
            .unwrap();
        let dev = compiler.compile(NetworkMode::Dev).await.unwrap().unwrap();

        for endpoint in &claude.endpoints {
            assert!(dev.endpoints.contains(endpoint), "{} missing", endpoint.hostname);
        }
        assert!(dev.disable_web_tools);
        assert!(dev.allows("140.82.114.4".parse().unwrap(), 443));
    }

    #[tokio::test]
    async fn test_addresses_deduplicated() {
        let compiler = PolicyCompiler::new(test_network(), test_resolver());
        let dev = compiler.compile(NetworkMode::Dev).await.unwrap().unwrap();
        let pypi = dev.endpoints.iter().find(|e| e.hostname == "pypi.org").unwrap();
        assert_eq!(pypi.addresses.len(), 2);
    }

    #[tokio::test]
    async fn test_unresolvable_host_fails_whole_compile() {
        let resolver = StaticResolver::new(&[("api.anthropic.com", &["160.79.104.10"])]);
        let compiler = PolicyCompiler::new(test_network(), resolver);

        match compiler.compile(NetworkMode::Dev).await {
            Err(PolicyError::Resolution { host, .. }) => assert_eq!(host, "pypi.org"),
            other => panic!("expected resolution error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mut resolver = test_resolver();
        resolver.failures_before_success = 1;
        let compiler = PolicyCompiler::new(test_network(), resolver);

        let policy = compiler
            .compile(NetworkMode::ClaudeOnly)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(policy.endpoints.len(), 1);
        assert_eq!(compiler.resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_policy_survives_label_encoding() {
        let compiler = PolicyCompiler::new(test_network(), test_resolver());
        let dev = compiler.compile(NetworkMode::Dev).await.unwrap().unwrap();

        let encoded = serde_json::to_string(&dev).unwrap();
        assert!(encoded.contains("\"mode\":\"dev\""));
        let decoded: NetworkPolicy = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, dev);
    }
}
