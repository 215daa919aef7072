//! Configuration validation including cycle detection

use super::allowlist::Allowlist;
use super::schema::{EndpointGroup, NetworkConfig};
use crate::error::{Result, ValidationError};
use crate::mode::NetworkMode;
use indexmap::IndexMap;
use ipnet::IpNet;
use std::collections::HashSet;

/// Group every filtered mode must include
pub const CLAUDE_GROUP: &str = "claude";

pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate entire network configuration
    pub fn validate(network: &NetworkConfig) -> Result<()> {
        Self::check_cycles(network)?;
        Self::validate_references(network)?;
        Self::validate_entries(network)?;
        Self::validate_mode_invariants(network)?;
        Ok(())
    }

    /// Check for cycles in group references using DFS
    fn check_cycles(network: &NetworkConfig) -> Result<()> {
        for group_name in network.groups.keys() {
            let mut visited = HashSet::new();
            let mut path = Vec::new();
            Self::dfs_cycle_check(group_name, &network.groups, &mut visited, &mut path)?;
        }
        Ok(())
    }

    fn dfs_cycle_check(
        group_name: &str,
        groups: &IndexMap<String, EndpointGroup>,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Result<()> {
        if path.iter().any(|p| p == group_name) {
            path.push(group_name.to_string());
            return Err(ValidationError::CycleDetected {
                path: path.join(" -> "),
            }
            .into());
        }

        if visited.contains(group_name) {
            return Ok(());
        }

        visited.insert(group_name.to_string());
        path.push(group_name.to_string());

        if let Some(group) = groups.get(group_name) {
            for child in &group.groups {
                Self::dfs_cycle_check(child, groups, visited, path)?;
            }
        }

        path.pop();
        Ok(())
    }

    /// Validate that all group references exist
    fn validate_references(network: &NetworkConfig) -> Result<()> {
        for (group_name, group) in &network.groups {
            for ref_name in &group.groups {
                if !network.groups.contains_key(ref_name) {
                    return Err(ValidationError::UnknownGroup {
                        group: format!("{} -> {}", group_name, ref_name),
                    }
                    .into());
                }
            }
        }

        for (policy_name, policy) in &network.policies {
            for ref_name in &policy.allow_groups {
                if !network.groups.contains_key(ref_name) {
                    return Err(ValidationError::UnknownGroup {
                        group: format!("policy {} -> {}", policy_name, ref_name),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }

    /// Hosts must be plain DNS names: they are resolved once, so wildcards
    /// cannot be expressed
    fn validate_entries(network: &NetworkConfig) -> Result<()> {
        for (group_name, group) in &network.groups {
            for host in &group.hosts {
                if !is_valid_hostname(host) {
                    return Err(ValidationError::InvalidHost {
                        host: format!("{} in group {}", host, group_name),
                    }
                    .into());
                }
            }

            for range in &group.ranges {
                if range.parse::<IpNet>().is_err() {
                    return Err(ValidationError::InvalidCidr {
                        cidr: format!("{} in group {}", range, group_name),
                    }
                    .into());
                }
            }

            let has_entries = !group.hosts.is_empty() || !group.ranges.is_empty();
            if has_entries && (group.ports.is_empty() || group.ports.contains(&0)) {
                return Err(ValidationError::NoPorts {
                    group: group_name.clone(),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Every filtered mode reaches the Claude API, and `dev` only ever widens
    /// `claude-only`
    fn validate_mode_invariants(network: &NetworkConfig) -> Result<()> {
        let required = if network.groups.contains_key(CLAUDE_GROUP) {
            Allowlist::for_groups(network, &[CLAUDE_GROUP])?
        } else {
            Allowlist::default()
        };

        let mut compiled = Vec::new();
        for mode in [NetworkMode::ClaudeOnly, NetworkMode::Dev] {
            if network.policy_for(mode).is_none() {
                continue;
            }
            let allowlist = Allowlist::for_mode(network, mode)?;
            let missing = if required.is_empty() {
                Some(format!("the {} group", CLAUDE_GROUP))
            } else {
                required.first_uncovered(&allowlist)
            };
            if let Some(host) = missing {
                return Err(ValidationError::MissingEndpoint {
                    policy: mode.to_string(),
                    host,
                }
                .into());
            }
            compiled.push(allowlist);
        }

        if let [claude_only, dev] = compiled.as_slice() {
            if let Some(host) = claude_only.first_uncovered(dev) {
                return Err(ValidationError::MissingEndpoint {
                    policy: NetworkMode::Dev.to_string(),
                    host,
                }
                .into());
            }
        }

        Ok(())
    }
}

fn is_valid_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ModePolicy;
    use crate::error::PolicyError;

    fn group(hosts: &[&str], children: &[&str]) -> EndpointGroup {
        EndpointGroup {
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            groups: children.iter().map(|g| g.to_string()).collect(),
            ..Default::default()
        }
    }

    fn policy(groups: &[&str]) -> ModePolicy {
        ModePolicy {
            description: String::new(),
            allow_groups: groups.iter().map(|g| g.to_string()).collect(),
        }
    }

    fn valid_network() -> NetworkConfig {
        let mut network = NetworkConfig::default();
        network
            .groups
            .insert("claude".into(), group(&["api.anthropic.com"], &[]));
        network
            .groups
            .insert("python".into(), group(&["pypi.org"], &[]));
        network
            .policies
            .insert("claude-only".into(), policy(&["claude"]));
        network
            .policies
            .insert("dev".into(), policy(&["claude", "python"]));
        network
    }

    fn validation_error(network: &NetworkConfig) -> ValidationError {
        match ConfigValidator::validate(network) {
            Err(PolicyError::Validation(e)) => e,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(ConfigValidator::validate(&valid_network()).is_ok());
    }

    #[test]
    fn test_no_cycle() {
        let mut network = NetworkConfig::default();
        network.groups.insert("a".into(), group(&[], &["b"]));
        network.groups.insert("b".into(), group(&[], &[]));
        assert!(ConfigValidator::check_cycles(&network).is_ok());
    }

    #[test]
    fn test_detect_cycle() {
        let mut network = NetworkConfig::default();
        network.groups.insert("a".into(), group(&[], &["b"]));
        network.groups.insert("b".into(), group(&[], &["a"]));
        assert!(ConfigValidator::check_cycles(&network).is_err());
    }

    #[test]
    fn test_unknown_reference() {
        let mut network = valid_network();
        network
            .policies
            .insert("dev".into(), policy(&["claude", "rubygems"]));
        assert!(matches!(
            validation_error(&network),
            ValidationError::UnknownGroup { .. }
        ));
    }

    #[test]
    fn test_wildcard_host_rejected() {
        let mut network = valid_network();
        network
            .groups
            .insert("python".into(), group(&["*.pythonhosted.org"], &[]));
        assert!(matches!(
            validation_error(&network),
            ValidationError::InvalidHost { .. }
        ));
    }

    #[test]
    fn test_bad_cidr_rejected() {
        let mut network = valid_network();
        network.groups.insert(
            "internal".into(),
            EndpointGroup {
                ranges: vec!["10.0.0.0/33".into()],
                ..Default::default()
            },
        );
        assert!(matches!(
            validation_error(&network),
            ValidationError::InvalidCidr { .. }
        ));
    }

    #[test]
    fn test_dev_must_include_claude() {
        let mut network = valid_network();
        network.policies.insert("dev".into(), policy(&["python"]));
        assert!(matches!(
            validation_error(&network),
            ValidationError::MissingEndpoint { .. }
        ));
    }

    #[test]
    fn test_claude_only_must_be_subset_of_dev() {
        let mut network = valid_network();
        network
            .groups
            .insert("extra".into(), group(&["console.anthropic.com"], &[]));
        network
            .policies
            .insert("claude-only".into(), policy(&["claude", "extra"]));
        match validation_error(&network) {
            ValidationError::MissingEndpoint { policy, host } => {
                assert_eq!(policy, "dev");
                assert_eq!(host, "console.anthropic.com");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_hostname_rules() {
        assert!(is_valid_hostname("api.anthropic.com"));
        assert!(is_valid_hostname("files-1.pythonhosted.org"));
        assert!(!is_valid_hostname(""));
        assert!(!is_valid_hostname("-bad.example.com"));
        assert!(!is_valid_hostname("a..b"));
        assert!(!is_valid_hostname("api.anthropic.com:443"));
    }
}
