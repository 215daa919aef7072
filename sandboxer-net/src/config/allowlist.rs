//! Expansion of a mode's policy into a flat, unresolved allowlist

use super::schema::{EndpointGroup, NetworkConfig};
use crate::error::{PolicyError, Result, ValidationError};
use crate::mode::NetworkMode;
use indexmap::IndexMap;
use ipnet::IpNet;
use std::collections::HashSet;

/// Hostnames and static ranges a mode may reach, each with its ports
///
/// Insertion order follows the order groups are listed in the policy, so the
/// compiled rules are stable across runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allowlist {
    pub hosts: IndexMap<String, Vec<u16>>,
    pub ranges: IndexMap<IpNet, Vec<u16>>,
}

impl Allowlist {
    /// Build the allowlist for `mode`
    ///
    /// `open` and `none` have nothing to expand and yield an empty list.
    pub fn for_mode(network: &NetworkConfig, mode: NetworkMode) -> Result<Self> {
        let mut allowlist = Allowlist::default();
        if !mode.is_filtered() {
            return Ok(allowlist);
        }

        let policy = network
            .policy_for(mode)
            .ok_or(PolicyError::PolicyNotFound { mode })?;

        let mut processed = HashSet::new();
        for group_name in &policy.allow_groups {
            allowlist.expand_group(group_name, network, &mut processed)?;
        }

        Ok(allowlist)
    }

    /// Build the allowlist for an explicit set of groups
    pub fn for_groups(network: &NetworkConfig, groups: &[&str]) -> Result<Self> {
        let mut allowlist = Allowlist::default();
        let mut processed = HashSet::new();
        for group_name in groups {
            allowlist.expand_group(group_name, network, &mut processed)?;
        }
        Ok(allowlist)
    }

    /// Recursively expand a group and add its hosts and ranges
    fn expand_group(
        &mut self,
        group_name: &str,
        network: &NetworkConfig,
        processed: &mut HashSet<String>,
    ) -> Result<()> {
        // Groups form a DAG; each is only added once
        if !processed.insert(group_name.to_string()) {
            return Ok(());
        }

        let group: &EndpointGroup =
            network
                .groups
                .get(group_name)
                .ok_or_else(|| PolicyError::GroupNotFound {
                    group: group_name.to_string(),
                })?;

        for host in &group.hosts {
            let ports = self.hosts.entry(host.to_ascii_lowercase()).or_default();
            merge_ports(ports, &group.ports);
        }

        for range in &group.ranges {
            let net = range
                .parse::<IpNet>()
                .map_err(|_| ValidationError::InvalidCidr {
                    cidr: range.clone(),
                })?;
            let ports = self.ranges.entry(net.trunc()).or_default();
            merge_ports(ports, &group.ports);
        }

        for child in &group.groups {
            self.expand_group(child, network, processed)?;
        }

        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.ranges.is_empty()
    }

    /// True if every host and range here, with every port, is also allowed by `other`
    pub fn is_subset_of(&self, other: &Allowlist) -> bool {
        self.first_uncovered(other).is_none()
    }

    /// The first host or range allowed here but not (on every port) by `other`
    pub fn first_uncovered(&self, other: &Allowlist) -> Option<String> {
        let covers = |theirs: Option<&Vec<u16>>, ports: &[u16]| {
            theirs.is_some_and(|theirs| ports.iter().all(|p| theirs.contains(p)))
        };

        self.hosts
            .iter()
            .find(|(host, ports)| !covers(other.hosts.get(*host), ports))
            .map(|(host, _)| host.clone())
            .or_else(|| {
                self.ranges
                    .iter()
                    .find(|(net, ports)| !covers(other.ranges.get(*net), ports))
                    .map(|(net, _)| net.to_string())
            })
    }
}

fn merge_ports(into: &mut Vec<u16>, ports: &[u16]) {
    into.extend_from_slice(ports);
    into.sort_unstable();
    into.dedup();
}
