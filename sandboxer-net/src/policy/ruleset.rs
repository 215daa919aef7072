//! Rendering of a policy into iptables-restore input

use super::NetworkPolicy;
use std::net::IpAddr;

/// Egress rules for both address families, in `iptables-restore` format
///
/// Both documents are default-deny: anything not explicitly accepted is
/// rejected, so a policy with no endpoints blocks all egress except
/// loopback (and DNS when allowed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
    pub ipv4: String,
    pub ipv6: String,
}

#[derive(Clone, Copy, PartialEq)]
enum Family {
    V4,
    V6,
}

impl Family {
    fn matches(self, addr: &IpAddr) -> bool {
        matches!(
            (self, addr),
            (Family::V4, IpAddr::V4(_)) | (Family::V6, IpAddr::V6(_))
        )
    }

    fn host_prefix(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }
}

impl Ruleset {
    pub fn from_policy(policy: &NetworkPolicy) -> Self {
        Self {
            ipv4: render(policy, Family::V4),
            ipv6: render(policy, Family::V6),
        }
    }

    /// Number of destination rules across both families (loopback,
    /// conntrack and DNS rules excluded)
    pub fn destination_rule_count(&self) -> usize {
        [&self.ipv4, &self.ipv6]
            .iter()
            .flat_map(|doc| doc.lines())
            .filter(|line| line.starts_with("-A OUTPUT -d "))
            .count()
    }
}

fn render(policy: &NetworkPolicy, family: Family) -> String {
    let mut lines = vec![
        "*filter".to_string(),
        ":INPUT ACCEPT [0:0]".to_string(),
        ":FORWARD DROP [0:0]".to_string(),
        ":OUTPUT DROP [0:0]".to_string(),
        "-A OUTPUT -o lo -j ACCEPT".to_string(),
        "-A OUTPUT -m conntrack --ctstate ESTABLISHED,RELATED -j ACCEPT".to_string(),
    ];

    if policy.allow_dns {
        for proto in ["udp", "tcp"] {
            lines.push(format!(
                "-A OUTPUT -p {proto} -m {proto} --dport 53 -j ACCEPT"
            ));
        }
    }

    for endpoint in &policy.endpoints {
        for addr in endpoint.addresses.iter().filter(|a| family.matches(a)) {
            for port in &endpoint.ports {
                lines.push(format!(
                    "-A OUTPUT -d {}/{} -p tcp -m tcp --dport {} -m comment --comment \"{}\" -j ACCEPT",
                    addr,
                    family.host_prefix(),
                    port,
                    endpoint.hostname
                ));
            }
        }
    }

    for range in &policy.ranges {
        if !family.matches(&range.net.addr()) {
            continue;
        }
        for port in &range.ports {
            lines.push(format!(
                "-A OUTPUT -d {} -p tcp -m tcp --dport {} -j ACCEPT",
                range.net, port
            ));
        }
    }

    lines.push("-A OUTPUT -j REJECT".to_string());
    lines.push("COMMIT".to_string());

    let mut doc = lines.join("\n");
    doc.push('\n');
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::NetworkMode;
    use crate::policy::tests::{test_network, test_resolver};
    use crate::policy::PolicyCompiler;

    #[tokio::test]
    async fn test_none_has_no_destinations() {
        let compiler = PolicyCompiler::new(test_network(), test_resolver());
        let policy = compiler.compile(NetworkMode::None).await.unwrap().unwrap();
        let ruleset = policy.ruleset();

        assert_eq!(ruleset.destination_rule_count(), 0);
        assert!(ruleset.ipv4.contains(":OUTPUT DROP [0:0]"));
        assert!(ruleset.ipv4.ends_with("-A OUTPUT -j REJECT\nCOMMIT\n"));
        assert!(ruleset.ipv6.ends_with("-A OUTPUT -j REJECT\nCOMMIT\n"));
    }

    #[tokio::test]
    async fn test_addresses_split_by_family() {
        let compiler = PolicyCompiler::new(test_network(), test_resolver());
        let policy = compiler
            .compile(NetworkMode::ClaudeOnly)
            .await
            .unwrap()
            .unwrap();
        let ruleset = policy.ruleset();

        assert!(ruleset.ipv4.contains(
            "-A OUTPUT -d 160.79.104.10/32 -p tcp -m tcp --dport 443 -m comment --comment \"api.anthropic.com\" -j ACCEPT"
        ));
        assert!(!ruleset.ipv4.contains("2607:6bc0::10"));
        assert!(ruleset.ipv6.contains("-A OUTPUT -d 2607:6bc0::10/128 -p tcp"));
        assert_eq!(ruleset.destination_rule_count(), 2);
    }

    #[tokio::test]
    async fn test_dns_rules_follow_policy() {
        let compiler = PolicyCompiler::new(test_network(), test_resolver());
        let mut policy = compiler.compile(NetworkMode::Dev).await.unwrap().unwrap();
        assert!(policy.ruleset().ipv4.contains("--dport 53"));

        policy.allow_dns = false;
        let ruleset = policy.ruleset();
        assert!(!ruleset.ipv4.contains("--dport 53"));
        assert!(ruleset
            .ipv4
            .contains("-A OUTPUT -d 140.82.112.0/20 -p tcp -m tcp --dport 443 -j ACCEPT"));
    }

    #[tokio::test]
    async fn test_accepts_precede_final_reject() {
        let compiler = PolicyCompiler::new(test_network(), test_resolver());
        let policy = compiler.compile(NetworkMode::Dev).await.unwrap().unwrap();
        let ruleset = policy.ruleset();

        let lines: Vec<&str> = ruleset.ipv4.lines().collect();
        let reject = lines.iter().position(|l| *l == "-A OUTPUT -j REJECT").unwrap();
        let last_accept = lines.iter().rposition(|l| l.ends_with("-j ACCEPT")).unwrap();
        assert!(last_accept < reject);
    }
}
