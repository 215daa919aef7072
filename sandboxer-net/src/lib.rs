//! Egress network policy for sandboxer containers
//!
//! Turns a requested [`NetworkMode`] into a frozen, resolved allowlist and
//! renders it as an iptables ruleset the container runtime can load.

pub mod config;
pub mod error;
pub mod mode;
pub mod policy;

// Re-export commonly used types
pub use config::{EndpointGroup, ModePolicy, NetworkConfig};
pub use error::{PolicyError, Result, ValidationError};
pub use mode::NetworkMode;
pub use policy::{
    Endpoint, HostResolver, NetworkPolicy, PolicyCompiler, RangeRule, Ruleset, SystemResolver,
};
