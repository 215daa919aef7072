//! Endpoint group configuration for network policies

pub mod allowlist;
pub mod schema;
pub mod validator;

pub use allowlist::Allowlist;
pub use schema::{EndpointGroup, ModePolicy, NetworkConfig};
pub use validator::ConfigValidator;
