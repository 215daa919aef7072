//! Error types for network policy operations

use crate::mode::NetworkMode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflicting network modes requested: {}", format_modes(.requested))]
    ConflictingNetworkMode { requested: Vec<NetworkMode> },

    #[error("Failed to resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    #[error("No network policy configured for mode: {mode}")]
    PolicyNotFound { mode: NetworkMode },

    #[error("Group not found: {group}")]
    GroupNotFound { group: String },

    #[error("Unknown network mode: {0}")]
    UnknownMode(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Cycle detected in group references: {path}")]
    CycleDetected { path: String },

    #[error("Unknown group reference: {group}")]
    UnknownGroup { group: String },

    #[error("Invalid CIDR notation: {cidr}")]
    InvalidCidr { cidr: String },

    #[error("Invalid hostname: {host}")]
    InvalidHost { host: String },

    #[error("Group {group} allows no ports")]
    NoPorts { group: String },

    #[error("Policy {policy} must allow {host}")]
    MissingEndpoint { policy: String, host: String },
}

fn format_modes(modes: &[NetworkMode]) -> String {
    modes
        .iter()
        .map(|m| m.flag())
        .collect::<Vec<_>>()
        .join(", ")
}
