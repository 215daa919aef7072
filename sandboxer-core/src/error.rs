//! Error types for sandbox operations

use sandboxer_net::PolicyError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SandboxError>;

/// Process exit codes, one per failure category
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const INVALID_INPUT: i32 = 2;
    pub const POLICY_RESOLUTION: i32 = 3;
    pub const RUNTIME_UNAVAILABLE: i32 = 4;
    pub const NOT_FOUND: i32 = 5;
    pub const STATE_MISMATCH: i32 = 6;
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Invalid project path {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("Invalid sandbox name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Container runtime {runtime} is unavailable: {reason}")]
    RuntimeUnavailable { runtime: String, reason: String },

    #[error("Sandbox not found: {name}")]
    NotFound { name: String },

    #[error("A container named {name} already exists")]
    AlreadyExists { name: String },

    #[error("Cannot {operation} sandbox {name}: it is running")]
    AlreadyRunning {
        name: String,
        operation: &'static str,
    },

    #[error("Cannot {operation} sandbox {name}: it is not running")]
    NotRunning {
        name: String,
        operation: &'static str,
    },

    #[error(
        "Sandbox {name} was created with {field} {recorded}, but {requested} was requested \
         (remove it to change settings)"
    )]
    ConfigurationMismatch {
        name: String,
        field: &'static str,
        recorded: String,
        requested: String,
    },

    #[error("Sandbox {name} has unreadable management labels: {reason}")]
    InvalidLabels { name: String, reason: String },

    #[error("Failed to {operation} sandbox {name}: {message}")]
    RuntimeOperationFailed {
        name: String,
        operation: &'static str,
        message: String,
    },

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SandboxError {
    pub(crate) fn operation_failed(
        name: &str,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        SandboxError::RuntimeOperationFailed {
            name: name.to_string(),
            operation,
            message: message.into(),
        }
    }

    /// Exit code for the category this error belongs to
    pub fn exit_code(&self) -> i32 {
        match self {
            SandboxError::InvalidPath { .. }
            | SandboxError::InvalidName { .. }
            | SandboxError::ConfigLoad { .. }
            | SandboxError::ConfigParse(_) => exit_code::INVALID_INPUT,
            SandboxError::Policy(PolicyError::Resolution { .. }) => exit_code::POLICY_RESOLUTION,
            SandboxError::Policy(_) => exit_code::INVALID_INPUT,
            SandboxError::RuntimeUnavailable { .. } => exit_code::RUNTIME_UNAVAILABLE,
            SandboxError::NotFound { .. } => exit_code::NOT_FOUND,
            SandboxError::AlreadyRunning { .. }
            | SandboxError::NotRunning { .. }
            | SandboxError::ConfigurationMismatch { .. } => exit_code::STATE_MISMATCH,
            SandboxError::AlreadyExists { .. }
            | SandboxError::InvalidLabels { .. }
            | SandboxError::RuntimeOperationFailed { .. }
            | SandboxError::Io(_) => exit_code::FAILURE,
        }
    }
}
