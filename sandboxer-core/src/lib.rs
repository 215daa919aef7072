//! Core library for sandboxer
//!
//! Derives sandbox identities from project paths, drives podman or docker
//! through [`RuntimeAdapter`], and implements the sandbox lifecycle on top of
//! runtime labels alone.

pub mod args;
pub mod claude_settings;
pub mod config;
pub mod error;
pub mod identity;
pub mod labels;
pub mod mount;
pub mod orchestrator;
pub mod registry;
pub mod runtime;

pub use args::{GlobalArgs, RemoveArgs, RunArgs, StopArgs};
pub use config::{Config, ConfigLoader};
pub use error::{exit_code, Result, SandboxError};
pub use labels::ManagementLabels;
pub use orchestrator::{Orchestrator, RunAction, RunOutcome, RunRequest, SandboxSummary};
pub use registry::Registry;
pub use runtime::{CliRuntime, Engine, RuntimeAdapter, SandboxRecord, SandboxStatus};
