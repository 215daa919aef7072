//! Boundary to the external container runtime
//!
//! [`RuntimeAdapter`] is the only place sandboxer talks to podman or docker.
//! [`CliRuntime`] drives the engine CLI; tests use an in-memory fake.

pub mod cli;
pub mod engine;
#[cfg(test)]
pub(crate) mod fake;

pub use cli::CliRuntime;
pub use engine::Engine;

use crate::error::{Result, SandboxError};
use crate::labels::{self, ManagementLabels};
use crate::mount::MountPoint;
use async_trait::async_trait;
use sandboxer_net::{NetworkMode, Ruleset};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// How often `stop` checks whether the sandbox has exited
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long `stop` waits after SIGKILL before giving up
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of a sandbox as derived from the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxStatus {
    Running,
    Stopped,
    Absent,
}

impl SandboxStatus {
    /// Map a runtime-reported state string
    ///
    /// Anything that is not actively running (`created`, `exited`, `dead`,
    /// ...) counts as stopped.
    pub fn from_runtime_state(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "running" | "paused" | "restarting" => SandboxStatus::Running,
            _ => SandboxStatus::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Running => "running",
            SandboxStatus::Stopped => "stopped",
            SandboxStatus::Absent => "absent",
        }
    }
}

impl fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed container as reported by the runtime
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxRecord {
    pub id: String,
    pub name: String,
    /// Raw runtime state (`running`, `exited`, ...)
    pub state: String,
    pub labels: BTreeMap<String, String>,
}

impl SandboxRecord {
    pub fn status(&self) -> SandboxStatus {
        SandboxStatus::from_runtime_state(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.status() == SandboxStatus::Running
    }

    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }

    pub fn management_labels(&self) -> Result<ManagementLabels> {
        ManagementLabels::from_map(&self.name, &self.labels)
    }
}

/// Everything needed to create a sandbox container
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub name: String,
    pub image: String,
    pub mount: MountPoint,
    pub network_mode: NetworkMode,
    pub labels: BTreeMap<String, String>,
    /// Host ports published one-to-one
    pub ports: Vec<u16>,
}

impl CreateSpec {
    pub fn new(
        name: impl Into<String>,
        mount: MountPoint,
        labels: &ManagementLabels,
        ports: Vec<u16>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            image: labels.image.clone(),
            mount,
            network_mode: labels.network_mode,
            labels: labels.to_map()?,
            ports,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Term => "TERM",
            Signal::Kill => "KILL",
        }
    }
}

/// Result of a non-interactive command run inside a sandbox
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Operations sandboxer needs from a container runtime
///
/// `inspect` and `list_managed` only ever report containers carrying the
/// management label; anything else is treated as absent.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    /// Create (but do not start) a container, returning its id
    ///
    /// Fails with [`SandboxError::AlreadyExists`] if the name is taken.
    async fn create(&self, spec: &CreateSpec) -> Result<String>;

    async fn inspect(&self, name: &str) -> Result<Option<SandboxRecord>>;

    async fn list_managed(&self) -> Result<Vec<SandboxRecord>>;

    async fn start(&self, name: &str) -> Result<()>;

    async fn signal(&self, name: &str, signal: Signal) -> Result<()>;

    async fn remove(&self, name: &str, force: bool) -> Result<()>;

    /// Interactive shell in a running sandbox; returns the shell's exit code
    async fn attach(&self, name: &str) -> Result<i32>;

    async fn exec(&self, name: &str, argv: &[&str], stdin: Option<&str>) -> Result<ExecOutput>;

    /// Pull `image` unless it is already present locally
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Load egress rules into the sandbox's network namespace from outside
    async fn apply_ruleset(&self, name: &str, image: &str, ruleset: &Ruleset) -> Result<()>;

    /// Graceful stop: SIGTERM, wait up to `timeout`, then SIGKILL and wait
    /// up to [`KILL_GRACE`]
    async fn stop(&self, name: &str, timeout: Duration) -> Result<()> {
        send_signal(self, name, Signal::Term).await?;
        if wait_until_stopped(self, name, timeout).await? {
            debug!("{} stopped after SIGTERM", name);
            return Ok(());
        }

        warn!(
            "Sandbox {} did not stop within {:?}, sending SIGKILL",
            name, timeout
        );
        send_signal(self, name, Signal::Kill).await?;
        if wait_until_stopped(self, name, KILL_GRACE).await? {
            return Ok(());
        }

        Err(SandboxError::operation_failed(
            name,
            "stop",
            format!("still running {:?} after SIGKILL", KILL_GRACE),
        ))
    }
}

/// Signal a sandbox, tolerating it having exited in the meantime
async fn send_signal<R: RuntimeAdapter + ?Sized>(
    runtime: &R,
    name: &str,
    signal: Signal,
) -> Result<()> {
    match runtime.signal(name, signal).await {
        Err(SandboxError::NotRunning { .. }) => Ok(()),
        other => other,
    }
}

/// Poll until the sandbox is no longer running; false if `within` elapsed
async fn wait_until_stopped<R: RuntimeAdapter + ?Sized>(
    runtime: &R,
    name: &str,
    within: Duration,
) -> Result<bool> {
    let deadline = Instant::now() + within;
    loop {
        match runtime.inspect(name).await? {
            Some(record) if record.is_running() => {}
            _ => return Ok(true),
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(STOP_POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// Keep only records that carry the management label
pub(crate) fn managed_only(records: Vec<SandboxRecord>) -> Vec<SandboxRecord> {
    records
        .into_iter()
        .filter(|r| labels::is_managed(&r.labels))
        .collect()
}
