//! Sandbox lifecycle: run, list, attach, stop, rm and disable-web-tools
//!
//! Every operation validates its input before touching the runtime, and all
//! state is read back from the runtime on each call.

use crate::args::RunArgs;
use crate::claude_settings::{self, SANDBOX_HOME};
use crate::config::{Config, SandboxSettings};
use crate::error::{Result, SandboxError};
use crate::identity;
use crate::labels::ManagementLabels;
use crate::mount::MountPoint;
use crate::registry::Registry;
use crate::runtime::{CreateSpec, RuntimeAdapter, SandboxRecord, SandboxStatus, Signal};
use sandboxer_net::{HostResolver, NetworkMode, PolicyCompiler, SystemResolver};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A validated `run` invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub project_path: PathBuf,
    /// Explicit name; derived from the path when absent
    pub name: Option<String>,
    pub image: String,
    pub network_mode: NetworkMode,
    pub detach: bool,
    pub ports: Vec<u16>,
}

impl RunRequest {
    /// Resolve CLI arguments against configured defaults
    ///
    /// Fails on conflicting network flags; nothing else is checked here.
    pub fn from_args(args: &RunArgs, settings: &SandboxSettings) -> Result<Self> {
        let network_mode =
            NetworkMode::from_flags(args.no_internet, args.only_claude, args.only_dev)?;

        let ports = if args.no_expose_ports || !settings.expose_ports() {
            vec![]
        } else if !args.ports.is_empty() {
            args.ports.clone()
        } else {
            settings.ports()
        };

        Ok(Self {
            project_path: args.path.clone().unwrap_or_else(|| PathBuf::from(".")),
            name: args.name.clone(),
            image: args
                .image
                .clone()
                .unwrap_or_else(|| settings.image().to_string()),
            network_mode,
            detach: args.detach,
            ports,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAction {
    Created,
    Resumed,
    /// Detached run against a sandbox that was already running
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub name: String,
    pub action: RunAction,
    pub network_mode: NetworkMode,
}

/// One row of `list`
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSummary {
    pub id: String,
    pub name: String,
    pub status: SandboxStatus,
    /// `None` when the labels could not be decoded
    pub labels: Option<ManagementLabels>,
}

impl SandboxSummary {
    fn from_record(record: &SandboxRecord) -> Self {
        let labels = match record.management_labels() {
            Ok(labels) => Some(labels),
            Err(e) => {
                warn!("{}", e);
                None
            }
        };
        Self {
            id: record.short_id().to_string(),
            name: record.name.clone(),
            status: record.status(),
            labels,
        }
    }

    pub fn network_mode(&self) -> Option<NetworkMode> {
        self.labels.as_ref().map(|l| l.network_mode)
    }

    pub fn mounted_path(&self) -> Option<&Path> {
        self.labels.as_ref().map(|l| l.mounted_path.as_path())
    }

    /// Allowlisted hostnames in the frozen policy
    pub fn endpoint_count(&self) -> usize {
        self.labels
            .as_ref()
            .and_then(|l| l.policy.as_ref())
            .map_or(0, |p| p.endpoints.len())
    }
}

pub struct Orchestrator<R, H = SystemResolver> {
    runtime: R,
    compiler: PolicyCompiler<H>,
    settings: SandboxSettings,
    stop_timeout: Duration,
}

impl<R: RuntimeAdapter, H: HostResolver> Orchestrator<R, H> {
    pub fn new(runtime: R, resolver: H, config: &Config) -> Self {
        Self {
            runtime,
            compiler: PolicyCompiler::new(config.network.clone(), resolver),
            settings: config.sandbox.clone(),
            stop_timeout: config.runtime.stop_timeout(),
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    fn registry(&self) -> Registry<'_, R> {
        Registry::new(&self.runtime)
    }

    /// `run`: create or resume the sandbox for a project
    pub async fn run(&self, args: &RunArgs) -> Result<RunOutcome> {
        let request = RunRequest::from_args(args, &self.settings)?;
        self.run_request(&request).await
    }

    pub async fn run_request(&self, request: &RunRequest) -> Result<RunOutcome> {
        let project_path = identity::canonicalize(&request.project_path)?;
        let name = match &request.name {
            Some(name) => {
                identity::validate_name(name)?;
                name.clone()
            }
            None => identity::name_for_canonical(&project_path),
        };
        debug!("Sandbox for {} is {}", project_path.display(), name);

        let action = match self.registry().get(&name).await? {
            Some(record) => self.resume(&record, request, &project_path, false).await?,
            None => self.create(&name, request, &project_path).await?,
        };

        if !request.detach {
            self.open_shell(&name).await?;
        }

        Ok(RunOutcome {
            name,
            action,
            network_mode: request.network_mode,
        })
    }

    async fn create(
        &self,
        name: &str,
        request: &RunRequest,
        project_path: &Path,
    ) -> Result<RunAction> {
        let policy = self.compiler.compile(request.network_mode).await?;
        self.runtime.ensure_image(&request.image).await?;

        let ports = if request.network_mode == NetworkMode::None && !request.ports.is_empty() {
            warn!("Port publishing is disabled for sandboxes without network access");
            vec![]
        } else {
            request.ports.clone()
        };

        let labels = ManagementLabels::new(
            project_path.to_path_buf(),
            request.network_mode,
            &request.image,
            policy,
        );
        let spec = CreateSpec::new(name, MountPoint::project(project_path), &labels, ports)?;

        match self.runtime.create(&spec).await {
            Ok(_) => {}
            Err(SandboxError::AlreadyExists { .. }) => {
                info!("Sandbox {} was created concurrently, reusing it", name);
                let record = self.registry().get(name).await?.ok_or_else(|| {
                    // the name belongs to a container we do not manage
                    SandboxError::AlreadyExists {
                        name: name.to_string(),
                    }
                })?;
                return self.resume(&record, request, project_path, true).await;
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.provision(name, &labels).await {
            warn!("Setting up {} failed, removing it", name);
            if let Err(cleanup) = self.runtime.remove(name, true).await {
                warn!("Failed to remove {}: {}", name, cleanup);
            }
            return Err(e);
        }

        Ok(RunAction::Created)
    }

    /// First start of a new sandbox
    async fn provision(&self, name: &str, labels: &ManagementLabels) -> Result<()> {
        self.runtime.start(name).await?;
        self.enforce_network(name, labels).await?;

        if labels.policy.as_ref().is_some_and(|p| p.disable_web_tools) {
            self.write_web_tool_settings(name).await?;
        }
        Ok(())
    }

    /// Reuse an existing sandbox
    ///
    /// `raced` is set when another invocation created it between our lookup
    /// and our `create`; joining a running sandbox is then not an error.
    async fn resume(
        &self,
        record: &SandboxRecord,
        request: &RunRequest,
        project_path: &Path,
        raced: bool,
    ) -> Result<RunAction> {
        let name = record.name.as_str();
        let labels = record.management_labels()?;
        check_matches(name, &labels, request, project_path)?;

        if record.is_running() {
            if !request.detach && !raced {
                return Err(SandboxError::AlreadyRunning {
                    name: name.to_string(),
                    operation: "run",
                });
            }
            self.restore_network(name, &labels).await?;
            info!("Sandbox {} is already running", name);
            return Ok(RunAction::AlreadyRunning);
        }

        self.runtime.start(name).await?;
        self.restore_network(name, &labels).await?;

        info!("Resumed sandbox {}", name);
        Ok(RunAction::Resumed)
    }

    /// Reload the recorded rules into a running sandbox, killing it when
    /// that fails
    ///
    /// Rules do not survive a restart done outside this tool, so every path
    /// that hands out a running sandbox goes through here. `iptables-restore`
    /// replaces the table, so reloading is idempotent.
    async fn restore_network(&self, name: &str, labels: &ManagementLabels) -> Result<()> {
        if let Err(e) = self.enforce_network(name, labels).await {
            warn!("Restoring network rules for {} failed, stopping it", name);
            if let Err(kill) = self.runtime.signal(name, Signal::Kill).await {
                warn!("Failed to stop {}: {}", name, kill);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Load the frozen ruleset into a started sandbox
    ///
    /// `none` sandboxes have no network interface to filter.
    async fn enforce_network(&self, name: &str, labels: &ManagementLabels) -> Result<()> {
        match &labels.policy {
            Some(policy) if policy.mode.is_filtered() => {
                self.runtime
                    .apply_ruleset(name, &labels.image, &policy.ruleset())
                    .await
            }
            _ => Ok(()),
        }
    }

    async fn write_web_tool_settings(&self, name: &str) -> Result<()> {
        let path = claude_settings::settings_path();
        let current = self.runtime.exec(name, &["cat", path.as_str()], None).await?;
        let existing = current.success().then_some(current.stdout.as_str());
        let updated = claude_settings::deny_web_tools(name, existing)?;

        let script = format!("mkdir -p {}/.claude && cat > {}", SANDBOX_HOME, path);
        let output = self
            .runtime
            .exec(name, &["sh", "-c", script.as_str()], Some(updated.as_str()))
            .await?;
        if !output.success() {
            return Err(SandboxError::operation_failed(
                name,
                "disable web tools in",
                output.stderr.trim(),
            ));
        }
        info!("Denied Claude web tools in {}", name);
        Ok(())
    }

    /// `list`: managed sandboxes, optionally only running ones
    pub async fn list(&self, running_only: bool) -> Result<Vec<SandboxSummary>> {
        let records = self.registry().list(running_only).await?;
        Ok(records.iter().map(SandboxSummary::from_record).collect())
    }

    /// `attach`: interactive shell in a running sandbox
    pub async fn attach(&self, name: &str) -> Result<()> {
        let record = self.registry().require_running(name, "attach to").await?;
        self.restore_network(name, &record.management_labels()?).await?;
        self.open_shell(name).await
    }

    async fn open_shell(&self, name: &str) -> Result<()> {
        let code = self.runtime.attach(name).await?;
        debug!("Shell in {} exited with {}", name, code);
        Ok(())
    }

    /// `stop`: SIGTERM, then SIGKILL once `timeout` (or the configured
    /// default) has passed
    pub async fn stop(&self, name: &str, timeout: Option<Duration>) -> Result<()> {
        self.registry().require_running(name, "stop").await?;
        self.runtime
            .stop(name, timeout.unwrap_or(self.stop_timeout))
            .await?;
        info!("Stopped sandbox {}", name);
        Ok(())
    }

    /// `rm`: a running sandbox is only removed with `force`
    pub async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let record = self.registry().require(name).await?;
        if record.is_running() && !force {
            return Err(SandboxError::AlreadyRunning {
                name: name.to_string(),
                operation: "remove",
            });
        }
        self.runtime.remove(name, force).await?;
        info!("Removed sandbox {}", name);
        Ok(())
    }

    /// `disable-web-tools`: deny Claude's web tools in a running sandbox
    pub async fn disable_web_tools(&self, name: &str) -> Result<()> {
        self.registry()
            .require_running(name, "disable web tools in")
            .await?;
        self.write_web_tool_settings(name).await
    }
}

/// An existing sandbox is only reused for the exact same request
fn check_matches(
    name: &str,
    labels: &ManagementLabels,
    request: &RunRequest,
    project_path: &Path,
) -> Result<()> {
    let mismatch = |field: &'static str, recorded: String, requested: String| {
        SandboxError::ConfigurationMismatch {
            name: name.to_string(),
            field,
            recorded,
            requested,
        }
    };

    if labels.mounted_path != project_path {
        return Err(mismatch(
            "project path",
            labels.mounted_path.display().to_string(),
            project_path.display().to_string(),
        ));
    }
    if labels.network_mode != request.network_mode {
        return Err(mismatch(
            "network mode",
            labels.network_mode.to_string(),
            request.network_mode.to_string(),
        ));
    }
    if labels.image != request.image {
        return Err(mismatch("image", labels.image.clone(), request.image.clone()));
    }
    Ok(())
}
