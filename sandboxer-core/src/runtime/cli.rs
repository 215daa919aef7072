//! Runtime adapter driving the podman or docker CLI

use super::{managed_only, CreateSpec, Engine, ExecOutput, RuntimeAdapter, SandboxRecord, Signal};
use crate::error::{Result, SandboxError};
use crate::labels;
use crate::mount;
use async_trait::async_trait;
use sandboxer_net::{NetworkMode, Ruleset};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Capabilities a filtered sandbox must not hold, or it could rewrite its
/// own egress rules
const DROPPED_CAPS: [&str; 2] = ["NET_ADMIN", "NET_RAW"];

/// Container runtime driven through its command-line interface
#[derive(Debug, Clone)]
pub struct CliRuntime {
    engine: Engine,
    binary: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    name: String,
    state: InspectState,
    #[serde(default)]
    config: InspectConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

impl From<InspectEntry> for SandboxRecord {
    fn from(entry: InspectEntry) -> Self {
        SandboxRecord {
            id: entry.id,
            // docker reports names with a leading slash
            name: entry.name.trim_start_matches('/').to_string(),
            state: entry.state.status,
            labels: entry.config.labels.unwrap_or_default(),
        }
    }
}

impl CliRuntime {
    pub fn new(engine: Engine, binary: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            binary: binary.into(),
        }
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        debug!("Running {} {:?}", self.binary.display(), args);
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.kill_on_drop(true);
        cmd
    }

    /// Run a command to completion, capturing its output
    async fn output<I, S>(&self, name: &str, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.command(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(name, e))
    }

    /// Run a command that must succeed, returning its trimmed stdout
    async fn checked<I, S>(&self, name: &str, operation: &'static str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let output = self.output(name, args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(self.classify(name, operation, &output.stderr))
        }
    }

    fn spawn_error(&self, name: &str, e: std::io::Error) -> SandboxError {
        if e.kind() == std::io::ErrorKind::NotFound {
            SandboxError::RuntimeUnavailable {
                runtime: self.binary.display().to_string(),
                reason: "executable not found".to_string(),
            }
        } else {
            SandboxError::operation_failed(name, "invoke runtime for", e.to_string())
        }
    }

    /// Map runtime stderr to the error taxonomy
    fn classify(&self, name: &str, operation: &'static str, stderr: &[u8]) -> SandboxError {
        let message = String::from_utf8_lossy(stderr).trim().to_string();
        let lower = message.to_ascii_lowercase();

        if lower.contains("no such container")
            || lower.contains("no such object")
            || lower.contains("no container with name")
        {
            SandboxError::NotFound {
                name: name.to_string(),
            }
        } else if lower.contains("already in use") || lower.contains("already exists") {
            SandboxError::AlreadyExists {
                name: name.to_string(),
            }
        } else if lower.contains("is not running")
            || lower.contains("can only kill running")
            || lower.contains("state improper")
        {
            SandboxError::NotRunning {
                name: name.to_string(),
                operation,
            }
        } else if lower.contains("cannot connect")
            || lower.contains("is the docker daemon running")
            || lower.contains("unable to connect to podman")
        {
            SandboxError::RuntimeUnavailable {
                runtime: self.engine.to_string(),
                reason: message,
            }
        } else {
            SandboxError::operation_failed(name, operation, message)
        }
    }

    /// Arguments for `create`, excluding the binary itself
    pub(crate) fn create_args(&self, spec: &CreateSpec) -> Result<Vec<OsString>> {
        let mut args: Vec<OsString> = vec![
            "create".into(),
            "--init".into(),
            "--name".into(),
            spec.name.clone().into(),
            "--hostname".into(),
            spec.name.clone().into(),
        ];

        for (key, value) in &spec.labels {
            args.push("--label".into());
            args.push(format!("{}={}", key, value).into());
        }

        args.extend(spec.mount.to_args());
        args.push("-w".into());
        args.push(spec.mount.target.clone().into());

        if self.engine.keeps_host_identity() {
            args.push("--userns=keep-id".into());
        } else {
            let (uid, gid) = mount::owner(&spec.mount.source).map_err(|e| {
                SandboxError::InvalidPath {
                    path: spec.mount.source.clone(),
                    reason: format!("cannot read owner: {}", e),
                }
            })?;
            args.push("--user".into());
            args.push(format!("{}:{}", uid, gid).into());
        }

        if spec.network_mode == NetworkMode::None {
            args.push("--network=none".into());
        }
        if spec.network_mode != NetworkMode::Open {
            for cap in DROPPED_CAPS {
                args.push("--cap-drop".into());
                args.push(cap.into());
            }
        }

        for port in &spec.ports {
            args.push("-p".into());
            args.push(format!("{}:{}", port, port).into());
        }

        args.push(spec.image.clone().into());
        args.push("sleep".into());
        args.push("infinity".into());
        Ok(args)
    }

    /// Feed one ruleset document to `restore_cmd` in a helper container that
    /// shares only the sandbox's network namespace
    async fn restore_rules(
        &self,
        name: &str,
        image: &str,
        restore_cmd: &str,
        rules: &str,
    ) -> Result<()> {
        let network = format!("container:{}", name);
        let mut args: Vec<&str> = vec!["run", "--rm", "-i", "--network", network.as_str()];
        for cap in DROPPED_CAPS {
            args.extend(["--cap-add", cap]);
        }
        args.extend(["--user", "root", "--entrypoint", restore_cmd, image]);

        let output = self
            .exec_with_stdin(name, self.command(args), Some(rules))
            .await?;
        if !output.success() {
            return Err(SandboxError::operation_failed(
                name,
                "apply network rules to",
                format!("{} failed: {}", restore_cmd, output.stderr.trim()),
            ));
        }
        Ok(())
    }

    async fn exec_with_stdin(
        &self,
        name: &str,
        mut cmd: Command,
        stdin: Option<&str>,
    ) -> Result<ExecOutput> {
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(name, e))?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            // dropping closes the pipe so the reader sees EOF
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        Ok(ExecOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl RuntimeAdapter for CliRuntime {
    async fn create(&self, spec: &CreateSpec) -> Result<String> {
        let args = self.create_args(spec)?;
        let id = self.checked(&spec.name, "create", args).await?;
        info!("Created sandbox {} ({})", spec.name, id);
        Ok(id)
    }

    async fn inspect(&self, name: &str) -> Result<Option<SandboxRecord>> {
        let output = self
            .output(name, ["inspect", "--type", "container", name])
            .await?;
        if !output.status.success() {
            return match self.classify(name, "inspect", &output.stderr) {
                SandboxError::NotFound { .. } => Ok(None),
                e => Err(e),
            };
        }

        let entries: Vec<InspectEntry> = serde_json::from_slice(&output.stdout).map_err(|e| {
            SandboxError::operation_failed(name, "inspect", format!("unreadable output: {}", e))
        })?;
        let records = entries.into_iter().map(SandboxRecord::from).collect();
        Ok(managed_only(records).into_iter().next())
    }

    async fn list_managed(&self) -> Result<Vec<SandboxRecord>> {
        let filter = labels::managed_filter();
        let names = self
            .checked(
                "all",
                "list",
                ["ps", "-a", "--filter", filter.as_str(), "--format", "{{.Names}}"],
            )
            .await?;

        let mut records = Vec::new();
        for name in names.lines().map(str::trim).filter(|n| !n.is_empty()) {
            // removed between `ps` and `inspect`
            if let Some(record) = self.inspect(name).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.checked(name, "start", ["start", name]).await?;
        Ok(())
    }

    async fn signal(&self, name: &str, signal: Signal) -> Result<()> {
        self.checked(name, "signal", ["kill", "--signal", signal.as_str(), name])
            .await?;
        Ok(())
    }

    async fn remove(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("--force");
        }
        args.push(name);
        self.checked(name, "remove", args).await?;
        Ok(())
    }

    async fn attach(&self, name: &str) -> Result<i32> {
        let mut child = self
            .command(["exec", "-it", name, "bash"])
            .spawn()
            .map_err(|e| self.spawn_error(name, e))?;

        // The terminal delivers Ctrl-C to the shell inside the sandbox too;
        // the sandbox must outlive it, so the tool just keeps waiting.
        let status = loop {
            tokio::select! {
                status = child.wait() => break status?,
                _ = tokio::signal::ctrl_c() => {
                    debug!("Ignoring Ctrl-C while attached to {}", name);
                }
            }
        };

        Ok(status.code().unwrap_or(-1))
    }

    async fn exec(&self, name: &str, argv: &[&str], stdin: Option<&str>) -> Result<ExecOutput> {
        let mut args = vec!["exec"];
        if stdin.is_some() {
            args.push("-i");
        }
        args.push(name);
        args.extend_from_slice(argv);

        self.exec_with_stdin(name, self.command(args), stdin).await
    }

    async fn ensure_image(&self, image: &str) -> Result<()> {
        let present = self.output(image, ["image", "inspect", image]).await?;
        if present.status.success() {
            debug!("Image {} is present", image);
            return Ok(());
        }

        eprintln!("Pulling image {}...", image);
        // inherit stdio so pull progress is visible
        let status = self
            .command(["pull", image])
            .status()
            .await
            .map_err(|e| self.spawn_error(image, e))?;
        if !status.success() {
            return Err(SandboxError::operation_failed(
                image,
                "pull image for",
                format!("{} pull exited with {}", self.engine, status),
            ));
        }
        Ok(())
    }

    async fn apply_ruleset(&self, name: &str, image: &str, ruleset: &Ruleset) -> Result<()> {
        self.restore_rules(name, image, "iptables-restore", &ruleset.ipv4)
            .await?;
        self.restore_rules(name, image, "ip6tables-restore", &ruleset.ipv6)
            .await?;
        info!(
            "Applied {} destination rule(s) to {}",
            ruleset.destination_rule_count(),
            name
        );
        Ok(())
    }
}
