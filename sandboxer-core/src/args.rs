//! CLI argument structures shared with the sandboxer binary

use crate::runtime::Engine;
use clap::Args;
use std::path::PathBuf;

/// Options accepted before or after any subcommand
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Log debug details (runtime commands, resolved addresses) to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Configuration file layered over the built-in and user configuration
    #[arg(long, value_name = "PATH", env = "SANDBOXER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Container engine to drive (default: podman, or as configured)
    #[arg(long, value_enum, env = "SANDBOXER_ENGINE", global = true)]
    pub engine: Option<Engine>,
}

/// Arguments of `sandboxer run`
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Project directory to mount (default: current directory)
    #[arg(value_name = "PATH")]
    pub path: Option<PathBuf>,

    /// Container image to use
    #[arg(long, short, value_name = "IMAGE")]
    pub image: Option<String>,

    /// Start in the background instead of attaching a shell
    #[arg(long, short)]
    pub detach: bool,

    /// Sandbox name (default: derived from the project path)
    #[arg(long, short, value_name = "NAME")]
    pub name: Option<String>,

    /// Disable network access entirely
    #[arg(long)]
    pub no_internet: bool,

    /// Only allow the Claude API
    #[arg(long)]
    pub only_claude: bool,

    /// Allow the Claude API, package registries, source hosting and installers
    #[arg(long)]
    pub only_dev: bool,

    /// Port to publish from the sandbox (can be used multiple times)
    #[arg(long = "port", short = 'p', value_name = "PORT")]
    pub ports: Vec<u16>,

    /// Do not publish any ports
    #[arg(long)]
    pub no_expose_ports: bool,
}

/// Arguments of `sandboxer stop`
#[derive(Args, Debug, Clone)]
pub struct StopArgs {
    /// Sandbox name
    pub name: String,

    /// Seconds to wait after SIGTERM before sending SIGKILL
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

/// Arguments of `sandboxer rm`
#[derive(Args, Debug, Clone)]
pub struct RemoveArgs {
    /// Sandbox name
    pub name: String,

    /// Remove even if the sandbox is running
    #[arg(long, short)]
    pub force: bool,
}
