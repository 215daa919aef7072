//! Isolated development containers for a project directory

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandboxer_core::{
    exit_code, CliRuntime, ConfigLoader, GlobalArgs, Orchestrator, RemoveArgs, RunAction,
    RunArgs, SandboxError, SandboxSummary, StopArgs,
};
use sandboxer_net::SystemResolver;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sandboxer",
    about = "Run a project in an isolated podman or docker container with a chosen egress policy",
    version
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or resume the sandbox for a project and attach a shell
    Run(RunArgs),

    /// List sandboxes
    #[command(alias = "ls")]
    List {
        /// Only show running sandboxes
        #[arg(long, short)]
        running: bool,
    },

    /// Open a shell in a running sandbox
    Attach {
        /// Sandbox name
        name: String,
    },

    /// Stop a running sandbox
    Stop(StopArgs),

    /// Remove a sandbox
    Rm(RemoveArgs),

    /// Deny Claude's WebSearch and WebFetch tools in a running sandbox
    DisableWebTools {
        /// Sandbox name
        name: String,
    },
}

type App = Orchestrator<CliRuntime, SystemResolver>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {:#}", err);
        std::process::exit(exit_code_for(&err));
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|e| e.downcast_ref::<SandboxError>())
        .map_or(exit_code::FAILURE, SandboxError::exit_code)
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::load_with_priority(cli.global.config.clone())
        .context("Failed to load configuration")?;

    let verbose = cli.global.verbose || config.common.verbose();
    let filter = EnvFilter::try_from_env("SANDBOXER_LOG")
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let runtime_config = config.runtime.clone().with_engine(cli.global.engine);
    tracing::debug!(
        "Using {} ({})",
        runtime_config.engine(),
        runtime_config.binary().display()
    );
    let runtime = CliRuntime::new(runtime_config.engine(), runtime_config.binary());
    let app: App = Orchestrator::new(runtime, SystemResolver, &config);

    match cli.command {
        Command::Run(args) => run_sandbox(&app, &args).await,
        Command::List { running } => list(&app, running).await,
        Command::Attach { name } => {
            app.attach(&name).await?;
            Ok(())
        }
        Command::Stop(args) => {
            app.stop(&args.name, args.timeout.map(Duration::from_secs))
                .await?;
            println!("Stopped {}", args.name);
            Ok(())
        }
        Command::Rm(args) => {
            app.remove(&args.name, args.force).await?;
            println!("Removed {}", args.name);
            Ok(())
        }
        Command::DisableWebTools { name } => {
            app.disable_web_tools(&name).await?;
            println!("Denied WebSearch and WebFetch in {}", name);
            Ok(())
        }
    }
}

async fn run_sandbox(app: &App, args: &RunArgs) -> Result<()> {
    let outcome = app.run(args).await?;

    if !args.detach {
        eprintln!(
            "Left {}; it keeps running. Stop it with: sandboxer stop {}",
            outcome.name, outcome.name
        );
        return Ok(());
    }

    match outcome.action {
        RunAction::Created => println!(
            "Started {} (network: {})",
            outcome.name, outcome.network_mode
        ),
        RunAction::Resumed => println!("Resumed {}", outcome.name),
        RunAction::AlreadyRunning => println!("{} is already running", outcome.name),
    }
    println!("Attach with: sandboxer attach {}", outcome.name);
    Ok(())
}

async fn list(app: &App, running_only: bool) -> Result<()> {
    let sandboxes = app.list(running_only).await?;
    if sandboxes.is_empty() {
        println!("No sandboxes found");
        return Ok(());
    }
    print!("{}", render_table(&sandboxes));
    Ok(())
}

fn render_table(sandboxes: &[SandboxSummary]) -> String {
    let header = ["ID", "NAME", "STATUS", "NETWORK", "MOUNTED FOLDER"];
    let rows: Vec<[String; 5]> = sandboxes
        .iter()
        .map(|s| {
            [
                s.id.clone(),
                s.name.clone(),
                s.status.to_string(),
                s.network_mode()
                    .map_or_else(|| "?".to_string(), |m| m.to_string()),
                s.mounted_path()
                    .map_or_else(|| "?".to_string(), |p| p.display().to_string()),
            ]
        })
        .collect();

    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };

    push_row(&header);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        push_row(&cells);
    }
    out
}
