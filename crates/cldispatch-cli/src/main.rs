//! cldispatch CLI
//!
//! Runs the elementwise vector-addition kernel on an OpenCL device (or the
//! host reference runtime), lists the available platforms and devices, and
//! prints the resolved configuration.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use cldispatch_opencl::{BackendKind, DispatchConfig, LoggingConfig};
use console::style;
use tracing::debug;

mod commands;
mod exit;

use commands::RunCommand;

/// cldispatch - OpenCL kernel dispatch pipeline
#[derive(Parser)]
#[command(name = "cldispatch")]
#[command(about = "Build and launch an OpenCL kernel over a 1-D range")]
#[command(long_about = r#"
cldispatch selects an OpenCL platform and device, builds a kernel source file
for it, stages two integer operand vectors in device buffers, launches the
kernel and reads the result back.

Examples:
  # Add two 100-element vectors with 10 work-items
  cldispatch run --kernel add.cl

  # Use the second GPU of the first platform
  cldispatch run --device-type gpu --device-index 1

  # Without an OpenCL runtime
  cldispatch --backend reference run --kernel add.cl --global-size 100

  # Show platforms and devices
  cldispatch devices
"#)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Runtime to dispatch to (opencl, reference)
    #[arg(short, long, value_name = "BACKEND", global = true)]
    backend: Option<BackendKind>,

    /// Generate shell completions
    #[arg(long, value_name = "SHELL")]
    completions: Option<Shell>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the vector-addition kernel (default)
    Run(RunCommand),

    /// List platforms and their devices
    #[command(alias = "ls")]
    Devices,

    /// Show the resolved configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    if let Some(shell) = cli.completions {
        generate_completions(shell);
        std::process::exit(exit::EXIT_SUCCESS);
    }

    let code = match run(cli) {
        Ok(()) => exit::EXIT_SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            for cause in e.chain().skip(1) {
                eprintln!("  {} {}", style("caused by:").dim(), cause);
            }
            exit::code_for(&e)
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or_else(|| Commands::Run(RunCommand::default()));
    let config = load_configuration(cli.config.as_deref(), cli.backend, &command)?;

    setup_logging(&config.logging, cli.log_level.as_deref());
    debug!(backend = %config.backend, "configuration resolved");

    match command {
        Commands::Run(cmd) => cmd.execute(&config),
        Commands::Devices => commands::list_devices(&config),
        Commands::Config => commands::show_config(&config),
    }
}

/// Load configuration from file or environment and merge with CLI arguments.
fn load_configuration(
    path: Option<&std::path::Path>,
    backend: Option<BackendKind>,
    command: &Commands,
) -> Result<DispatchConfig> {
    let mut config = match path {
        Some(path) => DispatchConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => DispatchConfig::from_env().context("Failed to read configuration from environment")?,
    };
    if let Some(backend) = backend {
        config.backend = backend;
    }
    if let Commands::Run(cmd) = command {
        cmd.apply(&mut config);
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Setup logging based on configuration. Logs go to stderr so that stdout
/// carries only the run's results.
fn setup_logging(logging: &LoggingConfig, log_level_override: Option<&str>) {
    let level = log_level_override.unwrap_or(&logging.level);

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr);

    match logging.format.as_str() {
        "json" => {
            subscriber.json().with_timer(tracing_subscriber::fmt::time::uptime()).init();
        }
        "compact" => {
            subscriber.compact().init();
        }
        _ => {
            subscriber.pretty().init();
        }
    }
}

/// Generate shell completions
fn generate_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
