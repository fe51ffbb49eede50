//! CLI for lipc local-socket exchanges.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod send;
mod serve;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use lipc::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lipc", version, about = "One-shot request/response over local sockets")]
struct Cli {
    /// Log protocol steps (same as RUST_LOG=debug).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    timeouts: TimeoutArgs,

    #[command(subcommand)]
    command: Command,
}

/// Timeout settings shared by every subcommand.
#[derive(Args)]
struct TimeoutArgs {
    /// JSON file with `timeout_ms` / `quiet_ms`.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Step timeout in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Quiescence window in milliseconds.
    #[arg(long, global = true, value_name = "MS")]
    quiet_ms: Option<u64>,
}

impl TimeoutArgs {
    /// File settings first, then command-line overrides.
    fn resolve(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(ms) = self.timeout_ms {
            config = config.with_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.quiet_ms {
            config = config.with_quiet(Duration::from_millis(ms));
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Serve exchanges on a socket path.
    Serve(serve::ServeArgs),

    /// Send one header/message pair and print the response.
    Send(send::SendArgs),

    /// Generate shell completion scripts.
    #[command(hide = true)]
    Completion {
        /// Target shell.
        shell: Shell,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(e) = cli.dispatch() {
        eprintln!("lipc: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    fn dispatch(self) -> Result<()> {
        match self.command {
            Command::Serve(args) => args.run(self.timeouts.resolve()?),
            Command::Send(args) => args.run(self.timeouts.resolve()?),
            Command::Completion { shell } => {
                clap_complete::generate(shell, &mut Self::command(), "lipc", &mut std::io::stdout());
                Ok(())
            }
        }
    }
}

/// Logs to stderr; `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
