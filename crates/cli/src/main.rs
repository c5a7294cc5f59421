mod cmd;
mod inspect;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cairn_lib::consts::{DEFAULT_STATE_DIR, ENV_STATE_DIR};

use crate::cmd::{cmd_show, cmd_status};

/// cairn - inspect infrastructure state
#[derive(Parser)]
#[command(name = "cairn")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// State directory (defaults to $CAIRN_STATE_DIR, then .cairn)
  #[arg(long, global = true)]
  state_dir: Option<PathBuf>,

  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Print JSON instead of text
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// List every scope and record under the state directory
  Status,

  /// Show one record by fully-qualified name, e.g. `app/prod/api/queue`
  Show {
    fqn: String,

    /// Decrypt secrets using CAIRN_PASSPHRASE
    #[arg(long)]
    reveal: bool,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "warn" }));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let state_dir = cli
    .state_dir
    .or_else(|| std::env::var_os(ENV_STATE_DIR).filter(|v| !v.is_empty()).map(PathBuf::from))
    .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
  tracing::debug!(state_dir = %state_dir.display(), "inspecting state");

  match cli.command {
    Commands::Status => cmd_status(&state_dir, cli.verbose, cli.json),
    Commands::Show { fqn, reveal } => cmd_show(&state_dir, &fqn, reveal, cli.json),
  }
}
