mod app;
mod backend;
mod config;
mod guard;
mod logging;
mod repo;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pspro")]
#[command(about = "Clients, services and quotes for PS Pro, from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/pspro/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Sign in (password read from PSPRO_PASSWORD)
  Login {
    #[arg(short, long)]
    email: String,
  },
  /// Sign out and forget the stored session
  Logout,
  /// Show the signed-in user
  Whoami,
  /// Business profile
  Profile {
    #[command(subcommand)]
    action: ProfileAction,
  },
  /// Clients
  Clients {
    #[command(subcommand)]
    action: RecordAction,
  },
  /// Services
  Services {
    #[command(subcommand)]
    action: RecordAction,
  },
  /// Quotes and their items
  Quotes {
    #[command(subcommand)]
    action: QuoteAction,
  },
  /// Dashboard statistics
  Stats,
  /// Offline asset cache
  Worker {
    #[command(subcommand)]
    action: WorkerAction,
  },
}

#[derive(Subcommand, Debug)]
pub enum ProfileAction {
  Show,
  /// Create or update the profile from a JSON file
  Save { file: PathBuf },
}

#[derive(Subcommand, Debug)]
pub enum RecordAction {
  List,
  Get { id: String },
  /// Create (no "id") or update (with "id") from a JSON file
  Save { file: PathBuf },
}

#[derive(Subcommand, Debug)]
pub enum QuoteAction {
  List,
  Get { id: String },
  /// Save a quote with its "itens" array from a JSON file
  Save { file: PathBuf },
  Status { id: String, status: String },
}

#[derive(Subcommand, Debug)]
pub enum WorkerAction {
  /// Pre-cache the asset manifest
  Install,
  /// Remove cache generations other than the current one
  Activate,
  /// Run one request through the worker
  Fetch {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Treat the request as a page navigation (implied for .html and
    /// extensionless paths on the configured origin)
    #[arg(long)]
    document: bool,
  },
  /// List cache generations and their entries
  Caches,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let data_dir = config::Config::data_dir()?;
  let _log_guard = logging::init(&data_dir.join("logs"))?;

  tracing::info!(command = ?args.command, "Starting");

  let app = app::App::new(config, data_dir)?;
  app.run(args.command).await
}
