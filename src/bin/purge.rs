//! Retention purge trigger, meant to be run from a daily scheduler.

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use bidbook::config::Config;
use bidbook::purge::run_purge;
use bidbook::store::RecordStore;

#[derive(Parser, Debug)]
#[command(name = "purge")]
#[command(about = "Permanently remove soft-deleted records past the retention window")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/bidbook/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Record database path (overrides config)
  #[arg(long)]
  db: Option<PathBuf>,

  /// Retention window in days (overrides config)
  #[arg(long)]
  retention_days: Option<i64>,
}

fn main() -> Result<()> {
  color_eyre::install()?;
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .init();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let store = match args.db.or(config.db_path.clone()) {
    Some(path) => RecordStore::open(&path)?,
    None => RecordStore::open_default()?,
  };

  let retention_days = args.retention_days.unwrap_or(config.retention_days);
  let removed = run_purge(&store, chrono::Utc::now(), retention_days)?;
  println!("purged {} record(s)", removed);

  Ok(())
}
