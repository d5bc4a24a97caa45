//! metastored — metastore operator binary.
//!
//! Works directly on a metastore data directory:
//! - List the persisted compaction jobs
//! - Render the compaction scheduler metrics
//! - Replay a command log through the Raft state machine offline
//!
//! # Usage
//!
//! ```text
//! metastored jobs --data-dir /var/lib/metastore
//! metastored replay --data-dir ./scratch --commands commands.jsonl
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use metastore_core::{MetastoreConfig, SchedulerConfig};
use metastore_state::StateStore;
use tracing::info;

mod commands;

const DEFAULT_DATA_DIR: &str = "/var/lib/metastore";
const DB_FILE: &str = "metastore.redb";

#[derive(Parser)]
#[command(name = "metastored", about = "Metastore compaction scheduler tools", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print every persisted compaction job state.
    Jobs {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Restore the scheduler and print its metrics in Prometheus format.
    Metrics {
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Apply a JSON-lines file of requests through the state machine.
    Replay {
        #[command(flatten)]
        store: StoreArgs,

        /// File with one JSON-encoded request per line.
        #[arg(long)]
        commands: PathBuf,
    },
}

#[derive(Args)]
struct StoreArgs {
    /// Data directory holding the metastore database.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Path to metastore.toml.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl StoreArgs {
    /// Load the config file (if any) and open the store it points at.
    fn open(&self) -> anyhow::Result<(StateStore, SchedulerConfig)> {
        let config = match &self.config {
            Some(path) => MetastoreConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => MetastoreConfig::default(),
        };
        let scheduler = config.scheduler_config()?;

        let data_dir = self
            .data_dir
            .clone()
            .or(config.data_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let store = open_store(&data_dir)?;
        Ok((store, scheduler))
    }
}

fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let db_path = data_dir.join(DB_FILE);
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "job store opened");
    Ok(store)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,metastored=debug,metastore=debug")
            }),
        )
        .init();

    let cli = Cli::parse();
    let mut stdout = std::io::stdout().lock();

    match cli.command {
        Command::Jobs { store } => {
            let (store, _) = store.open()?;
            commands::jobs(&store, &mut stdout)
        }
        Command::Metrics { store } => {
            let (store, config) = store.open()?;
            commands::metrics(store, config, &mut stdout)
        }
        Command::Replay {
            store,
            commands: path,
        } => {
            let (store, config) = store.open()?;
            let file = std::fs::File::open(&path)
                .with_context(|| format!("opening {}", path.display()))?;
            let applied =
                commands::replay(store, config, std::io::BufReader::new(file), &mut stdout)
                    .await?;
            info!(entries = applied, "replay finished");
            Ok(())
        }
    }
}
