//! docsync CLI entry point

use clap::{Parser, Subcommand};
use docsync::{
    commands::{
        cmd_init, cmd_runs, cmd_status, cmd_sync, print_init, print_run_report, print_runs,
        print_status, InitOptions, SyncOptions, SyncTarget,
    },
    config::Config,
    datastore::Datastore,
    decision::IngestionType,
    embed::EmbeddingSelector,
    error::{Error, Result},
    progress::LogWriterFactory,
    runs::RunStatus,
};
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docsync")]
#[command(version, about = "Keep a chunk-level embedding index in sync with its sources", long_about = None)]
struct Cli {
    /// Path to config file (or its directory)
    #[arg(short, long, global = true, env = "DOCSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default configuration and create the database schema
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Run one ingestion
    Sync {
        #[command(subcommand)]
        target: SyncCommand,
    },

    /// Show recent ingestion runs
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Show configuration, embedding space and index size
    Status,
}

#[derive(clap::Args, Clone)]
struct RunArgs {
    /// Re-ingest everything regardless of detected changes
    #[arg(long)]
    full: bool,

    /// Documents processed concurrently (overrides ingest.concurrency)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Embedding provider (openai, http, fastembed)
    #[arg(long)]
    provider: Option<String>,

    /// Embedding model
    #[arg(long)]
    model: Option<String>,

    /// Fully qualified embedding space, `provider/model@version`
    #[arg(long)]
    space: Option<String>,
}

#[derive(Subcommand)]
enum SyncCommand {
    /// Sync web pages (one URL runs as "web", several as "manual/url")
    Url {
        /// URLs to fetch
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Sync a directory of exported workspace pages
    Workspace {
        /// Export directory
        dir: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    let (base_dir, config_path) = resolve_paths(cli.config.as_deref());

    // Init doesn't need an existing config
    if let Commands::Init { force } = cli.command {
        let report = cmd_init(InitOptions {
            base_dir,
            config_path,
            force,
        })
        .await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_init(&report);
        }
        return Ok(0);
    }

    let config = load_config(&config_path)?;
    let datastore = Datastore::connect(&config).await?;

    match cli.command {
        Commands::Init { .. } => Ok(0),

        Commands::Sync { target } => {
            let (target, run) = match target {
                SyncCommand::Url { urls, run } => (SyncTarget::Urls(urls), run),
                SyncCommand::Workspace { dir, run } => (SyncTarget::Workspace(dir), run),
            };
            let options = SyncOptions {
                ingestion_type: if run.full {
                    IngestionType::Full
                } else {
                    IngestionType::Partial
                },
                concurrency: run.concurrency,
                selector: EmbeddingSelector {
                    provider: run.provider,
                    model: run.model,
                    space_id: run.space,
                    version: None,
                },
                show_progress: !cli.json,
            };

            let report = cmd_sync(&config, &datastore, target, options).await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_run_report(&report);
            }

            Ok(match report.status {
                RunStatus::Success => 0,
                RunStatus::CompletedWithErrors => 2,
                RunStatus::Failed | RunStatus::InProgress => 1,
            })
        }

        Commands::Runs { limit } => {
            let runs = cmd_runs(&datastore, limit).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else {
                print_runs(&runs);
            }
            Ok(0)
        }

        Commands::Status => {
            let status = cmd_status(&config, &datastore).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            Ok(0)
        }
    }
}

/// Base directory and config file from `--config`: a `.toml` path is the
/// config file itself, anything else is the base directory.
fn resolve_paths(config: Option<&Path>) -> (PathBuf, PathBuf) {
    match config {
        Some(path) if path.extension().is_some_and(|e| e == "toml") => {
            let base = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            (base, path.to_path_buf())
        }
        Some(dir) => (dir.to_path_buf(), dir.join("config.toml")),
        None => {
            let base = Config::default_base_dir();
            let config_path = base.join("config.toml");
            (base, config_path)
        }
    }
}

fn load_config(config_path: &Path) -> Result<Config> {
    if !config_path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}. Run 'docsync init' first.",
            config_path.display()
        )));
    }

    Config::load(config_path)
}
