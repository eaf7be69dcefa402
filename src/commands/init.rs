//! Init command implementation

use crate::config::Config;
use crate::datastore::Datastore;
use crate::error::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: PathBuf,
    pub config_path: PathBuf,
    pub force: bool,
}

/// What `init` did
#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub config_path: String,
    pub db_path: String,
    pub config_written: bool,
}

/// Write the default config (unless one exists) and create the schema.
///
/// Schema creation is idempotent, so re-running `init` on an existing
/// installation only migrates a database that is missing tables.
pub async fn cmd_init(options: InitOptions) -> Result<InitReport> {
    let InitOptions {
        base_dir,
        config_path,
        force,
    } = options;

    let config_exists = config_path.exists();
    let mut config = if config_exists && !force {
        info!("Keeping existing config at {:?}", config_path);
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    config.paths.base_dir = base_dir.clone();
    config.paths.config_file = config_path.clone();
    config.paths.db_file = base_dir.join("docsync.db");
    config.validate()?;

    let config_written = !config_exists || force;
    if config_written {
        config.save()?;
        info!("Created config at {:?}", config_path);
    }

    let datastore = Datastore::connect(&config).await?;
    datastore.init_schema().await?;
    if !datastore.is_initialized().await? {
        return Err(Error::Config(format!(
            "Schema creation did not take effect in {}",
            config.paths.db_file.display()
        )));
    }
    info!("Database ready at {:?}", config.paths.db_file);

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        config_written,
    })
}

/// Print init result to console
pub fn print_init(report: &InitReport) {
    if report.config_written {
        println!("✓ Wrote configuration to {}", report.config_path);
    } else {
        println!("✓ Using existing configuration at {}", report.config_path);
    }
    println!("✓ Database ready at {}", report.db_path);
    println!("\nNext steps:");
    println!("  docsync sync url https://example.com/page   # Sync one web page");
    println!("  docsync sync workspace ./export             # Sync exported workspace pages");
    println!("  docsync runs                                # Inspect recent runs");
}
