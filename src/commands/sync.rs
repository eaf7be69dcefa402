//! Sync command implementation

use crate::config::Config;
use crate::datastore::Datastore;
use crate::decision::IngestionType;
use crate::embed::EmbeddingSelector;
use crate::error::Result;
use crate::ingest::{EventSink, Ingestor, RunReport};
use crate::progress::render_events;
use crate::source::{DocumentSource, WebSource, WorkspaceExportSource};
use std::path::PathBuf;
use tracing::info;

/// What to sync
#[derive(Debug, Clone)]
pub enum SyncTarget {
    /// One or more web pages
    Urls(Vec<String>),
    /// A workspace export directory
    Workspace(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub ingestion_type: IngestionType,
    pub concurrency: Option<usize>,
    pub selector: EmbeddingSelector,
    /// Draw a progress bar from the run's event stream
    pub show_progress: bool,
}

/// Run one ingestion over the target
pub async fn cmd_sync(
    config: &Config,
    datastore: &Datastore,
    target: SyncTarget,
    options: SyncOptions,
) -> Result<RunReport> {
    let source: Box<dyn DocumentSource> = match target {
        SyncTarget::Urls(urls) => Box::new(WebSource::new(urls, &config.source)?),
        SyncTarget::Workspace(dir) => Box::new(WorkspaceExportSource::new(dir)),
    };

    let mut ingestor = Ingestor::from_config(config, datastore, &options.selector).await?;
    if let Some(concurrency) = options.concurrency {
        ingestor = ingestor.with_concurrency(concurrency);
    }
    info!(
        "Syncing {} into {} ({})",
        source.label(),
        ingestor.adapter().space(),
        options.ingestion_type
    );

    let renderer = if options.show_progress {
        let (sink, rx) = EventSink::channel();
        ingestor = ingestor.with_events(sink);
        Some(render_events(rx))
    } else {
        None
    };

    let report = ingestor.run(source.as_ref(), options.ingestion_type).await;

    // Closing the sink ends the renderer even if no Complete event got through
    drop(ingestor);
    if let Some(renderer) = renderer {
        let _ = renderer.await;
    }

    Ok(report)
}

/// Print a run report to console
pub fn print_run_report(report: &RunReport) {
    println!("\n🔄 {}\n", report.summary());
    if let Some(run_id) = &report.run_id {
        println!("Run: {}", run_id);
    }
    for entry in &report.error_logs {
        println!(
            "  ! [{}] {}: {}",
            entry.context,
            entry.doc_id.as_deref().unwrap_or("-"),
            entry.message
        );
    }
    if report.totals.error_count as usize > report.error_logs.len() {
        println!(
            "  ! ... {} more errors not logged",
            report.totals.error_count as usize - report.error_logs.len()
        );
    }
}
