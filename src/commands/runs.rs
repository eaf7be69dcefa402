//! Runs command implementation

use crate::datastore::Datastore;
use crate::error::Result;
use crate::runs::RunRecord;
use tracing::info;

/// Most recent run ledger entries
pub async fn cmd_runs(datastore: &Datastore, limit: u32) -> Result<Vec<RunRecord>> {
    info!("Listing last {} runs", limit);
    let ledger = datastore.run_ledger();
    let runs = ledger.recent_runs(limit).await?;
    if !ledger.is_available() {
        tracing::warn!("Run ledger table is missing; run 'docsync init' to create it");
    }
    Ok(runs)
}

/// Print runs to console
pub fn print_runs(runs: &[RunRecord]) {
    println!("\n🧾 Recent Runs\n");

    if runs.is_empty() {
        println!("No runs recorded yet. Use 'docsync sync' to start one.");
        return;
    }

    for run in runs {
        let t = &run.totals;
        println!("• {} [{}] {}", run.source, run.ingestion_type, run.status);
        println!("  ID: {}", run.id);
        println!(
            "  Started: {}{}",
            run.started_at,
            run.duration_ms
                .map(|ms| format!(" ({:.1}s)", ms as f64 / 1000.0))
                .unwrap_or_default()
        );
        println!(
            "  Documents: {} processed, {} added, {} updated, {} skipped, {} errored",
            t.documents_processed,
            t.documents_added,
            t.documents_updated,
            t.documents_skipped,
            t.error_count
        );
        println!(
            "  Chunks: {} added, {} updated",
            t.chunks_added, t.chunks_updated
        );
        for entry in run.error_logs.iter().take(5) {
            println!(
                "  ! [{}] {}: {}",
                entry.context,
                entry.doc_id.as_deref().unwrap_or("-"),
                entry.message
            );
        }
        if run.error_logs.len() > 5 {
            println!("  ! ... {} more", run.error_logs.len() - 5);
        }
        println!();
    }
}
