//! Status command implementation

use crate::config::Config;
use crate::datastore::Datastore;
use crate::embed::{resolve_embedding_space, EmbeddingDefaults, EmbeddingSelector};
use crate::error::Result;
use crate::store::open_chunk_store;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub schema_initialized: bool,
    pub vector_backend: String,
    pub embedding_space: Option<String>,
    pub embedding_dimension: Option<usize>,
    /// Tracked documents, `None` when the state table is missing
    pub documents: Option<i64>,
    /// Chunks stored in the active space, `None` when unreachable
    pub chunks: Option<u64>,
}

/// Get system status
pub async fn cmd_status(config: &Config, datastore: &Datastore) -> Result<StatusInfo> {
    info!("Getting status");

    let schema_initialized = datastore.is_initialized().await?;
    let documents = datastore.document_states().count_documents().await?;

    let space = match resolve_embedding_space(
        &EmbeddingSelector::default(),
        &EmbeddingDefaults::from_env(&config.embedding),
    ) {
        Ok(space) => Some(space),
        Err(e) => {
            tracing::debug!("Embedding space unresolved: {}", e);
            None
        }
    };

    let chunks = match &space {
        Some(space) => match open_chunk_store(config, datastore, space).await {
            Ok(store) => store.count_chunks().await.ok(),
            Err(e) => {
                tracing::debug!("Chunk store unavailable: {:?}", e);
                None
            }
        },
        None => None,
    };

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        schema_initialized,
        vector_backend: config.vector_store.backend.clone(),
        embedding_space: space.as_ref().map(|s| s.id()),
        embedding_dimension: space.as_ref().map(|s| s.dimension),
        documents,
        chunks,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 docsync Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!(
        "  Schema: {}",
        if status.schema_initialized {
            "✓ Initialized"
        } else {
            "⚠ Missing tables (run 'docsync init')"
        }
    );
    println!("\nEmbedding space: {}", status.embedding_space.as_deref().unwrap_or("unresolved"));
    if let Some(dimension) = status.embedding_dimension {
        println!("  Dimension: {}", dimension);
    }
    println!("  Backend: {}", status.vector_backend);
    println!("\nIndex:");
    match status.documents {
        Some(count) => println!("  Documents: {}", count),
        None => println!("  Documents: unavailable"),
    }
    match status.chunks {
        Some(count) => println!("  Chunks: {}", count),
        None => println!("  Chunks: unavailable"),
    }
}
