//! Embedding generation
//!
//! This module provides an abstraction over embedding providers with:
//! - A trait implemented once per provider binding
//! - Deterministic resolution of the embedding space
//! - An adapter that batches and validates provider output

mod http_backend;
mod openai;
mod space;

#[cfg(feature = "local-embed")]
mod fastembed_impl;

pub use http_backend::*;
pub use openai::*;
pub use space::*;

#[cfg(feature = "local-embed")]
pub use fastembed_impl::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Trait for embedding providers
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per text
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create the provider binding for a resolved space.
///
/// Provider errors are never papered over by falling back to another
/// provider: vectors from a different space would be silently mislabeled.
pub fn create_provider(
    space: &EmbeddingSpace,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match space.provider {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiProvider::new(&space.model, config)?)),
        ProviderKind::Http => Ok(Arc::new(HttpProvider::new(&space.model, config)?)),
        #[cfg(feature = "local-embed")]
        ProviderKind::FastEmbed => Ok(Arc::new(FastEmbedProvider::new(&space.model)?)),
        #[cfg(not(feature = "local-embed"))]
        ProviderKind::FastEmbed => Err(Error::Config(
            "fastembed provider requires building with --features local-embed".to_string(),
        )),
    }
}

/// Batching, validating front for one provider in one embedding space
#[derive(Clone)]
pub struct EmbeddingAdapter {
    provider: Arc<dyn EmbeddingProvider>,
    space: EmbeddingSpace,
    batch_size: usize,
}

impl EmbeddingAdapter {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, space: EmbeddingSpace, batch_size: usize) -> Self {
        Self {
            provider,
            space,
            batch_size: batch_size.max(1),
        }
    }

    /// Resolve the space from config (and environment) and bind its provider
    pub fn from_config(config: &EmbeddingConfig, selector: &EmbeddingSelector) -> Result<Self> {
        let space = resolve_embedding_space(selector, &EmbeddingDefaults::from_env(config))?;
        let provider = create_provider(&space, config)?;
        Ok(Self::new(provider, space, config.batch_size))
    }

    pub fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    /// Embed texts in batches. The result is aligned index-for-index with
    /// `texts`; empty input returns without calling the provider.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(
                space = %self.space,
                batch = batch.len(),
                "Embedding batch"
            );
            let embeddings = self.provider.embed(batch.to_vec()).await?;
            if embeddings.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "Provider '{}' returned {} vectors for {} inputs",
                    self.provider.model_name(),
                    embeddings.len(),
                    batch.len()
                )));
            }
            all_embeddings.extend(embeddings);
        }

        self.validate_dimensions(&all_embeddings)?;
        Ok(all_embeddings)
    }

    fn validate_dimensions(&self, embeddings: &[Vec<f32>]) -> Result<()> {
        if let Some(mismatch) = embeddings
            .iter()
            .find(|vec| vec.len() != self.space.dimension)
        {
            return Err(Error::Embedding(format!(
                "Embedding dimension mismatch for space '{}': expected {}, got {}",
                self.space,
                self.space.dimension,
                mismatch.len()
            )));
        }
        Ok(())
    }
}
