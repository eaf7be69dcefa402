//! Qdrant chunk store: one collection per embedding space

use super::{chunk_point_id, row_from_payload, to_point_struct, ChunkRow, ChunkStore};
use super::payload_string;
use crate::datastore::RetryPolicy;
use crate::embed::EmbeddingSpace;
use crate::error::{Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePayloadPointsBuilder, DeletePointsBuilder,
    Distance, Filter, GetCollectionInfoResponse, PointId, PointStruct, RetrievedPoint,
    ScrollPointsBuilder, SetPayloadPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
    Value as QdrantValue,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

const SCROLL_PAGE: u32 = 256;

/// Chunk store backed by Qdrant
pub struct QdrantChunkStore {
    client: Qdrant,
    collection: String,
    space: EmbeddingSpace,
    retry: RetryPolicy,
}

/// Collection holding a space's chunks
pub fn collection_name(prefix: &str, space: &EmbeddingSpace) -> String {
    if prefix.is_empty() {
        space.slug()
    } else {
        format!("{}_{}", prefix, space.slug())
    }
}

impl QdrantChunkStore {
    pub fn new(url: &str, prefix: &str, space: EmbeddingSpace) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::VectorStore(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection_name(prefix, &space),
            space,
            retry: RetryPolicy::default(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    fn doc_filter(doc_id: &str) -> Filter {
        Filter::must([Condition::matches("doc_id", doc_id.to_string())])
    }

    /// Scroll through every point of a document
    async fn scroll_document(&self, doc_id: &str) -> Result<Vec<RetrievedPoint>> {
        let mut points = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let client = &self.client;
            let collection = self.collection.as_str();
            let page_offset = offset.as_ref();
            let response = self
                .retry
                .run("qdrant_scroll", move || async move {
                    let mut builder = ScrollPointsBuilder::new(collection)
                        .filter(Self::doc_filter(doc_id))
                        .limit(SCROLL_PAGE)
                        .with_payload(true)
                        .with_vectors(false);
                    if let Some(o) = page_offset {
                        builder = builder.offset(o.clone());
                    }
                    client.scroll(builder).await.map_err(Error::from)
                })
                .await?;

            if response.result.is_empty() {
                break;
            }
            points.extend(response.result);

            offset = response.next_page_offset;
            if offset.is_none() {
                break;
            }
        }

        Ok(points)
    }

    async fn collection_vector_size(&self) -> Result<Option<u64>> {
        let info = self.client.collection_info(&self.collection).await?;
        Ok(extract_vector_size(&info))
    }
}

fn extract_vector_size(info: &GetCollectionInfoResponse) -> Option<u64> {
    let result = info.result.as_ref()?;
    let config = result.config.as_ref()?;
    let params = config.params.as_ref()?;
    let vectors_config = params.vectors_config.as_ref()?;

    match vectors_config.config.as_ref()? {
        qdrant_client::qdrant::vectors_config::Config::Params(params) => Some(params.size),
        qdrant_client::qdrant::vectors_config::Config::ParamsMap(_) => None,
    }
}

#[async_trait]
impl ChunkStore for QdrantChunkStore {
    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    async fn ensure_space(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            debug!("Collection {} already exists", self.collection);

            match self.collection_vector_size().await? {
                Some(size) if size as usize != self.space.dimension => {
                    return Err(Error::VectorStore(format!(
                        "Collection '{}' has vector size {}, but space '{}' expects {}",
                        self.collection, size, self.space, self.space.dimension
                    )));
                }
                Some(_) => {}
                None => {
                    return Err(Error::VectorStore(format!(
                        "Collection '{}' uses named vectors, which are not supported",
                        self.collection
                    )));
                }
            }
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.space.dimension
        );

        let vectors_config =
            VectorParamsBuilder::new(self.space.dimension as u64, Distance::Cosine);
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(vectors_config),
            )
            .await?;

        Ok(())
    }

    async fn existing_hashes(&self, doc_id: &str) -> Result<HashSet<String>> {
        let points = self.scroll_document(doc_id).await?;
        Ok(points
            .iter()
            .filter_map(|p| payload_string(&p.payload, "chunk_hash"))
            .collect())
    }

    async fn delete_hashes(&self, doc_id: &str, hashes: &[String]) -> Result<u64> {
        if hashes.is_empty() {
            return Ok(0);
        }

        debug!(
            "Deleting {} points from collection {}",
            hashes.len(),
            self.collection
        );

        // Point ids embed the doc id, so deletes never reach other documents
        let ids: Vec<PointId> = hashes
            .iter()
            .map(|hash| PointId::from(chunk_point_id(doc_id, hash).to_string()))
            .collect();

        let client = &self.client;
        let collection = self.collection.as_str();
        let ids = &ids;
        self.retry
            .run("qdrant_delete", move || async move {
                client
                    .delete_points(
                        DeletePointsBuilder::new(collection)
                            .points(ids.clone())
                            .wait(true),
                    )
                    .await
                    .map_err(Error::from)
            })
            .await?;

        Ok(hashes.len() as u64)
    }

    async fn upsert_rows(&self, rows: &[ChunkRow]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        if let Some(mismatch) = rows
            .iter()
            .find(|r| r.embedding.len() != self.space.dimension)
        {
            return Err(Error::VectorStore(format!(
                "Vector dimension mismatch for collection '{}': expected {}, got {}",
                self.collection,
                self.space.dimension,
                mismatch.embedding.len()
            )));
        }

        debug!(
            "Upserting {} points to collection {}",
            rows.len(),
            self.collection
        );

        let points: Vec<PointStruct> = rows.iter().map(to_point_struct).collect();
        let client = &self.client;
        let collection = self.collection.as_str();
        let points = &points;
        self.retry
            .run("qdrant_upsert", move || async move {
                client
                    .upsert_points(UpsertPointsBuilder::new(collection, points.clone()).wait(true))
                    .await
                    .map_err(Error::from)
            })
            .await?;

        Ok(())
    }

    async fn refresh_details(
        &self,
        doc_id: &str,
        hashes: &[String],
        title: Option<&str>,
        source_url: Option<&str>,
    ) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }

        let ids: Vec<PointId> = hashes
            .iter()
            .map(|hash| PointId::from(chunk_point_id(doc_id, hash).to_string()))
            .collect();

        let mut set: HashMap<String, QdrantValue> = HashMap::new();
        let mut unset: Vec<String> = Vec::new();
        for (key, value) in [("title", title), ("source_url", source_url)] {
            match value {
                Some(v) => {
                    set.insert(key.to_string(), QdrantValue::from(v.to_string()));
                }
                None => unset.push(key.to_string()),
            }
        }

        let client = &self.client;
        let collection = self.collection.as_str();
        let ids = &ids;
        if !set.is_empty() {
            let payload = Payload::from(set);
            let payload = &payload;
            self.retry
                .run("qdrant_set_payload", move || async move {
                    client
                        .set_payload(
                            SetPayloadPointsBuilder::new(collection, payload.clone())
                                .points_selector(ids.clone())
                                .wait(true),
                        )
                        .await
                        .map_err(Error::from)
                })
                .await?;
        }
        if !unset.is_empty() {
            let unset = &unset;
            self.retry
                .run("qdrant_delete_payload", move || async move {
                    client
                        .delete_payload(
                            DeletePayloadPointsBuilder::new(collection, unset.clone())
                                .points_selector(ids.clone())
                                .wait(true),
                        )
                        .await
                        .map_err(Error::from)
                })
                .await?;
        }

        Ok(())
    }

    async fn chunks_for_document(&self, doc_id: &str) -> Result<Vec<ChunkRow>> {
        let mut rows: Vec<ChunkRow> = self
            .scroll_document(doc_id)
            .await?
            .iter()
            .filter_map(|p| row_from_payload(&p.payload))
            .collect();
        rows.sort_by(|a, b| a.chunk_hash.cmp(&b.chunk_hash));
        Ok(rows)
    }

    async fn count_chunks(&self) -> Result<u64> {
        let info = self.client.collection_info(&self.collection).await?;
        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0))
    }
}
