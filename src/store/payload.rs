//! Payload schema for Qdrant points

use super::ChunkRow;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{PointStruct, Value as QdrantValue};
use std::collections::HashMap;
use uuid::Uuid;

/// Stable point id for a chunk: UUIDv5 of `doc_id:chunk_hash`
pub fn chunk_point_id(doc_id: &str, chunk_hash: &str) -> Uuid {
    let key = format!("{}:{}", doc_id, chunk_hash);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes())
}

/// Convert a chunk row to a qdrant-client PointStruct
pub fn to_point_struct(row: &ChunkRow) -> PointStruct {
    let id = chunk_point_id(&row.doc_id, &row.chunk_hash);
    PointStruct::new(id.to_string(), row.embedding.clone(), to_qdrant_payload(row))
}

/// Payload stored with each chunk
pub fn to_qdrant_payload(row: &ChunkRow) -> HashMap<String, QdrantValue> {
    let mut map = HashMap::new();

    map.insert("doc_id".to_string(), string_to_qdrant(&row.doc_id));
    map.insert("chunk_hash".to_string(), string_to_qdrant(&row.chunk_hash));
    map.insert("chunk_text".to_string(), string_to_qdrant(&row.chunk_text));
    map.insert("ingested_at".to_string(), string_to_qdrant(&row.ingested_at));

    if let Some(ref title) = row.title {
        map.insert("title".to_string(), string_to_qdrant(title));
    }
    if let Some(ref url) = row.source_url {
        map.insert("source_url".to_string(), string_to_qdrant(url));
    }

    map
}

/// Rebuild a row from a stored payload. Vectors are not fetched back.
pub fn row_from_payload(payload: &HashMap<String, QdrantValue>) -> Option<ChunkRow> {
    Some(ChunkRow {
        doc_id: payload_string(payload, "doc_id")?,
        chunk_hash: payload_string(payload, "chunk_hash")?,
        chunk_text: payload_string(payload, "chunk_text").unwrap_or_default(),
        ingested_at: payload_string(payload, "ingested_at").unwrap_or_default(),
        title: payload_string(payload, "title"),
        source_url: payload_string(payload, "source_url"),
        embedding: Vec::new(),
    })
}

pub fn payload_string(payload: &HashMap<String, QdrantValue>, key: &str) -> Option<String> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn string_to_qdrant(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(Kind::StringValue(s.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ChunkRow {
        ChunkRow {
            doc_id: "doc-1".to_string(),
            source_url: Some("https://example.com/a".to_string()),
            title: None,
            chunk_text: "body".to_string(),
            chunk_hash: "h1".to_string(),
            embedding: vec![0.1, 0.2],
            ingested_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_point_id_is_stable_and_doc_scoped() {
        assert_eq!(chunk_point_id("doc-1", "h1"), chunk_point_id("doc-1", "h1"));
        assert_ne!(chunk_point_id("doc-1", "h1"), chunk_point_id("doc-2", "h1"));
    }

    #[test]
    fn test_payload_fields() {
        let payload = to_qdrant_payload(&row());
        assert_eq!(payload_string(&payload, "doc_id").as_deref(), Some("doc-1"));
        assert_eq!(payload_string(&payload, "chunk_hash").as_deref(), Some("h1"));
        assert!(!payload.contains_key("title"));

        let restored = row_from_payload(&payload).unwrap();
        assert_eq!(restored.source_url, row().source_url);
        assert!(restored.embedding.is_empty());
    }
}
