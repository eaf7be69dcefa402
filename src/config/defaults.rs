//! Default values for configuration

/// Default embedding provider
pub fn default_embedding_provider() -> String {
    "openai".to_string()
}

/// Default embedding model (resolved against the provider when empty)
pub fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Default embedding space version
pub fn default_embedding_version() -> String {
    "v1".to_string()
}

/// Default base URL for HTTP embedding providers
pub fn default_embedding_api_base() -> String {
    std::env::var("DOCSYNC_EMBEDDING_API_BASE")
        .unwrap_or_else(|_| "https://api.openai.com".to_string())
}

/// Default environment variable holding the embedding API key
pub fn default_embedding_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    64
}

/// Default embedding request timeout in seconds
pub fn default_embedding_timeout() -> u64 {
    60
}

/// Default maximum tokens per chunk
pub fn default_chunk_max_tokens() -> usize {
    450
}

/// Default overlap tokens between chunks
pub fn default_chunk_overlap_tokens() -> usize {
    75
}

/// Default number of documents processed concurrently within a run
pub fn default_ingest_concurrency() -> usize {
    3
}

/// Default attempt cap for datastore RPCs
pub fn default_retry_attempts() -> usize {
    3
}

/// Default base delay for datastore retry backoff (milliseconds)
pub fn default_retry_base_delay_ms() -> u64 {
    100
}

/// Default user agent for source fetches
pub fn default_source_user_agent() -> String {
    format!("docsync/{}", env!("CARGO_PKG_VERSION"))
}

/// Default source fetch timeout in seconds
pub fn default_source_timeout() -> u64 {
    30
}

/// Default chunk store backend
pub fn default_vector_backend() -> String {
    "sqlite".to_string()
}

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default prefix for per-space Qdrant collections
pub fn default_qdrant_collection_prefix() -> String {
    "docsync".to_string()
}
