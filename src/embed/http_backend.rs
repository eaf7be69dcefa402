//! Self-hosted embedding sidecar over HTTP

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize)]
struct EmbedTextRequest<'a> {
    model: &'a str,
    inputs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Embeddings { embeddings: Vec<Vec<f32>> },
    Vectors { vectors: Vec<Vec<f32>> },
    Data { data: Vec<EmbeddingData> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
            EmbeddingResponse::Vectors { vectors } => vectors,
            EmbeddingResponse::Data { data } => data.into_iter().map(|d| d.embedding).collect(),
        }
    }
}

/// Provider for a sidecar exposing `POST /v1/embed/text`
pub struct HttpProvider {
    client: Client,
    base_url: Url,
    model: String,
}

impl HttpProvider {
    pub fn new(model: &str, config: &EmbeddingConfig) -> Result<Self> {
        let base_url = Url::parse(&config.api_base)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            model: model.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("Invalid embedding backend URL: {}", e)))
    }
}

#[async_trait]
impl EmbeddingProvider for HttpProvider {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = self.endpoint("/v1/embed/text")?;
        let request = EmbedTextRequest {
            model: &self.model,
            inputs: texts,
        };
        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Embedding(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::Embedding(e.to_string()))?;

        let parsed: EmbeddingResponse = response.json().await?;
        Ok(parsed.into_embeddings())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "http".to_string(),
            api_base: base.to_string(),
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_accepts_response_shapes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed/text"))
            .and(body_partial_json(json!({ "model": "m1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "embeddings": [[1.0, 2.0]]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embed/text"))
            .and(body_partial_json(json!({ "model": "m2" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [3.0, 4.0] }]
            })))
            .mount(&server)
            .await;

        let m1 = HttpProvider::new("m1", &config(&server.uri())).unwrap();
        assert_eq!(m1.embed(vec!["x".into()]).await.unwrap(), vec![vec![1.0, 2.0]]);

        let m2 = HttpProvider::new("m2", &config(&server.uri())).unwrap();
        assert_eq!(m2.embed(vec!["x".into()]).await.unwrap(), vec![vec![3.0, 4.0]]);
    }

    #[tokio::test]
    async fn test_failure_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embed/text"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpProvider::new("m", &config(&server.uri())).unwrap();
        let err = provider.embed(vec!["x".into()]).await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }
}
