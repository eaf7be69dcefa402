//! Web pages fetched over HTTP

use super::{DocumentIdentity, DocumentSource, SourceDocument};
use crate::config::SourceConfig;
use crate::error::{Error, Result};
use crate::hashing::normalize_metadata;
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, LAST_MODIFIED};
use reqwest::Client;
use scraper::{Html, Selector};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Source label for a single URL
pub const WEB_SOURCE_LABEL: &str = "web";

/// Source label for an ad hoc list of URLs
pub const MANUAL_URL_SOURCE_LABEL: &str = "manual/url";

/// Normalize a URL into a canonical document id: lower-case host, no
/// fragment, no trailing slash (except for the root path).
pub fn normalize_url(raw: &str) -> Result<String> {
    let parsed = Url::parse(raw.trim())?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::Source(format!(
                "Unsupported URL scheme '{}' in {}",
                other, raw
            )))
        }
    }

    let mut normalized = parsed.clone();
    normalized.set_fragment(None);

    let path = parsed.path().trim_end_matches('/');
    if path.is_empty() {
        normalized.set_path("/");
    } else {
        normalized.set_path(path);
    }

    Ok(normalized.to_string())
}

/// Extract `(title, plain text)` from an HTML page
pub fn extract_html(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|selector| {
            document
                .select(&selector)
                .next()
                .map(|elem| elem.text().collect::<String>().trim().to_string())
        })
        .filter(|t| !t.is_empty());

    let body_selector = Selector::parse("body").ok();
    let root = body_selector
        .as_ref()
        .and_then(|s| document.select(s).next())
        .map(|body| body.html())
        .unwrap_or_else(|| html.to_string());

    let text = html2text::from_read(root.as_bytes(), 80).unwrap_or_else(|_| root.clone());
    (title, text)
}

/// Fetches a fixed list of URLs
pub struct WebSource {
    client: Client,
    urls: Vec<String>,
    label: String,
}

impl WebSource {
    pub fn new(urls: Vec<String>, config: &SourceConfig) -> Result<Self> {
        let label = if urls.len() == 1 {
            WEB_SOURCE_LABEL
        } else {
            MANUAL_URL_SOURCE_LABEL
        };
        Self::with_label(urls, config, label)
    }

    pub fn with_label(urls: Vec<String>, config: &SourceConfig, label: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| Error::Source(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            urls,
            label: label.to_string(),
        })
    }
}

#[async_trait]
impl DocumentSource for WebSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_candidates(&self) -> Result<Vec<DocumentIdentity>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::with_capacity(self.urls.len());

        for raw in &self.urls {
            let canonical = normalize_url(raw)?;
            if seen.insert(canonical.clone()) {
                candidates.push(
                    DocumentIdentity::new(canonical.clone(), raw.trim()).with_url(canonical),
                );
            }
        }

        Ok(candidates)
    }

    async fn fetch(&self, identity: &DocumentIdentity) -> Result<SourceDocument> {
        let url = identity
            .source_url
            .as_deref()
            .unwrap_or(&identity.canonical_id);
        debug!("Fetching: {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Source(format!("HTTP {} for {}", status, url)));
        }

        let headers = response.headers();
        let last_modified = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;

        let is_html = content_type
            .as_deref()
            .map_or(true, |ct| ct.contains("html"));
        let (title, plain_text) = if is_html {
            extract_html(&body)
        } else {
            (None, body)
        };

        let domain = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        let raw_metadata = json!({
            "domain": domain,
            "contentType": content_type
                .as_deref()
                .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_string()),
        });

        Ok(SourceDocument {
            identity: identity.clone(),
            title,
            plain_text,
            last_modified,
            metadata: normalize_metadata(raw_metadata.as_object()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("https://Example.COM/path/").unwrap(),
            "https://example.com/path"
        );
        assert_eq!(
            normalize_url("https://example.com/path#fragment").unwrap(),
            "https://example.com/path"
        );
        assert_eq!(
            normalize_url("https://example.com").unwrap(),
            "https://example.com/"
        );
        assert!(normalize_url("ftp://example.com/a").is_err());
        assert!(normalize_url("not a url").is_err());
    }

    #[test]
    fn test_extract_html() {
        let (title, text) = extract_html(
            "<html><head><title> Hello </title></head><body><p>First para</p><p>Second</p></body></html>",
        );
        assert_eq!(title.as_deref(), Some("Hello"));
        assert!(text.contains("First para"));
        assert!(text.contains("Second"));
    }

    #[tokio::test]
    async fn test_labels_and_dedup() {
        let config = SourceConfig::default();
        let single = WebSource::new(vec!["https://example.com/a".into()], &config).unwrap();
        assert_eq!(single.label(), WEB_SOURCE_LABEL);

        let many = WebSource::new(
            vec![
                "https://example.com/a".into(),
                "https://example.com/a/".into(),
                "https://example.com/b".into(),
            ],
            &config,
        )
        .unwrap();
        assert_eq!(many.label(), MANUAL_URL_SOURCE_LABEL);
        let candidates = many.list_candidates().await.unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].canonical_id, "https://example.com/a");
    }

    #[tokio::test]
    async fn test_fetch_html_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/doc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("last-modified", "Wed, 01 May 2024 12:00:00 GMT")
                    .set_body_raw(
                        "<html><head><title>Doc</title></head><body><p>Body text</p></body></html>"
                            .as_bytes()
                            .to_vec(),
                        "text/html; charset=utf-8",
                    ),
            )
            .mount(&server)
            .await;

        let source = WebSource::new(vec![format!("{}/doc", server.uri())], &SourceConfig::default())
            .unwrap();
        let identity = source.list_candidates().await.unwrap().remove(0);
        let doc = source.fetch(&identity).await.unwrap();

        assert_eq!(doc.title.as_deref(), Some("Doc"));
        assert!(doc.plain_text.contains("Body text"));
        assert_eq!(
            doc.last_modified.as_deref(),
            Some("Wed, 01 May 2024 12:00:00 GMT")
        );
        let metadata = doc.metadata.unwrap();
        assert_eq!(metadata.get("contentType"), Some(&json!("text/html")));
        assert_eq!(metadata.get("domain"), Some(&json!("127.0.0.1")));
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = WebSource::new(vec![format!("{}/gone", server.uri())], &SourceConfig::default())
            .unwrap();
        let identity = source.list_candidates().await.unwrap().remove(0);
        let err = source.fetch(&identity).await.unwrap_err();
        assert!(matches!(err, Error::Source(_)));
    }
}
