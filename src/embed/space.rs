//! Embedding space resolution
//!
//! An embedding space is provider + model + version. Chunks embedded in one
//! space are never mixed with another's, so resolution has to be
//! deterministic: explicit space id, then explicit model/provider, then the
//! environment, then the configured default.

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Environment variable overriding the default provider
pub const ENV_EMBEDDING_PROVIDER: &str = "DOCSYNC_EMBEDDING_PROVIDER";

/// Environment variable overriding the default model
pub const ENV_EMBEDDING_MODEL: &str = "DOCSYNC_EMBEDDING_MODEL";

/// Hex digits of the id hash appended to a slug
const SLUG_HASH_LEN: usize = 8;

/// Concrete provider bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible `/v1/embeddings`
    OpenAi,
    /// Self-hosted sidecar `/v1/embed/text`
    Http,
    /// Local ONNX models via fastembed
    FastEmbed,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Http => write!(f, "http"),
            ProviderKind::FastEmbed => write!(f, "fastembed"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "openai-compatible" => Ok(ProviderKind::OpenAi),
            "http" | "https" | "sidecar" => Ok(ProviderKind::Http),
            "fastembed" | "local" => Ok(ProviderKind::FastEmbed),
            _ => Err(Error::Config(format!(
                "Unknown embedding provider '{}'; expected 'openai', 'http' or 'fastembed'",
                s
            ))),
        }
    }
}

/// A model the registry knows the dimension of
#[derive(Debug, Clone, Copy)]
pub struct KnownModel {
    pub provider: ProviderKind,
    pub model: &'static str,
    pub dimension: usize,
    /// Used when only the provider is selected
    pub provider_default: bool,
}

const KNOWN_MODELS: &[KnownModel] = &[
    KnownModel {
        provider: ProviderKind::OpenAi,
        model: "text-embedding-3-small",
        dimension: 1536,
        provider_default: true,
    },
    KnownModel {
        provider: ProviderKind::OpenAi,
        model: "text-embedding-3-large",
        dimension: 3072,
        provider_default: false,
    },
    KnownModel {
        provider: ProviderKind::OpenAi,
        model: "text-embedding-ada-002",
        dimension: 1536,
        provider_default: false,
    },
    KnownModel {
        provider: ProviderKind::Http,
        model: "nomic-ai/nomic-embed-text-v1.5",
        dimension: 768,
        provider_default: true,
    },
    KnownModel {
        provider: ProviderKind::Http,
        model: "BAAI/bge-m3",
        dimension: 1024,
        provider_default: false,
    },
    KnownModel {
        provider: ProviderKind::FastEmbed,
        model: "BAAI/bge-small-en-v1.5",
        dimension: 384,
        provider_default: true,
    },
    KnownModel {
        provider: ProviderKind::FastEmbed,
        model: "BAAI/bge-base-en-v1.5",
        dimension: 768,
        provider_default: false,
    },
    KnownModel {
        provider: ProviderKind::FastEmbed,
        model: "BAAI/bge-large-en-v1.5",
        dimension: 1024,
        provider_default: false,
    },
    KnownModel {
        provider: ProviderKind::FastEmbed,
        model: "sentence-transformers/all-MiniLM-L6-v2",
        dimension: 384,
        provider_default: false,
    },
];

/// Look up a model, optionally restricted to one provider
pub fn lookup_model(provider: Option<ProviderKind>, model: &str) -> Option<&'static KnownModel> {
    KNOWN_MODELS.iter().find(|known| {
        known.model.eq_ignore_ascii_case(model) && provider.map_or(true, |p| p == known.provider)
    })
}

/// Default model of a provider
pub fn default_model_for(provider: ProviderKind) -> Option<&'static KnownModel> {
    KNOWN_MODELS
        .iter()
        .find(|known| known.provider == provider && known.provider_default)
}

/// A possibly partial embedding selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSelector {
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Fully qualified id, `provider/model@version`
    pub space_id: Option<String>,
    pub version: Option<String>,
}

impl EmbeddingSelector {
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
            && self.model.is_none()
            && self.space_id.is_none()
            && self.version.is_none()
    }
}

/// Fallbacks used when the selector leaves gaps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingDefaults {
    pub env_provider: Option<String>,
    pub env_model: Option<String>,
    pub provider: String,
    pub model: String,
    pub version: String,
    /// Dimension for models the registry does not know
    pub dimension: Option<usize>,
}

impl EmbeddingDefaults {
    /// Defaults from config, without consulting the environment
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        Self {
            env_provider: None,
            env_model: None,
            provider: config.provider.clone(),
            model: config.model.clone(),
            version: config.version.clone(),
            dimension: config.dimension,
        }
    }

    /// Defaults from config plus `DOCSYNC_EMBEDDING_*` environment variables
    pub fn from_env(config: &EmbeddingConfig) -> Self {
        let read = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            env_provider: read(ENV_EMBEDDING_PROVIDER),
            env_model: read(ENV_EMBEDDING_MODEL),
            ..Self::from_config(config)
        }
    }
}

/// A fully resolved embedding space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    pub provider: ProviderKind,
    pub model: String,
    pub version: String,
    pub dimension: usize,
}

impl EmbeddingSpace {
    /// `provider/model@version`
    pub fn id(&self) -> String {
        format!("{}/{}@{}", self.provider, self.model, self.version)
    }

    /// Identifier safe for table and collection names. The readable part is
    /// lossy, so a short hash of the exact id keeps distinct spaces apart.
    pub fn slug(&self) -> String {
        let raw = format!("{}_{}_{}", self.provider, self.model, self.version).to_lowercase();
        let mut slug = String::with_capacity(raw.len());
        for c in raw.chars() {
            let c = if c.is_ascii_alphanumeric() { c } else { '_' };
            if c == '_' && slug.ends_with('_') {
                continue;
            }
            slug.push(c);
        }
        let digest = blake3::hash(self.id().as_bytes()).to_hex();
        format!("{}_{}", slug.trim_matches('_'), &digest.as_str()[..SLUG_HASH_LEN])
    }
}

impl fmt::Display for EmbeddingSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Split `provider/model@version` into its parts
fn parse_space_id(space_id: &str) -> Result<(ProviderKind, String, Option<String>)> {
    let (provider, rest) = space_id.split_once('/').ok_or_else(|| {
        Error::Config(format!(
            "Invalid embedding space id '{}'; expected provider/model@version",
            space_id
        ))
    })?;
    let (model, version) = match rest.rsplit_once('@') {
        Some((model, version)) if !version.is_empty() => (model, Some(version.to_string())),
        _ => (rest, None),
    };
    if model.is_empty() {
        return Err(Error::Config(format!(
            "Invalid embedding space id '{}': empty model",
            space_id
        )));
    }
    Ok((provider.parse()?, model.to_string(), version))
}

/// Fill in whichever of provider/model is missing
fn complete(
    provider: Option<&str>,
    model: Option<&str>,
    defaults: &EmbeddingDefaults,
) -> Result<(ProviderKind, String)> {
    let provider = provider.map(ProviderKind::from_str).transpose()?;

    match (provider, model) {
        (Some(provider), Some(model)) => Ok((provider, model.to_string())),
        (None, Some(model)) => {
            let provider = match lookup_model(None, model) {
                Some(known) => known.provider,
                None => defaults.provider.parse()?,
            };
            Ok((provider, model.to_string()))
        }
        (Some(provider), None) => {
            let global: ProviderKind = defaults.provider.parse()?;
            if let Some(known) = default_model_for(provider) {
                Ok((provider, known.model.to_string()))
            } else if provider == global {
                Ok((provider, defaults.model.clone()))
            } else {
                Err(Error::Config(format!(
                    "No default model known for provider '{}'",
                    provider
                )))
            }
        }
        (None, None) => Ok((defaults.provider.parse()?, defaults.model.clone())),
    }
}

/// Resolve a possibly partial selector into a concrete embedding space
pub fn resolve_embedding_space(
    selector: &EmbeddingSelector,
    defaults: &EmbeddingDefaults,
) -> Result<EmbeddingSpace> {
    let (provider, model, id_version) = if let Some(space_id) = &selector.space_id {
        parse_space_id(space_id)?
    } else if selector.model.is_some() || selector.provider.is_some() {
        let (p, m) = complete(
            selector.provider.as_deref(),
            selector.model.as_deref(),
            defaults,
        )?;
        (p, m, None)
    } else if defaults.env_provider.is_some() || defaults.env_model.is_some() {
        let (p, m) = complete(
            defaults.env_provider.as_deref(),
            defaults.env_model.as_deref(),
            defaults,
        )?;
        (p, m, None)
    } else {
        let (p, m) = complete(None, None, defaults)?;
        (p, m, None)
    };

    let version = id_version
        .or_else(|| selector.version.clone())
        .unwrap_or_else(|| defaults.version.clone());

    let dimension = lookup_model(Some(provider), &model)
        .map(|known| known.dimension)
        .or(defaults.dimension)
        .ok_or_else(|| {
            Error::Config(format!(
                "Unknown dimension for model '{}' ({}); set embedding.dimension",
                model, provider
            ))
        })?;

    Ok(EmbeddingSpace {
        provider,
        model,
        version,
        dimension,
    })
}
