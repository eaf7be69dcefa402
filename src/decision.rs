//! Per-document change decision
//!
//! `decide_ingest_action` is the single policy every ingestion entry point
//! goes through. Callers gather the facts (hash comparison, metadata
//! comparison, provider coverage) and never branch on skip logic themselves.

use crate::state::DocumentState;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Requested ingestion mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionType {
    /// Re-ingest everything regardless of detected changes
    Full,
    /// Only ingest what changed
    Partial,
}

impl fmt::Display for IngestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestionType::Full => write!(f, "full"),
            IngestionType::Partial => write!(f, "partial"),
        }
    }
}

impl FromStr for IngestionType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(IngestionType::Full),
            "partial" => Ok(IngestionType::Partial),
            _ => Err(crate::error::Error::Config(format!(
                "Unknown ingestion type: {}",
                s
            ))),
        }
    }
}

/// Outcome of the decision engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IngestAction {
    Skip,
    MetadataOnly,
    Full,
}

impl fmt::Display for IngestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestAction::Skip => write!(f, "skip"),
            IngestAction::MetadataOnly => write!(f, "metadata-only"),
            IngestAction::Full => write!(f, "full"),
        }
    }
}

/// Facts the decision is made from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestDecision {
    pub content_unchanged: bool,
    pub metadata_unchanged: bool,
    pub ingestion_type: IngestionType,
    /// The active embedding space already holds chunks for this document
    pub provider_has_chunks: bool,
}

/// Decide what to do with one document
pub fn decide_ingest_action(decision: IngestDecision) -> IngestAction {
    if decision.ingestion_type == IngestionType::Full {
        return IngestAction::Full;
    }

    if !decision.content_unchanged {
        return IngestAction::Full;
    }

    if !decision.metadata_unchanged {
        return IngestAction::MetadataOnly;
    }

    if decision.provider_has_chunks {
        IngestAction::Skip
    } else {
        // Same content, but this embedding space never embedded it
        IngestAction::Full
    }
}

/// True only when prior state exists with the same content hash and, if the
/// source reported a modification time, the same one.
pub fn is_unchanged(
    existing: Option<&DocumentState>,
    content_hash: &str,
    last_source_update: Option<&str>,
) -> bool {
    let Some(existing) = existing else {
        return false;
    };

    if existing.content_hash.as_deref() != Some(content_hash) {
        return false;
    }

    match last_source_update {
        None => true,
        Some(incoming) => {
            let incoming = normalize_timestamp(incoming);
            let stored = existing
                .last_source_update
                .as_deref()
                .and_then(normalize_timestamp);
            incoming.is_some() && incoming == stored
        }
    }
}

/// Normalize a source timestamp to RFC 3339 UTC with millisecond precision.
///
/// Accepts RFC 3339 strings (any offset) and epoch numbers; epochs above
/// 10^11 are treated as milliseconds, smaller ones as seconds. Unparseable
/// non-empty values are kept verbatim (trimmed) so they still compare
/// against themselves.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(format_utc(parsed.with_timezone(&Utc)));
    }

    if let Ok(parsed) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(format_utc(parsed.with_timezone(&Utc)));
    }

    if let Ok(epoch) = trimmed.parse::<f64>() {
        if epoch.is_finite() {
            let millis = if epoch.abs() >= 1e11 {
                epoch as i64
            } else {
                (epoch * 1000.0) as i64
            };
            if let Some(dt) = Utc.timestamp_millis_opt(millis).single() {
                return Some(format_utc(dt));
            }
        }
    }

    Some(trimmed.to_string())
}

fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
