//! Decree records

use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize};

/// Prefix of every storage error sentinel
pub const STORAGE_ERROR_PREFIX: &str = "ERROR:";

/// Length of [`content_hash`] output, in hex characters
pub const CONTENT_HASH_LEN: usize = 8;

/// Maximum length of [`DecreeRecord::content_preview`], in characters
pub const PREVIEW_LEN: usize = 200;

/// One administrative decree found on the listing
///
/// Field order is the ledger column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecreeRecord {
    /// Decree number such as `2025-01535`, may be empty
    #[serde(default)]
    pub number: String,

    /// Title, narrowed to this decree
    #[serde(default)]
    pub title: String,

    /// Publication date as found on the page, may be empty
    #[serde(default)]
    pub publication_date: String,

    /// Absolute URL of the detail page
    #[serde(default)]
    pub detail_link: String,

    /// Absolute URL of the PDF or of a redirect page
    #[serde(default)]
    pub pdf_url: String,

    /// Title mentions "circulation"
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_traffic_related: bool,

    /// First characters of the decree text
    #[serde(default)]
    pub content_preview: String,

    /// Stable identifier derived from number and title
    #[serde(default)]
    pub content_hash: String,

    /// Storage URL, or an error sentinel after a failed archival
    #[serde(default)]
    pub storage_url: Option<String>,

    /// Archived size in KB
    #[serde(default)]
    pub storage_size_kb: Option<f64>,

    /// Extraction time
    pub scrape_timestamp: NaiveDateTime,
}

impl DecreeRecord {
    /// Build a record from extracted fields, deriving hash and classification
    pub fn new(
        number: impl Into<String>,
        title: impl Into<String>,
        publication_date: impl Into<String>,
        detail_link: impl Into<String>,
        pdf_url: impl Into<String>,
        content: &str,
    ) -> Self {
        let number = number.into();
        let title = title.into();
        Self {
            content_hash: content_hash(&number, &title),
            is_traffic_related: is_traffic_related(&title),
            content_preview: truncate_chars(content, PREVIEW_LEN),
            number,
            title,
            publication_date: publication_date.into(),
            detail_link: detail_link.into(),
            pdf_url: pdf_url.into(),
            storage_url: None,
            storage_size_kb: None,
            scrape_timestamp: chrono::Local::now().naive_local(),
        }
    }

    /// Upsert key in the ledger
    pub fn ledger_key(&self) -> (&str, &str) {
        (&self.number, &self.publication_date)
    }

    /// Archived successfully (storage URL present and not a sentinel)
    pub fn is_archived(&self) -> bool {
        matches!(&self.storage_url, Some(url) if !url.is_empty() && !url.starts_with(STORAGE_ERROR_PREFIX))
    }

    /// Archival was attempted and failed
    pub fn has_storage_error(&self) -> bool {
        matches!(&self.storage_url, Some(url) if url.starts_with(STORAGE_ERROR_PREFIX))
    }

    /// No archival attempted yet
    pub fn storage_pending(&self) -> bool {
        self.storage_url.as_deref().map_or(true, |url| url.trim().is_empty())
    }
}

/// Short fingerprint of `number + title`
///
/// First eight hex characters of the MD5 digest; identical across runs for
/// the same inputs.
pub fn content_hash(number: &str, title: &str) -> String {
    let digest = md5::compute(format!("{number}{title}"));
    let mut hex = format!("{:x}", digest);
    hex.truncate(CONTENT_HASH_LEN);
    hex
}

/// Keyword classifier: true iff the title mentions "circulation"
pub fn is_traffic_related(title: &str) -> bool {
    title.to_lowercase().contains("circulation")
}

/// Error sentinel stored in place of a storage URL
pub fn storage_error(step: &str, reason: impl std::fmt::Display) -> String {
    format!("{STORAGE_ERROR_PREFIX} {step} failed ({reason})")
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Accepts `true`/`false` in any case, `1`/`0` and empty
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!("invalid flag '{other}'"))),
    }
}
