//! Object storage for archived PDFs
//!
//! Design: the archival pipeline talks to an [`ObjectStore`]. [`S3Store`]
//! speaks the S3 REST protocol; [`DryRunStore`] answers without touching
//! the network so a dry run exercises the same code path.

mod s3;

pub use s3::S3Store;

use crate::config::Config;
use crate::error::StorageError;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

/// Key prefix of every archived decree
pub const KEY_PREFIX: &str = "arretes/";

static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}").expect("year regex"));
static UNSAFE_KEY_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("key sanitizing regex"));

/// Metadata of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Size in bytes
    pub size: u64,
}

/// One listed object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub key: String,
    pub size: u64,
}

/// Blob storage used to archive decree PDFs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Unique identifier for this store (for logging/debugging)
    fn name(&self) -> &'static str;

    /// Metadata of the object at `key`, `None` when absent
    async fn exists(&self, key: &str) -> Result<Option<ObjectInfo>, StorageError>;

    /// Upload a local file to `key` and return its storage URL
    async fn upload(&self, path: &Path, key: &str) -> Result<String, StorageError>;

    /// Every object whose key starts with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectEntry>, StorageError>;

    /// Storage URL recorded for `key`
    fn url_for(&self, key: &str) -> String;

    /// Writes are only logged; nothing a caller records should depend on them
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Store that simulates every write
///
/// Nothing exists and nothing is listed, so every record goes through the
/// download step; uploads only log the URL they would have produced and
/// callers must not persist that URL.
pub struct DryRunStore {
    bucket: String,
}

impl DryRunStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
        }
    }
}

impl Default for DryRunStore {
    fn default() -> Self {
        Self::new("dry-run")
    }
}

#[async_trait]
impl ObjectStore for DryRunStore {
    fn name(&self) -> &'static str {
        "dry_run"
    }

    async fn exists(&self, _key: &str) -> Result<Option<ObjectInfo>, StorageError> {
        Ok(None)
    }

    async fn upload(&self, _path: &Path, key: &str) -> Result<String, StorageError> {
        let url = self.url_for(key);
        info!(url = %url, "[dry run] upload simulated");
        Ok(url)
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<ObjectEntry>, StorageError> {
        Ok(Vec::new())
    }

    fn url_for(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// Pick the store matching the run mode
pub fn store_from_config(config: &Config) -> Result<Box<dyn ObjectStore>, StorageError> {
    match (&config.storage, config.dry_run) {
        (Some(storage), false) => Ok(Box::new(S3Store::new(storage, config.http_timeout)?)),
        (Some(storage), true) => Ok(Box::new(DryRunStore::new(storage.bucket.clone()))),
        (None, _) => Ok(Box::new(DryRunStore::default())),
    }
}

/// Decree number reduced to characters safe in a key, `arrete` when empty
pub fn sanitize_number(number: &str) -> String {
    let clean = UNSAFE_KEY_CHARS.replace_all(number, "");
    let clean = clean.trim();
    if clean.is_empty() {
        "arrete".to_string()
    } else {
        clean.to_string()
    }
}

/// First four-digit run in the publication date, else the current year
pub fn publication_year(publication_date: &str) -> i32 {
    YEAR.find(publication_date)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or_else(current_year)
}

pub(crate) fn current_year() -> i32 {
    use chrono::Datelike;
    chrono::Local::now().year()
}

/// `<sanitized number>_<hash>.pdf`
pub fn pdf_filename(number: &str, content_hash: &str) -> String {
    format!("{}_{}.pdf", sanitize_number(number), content_hash)
}

/// `arretes/<year>/<sanitized number>_<hash>.pdf`
pub fn storage_key(number: &str, content_hash: &str, publication_date: &str) -> String {
    format!(
        "{KEY_PREFIX}{}/{}",
        publication_year(publication_date),
        pdf_filename(number, content_hash)
    )
}

/// Bytes to KB, rounded to two decimals
pub fn size_kb(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 * 100.0).round() / 100.0
}
