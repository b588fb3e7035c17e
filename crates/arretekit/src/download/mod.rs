//! PDF downloading
//!
//! Design: a [`PdfFetcher`] turns a decree's PDF URL into a validated file
//! on disk. The server may answer with the document itself or with an HTML
//! gate page; [`RedirectRules`] decides where such a page points next.

mod redirect;
mod rules;

pub use redirect::{RedirectDownloader, DEFAULT_REDIRECT_DELAY, MAX_REDIRECTS};
pub use rules::{
    MetaRefreshRule, PdfAnchorRule, Redirect, RedirectRule, RedirectRules, ScriptLocationRule,
};

use crate::error::DownloadError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use url::Url;

/// A PDF written to disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfFile {
    /// Where the file was written
    pub path: PathBuf,
    /// Bytes written
    pub size_bytes: u64,
    /// URL that finally served the document
    pub final_url: Url,
    /// HTML redirect pages traversed before the document
    pub hops: usize,
}

/// Trait for PDF download strategies
///
/// Implementations must either leave a file starting with `%PDF` at `dest`
/// or return an error and leave nothing behind.
#[async_trait]
pub trait PdfFetcher: Send + Sync {
    /// Unique identifier for this fetcher (for logging/debugging)
    fn name(&self) -> &'static str;

    /// Download the document behind `url` into `dest`
    async fn fetch_pdf(&self, url: &str, dest: &Path) -> Result<PdfFile, DownloadError>;
}

/// Run `fetcher` up to `attempts` times, retrying transient failures
///
/// Waits `backoff` between attempts. Permanent failures such as a non-PDF
/// payload are returned immediately.
pub async fn fetch_with_retries(
    fetcher: &dyn PdfFetcher,
    url: &str,
    dest: &Path,
    attempts: u32,
    backoff: Duration,
) -> Result<PdfFile, DownloadError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match fetcher.fetch_pdf(url, dest).await {
            Ok(file) => return Ok(file),
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!(
                    fetcher = fetcher.name(),
                    url,
                    attempt,
                    attempts,
                    error = %e,
                    "PDF download failed, retrying"
                );
                attempt += 1;
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
