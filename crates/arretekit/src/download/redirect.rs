//! Redirect-following PDF downloader
//!
//! Opens a session on the document's origin first so the anti-bot cookies
//! are set, then follows HTML gate pages until the server hands over a PDF.

use super::{PdfFetcher, PdfFile, RedirectRules};
use crate::client::browser_client;
use crate::error::DownloadError;
use crate::pdf::{is_valid_pdf, is_valid_pdf_file, PDF_MAGIC};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderValue, CONTENT_TYPE, REFERER};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

/// Most HTML pages followed before giving up
pub const MAX_REDIRECTS: usize = 5;

/// Pause before following a redirect page
pub const DEFAULT_REDIRECT_DELAY: Duration = Duration::from_millis(500);

/// Timeout of the session bootstrap request
const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Plain-HTTP downloader following script, meta and link redirects
///
/// The underlying client keeps its cookie jar for its whole lifetime, so
/// one downloader shares a session across every document it fetches.
pub struct RedirectDownloader {
    client: reqwest::Client,
    rules: RedirectRules,
    redirect_delay: Duration,
    timeout: Duration,
}

impl RedirectDownloader {
    /// Create a downloader whose document requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let client = browser_client(timeout).map_err(DownloadError::ClientBuildError)?;
        Ok(Self {
            client,
            rules: RedirectRules::with_defaults(),
            redirect_delay: DEFAULT_REDIRECT_DELAY,
            timeout,
        })
    }

    /// Override the pause between redirect hops
    pub fn with_redirect_delay(mut self, delay: Duration) -> Self {
        self.redirect_delay = delay;
        self
    }

    /// Replace the redirect rules
    pub fn with_rules(mut self, rules: RedirectRules) -> Self {
        self.rules = rules;
        self
    }

    /// Visit the origin once so the server sets its session cookies
    ///
    /// Failure is not fatal; the download is attempted anyway.
    async fn bootstrap(&self, origin: &str) {
        match self
            .client
            .get(origin)
            .timeout(BOOTSTRAP_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => {
                debug!(origin, status = response.status().as_u16(), "session opened");
                tokio::time::sleep(self.redirect_delay).await;
            }
            Err(e) => warn!(origin, error = %e, "could not open session, continuing"),
        }
    }
}

#[async_trait]
impl PdfFetcher for RedirectDownloader {
    fn name(&self) -> &'static str {
        "redirect"
    }

    async fn fetch_pdf(&self, url: &str, dest: &Path) -> Result<PdfFile, DownloadError> {
        let mut current = Url::parse(url).map_err(|_| DownloadError::InvalidUrl(url.to_string()))?;
        if !matches!(current.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidUrl(url.to_string()));
        }

        let origin = current.origin().ascii_serialization();
        self.bootstrap(&origin).await;

        for hop in 0..MAX_REDIRECTS {
            debug!(hop, url = %current, "requesting document");
            let mut request = self.client.get(current.clone());
            if let Ok(referer) = HeaderValue::from_str(&origin) {
                request = request.header(REFERER, referer);
            }
            let response = request.send().await.map_err(DownloadError::from_reqwest)?;

            let status = response.status();
            if status == reqwest::StatusCode::FORBIDDEN {
                return Err(DownloadError::Forbidden);
            }
            if !status.is_success() {
                return Err(DownloadError::HttpStatus(status.as_u16()));
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_lowercase();

            if is_document_content_type(&content_type) {
                let final_url = response.url().clone();
                let size_bytes = write_pdf(response, dest, self.timeout).await?;
                info!(url = %final_url, hops = hop, size_bytes, path = %dest.display(), "PDF downloaded");
                return Ok(PdfFile {
                    path: dest.to_path_buf(),
                    size_bytes,
                    final_url,
                    hops: hop,
                });
            }

            if !content_type.contains("text/html") {
                return Err(DownloadError::UnexpectedContentType(content_type));
            }

            let page_url = response.url().clone();
            let html = response.text().await.map_err(DownloadError::from_reqwest)?;
            let redirect = self
                .rules
                .find(&html, &page_url)
                .ok_or_else(|| DownloadError::NoRedirectFound(page_url.to_string()))?;
            debug!(rule = redirect.rule, target = %redirect.url, "following redirect");
            current = redirect.url;
            tokio::time::sleep(self.redirect_delay).await;
        }

        Err(DownloadError::TooManyRedirects(MAX_REDIRECTS))
    }
}

/// PDF or generic binary payload
fn is_document_content_type(content_type: &str) -> bool {
    content_type.contains("application/pdf") || content_type.contains("application/octet-stream")
}

/// Stream a document body to `dest`, checking its signature on the way
///
/// Nothing is written until the first four bytes are known to be `%PDF`.
/// Any failure removes the partial file.
async fn write_pdf(
    response: reqwest::Response,
    dest: &Path,
    timeout: Duration,
) -> Result<u64, DownloadError> {
    let result = stream_to_file(response, dest, timeout).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(dest).await;
    }
    let written = result?;

    if !is_valid_pdf_file(dest).await {
        let _ = tokio::fs::remove_file(dest).await;
        return Err(DownloadError::NotPdf(Vec::new()));
    }
    Ok(written)
}

async fn stream_to_file(
    response: reqwest::Response,
    dest: &Path,
    timeout: Duration,
) -> Result<u64, DownloadError> {
    let mut stream = response.bytes_stream();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut head: Vec<u8> = Vec::with_capacity(PDF_MAGIC.len());
    let mut file: Option<tokio::fs::File> = None;
    let mut written: u64 = 0;

    loop {
        let chunk = tokio::select! {
            chunk = stream.next() => chunk,
            _ = tokio::time::sleep_until(deadline) => {
                warn!(path = %dest.display(), written, "body timeout reached");
                return Err(DownloadError::Timeout);
            }
        };

        match chunk {
            Some(Ok(bytes)) => {
                if let Some(out) = file.as_mut() {
                    out.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                    continue;
                }
                head.extend_from_slice(&bytes);
                if head.len() < PDF_MAGIC.len() {
                    continue;
                }
                if !is_valid_pdf(&head) {
                    head.truncate(PDF_MAGIC.len());
                    return Err(DownloadError::NotPdf(head));
                }
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let mut out = tokio::fs::File::create(dest).await?;
                out.write_all(&head).await?;
                written = head.len() as u64;
                file = Some(out);
            }
            Some(Err(e)) => return Err(DownloadError::from_reqwest(e)),
            None => break,
        }
    }

    match file {
        Some(mut out) => {
            out.flush().await?;
            Ok(written)
        }
        None => Err(DownloadError::NotPdf(head)),
    }
}
