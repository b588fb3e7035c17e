//! Archival pipeline
//!
//! For every record with a PDF link: skip if the object is already stored,
//! otherwise download, upload and drop the local copy. Failures are
//! written into `storage_url` as sentinels so a later run can tell
//! "failed" apart from "never tried".
//!
//! Against a simulated store records are left exactly as they were: a dry
//! run downloads and validates, but never marks anything archived or failed.

use crate::config::Config;
use crate::download::{fetch_with_retries, PdfFetcher};
use crate::record::{content_hash, storage_error, DecreeRecord};
use crate::storage::{pdf_filename, size_kb, storage_key, ObjectStore};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between transient download failures
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);

/// What an archival pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Downloaded and uploaded
    pub archived: usize,
    /// Found in storage, not downloaded
    pub already_stored: usize,
    /// Marked with an error sentinel (or, in a dry run, would have been)
    pub failed: usize,
    /// Downloaded in a dry run, record left untouched
    pub simulated: usize,
    /// No PDF link, or nothing to do
    pub skipped: usize,
}

/// Moves decree PDFs from the source site into the object store
pub struct Archiver {
    store: Box<dyn ObjectStore>,
    fetcher: Box<dyn PdfFetcher>,
    data_dir: PathBuf,
    attempts: u32,
    retry_backoff: Duration,
    delay: Duration,
}

impl Archiver {
    pub fn new(store: Box<dyn ObjectStore>, fetcher: Box<dyn PdfFetcher>, config: &Config) -> Self {
        Self {
            store,
            fetcher,
            data_dir: config.data_dir.clone(),
            attempts: config.pdf_max_attempts,
            retry_backoff: RETRY_BACKOFF,
            delay: config.scrape_delay,
        }
    }

    /// Override the pause between download retries
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// The store records are archived into
    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    fn wants(record: &DecreeRecord, retry_failed: bool) -> bool {
        if record.pdf_url.trim().is_empty() {
            return false;
        }
        record.storage_pending() || (retry_failed && record.has_storage_error())
    }

    /// Archive every eligible record in place
    ///
    /// Records without a PDF link or already carrying a storage URL are
    /// skipped; `retry_failed` also reprocesses records with an error
    /// sentinel.
    pub async fn archive(&self, records: &mut [DecreeRecord], retry_failed: bool) -> ArchiveSummary {
        let mut summary = ArchiveSummary::default();
        let mut downloaded_any = false;

        for record in records.iter_mut() {
            if !Self::wants(record, retry_failed) {
                summary.skipped += 1;
                continue;
            }

            if record.content_hash.is_empty() {
                record.content_hash = content_hash(&record.number, &record.title);
            }
            let key = storage_key(
                &record.number,
                &record.content_hash,
                &record.publication_date,
            );

            match self.store.exists(&key).await {
                Ok(Some(info)) if self.store.is_simulated() => {
                    debug!(key, size = info.size, "[dry run] already stored");
                    summary.already_stored += 1;
                    continue;
                }
                Ok(Some(info)) => {
                    debug!(key, size = info.size, "already stored, skipping download");
                    record.storage_url = Some(self.store.url_for(&key));
                    record.storage_size_kb = Some(size_kb(info.size));
                    summary.already_stored += 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(key, error = %e, "existence check failed, treating as absent"),
            }

            if downloaded_any {
                tokio::time::sleep(self.delay).await;
            }
            downloaded_any = true;

            match self.archive_one(record, &key).await {
                Outcome::Archived => summary.archived += 1,
                Outcome::Simulated => summary.simulated += 1,
                Outcome::Failed => summary.failed += 1,
            }
        }

        info!(
            archived = summary.archived,
            already_stored = summary.already_stored,
            failed = summary.failed,
            skipped = summary.skipped,
            simulated = summary.simulated,
            store = self.store.name(),
            "archival finished"
        );
        summary
    }

    /// Record a failure unless the store only simulates
    fn mark_failed(&self, record: &mut DecreeRecord, sentinel: String) -> Outcome {
        if !self.store.is_simulated() {
            record.storage_url = Some(sentinel);
        }
        Outcome::Failed
    }

    /// Download then upload one record
    async fn archive_one(&self, record: &mut DecreeRecord, key: &str) -> Outcome {
        if let Err(e) = tokio::fs::create_dir_all(&self.data_dir).await {
            return self.mark_failed(record, storage_error("PDF download", e));
        }
        let dest = self
            .data_dir
            .join(pdf_filename(&record.number, &record.content_hash));

        let file = match fetch_with_retries(
            self.fetcher.as_ref(),
            &record.pdf_url,
            &dest,
            self.attempts,
            self.retry_backoff,
        )
        .await
        {
            Ok(file) => file,
            Err(e) => {
                warn!(url = %record.pdf_url, error = %e, "PDF download failed");
                remove_temp(&dest).await;
                return self.mark_failed(record, storage_error("PDF download", &e));
            }
        };

        let outcome = match self.store.upload(&file.path, key).await {
            Ok(url) if self.store.is_simulated() => {
                debug!(url = %url, "[dry run] record left unarchived");
                Outcome::Simulated
            }
            Ok(url) => {
                record.storage_url = Some(url);
                record.storage_size_kb = Some(size_kb(file.size_bytes));
                Outcome::Archived
            }
            Err(e) => {
                warn!(key, error = %e, "upload failed");
                self.mark_failed(record, storage_error("upload", &e))
            }
        };
        remove_temp(&file.path).await;
        outcome
    }
}

enum Outcome {
    Archived,
    Simulated,
    Failed,
}

async fn remove_temp(path: &std::path::Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove temporary PDF"),
    }
}
