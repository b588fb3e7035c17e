//! ArreteKit - scraper and archiver for prefecture decrees
//!
//! This crate walks a paginated listing of administrative decrees
//! ("arrêtés"), extracts one record per decree, downloads the PDF behind
//! each record and archives it in S3-compatible object storage. Results are
//! kept in a CSV ledger keyed by decree number and publication date.
//!
//! ## Pipeline
//!
//! - [`PaginationDriver`] drives a [`ListingPage`] through the listing and
//!   runs [`extract_records`] on every page
//! - [`Archiver`] resolves each record's PDF with a [`PdfFetcher`] and
//!   uploads it to an [`ObjectStore`]
//! - [`Ledger`] upserts the records into the CSV files
//!
//! Built-in collaborators:
//! - [`HttpListingPage`] - server-rendered listings over HTTP
//! - [`RedirectDownloader`] - follows HTML gate pages until a PDF is served
//! - [`S3Store`] / [`DryRunStore`] - real and simulated storage

pub mod archive;
pub mod browser;
pub mod client;
pub mod config;
pub mod download;
mod error;
pub mod extract;
pub mod ledger;
pub mod paginate;
pub mod pdf;
pub mod reconcile;
pub mod record;
pub mod storage;
pub mod strategy;

pub use archive::{ArchiveSummary, Archiver};
pub use browser::{HttpListingPage, ListingPage};
pub use config::{Config, StorageConfig};
pub use download::{fetch_with_retries, PdfFetcher, PdfFile, RedirectDownloader, RedirectRules};
pub use error::{
    BrowserError, ConfigError, DownloadError, ExtractError, LedgerError, StorageError,
};
pub use extract::{extract_records, ExtractOptions};
pub use ledger::{merge_records, Ledger};
pub use paginate::{DriverState, PaginationDriver, ScrapeRun};
pub use pdf::{is_valid_pdf, is_valid_pdf_file};
pub use reconcile::{reconcile, ReconcileSummary};
pub use record::DecreeRecord;
pub use storage::{store_from_config, storage_key, DryRunStore, ObjectStore, S3Store};
