//! Error types for arretekit

use thiserror::Error;

/// Errors that end a PDF download attempt
///
/// The downloader never lets a raw network fault escape; every failure
/// is mapped onto one of these variants.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// URL could not be parsed or is not http(s)
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to build HTTP client
    #[error("Failed to create HTTP client")]
    ClientBuildError(#[source] reqwest::Error),

    /// Request or body read timed out
    #[error("Request timed out")]
    Timeout,

    /// Failed to connect to server
    #[error("Failed to connect to server")]
    Connect(#[source] reqwest::Error),

    /// Other request error
    #[error("Request failed: {0}")]
    Request(String),

    /// Server answered 403, usually the anti-bot gate
    #[error("Access forbidden (HTTP 403): blocked by the server")]
    Forbidden,

    /// Any other non-success HTTP status
    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),

    /// Declared PDF but the magic bytes disagree
    #[error("Content is not a valid PDF (leading bytes {0:?})")]
    NotPdf(Vec<u8>),

    /// Content type that is neither PDF/binary nor HTML
    #[error("Unexpected content type: {0}")]
    UnexpectedContentType(String),

    /// HTML page without any usable redirect
    #[error("No redirect found in HTML page: {0}")]
    NoRedirectFound(String),

    /// Redirect budget exhausted
    #[error("Too many redirects ({0})")]
    TooManyRedirects(usize),

    /// Local file error while persisting the PDF
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Create an error from a reqwest error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::Timeout
        } else if err.is_connect() {
            DownloadError::Connect(err)
        } else {
            DownloadError::Request(err.to_string())
        }
    }

    /// Whether a fresh attempt could plausibly succeed
    ///
    /// Content mismatches and redirect dead ends depend on what the server
    /// serves, so only network-level faults qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Timeout
            | DownloadError::Connect(_)
            | DownloadError::Request(_)
            | DownloadError::Forbidden => true,
            DownloadError::HttpStatus(code) => *code >= 500,
            _ => false,
        }
    }
}

/// Fault while extracting one candidate element
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Candidate has no usable link
    #[error("Candidate has no link")]
    MissingLink,

    /// Link could not be resolved against the page URL
    #[error("Invalid link {href}: {source}")]
    InvalidLink {
        href: String,
        #[source]
        source: url::ParseError,
    },
}

/// Errors raised by the page rendering collaborator
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Failed to start the rendering engine
    #[error("Failed to start page renderer: {0}")]
    Launch(String),

    /// Page did not settle in time
    #[error("Page load timed out after {0} ms")]
    Timeout(u64),

    /// Navigation failed outright
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    /// Page already closed
    #[error("Page is closed")]
    Closed,
}

/// Errors raised by the object store
#[derive(Debug, Error)]
pub enum StorageError {
    /// HTTP client error
    #[error("Storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status from the store
    #[error("Storage returned HTTP {status} for {key}")]
    Status { status: u16, key: String },

    /// Listing response could not be decoded
    #[error("Invalid listing response: {0}")]
    Listing(String),

    /// Request signature could not be computed
    #[error("Request signing failed: {0}")]
    Signing(String),

    /// Local file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading or writing the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    /// CSV encoding/decoding failure
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// File system failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal setup faults
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Variable holds a value of the wrong shape
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },

    /// Storage endpoint is not a URL
    #[error("Invalid storage endpoint '{0}'")]
    InvalidEndpoint(String),

    /// Listing URL is not a URL
    #[error("Invalid listing URL '{0}'")]
    InvalidListingUrl(String),
}
