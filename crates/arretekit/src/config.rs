//! Runtime configuration
//!
//! Everything is read once, at startup, into a [`Config`] value that is
//! handed to each component. Missing storage credentials are not an error:
//! they force dry-run mode for the whole run.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// First page of the decree listing
pub const DEFAULT_LISTING_URL: &str =
    "https://www.prefecturedepolice.interieur.gouv.fr/actualites-et-presse/arretes/accueil-arretes";

/// Default storage region
pub const DEFAULT_REGION: &str = "us-east-1";

/// Credentials and location of the object store
#[derive(Clone)]
pub struct StorageConfig {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    pub region: String,
    /// S3-compatible endpoint; AWS is used when absent
    pub endpoint: Option<Url>,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// First listing page
    pub listing_url: Url,
    /// Simulate storage operations
    pub dry_run: bool,
    /// Delay between pages and between PDF downloads
    pub scrape_delay: Duration,
    /// Navigation/settle timeout for listing pages
    pub page_load_timeout: Duration,
    /// Per-request timeout while resolving a PDF
    pub pdf_download_timeout: Duration,
    /// Timeout for session bootstrap and storage calls
    pub http_timeout: Duration,
    /// Page-count ceiling, `None` for unlimited
    pub max_pages: Option<u32>,
    /// Attempts per PDF for transient faults
    pub pdf_max_attempts: u32,
    /// Ledgers, temporary PDFs and debug snapshots
    pub data_dir: PathBuf,
    /// Write every listing page's HTML to `data_dir`
    pub save_debug_html: bool,
    /// Object store, absent in dry-run mode
    pub storage: Option<StorageConfig>,
}

impl Config {
    /// Defaults for every setting, starting from the given listing page
    pub fn new(listing_url: Url) -> Self {
        Self {
            listing_url,
            dry_run: true,
            scrape_delay: Duration::from_secs(2),
            page_load_timeout: Duration::from_millis(90_000),
            pdf_download_timeout: Duration::from_millis(60_000),
            http_timeout: Duration::from_millis(10_000),
            max_pages: None,
            pdf_max_attempts: 3,
            data_dir: PathBuf::from("data"),
            save_debug_html: false,
            storage: None,
        }
    }

    /// Load configuration from the process environment (and `.env`)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty values behave like unset ones
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let raw_listing = get("LISTING_URL").unwrap_or_else(|| DEFAULT_LISTING_URL.to_string());
        let listing_url =
            Url::parse(&raw_listing).map_err(|_| ConfigError::InvalidListingUrl(raw_listing))?;
        let defaults = Config::new(listing_url);

        let requested_dry_run = match get("DRY_RUN") {
            Some(raw) => parse_bool("DRY_RUN", &raw)?,
            None => false,
        };

        let scrape_delay = match get("SCRAPE_DELAY_SECONDS") {
            Some(raw) => {
                let secs: f64 = raw.parse().map_err(|_| invalid("SCRAPE_DELAY_SECONDS", &raw))?;
                if !secs.is_finite() || secs < 0.0 {
                    return Err(invalid("SCRAPE_DELAY_SECONDS", &raw));
                }
                Duration::from_secs_f64(secs)
            }
            None => defaults.scrape_delay,
        };

        let page_load_timeout = millis(&get, "PAGE_LOAD_TIMEOUT", defaults.page_load_timeout)?;
        let pdf_download_timeout =
            millis(&get, "PDF_DOWNLOAD_TIMEOUT", defaults.pdf_download_timeout)?;
        let http_timeout = millis(&get, "HTTP_TIMEOUT", defaults.http_timeout)?;

        let max_pages = match get("MAX_PAGES_TO_SCRAPE") {
            Some(raw) => {
                let n: u32 = raw.parse().map_err(|_| invalid("MAX_PAGES_TO_SCRAPE", &raw))?;
                (n > 0).then_some(n)
            }
            None => None,
        };

        let pdf_max_attempts = match get("PDF_MAX_ATTEMPTS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("PDF_MAX_ATTEMPTS", &raw)),
            },
            None => defaults.pdf_max_attempts,
        };

        let data_dir = get("DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir);

        let save_debug_html = match get("SAVE_DEBUG_HTML") {
            Some(raw) => parse_bool("SAVE_DEBUG_HTML", &raw)?,
            None => false,
        };

        let endpoint = match get("S3_ENDPOINT_URL") {
            Some(raw) => Some(Url::parse(&raw).map_err(|_| ConfigError::InvalidEndpoint(raw))?),
            None => None,
        };

        let storage = match (
            get("AWS_ACCESS_KEY_ID"),
            get("AWS_SECRET_ACCESS_KEY"),
            get("S3_BUCKET_NAME"),
        ) {
            (Some(access_key_id), Some(secret_access_key), Some(bucket)) => Some(StorageConfig {
                access_key_id,
                secret_access_key,
                bucket,
                region: get("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string()),
                endpoint,
            }),
            _ => None,
        };

        let dry_run = if storage.is_none() {
            if !requested_dry_run {
                warn!("Storage configuration incomplete, forcing dry-run mode");
            }
            true
        } else {
            requested_dry_run
        };

        Ok(Self {
            listing_url: defaults.listing_url,
            dry_run,
            scrape_delay,
            page_load_timeout,
            pdf_download_timeout,
            http_timeout,
            max_pages,
            pdf_max_attempts,
            data_dir,
            save_debug_html,
            storage,
        })
    }

    /// Main ledger path
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("arretes.csv")
    }

    /// Traffic-only ledger path
    pub fn traffic_ledger_path(&self) -> PathBuf {
        self.data_dir.join("arretes_circulation.csv")
    }
}

fn invalid(name: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    }
}

fn parse_bool(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, raw)),
    }
}

fn millis<G>(get: &G, name: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| invalid(name, &raw)),
        None => Ok(default),
    }
}
