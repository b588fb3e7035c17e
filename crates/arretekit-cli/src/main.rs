//! ArreteKit CLI - scrape, download and archive prefecture decrees

use arretekit::storage::{size_kb, KEY_PREFIX};
use arretekit::{
    reconcile, store_from_config, Archiver, Config, DecreeRecord, DriverState, HttpListingPage,
    Ledger, PaginationDriver, PdfFetcher, RedirectDownloader,
};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Output format for command reports
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// `key: value` lines between `---` fences
    #[default]
    Text,
    /// JSON object
    Json,
}

/// ArreteKit - scraper and archiver for prefecture decrees
#[derive(Parser, Debug)]
#[command(name = "arretekit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Report format
    #[arg(long, short, global = true, default_value = "text")]
    format: OutputFormat,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Walk the listing, archive new PDFs and update both ledgers
    Scrape {
        /// Stop after this many pages (0 = unlimited)
        #[arg(long)]
        max_pages: Option<u32>,

        /// Extract records only, do not download or archive PDFs
        #[arg(long)]
        skip_pdfs: bool,
    },
    /// Resolve one URL through the redirect downloader
    Download {
        /// Document or redirect page URL
        url: String,

        /// Where to write the PDF
        #[arg(long, short, default_value = "document.pdf")]
        output: PathBuf,
    },
    /// Archive ledger rows that have no storage URL yet
    Archive {
        /// Also retry rows whose previous archival failed
        #[arg(long)]
        retry_failed: bool,
    },
    /// Recover storage URLs for ledger rows from existing objects
    Reconcile,
    /// List archived objects
    List {
        /// Key prefix
        #[arg(long, default_value = KEY_PREFIX)]
        prefix: String,

        /// Show at most this many objects
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        eprintln!("Usage: arretekit scrape [--max-pages N] [--skip-pdfs]");
        eprintln!("   or: arretekit download <URL> [--output PATH]");
        eprintln!("   or: arretekit --help");
        std::process::exit(1);
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let result = match command {
        Commands::Scrape {
            max_pages,
            skip_pdfs,
        } => run_scrape(&config, max_pages, skip_pdfs).await,
        Commands::Download { url, output } => run_download(&config, &url, output).await,
        Commands::Archive { retry_failed } => run_archive(&config, retry_failed).await,
        Commands::Reconcile => run_reconcile(&config).await,
        Commands::List { prefix, limit } => run_list(&config, &prefix, limit).await,
    };

    match result {
        Ok(report) => writeln_safe(&format_report(&report, cli.format)),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Logs go to stderr so reports on stdout stay parseable
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

async fn run_scrape(
    config: &Config,
    max_pages: Option<u32>,
    skip_pdfs: bool,
) -> CliResult<Map<String, Value>> {
    let mut driver = PaginationDriver::new(config);
    if let Some(max) = max_pages {
        driver = driver.with_max_pages((max > 0).then_some(max));
    }
    let page = HttpListingPage::new(config.page_load_timeout)?;
    let mut run = driver.run(page).await;

    if run.state == DriverState::Failed && run.records.is_empty() {
        return Err(run
            .error
            .unwrap_or_else(|| "scrape failed".to_string())
            .into());
    }

    let mut report = Map::new();
    report.insert("pages".into(), json!(run.pages_visited));
    report.insert("records".into(), json!(run.records.len()));
    report.insert("traffic_related".into(), json!(run.traffic_count()));
    if let Some(error) = &run.error {
        report.insert("stopped_early".into(), json!(error));
    }

    if !skip_pdfs {
        let archiver = archiver(config)?;
        let summary = archiver.archive(&mut run.records, false).await;
        report.insert("archived".into(), json!(summary.archived));
        report.insert("already_stored".into(), json!(summary.already_stored));
        report.insert("archive_failed".into(), json!(summary.failed));
        report.insert("simulated".into(), json!(summary.simulated));
    }

    let total = Ledger::new(config.ledger_path()).merge_into(&run.records)?;
    let traffic = Ledger::new(config.traffic_ledger_path()).merge_traffic_into(&run.records)?;
    report.insert("ledger_rows".into(), json!(total));
    report.insert("traffic_ledger_rows".into(), json!(traffic));
    report.insert("dry_run".into(), json!(config.dry_run));
    Ok(report)
}

async fn run_download(config: &Config, url: &str, output: PathBuf) -> CliResult<Map<String, Value>> {
    let downloader = RedirectDownloader::new(config.pdf_download_timeout)?;
    let file = downloader.fetch_pdf(url, &output).await?;

    let mut report = Map::new();
    report.insert("url".into(), json!(url));
    report.insert("final_url".into(), json!(file.final_url.as_str()));
    report.insert("hops".into(), json!(file.hops));
    report.insert("path".into(), json!(file.path.display().to_string()));
    report.insert("size_kb".into(), json!(size_kb(file.size_bytes)));
    Ok(report)
}

async fn run_archive(config: &Config, retry_failed: bool) -> CliResult<Map<String, Value>> {
    let ledger = Ledger::new(config.ledger_path());
    let mut records = ledger.load()?;
    let summary = archiver(config)?.archive(&mut records, retry_failed).await;
    ledger.save(&records)?;
    Ledger::new(config.traffic_ledger_path()).merge_traffic_into(&records)?;

    let mut report = Map::new();
    report.insert("archived".into(), json!(summary.archived));
    report.insert("already_stored".into(), json!(summary.already_stored));
    report.insert("failed".into(), json!(summary.failed));
    report.insert("skipped".into(), json!(summary.skipped));
    report.insert("simulated".into(), json!(summary.simulated));
    report.insert("dry_run".into(), json!(config.dry_run));
    Ok(report)
}

async fn run_reconcile(config: &Config) -> CliResult<Map<String, Value>> {
    let store = store_from_config(config)?;
    let mut report = Map::new();

    for (name, path) in [
        ("ledger", config.ledger_path()),
        ("traffic_ledger", config.traffic_ledger_path()),
    ] {
        let ledger = Ledger::new(path);
        let mut records: Vec<DecreeRecord> = ledger.load()?;
        let summary = reconcile(&mut records, store.as_ref()).await?;
        ledger.save(&records)?;
        report.insert(format!("{name}_found"), json!(summary.found));
        report.insert(format!("{name}_not_found"), json!(summary.not_found));
    }
    Ok(report)
}

async fn run_list(
    config: &Config,
    prefix: &str,
    limit: Option<usize>,
) -> CliResult<Map<String, Value>> {
    let store = store_from_config(config)?;
    let mut entries = store.list(prefix).await?;
    let total = entries.len();
    let total_bytes: u64 = entries.iter().map(|e| e.size).sum();
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    let mut report = Map::new();
    report.insert("store".into(), json!(store.name()));
    report.insert("prefix".into(), json!(prefix));
    report.insert("objects".into(), json!(total));
    report.insert("total_kb".into(), json!(size_kb(total_bytes)));
    report.insert(
        "keys".into(),
        Value::Array(
            entries
                .iter()
                .map(|e| json!(format!("{} ({} KB)", e.key, size_kb(e.size))))
                .collect(),
        ),
    );
    Ok(report)
}

fn archiver(config: &Config) -> CliResult<Archiver> {
    let store = store_from_config(config)?;
    let fetcher: Box<dyn PdfFetcher> = Box::new(RedirectDownloader::new(config.pdf_download_timeout)?);
    Ok(Archiver::new(store, fetcher, config))
}

/// Render a report as fenced `key: value` lines or as JSON
fn format_report(report: &Map<String, Value>, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_else(|e| {
            eprintln!("Error serializing report: {}", e);
            std::process::exit(1);
        }),
        OutputFormat::Text => {
            let mut output = String::from("---\n");
            for (key, value) in report {
                match value {
                    Value::Array(items) => {
                        output.push_str(&format!("{}:\n", key));
                        for item in items {
                            output.push_str(&format!("  - {}\n", plain(item)));
                        }
                    }
                    other => output.push_str(&format!("{}: {}\n", key, plain(other))),
                }
            }
            output.push_str("---");
            output
        }
    }
}

/// Strings without quotes, everything else as JSON
fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Write to stdout, exit silently on broken pipe
fn writeln_safe(s: &str) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", s) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        eprintln!("Error writing to stdout: {}", e);
        std::process::exit(1);
    }
}
