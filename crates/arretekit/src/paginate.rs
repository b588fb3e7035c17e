//! Listing traversal
//!
//! A small state machine walks the listing page by page, extracting
//! records from each and following the "next" control until the page
//! ceiling is reached or no next page exists. Records gathered before a
//! failure are always kept.

use crate::browser::ListingPage;
use crate::config::Config;
use crate::error::BrowserError;
use crate::extract::{extract_records, ExtractOptions};
use crate::record::DecreeRecord;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

/// Next-page controls, tried with a click in this order
pub const NEXT_PAGE_SELECTORS: &[&str] = &[
    r#"a[rel="next"]"#,
    r#"a[aria-label*="suivant" i]"#,
    ".pager__item--next a",
    ".pagination .next a",
];

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector"));
static NEXT_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)suivant|next").expect("next text regex"));

/// Where the driver is in its traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Loading,
    Extracting,
    Advancing,
    Done,
    Failed,
}

/// Outcome of a traversal
#[derive(Debug)]
pub struct ScrapeRun {
    /// Every record extracted, in page order
    pub records: Vec<DecreeRecord>,
    /// Pages whose HTML was extracted
    pub pages_visited: u32,
    /// `Done` or `Failed`
    pub state: DriverState,
    /// Why the run failed, if it did
    pub error: Option<String>,
}

impl ScrapeRun {
    /// Records classified as traffic-related
    pub fn traffic_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_traffic_related).count()
    }
}

/// Drives a [`ListingPage`] through the listing
pub struct PaginationDriver {
    listing_url: Url,
    max_pages: Option<u32>,
    scrape_delay: Duration,
    page_load_timeout: Duration,
    debug_dir: Option<PathBuf>,
}

impl PaginationDriver {
    pub fn new(config: &Config) -> Self {
        Self {
            listing_url: config.listing_url.clone(),
            max_pages: config.max_pages,
            scrape_delay: config.scrape_delay,
            page_load_timeout: config.page_load_timeout,
            debug_dir: config.save_debug_html.then(|| config.data_dir.clone()),
        }
    }

    /// Override the page ceiling (`None` = unlimited)
    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Walk the listing, then close `page` whatever happened
    pub async fn run<P: ListingPage>(&self, mut page: P) -> ScrapeRun {
        let mut state = DriverState::Loading;
        let mut records = Vec::new();
        let mut pages_visited: u32 = 0;
        let mut failure: Option<String> = None;
        let mut pending = Some(self.listing_url.clone());
        let mut visited: HashSet<Url> = HashSet::new();

        loop {
            state = match state {
                DriverState::Loading => match pending.take() {
                    Some(url) => {
                        info!(url = %url, "loading listing page");
                        match page.navigate(&url, self.page_load_timeout).await {
                            Ok(()) => DriverState::Extracting,
                            Err(BrowserError::Timeout(ms)) => {
                                warn!(url = %url, timeout_ms = ms, "page load timed out, extracting available content");
                                DriverState::Extracting
                            }
                            Err(e) => {
                                failure = Some(e.to_string());
                                DriverState::Failed
                            }
                        }
                    }
                    None => DriverState::Extracting,
                },

                DriverState::Extracting => match page.content().await {
                    Ok(html) => {
                        pages_visited += 1;
                        let base = page
                            .current_url()
                            .unwrap_or_else(|| self.listing_url.clone());
                        visited.insert(base.clone());
                        self.save_debug_html(pages_visited, &html).await;

                        let found = extract_records(&html, &ExtractOptions::new(base));
                        info!(page = pages_visited, records = found.len(), "page extracted");
                        records.extend(found);

                        match self.max_pages {
                            Some(max) if pages_visited >= max => {
                                info!(max_pages = max, "page limit reached");
                                DriverState::Done
                            }
                            _ => DriverState::Advancing,
                        }
                    }
                    Err(e) => {
                        failure = Some(e.to_string());
                        DriverState::Failed
                    }
                },

                DriverState::Advancing => match self.advance(&mut page).await {
                    Ok(Some(next)) => match next {
                        Next::Clicked if page.current_url().is_some_and(|u| visited.contains(&u)) => {
                            info!("next page already visited, stopping");
                            DriverState::Done
                        }
                        Next::Link(url) if visited.contains(&url) => {
                            info!(url = %url, "next page already visited, stopping");
                            DriverState::Done
                        }
                        next => {
                            tokio::time::sleep(self.scrape_delay).await;
                            if let Next::Link(url) = next {
                                pending = Some(url);
                            }
                            DriverState::Loading
                        }
                    },
                    Ok(None) => {
                        info!(pages = pages_visited, "no next page");
                        DriverState::Done
                    }
                    Err(e) => {
                        failure = Some(e.to_string());
                        DriverState::Failed
                    }
                },

                DriverState::Done | DriverState::Failed => break,
            };
        }

        if let Some(reason) = &failure {
            error!(error = %reason, pages = pages_visited, records = records.len(), "scrape stopped early");
        }
        if let Err(e) = page.close().await {
            warn!(error = %e, "failed to close page");
        }

        let run = ScrapeRun {
            records,
            pages_visited,
            state,
            error: failure,
        };
        let traffic = run.traffic_count();
        info!(
            total = run.records.len(),
            traffic,
            other = run.records.len() - traffic,
            pages = run.pages_visited,
            "scrape finished"
        );
        run
    }

    /// Move to the next page if the listing offers one
    ///
    /// A click that times out still counts as a move; the next load step
    /// extracts whatever arrived.
    async fn advance<P: ListingPage>(&self, page: &mut P) -> Result<Option<Next>, BrowserError> {
        for selector in NEXT_PAGE_SELECTORS {
            match page.click(selector, self.page_load_timeout).await {
                Ok(true) => return Ok(Some(Next::Clicked)),
                Ok(false) => {}
                Err(BrowserError::Timeout(ms)) => {
                    warn!(selector, timeout_ms = ms, "next page load timed out");
                    return Ok(Some(Next::Clicked));
                }
                Err(e) => return Err(e),
            }
        }

        let html = page.content().await?;
        let base = page
            .current_url()
            .unwrap_or_else(|| self.listing_url.clone());
        Ok(next_link(&html, &base).map(Next::Link))
    }

    async fn save_debug_html(&self, page_number: u32, html: &str) {
        let Some(dir) = &self.debug_dir else {
            return;
        };
        let path = dir.join(format!("debug_page_{page_number}.html"));
        let result = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, html).await
        }
        .await;
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "could not save debug HTML");
        }
    }
}

/// How the driver reaches the next page
enum Next {
    /// A selector click already navigated
    Clicked,
    /// An HTML link still to load
    Link(Url),
}

/// Anchor whose text reads "suivant" or "next", resolved against `base`
fn next_link(html: &str, base: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .filter(|a| {
            let text: String = a.text().collect();
            NEXT_TEXT.is_match(&text)
        })
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| base.join(href.trim()).ok())
}
