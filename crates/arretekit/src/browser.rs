//! Listing page rendering
//!
//! The pagination driver only needs a page it can point at a URL, read back
//! as HTML and click. [`ListingPage`] is that seam; [`HttpListingPage`]
//! implements it over plain HTTP for server-rendered listings.

use crate::client::browser_client;
use crate::error::BrowserError;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// A page that can be navigated, read and clicked
#[async_trait]
pub trait ListingPage: Send {
    /// Load `url`, waiting at most `timeout` for it to settle
    ///
    /// On [`BrowserError::Timeout`] whatever was loaded stays readable.
    async fn navigate(&mut self, url: &Url, timeout: Duration) -> Result<(), BrowserError>;

    /// Current document HTML
    async fn content(&mut self) -> Result<String, BrowserError>;

    /// Click the first element matching `selector`
    ///
    /// Returns false when nothing matches.
    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<bool, BrowserError>;

    /// URL of the current document
    fn current_url(&self) -> Option<Url>;

    /// Release the page; later calls fail with [`BrowserError::Closed`]
    async fn close(&mut self) -> Result<(), BrowserError>;
}

/// Reqwest-backed page for listings that render server-side
///
/// Clicking resolves the matched anchor's `href` and navigates to it.
pub struct HttpListingPage {
    client: reqwest::Client,
    url: Option<Url>,
    html: String,
    closed: bool,
}

impl HttpListingPage {
    /// Create a page with browser headers and a cookie jar
    pub fn new(timeout: Duration) -> Result<Self, BrowserError> {
        let client = browser_client(timeout).map_err(|e| BrowserError::Launch(e.to_string()))?;
        Ok(Self::with_client(client))
    }

    /// Create a page over an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            url: None,
            html: String::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), BrowserError> {
        if self.closed {
            Err(BrowserError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ListingPage for HttpListingPage {
    async fn navigate(&mut self, url: &Url, timeout: Duration) -> Result<(), BrowserError> {
        self.ensure_open()?;
        let navigation_error = |reason: String| BrowserError::Navigation {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BrowserError::Timeout(timeout.as_millis() as u64)
                } else {
                    navigation_error(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(navigation_error(format!("HTTP {}", status.as_u16())));
        }

        let final_url = response.url().clone();
        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                BrowserError::Timeout(timeout.as_millis() as u64)
            } else {
                navigation_error(e.to_string())
            }
        })?;
        debug!(url = %final_url, bytes = html.len(), "page loaded");
        self.url = Some(final_url);
        self.html = html;
        Ok(())
    }

    async fn content(&mut self) -> Result<String, BrowserError> {
        self.ensure_open()?;
        Ok(self.html.clone())
    }

    async fn click(&mut self, selector: &str, timeout: Duration) -> Result<bool, BrowserError> {
        self.ensure_open()?;
        let Some(href) = selected_href(&self.html, selector) else {
            return Ok(false);
        };
        let target = match &self.url {
            Some(base) => base.join(&href),
            None => Url::parse(&href),
        }
        .map_err(|e| BrowserError::Navigation {
            url: href.clone(),
            reason: e.to_string(),
        })?;
        self.navigate(&target, timeout).await?;
        Ok(true)
    }

    fn current_url(&self) -> Option<Url> {
        self.url.clone()
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        self.ensure_open()?;
        self.closed = true;
        self.html.clear();
        Ok(())
    }
}

/// `href` of the first element matching `selector`, if it has one
///
/// An unparsable selector matches nothing.
fn selected_href(html: &str, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty() && !href.starts_with('#'))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selected_href() {
        let html = r##"<ul class="pager">
            <li class="pager__item--next"><a href="?page=1" rel="next">Suivant</a></li>
            <li><a href="#top">Haut</a></li></ul>"##;
        assert_eq!(
            selected_href(html, ".pager__item--next a"),
            Some("?page=1".to_string())
        );
        assert_eq!(selected_href(html, r#"a[rel="next"]"#), Some("?page=1".to_string()));
        assert_eq!(selected_href(html, r##"a[href="#top"]"##), None);
        assert_eq!(selected_href(html, ".missing a"), None);
        assert_eq!(selected_href(html, "a[[["), None);
    }

    #[tokio::test]
    async fn test_closed_page_rejects_calls() {
        let mut page = HttpListingPage::new(Duration::from_secs(1)).unwrap();
        assert!(page.current_url().is_none());
        page.close().await.unwrap();
        assert!(matches!(page.content().await, Err(BrowserError::Closed)));
        assert!(matches!(
            page.click("a", Duration::from_secs(1)).await,
            Err(BrowserError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_click_without_match() {
        let mut page = HttpListingPage::new(Duration::from_secs(1)).unwrap();
        assert!(!page.click("a.next", Duration::from_secs(1)).await.unwrap());
    }
}
