//! Browser-like HTTP client
//!
//! The prefecture site gates its documents behind cookie and header checks,
//! so every request this crate sends goes through a client that looks like
//! a desktop browser and keeps a cookie jar.

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, USER_AGENT};
use std::time::Duration;

/// Desktop Chrome user agent
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Accept header sent with every navigation
pub const BROWSER_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Accept-Language header sent with every navigation
pub const BROWSER_ACCEPT_LANGUAGE: &str = "fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7";

/// Headers impersonating a desktop browser
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
    );
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
}

/// Build a client with browser headers, a cookie jar and HTTP redirects on
///
/// `timeout` bounds each whole request; individual calls may shorten it.
pub fn browser_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .default_headers(browser_headers())
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::limited(10))
        .timeout(timeout)
        .build()
}
