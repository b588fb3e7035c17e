//! Client-side redirect discovery
//!
//! The document server answers some PDF links with an HTML gate page that
//! forwards the browser by script, meta refresh or a plain link. Each way
//! out is a [`RedirectRule`]; [`RedirectRules`] tries them in priority
//! order and returns the first target found.

use crate::pdf::is_pdf_href;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

static SCRIPT_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("script").expect("script selector"));
static META_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[http-equiv]").expect("meta selector"));
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector"));

/// `window.location = '...'` or `window.location.href = "..."`
static WINDOW_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"window\.location(?:\.href)?\s*=\s*['"]([^'"]+)['"]"#)
        .expect("window.location regex")
});

/// `url=...` inside a meta refresh `content` attribute
static REFRESH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\s*=\s*['"]?([^'"\s;]+)"#).expect("meta refresh regex")
});

/// A way to find the next hop inside an HTML page
pub trait RedirectRule: Send + Sync {
    /// Unique identifier for this rule (for logging/debugging)
    fn name(&self) -> &'static str;

    /// Raw (possibly relative) target, if the page offers one
    fn find(&self, document: &Html) -> Option<String>;
}

/// Script assigning a string literal to `window.location[.href]`
pub struct ScriptLocationRule;

impl RedirectRule for ScriptLocationRule {
    fn name(&self) -> &'static str {
        "script_location"
    }

    fn find(&self, document: &Html) -> Option<String> {
        document.select(&SCRIPT_SELECTOR).find_map(|script| {
            let source: String = script.text().collect();
            WINDOW_LOCATION
                .captures(&source)
                .map(|caps| caps[1].to_string())
        })
    }
}

/// `<meta http-equiv="refresh" content="0; url=...">`
pub struct MetaRefreshRule;

impl RedirectRule for MetaRefreshRule {
    fn name(&self) -> &'static str {
        "meta_refresh"
    }

    fn find(&self, document: &Html) -> Option<String> {
        document
            .select(&META_SELECTOR)
            .filter(|meta| {
                meta.value()
                    .attr("http-equiv")
                    .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh"))
            })
            .find_map(|meta| {
                let content = meta.value().attr("content")?;
                REFRESH_URL
                    .captures(content)
                    .map(|caps| caps[1].to_string())
            })
    }
}

/// Any anchor pointing at a `.pdf`
pub struct PdfAnchorRule;

impl RedirectRule for PdfAnchorRule {
    fn name(&self) -> &'static str {
        "pdf_anchor"
    }

    fn find(&self, document: &Html) -> Option<String> {
        document
            .select(&ANCHOR_SELECTOR)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| is_pdf_href(href))
            .map(|href| href.trim().to_string())
    }
}

/// Next hop chosen by a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    /// Rule that found it
    pub rule: &'static str,
    /// Absolute target
    pub url: Url,
}

/// Ordered set of redirect rules
///
/// Rules are checked in registration order, so register higher-priority
/// rules first.
pub struct RedirectRules {
    rules: Vec<Box<dyn RedirectRule>>,
}

impl Default for RedirectRules {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RedirectRules {
    /// Create an empty rule set
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Create a rule set with the built-in rules
    ///
    /// Includes (in order of priority):
    /// 1. ScriptLocationRule - `window.location` assignments
    /// 2. MetaRefreshRule - meta refresh tags
    /// 3. PdfAnchorRule - anchors targeting a PDF
    pub fn with_defaults() -> Self {
        let mut rules = Self::new();
        rules.register(Box::new(ScriptLocationRule));
        rules.register(Box::new(MetaRefreshRule));
        rules.register(Box::new(PdfAnchorRule));
        rules
    }

    /// Register a rule after the existing ones
    pub fn register(&mut self, rule: Box<dyn RedirectRule>) {
        self.rules.push(rule);
    }

    /// Rule names in priority order
    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Find the next hop in `html`, resolved against `base`
    ///
    /// A rule whose target cannot be resolved to a URL is skipped.
    pub fn find(&self, html: &str, base: &Url) -> Option<Redirect> {
        let document = Html::parse_document(html);
        for rule in &self.rules {
            let Some(raw) = rule.find(&document) else {
                continue;
            };
            match base.join(&raw) {
                Ok(url) => {
                    tracing::debug!(rule = rule.name(), target = %url, "redirect found");
                    return Some(Redirect {
                        rule: rule.name(),
                        url,
                    });
                }
                Err(e) => {
                    tracing::debug!(rule = rule.name(), raw = %raw, error = %e, "unresolvable redirect target");
                }
            }
        }
        None
    }
}
