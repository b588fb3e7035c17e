//! Field strategies
//!
//! One ordered [`Chain`] per record field. Every strategy is a plain
//! function of the candidate so each fallback can be exercised alone.

use crate::pdf::is_pdf_href;
use crate::record::truncate_chars;
use crate::strategy::Chain;
use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Selector};
use std::sync::LazyLock;

static HEADING_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4").expect("heading selector"));
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector"));
static TIME_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("time").expect("time selector"));
static ANY_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("*").expect("universal selector"));

static TITLE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)title|titre").expect("title class regex"));
static DATE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)date").expect("date class regex"));
static CONTENT_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)content|texte|summary|description").expect("content class regex")
});

/// Text starting with the decree keyword
static KEYWORD_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(arrêté[^.]{10,200})").expect("keyword title regex"));

/// Decree keyword, accented or not
static KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)arr[êe]t[ée]").expect("keyword regex"));

/// Year, optional letter, serial: `2025-01535`, `2025_P_1234`, `2025 01535`
///
/// Bounded by non-digits rather than `\b` so `ndeg2025-01535` still matches.
static NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\D)(\d{4}[\s_-]*[A-Z]?[\s_-]*\d{3,})(?:\D|$)")
        .expect("decree number regex")
});

/// Number qualified by the "arrêté n°" marker
static MARKED_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)arrêté\s+n[°o]?\s*(\d{4}[\s_-]*[A-Z]?[\s_-]*\d{3,})")
        .expect("marked number regex")
});

static SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_-]+").expect("separator regex"));

/// `DD/MM/YYYY` or `DD-MM-YYYY`, not inside a longer digit run
static NUMERIC_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2}[/-]\d{1,2}[/-]\d{2,4})\b").expect("numeric date regex")
});

/// `18 novembre 2025`, `1er décembre 2025`
static LONG_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,2}(?:er)?\s+(?:janvier|f[ée]vrier|mars|avril|mai|juin|juillet|ao[ûu]t|septembre|octobre|novembre|d[ée]cembre)\s+\d{4})\b",
    )
    .expect("long date regex")
});

/// `href="...pdf..."` anywhere in raw markup
static RAW_PDF_HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href=["']([^"']*\.pdf[^"']*)["']"#).expect("raw pdf href regex")
});

const MONTHS: &[&str] = &[
    "janvier",
    "février",
    "fevrier",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "aout",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
    "decembre",
];

/// Longest anchor text accepted as a title label
const LABEL_MAX_CHARS: usize = 300;

/// Length of the leading-text title fallback
const LEADING_TITLE_CHARS: usize = 200;

/// One candidate decree element and the link that identifies it
pub(crate) struct Candidate<'a> {
    pub node: ElementRef<'a>,
    pub anchor: Option<ElementRef<'a>>,
    /// Whitespace-normalized text of `node`
    pub text: String,
    /// Raw PDF target once found
    pub pdf_href: Option<String>,
}

impl<'a> Candidate<'a> {
    pub fn new(node: ElementRef<'a>, anchor: Option<ElementRef<'a>>) -> Self {
        Self {
            text: element_text(node),
            node,
            anchor,
            pdf_href: None,
        }
    }
}

/// Inputs of the decree-number chain
pub(crate) struct NumberInput<'a> {
    pub title: &'a str,
    pub content: &'a str,
    pub links: &'a [&'a str],
}

/// Collapse all whitespace runs to single spaces
pub(crate) fn normalize_space(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    normalize_space(&element.text().collect::<Vec<_>>().join(" "))
}

fn class_matches(element: &ElementRef<'_>, pattern: &Regex) -> bool {
    element
        .value()
        .attr("class")
        .is_some_and(|class| pattern.is_match(class))
}

/// First descendant (or the node itself) whose class matches `pattern`
fn find_by_class<'a>(node: ElementRef<'a>, pattern: &Regex) -> Option<ElementRef<'a>> {
    if class_matches(&node, pattern) {
        return Some(node);
    }
    node.select(&ANY_SELECTOR)
        .find(|el| class_matches(el, pattern))
}

fn non_empty(text: String) -> Option<String> {
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Whether the text is only a month name, as left by date widgets
pub(crate) fn is_month_name(text: &str) -> bool {
    let lower = text.trim().to_lowercase();
    MONTHS.contains(&lower.as_str())
}

// ---------------------------------------------------------------------------
// title
// ---------------------------------------------------------------------------

pub(crate) fn title_chain<'a>() -> Chain<Candidate<'a>, String> {
    Chain::new()
        .then("anchor_label", title_from_anchor)
        .then("title_class", title_from_class)
        .then("heading", title_from_heading)
        .then("keyword", title_from_keyword)
        .then("leading_text", title_from_leading_text)
        .then("pdf_filename", title_from_pdf_filename)
        .accept(|title| !title.trim().is_empty() && !is_month_name(title))
}

/// Anchor text naming a decree, as opposed to "Télécharger" style labels
fn title_from_anchor(c: &Candidate<'_>) -> Option<String> {
    let text = element_text(c.anchor?);
    if text.chars().count() > LABEL_MAX_CHARS || !KEYWORD.is_match(&text) {
        return None;
    }
    non_empty(text)
}

fn title_from_class(c: &Candidate<'_>) -> Option<String> {
    find_by_class(c.node, &TITLE_CLASS).and_then(|el| non_empty(element_text(el)))
}

fn title_from_heading(c: &Candidate<'_>) -> Option<String> {
    c.node
        .select(&HEADING_SELECTOR)
        .find_map(|h| non_empty(element_text(h)))
}

fn title_from_keyword(c: &Candidate<'_>) -> Option<String> {
    KEYWORD_TITLE
        .captures(&c.text)
        .and_then(|caps| non_empty(caps[1].to_string()))
}

/// First characters of the node, cut after the last full stop
fn title_from_leading_text(c: &Candidate<'_>) -> Option<String> {
    let head = truncate_chars(&c.text, LEADING_TITLE_CHARS);
    let cut = match head.rfind('.') {
        Some(idx) if idx > 0 => head[..=idx].to_string(),
        _ => head,
    };
    non_empty(cut)
}

fn title_from_pdf_filename(c: &Candidate<'_>) -> Option<String> {
    let href = c.pdf_href.as_deref()?;
    let name = href
        .split(['?', '#'])
        .next()?
        .rsplit('/')
        .next()?
        .replace("%20", " ");
    let stem = name
        .strip_suffix(".pdf")
        .or_else(|| name.strip_suffix(".PDF"))
        .unwrap_or(&name);
    non_empty(stem.replace('_', " "))
}

// ---------------------------------------------------------------------------
// number
// ---------------------------------------------------------------------------

pub(crate) fn number_chain<'a>() -> Chain<NumberInput<'a>, String> {
    Chain::new()
        .then("title", number_from_title)
        .then("link_filename", number_from_links)
        .then("marker", number_from_marker)
}

/// Trim and turn every separator run into a single hyphen
pub(crate) fn normalize_number(raw: &str) -> String {
    SEPARATORS.replace_all(raw.trim(), "-").into_owned()
}

/// First decree number in `text`, skipping bare `YYYYMMDD` dates
fn find_number(text: &str) -> Option<String> {
    NUMBER
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .find(|raw| !is_compact_date(raw))
        .map(|raw| normalize_number(&raw))
}

fn is_compact_date(raw: &str) -> bool {
    raw.len() == 8
        && raw.bytes().all(|b| b.is_ascii_digit())
        && NaiveDate::parse_from_str(raw, "%Y%m%d").is_ok()
}

fn number_from_title(input: &NumberInput<'_>) -> Option<String> {
    find_number(input.title)
}

/// Prefecture filenames embed the number, e.g. `arrete_ndeg2025-01535.pdf`
fn number_from_links(input: &NumberInput<'_>) -> Option<String> {
    input.links.iter().find_map(|link| {
        let path = link.split(['?', '#']).next()?;
        let filename = path.trim_end_matches('/').rsplit('/').next()?;
        find_number(filename)
    })
}

fn number_from_marker(input: &NumberInput<'_>) -> Option<String> {
    let combined = format!("{} {}", input.title, input.content);
    MARKED_NUMBER
        .captures(&combined)
        .map(|caps| normalize_number(&caps[1]))
}

// ---------------------------------------------------------------------------
// date
// ---------------------------------------------------------------------------

pub(crate) fn date_chain<'a>() -> Chain<Candidate<'a>, String> {
    Chain::new()
        .then("date_class", date_from_class)
        .then("time_element", date_from_time)
        .then("node_text", date_from_text)
}

/// Every date token in `text` with its byte offset, in order
pub(crate) fn find_dates(text: &str) -> Vec<(usize, String)> {
    let mut dates: Vec<(usize, String)> = NUMERIC_DATE
        .captures_iter(text)
        .chain(LONG_DATE.captures_iter(text))
        .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.as_str().to_string())))
        .collect();
    dates.sort_by_key(|(start, _)| *start);
    dates
}

/// First date token in `text`
pub(crate) fn find_date(text: &str) -> Option<String> {
    find_dates(text).into_iter().next().map(|(_, date)| date)
}

fn date_from_class(c: &Candidate<'_>) -> Option<String> {
    c.node
        .select(&ANY_SELECTOR)
        .filter(|el| class_matches(el, &DATE_CLASS))
        .find_map(|el| find_date(&element_text(el)))
}

/// `<time datetime="2025-11-18">` is rewritten as `18/11/2025`
fn date_from_time(c: &Candidate<'_>) -> Option<String> {
    c.node.select(&TIME_SELECTOR).find_map(|el| {
        el.value()
            .attr("datetime")
            .and_then(|raw| raw.get(..10))
            .and_then(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").ok())
            .map(|day| day.format("%d/%m/%Y").to_string())
            .or_else(|| find_date(&element_text(el)))
    })
}

fn date_from_text(c: &Candidate<'_>) -> Option<String> {
    find_date(&c.text)
}

// ---------------------------------------------------------------------------
// content
// ---------------------------------------------------------------------------

pub(crate) fn content_chain<'a>() -> Chain<Candidate<'a>, String> {
    Chain::new()
        .then("content_class", content_from_class)
        .then("node_text", content_from_text)
}

fn content_from_class(c: &Candidate<'_>) -> Option<String> {
    c.node
        .select(&ANY_SELECTOR)
        .filter(|el| class_matches(el, &CONTENT_CLASS))
        .find_map(|el| non_empty(element_text(el)))
}

fn content_from_text(c: &Candidate<'_>) -> Option<String> {
    non_empty(c.text.clone())
}

// ---------------------------------------------------------------------------
// pdf
// ---------------------------------------------------------------------------

pub(crate) fn pdf_chain<'a>() -> Chain<Candidate<'a>, String> {
    Chain::new()
        .then("own_href", pdf_from_own_href)
        .then("child_anchor", pdf_from_child_anchor)
        .then("data_attribute", pdf_from_data_attribute)
        .then("raw_html", pdf_from_raw_html)
}

fn pdf_from_own_href(c: &Candidate<'_>) -> Option<String> {
    let href = c.anchor?.value().attr("href")?;
    is_pdf_href(href).then(|| href.trim().to_string())
}

fn pdf_from_child_anchor(c: &Candidate<'_>) -> Option<String> {
    c.node
        .select(&ANCHOR_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .find(|href| is_pdf_href(href))
        .map(|href| href.trim().to_string())
}

fn pdf_from_data_attribute(c: &Candidate<'_>) -> Option<String> {
    std::iter::once(c.node)
        .chain(c.node.select(&ANY_SELECTOR))
        .find_map(|el| {
            el.value()
                .attrs()
                .find(|(name, value)| {
                    name.starts_with("data-") && value.to_lowercase().contains(".pdf")
                })
                .map(|(_, value)| value.trim().to_string())
        })
}

fn pdf_from_raw_html(c: &Candidate<'_>) -> Option<String> {
    RAW_PDF_HREF
        .captures(&c.node.html())
        .map(|caps| caps[1].to_string())
}
