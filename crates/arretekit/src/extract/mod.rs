//! Decree extraction from listing HTML
//!
//! The listing markup is not under our control and changes without notice,
//! so candidates are located with layered heuristics and every field comes
//! from an ordered chain of fallbacks (see [`fields`]).
//!
//! Several decrees sometimes share one container. When that happens the
//! title and content are narrowed to the span that starts at this decree's
//! "arrêté n°" marker and stops before the next date + decree boundary.

mod fields;

use crate::error::ExtractError;
use crate::pdf::is_pdf_href;
use crate::record::DecreeRecord;
use fields::{
    content_chain, date_chain, element_text, find_dates, number_chain, pdf_chain, title_chain,
    Candidate, NumberInput,
};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector"));
static BLOCK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("article, div, li").expect("block selector"));

/// Decree-specific class names
static DECREE_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)arr[êe]t|decree").expect("decree class regex"));

/// Generic listing-entry class names
static ENTRY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)item|card|arr[êe]t").expect("entry class regex"));

static DECREE_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)arr[êe]t[ée]").expect("decree keyword regex"));

/// Where one decree stops and the next begins
static BOUNDARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\d{1,2}/\d{1,2}/\d{4}\s*arrêté|arrêté\s+n[°o]?\s*\d{4}")
        .expect("decree boundary regex")
});

static TRAILING_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+\d{1,2}/\d{1,2}/\d{4}\s*$").expect("trailing date regex"));

static DATED_NEXT_DECREE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+\d{1,2}/\d{1,2}/\d{4}\s+arrêté").expect("dated decree regex")
});

/// Block ancestors an anchor is attached to
const BLOCK_TAGS: &[&str] = &["div", "article", "li", "section", "p", "tr"];

/// Minimum text for a generic entry to count
const MIN_ENTRY_TEXT: usize = 20;

/// Title length above which a numbered title is windowed
const TITLE_WINDOW_THRESHOLD: usize = 150;

/// Content length above which numbered content is windowed
const CONTENT_WINDOW_THRESHOLD: usize = 200;

/// Extraction settings
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// URL of the page; relative links are resolved against it
    pub base_url: Url,
}

impl ExtractOptions {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }
}

/// Extract every decree found in one listing page
///
/// A candidate that cannot be turned into a record is logged and skipped;
/// it never prevents the others from being extracted.
pub fn extract_records(html: &str, options: &ExtractOptions) -> Vec<DecreeRecord> {
    let document = Html::parse_document(html);
    let candidates = find_candidates(&document, &options.base_url);
    debug!(candidates = candidates.len(), "candidate elements found");

    let mut records = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match extract_one(candidate, &options.base_url) {
            Ok(record) => records.push(record),
            Err(e) => warn!(error = %e, "skipping candidate"),
        }
    }
    records
}

// ---------------------------------------------------------------------------
// candidate selection
// ---------------------------------------------------------------------------

/// Layered candidate search, first non-empty layer wins
///
/// Candidates are deduplicated by resolved link so the same decree is
/// never extracted twice from one page.
fn find_candidates<'a>(document: &'a Html, base: &Url) -> Vec<Candidate<'a>> {
    type Layer<'a> = fn(&'a Html, &Url) -> Vec<(ElementRef<'a>, Option<ElementRef<'a>>)>;
    let layers: [(&str, Layer<'a>); 3] = [
        ("decree_class", decree_class_nodes),
        ("decree_links", decree_link_nodes),
        ("entry_class", entry_class_nodes),
    ];

    for (layer, find) in layers {
        let mut seen = HashSet::new();
        let candidates: Vec<Candidate<'a>> = find(document, base)
            .into_iter()
            .filter(|(_, anchor)| match anchor.and_then(|a| resolve_href(a, base)) {
                Some(link) => seen.insert(link),
                None => true,
            })
            .map(|(node, anchor)| Candidate::new(node, anchor))
            .collect();
        if !candidates.is_empty() {
            debug!(layer, count = candidates.len(), "candidate layer matched");
            return candidates;
        }
    }
    Vec::new()
}

fn resolve_href(anchor: ElementRef<'_>, base: &Url) -> Option<String> {
    let href = anchor.value().attr("href")?;
    base.join(href.trim()).ok().map(|url| url.to_string())
}

fn usable_href(href: &str) -> bool {
    let href = href.trim();
    !(href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:"))
}

fn first_anchor(node: ElementRef<'_>) -> Option<ElementRef<'_>> {
    node.select(&ANCHOR_SELECTOR)
        .find(|a| a.value().attr("href").is_some_and(usable_href))
}

fn wrapping_anchor(node: ElementRef<'_>) -> Option<ElementRef<'_>> {
    node.ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| el.value().name() == "a" && el.value().attr("href").is_some_and(usable_href))
}

fn class_matches(node: &ElementRef<'_>, pattern: &Regex) -> bool {
    node.value()
        .attr("class")
        .is_some_and(|class| pattern.is_match(class))
}

/// Drop matches that contain another match, keeping the innermost entries
fn innermost<'a>(nodes: Vec<ElementRef<'a>>) -> Vec<ElementRef<'a>> {
    let ids: HashSet<_> = nodes.iter().map(|n| n.id()).collect();
    nodes
        .into_iter()
        .filter(|node| {
            !node
                .descendants()
                .skip(1)
                .any(|d| ids.contains(&d.id()))
        })
        .collect()
}

/// Layer a: decree-named blocks tied to a PDF link
///
/// A block holding several PDF links yields one candidate per link.
fn decree_class_nodes<'a>(
    document: &'a Html,
    _base: &Url,
) -> Vec<(ElementRef<'a>, Option<ElementRef<'a>>)> {
    let matches: Vec<_> = document
        .select(&BLOCK_SELECTOR)
        .filter(|node| class_matches(node, &DECREE_CLASS))
        .filter(|node| {
            let wraps_pdf = node
                .select(&ANCHOR_SELECTOR)
                .any(|a| a.value().attr("href").is_some_and(is_pdf_href));
            let wrapped_by_pdf = wrapping_anchor(*node)
                .and_then(|a| a.value().attr("href"))
                .is_some_and(is_pdf_href);
            wraps_pdf || wrapped_by_pdf
        })
        .collect();

    innermost(matches)
        .into_iter()
        .flat_map(|node| {
            let pdf_anchors: Vec<_> = node
                .select(&ANCHOR_SELECTOR)
                .filter(|a| a.value().attr("href").is_some_and(is_pdf_href))
                .collect();
            if pdf_anchors.len() > 1 {
                // One block listing several decrees: one candidate per document
                pdf_anchors.into_iter().map(|a| (node, Some(a))).collect()
            } else {
                vec![(node, first_anchor(node).or_else(|| wrapping_anchor(node)))]
            }
        })
        .collect()
}

/// Layer b: decree links, attached to their nearest block ancestor
///
/// Links back to the listing itself (pagination, filters) are skipped.
fn decree_link_nodes<'a>(
    document: &'a Html,
    base: &Url,
) -> Vec<(ElementRef<'a>, Option<ElementRef<'a>>)> {
    document
        .select(&ANCHOR_SELECTOR)
        .filter(|a| {
            let Some(href) = a.value().attr("href") else {
                return false;
            };
            if !usable_href(href) {
                return false;
            }
            if base
                .join(href.trim())
                .is_ok_and(|target| target.path() == base.path())
            {
                return false;
            }
            let lower = href.to_lowercase();
            if lower.contains("arrete") {
                return true;
            }
            is_pdf_href(href) && {
                let context = block_ancestor(*a).unwrap_or(*a);
                DECREE_KEYWORD.is_match(&element_text(context))
            }
        })
        .map(|a| (block_ancestor(a).unwrap_or(a), Some(a)))
        .collect()
}

fn block_ancestor(anchor: ElementRef<'_>) -> Option<ElementRef<'_>> {
    anchor
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|el| BLOCK_TAGS.contains(&el.value().name()))
}

/// Layer c: generic entries with a link and some text
fn entry_class_nodes<'a>(
    document: &'a Html,
    _base: &Url,
) -> Vec<(ElementRef<'a>, Option<ElementRef<'a>>)> {
    let matches: Vec<_> = document
        .select(&BLOCK_SELECTOR)
        .filter(|node| class_matches(node, &ENTRY_CLASS))
        .filter(|node| {
            first_anchor(*node).is_some() && element_text(*node).chars().count() >= MIN_ENTRY_TEXT
        })
        .collect();

    innermost(matches)
        .into_iter()
        .map(|node| (node, first_anchor(node)))
        .collect()
}

// ---------------------------------------------------------------------------
// per-candidate extraction
// ---------------------------------------------------------------------------

fn extract_one(mut candidate: Candidate<'_>, base: &Url) -> Result<DecreeRecord, ExtractError> {
    let anchor = candidate.anchor.ok_or(ExtractError::MissingLink)?;
    let href = anchor
        .value()
        .attr("href")
        .ok_or(ExtractError::MissingLink)?
        .trim()
        .to_string();
    let detail_link = base
        .join(&href)
        .map_err(|source| ExtractError::InvalidLink {
            href: href.clone(),
            source,
        })?
        .to_string();

    candidate.pdf_href = pdf_chain().value(&candidate);
    let pdf_url = match candidate.pdf_href.as_deref() {
        Some(raw) => base
            .join(raw)
            .map_err(|source| ExtractError::InvalidLink {
                href: raw.to_string(),
                source,
            })?
            .to_string(),
        None => String::new(),
    };

    let mut title = title_chain().value(&candidate).unwrap_or_default();
    let mut content = content_chain().value(&candidate).unwrap_or_default();

    let links = [pdf_url.as_str(), detail_link.as_str()];
    let number = number_chain()
        .value(&NumberInput {
            title: &title,
            content: &content,
            links: &links,
        })
        .unwrap_or_default();

    let mut date = date_chain().value(&candidate).unwrap_or_default();

    if !number.is_empty() {
        let mut windowed = false;
        if title.chars().count() > TITLE_WINDOW_THRESHOLD {
            let combined = format!("{title} {content}");
            title = narrow(&combined, &number);
            windowed = true;
        }
        if content.chars().count() > CONTENT_WINDOW_THRESHOLD {
            content = narrow(&content, &number);
            windowed = true;
        }
        if windowed {
            if let Some(nearest) = date_before_marker(&candidate.text, &number) {
                date = nearest;
            }
        }
    }

    Ok(DecreeRecord::new(
        number,
        title,
        date,
        detail_link,
        pdf_url,
        &content,
    ))
}

/// `arrêté n° <number>` with any separator run between number parts
fn marker_regex(number: &str) -> Option<Regex> {
    let parts: Vec<String> = number
        .split('-')
        .filter(|p| !p.is_empty())
        .map(regex::escape)
        .collect();
    if parts.is_empty() {
        return None;
    }
    Regex::new(&format!(r"(?i)arrêté\s+n[°o]?\s*{}", parts.join(r"[\s_-]*"))).ok()
}

/// Narrow `text` to the span belonging to decree `number`
///
/// Falls back to cutting before the first "date + arrêté" boundary when
/// the marker is absent.
pub(crate) fn narrow(text: &str, number: &str) -> String {
    if let Some(marker) = marker_regex(number).and_then(|re| re.find(text)) {
        let rest = &text[marker.end()..];
        let end = BOUNDARY
            .find(rest)
            .map_or(text.len(), |b| marker.end() + b.start());
        let span = text[marker.start()..end].trim();
        return TRAILING_DATE.replace(span, "").trim().to_string();
    }
    match DATED_NEXT_DECREE.find(text) {
        Some(cut) => text[..cut.start()].trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// Date nearest before this decree's marker in `text`
fn date_before_marker(text: &str, number: &str) -> Option<String> {
    let start = marker_regex(number)?.find(text)?.start();
    find_dates(text)
        .into_iter()
        .take_while(|(offset, _)| *offset < start)
        .last()
        .map(|(_, date)| date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ExtractOptions {
        ExtractOptions::new(
            Url::parse(
                "https://www.prefecturedepolice.interieur.gouv.fr/actualites-et-presse/arretes/accueil-arretes",
            )
            .unwrap(),
        )
    }

    const FIRST_TITLE: &str = "Arrêté n° 2025-01535 portant restriction de la circulation et du stationnement rue de Rivoli à Paris 1er à l'occasion de travaux de voirie";
    const SECOND_TITLE: &str = "Arrêté n° 2025-01536 portant interdiction de manifester sur la place de la Concorde à Paris 8e le samedi 22 novembre 2025";

    #[test]
    fn test_decree_class_cards() {
        let html = r#"<html><body><div class="view">
            <article class="arrete-card">
              <h3>Arrêté n° 2025-01535 réglementant la circulation rue de Rivoli</h3>
              <span class="date">18/11/2025</span>
              <a href="/sites/default/files/Documents/arrete_ndeg2025-01535.pdf">Télécharger</a>
            </article>
            <article class="arrete-card">
              <h3>Arrêté n° 2025-01537 portant interdiction de vente d'alcool</h3>
              <span class="date">17/11/2025</span>
              <a href="/sites/default/files/Documents/arrete_ndeg2025-01537.pdf">Télécharger</a>
            </article>
        </div></body></html>"#;
        let records = extract_records(html, &options());
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.number, "2025-01535");
        assert_eq!(
            first.title,
            "Arrêté n° 2025-01535 réglementant la circulation rue de Rivoli"
        );
        assert_eq!(first.publication_date, "18/11/2025");
        assert_eq!(
            first.pdf_url,
            "https://www.prefecturedepolice.interieur.gouv.fr/sites/default/files/Documents/arrete_ndeg2025-01535.pdf"
        );
        assert_eq!(first.detail_link, first.pdf_url);
        assert!(first.is_traffic_related);

        let second = &records[1];
        assert_eq!(second.number, "2025-01537");
        assert_eq!(second.publication_date, "17/11/2025");
        assert!(!second.is_traffic_related);
    }

    #[test]
    fn test_concatenated_decrees_are_separated() {
        let html = format!(
            r#"<html><body><div class="view-content">
            18/11/2025 <a href="/sites/default/files/Documents/arrete_ndeg2025-01535.pdf">{FIRST_TITLE}</a>
            17/11/2025 <a href="/sites/default/files/Documents/arrete_ndeg2025-01536.pdf">{SECOND_TITLE}</a>
            </div></body></html>"#
        );
        let records = extract_records(&html, &options());
        assert_eq!(records.len(), 2);

        let (first, second) = (&records[0], &records[1]);
        assert_eq!(first.number, "2025-01535");
        assert_eq!(second.number, "2025-01536");

        assert!(!first.title.contains("2025-01536"));
        assert!(!second.title.contains("2025-01535"));
        assert!(!first.content_preview.contains("2025-01536"));
        assert!(!second.content_preview.contains("2025-01535"));

        assert_eq!(first.publication_date, "18/11/2025");
        assert_eq!(second.publication_date, "17/11/2025");
        assert!(first.is_traffic_related);
        assert!(!second.is_traffic_related);
        assert_ne!(first.content_hash, second.content_hash);
    }

    #[test]
    fn test_decree_class_block_with_several_decrees() {
        let html = format!(
            r#"<html><body><div class="view-arretes">
            18/11/2025 <a href="/sites/default/files/Documents/arrete_ndeg2025-01535.pdf">{FIRST_TITLE}</a>
            17/11/2025 <a href="/sites/default/files/Documents/arrete_ndeg2025-01536.pdf">{SECOND_TITLE}</a>
            </div></body></html>"#
        );
        let records = extract_records(&html, &options());
        assert_eq!(records.len(), 2);

        let (first, second) = (&records[0], &records[1]);
        assert_eq!(first.number, "2025-01535");
        assert_eq!(second.number, "2025-01536");
        assert_eq!(first.title, FIRST_TITLE);
        assert_eq!(second.title, SECOND_TITLE);
        assert_eq!(first.publication_date, "18/11/2025");
        assert_eq!(second.publication_date, "17/11/2025");
        assert!(first.pdf_url.ends_with("arrete_ndeg2025-01535.pdf"));
        assert!(second.pdf_url.ends_with("arrete_ndeg2025-01536.pdf"));
        assert!(!first.content_preview.contains("2025-01536"));
        assert!(!second.content_preview.contains("2025-01535"));
    }

    #[test]
    fn test_long_heading_is_windowed() {
        let html = format!(
            r#"<div class="arrete-item">
              <h3 class="title">{FIRST_TITLE} 17/11/2025 {SECOND_TITLE}</h3>
              <a href="/files/arrete_ndeg2025-01535.pdf">Télécharger</a>
            </div>"#
        );
        let records = extract_records(&html, &options());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, "2025-01535");
        assert_eq!(records[0].title, FIRST_TITLE);
    }

    #[test]
    fn test_duplicate_links_extracted_once() {
        let html = r#"<ul>
            <li><a href="/arretes/2025-01535">Arrêté n° 2025-01535 portant circulation</a></li>
            <li><a href="/arretes/2025-01535">Arrêté n° 2025-01535 portant circulation</a></li>
            <li><a href="/arretes/2025-01538">Arrêté n° 2025-01538 portant fermeture</a></li>
        </ul>"#;
        let records = extract_records(html, &options());
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[0].detail_link,
            "https://www.prefecturedepolice.interieur.gouv.fr/arretes/2025-01535"
        );
        assert_eq!(records[0].pdf_url, "");
    }

    #[test]
    fn test_generic_entries_fallback() {
        let html = r#"<div class="results">
            <div class="card"><a href="/node/12">Voir</a>
              <p class="description">Réglementation temporaire du stationnement boulevard Haussmann</p>
              <span data-document="/docs/notice.pdf"></span></div>
            <div class="card"><a href="/node/13">x</a></div>
        </div>"#;
        let records = extract_records(html, &options());
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(
            record.detail_link,
            "https://www.prefecturedepolice.interieur.gouv.fr/node/12"
        );
        assert_eq!(
            record.pdf_url,
            "https://www.prefecturedepolice.interieur.gouv.fr/docs/notice.pdf"
        );
        assert_eq!(
            record.content_preview,
            "Réglementation temporaire du stationnement boulevard Haussmann"
        );
    }

    #[test]
    fn test_no_candidates() {
        let html = "<html><body><p>Aucun résultat</p><a href='/contact'>Contact</a></body></html>";
        assert!(extract_records(html, &options()).is_empty());
    }

    #[test]
    fn test_narrow() {
        let text = "18/11/2025 Arrêté n° 2025-01535 portant circulation rue X 17/11/2025 Arrêté n° 2025-01536 portant fermeture";
        assert_eq!(
            narrow(text, "2025-01535"),
            "Arrêté n° 2025-01535 portant circulation rue X"
        );
        assert_eq!(
            narrow(text, "2025-01536"),
            "Arrêté n° 2025-01536 portant fermeture"
        );

        // separators in the text may differ from the normalized number
        assert_eq!(
            narrow("Arrêté no 2025 01540 relatif aux travaux", "2025-01540"),
            "Arrêté no 2025 01540 relatif aux travaux"
        );

        // no marker: cut before the next dated decree
        assert_eq!(
            narrow("Travaux rue Y 17/11/2025 Arrêté portant fermeture", "2025-09999"),
            "Travaux rue Y"
        );
    }

    #[test]
    fn test_date_before_marker() {
        let text = "18/11/2025 Arrêté n° 2025-01535 texte 17/11/2025 Arrêté n° 2025-01536 texte";
        assert_eq!(
            date_before_marker(text, "2025-01536"),
            Some("17/11/2025".to_string())
        );
        assert_eq!(
            date_before_marker(text, "2025-01535"),
            Some("18/11/2025".to_string())
        );
        assert_eq!(date_before_marker("Arrêté n° 2025-01535", "2025-01535"), None);
    }
}
