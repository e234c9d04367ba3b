//! HTML to structured text
//!
//! Parsing runs on the blocking pool; the whole fetch + parse is bounded by
//! the caller's timeout.

use crate::fetcher::PageFetcher;
use researchforge_common::errors::{AppError, FetchErrorKind, Result};
use researchforge_common::models::ExtractedContent;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const MAX_LINKS: usize = 50;
const MARKDOWN_WIDTH: usize = 100;

/// Elements whose text is never part of the main content
const SKIPPED: &[&str] = &[
    "nav", "footer", "header", "aside", "script", "style", "noscript", "form", "svg", "button",
];

/// Elements that carry readable text
const BLOCKS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "blockquote", "pre", "td",
];

struct Selectors {
    title: Selector,
    meta: Selector,
    roots: Vec<Selector>,
    blocks: Selector,
    tables: Selector,
    rows: Selector,
    cells: Selector,
    links: Selector,
}

static SELECTORS: OnceLock<Selectors> = OnceLock::new();

fn selectors() -> &'static Selectors {
    SELECTORS.get_or_init(|| {
        let parse = |css: &str| Selector::parse(css).expect("valid selector");
        Selectors {
            title: parse("title"),
            meta: parse("meta"),
            roots: ["article", "main", "[role='main']", "#content", "body"]
                .iter()
                .map(|css| parse(css))
                .collect(),
            blocks: parse("h1, h2, h3, h4, h5, h6, p, li, blockquote, pre"),
            tables: parse("table"),
            rows: parse("tr"),
            cells: parse("td, th"),
            links: parse("a[href]"),
        }
    })
}

/// Turns fetched pages into [`ExtractedContent`]
pub struct ContentExtractor {
    fetcher: Arc<dyn PageFetcher>,
}

impl ContentExtractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch `url` and extract it, all within `timeout_secs`
    pub async fn fetch_and_extract(
        &self,
        url: &str,
        selector_query: Option<&str>,
        timeout_secs: u64,
    ) -> Result<ExtractedContent> {
        let timeout = Duration::from_secs(timeout_secs.max(1));

        let work = async {
            let page = self.fetcher.fetch(url, timeout).await?;
            let Some(html) = page.html else {
                return Err(AppError::Fetch {
                    url: url.to_string(),
                    kind: FetchErrorKind::HttpStatus(page.status.unwrap_or(0)),
                    message: page.error.unwrap_or_else(|| "empty response".to_string()),
                });
            };

            let owned_url = url.to_string();
            let selector = selector_query.map(str::to_string);
            tokio::task::spawn_blocking(move || extract_html(&owned_url, &html, selector.as_deref()))
                .await
                .map_err(|e| AppError::Internal {
                    message: format!("Extraction task failed: {}", e),
                })?
        };

        match tokio::time::timeout(timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(url, timeout_secs, "Fetch and extract timed out");
                Err(AppError::Timeout {
                    operation: format!("fetch_and_extract {}", url),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[derive(Debug)]
struct Block {
    heading: bool,
    text: String,
}

/// Extract structured content from raw HTML
pub fn extract_html(url: &str, html: &str, selector_query: Option<&str>) -> Result<ExtractedContent> {
    let document = Html::parse_document(html);
    let sel = selectors();

    let title = document
        .select(&sel.title)
        .next()
        .map(|t| collapse(&element_text(t)))
        .filter(|t| !t.is_empty())
        .or_else(|| meta_content(&document, "og:title"));
    let description =
        meta_content(&document, "description").or_else(|| meta_content(&document, "og:description"));

    let root = sel
        .roots
        .iter()
        .find_map(|s| document.select(s).find(|el| !collapse(&element_text(*el)).is_empty()))
        .unwrap_or_else(|| document.root_element());

    let blocks = collect_blocks(root);
    let headings: Vec<String> = blocks
        .iter()
        .filter(|b| b.heading)
        .map(|b| b.text.clone())
        .collect();

    let mut main_text = match selector_query.map(str::trim).filter(|q| !q.is_empty()) {
        Some(query) => narrow_to_query(&blocks, query),
        None => join_blocks(blocks.iter()),
    };
    if main_text.is_empty() {
        main_text = collapse(&element_text(root));
    }
    if main_text.is_empty() {
        return Err(AppError::Extraction {
            url: url.to_string(),
            message: "no readable content".to_string(),
        });
    }

    let markdown = html2text::from_read(html.as_bytes(), MARKDOWN_WIDTH).map_err(|e| {
        AppError::Extraction {
            url: url.to_string(),
            message: format!("markdown conversion failed: {}", e),
        }
    })?;

    let content = ExtractedContent {
        url: url.to_string(),
        title,
        description,
        main_text,
        headings,
        tables: collect_tables(&document),
        links: collect_links(root, url),
        markdown,
    };
    debug!(
        url,
        chars = content.main_text.len(),
        headings = content.headings.len(),
        tables = content.tables.len(),
        "Extracted page"
    );
    Ok(content)
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn meta_content(document: &Html, key: &str) -> Option<String> {
    document
        .select(&selectors().meta)
        .find(|m| {
            let el = m.value();
            el.attr("name").or_else(|| el.attr("property")) == Some(key)
        })
        .and_then(|m| m.value().attr("content"))
        .map(collapse)
        .filter(|c| !c.is_empty())
}

/// Readable blocks under `root`, skipping chrome and nested duplicates
fn collect_blocks(root: ElementRef<'_>) -> Vec<Block> {
    root.select(&selectors().blocks)
        .filter(|el| {
            !el.ancestors().any(|node| {
                node.value()
                    .as_element()
                    .is_some_and(|a| SKIPPED.contains(&a.name()) || BLOCKS.contains(&a.name()))
            })
        })
        .filter_map(|el| {
            let text = collapse(&element_text(el));
            if text.is_empty() {
                return None;
            }
            let name = el.value().name();
            Some(Block {
                heading: name.len() == 2 && name.starts_with('h'),
                text,
            })
        })
        .collect()
}

fn join_blocks<'a>(blocks: impl Iterator<Item = &'a Block>) -> String {
    blocks.map(|b| b.text.as_str()).collect::<Vec<_>>().join("\n\n")
}

fn query_terms(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn hits(text: &str, terms: &[String]) -> usize {
    let lower = text.to_lowercase();
    terms.iter().filter(|t| lower.contains(t.as_str())).count()
}

/// Keep the heading sections that mention the query. A heading match keeps
/// the whole section; otherwise only matching paragraphs are kept, each with
/// its section heading. Falls back to the full text when nothing matches.
fn narrow_to_query(blocks: &[Block], query: &str) -> String {
    let terms = query_terms(query);
    if terms.is_empty() {
        return join_blocks(blocks.iter());
    }

    let mut sections: Vec<Vec<&Block>> = Vec::new();
    for block in blocks {
        match sections.last_mut() {
            Some(section) if !block.heading => section.push(block),
            _ => sections.push(vec![block]),
        }
    }

    let mut kept: Vec<&Block> = Vec::new();
    for section in &sections {
        let (head, body) = match section.split_first() {
            Some((head, body)) if head.heading => (Some(*head), body),
            _ => (None, section.as_slice()),
        };

        if head.is_some_and(|h| hits(&h.text, &terms) > 0) {
            kept.extend(section.iter().copied());
            continue;
        }

        let matching: Vec<&Block> = body
            .iter()
            .copied()
            .filter(|b| hits(&b.text, &terms) > 0)
            .collect();
        if !matching.is_empty() {
            kept.extend(head);
            kept.extend(matching);
        }
    }

    if kept.is_empty() {
        join_blocks(blocks.iter())
    } else {
        join_blocks(kept.into_iter())
    }
}

fn collect_tables(document: &Html) -> Vec<Vec<Vec<String>>> {
    let sel = selectors();
    document
        .select(&sel.tables)
        .filter_map(|table| {
            let rows: Vec<Vec<String>> = table
                .select(&sel.rows)
                .map(|row| {
                    row.select(&sel.cells)
                        .map(|cell| collapse(&element_text(cell)))
                        .collect::<Vec<_>>()
                })
                .filter(|cells| cells.iter().any(|c| !c.is_empty()))
                .collect();
            (!rows.is_empty()).then_some(rows)
        })
        .collect()
}

/// Absolute http(s) links from the main content, deduplicated, in document order
fn collect_links(root: ElementRef<'_>, base: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    root.select(&selectors().links)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|link| matches!(link.scheme(), "http" | "https"))
        .map(|mut link| {
            link.set_fragment(None);
            link.to_string()
        })
        .filter(|link| seen.insert(link.clone()))
        .take(MAX_LINKS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPageFetcher;

    const PAGE: &str = r#"<!doctype html>
<html>
<head>
  <title> Fusion Energy Update </title>
  <meta name="description" content="Where fusion research stands.">
</head>
<body>
  <nav><a href="/home">Home</a><p>Menu text</p></nav>
  <article>
    <h1>Fusion Energy Update</h1>
    <p>Fusion research continued through the year.</p>
    <h2>Funding</h2>
    <p>Public funding rose to 2 billion dollars in 2024.</p>
    <p>Private investors also joined.</p>
    <h2>Milestones</h2>
    <p>The tokamak reached a record plasma duration.</p>
    <ul><li>Record set in <a href="https://lab.example.org/record#top">the lab</a></li></ul>
    <table>
      <tr><th>Year</th><th>Budget</th></tr>
      <tr><td>2024</td><td>2B</td></tr>
      <tr><td></td><td></td></tr>
    </table>
    <a href="/more">More</a>
    <a href="mailto:desk@example.com">Mail</a>
  </article>
  <footer><p>Copyright</p></footer>
</body>
</html>"#;

    #[test]
    fn test_extracts_structure() {
        let content = extract_html("https://news.example.com/fusion", PAGE, None).unwrap();

        assert_eq!(content.title.as_deref(), Some("Fusion Energy Update"));
        assert_eq!(content.description.as_deref(), Some("Where fusion research stands."));
        assert_eq!(
            content.headings,
            vec!["Fusion Energy Update", "Funding", "Milestones"]
        );
        assert!(content.main_text.contains("Public funding rose"));
        assert!(!content.main_text.contains("Menu text"));
        assert!(!content.main_text.contains("Copyright"));

        assert_eq!(content.tables.len(), 1);
        assert_eq!(content.tables[0], vec![vec!["Year", "Budget"], vec!["2024", "2B"]]);

        assert_eq!(
            content.links,
            vec![
                "https://lab.example.org/record".to_string(),
                "https://news.example.com/more".to_string()
            ]
        );
        assert!(content.markdown.contains("Funding"));
    }

    #[test]
    fn test_selector_query_keeps_matching_section() {
        let content =
            extract_html("https://news.example.com/fusion", PAGE, Some("funding")).unwrap();
        assert!(content.main_text.starts_with("Funding"));
        assert!(content.main_text.contains("Private investors"));
        assert!(!content.main_text.contains("tokamak"));
    }

    #[test]
    fn test_selector_query_matches_paragraph_with_heading() {
        let content =
            extract_html("https://news.example.com/fusion", PAGE, Some("plasma duration")).unwrap();
        assert_eq!(
            content.main_text,
            "Milestones\n\nThe tokamak reached a record plasma duration."
        );
    }

    #[test]
    fn test_unmatched_selector_returns_full_text() {
        let full = extract_html("https://news.example.com/fusion", PAGE, None).unwrap();
        let narrowed =
            extract_html("https://news.example.com/fusion", PAGE, Some("zebra crossings")).unwrap();
        assert_eq!(full.main_text, narrowed.main_text);
    }

    #[test]
    fn test_empty_page_is_extraction_error() {
        let err = extract_html("https://example.com", "<html><body>  </body></html>", None)
            .unwrap_err();
        assert!(matches!(err, AppError::Extraction { .. }));
    }

    #[tokio::test]
    async fn test_fetch_and_extract_through_fetcher() {
        let fetcher = Arc::new(MockPageFetcher::new().with_page("https://news.example.com/fusion", PAGE));
        let extractor = ContentExtractor::new(fetcher.clone());

        let content = extractor
            .fetch_and_extract("https://news.example.com/fusion", None, 5)
            .await
            .unwrap();
        assert_eq!(content.url, "https://news.example.com/fusion");
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_http_status_becomes_fetch_error() {
        let fetcher = Arc::new(MockPageFetcher::new().with_status("https://example.com/gone", 404));
        let extractor = ContentExtractor::new(fetcher);

        let err = extractor
            .fetch_and_extract("https://example.com/gone", None, 5)
            .await
            .unwrap_err();
        match err {
            AppError::Fetch { kind, .. } => assert_eq!(kind, FetchErrorKind::HttpStatus(404)),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out() {
        let fetcher = Arc::new(
            MockPageFetcher::new()
                .with_page("https://slow.example.com", PAGE)
                .with_delay(Duration::from_secs(3)),
        );
        let extractor = ContentExtractor::new(fetcher);

        let err = extractor
            .fetch_and_extract("https://slow.example.com", None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout { .. }));
    }
}
