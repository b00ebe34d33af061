//! Link and title extraction for fetched pages
//!
//! Steps that follow links use [`parse_page`] on a fetched body to find the
//! next URLs to chain.

use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Title and outgoing links of an HTML page
#[derive(Debug, Clone, Default)]
pub struct ParsedPage {
    /// Trimmed text of the `<title>` tag, if present and non-empty
    pub title: Option<String>,

    /// Absolute HTTP(S) links, fragments removed, in document order without
    /// duplicates
    pub links: Vec<Url>,
}

/// Parses `html` and resolves its links against `base_url`
///
/// # Link Rules
///
/// **Include:** `<a href>` and `<link rel="canonical" href>`
///
/// **Exclude:** `<a download>`, fragment-only hrefs, and anything that does
/// not resolve to an `http`/`https` URL (`javascript:`, `mailto:`, `tel:`,
/// `data:`, ...)
///
/// # Example
///
/// ```
/// use stepcrawl::crawler::parse_page;
/// use url::Url;
///
/// let html = r#"<title>Home</title><a href="/about#team">About</a>"#;
/// let base = Url::parse("https://example.com/").unwrap();
/// let page = parse_page(html, &base);
/// assert_eq!(page.title.as_deref(), Some("Home"));
/// assert_eq!(page.links[0].as_str(), "https://example.com/about");
/// ```
pub fn parse_page(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);

    ParsedPage {
        title: extract_title(&document),
        links: extract_links(&document, base_url),
    }
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;

    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<Url> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let Ok(selector) = Selector::parse("a[href], link[rel='canonical'][href]") else {
        return links;
    };

    for element in document.select(&selector) {
        if element.value().attr("download").is_some() {
            continue;
        }

        let resolved = element
            .value()
            .attr("href")
            .and_then(|href| resolve_link(href, base_url));

        if let Some(url) = resolved {
            if seen.insert(url.as_str().to_string()) {
                links.push(url);
            }
        }
    }

    links
}

/// Resolves an href to an absolute HTTP(S) URL without its fragment
fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}
