//! Analysis link discovery on a city listing page.

use crate::invitro::selectors::listing;
use anyhow::{Context, Result};
use regex::Regex;
use scraper::Html;
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Collects analysis page URLs from a listing.
///
/// Cards in the analyses list are the primary source. Only when the listing
/// has none does the collector scan every hyperlink for paths shaped like an
/// analysis page.
#[derive(Debug, Clone)]
pub struct LinkCollector {
    base: Url,
    fallback: Regex,
}

impl LinkCollector {
    /// `base` is the site URL hrefs are resolved against.
    pub fn new(base: &str, fallback_pattern: &str) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("Invalid base URL: {}", base))?;
        let fallback = Regex::new(fallback_pattern)
            .with_context(|| format!("Invalid fallback link pattern: {}", fallback_pattern))?;
        Ok(Self { base, fallback })
    }

    /// Returns absolute URLs in first-seen order, without duplicates.
    pub fn collect(&self, html: &str) -> Vec<String> {
        let document = Html::parse_document(html);

        let mut links = Links::default();
        for a in document.select(&listing::ITEM_LINK) {
            if let Some(url) = a.value().attr("href").and_then(|h| resolve_href(&self.base, h)) {
                links.push(url);
            }
        }

        if links.is_empty() {
            for a in document.select(&listing::ANY_LINK) {
                let Some(href) = a.value().attr("href") else { continue };
                if !self.fallback.is_match(href.trim()) {
                    continue;
                }
                if let Some(url) = resolve_href(&self.base, href) {
                    links.push(url);
                }
            }
            debug!("Listing has no analysis cards, fallback scan found {} links", links.len());
        }

        links.into_vec()
    }
}

/// Insertion-ordered set of URLs.
#[derive(Default)]
struct Links {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl Links {
    fn push(&mut self, url: String) {
        if self.seen.insert(url.clone()) {
            self.ordered.push(url);
        }
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }

    fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

/// Resolves an href against `base` into a normalized absolute URL.
///
/// Returns `None` for hrefs that do not point at a page: empty values,
/// fragments, `javascript:`/`mailto:`/`tel:`/`data:` links, unparsable
/// values and anything that resolves to a scheme other than http(s).
/// The fragment of a resolved URL is dropped.
pub fn resolve_href(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"].iter().any(|p| lower.starts_with(p)) {
        return None;
    }

    let mut url = base.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FALLBACK_LINK_PATTERN;

    const HOST: &str = "https://www.invitro.ru";

    fn collector() -> LinkCollector {
        LinkCollector::new(HOST, DEFAULT_FALLBACK_LINK_PATTERN).unwrap()
    }

    fn card(href: &str) -> String {
        format!(
            r#"<div class="analyzes-list__item"><div class="analyzes-item__title"><a href="{}">x</a></div></div>"#,
            href
        )
    }

    #[test]
    fn test_primary_strategy_dedups_in_first_seen_order() {
        let hrefs = ["/a/3/", "/a/1/", "/a/3/", "https://www.invitro.ru/a/1/", "/a/2/", "/a/1/"];
        let html: String = hrefs.iter().map(|h| card(h)).collect();

        let links = collector().collect(&html);
        assert_eq!(
            links,
            vec![
                "https://www.invitro.ru/a/3/",
                "https://www.invitro.ru/a/1/",
                "https://www.invitro.ru/a/2/",
            ]
        );
    }

    #[test]
    fn test_primary_strategy_wins_over_fallback() {
        let html = format!(
            r#"{}<a href="/analizes/for-doctors/153/2570/">other</a>"#,
            card("/analizes/for-doctors/piter/1/2/")
        );
        let links = collector().collect(&html);
        assert_eq!(links, vec!["https://www.invitro.ru/analizes/for-doctors/piter/1/2/"]);
    }

    #[test]
    fn test_fallback_scan_matches_pattern_only() {
        let html = r#"
            <a href="/analizes/for-doctors/153/2570/">ok</a>
            <a href="/analizes/for-doctors/piter/153/2571">ok with city, no slash</a>
            <a href="/analizes/for-doctors/153/">too short</a>
            <a href="/analizes/for-doctors/a/b/153/2572/">two segments</a>
            <a href="https://www.invitro.ru/analizes/for-doctors/153/2573/">absolute</a>
            <a href="/analizes/for-doctors/153/2570/">duplicate</a>
            <a href="/about/">unrelated</a>
        "#;

        let links = collector().collect(html);
        assert_eq!(
            links,
            vec![
                "https://www.invitro.ru/analizes/for-doctors/153/2570/",
                "https://www.invitro.ru/analizes/for-doctors/piter/153/2571",
            ]
        );
    }

    #[test]
    fn test_custom_fallback_pattern() {
        let collector = LinkCollector::new(HOST, r"^/tests/\d+$").unwrap();
        let html = r#"<a href="/tests/7">t</a><a href="/analizes/for-doctors/1/2/">a</a>"#;
        assert_eq!(collector.collect(html), vec!["https://www.invitro.ru/tests/7"]);
    }

    #[test]
    fn test_invalid_fallback_pattern() {
        let err = LinkCollector::new(HOST, "([").unwrap_err();
        assert!(err.to_string().contains("Invalid fallback link pattern"));
    }

    #[test]
    fn test_empty_listing_yields_no_links() {
        assert!(collector().collect("").is_empty());
        assert!(collector().collect("<html><body><a href='/about/'>x</a></body></html>").is_empty());
    }

    #[test]
    fn test_cards_without_href_are_skipped() {
        let html = r#"<div class="analyzes-list__item"><div class="analyzes-item__title"><a>x</a></div></div>"#;
        assert!(collector().collect(html).is_empty());
    }

    #[test]
    fn test_equivalent_hrefs_collapse_to_one_link() {
        let hrefs = [
            "/analizes/for-doctors/153/2570/",
            "HTTPS://WWW.INVITRO.RU/analizes/for-doctors/153/2570/",
            "/analizes/for-doctors/piter/../153/2570/",
            "/analizes/for-doctors/./153/2570/",
            "/analizes/for-doctors/153/2570/#price",
        ];
        let html: String = hrefs.iter().map(|h| card(h)).collect();

        let links = collector().collect(&html);
        assert_eq!(links, vec!["https://www.invitro.ru/analizes/for-doctors/153/2570/"]);
    }

    #[test]
    fn test_resolve_href() {
        let base = Url::parse(HOST).unwrap();
        assert_eq!(resolve_href(&base, "/a/1/").unwrap(), "https://www.invitro.ru/a/1/");
        assert_eq!(resolve_href(&base, "a/1/").unwrap(), "https://www.invitro.ru/a/1/");
        assert_eq!(resolve_href(&base, "//cdn.invitro.ru/x").unwrap(), "https://cdn.invitro.ru/x");
        assert_eq!(resolve_href(&base, "http://other.ru/x").unwrap(), "http://other.ru/x");
        assert_eq!(resolve_href(&base, "/a/b/../c/").unwrap(), "https://www.invitro.ru/a/c/");

        let local = Url::parse("http://127.0.0.1:9000").unwrap();
        assert_eq!(resolve_href(&local, "/a/").unwrap(), "http://127.0.0.1:9000/a/");

        assert!(resolve_href(&base, "").is_none());
        assert!(resolve_href(&base, "#top").is_none());
        assert!(resolve_href(&base, "javascript:void(0)").is_none());
        assert!(resolve_href(&base, "mailto:info@invitro.ru").is_none());
        assert!(resolve_href(&base, "tel:+78002003630").is_none());
        assert!(resolve_href(&base, "ftp://files.invitro.ru/a").is_none());
    }

    #[test]
    fn test_invalid_base_url() {
        let err = LinkCollector::new("not a url", DEFAULT_FALLBACK_LINK_PATTERN).unwrap_err();
        assert!(err.to_string().contains("Invalid base URL"));
    }
}
