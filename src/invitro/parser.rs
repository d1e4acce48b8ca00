//! Field extraction for Invitro analysis pages.
//!
//! Every field has an ordered list of independent strategies: structural
//! selectors first, then regexes over the whole page text. The first strategy
//! yielding a non-empty value wins; a field nobody finds is left empty.

use crate::invitro::models::AnalysisRecord;
use crate::invitro::selectors::{analysis, patterns};
use crate::invitro::strategy::{first_present, normalize, Strategy};
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

/// A parsed analysis page plus its flattened text.
pub struct Page {
    document: Html,
    text: String,
}

impl Page {
    pub fn parse(html: &str) -> Self {
        let document = Html::parse_document(html);
        let text = document.root_element().text().collect::<Vec<_>>().join(" ");
        Self { document, text }
    }

    fn first(&self, selector: &Selector) -> Option<ElementRef<'_>> {
        self.document.select(selector).next()
    }

    /// Text of the first element matching `selector`.
    fn first_text(&self, selector: &Selector) -> Option<String> {
        self.first(selector).map(text_of)
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect()
}

fn spaced_text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

const NAME: &[Strategy<Page>] = &[
    Strategy::new("heading", |p| p.first_text(&analysis::HEADING)),
    Strategy::new("title link", |p| p.first_text(&analysis::TITLE_LINK)),
];

const INTERNAL_CODE: &[Strategy<Page>] = &[
    Strategy::new("article block", code_from_article_block),
    Strategy::new("head number", code_from_head_number),
    Strategy::new("article text", |p| capture(&patterns::ARTICLE, &p.text)),
];

const NOMENCLATURE_CODE: &[Strategy<Page>] = &[
    Strategy::new("description", |p| {
        let description = spaced_text_of(p.first(&analysis::DESCRIPTION)?);
        find(&patterns::NOMENCLATURE, &description)
    }),
    Strategy::new("page text", |p| find(&patterns::NOMENCLATURE, &p.text)),
];

const TURNAROUND: &[Strategy<Page>] = &[
    Strategy::new("list item", |p| p.first_text(&analysis::TURNAROUND)),
    Strategy::new("page text", |p| find(&patterns::TURNAROUND, &p.text)),
];

const PRICE: &[Strategy<Page>] = &[
    Strategy::new("total price", |p| p.first_text(&analysis::PRICE_TOTAL)),
    Strategy::new("total sum", |p| p.first_text(&analysis::PRICE_SUM)),
    Strategy::new("page text", |p| find(&patterns::PRICE, &p.text)),
];

fn code_from_article_block(page: &Page) -> Option<String> {
    let section = page.first(&analysis::ARTICLE_SECTION)?;
    let title = section.select(&analysis::ARTICLE_TITLE).next()?;
    if !text_of(title).contains(analysis::ARTICLE_LABEL) {
        return None;
    }
    section.select(&analysis::ARTICLE_VALUE).next().map(text_of)
}

fn code_from_head_number(page: &Page) -> Option<String> {
    let badge = normalize(&page.first_text(&analysis::HEAD_NUMBER)?);
    capture(&patterns::HEAD_NUMBER, &badge).or_else(|| Some(badge.replace('№', "")))
}

fn capture(re: &regex::Regex, text: &str) -> Option<String> {
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

fn find(re: &regex::Regex, text: &str) -> Option<String> {
    re.find(text).map(|m| m.as_str().to_string())
}

fn crumb_from_attr(crumb: &ElementRef<'_>) -> Option<String> {
    crumb.value().attr(analysis::CRUMB_TEXT_ATTR).map(str::to_string)
}

fn crumb_from_link(crumb: &ElementRef<'_>) -> Option<String> {
    crumb.select(&analysis::CRUMB_LINK).next().map(text_of)
}

fn crumb_from_current(crumb: &ElementRef<'_>) -> Option<String> {
    crumb.select(&analysis::CRUMB_CURRENT).next().map(text_of)
}

/// Breadcrumb labels below the two site-root crumbs, in page order.
/// Crumbs without any usable label are skipped.
fn breadcrumb_trail(page: &Page) -> Vec<String> {
    page.document
        .select(&analysis::BREADCRUMBS)
        .skip(2)
        .map(|crumb| {
            let chain: [Strategy<ElementRef<'_>>; 3] = [
                Strategy::new("origin_text", crumb_from_attr),
                Strategy::new("link", crumb_from_link),
                Strategy::new("current", crumb_from_current),
            ];
            first_present("breadcrumb", &crumb, &chain)
        })
        .filter(|label| !label.is_empty())
        .collect()
}

/// Extracts analysis records from item pages.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageExtractor;

impl PageExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extracts all seven fields. Never fails on parseable markup: missing
    /// fields come back as empty strings.
    pub fn extract(&self, html: &str, url: &str) -> AnalysisRecord {
        let page = Page::parse(html);
        let mut trail = breadcrumb_trail(&page).into_iter();

        let record = AnalysisRecord {
            category: trail.next().unwrap_or_default(),
            subcategory: trail.next().unwrap_or_default(),
            name: first_present("name", &page, NAME),
            internal_code: first_present("internal_code", &page, INTERNAL_CODE),
            nomenclature_code: first_present("nomenclature_code", &page, NOMENCLATURE_CODE),
            turnaround: first_present("turnaround", &page, TURNAROUND),
            price: first_present("price", &page, PRICE),
        };

        debug!("Parsed {}: {:?} (code {:?})", url, record.name, record.internal_code);
        record
    }
}
