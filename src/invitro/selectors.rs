//! CSS selectors and text patterns for Invitro pages.
//!
//! This file contains every selector and regex the harvester relies on.
//! Update this file when the site changes its markup.
//!
//! **Update process**: when a field starts coming back empty, capture an HTML
//! sample, update the selector, and add a test case in `parser.rs`.

use regex::Regex;
use scraper::Selector;
use std::sync::LazyLock;

/// Selectors for a city's analyses listing.
pub mod listing {
    use super::*;

    /// Title link of an analysis card.
    pub static ITEM_LINK: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse(".analyzes-list__item .analyzes-item__title a").unwrap()
    });

    /// Any hyperlink, for the pattern-based fallback.
    pub static ANY_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

    /// City entry in the basket city picker.
    pub static CITY_ITEM: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".select-basket-city-item").unwrap());

    /// Slug attribute on a city entry.
    pub static CITY_CODE_ATTR: &str = "data-code";
}

/// Selectors for an analysis page.
pub mod analysis {
    use super::*;

    pub static HEADING: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());

    /// Card title link, present on some page layouts instead of a heading.
    pub static TITLE_LINK: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".analyzes-item__title a").unwrap());

    /// Breadcrumb entries, including the two leading site-root crumbs.
    pub static BREADCRUMBS: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".bread-crumbs__list li").unwrap());

    /// Precomputed crumb label attribute.
    pub static CRUMB_TEXT_ATTR: &str = "origin_text";

    pub static CRUMB_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").unwrap());

    /// Marker of the crumb for the current page.
    pub static CRUMB_CURRENT: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("span.bread-crumbs__current").unwrap());

    /// "Артикул" block in the order sidebar.
    pub static ARTICLE_SECTION: LazyLock<Selector> = LazyLock::new(|| {
        Selector::parse("div.info-block__section.info-block__section--article").unwrap()
    });

    pub static ARTICLE_TITLE: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("span.info-block__title").unwrap());

    pub static ARTICLE_VALUE: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("span.info-block__price").unwrap());

    /// Label that marks the article block.
    pub static ARTICLE_LABEL: &str = "Артикул:";

    /// "№ 123" badge in the card header.
    pub static HEAD_NUMBER: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".analyzes-item__head--number span").unwrap());

    pub static DESCRIPTION: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".analyzes-item__description").unwrap());

    pub static TURNAROUND: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".analyzes-item__add--list-item span").unwrap());

    pub static PRICE_TOTAL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".info-block__price--total").unwrap());

    pub static PRICE_SUM: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse(".analyzes-item__total--sum").unwrap());
}

/// Regexes applied to element text or to the whole page text.
pub mod patterns {
    use super::*;

    /// Number inside the header badge.
    pub static HEAD_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"№\s*(\d+)").unwrap());

    /// Article number anywhere on the page.
    pub static ARTICLE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"Артикул:\s*(\S+)").unwrap());

    /// Ministry of Health nomenclature code, e.g. `A09.05.023`.
    pub static NOMENCLATURE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[A-ZА-Я]\d{2}\.\d{2}\.\d{3}").unwrap());

    /// "3 рабочих дня", "1 календарный день", ...
    pub static TURNAROUND: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\d+\s*(?:рабоч|календарн)[а-я]*\s*д(?:ень|ня|ней)").unwrap()
    });

    /// "1 290 ₽", "790.00 руб", ...
    pub static PRICE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\b\d[\d\s]*(?:[.,]\d{2})?\s*(?:₽|руб)").unwrap());
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    #[test]
    fn test_selectors_compile() {
        let _ = &*listing::ITEM_LINK;
        let _ = &*listing::ANY_LINK;
        let _ = &*listing::CITY_ITEM;
        let _ = &*analysis::HEADING;
        let _ = &*analysis::BREADCRUMBS;
        let _ = &*analysis::ARTICLE_SECTION;
        let _ = &*analysis::HEAD_NUMBER;
        let _ = &*analysis::PRICE_TOTAL;
        let _ = &*patterns::HEAD_NUMBER;
        let _ = &*patterns::ARTICLE;
        let _ = &*patterns::NOMENCLATURE;
        let _ = &*patterns::TURNAROUND;
        let _ = &*patterns::PRICE;
    }

    #[test]
    fn test_item_link_requires_list_container() {
        let html = Html::parse_document(
            r#"<div class="analyzes-list__item">
                <div class="analyzes-item__title"><a href="/a/1/">In list</a></div>
            </div>
            <div class="analyzes-item__title"><a href="/a/2/">Outside</a></div>"#,
        );

        let links: Vec<_> = html.select(&listing::ITEM_LINK).collect();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].value().attr("href"), Some("/a/1/"));
    }

    #[test]
    fn test_article_section_needs_both_classes() {
        let html = Html::parse_document(
            r#"<div class="info-block__section">x</div>
            <div class="info-block__section info-block__section--article">y</div>"#,
        );
        assert_eq!(html.select(&analysis::ARTICLE_SECTION).count(), 1);
    }

    #[test]
    fn test_patterns() {
        assert_eq!(&patterns::HEAD_NUMBER.captures("№ 1515").unwrap()[1], "1515");
        assert_eq!(&patterns::ARTICLE.captures("Артикул:  21-001 x").unwrap()[1], "21-001");
        assert_eq!(patterns::NOMENCLATURE.find("код А09.05.023").unwrap().as_str(), "А09.05.023");
        assert!(patterns::TURNAROUND.is_match("Срок: 2 Рабочих дня"));
        assert!(patterns::TURNAROUND.is_match("10 календарных дней"));
        assert_eq!(patterns::PRICE.find("Цена 1 290 ₽").unwrap().as_str(), "1 290 ₽");
        assert_eq!(patterns::PRICE.find("всего 790,00 руб.").unwrap().as_str(), "790,00 руб");
    }
}
