//! Category page detection.
//!
//! Index pages that link to many properties but carry no prices of their
//! own ("Flats in Lekki", "All locations") must not be mined for listings.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::Serialize;

use super::patterns::{count_bedroom_tokens, count_price_tokens};

static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static PAGINATION: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[class*="pagination"], [class*="pager"], nav[aria-label*="agination"], a[rel="next"]"#).unwrap()
});

/// Path fragments that mark a link as pointing at a property or a property index.
const PROPERTY_LINK_HINTS: &[&str] = &[
    "property",
    "properties",
    "listing",
    "for-sale",
    "for-rent",
    "to-let",
    "short-let",
    "house",
    "flat",
    "apartment",
    "duplex",
    "land",
    "estate",
];

/// Minimum distinct property-like links before a price-less page counts as a category page.
pub const MIN_CATEGORY_LINKS: usize = 10;

/// Signals gathered from a whole page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategorySignals {
    /// Distinct outbound links whose path looks property-related.
    pub property_links: usize,
    pub pagination_controls: usize,
    pub price_tokens: usize,
    pub bedroom_tokens: usize,
}

impl CategorySignals {
    /// `page_text` is the visible text of the whole document.
    pub fn collect(document: &Html, page_text: &str) -> Self {
        Self {
            property_links: count_property_links(document),
            pagination_controls: document.select(&PAGINATION).count(),
            price_tokens: count_price_tokens(page_text),
            bedroom_tokens: count_bedroom_tokens(page_text),
        }
    }

    /// Many property links and not one plausible price.
    pub fn is_category_page(&self, min_links: usize) -> bool {
        self.property_links >= min_links && self.price_tokens == 0
    }
}

/// Distinct hrefs whose lowercased value contains a property hint.
pub fn count_property_links(document: &Html) -> usize {
    let mut seen = HashSet::new();
    for anchor in document.select(&ANCHORS) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href = href.trim().to_lowercase();
        if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:") {
            continue;
        }
        if PROPERTY_LINK_HINTS.iter().any(|hint| href.contains(hint)) {
            seen.insert(href);
        }
    }
    seen.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::text::element_text;

    fn signals(html: &str) -> CategorySignals {
        let document = Html::parse_document(html);
        let text = element_text(&document.root_element());
        CategorySignals::collect(&document, &text)
    }

    fn link_list(n: usize) -> String {
        (0..n)
            .map(|i| format!(r#"<li><a href="/property/lekki-{i}">Lekki area {i}</a></li>"#))
            .collect()
    }

    #[test]
    fn test_link_farm_is_category() {
        let html = format!(
            r#"<ul>{}</ul><div class="pagination"><a href="?page=2">2</a></div>"#,
            link_list(12)
        );
        let signals = signals(&html);
        assert_eq!(signals.property_links, 12);
        assert!(signals.pagination_controls >= 1);
        assert!(signals.is_category_page(MIN_CATEGORY_LINKS));
    }

    #[test]
    fn test_prices_mean_listing_page() {
        let html = format!(r#"<ul>{}</ul><p>From ₦45,000,000</p>"#, link_list(12));
        let signals = signals(&html);
        assert_eq!(signals.price_tokens, 1);
        assert!(!signals.is_category_page(MIN_CATEGORY_LINKS));
    }

    #[test]
    fn test_few_links_not_category() {
        let signals = signals(&format!("<ul>{}</ul>", link_list(3)));
        assert!(!signals.is_category_page(MIN_CATEGORY_LINKS));
    }

    #[test]
    fn test_duplicate_links_counted_once() {
        let html = r#"<a href="/property/1">a</a><a href="/property/1">b</a><a href="/about">c</a>"#;
        assert_eq!(count_property_links(&Html::parse_document(html)), 1);
    }
}
