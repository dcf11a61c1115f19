//! Extraction engine: one generic interpreter for every site's selector hints.

pub mod cards;
pub mod category;
pub mod fields;
pub mod patterns;
pub mod structured;
pub mod text;

pub use cards::CardSource;
pub use category::{CategorySignals, MIN_CATEGORY_LINKS};
pub use fields::{CardContext, FieldRule, FIELD_RULES};
pub use structured::StructuredListing;

use chrono::Utc;
use scraper::{Html, Selector};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::config::{ParserKind, Selectors, SiteConfig};
use crate::models::{RawListing, RawPage};

/// Fields pulled through the fallback chain. Images are collected separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Price,
    Location,
    Bedrooms,
    Bathrooms,
    PropertyType,
    Description,
    Link,
}

/// Site selectors parsed once per page. Selectors that fail to parse are
/// treated as absent.
#[derive(Debug, Default)]
pub struct CompiledSelectors {
    pub card: Option<Selector>,
    pub title: Option<Selector>,
    pub price: Option<Selector>,
    pub location: Option<Selector>,
    pub bedrooms: Option<Selector>,
    pub bathrooms: Option<Selector>,
    pub property_type: Option<Selector>,
    pub description: Option<Selector>,
    pub images: Option<Selector>,
    pub link: Option<Selector>,
}

fn compile(css: &Option<String>) -> Option<Selector> {
    let css = css.as_deref()?;
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            debug!("Ignoring selector {}: {:?}", css, e);
            None
        }
    }
}

impl CompiledSelectors {
    pub fn compile(selectors: &Selectors) -> Self {
        Self {
            card: compile(&selectors.card),
            title: compile(&selectors.title),
            price: compile(&selectors.price),
            location: compile(&selectors.location),
            bedrooms: compile(&selectors.bedrooms),
            bathrooms: compile(&selectors.bathrooms),
            property_type: compile(&selectors.property_type),
            description: compile(&selectors.description),
            images: compile(&selectors.images),
            link: compile(&selectors.link),
        }
    }

    pub fn field(&self, field: Field) -> Option<&Selector> {
        match field {
            Field::Title => self.title.as_ref(),
            Field::Price => self.price.as_ref(),
            Field::Location => self.location.as_ref(),
            Field::Bedrooms => self.bedrooms.as_ref(),
            Field::Bathrooms => self.bathrooms.as_ref(),
            Field::PropertyType => self.property_type.as_ref(),
            Field::Description => self.description.as_ref(),
            Field::Link => self.link.as_ref(),
        }
    }
}

/// Why a page produced no listings without being looked at card by card.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    CategoryPage(CategorySignals),
    EmptyDocument,
    InvalidUrl,
}

/// Listings of one page plus diagnostics for the manifest.
#[derive(Debug, Clone, Default)]
pub struct PageExtraction {
    pub listings: Vec<RawListing>,
    pub cards_found: usize,
    /// Cards with no usable field at all.
    pub cards_dropped: usize,
    pub skipped: Option<SkipReason>,
}

impl PageExtraction {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn is_category_page(&self) -> bool {
        matches!(self.skipped, Some(SkipReason::CategoryPage(_)))
    }
}

#[derive(Debug, Clone)]
pub struct ExtractionEngine {
    min_category_links: usize,
}

impl Default for ExtractionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionEngine {
    pub fn new() -> Self {
        Self {
            min_category_links: MIN_CATEGORY_LINKS,
        }
    }

    pub fn with_min_category_links(min_category_links: usize) -> Self {
        Self { min_category_links }
    }

    /// Extract every listing on `page`. Never fails: missing fields are `None`.
    pub fn extract(&self, page: &RawPage, site: &SiteConfig) -> PageExtraction {
        let document = Html::parse_document(&page.content);
        self.extract_document(&document, page, site)
    }

    /// Same as [`extract`](Self::extract) for a document that is already parsed.
    pub fn extract_document(&self, document: &Html, page: &RawPage, site: &SiteConfig) -> PageExtraction {
        let page_text = text::element_text(&document.root_element());
        if page_text.is_empty() {
            return PageExtraction::skipped(SkipReason::EmptyDocument);
        }

        let signals = CategorySignals::collect(document, &page_text);
        if signals.is_category_page(self.min_category_links) {
            info!(
                site = %page.source_site,
                links = signals.property_links,
                "🗂️  Skipping category page {}",
                page.url
            );
            return PageExtraction::skipped(SkipReason::CategoryPage(signals));
        }

        let Ok(page_url) = Url::parse(&page.url).or_else(|_| Url::parse(&page.requested_url)) else {
            return PageExtraction::skipped(SkipReason::InvalidUrl);
        };

        let json_ld = structured::json_ld_listings(document);
        if site.parser == ParserKind::JsonLd && !json_ld.is_empty() {
            return self.from_structured(&json_ld, page, &page_url);
        }

        let selectors = CompiledSelectors::compile(&site.selectors);
        let Some((cards, source)) = cards::locate_cards(document, selectors.card.as_ref(), &page_text) else {
            debug!(site = %page.source_site, "No cards on {}", page.url);
            return PageExtraction::default();
        };

        let mut extraction = PageExtraction {
            cards_found: cards.len(),
            ..Default::default()
        };

        for card in cards {
            let microdata = structured::from_microdata(card);
            // A detail page's JSON-LD describes the page's one listing.
            let structured = microdata
                .as_ref()
                .or_else(|| (source == CardSource::SinglePage).then(|| json_ld.first()).flatten());

            let ctx = CardContext {
                card,
                text: text::element_text(&card),
                selectors: &selectors,
                structured,
                page_url: &page_url,
            };
            let listing = build_listing(&ctx, page, source);
            if listing.usable_fields() == 0 {
                extraction.cards_dropped += 1;
                continue;
            }
            extraction.listings.push(listing);
        }

        if extraction.cards_dropped > 0 {
            debug!(
                site = %page.source_site,
                "Dropped {} empty cards on {}",
                extraction.cards_dropped,
                page.url
            );
        }
        extraction
    }

    fn from_structured(&self, items: &[StructuredListing], page: &RawPage, page_url: &Url) -> PageExtraction {
        let mut extraction = PageExtraction {
            cards_found: items.len(),
            ..Default::default()
        };

        for item in items {
            let title = item.title.clone();
            let listing = RawListing {
                source_site: page.source_site.clone(),
                page_url: page.url.clone(),
                listing_url: item.url.as_deref().and_then(|href| fields::resolve_url(page_url, href)),
                location_text: item
                    .location
                    .clone()
                    .or_else(|| title.as_deref().and_then(patterns::location_from_title)),
                title,
                price_text: item.price.clone(),
                bedrooms_text: item.bedrooms.clone(),
                bathrooms_text: item.bathrooms.clone(),
                property_type_text: item.property_type.clone(),
                description: item.description.clone(),
                image_urls: item
                    .images
                    .iter()
                    .filter_map(|src| fields::resolve_url(page_url, src))
                    .collect(),
                extracted_at: Utc::now(),
            };
            if listing.usable_fields() == 0 {
                extraction.cards_dropped += 1;
            } else {
                extraction.listings.push(listing);
            }
        }
        extraction
    }
}

fn build_listing(ctx: &CardContext<'_>, page: &RawPage, source: CardSource) -> RawListing {
    let get = |field| fields::extract_field(ctx, field);

    let title = get(Field::Title);
    let location_text = get(Field::Location).or_else(|| title.as_deref().and_then(patterns::location_from_title));
    let listing_url = get(Field::Link)
        .and_then(|href| fields::resolve_url(ctx.page_url, &href))
        .or_else(|| (source == CardSource::SinglePage).then(|| page.url.clone()));

    RawListing {
        source_site: page.source_site.clone(),
        page_url: page.url.clone(),
        listing_url,
        title,
        price_text: get(Field::Price),
        location_text,
        bedrooms_text: get(Field::Bedrooms),
        bathrooms_text: get(Field::Bathrooms),
        property_type_text: get(Field::PropertyType),
        description: get(Field::Description),
        image_urls: fields::collect_images(ctx),
        extracted_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(html: &str) -> RawPage {
        RawPage::from_html("test", "https://example.com/for-sale", html)
    }

    #[test]
    fn test_listing_grid() {
        let html = r#"<html><body><div class="results">
            <div class="listing"><a href="/p/1"><h3>2 Bedroom Flat in Yaba</h3></a><span>₦1,800,000 / year</span><span>2 baths</span></div>
            <div class="listing"><a href="/p/2"><h3>4 Bedroom Duplex, Lekki</h3></a><span>₦120,000,000</span></div>
            <div class="listing"><a href="/p/3"><h3>Plot of land, Ibeju-Lekki</h3></a><span>₦9,500,000</span></div>
        </div></body></html>"#;
        let extraction = ExtractionEngine::new().extract(&page(html), &SiteConfig::new("test", "https://example.com/"));

        assert_eq!(extraction.cards_found, 3);
        assert_eq!(extraction.listings.len(), 3);
        let first = &extraction.listings[0];
        assert_eq!(first.title.as_deref(), Some("2 Bedroom Flat in Yaba"));
        assert_eq!(first.price_text.as_deref(), Some("₦1,800,000 / year"));
        assert_eq!(first.location_text.as_deref(), Some("Yaba"));
        assert_eq!(first.bathrooms_text.as_deref(), Some("2 baths"));
        assert_eq!(first.listing_url.as_deref(), Some("https://example.com/p/1"));
        assert_eq!(extraction.listings[1].location_text.as_deref(), Some("Lekki"));
    }

    #[test]
    fn test_category_page_yields_nothing() {
        let links: String = (0..15)
            .map(|i| format!(r#"<a href="/property-for-sale/area-{i}">Area {i}</a>"#))
            .collect();
        let extraction = ExtractionEngine::new().extract(
            &page(&format!("<html><body>{links}</body></html>")),
            &SiteConfig::new("test", "https://example.com/"),
        );
        assert!(extraction.listings.is_empty());
        assert!(extraction.is_category_page());
    }

    #[test]
    fn test_json_ld_parser() {
        let html = r#"<html><head><script type="application/ld+json">
            [{"@type":"Offer","name":"3 Bedroom Terrace, Ajah","price":"65000000","priceCurrency":"NGN","url":"/t/1"}]
            </script></head><body><p>Welcome</p></body></html>"#;
        let mut site = SiteConfig::new("test", "https://example.com/");
        site.parser = ParserKind::JsonLd;

        let extraction = ExtractionEngine::new().extract(&page(html), &site);
        assert_eq!(extraction.listings.len(), 1);
        let listing = &extraction.listings[0];
        assert_eq!(listing.price_text.as_deref(), Some("NGN 65000000"));
        assert_eq!(listing.location_text.as_deref(), Some("Ajah"));
        assert_eq!(listing.listing_url.as_deref(), Some("https://example.com/t/1"));
    }

    #[test]
    fn test_detail_page_uses_page_url() {
        let html = r#"<html><body><main><h1>5 Bedroom Detached Duplex</h1>
            <div class="price">₦350,000,000</div><p>Located in Banana Island.</p></main></body></html>"#;
        let extraction = ExtractionEngine::new().extract(&page(html), &SiteConfig::new("test", "https://example.com/"));
        assert_eq!(extraction.listings.len(), 1);
        assert_eq!(
            extraction.listings[0].listing_url.as_deref(),
            Some("https://example.com/for-sale")
        );
    }

    #[test]
    fn test_empty_document() {
        let extraction = ExtractionEngine::new().extract(&page(""), &SiteConfig::new("test", "https://example.com/"));
        assert_eq!(extraction.skipped, Some(SkipReason::EmptyDocument));
    }
}
