//! Per-field fallback chain.
//!
//! Each rule is a plain function returning `Some(value)` or `None`. Rules
//! are tried in [`FIELD_RULES`] order and the first hit wins.

use std::sync::LazyLock;

use scraper::{ElementRef, Selector};
use url::Url;

use super::patterns;
use super::structured::StructuredListing;
use super::text::{clean_field, element_text};
use super::{CompiledSelectors, Field};

static TITLE_HINTS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"h1, h2, h3, h4, [class*="title"], [itemprop="name"]"#).unwrap()
});
static LOCATION_HINTS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[class*="location"], [class*="address"], address, [class*="area"]"#).unwrap()
});
static DESCRIPTION_HINTS: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[class*="desc"], [class*="summary"], [class*="excerpt"]"#).unwrap()
});
static PARAGRAPHS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static IMAGES: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img, source").unwrap());

const MIN_DESCRIPTION_LEN: usize = 40;

/// Image URLs containing these are page furniture, not photos.
const IMAGE_NOISE: &[&str] = &["logo", "icon", "sprite", "placeholder", "avatar", "blank.gif", "spinner"];

/// Everything a rule may look at for one card.
pub struct CardContext<'a> {
    pub card: ElementRef<'a>,
    /// Visible text of the card.
    pub text: String,
    pub selectors: &'a CompiledSelectors,
    pub structured: Option<&'a StructuredListing>,
    pub page_url: &'a Url,
}

pub type FieldRule = for<'a, 'b> fn(&'b CardContext<'a>, Field) -> Option<String>;

/// Fallback order: site selector, structured markup, text patterns.
pub const FIELD_RULES: &[(&str, FieldRule)] = &[
    ("selector", from_selector),
    ("structured", from_structured),
    ("pattern", from_pattern),
];

pub fn extract_field(ctx: &CardContext<'_>, field: Field) -> Option<String> {
    FIELD_RULES.iter().find_map(|(_, rule)| rule(ctx, field))
}

fn from_selector(ctx: &CardContext<'_>, field: Field) -> Option<String> {
    let selector = ctx.selectors.field(field)?;
    let el = ctx.card.select(selector).next()?;
    match field {
        Field::Link => href_of(&el),
        _ => clean_field(&element_text(&el)).or_else(|| el.value().attr("content").and_then(clean_field)),
    }
}

fn from_structured(ctx: &CardContext<'_>, field: Field) -> Option<String> {
    ctx.structured.and_then(|s| s.field(field))
}

fn from_pattern(ctx: &CardContext<'_>, field: Field) -> Option<String> {
    match field {
        Field::Title => ctx
            .card
            .select(&TITLE_HINTS)
            .filter_map(|el| clean_field(&element_text(&el)))
            .find(|title| title.chars().count() >= 3)
            .or_else(|| {
                ctx.card
                    .select(&ANCHORS)
                    .find_map(|a| a.value().attr("title").and_then(clean_field))
            }),
        Field::Price => patterns::find_price(&ctx.text),
        Field::Location => ctx
            .card
            .select(&LOCATION_HINTS)
            .filter_map(|el| clean_field(&element_text(&el)))
            .find(|loc| !patterns::has_price_token(loc))
            .or_else(|| patterns::find_labeled_location(&ctx.text)),
        Field::Bedrooms => patterns::find_bedrooms(&ctx.text),
        Field::Bathrooms => patterns::find_bathrooms(&ctx.text),
        // Inferred from the title later on.
        Field::PropertyType => None,
        Field::Description => ctx
            .card
            .select(&DESCRIPTION_HINTS)
            .filter_map(|el| clean_field(&element_text(&el)))
            .next()
            .or_else(|| {
                ctx.card
                    .select(&PARAGRAPHS)
                    .filter_map(|p| clean_field(&element_text(&p)))
                    .filter(|p| p.len() >= MIN_DESCRIPTION_LEN)
                    .max_by_key(|p| p.len())
            }),
        Field::Link => href_of(&ctx.card),
    }
}

/// The element's own href, else its first usable descendant link.
fn href_of(el: &ElementRef) -> Option<String> {
    let usable = |href: &str| {
        let href = href.trim();
        let lower = href.to_lowercase();
        let ok = !href.is_empty()
            && !href.starts_with('#')
            && !["javascript:", "mailto:", "tel:"].iter().any(|p| lower.starts_with(p));
        ok.then(|| href.to_string())
    };
    el.value()
        .attr("href")
        .and_then(usable)
        .or_else(|| el.select(&ANCHORS).find_map(|a| a.value().attr("href").and_then(usable)))
}

/// Resolve `href` against the page URL, keeping only http(s) results.
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let url = base.join(href.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Photos for a card: site selector, structured markup, then any image in the card.
pub fn collect_images(ctx: &CardContext<'_>) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();

    if let Some(selector) = &ctx.selectors.images {
        for el in ctx.card.select(selector) {
            candidates.extend(image_source(&el));
            // Selector may point at a wrapper rather than the <img> itself.
            for img in el.select(&IMAGES) {
                candidates.extend(image_source(&img));
            }
        }
    }
    if let Some(structured) = ctx.structured {
        candidates.extend(structured.images.iter().cloned());
    }
    for img in ctx.card.select(&IMAGES) {
        candidates.extend(image_source(&img));
    }

    let mut images: Vec<String> = Vec::new();
    for candidate in candidates {
        let lower = candidate.to_lowercase();
        if lower.starts_with("data:") || IMAGE_NOISE.iter().any(|noise| lower.contains(noise)) {
            continue;
        }
        if let Some(url) = resolve_url(ctx.page_url, &candidate) {
            if !images.contains(&url) {
                images.push(url);
            }
        }
    }
    images
}

fn image_source(el: &ElementRef) -> Option<String> {
    let value = el.value();
    ["data-src", "data-lazy-src", "data-original", "src"]
        .iter()
        .filter_map(|attr| value.attr(attr))
        .map(str::trim)
        .find(|src| !src.is_empty() && !src.starts_with("data:"))
        .or_else(|| {
            value
                .attr("srcset")
                .and_then(|set| set.split(',').next())
                .and_then(|first| first.split_whitespace().next())
        })
        .map(str::to_string)
}
