//! Locating listing cards on a page.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use super::patterns::has_price_token;
use super::text::element_text;

static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static MAIN_CONTENT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"main, [role="main"], article"#).unwrap());
static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());

/// Siblings needed before a repeated block counts as a card group.
const MIN_GROUP: usize = 2;

const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "head", "option", "br", "svg"];

/// How the cards of a page were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardSource {
    /// The site's `card` selector matched.
    Configured,
    /// Repeated sibling blocks with a link and a price.
    Repeated,
    /// No repeated blocks; the page is one listing.
    SinglePage,
}

/// Cards in document order, or `None` when nothing on the page looks like a listing.
pub fn locate_cards<'a>(
    document: &'a Html,
    configured: Option<&Selector>,
    page_text: &str,
) -> Option<(Vec<ElementRef<'a>>, CardSource)> {
    if let Some(selector) = configured {
        let cards: Vec<_> = document.select(selector).collect();
        if !cards.is_empty() {
            return Some((cards, CardSource::Configured));
        }
    }

    let repeated = repeated_group(document);
    if !repeated.is_empty() {
        return Some((repeated, CardSource::Repeated));
    }

    if has_price_token(page_text) {
        let single = document
            .select(&MAIN_CONTENT)
            .find(|el| has_price_token(&element_text(el)))
            .or_else(|| document.select(&BODY).next())
            .unwrap_or_else(|| document.root_element());
        return Some((vec![single], CardSource::SinglePage));
    }

    None
}

/// Tag name plus first class: close enough to spot repeated cards even
/// when some carry extra modifier classes.
fn card_key(el: &ElementRef) -> (String, String) {
    let value = el.value();
    let first_class = value.classes().next().unwrap_or("").to_string();
    (value.name().to_string(), first_class)
}

/// The largest family of same-shaped sibling blocks that each carry a link
/// and a price. Families with the same key under different parents add up.
///
/// Link presence is worked out bottom-up in one pass, and card text is only
/// rendered for siblings that already repeat a shape.
fn repeated_group(document: &Html) -> Vec<ElementRef<'_>> {
    let elements: Vec<ElementRef<'_>> = document.root_element().descendants().filter_map(ElementRef::wrap).collect();
    let mut linked: HashSet<_> = document.select(&ANCHORS).map(|a| a.id()).collect();
    // Reverse document order visits children before their parents.
    for el in elements.iter().rev() {
        if el.children().any(|child| linked.contains(&child.id())) {
            linked.insert(el.id());
        }
    }

    let mut families: Vec<((String, String), Vec<ElementRef<'_>>)> = Vec::new();

    for parent in &elements {
        if SKIPPED_TAGS.contains(&parent.value().name()) {
            continue;
        }

        let mut local: Vec<((String, String), Vec<ElementRef<'_>>)> = Vec::new();
        for child in parent.children().filter_map(ElementRef::wrap) {
            if SKIPPED_TAGS.contains(&child.value().name()) || !linked.contains(&child.id()) {
                continue;
            }
            let key = card_key(&child);
            match local.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(child),
                None => local.push((key, vec![child])),
            }
        }

        for (key, members) in local {
            if members.len() < MIN_GROUP {
                continue;
            }
            let priced: Vec<_> = members
                .into_iter()
                .filter(|el| has_price_token(&element_text(el)))
                .collect();
            if priced.len() < MIN_GROUP {
                continue;
            }
            match families.iter_mut().find(|(k, _)| *k == key) {
                Some((_, all)) => all.extend(priced),
                None => families.push((key, priced)),
            }
        }
    }

    // Largest family wins; ties go to the one seen first.
    let mut best: Option<Vec<ElementRef<'_>>> = None;
    for (_, members) in families {
        if best.as_ref().map_or(true, |b| members.len() > b.len()) {
            best = Some(members);
        }
    }
    best.unwrap_or_default()
}
