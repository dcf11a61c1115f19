//! Schema.org markup: JSON-LD blocks and microdata.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use tracing::debug;

use super::text::{clean_field, element_text};
use super::Field;

static JSON_LD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());
static ITEMPROP: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[itemprop]").unwrap());

/// `@type` values that describe a single listing.
const LISTING_TYPES: &[&str] = &[
    "Offer",
    "AggregateOffer",
    "Product",
    "RealEstateListing",
    "Residence",
    "Accommodation",
    "Apartment",
    "House",
    "SingleFamilyResidence",
    "ApartmentComplex",
];

/// Listing fields found in structured markup, all optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredListing {
    pub title: Option<String>,
    /// Amount, prefixed with the currency code when one was given.
    pub price: Option<String>,
    pub location: Option<String>,
    pub bedrooms: Option<String>,
    pub bathrooms: Option<String>,
    pub property_type: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub images: Vec<String>,
}

impl StructuredListing {
    pub fn field(&self, field: Field) -> Option<String> {
        match field {
            Field::Title => self.title.clone(),
            Field::Price => self.price.clone(),
            Field::Location => self.location.clone(),
            Field::Bedrooms => self.bedrooms.clone(),
            Field::Bathrooms => self.bathrooms.clone(),
            Field::PropertyType => self.property_type.clone(),
            Field::Description => self.description.clone(),
            Field::Link => self.url.clone(),
        }
    }

    fn is_empty(&self) -> bool {
        self.title.is_none() && self.price.is_none() && self.location.is_none() && self.url.is_none()
    }

    /// Fill gaps in `self` from `other`.
    fn merge(&mut self, other: StructuredListing) {
        let fill = |slot: &mut Option<String>, value: Option<String>| {
            if slot.is_none() {
                *slot = value;
            }
        };
        fill(&mut self.title, other.title);
        fill(&mut self.price, other.price);
        fill(&mut self.location, other.location);
        fill(&mut self.bedrooms, other.bedrooms);
        fill(&mut self.bathrooms, other.bathrooms);
        fill(&mut self.property_type, other.property_type);
        fill(&mut self.description, other.description);
        fill(&mut self.url, other.url);
        for image in other.images {
            if !self.images.contains(&image) {
                self.images.push(image);
            }
        }
    }
}

/// All listing-like objects in the page's JSON-LD blocks, in document order.
pub fn json_ld_listings(document: &Html) -> Vec<StructuredListing> {
    let mut listings = Vec::new();
    for script in document.select(&JSON_LD) {
        let raw = script.text().collect::<String>();
        match serde_json::from_str::<Value>(raw.trim()) {
            Ok(value) => collect_listings(&value, &mut listings),
            Err(e) => debug!("Skipping unparseable JSON-LD block: {}", e),
        }
    }
    listings
}

fn collect_listings(value: &Value, out: &mut Vec<StructuredListing>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_listings(item, out)),
        Value::Object(map) => {
            if let Some(graph) = map.get("@graph") {
                collect_listings(graph, out);
            }
            if let Some(elements) = map.get("itemListElement") {
                collect_listings(elements, out);
            }
            // ListItem wrappers keep the listing under `item`.
            if has_type(value, &["ListItem"]) {
                if let Some(item) = map.get("item") {
                    collect_listings(item, out);
                }
                return;
            }
            if has_type(value, LISTING_TYPES) {
                let listing = listing_from_object(value);
                if !listing.is_empty() {
                    out.push(listing);
                }
            }
        }
        _ => {}
    }
}

fn has_type(value: &Value, wanted: &[&str]) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => wanted.contains(&t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| wanted.contains(&t)),
        _ => false,
    }
}

fn scalar(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => clean_field(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => scalar(map.get("value").or_else(|| map.get("name"))),
        Value::Array(items) => items.iter().find_map(|item| scalar(Some(item))),
        _ => None,
    }
}

fn images(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(url)) => vec![url.clone()],
        Some(Value::Array(items)) => items.iter().flat_map(|item| images(Some(item))).collect(),
        Some(Value::Object(map)) => images(map.get("url").or_else(|| map.get("contentUrl"))),
        _ => Vec::new(),
    }
}

fn address(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => clean_field(s),
        Value::Object(map) => {
            let parts: Vec<String> = ["streetAddress", "addressLocality", "addressRegion"]
                .iter()
                .filter_map(|key| scalar(map.get(*key)))
                .collect();
            if parts.is_empty() {
                scalar(map.get("name"))
            } else {
                Some(parts.join(", "))
            }
        }
        _ => None,
    }
}

fn offer_price(value: &Value) -> Option<String> {
    let offer = match value {
        Value::Array(offers) => offers.first()?,
        other => other,
    };
    let amount = scalar(offer.get("price").or_else(|| offer.get("lowPrice")))?;
    match scalar(offer.get("priceCurrency")) {
        Some(currency) => Some(format!("{currency} {amount}")),
        None => Some(amount),
    }
}

fn listing_from_object(value: &Value) -> StructuredListing {
    let mut listing = StructuredListing {
        title: scalar(value.get("name").or_else(|| value.get("headline"))),
        price: value.get("offers").and_then(offer_price).or_else(|| offer_price(value)),
        location: address(value.get("address"))
            .or_else(|| value.get("location").and_then(|l| address(l.get("address")).or_else(|| scalar(Some(l))))),
        bedrooms: scalar(
            value
                .get("numberOfBedrooms")
                .or_else(|| value.get("numberOfRooms")),
        ),
        bathrooms: scalar(
            value
                .get("numberOfBathroomsTotal")
                .or_else(|| value.get("numberOfFullBathrooms")),
        ),
        property_type: match value.get("@type") {
            Some(Value::String(t)) if matches!(t.as_str(), "Apartment" | "House" | "SingleFamilyResidence") => {
                Some(t.clone())
            }
            _ => None,
        },
        description: scalar(value.get("description")),
        url: scalar(value.get("url")),
        images: images(value.get("image")),
    };

    // Offers and listings often wrap the property itself.
    for key in ["itemOffered", "about", "mainEntity"] {
        if let Some(inner) = value.get(key).filter(|v| v.is_object()) {
            listing.merge(listing_from_object(inner));
        }
    }
    listing
}

/// Microdata (`itemprop`) inside one card.
pub fn from_microdata(card: ElementRef) -> Option<StructuredListing> {
    let mut listing = StructuredListing::default();
    let mut currency = None;
    let mut found = false;

    for el in card.select(&ITEMPROP) {
        let Some(prop) = el.value().attr("itemprop") else {
            continue;
        };
        let value = || {
            el.value()
                .attr("content")
                .and_then(clean_field)
                .or_else(|| clean_field(&element_text(&el)))
        };
        found = true;
        match prop {
            "name" | "headline" if listing.title.is_none() => listing.title = value(),
            "price" | "lowPrice" if listing.price.is_none() => listing.price = value(),
            "priceCurrency" => currency = value(),
            "address" | "streetAddress" if listing.location.is_none() => listing.location = value(),
            "numberOfBedrooms" | "numberOfRooms" if listing.bedrooms.is_none() => listing.bedrooms = value(),
            "numberOfBathroomsTotal" if listing.bathrooms.is_none() => listing.bathrooms = value(),
            "description" if listing.description.is_none() => listing.description = value(),
            "url" if listing.url.is_none() => {
                listing.url = el.value().attr("href").or_else(|| el.value().attr("content")).map(str::to_string)
            }
            "image" => {
                if let Some(src) = el
                    .value()
                    .attr("src")
                    .or_else(|| el.value().attr("content"))
                    .or_else(|| el.value().attr("href"))
                {
                    listing.images.push(src.to_string());
                }
            }
            _ => {}
        }
    }

    if let (Some(currency), Some(price)) = (currency, listing.price.as_mut()) {
        if !price.chars().any(|c| !c.is_ascii_digit() && !matches!(c, ',' | '.' | ' ')) {
            *price = format!("{currency} {price}");
        }
    }

    (found && !listing.is_empty()).then_some(listing)
}
