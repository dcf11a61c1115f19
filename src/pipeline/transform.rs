//! Enterprise schema transformer.
//!
//! Maps a flat [`NormalizedListing`] into a nested document and infers a
//! listing type, a category and tags. Keyword inference is driven by the
//! tables below; threshold tags by [`TransformConfig`].
//!
//! | inference      | evidence                                               |
//! |----------------|--------------------------------------------------------|
//! | `listing_type` | [`LISTING_TYPE_RULES`] phrases, plus the price period  |
//! | `category`     | property type first, else [`CATEGORY_RULES`] phrases   |
//! | phrase tags    | [`TAG_RULES`]                                          |
//! | `premium`      | sale price >= `premium_price`, or bedrooms >= `premium_bedrooms` |
//! | `hot_deal`     | sale, price per bedroom <= `hot_deal_price_per_bedroom`, quality >= `hot_deal_min_quality` |
//! | `family_sized` | bedrooms >= `family_min_bedrooms`                      |
//!
//! Conflicting keyword evidence resolves to `unknown`. Short-let evidence
//! outranks plain rent evidence, since short-let ads also say "rent".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::text::contains_phrase;
use crate::models::{Coordinates, NormalizedListing, PricePeriod, PropertyType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub premium_price: f64,
    pub premium_bedrooms: u8,
    pub hot_deal_price_per_bedroom: f64,
    pub hot_deal_min_quality: u8,
    pub family_min_bedrooms: u8,
    /// Price thresholds only apply to listings priced in this currency.
    pub threshold_currency: String,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            premium_price: 150_000_000.0,
            premium_bedrooms: 5,
            hot_deal_price_per_bedroom: 5_000_000.0,
            hot_deal_min_quality: 60,
            family_min_bedrooms: 4,
            threshold_currency: "NGN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingType {
    Sale,
    Rent,
    ShortLet,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Residential,
    Commercial,
    Land,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Premium,
    HotDeal,
    FamilySized,
    Serviced,
    NewBuild,
    Furnished,
    HasCoordinates,
}

pub const LISTING_TYPE_RULES: &[(ListingType, &[&str])] = &[
    (ListingType::ShortLet, &["short let", "shortlet", "short-let", "per night", "nightly"]),
    (ListingType::Rent, &["for rent", "to let", "to-let", "rent", "rental", "lease", "per annum", "yearly"]),
    (ListingType::Sale, &["for sale", "sale", "selling", "outright", "buy"]),
];

pub const CATEGORY_RULES: &[(Category, &[&str])] = &[
    (Category::Land, &["land", "plot", "plots", "acre", "acres", "hectare", "sqm of land"]),
    (
        Category::Commercial,
        &["office", "office space", "shop", "warehouse", "plaza", "commercial", "hotel", "event centre", "filling station"],
    ),
    (
        Category::Residential,
        &["flat", "apartment", "duplex", "bungalow", "terrace", "bedroom", "bedrooms", "house", "mansion", "penthouse", "self contain"],
    ),
];

pub const TAG_RULES: &[(Tag, &[&str])] = &[
    (Tag::Serviced, &["serviced"]),
    (Tag::NewBuild, &["newly built", "new build", "brand new", "off plan", "off-plan", "newly completed"]),
    (Tag::Furnished, &["furnished", "fully furnished"]),
];

/// Source block of an [`EnterpriseDocument`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub site: String,
    pub listing_url: Option<String>,
    pub scraped_at: DateTime<Utc>,
    pub is_duplicate_of: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    pub title: Option<String>,
    pub listing_type: ListingType,
    pub category: Category,
    pub property_type: Option<PropertyType>,
    pub bedrooms: Option<u8>,
    pub bathrooms: Option<u8>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub period: Option<PricePeriod>,
    pub price_per_bedroom: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub text: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub images: Vec<String>,
    pub image_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityInfo {
    pub score: u8,
}

/// Nested document handed to the persistence layer, keyed by `content_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnterpriseDocument {
    pub id: String,
    pub content_hash: String,
    pub source: SourceInfo,
    pub property: PropertyInfo,
    pub pricing: Pricing,
    pub location: LocationInfo,
    pub media: Media,
    pub quality: QualityInfo,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaTransformer {
    config: TransformConfig,
}

impl SchemaTransformer {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    pub fn transform(&self, listing: &NormalizedListing) -> EnterpriseDocument {
        let text = keyword_text(listing);
        let listing_type = classify_listing_type(&text, listing.price_period);
        let category = classify_category(&text, listing.property_type);
        let tags = self.tags(listing, &text, listing_type);

        EnterpriseDocument {
            id: listing.id.clone(),
            content_hash: listing.content_hash.clone(),
            source: SourceInfo {
                site: listing.source_site.clone(),
                listing_url: listing.listing_url.clone(),
                scraped_at: listing.scrape_timestamp,
                is_duplicate_of: listing.is_duplicate_of.clone(),
            },
            property: PropertyInfo {
                title: listing.title.clone(),
                listing_type,
                category,
                property_type: listing.property_type,
                bedrooms: listing.bedrooms,
                bathrooms: listing.bathrooms,
                description: listing.description.clone(),
            },
            pricing: Pricing {
                amount: listing.price,
                currency: listing.currency.clone(),
                period: listing.price_period,
                price_per_bedroom: listing.price_per_bedroom(),
            },
            location: LocationInfo {
                text: listing.location.text.clone(),
                coordinates: listing.location.coordinates,
            },
            media: Media {
                images: listing.images.clone(),
                image_count: listing.images.len(),
            },
            quality: QualityInfo {
                score: listing.quality_score,
            },
            tags,
        }
    }

    fn tags(&self, listing: &NormalizedListing, text: &str, listing_type: ListingType) -> Vec<Tag> {
        let c = &self.config;
        let mut tags = matching(TAG_RULES, text);

        let in_threshold_currency = listing.currency.as_deref() == Some(c.threshold_currency.as_str());
        let is_sale = listing_type == ListingType::Sale;
        let beds = listing.bedrooms.unwrap_or(0);

        let premium_price = is_sale && in_threshold_currency && listing.price.is_some_and(|p| p >= c.premium_price);
        if premium_price || beds >= c.premium_bedrooms {
            tags.push(Tag::Premium);
        }

        let cheap_per_bedroom = listing
            .price_per_bedroom()
            .is_some_and(|ppb| ppb <= c.hot_deal_price_per_bedroom);
        if is_sale && in_threshold_currency && cheap_per_bedroom && listing.quality_score >= c.hot_deal_min_quality {
            tags.push(Tag::HotDeal);
        }

        if beds >= c.family_min_bedrooms {
            tags.push(Tag::FamilySized);
        }
        if listing.location.coordinates.is_some() {
            tags.push(Tag::HasCoordinates);
        }

        tags.sort();
        tags.dedup();
        tags
    }
}

/// Lowercased title and description, the text keyword rules look at.
fn keyword_text(listing: &NormalizedListing) -> String {
    let mut text = listing.title.as_deref().unwrap_or("").to_lowercase();
    if let Some(description) = &listing.description {
        text.push_str(" \n ");
        text.push_str(&description.to_lowercase());
    }
    text
}

fn matching<T: Copy>(rules: &[(T, &[&str])], text: &str) -> Vec<T> {
    rules
        .iter()
        .filter(|(_, phrases)| phrases.iter().any(|p| contains_phrase(text, p)))
        .map(|(value, _)| *value)
        .collect()
}

pub fn classify_listing_type(text: &str, period: Option<PricePeriod>) -> ListingType {
    let mut found = matching(LISTING_TYPE_RULES, text);
    match period {
        Some(PricePeriod::Day) => found.push(ListingType::ShortLet),
        Some(_) => found.push(ListingType::Rent),
        None => {}
    }

    let sale = found.contains(&ListingType::Sale);
    let short_let = found.contains(&ListingType::ShortLet);
    let rent = found.contains(&ListingType::Rent);
    match (sale, rent || short_let) {
        (true, true) => ListingType::Unknown,
        (true, false) => ListingType::Sale,
        (false, true) if short_let => ListingType::ShortLet,
        (false, true) => ListingType::Rent,
        (false, false) => ListingType::Unknown,
    }
}

pub fn classify_category(text: &str, property_type: Option<PropertyType>) -> Category {
    match property_type {
        Some(PropertyType::Land) => return Category::Land,
        Some(PropertyType::Commercial) => return Category::Commercial,
        Some(_) => return Category::Residential,
        None => {}
    }
    match matching(CATEGORY_RULES, text).as_slice() {
        [only] => *only,
        _ => Category::Unknown,
    }
}
