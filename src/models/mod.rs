mod export;
mod manifest;

pub use export::{write_rows, FLAT_HEADERS};
pub use manifest::{ErrorCounts, RunManifest, RunTotals, SiteReport};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::QualityScorer;
use crate::scrapers::BackendKind;

/// Unparsed content of one fetched URL. Discarded after extraction.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub source_site: String,
    /// URL the crawler asked for.
    pub requested_url: String,
    /// URL after redirects; relative links resolve against this.
    pub url: String,
    pub backend: BackendKind,
    pub status: Option<u16>,
    pub fetched_at: DateTime<Utc>,
    /// 1-based position within the site's crawl.
    pub page_number: u32,
    pub content: String,
}

impl RawPage {
    /// Page built from HTML already in hand, e.g. a saved file.
    pub fn from_html(source_site: &str, url: &str, content: impl Into<String>) -> Self {
        Self {
            source_site: source_site.to_string(),
            requested_url: url.to_string(),
            url: url.to_string(),
            backend: BackendKind::Http,
            status: None,
            fetched_at: Utc::now(),
            page_number: 1,
            content: content.into(),
        }
    }
}

/// Field strings pulled from one listing card, all optional.
///
/// Created once per card and never mutated; the normalizer consumes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub source_site: String,
    pub page_url: String,
    pub listing_url: Option<String>,
    pub title: Option<String>,
    pub price_text: Option<String>,
    pub location_text: Option<String>,
    pub bedrooms_text: Option<String>,
    pub bathrooms_text: Option<String>,
    pub property_type_text: Option<String>,
    pub description: Option<String>,
    pub image_urls: Vec<String>,
    pub extracted_at: DateTime<Utc>,
}

impl RawListing {
    /// Number of content fields present. The URL alone does not count.
    pub fn usable_fields(&self) -> usize {
        [
            &self.title,
            &self.price_text,
            &self.location_text,
            &self.bedrooms_text,
            &self.bathrooms_text,
            &self.description,
        ]
        .iter()
        .filter(|field| field.is_some())
        .count()
            + usize::from(!self.image_urls.is_empty())
    }
}

/// Resolved coordinates for a location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Location information for a listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub text: Option<String>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    Flat,
    SelfContain,
    Duplex,
    Terrace,
    Bungalow,
    Detached,
    SemiDetached,
    Maisonette,
    Penthouse,
    Mansion,
    House,
    Land,
    Commercial,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::SelfContain => "self_contain",
            Self::Duplex => "duplex",
            Self::Terrace => "terrace",
            Self::Bungalow => "bungalow",
            Self::Detached => "detached",
            Self::SemiDetached => "semi_detached",
            Self::Maisonette => "maisonette",
            Self::Penthouse => "penthouse",
            Self::Mansion => "mansion",
            Self::House => "house",
            Self::Land => "land",
            Self::Commercial => "commercial",
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing period attached to rental prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricePeriod {
    Day,
    Week,
    Month,
    Year,
}

impl PricePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }
}

/// Canonical listing record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedListing {
    /// Unique per (site, listing); target of `is_duplicate_of`.
    pub id: String,
    pub source_site: String,
    pub listing_url: Option<String>,
    /// Fingerprint of title + price + location.
    pub content_hash: String,
    pub title: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub price_period: Option<PricePeriod>,
    pub location: Location,
    pub property_type: Option<PropertyType>,
    pub bedrooms: Option<u8>,
    pub bathrooms: Option<u8>,
    pub description: Option<String>,
    pub images: Vec<String>,
    pub scrape_timestamp: DateTime<Utc>,
    pub quality_score: u8,
    pub is_duplicate_of: Option<String>,
}

impl NormalizedListing {
    pub fn is_duplicate(&self) -> bool {
        self.is_duplicate_of.is_some()
    }

    /// Set resolved coordinates and rescore, since coordinates are scored.
    pub fn set_coordinates(&mut self, coordinates: Option<Coordinates>, scorer: &QualityScorer) {
        self.location.coordinates = coordinates;
        self.quality_score = scorer.score(self);
    }

    pub fn mark_duplicate_of(&mut self, canonical_id: &str) {
        self.is_duplicate_of = Some(canonical_id.to_string());
    }

    pub fn clear_duplicate(&mut self) {
        self.is_duplicate_of = None;
    }

    /// Price per bedroom, when both are known and bedrooms is non-zero.
    pub fn price_per_bedroom(&self) -> Option<f64> {
        match (self.price, self.bedrooms) {
            (Some(price), Some(beds)) if beds > 0 => Some(price / f64::from(beds)),
            _ => None,
        }
    }
}
