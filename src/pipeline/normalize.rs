//! Normalizer: raw strings in, typed and bounded listing out.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::quality::QualityScorer;
use crate::config::AppConfig;
use crate::error::{ConfigError, Rejection};
use crate::extract::patterns::{self, AMOUNT_RE, BATHROOMS_RE, BEDROOMS_RE, PERIOD_RE, PRICE_RE};
use crate::extract::text::{clean_field, fold_words};
use crate::models::{Location, NormalizedListing, PricePeriod, RawListing};

/// Largest bedroom or bathroom count kept. Anything above is extraction noise.
pub const MAX_ROOMS: u8 = 10;

/// Plausibility bounds for numeric fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationBounds {
    /// Prices at or below this are mis-parses (a bedroom count read as a price, say).
    pub min_price: f64,
    pub max_price: f64,
    pub max_rooms: u8,
}

impl Default for ValidationBounds {
    fn default() -> Self {
        Self {
            min_price: 1_000.0,
            max_price: 100_000_000_000.0,
            max_rooms: MAX_ROOMS,
        }
    }
}

impl ValidationBounds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: &str| ConfigError::InvalidSetting {
            key,
            reason: reason.to_string(),
        };
        if !self.min_price.is_finite() || self.min_price <= 0.0 {
            return Err(invalid("validation.min_price", "must be a positive number"));
        }
        if !self.max_price.is_finite() || self.max_price <= self.min_price {
            return Err(invalid("validation.max_price", "must be greater than min_price"));
        }
        if self.max_rooms > MAX_ROOMS {
            return Err(invalid("validation.max_rooms", "must be 10 or less"));
        }
        Ok(())
    }

    pub fn price_ok(&self, price: f64) -> bool {
        price.is_finite() && price > self.min_price && price < self.max_price
    }
}

/// A price pulled out of free text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPrice {
    pub amount: f64,
    /// ISO code when the text carried a marker.
    pub currency: Option<String>,
    pub period: Option<PricePeriod>,
}

/// Outcome of parsing a bedroom or bathroom string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Count {
    Absent,
    Valid(u8),
    /// Present but implausible; the field is nulled.
    Invalid,
}

/// A normalized listing plus the fields that were nulled on the way.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub listing: NormalizedListing,
    pub nulled_fields: Vec<&'static str>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    bounds: ValidationBounds,
    scorer: QualityScorer,
}

impl Normalizer {
    pub fn new(bounds: ValidationBounds, scorer: QualityScorer) -> Self {
        Self { bounds, scorer }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let scorer = QualityScorer::new(config.quality.clone(), config.validation.clone());
        Self::new(config.validation.clone(), scorer)
    }

    pub fn scorer(&self) -> &QualityScorer {
        &self.scorer
    }

    /// Coerce, bound-check and fingerprint one raw listing.
    ///
    /// Only a listing with no title, no price and no location is rejected;
    /// any other bad field is nulled and reported in `nulled_fields`.
    pub fn normalize(&self, raw: &RawListing, default_currency: &str) -> Result<Normalized, Rejection> {
        let mut nulled = Vec::new();

        let title = raw.title.as_deref().and_then(clean_field).filter(|t| t.chars().any(char::is_alphabetic));

        let mut price = None;
        let mut currency = None;
        let mut price_period = None;
        if let Some(text) = raw.price_text.as_deref() {
            match parse_price(text) {
                Some(parsed) if self.bounds.price_ok(parsed.amount) => {
                    price = Some(parsed.amount);
                    currency = Some(parsed.currency.unwrap_or_else(|| default_currency.to_string()));
                    price_period = parsed.period;
                }
                Some(parsed) => {
                    debug!("Price {} out of bounds in {:?}", parsed.amount, text);
                    nulled.push("price");
                }
                None => nulled.push("price"),
            }
        }

        let location_text = raw
            .location_text
            .as_deref()
            .and_then(clean_field)
            .filter(|l| l.chars().any(char::is_alphabetic));

        if title.is_none() && price.is_none() && location_text.is_none() {
            warn!(
                site = %raw.source_site,
                url = raw.listing_url.as_deref().unwrap_or(&raw.page_url),
                "Rejected listing: {}",
                Rejection::NoCoreFields
            );
            return Err(Rejection::NoCoreFields);
        }

        let bedrooms = self.count_field(
            raw.bedrooms_text.as_deref(),
            title.as_deref().and_then(patterns::find_bedrooms),
            &BEDROOMS_RE,
            "bedrooms",
            &mut nulled,
        );
        let bathrooms = self.count_field(
            raw.bathrooms_text.as_deref(),
            None,
            &BATHROOMS_RE,
            "bathrooms",
            &mut nulled,
        );

        let property_type = raw
            .property_type_text
            .as_deref()
            .and_then(patterns::property_type_from_text)
            .or_else(|| title.as_deref().and_then(patterns::property_type_from_text));

        let content_hash = content_hash(title.as_deref(), price, location_text.as_deref());
        let id = listing_id(&raw.source_site, raw.listing_url.as_deref(), &content_hash);

        let mut listing = NormalizedListing {
            id,
            source_site: raw.source_site.clone(),
            listing_url: raw.listing_url.clone(),
            content_hash,
            title,
            price,
            currency,
            price_period,
            location: Location {
                text: location_text,
                coordinates: None,
            },
            property_type,
            bedrooms,
            bathrooms,
            description: raw.description.as_deref().and_then(clean_field),
            images: raw.image_urls.clone(),
            scrape_timestamp: raw.extracted_at,
            quality_score: 0,
            is_duplicate_of: None,
        };
        self.scorer.apply(&mut listing);

        Ok(Normalized {
            listing,
            nulled_fields: nulled,
        })
    }

    /// Parse `text`, or `fallback` when the field was not extracted at all.
    fn count_field(
        &self,
        text: Option<&str>,
        fallback: Option<String>,
        keyword: &Regex,
        name: &'static str,
        nulled: &mut Vec<&'static str>,
    ) -> Option<u8> {
        let max = self.bounds.max_rooms;
        let parsed = match text {
            Some(text) => parse_count_near(text, keyword, max),
            None => fallback.map_or(Count::Absent, |f| parse_count_near(&f, keyword, max)),
        };
        match parsed {
            Count::Valid(n) => Some(n),
            Count::Invalid => {
                nulled.push(name);
                None
            }
            Count::Absent => None,
        }
    }
}

fn currency_code(marker: &str) -> Option<&'static str> {
    match marker.to_uppercase().as_str() {
        "₦" | "N" | "NGN" => Some("NGN"),
        "$" | "USD" => Some("USD"),
        "£" | "GBP" => Some("GBP"),
        "€" | "EUR" => Some("EUR"),
        _ => None,
    }
}

fn magnitude(suffix: Option<&str>) -> f64 {
    match suffix.map(str::to_lowercase).as_deref() {
        Some("k") => 1e3,
        Some("m" | "mn" | "million") => 1e6,
        Some("b" | "bn" | "billion") => 1e9,
        _ => 1.0,
    }
}

/// Digits with thousands separators removed. A single dot followed by
/// exactly three digits is a separator unless a magnitude suffix follows.
fn parse_amount(amount: &str, has_magnitude: bool) -> Option<f64> {
    let compact: String = amount.chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
    let dots = compact.matches('.').count();
    let digits = if dots > 1 {
        compact.replace('.', "")
    } else if dots == 1 && !has_magnitude && compact.split('.').nth(1).is_some_and(|frac| frac.len() == 3) && !amount.contains(',') {
        compact.replace('.', "")
    } else {
        compact
    };
    digits.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_period(text: &str) -> Option<PricePeriod> {
    let caps = PERIOD_RE.captures(text)?;
    let word = caps
        .name("unit")
        .or_else(|| caps.name("adverb"))
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_else(|| "annum".to_string());
    match word.as_str() {
        "night" | "day" | "nightly" | "daily" => Some(PricePeriod::Day),
        "week" | "weekly" => Some(PricePeriod::Week),
        "month" | "mth" | "monthly" => Some(PricePeriod::Month),
        _ => Some(PricePeriod::Year),
    }
}

/// Parse a price string such as `₦25,000,000`, `N 2.5m per annum` or `USD 1,200/month`.
pub fn parse_price(text: &str) -> Option<ParsedPrice> {
    let (amount, currency, mag) = match PRICE_RE.captures(text) {
        Some(caps) => (
            caps.name("amount")?.as_str().to_string(),
            caps.name("cur").and_then(|c| currency_code(c.as_str())).map(str::to_string),
            caps.name("mag").map(|m| m.as_str().to_string()),
        ),
        None => {
            let caps = AMOUNT_RE.captures(text)?;
            (
                caps.name("amount")?.as_str().to_string(),
                None,
                caps.name("mag").map(|m| m.as_str().to_string()),
            )
        }
    };

    let value = parse_amount(&amount, mag.is_some())? * magnitude(mag.as_deref());
    (value > 0.0).then(|| ParsedPrice {
        amount: value,
        currency,
        period: parse_period(text),
    })
}

fn word_number(word: &str) -> Option<u8> {
    let n = match word {
        "zero" | "no" => 0,
        "one" | "single" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        _ => return None,
    };
    Some(n)
}

/// Parse a bedroom or bathroom count, bounded to `0..=max`.
///
/// The first number in the text decides. Digit runs longer than two are
/// never counts (phone numbers, prices).
pub fn parse_count(text: &str, max: u8) -> Count {
    let words = fold_words(text);
    if words.is_empty() {
        return Count::Absent;
    }
    if words.iter().any(|w| w == "studio") {
        return Count::Valid(0);
    }

    for word in &words {
        if word.chars().all(|c| c.is_ascii_digit()) {
            if word.len() > 2 {
                return Count::Invalid;
            }
            return match word.parse::<u8>() {
                Ok(n) if n <= max => Count::Valid(n),
                _ => Count::Invalid,
            };
        }
        // "3bed", "4br"
        let leading: String = word.chars().take_while(char::is_ascii_digit).collect();
        if !leading.is_empty() {
            return match leading.parse::<u8>() {
                Ok(n) if leading.len() <= 2 && n <= max => Count::Valid(n),
                _ => Count::Invalid,
            };
        }
        if let Some(n) = word_number(word) {
            return if n <= max { Count::Valid(n) } else { Count::Invalid };
        }
    }
    Count::Invalid
}

/// Like [`parse_count`], but a number attached to `keyword` beats any number
/// before it: "1,200 sqft 3 beds" has 3 bedrooms.
pub fn parse_count_near(text: &str, keyword: &Regex, max: u8) -> Count {
    match keyword.captures(text).and_then(|caps| caps.name("count")) {
        Some(count) => parse_count(count.as_str(), max),
        None => parse_count(text, max),
    }
}

/// Lowercased alphanumeric words joined by single spaces.
pub fn normalize_key(text: &str) -> String {
    fold_words(text).join(" ")
}

/// Fingerprint of title, price and location. Identical inputs always hash
/// the same; formatting noise (case, punctuation, spacing) is ignored.
pub fn content_hash(title: Option<&str>, price: Option<f64>, location: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_key(title.unwrap_or("")).as_bytes());
    hasher.update(b"|");
    if let Some(price) = price {
        hasher.update(format!("{price:.0}").as_bytes());
    }
    hasher.update(b"|");
    hasher.update(normalize_key(location.unwrap_or("")).as_bytes());
    hex::encode(hasher.finalize())
}

/// Stable listing id: site, URL and content together.
pub fn listing_id(site: &str, listing_url: Option<&str>, content_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(site.as_bytes());
    hasher.update(b"|");
    hasher.update(listing_url.unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(content_hash.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{site}-{}", &digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PropertyType;
    use crate::pipeline::QualityWeights;

    fn normalizer() -> Normalizer {
        let bounds = ValidationBounds::default();
        Normalizer::new(bounds.clone(), QualityScorer::new(QualityWeights::default(), bounds))
    }

    fn raw() -> RawListing {
        RawListing {
            source_site: "pp".to_string(),
            page_url: "https://example.com/list".to_string(),
            listing_url: Some("https://example.com/p/1".to_string()),
            title: Some("3 Bedroom Flat, Lekki Phase 1".to_string()),
            price_text: Some("₦25,000,000".to_string()),
            location_text: Some("Lekki Phase 1".to_string()),
            description: Some("Call 08012345678 for inspection".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_price_variants() {
        let p = parse_price("₦25,000,000").unwrap();
        assert_eq!(p.amount, 25_000_000.0);
        assert_eq!(p.currency.as_deref(), Some("NGN"));
        assert_eq!(p.period, None);

        let p = parse_price("N 2.5m per annum").unwrap();
        assert_eq!(p.amount, 2_500_000.0);
        assert_eq!(p.period, Some(PricePeriod::Year));

        let p = parse_price("USD 1,200 / month").unwrap();
        assert_eq!(p.amount, 1_200.0);
        assert_eq!(p.currency.as_deref(), Some("USD"));
        assert_eq!(p.period, Some(PricePeriod::Month));

        let p = parse_price("450k").unwrap();
        assert_eq!(p.amount, 450_000.0);
        assert_eq!(p.currency, None);

        assert_eq!(parse_price("1.500.000").unwrap().amount, 1_500_000.0);
        assert_eq!(parse_price("€ 1,250.50").unwrap().amount, 1_250.5);
        assert_eq!(parse_price("₦1.2 billion").unwrap().amount, 1_200_000_000.0);
        assert_eq!(parse_price("₦85,000 per night").unwrap().period, Some(PricePeriod::Day));
        assert!(parse_price("Price on request").is_none());
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("3 bed", 10), Count::Valid(3));
        assert_eq!(parse_count("3-bedroom", 10), Count::Valid(3));
        assert_eq!(parse_count("Three Bedroom", 10), Count::Valid(3));
        assert_eq!(parse_count("4br", 10), Count::Valid(4));
        assert_eq!(parse_count("Studio", 10), Count::Valid(0));
        assert_eq!(parse_count("12", 10), Count::Invalid);
        assert_eq!(parse_count("08012345678", 10), Count::Invalid);
        assert_eq!(parse_count("spacious", 10), Count::Invalid);
        assert_eq!(parse_count("  ", 10), Count::Absent);
    }

    #[test]
    fn test_count_prefers_keyword_number() {
        assert_eq!(parse_count("1,200 sqft 3 beds", 10), Count::Valid(1));
        assert_eq!(parse_count_near("1,200 sqft 3 beds", &BEDROOMS_RE, 10), Count::Valid(3));
        assert_eq!(parse_count_near("4 bed, 5 baths", &BATHROOMS_RE, 10), Count::Valid(5));
        assert_eq!(parse_count_near("4 bed, 5 baths", &BEDROOMS_RE, 10), Count::Valid(4));
        assert_eq!(parse_count_near("Studio", &BEDROOMS_RE, 10), Count::Valid(0));
        assert_eq!(parse_count_near("call 08012345678 baths", &BATHROOMS_RE, 10), Count::Invalid);
    }

    #[test]
    fn test_end_to_end_listing() {
        let normalized = normalizer().normalize(&raw(), "NGN").unwrap();
        let listing = normalized.listing;
        assert_eq!(listing.price, Some(25_000_000.0));
        assert_eq!(listing.currency.as_deref(), Some("NGN"));
        assert_eq!(listing.bedrooms, Some(3));
        assert_eq!(listing.bathrooms, None);
        assert_eq!(listing.property_type, Some(PropertyType::Flat));
        assert!(listing.quality_score > 0);
        assert!(normalized.nulled_fields.is_empty());
    }

    #[test]
    fn test_phone_number_count_is_nulled() {
        let mut raw = raw();
        raw.bathrooms_text = Some("08012345678".to_string());
        raw.bedrooms_text = Some("15 bedrooms".to_string());
        let normalized = normalizer().normalize(&raw, "NGN").unwrap();
        assert_eq!(normalized.listing.bathrooms, None);
        assert_eq!(normalized.listing.bedrooms, None);
        assert_eq!(normalized.nulled_fields, vec!["bedrooms", "bathrooms"]);
    }

    #[test]
    fn test_implausible_price_is_nulled_not_rejected() {
        let mut raw = raw();
        raw.price_text = Some("₦3".to_string());
        let normalized = normalizer().normalize(&raw, "NGN").unwrap();
        assert_eq!(normalized.listing.price, None);
        assert_eq!(normalized.listing.currency, None);
        assert_eq!(normalized.nulled_fields, vec!["price"]);
    }

    #[test]
    fn test_no_core_fields_rejected() {
        let raw = RawListing {
            source_site: "pp".to_string(),
            bedrooms_text: Some("3 bed".to_string()),
            image_urls: vec!["https://example.com/a.jpg".to_string()],
            ..Default::default()
        };
        assert_eq!(normalizer().normalize(&raw, "NGN").unwrap_err(), Rejection::NoCoreFields);
    }

    #[test]
    fn test_default_currency() {
        let mut raw = raw();
        raw.price_text = Some("25,000,000".to_string());
        let listing = normalizer().normalize(&raw, "GHS").unwrap().listing;
        assert_eq!(listing.currency.as_deref(), Some("GHS"));
    }

    #[test]
    fn test_content_hash_ignores_formatting() {
        let a = content_hash(Some("3 Bedroom Flat, Lekki"), Some(25e6), Some("Lekki Phase 1"));
        let b = content_hash(Some("3  bedroom flat lekki"), Some(25_000_000.0), Some("LEKKI phase 1"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash(Some("3 Bedroom Flat, Lekki"), Some(26e6), Some("Lekki Phase 1")));
    }

    #[test]
    fn test_listing_id_is_stable() {
        let id = listing_id("pp", Some("https://example.com/p/1"), "abc");
        assert_eq!(id, listing_id("pp", Some("https://example.com/p/1"), "abc"));
        assert!(id.starts_with("pp-"));
        assert_ne!(id, listing_id("other", Some("https://example.com/p/1"), "abc"));
    }

    #[test]
    fn test_bounds_validation() {
        assert!(ValidationBounds::default().validate().is_ok());
        let bad = ValidationBounds {
            max_rooms: 40,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
