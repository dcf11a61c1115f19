//! Text patterns: the last fallback for each field.
//!
//! Counts are limited to one or two digits so long digit runs such as
//! phone numbers never look like a bedroom or bathroom count.

use std::sync::LazyLock;

use regex::Regex;

use super::text::contains_phrase;
use crate::models::PropertyType;

/// Currency marker, amount, optional magnitude suffix. Thousands groups are
/// split by commas or dots only: card text joins nodes with spaces, so a
/// space-separated group would swallow whatever number comes next.
pub static PRICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<cur>₦|\bN(?:GN)?|\$|£|€|\b(?i:ngn|usd|gbp|eur))\s?(?P<amount>\d{1,3}(?:[,.]\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)(?:\s*(?P<mag>(?i:million|billion|mn|bn|k|m|b)))?\b",
    )
    .unwrap()
});

/// A bare amount with no currency marker, for text already known to be a price.
pub static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<amount>\d{1,3}(?:[,.]\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?)(?:\s*(?P<mag>(?i:million|billion|mn|bn|k|m|b)))?\b",
    )
    .unwrap()
});

pub static PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:/\s*|\bper\s+|\ba\s+)(?P<unit>night|day|week|month|mth|annum|year|yr)\b|\b(?P<adverb>nightly|daily|weekly|monthly|yearly|annually)\b|\bp\.a\b",
    )
    .unwrap()
});

const COUNT: &str = r"(?P<count>\d{1,2}|one|two|three|four|five|six|seven|eight|nine|ten)";

pub static BEDROOMS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b{COUNT}\s*-?\s*(?:bed(?:room)?s?|bdrms?|bds?|br)\b")).unwrap()
});

pub static BATHROOMS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b{COUNT}\s*-?\s*(?:bath(?:room)?s?|baths|toilets?)\b")).unwrap()
});

static STUDIO_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bstudio\b").unwrap());

static LOCATION_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:location|address|area)\s*:\s*(?P<value>[\p{L}0-9 ,.'/-]{3,60})").unwrap()
});

/// Property types and the keywords that imply them. Order matters: more
/// specific types come before the ones whose keywords they contain.
pub const PROPERTY_TYPE_RULES: &[(PropertyType, &[&str])] = &[
    (PropertyType::SelfContain, &["self contain", "self-contain", "self contained", "self-contained", "selfcon"]),
    (PropertyType::Penthouse, &["penthouse"]),
    (PropertyType::Maisonette, &["maisonette"]),
    (PropertyType::Duplex, &["duplex"]),
    (PropertyType::Terrace, &["terrace", "terraced"]),
    (PropertyType::Bungalow, &["bungalow"]),
    (PropertyType::SemiDetached, &["semi detached", "semi-detached"]),
    (PropertyType::Detached, &["detached", "fully detached"]),
    (PropertyType::Mansion, &["mansion"]),
    (PropertyType::Flat, &["flat", "apartment", "mini flat", "studio", "condo"]),
    (PropertyType::Land, &["land", "plot", "plots", "acre", "acres", "hectare", "hectares"]),
    (PropertyType::Commercial, &["office", "shop", "warehouse", "commercial", "plaza", "hotel", "event centre"]),
    (PropertyType::House, &["house", "home", "townhouse"]),
];

/// First currency-marked price in `text`, with a trailing billing period if one follows closely.
pub fn find_price(text: &str) -> Option<String> {
    let m = PRICE_RE.find_iter(text).find(|m| has_nonzero_digit(m.as_str()))?;
    let tail_end = text[m.end()..]
        .char_indices()
        .nth(24)
        .map_or(text.len(), |(idx, _)| m.end() + idx);
    let tail = &text[m.end()..tail_end];
    match PERIOD_RE.find(tail) {
        Some(period) => Some(text[m.start()..m.end() + period.end()].to_string()),
        None => Some(m.as_str().to_string()),
    }
}

/// Whether `text` contains a plausible currency-marked price.
pub fn has_price_token(text: &str) -> bool {
    PRICE_RE.find_iter(text).any(|m| has_nonzero_digit(m.as_str()))
}

pub fn count_price_tokens(text: &str) -> usize {
    PRICE_RE.find_iter(text).filter(|m| has_nonzero_digit(m.as_str())).count()
}

fn has_nonzero_digit(s: &str) -> bool {
    s.chars().any(|c| c.is_ascii_digit() && c != '0')
}

pub fn find_bedrooms(text: &str) -> Option<String> {
    BEDROOMS_RE
        .find(text)
        .or_else(|| STUDIO_RE.find(text))
        .map(|m| m.as_str().to_string())
}

pub fn find_bathrooms(text: &str) -> Option<String> {
    BATHROOMS_RE.find(text).map(|m| m.as_str().to_string())
}

pub fn count_bedroom_tokens(text: &str) -> usize {
    BEDROOMS_RE.find_iter(text).count()
}

/// `Location: ...` style labels inside card text.
pub fn find_labeled_location(text: &str) -> Option<String> {
    LOCATION_LABEL_RE
        .captures(text)
        .and_then(|caps| caps.name("value"))
        .map(|m| m.as_str().trim().trim_end_matches([',', '.']).to_string())
        .filter(|value| value.chars().any(char::is_alphabetic))
}

/// Location implied by a title like "3 Bedroom Flat, Lekki Phase 1" or "Duplex for sale in Ikoyi".
pub fn location_from_title(title: &str) -> Option<String> {
    let lower = title.to_ascii_lowercase();
    let candidate = if let Some(idx) = lower.rfind(" in ") {
        &title[idx + 4..]
    } else if let Some(idx) = title.find(',') {
        &title[idx + 1..]
    } else {
        return None;
    };

    let candidate = candidate.trim().trim_end_matches(['.', ',']);
    let plausible = (3..=80).contains(&candidate.len())
        && candidate.chars().any(char::is_alphabetic)
        && !has_price_token(candidate);
    plausible.then(|| candidate.to_string())
}

/// Property type implied by free text, using [`PROPERTY_TYPE_RULES`].
pub fn property_type_from_text(text: &str) -> Option<PropertyType> {
    let lower = text.to_lowercase();
    PROPERTY_TYPE_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| contains_phrase(&lower, k)))
        .map(|(kind, _)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_price() {
        assert_eq!(find_price("Price: ₦25,000,000 negotiable").as_deref(), Some("₦25,000,000"));
        assert_eq!(find_price("N 2.5m per annum").as_deref(), Some("N 2.5m per annum"));
        assert_eq!(find_price("USD 1,200 / month, 2 beds").as_deref(), Some("USD 1,200 / month"));
        assert_eq!(find_price("3 bedroom flat"), None);
        assert_eq!(find_price("₦0"), None);
    }

    #[test]
    fn test_price_stops_before_next_number() {
        assert_eq!(find_price("₦25,000,000 450 sqm").as_deref(), Some("₦25,000,000"));
        assert_eq!(find_price("NGN 3,500,000 12 Admiralty Way").as_deref(), Some("NGN 3,500,000"));
        assert_eq!(count_price_tokens("₦25,000,000 100 ₦30,000,000"), 2);
    }

    #[test]
    fn test_price_needs_currency_boundary() {
        // A trailing "n" inside a word is not the naira marker.
        assert!(!has_price_token("Lekki Division 5"));
        assert!(has_price_token("NGN 450,000"));
    }

    #[test]
    fn test_bedrooms() {
        assert_eq!(find_bedrooms("3 Bedroom Flat, Lekki Phase 1").as_deref(), Some("3 Bedroom"));
        assert_eq!(find_bedrooms("lovely 4-bed duplex").as_deref(), Some("4-bed"));
        assert_eq!(find_bedrooms("Three bedroom bungalow").as_deref(), Some("Three bedroom"));
        assert_eq!(find_bedrooms("Cosy studio apartment").as_deref(), Some("studio"));
    }

    #[test]
    fn test_phone_numbers_are_not_counts() {
        let text = "Call 08012345678 for inspection";
        assert_eq!(find_bedrooms(text), None);
        assert_eq!(find_bathrooms(text), None);
        assert_eq!(find_bathrooms("call 08012345678 baths"), None);
    }

    #[test]
    fn test_bathrooms() {
        assert_eq!(find_bathrooms("4 bed, 5 baths").as_deref(), Some("5 baths"));
        assert_eq!(find_bathrooms("2 toilets").as_deref(), Some("2 toilets"));
    }

    #[test]
    fn test_location_from_title() {
        assert_eq!(location_from_title("3 Bedroom Flat, Lekki Phase 1").as_deref(), Some("Lekki Phase 1"));
        assert_eq!(location_from_title("Duplex for sale in Ikoyi, Lagos").as_deref(), Some("Ikoyi, Lagos"));
        assert_eq!(location_from_title("Lovely duplex"), None);
    }

    #[test]
    fn test_labeled_location() {
        assert_eq!(
            find_labeled_location("Location: Ikeja GRA, Lagos").as_deref(),
            Some("Ikeja GRA, Lagos")
        );
    }

    #[test]
    fn test_property_types() {
        assert_eq!(property_type_from_text("3 Bedroom Flat, Lekki"), Some(PropertyType::Flat));
        assert_eq!(property_type_from_text("5 bed semi-detached duplex"), Some(PropertyType::Duplex));
        assert_eq!(property_type_from_text("4 bedroom semi detached house"), Some(PropertyType::SemiDetached));
        assert_eq!(property_type_from_text("Self contain in Yaba"), Some(PropertyType::SelfContain));
        assert_eq!(property_type_from_text("600sqm plot of land"), Some(PropertyType::Land));
        assert_eq!(property_type_from_text("Victoria Island"), None);
    }
}
