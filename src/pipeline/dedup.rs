//! Deduplicator.
//!
//! Runs over a complete batch so the result does not depend on which site
//! finished first. Records are visited in a fixed order (scrape time, then
//! site priority, then site key) and a duplicate always points at the record
//! visited before it. Duplicates stay in the batch.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;
use tracing::debug;

use super::normalize::normalize_key;
use crate::error::ConfigError;
use crate::models::NormalizedListing;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Weighted similarity at or above which two records are duplicates.
    pub threshold: f64,
    pub title_weight: f64,
    pub price_weight: f64,
    pub location_weight: f64,
    /// Relative price difference still counted as the same price.
    pub price_tolerance: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            title_weight: 0.5,
            price_weight: 0.3,
            location_weight: 0.2,
            price_tolerance: 0.05,
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key, reason: &str| ConfigError::InvalidSetting {
            key,
            reason: reason.to_string(),
        };
        if !(0.0..=1.0).contains(&self.threshold) || self.threshold == 0.0 {
            return Err(invalid("dedup.threshold", "must be in (0, 1]"));
        }
        let weights = [self.title_weight, self.price_weight, self.location_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || weights.iter().sum::<f64>() <= 0.0 {
            return Err(invalid("dedup weights", "must be non-negative with a positive sum"));
        }
        if !(0.0..1.0).contains(&self.price_tolerance) {
            return Err(invalid("dedup.price_tolerance", "must be in [0, 1)"));
        }
        Ok(())
    }
}

/// What one dedup pass found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub exact: usize,
    pub fuzzy: usize,
    /// Duplicates per `source_site` of the duplicate record.
    pub per_site: BTreeMap<String, usize>,
}

impl DedupReport {
    pub fn total(&self) -> usize {
        self.exact + self.fuzzy
    }
}

pub struct Deduplicator {
    config: DedupConfig,
    /// Site key to priority; lower wins ties. Unknown sites sort last.
    priorities: HashMap<String, u32>,
}

impl Deduplicator {
    pub fn new(config: DedupConfig, priorities: HashMap<String, u32>) -> Self {
        Self { config, priorities }
    }

    fn priority(&self, site: &str) -> u32 {
        self.priorities.get(site).copied().unwrap_or(u32::MAX)
    }

    fn visit_order(&self, a: &NormalizedListing, b: &NormalizedListing) -> Ordering {
        a.scrape_timestamp
            .cmp(&b.scrape_timestamp)
            .then_with(|| self.priority(&a.source_site).cmp(&self.priority(&b.source_site)))
            .then_with(|| a.source_site.cmp(&b.source_site))
            .then_with(|| a.listing_url.cmp(&b.listing_url))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Mark duplicates in place. Earlier marks are cleared first, so running
    /// twice gives the same graph.
    pub fn dedupe(&self, listings: &mut [NormalizedListing]) -> DedupReport {
        listings.iter_mut().for_each(NormalizedListing::clear_duplicate);

        let mut order: Vec<usize> = (0..listings.len()).collect();
        order.sort_by(|&a, &b| self.visit_order(&listings[a], &listings[b]));

        let mut report = DedupReport::default();
        let mut marks: Vec<(usize, usize)> = Vec::new();

        // Phase 1: identical content hash.
        let mut by_hash: HashMap<&str, usize> = HashMap::new();
        let mut survivors: Vec<usize> = Vec::new();
        for &idx in &order {
            match by_hash.get(listings[idx].content_hash.as_str()) {
                Some(&canonical) => {
                    marks.push((idx, canonical));
                    report.exact += 1;
                }
                None => {
                    by_hash.insert(listings[idx].content_hash.as_str(), idx);
                    survivors.push(idx);
                }
            }
        }

        // Phase 2: fuzzy match among the remaining unique hashes.
        let prepared: Vec<Prepared> = survivors.iter().map(|&idx| Prepared::new(&listings[idx])).collect();
        let mut canonicals: Vec<usize> = Vec::new();
        for (pos, &idx) in survivors.iter().enumerate() {
            let found = canonicals.iter().copied().find(|&earlier| {
                self.similarity(&prepared[earlier], &prepared[pos])
                    .is_some_and(|score| score >= self.config.threshold)
            });
            match found {
                Some(earlier) => {
                    marks.push((idx, survivors[earlier]));
                    report.fuzzy += 1;
                }
                None => canonicals.push(pos),
            }
        }

        for (duplicate, canonical) in marks {
            let canonical_id = listings[canonical].id.clone();
            let listing = &mut listings[duplicate];
            listing.mark_duplicate_of(&canonical_id);
            *report.per_site.entry(listing.source_site.clone()).or_default() += 1;
        }

        debug!("Dedup: {} exact, {} fuzzy", report.exact, report.fuzzy);
        report
    }

    /// Weighted similarity, or `None` when the records cannot be the same
    /// property (different known bedroom counts).
    fn similarity(&self, a: &Prepared, b: &Prepared) -> Option<f64> {
        if let (Some(x), Some(y)) = (a.bedrooms, b.bedrooms) {
            if x != y {
                return None;
            }
        }

        let c = &self.config;
        let title = match (&a.title, &b.title) {
            (Some(x), Some(y)) => jaro_winkler(x, y),
            _ => 0.0,
        };
        let price = match (a.price, b.price) {
            (Some(x), Some(y)) if a.currency == b.currency => {
                let diff = (x - y).abs() / x.max(y);
                if diff <= c.price_tolerance {
                    1.0
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        let location = jaccard(&a.location, &b.location);

        let total = c.title_weight + c.price_weight + c.location_weight;
        Some((title * c.title_weight + price * c.price_weight + location * c.location_weight) / total)
    }
}

/// Normalized comparison keys for one record.
struct Prepared {
    title: Option<String>,
    price: Option<f64>,
    currency: Option<String>,
    location: HashSet<String>,
    bedrooms: Option<u8>,
}

impl Prepared {
    fn new(listing: &NormalizedListing) -> Self {
        Self {
            title: listing.title.as_deref().map(normalize_key).filter(|t| !t.is_empty()),
            price: listing.price,
            currency: listing.currency.clone(),
            location: listing
                .location
                .text
                .as_deref()
                .map(|text| normalize_key(text).split(' ').filter(|w| !w.is_empty()).map(str::to_string).collect())
                .unwrap_or_default(),
            bedrooms: listing.bedrooms,
        }
    }
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count() as f64;
    shared / a.union(b).count() as f64
}
