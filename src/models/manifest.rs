//! Per-run manifest handed to the persistence collaborator.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::scrapers::StopReason;

/// Failure counts by category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorCounts {
    /// URLs abandoned after retries and fallbacks ran out.
    pub transient: u32,
    /// 404s, repeated blocks.
    pub permanent: u32,
    pub robots: u32,
    /// Worker crashed or was aborted.
    pub worker: u32,
}

impl ErrorCounts {
    pub fn total(&self) -> u32 {
        self.transient + self.permanent + self.robots + self.worker
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SiteReport {
    pub site: String,
    pub pages_fetched: u32,
    pub listings_extracted: usize,
    pub listings_rejected: usize,
    pub duplicates_found: usize,
    pub category_pages_skipped: u32,
    pub cards_dropped: usize,
    pub fields_nulled: usize,
    pub geocode_failures: usize,
    pub errors: ErrorCounts,
    pub error_messages: Vec<String>,
    pub stop_reason: Option<StopReason>,
}

impl SiteReport {
    pub fn new(site: &str) -> Self {
        Self {
            site: site.to_string(),
            ..Default::default()
        }
    }

    /// Nothing came back and something went wrong.
    pub fn is_broken(&self) -> bool {
        self.listings_extracted == 0 && self.errors.total() > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunTotals {
    pub pages_fetched: u32,
    pub listings_extracted: usize,
    pub listings_rejected: usize,
    pub listings_emitted: usize,
    pub duplicates_found: usize,
    pub errors: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunManifest {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cancelled: bool,
    pub sites: Vec<SiteReport>,
    pub totals: RunTotals,
}

impl RunManifest {
    pub fn start() -> Self {
        let started_at = Utc::now();
        Self {
            run_id: format!("run-{}", started_at.format("%Y%m%dT%H%M%SZ")),
            started_at,
            finished_at: None,
            cancelled: false,
            sites: Vec::new(),
            totals: RunTotals::default(),
        }
    }

    /// Sort site rows by key and compute totals.
    pub fn finish(&mut self, listings_emitted: usize) {
        self.sites.sort_by(|a, b| a.site.cmp(&b.site));
        self.totals = RunTotals {
            pages_fetched: self.sites.iter().map(|s| s.pages_fetched).sum(),
            listings_extracted: self.sites.iter().map(|s| s.listings_extracted).sum(),
            listings_rejected: self.sites.iter().map(|s| s.listings_rejected).sum(),
            listings_emitted,
            duplicates_found: self.sites.iter().map(|s| s.duplicates_found).sum(),
            errors: self.sites.iter().map(|s| s.errors.total()).sum(),
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn site_mut(&mut self, site: &str) -> Option<&mut SiteReport> {
        self.sites.iter_mut().find(|report| report.site == site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let mut manifest = RunManifest::start();
        let mut a = SiteReport::new("b-site");
        a.pages_fetched = 3;
        a.listings_extracted = 20;
        a.errors.transient = 1;
        let mut b = SiteReport::new("a-site");
        b.pages_fetched = 1;
        b.errors.permanent = 2;
        manifest.sites = vec![a, b];

        manifest.finish(18);
        assert_eq!(manifest.sites[0].site, "a-site");
        assert_eq!(manifest.totals.pages_fetched, 4);
        assert_eq!(manifest.totals.errors, 3);
        assert_eq!(manifest.totals.listings_emitted, 18);
        assert!(manifest.sites[0].is_broken());
        assert!(!manifest.sites[1].is_broken());
        assert!(manifest.finished_at.is_some());
    }
}
