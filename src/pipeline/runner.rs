//! Run orchestration.
//!
//! Sites are crawled by a bounded pool of spawned workers. Everything after
//! extraction (dedup, geocoding, transformation) runs over the complete
//! batch once every worker has returned.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use futures::{stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dedup::Deduplicator;
use super::normalize::Normalizer;
use super::transform::{EnterpriseDocument, SchemaTransformer};
use crate::config::{AppConfig, SiteConfig};
use crate::error::{ConfigError, FetchError, FetchErrorReason};
use crate::extract::ExtractionEngine;
use crate::geocode::{GeocodeCache, Lookup};
use crate::models::{NormalizedListing, RunManifest, SiteReport};
use crate::scrapers::{CrawlItem, FetchStrategy, PaginationCrawler};

/// Everything a run hands to the persistence and export collaborators.
#[derive(Debug)]
pub struct RunOutput {
    /// All listings, duplicates included, grouped by site in page order.
    pub listings: Vec<NormalizedListing>,
    pub documents: Vec<EnterpriseDocument>,
    pub manifest: RunManifest,
}

impl RunOutput {
    pub fn canonical(&self) -> impl Iterator<Item = &NormalizedListing> {
        self.listings.iter().filter(|l| !l.is_duplicate())
    }
}

struct SiteResult {
    report: SiteReport,
    listings: Vec<NormalizedListing>,
}

pub struct CrawlRunner {
    config: AppConfig,
    crawler: PaginationCrawler,
    normalizer: Normalizer,
    geocoder: Option<Arc<GeocodeCache>>,
}

impl CrawlRunner {
    pub fn new(config: AppConfig, fetcher: Arc<FetchStrategy>, geocoder: Option<Arc<GeocodeCache>>) -> Self {
        let crawler = PaginationCrawler::new(fetcher, Arc::new(ExtractionEngine::new()));
        let normalizer = Normalizer::from_config(&config);
        Self {
            config,
            crawler,
            normalizer,
            geocoder,
        }
    }

    /// Validate the config, then build the shared fetch backends and the
    /// geocode cache once for the whole run.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(FetchStrategy::from_config(&config)?);
        let geocoder = GeocodeCache::from_config(&config.geocode)?;
        Ok(Self::new(config, fetcher, geocoder))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Crawl every enabled site and post-process the combined batch.
    ///
    /// Only configuration problems fail the run, and they do so before any
    /// fetch. Site failures end up in the manifest.
    pub async fn run(&self, cancel: CancellationToken) -> Result<RunOutput, ConfigError> {
        self.config.validate()?;

        let mut manifest = RunManifest::start();
        let sites: Vec<SiteConfig> = self.config.enabled_sites().cloned().collect();
        let concurrency = self.config.run.effective_concurrency();
        info!("🚀 Crawling {} site(s), {} at a time", sites.len(), concurrency);

        let budget_timer = self.config.run.time_budget().map(|budget| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(budget) => {
                        warn!("⏰ Time budget of {:?} spent, stopping new fetches", budget);
                        cancel.cancel();
                    }
                }
            })
        });

        let mut results: Vec<SiteResult> = stream::iter(sites)
            .map(|site| {
                let key = site.key.clone();
                let handle = tokio::spawn(crawl_site(
                    self.crawler.clone(),
                    self.normalizer.clone(),
                    site,
                    cancel.child_token(),
                ));
                async move {
                    match handle.await {
                        Ok(result) => result,
                        Err(e) => {
                            error!(site = %key, "💥 Site worker failed: {}", e);
                            let mut report = SiteReport::new(&key);
                            report.errors.worker += 1;
                            report.error_messages.push(format!("worker failed: {e}"));
                            SiteResult {
                                report,
                                listings: Vec::new(),
                            }
                        }
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        if let Some(timer) = budget_timer {
            timer.abort();
        }

        // Completion order varies between runs; output order should not.
        results.sort_by(|a, b| a.report.site.cmp(&b.report.site));
        let mut listings = Vec::new();
        for result in results {
            listings.extend(result.listings);
            manifest.sites.push(result.report);
        }

        let priorities: HashMap<String, u32> = self
            .config
            .sites
            .iter()
            .map(|site| (site.key.clone(), site.priority))
            .collect();
        let dedup = Deduplicator::new(self.config.dedup.clone(), priorities).dedupe(&mut listings);
        for (site, count) in &dedup.per_site {
            if let Some(report) = manifest.site_mut(site) {
                report.duplicates_found = *count;
            }
        }
        info!("🧹 Marked {} duplicate(s) ({} exact, {} fuzzy)", dedup.total(), dedup.exact, dedup.fuzzy);

        if let Some(geocoder) = &self.geocoder {
            self.geocode(geocoder, &mut listings, &mut manifest, &cancel).await;
        }

        let transformer = SchemaTransformer::new(self.config.transform.clone());
        let documents: Vec<EnterpriseDocument> = listings.iter().map(|l| transformer.transform(l)).collect();

        manifest.cancelled = cancel.is_cancelled();
        manifest.finish(listings.len());
        info!(
            "🏁 Run finished: {} listing(s), {} duplicate(s), {} error(s)",
            manifest.totals.listings_emitted, manifest.totals.duplicates_found, manifest.totals.errors
        );

        Ok(RunOutput {
            listings,
            documents,
            manifest,
        })
    }

    /// Resolve coordinates and rescore. Skipped entirely on cancellation,
    /// since every miss costs at least one rate-limit interval.
    async fn geocode(
        &self,
        geocoder: &GeocodeCache,
        listings: &mut [NormalizedListing],
        manifest: &mut RunManifest,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() {
            info!("Run cancelled, skipping geocoding");
            return;
        }

        info!("🗺️  Geocoding {} listing(s)", listings.len());
        for listing in listings.iter_mut() {
            if cancel.is_cancelled() {
                break;
            }
            let Some(text) = listing.location.text.clone() else {
                continue;
            };
            let lookup = geocoder.lookup(&text).await;
            if matches!(lookup, Lookup::Failed | Lookup::Cached(None) | Lookup::Fetched(None)) {
                if let Some(report) = manifest.site_mut(&listing.source_site) {
                    report.geocode_failures += 1;
                }
            }
            if let Some(coordinates) = lookup.coordinates() {
                listing.set_coordinates(Some(coordinates), self.normalizer.scorer());
            }
        }

        if let Err(e) = geocoder.flush().await {
            warn!("Failed to save geocode cache: {:#}", e);
        }
        let stats = geocoder.stats().await;
        debug!(
            hits = stats.hits,
            calls = stats.calls,
            failures = stats.failures,
            "Geocode cache holds {} location(s)",
            stats.entries
        );
    }
}

/// One site's crawl, normalized. Runs on its own task.
async fn crawl_site(
    crawler: PaginationCrawler,
    normalizer: Normalizer,
    site: SiteConfig,
    cancel: CancellationToken,
) -> SiteResult {
    info!(site = %site.key, "🏠 Crawling {}", site.display_name());
    let mut report = SiteReport::new(&site.key);
    let mut listings = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    let pages = crawler.crawl(site.clone(), cancel);
    futures::pin_mut!(pages);

    while let Some(item) = pages.next().await {
        match item {
            CrawlItem::Page(crawled) => {
                report.pages_fetched += 1;
                report.cards_dropped += crawled.extraction.cards_dropped;
                if crawled.extraction.is_category_page() {
                    report.category_pages_skipped += 1;
                    info!(site = %site.key, "🗂️  Skipped category page {}", crawled.page.url);
                }
                for raw in &crawled.extraction.listings {
                    report.listings_extracted += 1;
                    match normalizer.normalize(raw, &site.currency) {
                        Ok(normalized) => {
                            report.fields_nulled += normalized.nulled_fields.len();
                            // Featured listings repeat on every page.
                            if seen_ids.insert(normalized.listing.id.clone()) {
                                listings.push(normalized.listing);
                            } else {
                                debug!(site = %site.key, id = %normalized.listing.id, "Listing already seen on an earlier page");
                            }
                        }
                        Err(_) => report.listings_rejected += 1,
                    }
                }
            }
            CrawlItem::Failed { url, error } => {
                warn!(site = %site.key, url = %url, "⚠️  {}", error);
                record_fetch_error(&mut report, &error);
            }
            CrawlItem::Finished(stop) => report.stop_reason = Some(stop),
        }
    }

    info!(
        site = %site.key,
        pages = report.pages_fetched,
        rejected = report.listings_rejected,
        "✅ {} listing(s) kept from {}",
        listings.len(),
        site.display_name()
    );
    SiteResult { report, listings }
}

fn record_fetch_error(report: &mut SiteReport, error: &FetchError) {
    match error.reason {
        FetchErrorReason::Cancelled => return,
        FetchErrorReason::RobotsDisallowed => report.errors.robots += 1,
        _ if error.is_permanent() => report.errors.permanent += 1,
        _ => report.errors.transient += 1,
    }
    report.error_messages.push(error.to_string());
}
