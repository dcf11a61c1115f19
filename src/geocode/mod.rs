//! Geocode cache.
//!
//! Free-text locations resolve to coordinates through an injected
//! [`Geocoder`]. Results are cached by normalized location text and
//! persisted to a JSON file between runs. Only cache misses go through the
//! rate limiter.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::Coordinates;
use crate::pipeline::normalize_key;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodeConfig {
    pub enabled: bool,
    pub endpoint: String,
    /// Minimum gap between external calls.
    pub min_interval_ms: u64,
    pub cache_path: PathBuf,
    /// ISO country code passed to the service to narrow results.
    pub country_hint: Option<String>,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://nominatim.openstreetmap.org/search".to_string(),
            min_interval_ms: 1000,
            cache_path: PathBuf::from("geocode_cache.json"),
            country_hint: Some("ng".to_string()),
            user_agent: concat!("listing-scout/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 10,
        }
    }
}

/// External lookup service. `Ok(None)` means the service had no match.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>>;
}

/// Nominatim search API.
pub struct NominatimGeocoder {
    client: Client,
    endpoint: String,
    country_hint: Option<String>,
}

#[derive(Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocodeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(&config.user_agent)
            .build()
            .context("Failed to create geocoding client")?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            country_hint: config.country_hint.clone(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>> {
        let mut params = vec![("q", query), ("format", "json"), ("limit", "1")];
        if let Some(country) = &self.country_hint {
            params.push(("countrycodes", country.as_str()));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&params)
            .send()
            .await
            .context("Geocode request failed")?
            .error_for_status()
            .context("Geocode service returned an error status")?;

        let places: Vec<NominatimPlace> = response.json().await.context("Failed to parse geocode response")?;
        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let lat: f64 = place.lat.parse().context("Invalid latitude")?;
        let lng: f64 = place.lon.parse().context("Invalid longitude")?;
        Ok(Some(Coordinates { lat, lng }))
    }
}

/// How one lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup {
    /// Answered from the cache, including cached "no result".
    Cached(Option<Coordinates>),
    /// Answered by the service and now cached.
    Fetched(Option<Coordinates>),
    /// Service error; nothing cached so a later run can retry.
    Failed,
    /// Nothing to look up.
    Skipped,
}

impl Lookup {
    pub fn coordinates(self) -> Option<Coordinates> {
        match self {
            Self::Cached(coords) | Self::Fetched(coords) => coords,
            Self::Failed | Self::Skipped => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GeocodeStats {
    pub hits: usize,
    pub calls: usize,
    pub failures: usize,
    pub entries: usize,
}

pub struct GeocodeCache {
    geocoder: Arc<dyn Geocoder>,
    entries: Mutex<HashMap<String, Option<Coordinates>>>,
    limiter: DirectRateLimiter,
    path: Option<PathBuf>,
    dirty: AtomicUsize,
    hits: AtomicUsize,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl GeocodeCache {
    /// Cache with no backing file.
    pub fn in_memory(geocoder: Arc<dyn Geocoder>, min_interval: Duration) -> Self {
        Self::with_entries(geocoder, min_interval, None, HashMap::new())
    }

    /// Load the cache file at `path` if it exists. A corrupt file is logged
    /// and replaced on the next flush.
    pub fn load(geocoder: Arc<dyn Geocoder>, min_interval: Duration, path: &Path) -> Result<Self> {
        let entries = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read geocode cache {}", path.display()))?;
            match serde_json::from_str::<HashMap<String, Option<Coordinates>>>(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring unreadable geocode cache {}: {}", path.display(), e);
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };
        info!("🗺️  Loaded {} cached locations from {}", entries.len(), path.display());
        Ok(Self::with_entries(geocoder, min_interval, Some(path.to_path_buf()), entries))
    }

    /// Nominatim-backed cache built from config, or `None` when disabled.
    pub fn from_config(config: &GeocodeConfig) -> Result<Option<Arc<Self>>> {
        if !config.enabled {
            return Ok(None);
        }
        let geocoder = Arc::new(NominatimGeocoder::new(config)?);
        let cache = Self::load(geocoder, Duration::from_millis(config.min_interval_ms), &config.cache_path)?;
        Ok(Some(Arc::new(cache)))
    }

    fn with_entries(
        geocoder: Arc<dyn Geocoder>,
        min_interval: Duration,
        path: Option<PathBuf>,
        entries: HashMap<String, Option<Coordinates>>,
    ) -> Self {
        let quota = Quota::with_period(min_interval).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
        Self {
            geocoder,
            entries: Mutex::new(entries),
            limiter: RateLimiter::direct(quota),
            path,
            dirty: AtomicUsize::new(0),
            hits: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Coordinates for `location`, or `None`. Never fails.
    pub async fn resolve(&self, location: &str) -> Option<Coordinates> {
        self.lookup(location).await.coordinates()
    }

    pub async fn lookup(&self, location: &str) -> Lookup {
        let key = normalize_key(location);
        if key.is_empty() {
            return Lookup::Skipped;
        }

        // Held across the external call so concurrent identical lookups
        // wait for the first one and then hit the cache.
        let mut entries = self.entries.lock().await;
        if let Some(cached) = entries.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Lookup::Cached(*cached);
        }

        self.limiter.until_ready().await;
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.geocoder.geocode(location).await {
            Ok(coords) => {
                debug!("Geocoded {:?} -> {:?}", location, coords);
                entries.insert(key, coords);
                self.dirty.fetch_add(1, Ordering::Relaxed);
                Lookup::Fetched(coords)
            }
            Err(e) => {
                warn!("Geocode lookup failed for {:?}: {:#}", location, e);
                self.failures.fetch_add(1, Ordering::Relaxed);
                Lookup::Failed
            }
        }
    }

    /// Write the cache file if anything changed since the last flush.
    pub async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if self.dirty.load(Ordering::Relaxed) == 0 {
            return Ok(());
        }

        let entries = self.entries.lock().await;
        let sorted: BTreeMap<&String, &Option<Coordinates>> = entries.iter().collect();
        let json = serde_json::to_string_pretty(&sorted)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        self.dirty.store(0, Ordering::Relaxed);
        info!("💾 Saved {} cached locations to {}", entries.len(), path.display());
        Ok(())
    }

    pub async fn stats(&self) -> GeocodeStats {
        GeocodeStats {
            hits: self.hits.load(Ordering::Relaxed),
            calls: self.calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            entries: self.entries.lock().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::time::Instant;

    /// Answers "lekki" with fixed coordinates, errors on "boom", else no match.
    struct FakeGeocoder {
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FakeGeocoder {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn geocode(&self, query: &str) -> Result<Option<Coordinates>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match query.to_lowercase().as_str() {
                q if q.contains("boom") => bail!("service unavailable"),
                q if q.contains("lekki") => Ok(Some(Coordinates { lat: 6.45, lng: 3.47 })),
                _ => Ok(None),
            }
        }
    }

    const FAST: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn test_hit_bypasses_service() {
        let fake = FakeGeocoder::new(Duration::ZERO);
        let cache = GeocodeCache::in_memory(fake.clone(), FAST);

        assert!(matches!(cache.lookup("Lekki Phase 1").await, Lookup::Fetched(Some(_))));
        assert!(matches!(cache.lookup("  lekki phase 1 ").await, Lookup::Cached(Some(_))));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);

        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.calls, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_no_result_is_cached_but_errors_are_not() {
        let fake = FakeGeocoder::new(Duration::ZERO);
        let cache = GeocodeCache::in_memory(fake.clone(), FAST);

        assert_eq!(cache.resolve("Nowhere Town").await, None);
        assert_eq!(cache.lookup("Nowhere Town").await, Lookup::Cached(None));

        assert_eq!(cache.lookup("boom").await, Lookup::Failed);
        assert_eq!(cache.lookup("boom").await, Lookup::Failed);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().await.failures, 2);
    }

    #[tokio::test]
    async fn test_blank_location_skipped() {
        let fake = FakeGeocoder::new(Duration::ZERO);
        let cache = GeocodeCache::in_memory(fake.clone(), FAST);
        assert_eq!(cache.lookup(" , ").await, Lookup::Skipped);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_concurrent_identical_lookups_call_once() {
        let fake = FakeGeocoder::new(Duration::from_millis(50));
        let cache = Arc::new(GeocodeCache::in_memory(fake.clone(), FAST));

        let (a, b) = tokio::join!(cache.resolve("Lekki"), cache.resolve("lekki"));
        assert_eq!(a, b);
        assert!(a.is_some());
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_misses_are_spaced() {
        let fake = FakeGeocoder::new(Duration::ZERO);
        let cache = GeocodeCache::in_memory(fake, Duration::from_millis(200));

        let started = Instant::now();
        cache.resolve("Lekki").await;
        cache.resolve("Ikoyi").await;
        assert!(started.elapsed() >= Duration::from_millis(150));

        // Hits do not wait on the limiter.
        let started = Instant::now();
        for _ in 0..5 {
            cache.resolve("Lekki").await;
        }
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("geocode.json");

        let fake = FakeGeocoder::new(Duration::ZERO);
        let cache = GeocodeCache::load(fake.clone(), FAST, &path).unwrap();
        cache.resolve("Lekki").await;
        cache.resolve("Nowhere").await;
        cache.flush().await.unwrap();
        assert!(path.exists());

        let fresh = FakeGeocoder::new(Duration::ZERO);
        let reloaded = GeocodeCache::load(fresh.clone(), FAST, &path).unwrap();
        assert_eq!(reloaded.lookup("lekki").await, Lookup::Cached(Some(Coordinates { lat: 6.45, lng: 3.47 })));
        assert_eq!(reloaded.lookup("nowhere").await, Lookup::Cached(None));
        assert_eq!(fresh.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_corrupt_cache_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocode.json");
        std::fs::write(&path, "not json").unwrap();

        let cache = GeocodeCache::load(FakeGeocoder::new(Duration::ZERO), FAST, &path).unwrap();
        assert_eq!(cache.stats().await.entries, 0);
    }
}
