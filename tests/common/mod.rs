//! In-memory sites and services shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use listing_scout::config::{AppConfig, FetchSettings, SiteConfig};
use listing_scout::error::{BackendFailure, FailureClass};
use listing_scout::geocode::Geocoder;
use listing_scout::models::Coordinates;
use listing_scout::scrapers::{BackendKind, FetchBackend, FetchStrategy, FetchedContent};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Serves canned HTML by exact URL; anything else is a 404.
pub struct FakeSite {
    kind: BackendKind,
    pages: HashMap<String, String>,
    requests: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn new(pages: Vec<(&str, String)>) -> Arc<Self> {
        Arc::new(Self {
            kind: BackendKind::Http,
            pages: pages.into_iter().map(|(url, html)| (url.to_string(), html)).collect(),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Same site, served through a backend of another kind.
    pub fn with_kind(kind: BackendKind, pages: Vec<(&str, String)>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            pages: pages.into_iter().map(|(url, html)| (url.to_string(), html)).collect(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FetchBackend for FakeSite {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedContent, BackendFailure> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.pages.get(url.as_str()) {
            Some(body) => Ok(FetchedContent {
                body: body.clone(),
                status: Some(200),
                final_url: url.to_string(),
            }),
            None => Err(BackendFailure::new(FailureClass::NotFound { status: 404 }, "no such page")),
        }
    }
}

/// Always fails with the same class.
pub struct Broken {
    kind: BackendKind,
    class: FailureClass,
    pub calls: AtomicUsize,
}

impl Broken {
    pub fn new(kind: BackendKind, class: FailureClass) -> Arc<Self> {
        Arc::new(Self {
            kind,
            class,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FetchBackend for Broken {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn fetch(&self, _url: &Url, _timeout: Duration) -> Result<FetchedContent, BackendFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BackendFailure::new(self.class.clone(), "scripted failure"))
    }
}

/// Cancels the run while its own request is in flight, then times out.
pub struct CancelsOnFetch {
    kind: BackendKind,
    cancel: CancellationToken,
    pub calls: AtomicUsize,
}

impl CancelsOnFetch {
    pub fn new(kind: BackendKind, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            kind,
            cancel,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FetchBackend for CancelsOnFetch {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn fetch(&self, _url: &Url, _timeout: Duration) -> Result<FetchedContent, BackendFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Err(BackendFailure::new(FailureClass::Timeout, "timed out"))
    }
}

/// A slow site that never runs out of pages: every `?page=n` has two fresh
/// cards and links to `?page=n+1`.
pub struct Endless {
    delay: Duration,
    pub calls: AtomicUsize,
}

impl Endless {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FetchBackend for Endless {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedContent, BackendFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let page: u32 = url
            .query_pairs()
            .find(|(key, _)| key == "page")
            .and_then(|(_, value)| value.parse().ok())
            .unwrap_or(1);

        let titles = [format!("{page} Bedroom Flat, Yaba"), format!("{page} Bedroom Flat, Surulere")];
        let hrefs = [format!("/p/{page}a"), format!("/p/{page}b")];
        let cards: Vec<Card<'_>> = titles
            .iter()
            .zip(&hrefs)
            .map(|(title, href)| Card {
                title,
                price: "₦40,000,000",
                location: "Lagos",
                href,
            })
            .collect();
        Ok(FetchedContent {
            body: grid_page(&cards, Some(&format!("?page={}", page + 1))),
            status: Some(200),
            final_url: url.to_string(),
        })
    }
}

/// Resolves anything mentioning Lekki; nothing else.
pub struct FakeGeocoder {
    pub calls: AtomicUsize,
}

impl FakeGeocoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(query
            .to_lowercase()
            .contains("lekki")
            .then_some(Coordinates { lat: 6.4478, lng: 3.4723 }))
    }
}

/// No retries, no backoff, no robots lookups.
pub fn fast_settings() -> FetchSettings {
    FetchSettings {
        order: vec![BackendKind::Http, BackendKind::Browser, BackendKind::Proxy],
        max_retries: 0,
        backoff_base_ms: 1,
        respect_robots: false,
        ..Default::default()
    }
}

pub fn strategy(backends: &[Arc<dyn FetchBackend>]) -> Arc<FetchStrategy> {
    Arc::new(FetchStrategy::new(backends.to_vec(), fast_settings()))
}

pub fn site(key: &str, base_url: &str) -> SiteConfig {
    let mut site = SiteConfig::new(key, base_url);
    site.request_delay_ms = 0;
    site
}

pub fn config(sites: Vec<SiteConfig>) -> AppConfig {
    let mut config = AppConfig {
        fetch: fast_settings(),
        sites,
        ..Default::default()
    };
    config.geocode.enabled = false;
    config.run.concurrency = 1;
    config
}

pub struct Card<'a> {
    pub title: &'a str,
    pub price: &'a str,
    pub location: &'a str,
    pub href: &'a str,
}

/// A results page of repeated cards, with an optional next link.
pub fn grid_page(cards: &[Card<'_>], next: Option<&str>) -> String {
    let mut html = String::from("<html><body><header><a href=\"/\">Home</a></header><main><div class=\"results\">");
    for card in cards {
        html.push_str(&format!(
            r#"<div class="listing-card">
                <a href="{href}"><img src="/img{href}.jpg"></a>
                <h3 class="listing-title"><a href="{href}">{title}</a></h3>
                <div class="price">{price}</div>
                <span class="location">{location}</span>
            </div>"#,
            href = card.href,
            title = card.title,
            price = card.price,
            location = card.location,
        ));
    }
    html.push_str("</div>");
    if let Some(next) = next {
        html.push_str(&format!(r#"<ul class="pagination"><li><a href="{next}">Next</a></li></ul>"#));
    }
    html.push_str("</main></body></html>");
    html
}

/// Page with no listings, optionally still linking onward.
pub fn empty_page(next: Option<&str>) -> String {
    let next = next
        .map(|n| format!(r#"<ul class="pagination"><li><a href="{n}">Next</a></li></ul>"#))
        .unwrap_or_default();
    format!("<html><body><main><p>No results match your search.</p>{next}</main></body></html>")
}
