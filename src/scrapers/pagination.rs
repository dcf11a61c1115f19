//! Pagination crawler.
//!
//! Pages of one site are fetched strictly in sequence: the next URL comes
//! out of the current page. The crawl is a lazy stream that always ends
//! with a `Finished` item saying why it stopped.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use chrono::Utc;
use futures::Stream;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::strategy::FetchStrategy;
use crate::config::SiteConfig;
use crate::error::{FetchError, FetchErrorReason};
use crate::extract::{text, ExtractionEngine, PageExtraction};
use crate::models::RawPage;

static REL_NEXT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"a[rel~="next"][href], link[rel~="next"][href]"#).unwrap());
static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

const NEXT_TEXTS: &[&str] = &["next", "next page", "next »", "next ›", "next >", "»", "›", ">", "→", ">>"];

/// Why a site's crawl ended. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    PageCap,
    NoNextPage,
    EmptyPages,
    FetchFailed,
    /// The next URL had already been fetched.
    LoopDetected,
    Cancelled,
}

/// A fetched page together with what was extracted from it.
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub page: RawPage,
    pub extraction: PageExtraction,
    pub next_url: Option<Url>,
}

#[derive(Debug)]
pub enum CrawlItem {
    Page(CrawledPage),
    Failed { url: String, error: FetchError },
    Finished(StopReason),
}

#[derive(Clone)]
pub struct PaginationCrawler {
    fetcher: Arc<FetchStrategy>,
    engine: Arc<ExtractionEngine>,
}

impl PaginationCrawler {
    pub fn new(fetcher: Arc<FetchStrategy>, engine: Arc<ExtractionEngine>) -> Self {
        Self { fetcher, engine }
    }

    /// Crawl every base URL of `site`, one after another.
    ///
    /// `page_cap` bounds the pages of the whole site. Cancellation is checked
    /// before each fetch and between retries; an attempt already in flight
    /// is allowed to finish.
    pub fn crawl(&self, site: SiteConfig, cancel: CancellationToken) -> impl Stream<Item = CrawlItem> + Send + 'static {
        let fetcher = self.fetcher.clone();
        let engine = self.engine.clone();

        stream! {
            let mut visited: HashSet<String> = HashSet::new();
            let mut pages_fetched = 0u32;
            let mut pending_delay: Option<Duration> = None;
            let mut stop = StopReason::NoNextPage;

            'bases: for base in &site.base_urls {
                let mut url = match Url::parse(base) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!(site = %site.key, "Skipping bad base url {}: {}", base, e);
                        continue;
                    }
                };
                let mut chain_page = 0u32;
                let mut empty_streak = 0u32;
                let mut productive = false;

                loop {
                    if cancel.is_cancelled() {
                        stop = StopReason::Cancelled;
                        break 'bases;
                    }
                    if pages_fetched >= site.page_cap {
                        stop = StopReason::PageCap;
                        break 'bases;
                    }
                    if !visited.insert(page_key(&url)) {
                        debug!(site = %site.key, url = %url, "Already visited");
                        stop = StopReason::LoopDetected;
                        break;
                    }

                    if let Some(delay) = pending_delay.take() {
                        let cancelled = tokio::select! {
                            _ = cancel.cancelled() => true,
                            _ = tokio::time::sleep(delay) => false,
                        };
                        if cancelled {
                            stop = StopReason::Cancelled;
                            break 'bases;
                        }
                    }

                    let outcome = match fetcher.fetch(&url, &site, &cancel).await {
                        Ok(outcome) => outcome,
                        Err(error) if error.reason == FetchErrorReason::Cancelled => {
                            stop = StopReason::Cancelled;
                            break 'bases;
                        }
                        Err(error) => {
                            pending_delay = Some(site.request_delay());
                            yield CrawlItem::Failed { url: url.to_string(), error };
                            stop = StopReason::FetchFailed;
                            break;
                        }
                    };
                    pages_fetched += 1;
                    chain_page += 1;
                    pending_delay = Some(site.request_delay().max(outcome.crawl_delay.unwrap_or_default()));

                    let final_url = Url::parse(&outcome.final_url).unwrap_or_else(|_| url.clone());
                    if final_url != url && !visited.insert(page_key(&final_url)) {
                        info!(site = %site.key, "🔁 {} redirected to already-seen {}", url, final_url);
                        stop = StopReason::LoopDetected;
                        break;
                    }

                    let page = RawPage {
                        source_site: site.key.clone(),
                        requested_url: url.to_string(),
                        url: final_url.to_string(),
                        backend: outcome.backend,
                        status: outcome.status,
                        fetched_at: Utc::now(),
                        page_number: pages_fetched,
                        content: outcome.content,
                    };
                    let (extraction, next_url) = analyze_page(&engine, &page, &site, chain_page);
                    let found = extraction.listings.len();
                    info!(
                        site = %site.key,
                        page = pages_fetched,
                        backend = %page.backend,
                        "📄 {} listings on {}",
                        found,
                        page.url
                    );

                    yield CrawlItem::Page(CrawledPage {
                        page,
                        extraction,
                        next_url: next_url.clone(),
                    });

                    if found == 0 {
                        empty_streak += 1;
                        // Once results have been seen, an empty page means they ran out.
                        if productive || empty_streak >= site.max_empty_pages {
                            stop = StopReason::EmptyPages;
                            break;
                        }
                    } else {
                        empty_streak = 0;
                        productive = true;
                    }

                    match next_url {
                        Some(next) => url = next,
                        None => {
                            stop = StopReason::NoNextPage;
                            break;
                        }
                    }
                }
            }

            debug!(site = %site.key, pages = pages_fetched, "Crawl finished: {:?}", stop);
            yield CrawlItem::Finished(stop);
        }
    }
}

/// URLs that differ only by fragment are the same page.
fn page_key(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    url.to_string()
}

/// Parse once, extract listings and find the next page.
fn analyze_page(
    engine: &ExtractionEngine,
    page: &RawPage,
    site: &SiteConfig,
    chain_page: u32,
) -> (PageExtraction, Option<Url>) {
    let document = Html::parse_document(&page.content);
    let extraction = engine.extract_document(&document, page, site);
    let next = Url::parse(&page.url)
        .ok()
        .and_then(|base| find_next_page(&document, &base, site, chain_page));
    (extraction, next)
}

/// Locate the "next page" URL.
///
/// Tried in order: the site's selector, `rel="next"`, next-looking link
/// text or labels, the numbered link for `current_page + 1`, then the
/// site's page query parameter.
pub fn find_next_page(document: &Html, current: &Url, site: &SiteConfig, current_page: u32) -> Option<Url> {
    let resolve = |href: &str| resolve_link(current, href);

    if let Some(css) = &site.selectors.next_page {
        match Selector::parse(css) {
            Ok(selector) => {
                let found = document.select(&selector).find_map(|el| {
                    let href = el
                        .value()
                        .attr("href")
                        .or_else(|| el.select(&ANCHORS).next().and_then(|a| a.value().attr("href")))?;
                    resolve(href)
                });
                if found.is_some() {
                    return found;
                }
            }
            Err(e) => debug!("Bad next_page selector {}: {:?}", css, e),
        }
    }

    if let Some(next) = document
        .select(&REL_NEXT)
        .find_map(|el| el.value().attr("href").and_then(resolve))
    {
        return Some(next);
    }

    if let Some(next) = document
        .select(&ANCHORS)
        .filter(|a| looks_like_next(a))
        .find_map(|a| a.value().attr("href").and_then(resolve))
    {
        return Some(next);
    }

    let wanted = current_page.saturating_add(1).to_string();
    if let Some(next) = document
        .select(&ANCHORS)
        .filter(|a| text::element_text(a) == wanted && in_pagination(a))
        .find_map(|a| a.value().attr("href").and_then(resolve))
    {
        return Some(next);
    }

    site.page_param
        .as_deref()
        .and_then(|param| with_page_param(current, param))
}

fn resolve_link(current: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.to_lowercase().starts_with("javascript:") {
        return None;
    }
    let url = current.join(href).ok()?;
    if !matches!(url.scheme(), "http" | "https") || page_key(&url) == page_key(current) {
        return None;
    }
    Some(url)
}

fn looks_like_next(anchor: &ElementRef) -> bool {
    let el = anchor.value();
    let class = el.attr("class").unwrap_or("").to_lowercase();
    if class.contains("disabled") || el.attr("aria-disabled") == Some("true") {
        return false;
    }

    let label = text::element_text(anchor).to_lowercase();
    if NEXT_TEXTS.contains(&label.as_str()) {
        return true;
    }
    if el
        .attr("aria-label")
        .is_some_and(|aria| aria.to_lowercase().contains("next"))
    {
        return true;
    }
    class.split_whitespace().any(|c| c == "next" || c.ends_with("-next") || c.starts_with("next-"))
}

fn in_pagination(anchor: &ElementRef) -> bool {
    anchor.ancestors().filter_map(ElementRef::wrap).take(4).any(|el| {
        let el = el.value();
        el.name() == "nav"
            || ["class", "id"]
                .iter()
                .filter_map(|attr| el.attr(attr))
                .any(|value| value.to_lowercase().contains("pag"))
    })
}

/// `current` with its page parameter incremented (missing counts as page 1).
/// `None` once the counter cannot go any higher.
fn with_page_param(current: &Url, param: &str) -> Option<Url> {
    let next_value = current
        .query_pairs()
        .find(|(key, _)| key == param)
        .and_then(|(_, value)| value.parse::<u32>().ok())
        .unwrap_or(1)
        .checked_add(1)?;

    let pairs: Vec<(String, String)> = current
        .query_pairs()
        .filter(|(key, _)| key != param)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut next = current.clone();
    {
        let mut query = next.query_pairs_mut();
        query.clear();
        for (key, value) in &pairs {
            query.append_pair(key, value);
        }
        query.append_pair(param, &next_value.to_string());
    }
    Some(next)
}
