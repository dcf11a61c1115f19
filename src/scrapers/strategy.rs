//! Fetch strategy manager.
//!
//! Walks the configured backend chain for one URL:
//! - transient failures (timeout, connection, 5xx, 429) retry the same
//!   backend with exponential backoff, then move on
//! - blocked responses, empty bodies and browser-pool exhaustion move on
//!   immediately
//! - 404/410 and robots.txt disallows abandon the URL
//!
//! Cancellation is checked before every attempt and cuts backoff sleeps
//! short. An attempt already in flight is allowed to finish.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::browser::BrowserBackend;
use super::http::HttpBackend;
use super::proxy::ProxyBackend;
use super::robots::RobotsCache;
use super::traits::FetchBackend;
use super::BackendKind;
use crate::config::{AppConfig, FetchSettings, SiteConfig};
use crate::error::{BackendFailure, FailureClass, FetchAttempt, FetchError, FetchErrorReason};

/// Longest single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Slack on top of a backend's own timeout before the manager gives up on it.
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// A successful fetch.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub content: String,
    pub backend: BackendKind,
    pub status: Option<u16>,
    pub final_url: String,
    pub attempts: Vec<FetchAttempt>,
    /// Crawl-delay advertised by robots.txt, if any.
    pub crawl_delay: Option<Duration>,
}

pub struct FetchStrategy {
    backends: Vec<Arc<dyn FetchBackend>>,
    settings: FetchSettings,
    robots: Option<Arc<RobotsCache>>,
}

impl FetchStrategy {
    pub fn new(backends: Vec<Arc<dyn FetchBackend>>, settings: FetchSettings) -> Self {
        Self {
            backends,
            settings,
            robots: None,
        }
    }

    pub fn with_robots(mut self, robots: Arc<RobotsCache>) -> Self {
        self.robots = Some(robots);
        self
    }

    /// Build the real HTTP, browser and proxy backends from configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let http = HttpBackend::new(&config.fetch)?;
        let robots = config
            .fetch
            .respect_robots
            .then(|| Arc::new(RobotsCache::new(http.client().clone(), config.fetch.user_agent.clone())));

        let browser = BrowserBackend::new(config.browser.clone(), config.fetch.user_agent.clone());
        let proxy = ProxyBackend::new(&config.proxy, &config.fetch)?;
        if !proxy.is_configured() {
            debug!("No proxy key in ${}, proxy backend disabled", config.proxy.api_key_env);
        }

        let mut backends: Vec<Arc<dyn FetchBackend>> = Vec::with_capacity(3);
        backends.push(Arc::new(http));
        backends.push(Arc::new(browser));
        backends.push(Arc::new(proxy));
        let mut strategy = Self::new(backends, config.fetch.clone());
        strategy.robots = robots;
        Ok(strategy)
    }

    fn backend(&self, kind: BackendKind) -> Option<&Arc<dyn FetchBackend>> {
        self.backends.iter().find(|b| b.kind() == kind)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.settings.backoff_base().saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Fetch `url` for `site`, trying each configured backend in order.
    pub async fn fetch(
        &self,
        url: &Url,
        site: &SiteConfig,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome, FetchError> {
        let fail = |reason: FetchErrorReason, attempts: Vec<FetchAttempt>| FetchError {
            url: url.to_string(),
            reason,
            attempts,
        };

        if cancel.is_cancelled() {
            return Err(fail(FetchErrorReason::Cancelled, Vec::new()));
        }

        let mut crawl_delay = None;
        if let Some(robots) = &self.robots {
            let verdict = robots.check(url).await;
            if !verdict.allowed {
                warn!(site = %site.key, url = %url, "Disallowed by robots.txt");
                return Err(fail(FetchErrorReason::RobotsDisallowed, Vec::new()));
            }
            crawl_delay = verdict.crawl_delay;
        }

        let mut attempts = Vec::new();
        let mut backends_tried = 0usize;
        let mut backends_blocked = 0usize;

        for &kind in site.fetch_order(&self.settings.order) {
            let Some(backend) = self.backend(kind) else {
                debug!("No {} backend registered, skipping", kind);
                continue;
            };
            if !backend.is_configured() {
                debug!("{} backend not configured, skipping", kind);
                continue;
            }
            backends_tried += 1;

            let timeout = self.settings.timeout_for(kind);
            let mut attempt = 0u32;
            let last_failure = loop {
                if cancel.is_cancelled() {
                    debug!(site = %site.key, url = %url, "Cancelled before {} attempt {}", kind, attempt + 1);
                    return Err(fail(FetchErrorReason::Cancelled, attempts));
                }
                attempt += 1;
                let started = Instant::now();
                let result = match tokio::time::timeout(timeout + TIMEOUT_GRACE, backend.fetch(url, timeout)).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendFailure::new(FailureClass::Timeout, "backend ignored its timeout")),
                };
                let latency_ms = started.elapsed().as_millis() as u64;

                match result {
                    Ok(content) => {
                        info!(
                            site = %site.key,
                            url = %url,
                            backend = %kind,
                            attempt,
                            latency_ms,
                            status = content.status,
                            "fetch ok"
                        );
                        attempts.push(FetchAttempt {
                            backend: kind,
                            attempt,
                            latency_ms,
                            failure: None,
                        });
                        return Ok(FetchOutcome {
                            content: content.body,
                            backend: kind,
                            status: content.status,
                            final_url: content.final_url,
                            attempts,
                            crawl_delay,
                        });
                    }
                    Err(failure) => {
                        warn!(
                            site = %site.key,
                            url = %url,
                            backend = %kind,
                            attempt,
                            latency_ms,
                            error = %failure,
                            "fetch attempt failed"
                        );
                        attempts.push(FetchAttempt {
                            backend: kind,
                            attempt,
                            latency_ms,
                            failure: Some(failure.class.clone()),
                        });

                        if failure.class.is_permanent() {
                            return Err(fail(FetchErrorReason::Permanent(failure.class), attempts));
                        }
                        if failure.class.is_transient() && attempt <= self.settings.max_retries {
                            tokio::select! {
                                _ = cancel.cancelled() => {
                                    return Err(fail(FetchErrorReason::Cancelled, attempts));
                                }
                                _ = tokio::time::sleep(self.backoff(attempt)) => continue,
                            }
                        }
                        break failure;
                    }
                }
            };

            if matches!(last_failure.class, FailureClass::Blocked { .. }) {
                backends_blocked += 1;
            }
        }

        let reason = if backends_tried == 0 {
            FetchErrorReason::NoBackendConfigured
        } else if backends_blocked == backends_tried {
            FetchErrorReason::RepeatedlyBlocked
        } else {
            FetchErrorReason::Exhausted
        };
        Err(fail(reason, attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::FetchedContent;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Backend that replays a script of results.
    struct Scripted {
        kind: BackendKind,
        configured: bool,
        script: Mutex<Vec<Result<&'static str, FailureClass>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(kind: BackendKind, script: Vec<Result<&'static str, FailureClass>>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                configured: true,
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            })
        }

        fn unconfigured(kind: BackendKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                configured: false,
                script: Mutex::new(Vec::new()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FetchBackend for Scripted {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchedContent, BackendFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    Err(FailureClass::Connection)
                } else {
                    script.remove(0)
                }
            };
            match next {
                Ok(body) => Ok(FetchedContent {
                    body: body.to_string(),
                    status: Some(200),
                    final_url: url.to_string(),
                }),
                Err(class) => Err(BackendFailure::new(class, "scripted")),
            }
        }
    }

    fn chain(backends: &[&Arc<Scripted>]) -> Vec<Arc<dyn FetchBackend>> {
        backends
            .iter()
            .map(|b| Arc::clone(*b) as Arc<dyn FetchBackend>)
            .collect()
    }

    fn settings() -> FetchSettings {
        FetchSettings {
            max_retries: 2,
            backoff_base_ms: 1,
            ..Default::default()
        }
    }

    fn site() -> SiteConfig {
        SiteConfig::new("test", "https://example.com/")
    }

    fn url() -> Url {
        Url::parse("https://example.com/list").unwrap()
    }

    #[tokio::test]
    async fn test_first_backend_success() {
        let http = Scripted::new(BackendKind::Http, vec![Ok("<html>ok</html>")]);
        let browser = Scripted::new(BackendKind::Browser, vec![]);
        let strategy = FetchStrategy::new(chain(&[&http, &browser]), settings());

        let outcome = strategy.fetch(&url(), &site(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.backend, BackendKind::Http);
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(browser.calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_retries_then_succeeds() {
        let http = Scripted::new(
            BackendKind::Http,
            vec![Err(FailureClass::Timeout), Err(FailureClass::ServerError { status: 503 }), Ok("<p>x</p>")],
        );
        let strategy = FetchStrategy::new(chain(&[&http]), settings());

        let outcome = strategy.fetch(&url(), &site(), &CancellationToken::new()).await.unwrap();
        assert_eq!(http.calls(), 3);
        assert_eq!(outcome.attempts.len(), 3);
    }

    #[tokio::test]
    async fn test_blocked_falls_back_without_retry() {
        let http = Scripted::new(BackendKind::Http, vec![Err(FailureClass::Blocked { status: 403 })]);
        let browser = Scripted::new(BackendKind::Browser, vec![Ok("<html>rendered</html>")]);
        let strategy = FetchStrategy::new(chain(&[&http, &browser]), settings());

        let outcome = strategy.fetch(&url(), &site(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.backend, BackendKind::Browser);
        assert_eq!(http.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_permanent() {
        let http = Scripted::new(BackendKind::Http, vec![Err(FailureClass::NotFound { status: 404 })]);
        let browser = Scripted::new(BackendKind::Browser, vec![Ok("never")]);
        let strategy = FetchStrategy::new(chain(&[&http, &browser]), settings());

        let err = strategy.fetch(&url(), &site(), &CancellationToken::new()).await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(http.calls(), 1);
        assert_eq!(browser.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_error_with_attempts() {
        let http = Scripted::new(BackendKind::Http, vec![]);
        let browser = Scripted::new(BackendKind::Browser, vec![Err(FailureClass::EmptyBody)]);
        let proxy = Scripted::unconfigured(BackendKind::Proxy);
        let strategy = FetchStrategy::new(chain(&[&http, &browser, &proxy]), settings());

        let err = strategy.fetch(&url(), &site(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.reason, FetchErrorReason::Exhausted);
        // 1 + 2 retries on http, 1 on browser, none on the unconfigured proxy
        assert_eq!(err.attempts.len(), 4);
        assert_eq!(proxy.calls(), 0);
    }

    #[tokio::test]
    async fn test_blocked_everywhere() {
        let http = Scripted::new(BackendKind::Http, vec![Err(FailureClass::Blocked { status: 403 })]);
        let browser = Scripted::new(BackendKind::Browser, vec![Err(FailureClass::Blocked { status: 403 })]);
        let strategy = FetchStrategy::new(chain(&[&http, &browser]), settings());

        let err = strategy.fetch(&url(), &site(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.reason, FetchErrorReason::RepeatedlyBlocked);
        assert!(err.is_permanent());
    }

    #[tokio::test]
    async fn test_nothing_configured() {
        let strategy = FetchStrategy::new(chain(&[&Scripted::unconfigured(BackendKind::Http)]), settings());
        let err = strategy.fetch(&url(), &site(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.reason, FetchErrorReason::NoBackendConfigured);
    }

    #[tokio::test]
    async fn test_site_order_override() {
        let http = Scripted::new(BackendKind::Http, vec![Ok("http")]);
        let proxy = Scripted::new(BackendKind::Proxy, vec![Ok("proxy")]);
        let strategy = FetchStrategy::new(chain(&[&http, &proxy]), settings());

        let mut site = site();
        site.fetch_order = Some(vec![BackendKind::Proxy, BackendKind::Http]);
        let outcome = strategy.fetch(&url(), &site, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.backend, BackendKind::Proxy);
        assert_eq!(http.calls(), 0);
    }

    /// Cancels the run on its first call, then times out.
    struct CancelsRun {
        kind: BackendKind,
        cancel: CancellationToken,
        calls: AtomicU32,
    }

    #[async_trait]
    impl FetchBackend for CancelsRun {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn fetch(&self, _url: &Url, _timeout: Duration) -> Result<FetchedContent, BackendFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.cancel.cancel();
            Err(BackendFailure::new(FailureClass::Timeout, "timed out"))
        }
    }

    #[tokio::test]
    async fn test_cancel_mid_fetch_stops_retries_and_fallbacks() {
        let cancel = CancellationToken::new();
        let http = Arc::new(CancelsRun {
            kind: BackendKind::Http,
            cancel: cancel.clone(),
            calls: AtomicU32::new(0),
        });
        let browser = Scripted::new(BackendKind::Browser, vec![Ok("never")]);
        let proxy = Scripted::new(BackendKind::Proxy, vec![Ok("never")]);
        let mut backends = vec![http.clone() as Arc<dyn FetchBackend>];
        backends.extend(chain(&[&browser, &proxy]));
        let strategy = FetchStrategy::new(backends, settings());

        let err = strategy.fetch(&url(), &site(), &cancel).await.unwrap_err();
        assert_eq!(err.reason, FetchErrorReason::Cancelled);
        assert_eq!(http.calls.load(Ordering::SeqCst), 1);
        assert_eq!(browser.calls() + proxy.calls(), 0);
        assert_eq!(err.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_cuts_backoff_short() {
        let http = Scripted::new(BackendKind::Http, vec![Err(FailureClass::Timeout), Ok("late")]);
        let strategy = FetchStrategy::new(
            chain(&[&http]),
            FetchSettings {
                max_retries: 2,
                backoff_base_ms: 60_000,
                ..Default::default()
            },
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = strategy.fetch(&url(), &site(), &cancel).await.unwrap_err();
        assert_eq!(err.reason, FetchErrorReason::Cancelled);
        assert_eq!(http.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch_calls_nothing() {
        let http = Scripted::new(BackendKind::Http, vec![Ok("never")]);
        let strategy = FetchStrategy::new(chain(&[&http]), settings());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = strategy.fetch(&url(), &site(), &cancel).await.unwrap_err();
        assert_eq!(err.reason, FetchErrorReason::Cancelled);
        assert!(err.attempts.is_empty());
        assert_eq!(http.calls(), 0);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let strategy = FetchStrategy::new(
            Vec::new(),
            FetchSettings {
                backoff_base_ms: 500,
                ..Default::default()
            },
        );
        assert_eq!(strategy.backoff(1), Duration::from_millis(500));
        assert_eq!(strategy.backoff(2), Duration::from_millis(1000));
        assert_eq!(strategy.backoff(3), Duration::from_millis(2000));
        assert_eq!(strategy.backoff(40), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_robots_disallow_skips_backends() {
        let http = Scripted::new(BackendKind::Http, vec![Ok("never")]);
        let robots = Arc::new(RobotsCache::new(reqwest::Client::new(), "scout"));
        robots
            .insert(
                "https://example.com",
                super::super::robots::RobotsRules::parse("User-agent: *\nDisallow: /list", "scout"),
            )
            .await;
        let strategy = FetchStrategy::new(chain(&[&http]), settings()).with_robots(robots);

        let err = strategy.fetch(&url(), &site(), &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.reason, FetchErrorReason::RobotsDisallowed);
        assert_eq!(http.calls(), 0);
    }
}
