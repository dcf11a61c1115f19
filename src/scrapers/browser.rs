use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, warn};
use url::Url;

use super::traits::{FetchBackend, FetchedContent};
use super::BackendKind;
use crate::config::BrowserSettings;
use crate::error::{BackendFailure, FailureClass};

/// Clicks the first cookie-consent button it finds.
const ACCEPT_COOKIES_JS: &str = r#"
const button = document.querySelector('button[id*="accept"], button[class*="accept"], button[id*="consent"], [aria-label*="Accept"]');
if (button) button.click();
"#;

/// Browser-based backend using headless Chrome
///
/// One Chrome process is launched lazily and shared by every site worker.
/// Tabs are capped by a semaphore; a worker that cannot get a slot within
/// `pool_wait_secs` gets `PoolExhausted` and the chain moves on.
pub struct BrowserBackend {
    settings: BrowserSettings,
    user_agent: String,
    browser: OnceCell<Browser>,
    launch_failed: AtomicBool,
    slots: Arc<Semaphore>,
}

impl BrowserBackend {
    pub fn new(settings: BrowserSettings, user_agent: impl Into<String>) -> Self {
        let slots = Arc::new(Semaphore::new(settings.max_instances.max(1)));
        Self {
            settings,
            user_agent: user_agent.into(),
            browser: OnceCell::new(),
            launch_failed: AtomicBool::new(false),
            slots,
        }
    }

    async fn browser(&self) -> Result<Browser, BackendFailure> {
        if self.launch_failed.load(Ordering::Relaxed) {
            return Err(BackendFailure::new(FailureClass::Unavailable, "chrome failed to launch earlier"));
        }

        let chrome_path = self.settings.chrome_path.clone();
        let result = self
            .browser
            .get_or_try_init(|| async move {
                tokio::task::spawn_blocking(move || launch(chrome_path))
                    .await
                    .context("browser launch task panicked")?
            })
            .await;

        match result {
            Ok(browser) => Ok(browser.clone()),
            Err(e) => {
                warn!("Headless browser unavailable: {:#}", e);
                self.launch_failed.store(true, Ordering::Relaxed);
                Err(BackendFailure::new(FailureClass::Unavailable, e.to_string()))
            }
        }
    }
}

fn launch(chrome_path: Option<PathBuf>) -> Result<Browser> {
    info!("Launching headless Chrome...");

    let options = LaunchOptions::default_builder()
        .headless(true)
        .path(chrome_path)
        .idle_browser_timeout(Duration::from_secs(300))
        .build()
        .context("Failed to build launch options")?;

    Browser::new(options).context("Failed to launch Chrome browser")
}

struct RenderRequest {
    url: String,
    user_agent: String,
    timeout: Duration,
    settle: Duration,
    wait_for_selector: Option<String>,
}

/// Open a tab, load the page, give scripts time to run and return the DOM.
/// The tab is closed on every path so failing pages do not pile up in Chrome.
fn render(browser: &Browser, request: &RenderRequest) -> Result<String> {
    let tab = browser.new_tab()?;
    run_then_close(&tab, |tab| load(tab, request), |tab| tab.close(true).map(|_| ()), &request.url)
}

fn run_then_close<T>(
    tab: &T,
    work: impl FnOnce(&T) -> Result<String>,
    close: impl FnOnce(&T) -> Result<()>,
    url: &str,
) -> Result<String> {
    let result = work(tab);
    if let Err(e) = close(tab) {
        warn!("Failed to close tab for {}: {:#}", url, e);
    }
    result
}

fn load(tab: &Tab, request: &RenderRequest) -> Result<String> {
    tab.set_default_timeout(request.timeout);
    tab.set_user_agent(&request.user_agent, None, None)?;

    tab.navigate_to(&request.url)?;
    tab.wait_until_navigated()?;

    if let Some(selector) = &request.wait_for_selector {
        if let Err(e) = tab.wait_for_element(selector) {
            debug!("Selector {} never appeared on {}: {}", selector, request.url, e);
        }
    }

    thread::sleep(request.settle);

    // Accept cookies if present
    if tab.evaluate(ACCEPT_COOKIES_JS, false).is_ok() {
        thread::sleep(Duration::from_millis(300));
    }

    tab.get_content()
}

#[async_trait]
impl FetchBackend for BrowserBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Browser
    }

    fn is_configured(&self) -> bool {
        self.settings.enabled
    }

    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedContent, BackendFailure> {
        let pool_wait = Duration::from_secs(self.settings.pool_wait_secs);
        let permit = match tokio::time::timeout(pool_wait, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(BackendFailure::new(FailureClass::Unavailable, "browser pool closed"));
            }
            Err(_) => {
                return Err(BackendFailure::new(
                    FailureClass::PoolExhausted,
                    format!("no browser slot within {pool_wait:?}"),
                ));
            }
        };

        let browser = self.browser().await?;
        let request = RenderRequest {
            url: url.to_string(),
            user_agent: self.user_agent.clone(),
            timeout,
            settle: Duration::from_millis(self.settings.settle_ms),
            wait_for_selector: self.settings.wait_for_selector.clone(),
        };

        // The permit travels with the blocking task so the slot stays taken
        // until Chrome is really done, even if we stop waiting first.
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            render(&browser, &request)
        });

        let budget = timeout + Duration::from_millis(self.settings.settle_ms) + Duration::from_secs(2);
        let html = match tokio::time::timeout(budget, task).await {
            Err(_) => {
                return Err(BackendFailure::new(FailureClass::Timeout, format!("render exceeded {budget:?}")));
            }
            Ok(Err(join_error)) => {
                return Err(BackendFailure::new(FailureClass::Unavailable, join_error.to_string()));
            }
            Ok(Ok(Err(e))) => {
                let message = format!("{e:#}");
                let class = if message.to_lowercase().contains("timeout") || message.contains("timed out") {
                    FailureClass::Timeout
                } else {
                    FailureClass::Connection
                };
                return Err(BackendFailure::new(class, message));
            }
            Ok(Ok(Ok(html))) => html,
        };

        if html.trim().is_empty() {
            return Err(BackendFailure::new(FailureClass::EmptyBody, "rendered page is empty"));
        }

        debug!("Rendered {} ({} bytes)", url, html.len());
        Ok(FetchedContent {
            body: html,
            status: None,
            final_url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_browser_is_unconfigured() {
        let settings = BrowserSettings {
            enabled: false,
            ..Default::default()
        };
        let backend = BrowserBackend::new(settings, "ua");
        assert!(!backend.is_configured());
        assert_eq!(backend.kind(), BackendKind::Browser);
    }

    #[test]
    fn test_tab_closed_when_load_fails() {
        let closed = AtomicBool::new(false);
        let result = run_then_close(
            &closed,
            |_| Err(anyhow::anyhow!("navigation failed")),
            |closed| {
                closed.store(true, Ordering::SeqCst);
                Ok(())
            },
            "https://example.com",
        );
        assert!(result.is_err());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_close_failure_keeps_rendered_page() {
        let result = run_then_close(
            &(),
            |_| Ok("<html></html>".to_string()),
            |_| Err(anyhow::anyhow!("tab already gone")),
            "https://example.com",
        );
        assert_eq!(result.unwrap(), "<html></html>");
    }

    #[tokio::test]
    async fn test_pool_exhaustion_reports_pool_exhausted() {
        let settings = BrowserSettings {
            max_instances: 1,
            pool_wait_secs: 0,
            ..Default::default()
        };
        let backend = BrowserBackend::new(settings, "ua");
        let _held = backend.slots.clone().acquire_owned().await.unwrap();

        let url = Url::parse("https://example.com").unwrap();
        let err = backend.fetch(&url, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.class, FailureClass::PoolExhausted);
    }
}
