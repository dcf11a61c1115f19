//! Run configuration loaded from TOML.
//!
//! Every section has defaults, so a file that only lists `[[sites]]` is a
//! complete configuration.

mod site;

pub use site::{ParserKind, Selectors, SiteConfig};

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geocode::GeocodeConfig;
use crate::pipeline::{DedupConfig, QualityWeights, TransformConfig, ValidationBounds};
use crate::scrapers::BackendKind;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Upper bound on concurrent site workers.
pub const MAX_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Sites crawled at the same time.
    pub concurrency: usize,
    /// Global wall-clock budget; the run is cancelled when it elapses.
    pub time_budget_secs: Option<u64>,
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            time_budget_secs: None,
            output_dir: PathBuf::from("output"),
        }
    }
}

impl RunConfig {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Default backend order, overridable per site.
    pub order: Vec<BackendKind>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub browser_timeout_secs: u64,
    pub proxy_timeout_secs: u64,
    /// Retries per backend for transient failures.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub respect_robots: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            order: vec![BackendKind::Http, BackendKind::Browser, BackendKind::Proxy],
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 20,
            browser_timeout_secs: 45,
            proxy_timeout_secs: 60,
            max_retries: 2,
            backoff_base_ms: 500,
            respect_robots: true,
        }
    }
}

impl FetchSettings {
    pub fn timeout_for(&self, kind: BackendKind) -> Duration {
        let secs = match kind {
            BackendKind::Http => self.http_timeout_secs,
            BackendKind::Browser => self.browser_timeout_secs,
            BackendKind::Proxy => self.proxy_timeout_secs,
        };
        Duration::from_secs(secs.max(1))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub enabled: bool,
    /// Concurrent tabs across all site workers.
    pub max_instances: usize,
    /// How long a worker waits for a free slot before falling back.
    pub pool_wait_secs: u64,
    /// Extra time after navigation for client-side rendering.
    pub settle_ms: u64,
    pub wait_for_selector: Option<String>,
    pub chrome_path: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_instances: 2,
            pool_wait_secs: 30,
            settle_ms: 1500,
            wait_for_selector: None,
            chrome_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub endpoint: String,
    /// Environment variable holding the API key. No key, no proxy backend.
    pub api_key_env: String,
    /// Ask the proxy to render JavaScript.
    pub render: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.scraperapi.com/".to_string(),
            api_key_env: "SCRAPER_API_KEY".to_string(),
            render: false,
        }
    }
}

impl ProxySettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub run: RunConfig,
    pub fetch: FetchSettings,
    pub browser: BrowserSettings,
    pub proxy: ProxySettings,
    pub geocode: GeocodeConfig,
    pub validation: ValidationBounds,
    pub dedup: DedupConfig,
    pub quality: QualityWeights,
    pub transform: TransformConfig,
    pub sites: Vec<SiteConfig>,
}

impl AppConfig {
    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut keys = HashSet::new();
        for site in &self.sites {
            if !keys.insert(site.key.as_str()) {
                return Err(ConfigError::DuplicateSite(site.key.clone()));
            }
            site.validate()?;
        }
        if self.enabled_sites().next().is_none() {
            return Err(ConfigError::NoSitesEnabled);
        }
        if self.fetch.order.is_empty() {
            return Err(ConfigError::InvalidSetting {
                key: "fetch.order",
                reason: "at least one backend is required".to_string(),
            });
        }
        if self.geocode.min_interval_ms < 1000 {
            return Err(ConfigError::InvalidSetting {
                key: "geocode.min_interval_ms",
                reason: "must be at least 1000".to_string(),
            });
        }
        self.dedup.validate()?;
        self.validation.validate()?;
        Ok(())
    }

    pub fn enabled_sites(&self) -> impl Iterator<Item = &SiteConfig> {
        self.sites.iter().filter(|site| site.enabled)
    }

    /// Keep only the named sites enabled. Unknown keys are a config error.
    pub fn restrict_to(&mut self, keys: &[String]) -> Result<(), ConfigError> {
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys {
            if !self.sites.iter().any(|site| &site.key == key) {
                return Err(ConfigError::InvalidSite {
                    site: key.clone(),
                    reason: "not defined in config".to_string(),
                });
            }
        }
        for site in &mut self.sites {
            site.enabled = site.enabled && keys.contains(&site.key);
        }
        self.validate()
    }

    pub fn site(&self, key: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|site| site.key == key)
    }
}
