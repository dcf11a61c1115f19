//! Declarative per-site records.
//!
//! A site is pure data: where to start, which selectors to try and how
//! politely to crawl. Every selector is optional; a missing one means the
//! extraction engine falls back to its heuristics for that field.

use std::time::Duration;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::scrapers::BackendKind;

/// How listings are pulled out of a fetched page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParserKind {
    /// Selectors with heuristic fallbacks.
    #[default]
    Generic,
    /// JSON-LD `ItemList`/`Offer` objects first, generic when the page has none.
    JsonLd,
}

/// CSS selector hints, one per field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub card: Option<String>,
    pub title: Option<String>,
    pub price: Option<String>,
    pub location: Option<String>,
    pub bedrooms: Option<String>,
    pub bathrooms: Option<String>,
    pub property_type: Option<String>,
    pub description: Option<String>,
    pub images: Option<String>,
    pub link: Option<String>,
    pub next_page: Option<String>,
}

impl Selectors {
    fn entries(&self) -> [(&'static str, &Option<String>); 11] {
        [
            ("card", &self.card),
            ("title", &self.title),
            ("price", &self.price),
            ("location", &self.location),
            ("bedrooms", &self.bedrooms),
            ("bathrooms", &self.bathrooms),
            ("property_type", &self.property_type),
            ("description", &self.description),
            ("images", &self.images),
            ("link", &self.link),
            ("next_page", &self.next_page),
        ]
    }
}

fn default_true() -> bool {
    true
}

fn default_currency() -> String {
    "NGN".to_string()
}

fn default_page_cap() -> u32 {
    10
}

fn default_priority() -> u32 {
    100
}

fn default_request_delay_ms() -> u64 {
    1500
}

fn default_max_empty_pages() -> u32 {
    2
}

/// One source website.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Short stable identifier, used as `source_site` on every listing.
    pub key: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_urls: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub parser: ParserKind,
    /// ISO code assumed when a price carries no currency marker.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Lower wins when two duplicates were scraped at the same instant.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_page_cap")]
    pub page_cap: u32,
    /// Overrides the global backend order for this site.
    #[serde(default)]
    pub fetch_order: Option<Vec<BackendKind>>,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    /// Query parameter used to build page N+1 when no next link is found.
    #[serde(default)]
    pub page_param: Option<String>,
    #[serde(default = "default_max_empty_pages")]
    pub max_empty_pages: u32,
    #[serde(default)]
    pub selectors: Selectors,
}

impl SiteConfig {
    /// Minimal enabled site with defaults everywhere else.
    pub fn new(key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            base_urls: vec![base_url.into()],
            enabled: true,
            parser: ParserKind::default(),
            currency: default_currency(),
            priority: default_priority(),
            page_cap: default_page_cap(),
            fetch_order: None,
            request_delay_ms: default_request_delay_ms(),
            page_param: None,
            max_empty_pages: default_max_empty_pages(),
            selectors: Selectors::default(),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn fetch_order<'a>(&'a self, default: &'a [BackendKind]) -> &'a [BackendKind] {
        self.fetch_order.as_deref().unwrap_or(default)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSite {
            site: self.key.clone(),
            reason,
        };

        if self.key.trim().is_empty() {
            return Err(invalid("empty site key".to_string()));
        }
        if !self.enabled {
            return Ok(());
        }
        if self.base_urls.is_empty() {
            return Err(invalid("no base_urls".to_string()));
        }
        for base in &self.base_urls {
            let url = Url::parse(base).map_err(|e| invalid(format!("bad base url {base}: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(invalid(format!("unsupported scheme in {base}")));
            }
        }
        if self.page_cap == 0 {
            return Err(invalid("page_cap must be at least 1".to_string()));
        }
        if self.max_empty_pages == 0 {
            return Err(invalid("max_empty_pages must be at least 1".to_string()));
        }
        if let Some(order) = &self.fetch_order {
            if order.is_empty() {
                return Err(invalid("fetch_order is empty".to_string()));
            }
        }
        for (field, selector) in self.selectors.entries() {
            if let Some(css) = selector {
                Selector::parse(css)
                    .map_err(|e| invalid(format!("selector {field} `{css}`: {e:?}")))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_site_is_valid() {
        let site = SiteConfig::new("pp", "https://example.com/for-sale");
        assert!(site.validate().is_ok());
        assert_eq!(site.display_name(), "pp");
        assert_eq!(site.currency, "NGN");
    }

    #[test]
    fn test_rejects_bad_selector() {
        let mut site = SiteConfig::new("pp", "https://example.com/");
        site.selectors.price = Some("div[[".to_string());
        let err = site.validate().unwrap_err();
        assert!(err.to_string().contains("selector price"));
    }

    #[test]
    fn test_rejects_missing_base_url() {
        let mut site = SiteConfig::new("pp", "https://example.com/");
        site.base_urls.clear();
        assert!(site.validate().is_err());

        site.enabled = false;
        assert!(site.validate().is_ok());
    }

    #[test]
    fn test_fetch_order_override() {
        let mut site = SiteConfig::new("pp", "https://example.com/");
        let default = [BackendKind::Http, BackendKind::Browser];
        assert_eq!(site.fetch_order(&default), &default);

        site.fetch_order = Some(vec![BackendKind::Proxy]);
        assert_eq!(site.fetch_order(&default), &[BackendKind::Proxy]);
    }
}
