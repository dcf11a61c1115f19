//! Third-party fetch proxy, last resort in the default chain.
//!
//! Speaks the common `?api_key=..&url=..` query protocol used by hosted
//! scraping APIs. Without a key the backend reports itself unconfigured.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::http::{build_client, classify_error, read_response};
use super::traits::{FetchBackend, FetchedContent};
use super::BackendKind;
use crate::config::{FetchSettings, ProxySettings};
use crate::error::{BackendFailure, FailureClass};

pub struct ProxyBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    render: bool,
}

impl ProxyBackend {
    pub fn new(settings: &ProxySettings, fetch: &FetchSettings) -> Result<Self> {
        Self::with_key(settings, fetch, settings.api_key())
    }

    pub fn with_key(settings: &ProxySettings, fetch: &FetchSettings, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_client(&fetch.user_agent, Duration::from_secs(fetch.proxy_timeout_secs.max(1)))?,
            endpoint: settings.endpoint.clone(),
            api_key,
            render: settings.render,
        })
    }

    fn request_url(&self, key: &str, target: &Url) -> Result<Url, BackendFailure> {
        let mut params = vec![("api_key", key), ("url", target.as_str())];
        if self.render {
            params.push(("render", "true"));
        }
        Url::parse_with_params(&self.endpoint, &params).map_err(|e| {
            BackendFailure::new(FailureClass::Unavailable, format!("bad proxy endpoint: {e}"))
        })
    }
}

#[async_trait]
impl FetchBackend for ProxyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Proxy
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedContent, BackendFailure> {
        let Some(key) = self.api_key.as_deref() else {
            return Err(BackendFailure::new(FailureClass::Unavailable, "no proxy api key"));
        };
        let request_url = self.request_url(key, url)?;

        let response = self
            .client
            .get(request_url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        let mut content = read_response(response).await?;
        // The proxy's own URL is meaningless for link resolution.
        content.final_url = url.to_string();
        Ok(content)
    }
}
