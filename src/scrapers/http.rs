use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::traits::{FetchBackend, FetchedContent};
use super::BackendKind;
use crate::config::FetchSettings;
use crate::error::{BackendFailure, FailureClass};

/// Plain HTTP backend, first in the default chain.
pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        Ok(Self {
            client: build_client(&settings.user_agent, Duration::from_secs(settings.http_timeout_secs.max(1)))?,
        })
    }

    /// Shared with the robots cache so both use one connection pool.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

pub(crate) fn build_client(user_agent: &str, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .user_agent(user_agent)
        .gzip(true)
        .brotli(true)
        .build()
        .context("Failed to create HTTP client")
}

pub(crate) fn classify_error(error: &reqwest::Error) -> BackendFailure {
    let class = if error.is_timeout() {
        FailureClass::Timeout
    } else if let Some(status) = error.status() {
        FailureClass::from_status(status.as_u16())
    } else {
        FailureClass::Connection
    };
    BackendFailure::new(class, error.to_string())
}

/// Read a response, mapping non-2xx and blank bodies to failures.
pub(crate) async fn read_response(response: reqwest::Response) -> Result<FetchedContent, BackendFailure> {
    let status = response.status();
    let final_url = response.url().to_string();

    if !status.is_success() {
        return Err(BackendFailure::new(
            FailureClass::from_status(status.as_u16()),
            format!("status {status}"),
        ));
    }

    let body = response.text().await.map_err(|e| classify_error(&e))?;
    debug!("Downloaded {} bytes from {}", body.len(), final_url);

    if body.trim().is_empty() {
        return Err(BackendFailure::new(FailureClass::EmptyBody, "response body is empty"));
    }

    Ok(FetchedContent {
        body,
        status: Some(status.as_u16()),
        final_url,
    })
}

#[async_trait]
impl FetchBackend for HttpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedContent, BackendFailure> {
        let response = self
            .client
            .get(url.as_str())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_error(&e))?;

        read_response(response).await
    }
}
