use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::BackendKind;
use crate::error::BackendFailure;

/// Body and metadata returned by a backend.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub body: String,
    pub status: Option<u16>,
    pub final_url: String,
}

/// Common trait for all page fetch backends
/// The strategy manager tries these in the configured order.
#[async_trait]
pub trait FetchBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Backends missing required configuration are skipped, not failed.
    fn is_configured(&self) -> bool {
        true
    }

    /// Fetch one URL, giving up after `timeout`.
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedContent, BackendFailure>;
}
