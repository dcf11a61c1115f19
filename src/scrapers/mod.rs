pub mod browser;
pub mod http;
pub mod pagination;
pub mod proxy;
pub mod robots;
pub mod strategy;
pub mod traits;

pub use browser::BrowserBackend;
pub use http::HttpBackend;
pub use pagination::{find_next_page, CrawlItem, CrawledPage, PaginationCrawler, StopReason};
pub use proxy::ProxyBackend;
pub use robots::{RobotsCache, RobotsRules};
pub use strategy::{FetchOutcome, FetchStrategy};
pub use traits::{FetchBackend, FetchedContent};

use std::fmt;

use serde::{Deserialize, Serialize};

/// The three ways of getting a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Http,
    Browser,
    Proxy,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Http => "http",
            Self::Browser => "browser",
            Self::Proxy => "proxy",
        };
        f.write_str(name)
    }
}
