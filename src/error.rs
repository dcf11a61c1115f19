//! Typed errors for the crawl pipeline.
//!
//! Run-level problems (`ConfigError`) stop a run before any fetch is issued.
//! Everything else is per URL or per listing and is reported in the manifest
//! instead of being raised.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::scrapers::BackendKind;

/// Fatal configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no sites enabled")]
    NoSitesEnabled,

    #[error("duplicate site key: {0}")]
    DuplicateSite(String),

    #[error("site {site}: {reason}")]
    InvalidSite { site: String, reason: String },

    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

/// Why a single backend attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum FailureClass {
    Timeout,
    Connection,
    ServerError { status: u16 },
    /// 401/403/429 style responses; another backend may get through.
    Blocked { status: u16 },
    /// 404/410 and friends. The URL is gone for every backend.
    NotFound { status: u16 },
    ClientError { status: u16 },
    EmptyBody,
    PoolExhausted,
    Unavailable,
}

impl FailureClass {
    /// Worth retrying on the same backend.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection | Self::ServerError { .. } | Self::Blocked { status: 429 }
        )
    }

    /// Abandon the URL without trying other backends.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 | 429 => Self::Blocked { status },
            404 | 410 => Self::NotFound { status },
            500..=599 => Self::ServerError { status },
            _ => Self::ClientError { status },
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connection => write!(f, "connection error"),
            Self::ServerError { status } => write!(f, "server error {status}"),
            Self::Blocked { status } => write!(f, "blocked ({status})"),
            Self::NotFound { status } => write!(f, "not found ({status})"),
            Self::ClientError { status } => write!(f, "client error {status}"),
            Self::EmptyBody => write!(f, "empty body"),
            Self::PoolExhausted => write!(f, "browser pool exhausted"),
            Self::Unavailable => write!(f, "backend unavailable"),
        }
    }
}

/// A failed attempt as reported by a backend.
#[derive(Debug, Clone, Error)]
#[error("{class}: {message}")]
pub struct BackendFailure {
    pub class: FailureClass,
    pub message: String,
}

impl BackendFailure {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

/// One entry of the attempt log carried by fetch results and errors.
#[derive(Debug, Clone, Serialize)]
pub struct FetchAttempt {
    pub backend: BackendKind,
    pub attempt: u32,
    pub latency_ms: u64,
    /// `None` on success.
    pub failure: Option<FailureClass>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorReason {
    /// Every configured backend failed.
    Exhausted,
    /// The URL answered with a status no backend can fix.
    Permanent(FailureClass),
    /// Every backend that answered was blocked.
    RepeatedlyBlocked,
    RobotsDisallowed,
    NoBackendConfigured,
    Cancelled,
}

impl fmt::Display for FetchErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => write!(f, "all fetch backends failed"),
            Self::Permanent(class) => write!(f, "permanent failure: {class}"),
            Self::RepeatedlyBlocked => write!(f, "blocked by every backend"),
            Self::RobotsDisallowed => write!(f, "disallowed by robots.txt"),
            Self::NoBackendConfigured => write!(f, "no fetch backend configured"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Returned by the fetch strategy manager when a URL could not be fetched.
#[derive(Debug, Clone, Error)]
#[error("fetch {url} failed: {reason} after {} attempt(s)", attempts.len())]
pub struct FetchError {
    pub url: String,
    pub reason: FetchErrorReason,
    pub attempts: Vec<FetchAttempt>,
}

impl FetchError {
    /// Permanent failures count separately from transient ones in the manifest.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self.reason,
            FetchErrorReason::Permanent(_)
                | FetchErrorReason::RepeatedlyBlocked
                | FetchErrorReason::RobotsDisallowed
        )
    }
}

/// Why the normalizer refused a raw listing.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    #[error("no usable title, price or location")]
    NoCoreFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(FailureClass::from_status(503).is_transient());
        assert!(FailureClass::from_status(429).is_transient());
        assert!(!FailureClass::from_status(403).is_transient());
        assert!(FailureClass::from_status(404).is_permanent());
        assert!(FailureClass::from_status(410).is_permanent());
        assert!(!FailureClass::from_status(403).is_permanent());
        assert_eq!(
            FailureClass::from_status(418),
            FailureClass::ClientError { status: 418 }
        );
    }

    #[test]
    fn test_fetch_error_permanence() {
        let err = FetchError {
            url: "https://example.com".to_string(),
            reason: FetchErrorReason::RobotsDisallowed,
            attempts: Vec::new(),
        };
        assert!(err.is_permanent());

        let err = FetchError {
            reason: FetchErrorReason::Exhausted,
            ..err
        };
        assert!(!err.is_permanent());
    }
}
