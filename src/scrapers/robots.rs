//! robots.txt handling.
//!
//! Rules are fetched once per origin and cached for the lifetime of the run.
//! A robots.txt that cannot be fetched means everything is allowed. Each
//! origin has its own cell, so a slow robots.txt only holds up its own site.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;
use url::Url;

/// Parsed rules for one user agent.
#[derive(Debug, Clone, Default)]
pub struct RobotsRules {
    allow: Vec<String>,
    disallow: Vec<String>,
    crawl_delay: Option<Duration>,
}

impl RobotsRules {
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse a robots.txt body, preferring a group naming our agent over `*`.
    pub fn parse(content: &str, user_agent: &str) -> Self {
        let agent = user_agent.to_lowercase();
        let mut specific = Self::default();
        let mut wildcard = Self::default();
        let mut found_specific = false;

        // Agents named by the current group; reset when rules follow a new User-agent line.
        let mut group_agents: Vec<String> = Vec::new();
        let mut in_rules = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((directive, value)) = line.split_once(':') else {
                continue;
            };
            let directive = directive.trim().to_lowercase();
            let value = value.trim();

            if directive == "user-agent" {
                if in_rules {
                    group_agents.clear();
                    in_rules = false;
                }
                group_agents.push(value.to_lowercase());
                continue;
            }

            in_rules = true;
            let applies_specific = group_agents
                .iter()
                .any(|a| a != "*" && !a.is_empty() && agent.contains(a.as_str()));
            let applies_wildcard = group_agents.iter().any(|a| a == "*");
            if applies_specific {
                found_specific = true;
            }

            let mut targets: Vec<&mut Self> = Vec::new();
            if applies_specific {
                targets.push(&mut specific);
            }
            if applies_wildcard {
                targets.push(&mut wildcard);
            }

            for rules in targets {
                match directive.as_str() {
                    "allow" if !value.is_empty() => rules.allow.push(value.to_string()),
                    // An empty Disallow allows everything.
                    "disallow" if !value.is_empty() => rules.disallow.push(value.to_string()),
                    "crawl-delay" => {
                        if let Ok(secs) = value.parse::<f64>() {
                            if secs.is_finite() && secs > 0.0 {
                                rules.crawl_delay = Some(Duration::from_secs_f64(secs.min(60.0)));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if found_specific {
            specific
        } else {
            wildcard
        }
    }

    /// Longest matching rule wins; ties go to allow.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| path_matches(path, p))
                .map(|p| p.len())
                .max()
                .unwrap_or(0)
        };
        let allow = longest(&self.allow);
        let disallow = longest(&self.disallow);
        disallow == 0 || allow >= disallow
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }
}

/// Prefix match with `*` wildcards and an optional `$` end anchor.
fn path_matches(path: &str, pattern: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    if !path.starts_with(first) {
        return false;
    }
    let mut rest = &path[first.len()..];
    let mut last_part = first;
    let mut had_wildcard = false;

    for part in parts {
        had_wildcard = true;
        last_part = part;
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    if !anchored {
        return true;
    }
    if had_wildcard && last_part.is_empty() {
        return true;
    }
    if had_wildcard {
        return path.ends_with(last_part);
    }
    rest.is_empty()
}

/// Verdict for a single URL.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub crawl_delay: Option<Duration>,
}

/// Per-origin robots.txt cache shared by all site workers.
pub struct RobotsCache {
    client: Client,
    user_agent: String,
    entries: Mutex<HashMap<String, Arc<OnceCell<Arc<RobotsRules>>>>>,
}

impl RobotsCache {
    pub fn new(client: Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn check(&self, url: &Url) -> RobotsVerdict {
        let rules = self.rules_for(url).await;
        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        RobotsVerdict {
            allowed: rules.is_allowed(&path),
            crawl_delay: rules.crawl_delay(),
        }
    }

    async fn rules_for(&self, url: &Url) -> Arc<RobotsRules> {
        let origin = url.origin().ascii_serialization();
        let cell = self.entries.lock().await.entry(origin.clone()).or_default().clone();
        let rules = cell
            .get_or_init(|| async { Arc::new(self.fetch_rules(&origin).await) })
            .await
            .clone();
        rules
    }

    async fn fetch_rules(&self, origin: &str) -> RobotsRules {
        let robots_url = format!("{origin}/robots.txt");
        let response = self
            .client
            .get(&robots_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => {
                    debug!("Loaded {}", robots_url);
                    RobotsRules::parse(&body, &self.user_agent)
                }
                Err(_) => RobotsRules::allow_all(),
            },
            Ok(response) => {
                debug!("{} returned {}, allowing all", robots_url, response.status());
                RobotsRules::allow_all()
            }
            Err(e) => {
                debug!("Could not fetch {}: {}", robots_url, e);
                RobotsRules::allow_all()
            }
        }
    }

    /// Pre-seed rules for an origin.
    pub async fn insert(&self, origin: &str, rules: RobotsRules) {
        let cell = OnceCell::new_with(Some(Arc::new(rules)));
        self.entries.lock().await.insert(origin.to_string(), Arc::new(cell));
    }
}
