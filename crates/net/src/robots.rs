use std::time::{Duration, Instant};

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use tracing::debug;

const TTL: Duration = Duration::from_secs(24 * 60 * 60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct Robots {
    pub raw: String,
    pub sitemaps: Vec<String>,
    pub crawl_delay_ms: Option<u64>,
    pub default_crawl_delay_ms: u64,
}

impl Robots {
    /// Permissive default used whenever robots.txt cannot be fetched or
    /// parsed: everything allowed, no sitemaps, the caller's default delay.
    pub fn permissive(default_delay_ms: u64) -> Self {
        Self {
            raw: String::new(),
            sitemaps: Vec::new(),
            crawl_delay_ms: None,
            default_crawl_delay_ms: default_delay_ms,
        }
    }

    pub fn is_allowed(&self, user_agent: &str, path: &str) -> bool {
        if self.raw.is_empty() {
            return true;
        }
        DefaultMatcher::default().one_agent_allowed_by_robots(&self.raw, user_agent, path)
    }

    pub fn effective_crawl_delay_ms(&self) -> u64 {
        self.crawl_delay_ms.unwrap_or(self.default_crawl_delay_ms)
    }

    /// Extracts `Sitemap:` and the most-specific group's `Crawl-delay:`.
    /// Allow/disallow matching itself is delegated to `is_allowed`, which
    /// uses Google's robots-matcher semantics via the `robotstxt` crate.
    fn parse(raw: &str, default_delay_ms: u64, user_agent: &str) -> Self {
        let mut sitemaps = Vec::new();
        let mut crawl_delay_ms = None;
        let mut group_uas: Vec<String> = Vec::new();
        let mut group_is_active = false;
        let mut prev_was_ua_line = false;
        let bot_name = user_agent
            .split('/')
            .next()
            .unwrap_or(user_agent)
            .trim()
            .to_ascii_lowercase();

        for line in raw.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "sitemap" => sitemaps.push(value.to_string()),
                "user-agent" => {
                    // Consecutive user-agent lines extend the same group;
                    // any other directive in between starts a fresh one.
                    if !prev_was_ua_line {
                        group_uas.clear();
                    }
                    group_uas.push(value.to_ascii_lowercase());
                    group_is_active =
                        group_uas.iter().any(|g| g == "*" || bot_name.contains(g));
                    prev_was_ua_line = true;
                    continue;
                }
                "crawl-delay" => {
                    if group_is_active {
                        if let Ok(secs) = value.parse::<f64>() {
                            crawl_delay_ms = Some((secs * 1000.0) as u64);
                        }
                    }
                }
                _ => {}
            }
            prev_was_ua_line = false;
        }

        Self {
            raw: raw.to_string(),
            sitemaps,
            crawl_delay_ms,
            default_crawl_delay_ms: default_delay_ms,
        }
    }
}

struct CacheEntry {
    robots: Robots,
    fetched_at: Instant,
}

/// Fetches, parses, and caches robots.txt per origin with a 24h TTL. Any
/// failure (network error, non-200, unparseable body) is swallowed into a
/// permissive default, which is itself cached for the TTL so failures don't
/// retry every tick.
pub struct RobotsCache {
    client: reqwest::Client,
    entries: DashMap<String, CacheEntry>,
    user_agent: String,
    default_delay_ms: u64,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client, user_agent: String, default_delay_ms: u64) -> Self {
        Self {
            client,
            entries: DashMap::new(),
            user_agent,
            default_delay_ms,
        }
    }

    /// `origin_base_url` like `https://example.com`.
    pub async fn get(&self, origin_base_url: &str) -> Robots {
        if let Some(entry) = self.entries.get(origin_base_url) {
            if entry.fetched_at.elapsed() < TTL {
                return entry.robots.clone();
            }
        }

        let robots = self.fetch(origin_base_url).await;
        self.entries.insert(
            origin_base_url.to_string(),
            CacheEntry {
                robots: robots.clone(),
                fetched_at: Instant::now(),
            },
        );
        robots
    }

    /// Force a refresh bypassing the cache, used when the Scheduler decides
    /// a domain's robots.txt is older than 24h.
    pub async fn refresh(&self, origin_base_url: &str) -> Robots {
        let robots = self.fetch(origin_base_url).await;
        self.entries.insert(
            origin_base_url.to_string(),
            CacheEntry {
                robots: robots.clone(),
                fetched_at: Instant::now(),
            },
        );
        robots
    }

    pub fn is_stale(&self, origin_base_url: &str) -> bool {
        match self.entries.get(origin_base_url) {
            Some(entry) => entry.fetched_at.elapsed() >= TTL,
            None => true,
        }
    }

    async fn fetch(&self, origin_base_url: &str) -> Robots {
        let url = format!("{}/robots.txt", origin_base_url.trim_end_matches('/'));
        let result = tokio::time::timeout(
            FETCH_TIMEOUT,
            self.client
                .get(&url)
                .header("User-Agent", &self.user_agent)
                .send(),
        )
        .await;

        match result {
            Ok(Ok(resp)) if resp.status().is_success() => match resp.text().await {
                Ok(body) => Robots::parse(&body, self.default_delay_ms, &self.user_agent),
                Err(e) => {
                    debug!(url, error = %e, "robots.txt body read failed, using permissive default");
                    Robots::permissive(self.default_delay_ms)
                }
            },
            Ok(Ok(resp)) => {
                debug!(url, status = %resp.status(), "robots.txt non-success, using permissive default");
                Robots::permissive(self.default_delay_ms)
            }
            Ok(Err(e)) => {
                debug!(url, error = %e, "robots.txt fetch failed, using permissive default");
                Robots::permissive(self.default_delay_ms)
            }
            Err(_) => {
                debug!(url, "robots.txt fetch timed out, using permissive default");
                Robots::permissive(self.default_delay_ms)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissive_default_allows_everything() {
        let robots = Robots::permissive(1000);
        assert!(robots.is_allowed("YHTBot/1.0", "/private"));
        assert_eq!(robots.effective_crawl_delay_ms(), 1000);
    }

    #[test]
    fn parses_sitemaps_and_crawl_delay_for_wildcard_group() {
        let raw = "User-agent: *\nCrawl-delay: 2\nDisallow: /private\nSitemap: https://example.com/sitemap.xml\n";
        let robots = Robots::parse(raw, 1000, "YHTBot/1.0");
        assert_eq!(robots.sitemaps, vec!["https://example.com/sitemap.xml"]);
        assert_eq!(robots.crawl_delay_ms, Some(2000));
        assert!(!robots.is_allowed("YHTBot/1.0", "/private/x"));
        assert!(robots.is_allowed("YHTBot/1.0", "/public"));
    }
}
