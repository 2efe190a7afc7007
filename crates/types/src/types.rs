use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Status of a Domain row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    Pending,
    Active,
    Blocked,
    Error,
}

/// Entity `Domain` from the data model: one row per crawled host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: i64,
    pub host: String,
    pub status: DomainStatus,
    pub robots_raw: Option<String>,
    pub robots_fetched_at: Option<chrono::DateTime<chrono::Utc>>,
    pub crawl_delay_ms: u64,
    pub priority: i32,
    pub error_count: i32,
    pub last_crawled_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Entity `Page`: one row per unique normalized URL, upserted by content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: i64,
    pub domain_id: i64,
    pub normalized_url: String,
    pub http_status: u16,
    pub content_hash: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub text_content: String,
    pub meta: serde_json::Value,
    pub lang: Option<String>,
    pub category: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub last_fetched_at: chrono::DateTime<chrono::Utc>,
}

/// Reason a queue item was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueReason {
    Seed,
    Sitemap,
    Link,
}

/// Entity `CrawlQueueItem`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlQueueItem {
    pub id: i64,
    pub domain_id: i64,
    pub url: String,
    pub priority: i32,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
    pub attempts: u32,
    pub reason: QueueReason,
}

/// Entity `Link`, append-only, unique on (from_page_id, to_url).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub from_page_id: i64,
    pub to_url: String,
    pub nofollow: bool,
    pub discovered_at: chrono::DateTime<chrono::Utc>,
}

/// Entity `FetchLog`, append-only, one row per fetch attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchLog {
    pub page_id: Option<i64>,
    pub url: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub bytes: usize,
    pub duration_ms: u64,
    pub http_status: Option<u16>,
    pub error: Option<String>,
}

/// Source of a discovered URL, used for precedence during discovery dedup:
/// `canonical > sitemap > link > manual`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DiscoverySource {
    Manual,
    Link,
    Sitemap,
    Canonical,
}

/// In-memory record produced by the Discovery Pipeline before it becomes a
/// `CrawlQueueItem`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredUrl {
    pub raw_url: String,
    pub normalized_url: String,
    pub source: DiscoverySource,
    pub source_url: String,
    pub priority: i32,
    pub nofollow: bool,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
}

/// In-memory token bucket, one per host, created lazily by the registry.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_per_second: f64,
    pub last_refill: std::time::Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_second: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_per_second,
            last_refill: std::time::Instant::now(),
        }
    }

    /// Refill by elapsed-time * rate, capped at capacity. Never suspends.
    pub fn refill(&mut self) {
        let now = std::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
            self.last_refill = now;
        }
    }

    /// Returns true and decrements iff at least one token is available.
    pub fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-host live record held by the Scheduler. Created lazily on first
/// queue inspection for a host and kept for the process lifetime.
#[derive(Debug)]
pub struct DomainState {
    pub host: String,
    pub bucket: TokenBucket,
    pub crawl_delay_ms: u64,
    pub active_count: usize,
    pub total_count: u64,
    pub consecutive_errors: u32,
    pub blocked: bool,
    pub last_crawl_at: Option<std::time::Instant>,
    pub robots_fetched_at: Option<std::time::Instant>,
}

impl DomainState {
    pub fn new(host: String, crawl_delay_ms: u64) -> Self {
        let refill_per_second = 1000.0 / crawl_delay_ms.max(1) as f64;
        Self {
            host,
            bucket: TokenBucket::new(10.0, refill_per_second),
            crawl_delay_ms,
            active_count: 0,
            total_count: 0,
            consecutive_errors: 0,
            blocked: false,
            last_crawl_at: None,
            robots_fetched_at: None,
        }
    }

    pub fn recreate_bucket(&mut self, crawl_delay_ms: u64) {
        self.crawl_delay_ms = crawl_delay_ms;
        let refill_per_second = 1000.0 / crawl_delay_ms.max(1) as f64;
        self.bucket = TokenBucket::new(10.0, refill_per_second);
    }
}

/// Fetcher input/output types.

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: url::Url,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchParams {
    pub timeout: Duration,
    pub max_bytes: usize,
    pub user_agent: String,
    pub allowed_content_type_prefixes: Vec<String>,
    pub max_redirects: u8,
}

impl Default for FetchParams {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 10 * 1024 * 1024,
            user_agent: "YHTBot/1.0 (+https://example.com/bot)".to_string(),
            allowed_content_type_prefixes: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
                "text/xml".to_string(),
                "application/xml".to_string(),
            ],
            max_redirects: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub final_url: String,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub charset: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub redirects: Vec<String>,
    pub duration_ms: u64,
    pub size: usize,
    pub retry_after_secs: Option<u64>,
}

/// Content categories produced by the Categorizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Shopping,
    Companies,
    News,
    Saas,
    Cloud,
    Web3,
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Shopping => "shopping",
            Category::Companies => "companies",
            Category::News => "news",
            Category::Saas => "saas",
            Category::Cloud => "cloud",
            Category::Web3 => "web3",
            Category::General => "general",
        }
    }
}

/// Output of the Content Extractor: pure function of (html, base_url).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub lang: Option<String>,
    pub meta: HashMap<String, serde_json::Value>,
    pub links: Vec<ExtractedLink>,
    pub text_content: String,
    pub content_hash: String,
    pub canonical_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLink {
    pub url: String,
    pub nofollow: bool,
    pub rel: Option<String>,
}

/// Health rubric reported by the Orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_bucket_starts_full_and_drains() {
        let mut bucket = TokenBucket::new(10.0, 1.0);
        for _ in 0..10 {
            assert!(bucket.try_consume());
        }
        assert!(!bucket.try_consume());
    }

    #[test]
    fn token_bucket_refill_caps_at_capacity() {
        let mut bucket = TokenBucket::new(10.0, 1.0);
        bucket.tokens = 5.0;
        bucket.last_refill = std::time::Instant::now() - Duration::from_secs(100);
        bucket.refill();
        assert_eq!(bucket.tokens, 10.0);
    }

    #[test]
    fn domain_state_recreate_bucket_changes_delay() {
        let mut state = DomainState::new("example.com".to_string(), 1000);
        assert_eq!(state.crawl_delay_ms, 1000);
        state.recreate_bucket(2000);
        assert_eq!(state.crawl_delay_ms, 2000);
        assert!((state.bucket.refill_per_second - 0.5).abs() < 1e-9);
    }
}
