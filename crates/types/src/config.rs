use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub politeness: PolitenessConfig,
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub postgres_url: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulingConfig {
    pub max_concurrent_fetches: usize,
    pub per_domain_concurrency: usize,
    pub queue_check_interval_ms: u64,
    pub priority_threshold: i32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 50,
            per_domain_concurrency: 3,
            queue_check_interval_ms: 5_000,
            priority_threshold: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PolitenessConfig {
    pub default_delay_ms: u64,
    pub user_agent: String,
    pub respect_robots_txt: bool,
    pub max_retries: u32,
    pub retry_backoff_base: u32,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 1_000,
            user_agent: "YHTBot/1.0 (+https://example.com/bot)".to_string(),
            respect_robots_txt: true,
            max_retries: 3,
            retry_backoff_base: 2,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FetchSettings {
    pub request_timeout_ms: u64,
    pub max_page_size_bytes: usize,
    pub allowed_content_types: Vec<String>,
    pub max_redirects: u8,
    pub connection_pool_size: usize,
    pub pipelining: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            max_page_size_bytes: 10 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
                "text/xml".to_string(),
            ],
            max_redirects: 5,
            connection_pool_size: 50,
            pipelining: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub max_links_per_page: usize,
    pub respect_nofollow: bool,
    pub extract_resources: bool,
    pub min_priority: i32,
    pub max_depth: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_links_per_page: 500,
            respect_nofollow: true,
            extract_resources: false,
            min_priority: 20,
            max_depth: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatchingConfig {
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub memory_threshold_mb: u64,
    pub stats_report_interval_ms: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory_threshold_mb: 2048,
            stats_report_interval_ms: 60_000,
        }
    }
}
