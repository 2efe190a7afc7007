use thiserror::Error;

/// Tagged error kinds at every component boundary. The Scheduler is the
/// only component that turns these into retry/terminal decisions; everyone
/// else just propagates.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("dns resolution failed for {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("robots.txt fetch/parse failed for {origin}: {reason}")]
    Robots { origin: String, reason: String },

    #[error("disallowed by robots.txt: {0}")]
    RobotsDisallow(String),

    #[error("http client error {status} for {url}")]
    HttpClient { status: u16, url: String },

    #[error("rate limited (429) for {url}, retry_after={retry_after_secs:?}")]
    HttpRateLimit {
        url: String,
        retry_after_secs: Option<u64>,
    },

    #[error("http server error {status} for {url}")]
    HttpServer { status: u16, url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0}s")]
    Timeout(u64),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("body too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CrawlError {
    /// Whether the Scheduler should treat this as retryable (exponential
    /// backoff up to maxRetries) vs terminal (remove the queue item now).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrawlError::HttpRateLimit { .. }
                | CrawlError::HttpServer { .. }
                | CrawlError::Network(_)
                | CrawlError::Timeout(_)
                | CrawlError::Decode(_)
        )
    }

    /// Whether this error counts toward a domain's consecutive-error streak.
    pub fn affects_domain_health(&self) -> bool {
        !matches!(
            self,
            CrawlError::RobotsDisallow(_)
                | CrawlError::PayloadTooLarge { .. }
                | CrawlError::UnsupportedContentType(_)
                | CrawlError::Robots { .. }
        )
    }
}
