use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crawlcore_content::{categorize, extract};
use crawlcore_discovery::{discover_from_html, discover_from_sitemaps, DiscoveryOptions};
use crawlcore_net::{DnsCache, Fetcher, RobotsCache};
use crawlcore_storage::{Batcher, CrawlStore, NewPage, NewQueueItem};
use crawlcore_types::config::{DiscoveryConfig, FetchSettings, PolitenessConfig, SchedulingConfig};
use crawlcore_types::{CrawlError, CrawlQueueItem, DomainState, DomainStatus, FetchLog, FetchParams, Link, QueueReason};
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::domain_state::DomainStateMap;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);
const CONSECUTIVE_ERROR_LIMIT: u32 = 10;

/// Polls the crawl queue, enforces concurrency/politeness limits, and
/// dispatches fetch tasks. One instance owns the whole live per-domain
/// state map; `run` is the long-lived loop started by the orchestrator.
pub struct Scheduler {
    store: Arc<dyn CrawlStore>,
    batcher: Arc<Batcher>,
    fetcher: Arc<Fetcher>,
    robots: Arc<RobotsCache>,
    dns: Arc<DnsCache>,
    domains: Arc<DomainStateMap>,
    scheduling: SchedulingConfig,
    politeness: PolitenessConfig,
    fetch_settings: FetchSettings,
    discovery_config: DiscoveryConfig,
    active_global: AtomicUsize,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CrawlStore>,
        batcher: Arc<Batcher>,
        fetcher: Arc<Fetcher>,
        robots: Arc<RobotsCache>,
        dns: Arc<DnsCache>,
        scheduling: SchedulingConfig,
        politeness: PolitenessConfig,
        fetch_settings: FetchSettings,
        discovery_config: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            batcher,
            fetcher,
            robots,
            dns,
            domains: Arc::new(DomainStateMap::new()),
            scheduling,
            politeness,
            fetch_settings,
            discovery_config,
            active_global: AtomicUsize::new(0),
        }
    }

    pub fn active_fetches(&self) -> usize {
        self.active_global.load(Ordering::SeqCst)
    }

    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Marks a domain as active again after an operator unblocks it, and
    /// clears its in-memory error streak so it competes for dispatch on the
    /// next tick rather than waiting out a stale backoff.
    pub async fn reset_domain(&self, host: &str, crawl_delay_ms: u64) {
        let state = self.domains.get_or_create(host, crawl_delay_ms);
        let mut guard = state.lock().await;
        guard.blocked = false;
        guard.consecutive_errors = 0;
    }

    /// Tick loop: sleeps `queueCheckIntervalMs` between passes, doubling the
    /// interval (capped at 60s) whenever a tick itself errors out, and
    /// resetting to the configured interval the moment one succeeds. Exits
    /// as soon as the shutdown signal flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let base_interval = Duration::from_millis(self.scheduling.queue_check_interval_ms.max(1));
        let mut interval = base_interval;
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler loop shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(interval) => {
                    match self.clone().tick().await {
                        Ok(dispatched) => {
                            interval = base_interval;
                            if dispatched > 0 {
                                debug!(dispatched, "scheduler tick dispatched fetches");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "scheduler tick failed, backing off");
                            interval = (interval * 2).min(Duration::from_secs(60));
                        }
                    }
                }
            }
        }
    }

    /// One scheduling pass: pulls queue candidates, runs the readiness
    /// filter chain (priority threshold, domain resolution, blocked check,
    /// per-domain concurrency, token availability), and spawns a fetch task
    /// per item that clears the chain, up to the remaining global budget.
    async fn tick(self: Arc<Self>) -> anyhow::Result<usize> {
        let active = self.active_global.load(Ordering::SeqCst);
        if active >= self.scheduling.max_concurrent_fetches {
            return Ok(0);
        }
        let room = self.scheduling.max_concurrent_fetches - active;
        let candidates = self
            .store
            .get_next_crawl_items((room * 4).max(20) as i64)
            .await?;

        let mut claimed_per_domain: HashMap<String, usize> = HashMap::new();
        let mut dispatched = 0usize;

        for item in candidates {
            if dispatched >= room {
                break;
            }
            if item.priority < self.scheduling.priority_threshold {
                continue;
            }
            let Some(host) = crawlcore_content::host(&item.url) else {
                continue;
            };
            let domain = match self.store.get_domain(&host).await? {
                Some(d) => d,
                None => continue,
            };
            if domain.status == DomainStatus::Blocked {
                continue;
            }

            let state = self.domains.get_or_create(&host, domain.crawl_delay_ms);
            let already_claimed = claimed_per_domain.get(&host).copied().unwrap_or(0);
            let claimed = {
                let mut guard = state.lock().await;
                if guard.blocked
                    || guard.active_count + already_claimed >= self.scheduling.per_domain_concurrency
                {
                    false
                } else if !guard.bucket.try_consume() {
                    false
                } else {
                    guard.active_count += 1;
                    true
                }
            };
            if !claimed {
                continue;
            }

            claimed_per_domain.insert(host.clone(), already_claimed + 1);
            self.active_global.fetch_add(1, Ordering::SeqCst);
            dispatched += 1;

            let scheduler = self.clone();
            let state = state.clone();
            tokio::spawn(async move {
                scheduler.fetch_one(item, host, state).await;
            });
        }

        Ok(dispatched)
    }

    /// Runs a single fetch attempt end to end and always releases the
    /// global/per-domain slots it claimed, regardless of outcome.
    async fn fetch_one(self: Arc<Self>, item: CrawlQueueItem, host: String, state: Arc<Mutex<DomainState>>) {
        self.fetch_one_inner(&item, &host, &state).await;
        {
            let mut guard = state.lock().await;
            guard.active_count = guard.active_count.saturating_sub(1);
        }
        self.active_global.fetch_sub(1, Ordering::SeqCst);
    }

    async fn fetch_one_inner(&self, item: &CrawlQueueItem, host: &str, state: &Arc<Mutex<DomainState>>) {
        let url = match Url::parse(&item.url) {
            Ok(u) => u,
            Err(e) => {
                warn!(url = %item.url, error = %e, "queue item has unparseable url, dropping");
                let _ = self.store.remove_item(item.id).await;
                return;
            }
        };

        let started_at = Utc::now();
        if let Err(e) = self.dns.resolve(host).await {
            self.handle_fetch_error(item, host, state, e, started_at).await;
            return;
        }

        let origin = url.origin().ascii_serialization();
        let robots = self.refresh_robots_if_stale(host, &origin, item.domain_id).await;

        let path_and_query = {
            let mut p = url.path().to_string();
            if let Some(q) = url.query() {
                p.push('?');
                p.push_str(q);
            }
            p
        };
        if !robots.is_allowed(&self.politeness.user_agent, &path_and_query) {
            debug!(url = %item.url, "disallowed by robots.txt, dropping");
            let _ = self.store.remove_item(item.id).await;
            self.log_attempt(item.url.clone(), None, Utc::now(), 0, None, Some("disallowed by robots.txt".to_string()))
                .await;
            return;
        }

        let existing_page = self.store.get_page(&item.url).await.unwrap_or(None);
        let etag = existing_page.as_ref().and_then(|p| p.etag.clone());
        let last_modified = existing_page.as_ref().and_then(|p| p.last_modified.clone());

        let params = FetchParams {
            timeout: Duration::from_millis(self.fetch_settings.request_timeout_ms),
            max_bytes: self.fetch_settings.max_page_size_bytes,
            user_agent: self.politeness.user_agent.clone(),
            allowed_content_type_prefixes: self.fetch_settings.allowed_content_types.clone(),
            max_redirects: self.fetch_settings.max_redirects,
        };

        let result = self
            .fetcher
            .fetch(&url, etag.as_deref(), last_modified.as_deref(), &params)
            .await;

        match result {
            Ok(outcome) if outcome.status == 304 => {
                self.record_success(host, state).await;
                if let Some(mut page) = existing_page.clone() {
                    page.last_fetched_at = Utc::now();
                    if let Err(e) = self.store.update_page(&page).await {
                        warn!(url = %item.url, error = %e, "failed to touch last_fetched_at on 304");
                    }
                }
                let _ = self.store.remove_item(item.id).await;
                self.log_attempt(
                    item.url.clone(),
                    existing_page.as_ref().map(|p| p.id),
                    started_at,
                    0,
                    Some(304),
                    None,
                )
                .await;
            }
            Ok(outcome) => {
                self.record_success(host, state).await;
                let body = String::from_utf8_lossy(&outcome.body).to_string();
                self.handle_fetched_page(item, host, &url, &body, &outcome).await;
                let _ = self.store.remove_item(item.id).await;
                self.log_attempt(
                    item.url.clone(),
                    None,
                    started_at,
                    outcome.size,
                    Some(outcome.status),
                    None,
                )
                .await;
            }
            Err(err) => {
                self.handle_fetch_error(item, host, state, err, started_at).await;
            }
        }
    }

    async fn refresh_robots_if_stale(&self, host: &str, origin: &str, domain_id: i64) -> crawlcore_net::Robots {
        let robots = self.robots.get(origin).await;
        let needs_persist = match self.store.get_domain(host).await {
            Ok(Some(d)) => d
                .robots_fetched_at
                .map(|t| Utc::now().signed_duration_since(t) >= chrono::Duration::hours(24))
                .unwrap_or(true),
            _ => false,
        };
        if needs_persist {
            if let Ok(Some(mut domain)) = self.store.get_domain(host).await {
                domain.robots_raw = Some(robots.raw.clone());
                domain.robots_fetched_at = Some(Utc::now());
                let new_delay = robots.effective_crawl_delay_ms();
                domain.crawl_delay_ms = new_delay;
                if let Err(e) = self.store.update_domain(&domain).await {
                    warn!(host, error = %e, "failed to persist refreshed robots.txt");
                }

                let state = self.domains.get_or_create(host, new_delay);
                let mut guard = state.lock().await;
                if guard.crawl_delay_ms != new_delay {
                    guard.recreate_bucket(new_delay);
                }
                drop(guard);

                self.crawl_sitemaps(host, domain_id, origin, &robots).await;
            }
        }
        robots
    }

    /// Fetches and parses the sitemaps a host's robots.txt advertises,
    /// following sitemap indexes up to a fixed depth, and enqueues every
    /// leaf URL discovered through `QueueReason::Sitemap`.
    async fn crawl_sitemaps(&self, host: &str, domain_id: i64, origin: &str, robots: &crawlcore_net::Robots) {
        const MAX_SITEMAP_DEPTH: u8 = 3;

        if robots.sitemaps.is_empty() {
            return;
        }

        let params = FetchParams {
            timeout: Duration::from_millis(self.fetch_settings.request_timeout_ms),
            max_bytes: self.fetch_settings.max_page_size_bytes,
            user_agent: self.politeness.user_agent.clone(),
            allowed_content_type_prefixes: vec![
                "application/xml".to_string(),
                "text/xml".to_string(),
                "application/gzip".to_string(),
                "application/x-gzip".to_string(),
                "application/octet-stream".to_string(),
                "text/plain".to_string(),
            ],
            max_redirects: self.fetch_settings.max_redirects,
        };

        let mut frontier: Vec<(String, u8)> = robots.sitemaps.iter().map(|s| (s.clone(), 0)).collect();
        let mut visited = std::collections::HashSet::new();
        let mut leaf_docs = Vec::new();

        while let Some((sitemap_url, depth)) = frontier.pop() {
            if !visited.insert(sitemap_url.clone()) {
                continue;
            }
            let Ok(url) = Url::parse(&sitemap_url) else {
                continue;
            };
            let path_and_query = {
                let mut p = url.path().to_string();
                if let Some(q) = url.query() {
                    p.push('?');
                    p.push_str(q);
                }
                p
            };
            if !robots.is_allowed(&self.politeness.user_agent, &path_and_query) {
                continue;
            }

            let outcome = match self.fetcher.fetch(&url, None, None, &params).await {
                Ok(o) => o,
                Err(e) => {
                    debug!(url = %sitemap_url, error = %e, "sitemap fetch failed");
                    continue;
                }
            };

            let is_gzip = !outcome.headers.contains_key("content-encoding")
                && (sitemap_url.ends_with(".gz")
                    || outcome
                        .content_type
                        .as_deref()
                        .is_some_and(|ct| ct.contains("gzip")));

            let parsed = crawlcore_content::parse_sitemap(&outcome.body, is_gzip);
            if !parsed.errors.is_empty() {
                debug!(url = %sitemap_url, errors = ?parsed.errors, "sitemap parse reported errors");
            }

            if parsed.is_index {
                if depth < MAX_SITEMAP_DEPTH {
                    for child in parsed.index_sitemaps {
                        frontier.push((child, depth + 1));
                    }
                }
            } else {
                leaf_docs.push((sitemap_url, outcome.body, is_gzip));
            }
        }

        if leaf_docs.is_empty() {
            return;
        }

        let disc_opts = DiscoveryOptions {
            domain_filter: Some(host.to_string()),
            user_agent: self.politeness.user_agent.clone(),
            config: self.discovery_config.clone(),
        };
        let summary = discover_from_sitemaps(&leaf_docs, host, robots, &disc_opts);
        if !summary.errors.is_empty() {
            debug!(host, origin, errors = ?summary.errors, "sitemap discovery reported non-fatal errors");
        }
        if summary.discovered.is_empty() {
            return;
        }

        let queue_items: Vec<NewQueueItem> = summary
            .discovered
            .into_iter()
            .map(|d| NewQueueItem {
                domain_id,
                url: d.normalized_url,
                priority: d.priority,
                reason: QueueReason::Sitemap,
            })
            .collect();
        self.batcher.enqueue_batch(queue_items).await;
    }

    async fn record_success(&self, host: &str, state: &Arc<Mutex<DomainState>>) {
        {
            let mut guard = state.lock().await;
            guard.consecutive_errors = 0;
            guard.total_count += 1;
            guard.last_crawl_at = Some(std::time::Instant::now());
        }
        if let Ok(Some(mut domain)) = self.store.get_domain(host).await {
            domain.last_crawled_at = Some(Utc::now());
            let _ = self.store.update_domain(&domain).await;
        }
    }

    async fn handle_fetched_page(
        &self,
        item: &CrawlQueueItem,
        host: &str,
        url: &Url,
        body: &str,
        outcome: &crawlcore_types::FetchOutcome,
    ) {
        let extracted = extract(body, url);
        let category = categorize(
            extracted.title.as_deref().unwrap_or(""),
            extracted.description.as_deref().unwrap_or(""),
            &extracted.text_content,
            host,
            None,
        );
        let meta = serde_json::to_value(&extracted.meta).unwrap_or(serde_json::Value::Null);

        let new_page = NewPage {
            domain_id: item.domain_id,
            normalized_url: item.url.clone(),
            http_status: outcome.status,
            content_hash: extracted.content_hash.clone(),
            title: extracted.title.clone(),
            description: extracted.description.clone(),
            text_content: extracted.text_content.clone(),
            meta,
            lang: extracted.lang.clone(),
            category: category.category.as_str().to_string(),
            etag: outcome.etag.clone(),
            last_modified: outcome.last_modified.clone(),
        };

        let page_id = match self.batcher.upsert_page_and_index(&new_page).await {
            Ok(result) => result.page_id,
            Err(e) => {
                warn!(url = %item.url, error = %e, "page upsert failed");
                return;
            }
        };

        let robots = self.robots.get(&url.origin().ascii_serialization()).await;
        let disc_opts = DiscoveryOptions {
            domain_filter: Some(host.to_string()),
            user_agent: self.politeness.user_agent.clone(),
            config: self.discovery_config.clone(),
        };
        let summary = discover_from_html(body, url, &robots, &disc_opts);
        if !summary.errors.is_empty() {
            debug!(url = %item.url, errors = ?summary.errors, "discovery reported non-fatal errors");
        }
        if summary.discovered.is_empty() {
            return;
        }

        let now = Utc::now();
        let links: Vec<Link> = summary
            .discovered
            .iter()
            .map(|d| Link {
                from_page_id: page_id,
                to_url: d.normalized_url.clone(),
                nofollow: d.nofollow,
                discovered_at: now,
            })
            .collect();
        self.batcher.save_links(links).await;

        let queue_items: Vec<NewQueueItem> = summary
            .discovered
            .into_iter()
            .map(|d| NewQueueItem {
                domain_id: item.domain_id,
                url: d.normalized_url,
                priority: d.priority,
                reason: QueueReason::Link,
            })
            .collect();
        self.batcher.enqueue_batch(queue_items).await;
    }

    async fn handle_fetch_error(
        &self,
        item: &CrawlQueueItem,
        host: &str,
        state: &Arc<Mutex<DomainState>>,
        err: CrawlError,
        started_at: chrono::DateTime<chrono::Utc>,
    ) {
        let status = match &err {
            CrawlError::HttpClient { status, .. } => Some(*status),
            CrawlError::HttpServer { status, .. } => Some(*status),
            CrawlError::HttpRateLimit { .. } => Some(429),
            _ => None,
        };
        self.log_attempt(item.url.clone(), None, started_at, 0, status, Some(err.to_string()))
            .await;

        // DNS failures don't count against the domain's error streak — the
        // resolver may just be cold or the host transiently unreachable.
        // Defer the item by one cycle instead of running the usual backoff.
        if let CrawlError::Dns { .. } = &err {
            let next_scheduled_at = Utc::now()
                + chrono::Duration::milliseconds(self.scheduling.queue_check_interval_ms as i64);
            if let Err(e) = self.store.defer_item(item.id, next_scheduled_at).await {
                error!(url = %item.url, error = %e, "failed to defer dns-unreachable item");
            }
            return;
        }

        let mut domain_marked_error = false;
        if err.affects_domain_health() {
            let mut guard = state.lock().await;
            guard.consecutive_errors += 1;
            domain_marked_error = guard.consecutive_errors >= CONSECUTIVE_ERROR_LIMIT;
            drop(guard);

            if let Ok(Some(mut domain)) = self.store.get_domain(host).await {
                domain.error_count += 1;
                if domain_marked_error {
                    domain.status = DomainStatus::Error;
                }
                let _ = self.store.update_domain(&domain).await;
            }
            if domain_marked_error {
                warn!(host, "domain marked error after consecutive fetch failures");
            }
        }

        let next_attempt = item.attempts + 1;
        if err.is_retryable() && next_attempt <= self.politeness.max_retries {
            let backoff_ms = (self.politeness.default_delay_ms as f64)
                * (self.politeness.retry_backoff_base as f64).powi(next_attempt as i32);
            let mut delay = Duration::from_millis(backoff_ms as u64).min(MAX_RETRY_DELAY);
            if let CrawlError::HttpRateLimit { retry_after_secs: Some(secs), .. } = &err {
                delay = delay.max(Duration::from_secs(*secs));
            }
            let next_scheduled_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::seconds(60));
            if let Err(e) = self.store.increment_attempts(item.id, next_scheduled_at).await {
                error!(url = %item.url, error = %e, "failed to reschedule retry");
            }
        } else if let Err(e) = self.store.remove_item(item.id).await {
            error!(url = %item.url, error = %e, "failed to remove exhausted queue item");
        }
    }

    async fn log_attempt(
        &self,
        url: String,
        page_id: Option<i64>,
        started_at: chrono::DateTime<chrono::Utc>,
        bytes: usize,
        http_status: Option<u16>,
        error: Option<String>,
    ) {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;
        self.batcher
            .save_fetch_logs(vec![FetchLog {
                page_id,
                url,
                started_at,
                finished_at,
                bytes,
                duration_ms,
                http_status,
                error,
            }])
            .await;
    }
}
