use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use crawlcore_net::{DnsCache, Fetcher, RobotsCache};
use crawlcore_scheduler::Scheduler;
use crawlcore_storage::{Batcher, CrawlStore, NewQueueItem, PostgresStore};
use crawlcore_types::config::AppConfig;
use crawlcore_types::{DomainStatus, Health, QueueReason};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::seeds::DEFAULT_SEEDS;

/// Sampled once per `statsReportIntervalMs` and printed by the `Status`
/// command; mirrors the fixed health rubric from the scheduling design.
pub struct HealthReport {
    pub health: Health,
    pub queue_pending: i64,
    pub error_rate: f64,
    pub rss_bytes: Option<u64>,
    pub active_fetches: usize,
    pub domain_count: usize,
}

/// Owns the store, batcher, and scheduler for one crawl process, and wires
/// the start/stop/health lifecycle described for the Crawler Orchestrator.
pub struct Orchestrator {
    store: Arc<dyn CrawlStore>,
    batcher: Arc<Batcher>,
    scheduler: Arc<Scheduler>,
    config: AppConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        let pool_size = (config.scheduling.max_concurrent_fetches as u32 + 5).max(10);
        let pg = PostgresStore::new(&config.database.postgres_url, pool_size)
            .await
            .context("failed to connect to postgres")?;
        pg.run_migrations().await.context("failed to run migrations")?;
        let store: Arc<dyn CrawlStore> = Arc::new(pg);

        let batcher = Arc::new(Batcher::new(
            store.clone(),
            config.batching.batch_size,
            config.batching.flush_interval_ms,
        ));

        let fetcher = Arc::new(Fetcher::new(config.fetch.connection_pool_size)?);

        let robots_client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.fetch.connection_pool_size)
            .build()
            .context("failed to build robots.txt http client")?;
        let robots = Arc::new(RobotsCache::new(
            robots_client,
            config.politeness.user_agent.clone(),
            config.politeness.default_delay_ms,
        ));

        let dns = Arc::new(DnsCache::new());

        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            batcher.clone(),
            fetcher,
            robots,
            dns,
            config.scheduling.clone(),
            config.politeness.clone(),
            config.fetch.clone(),
            config.discovery.clone(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            store,
            batcher,
            scheduler,
            config,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Ensures every default-seed host has a `Domain` row and a queued
    /// homepage fetch. Idempotent: hosts that already exist are skipped.
    pub async fn seed(&self, extra: &[String]) -> Result<()> {
        let mut seeded = 0usize;
        for spec in DEFAULT_SEEDS {
            if self.store.get_domain(spec.host).await?.is_some() {
                continue;
            }
            let domain = self.store.create_domain(spec.host, spec.priority).await?;
            self.store
                .add_to_crawl_queue(&NewQueueItem {
                    domain_id: domain.id,
                    url: format!("https://{}/", spec.host),
                    priority: 50,
                    reason: QueueReason::Seed,
                })
                .await?;
            seeded += 1;
        }

        for raw in extra {
            let Ok(url) = url::Url::parse(raw) else {
                warn!(url = raw, "skipping unparseable seed url");
                continue;
            };
            let Some(host) = url.host_str() else { continue };
            let domain = match self.store.get_domain(host).await? {
                Some(d) => d,
                None => self.store.create_domain(host, 50).await?,
            };
            self.store
                .add_to_crawl_queue(&NewQueueItem {
                    domain_id: domain.id,
                    url: raw.clone(),
                    priority: 50,
                    reason: QueueReason::Seed,
                })
                .await?;
        }

        info!(seeded, extra = extra.len(), "seeding complete");
        Ok(())
    }

    /// Runs the scheduler, the batcher's timer flush, the memory monitor,
    /// and the stats task until a shutdown signal (SIGINT/SIGTERM) arrives,
    /// then performs a graceful stop.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let scheduler_handle = tokio::spawn(self.scheduler.clone().run(self.shutdown_rx.clone()));
        let batcher_handle = tokio::spawn(self.clone().batcher_flush_loop());
        let memory_handle = tokio::spawn(self.clone().memory_monitor_loop());
        let stats_handle = tokio::spawn(self.clone().stats_loop());

        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        self.stop().await?;

        let _ = scheduler_handle.await;
        batcher_handle.abort();
        memory_handle.abort();
        stats_handle.abort();
        Ok(())
    }

    /// Drives `Batcher::tick` on `batching.flushIntervalMs` so buffered
    /// writes below `batchSize` still land instead of waiting for shutdown.
    async fn batcher_flush_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.batching.flush_interval_ms.max(1)));
        loop {
            interval.tick().await;
            if *self.shutdown_rx.borrow() {
                break;
            }
            self.batcher.tick().await;
        }
    }

    /// Halts new dispatches, waits up to 30s for in-flight fetches to
    /// drain, then flushes every buffered write.
    pub async fn stop(&self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        while self.scheduler.active_fetches() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        if self.scheduler.active_fetches() > 0 {
            warn!(
                active = self.scheduler.active_fetches(),
                "stop timeout reached with fetches still in flight"
            );
        }

        self.batcher.flush_all().await;
        info!("orchestrator stopped");
        Ok(())
    }

    pub async fn health(&self) -> Result<HealthReport> {
        let stats = self.store.get_fetch_stats().await?;
        let recent = self.store.get_recent_fetch_logs(1_000).await?;
        let queue = self.store.get_queue_stats().await?;
        let rss_bytes = read_resident_memory_bytes();

        let mut degraded_signals = 0u8;

        let last_success = recent
            .iter()
            .filter(|l| l.error.is_none())
            .map(|l| l.finished_at)
            .max();
        let no_recent_success = match last_success {
            Some(t) => Utc::now().signed_duration_since(t) > chrono::Duration::minutes(5),
            None => !recent.is_empty(),
        };
        if no_recent_success {
            degraded_signals += 1;
        }

        let error_rate = if stats.total > 0 {
            stats.errors as f64 / stats.total as f64
        } else {
            0.0
        };
        if error_rate > 0.5 {
            degraded_signals += 1;
        }

        if rss_bytes.unwrap_or(0) > 1024 * 1024 * 1024 {
            degraded_signals += 1;
        }

        if queue.pending > 100_000 {
            degraded_signals += 1;
        }

        let health = if degraded_signals >= 2 {
            Health::Unhealthy
        } else if degraded_signals == 1 {
            Health::Degraded
        } else {
            Health::Healthy
        };

        Ok(HealthReport {
            health,
            queue_pending: queue.pending,
            error_rate,
            rss_bytes,
            active_fetches: self.scheduler.active_fetches(),
            domain_count: self.scheduler.domain_count(),
        })
    }

    pub async fn unblock_domain(&self, host: &str) -> Result<()> {
        let Some(mut domain) = self.store.get_domain(host).await? else {
            anyhow::bail!("unknown domain: {host}");
        };
        domain.status = DomainStatus::Pending;
        domain.error_count = 0;
        self.store.update_domain(&domain).await?;
        self.scheduler.reset_domain(host, domain.crawl_delay_ms).await;
        info!(host, "domain unblocked");
        Ok(())
    }

    async fn memory_monitor_loop(self: Arc<Self>) {
        let threshold_bytes = self.config.memory.memory_threshold_mb * 1024 * 1024;
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            if *self.shutdown_rx.borrow() {
                break;
            }
            if let Some(rss) = read_resident_memory_bytes() {
                if rss > threshold_bytes {
                    warn!(rss_mb = rss / (1024 * 1024), "memory threshold exceeded, flushing batcher");
                    self.batcher.flush_all().await;
                }
            }
        }
    }

    async fn stats_loop(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.memory.stats_report_interval_ms.max(1)));
        loop {
            interval.tick().await;
            if *self.shutdown_rx.borrow() {
                break;
            }
            match self.health().await {
                Ok(report) => info!(
                    health = ?report.health,
                    queue_pending = report.queue_pending,
                    error_rate = report.error_rate,
                    active_fetches = report.active_fetches,
                    domains = report.domain_count,
                    "status"
                ),
                Err(e) => warn!(error = %e, "failed to sample status"),
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Resident set size from `/proc/self/status`. Returns `None` off Linux or
/// if the field can't be parsed — the memory monitor just skips that tick.
fn read_resident_memory_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}
