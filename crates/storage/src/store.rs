use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

use crawlcore_types::{CrawlQueueItem, Domain, DomainStatus, FetchLog, Link, Page, QueueReason};

/// Fields needed to create or upsert a page; `id`/`last_fetched_at` are
/// server-assigned.
#[derive(Debug, Clone)]
pub struct NewPage {
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
}

/// Outcome of `create_page`: the assigned id and whether the content hash
/// actually changed (vs. only `last_fetched_at` advancing).
#[derive(Debug, Clone, Copy)]
pub struct PageUpsertResult {
    pub page_id: i64,
    pub content_changed: bool,
}

#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub domain_id: i64,
    pub url: String,
    pub priority: i32,
    pub reason: QueueReason,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: i64,
    pub total_attempts: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FetchStats {
    pub total: i64,
    pub errors: i64,
    pub avg_duration_ms: f64,
}

/// Payload handed to the search-index collaborator after a page is created
/// or its content hash changes.
#[derive(Debug, Clone)]
pub struct IndexPayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub text_content: String,
    pub category: String,
    pub meta: serde_json::Value,
}

/// The closed storage operation set the scheduler and batcher depend on.
/// Every operation is transactional per call; URL-uniqueness conflicts on
/// pages and the crawl queue resolve to do-nothing.
#[async_trait]
pub trait CrawlStore: Send + Sync {
    async fn create_domain(&self, host: &str, priority: i32) -> Result<Domain>;
    async fn get_domain(&self, host: &str) -> Result<Option<Domain>>;
    async fn update_domain(&self, domain: &Domain) -> Result<()>;
    async fn list_domains(&self) -> Result<Vec<Domain>>;

    async fn create_page(&self, page: &NewPage) -> Result<PageUpsertResult>;
    async fn get_page(&self, normalized_url: &str) -> Result<Option<Page>>;
    async fn update_page(&self, page: &Page) -> Result<()>;

    async fn add_to_crawl_queue(&self, item: &NewQueueItem) -> Result<()>;
    async fn add_batch_to_crawl_queue(&self, items: &[NewQueueItem]) -> Result<()>;
    async fn get_next_crawl_items(&self, limit: i64) -> Result<Vec<CrawlQueueItem>>;
    async fn increment_attempts(
        &self,
        id: i64,
        next_scheduled_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()>;
    async fn remove_item(&self, id: i64) -> Result<()>;
    async fn defer_item(&self, id: i64, next_scheduled_at: chrono::DateTime<chrono::Utc>) -> Result<()>;
    async fn get_queue_stats(&self) -> Result<QueueStats>;

    async fn save_links(&self, links: &[Link]) -> Result<()>;
    async fn get_links_from_page(&self, page_id: i64) -> Result<Vec<Link>>;

    async fn create_fetch_log(&self, log: &FetchLog) -> Result<()>;
    async fn get_recent_fetch_logs(&self, limit: i64) -> Result<Vec<FetchLog>>;
    async fn get_fetch_stats(&self) -> Result<FetchStats>;

    async fn index_page_content(&self, page_id: i64, payload: &IndexPayload) -> Result<()>;
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        info!("migrations complete");
        Ok(())
    }

    pub async fn check_connectivity(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn status_to_str(status: DomainStatus) -> &'static str {
    match status {
        DomainStatus::Pending => "pending",
        DomainStatus::Active => "active",
        DomainStatus::Blocked => "blocked",
        DomainStatus::Error => "error",
    }
}

fn status_from_str(s: &str) -> DomainStatus {
    match s {
        "active" => DomainStatus::Active,
        "blocked" => DomainStatus::Blocked,
        "error" => DomainStatus::Error,
        _ => DomainStatus::Pending,
    }
}

fn reason_to_str(reason: QueueReason) -> &'static str {
    match reason {
        QueueReason::Seed => "seed",
        QueueReason::Sitemap => "sitemap",
        QueueReason::Link => "link",
    }
}

fn reason_from_str(s: &str) -> QueueReason {
    match s {
        "sitemap" => QueueReason::Sitemap,
        "link" => QueueReason::Link,
        _ => QueueReason::Seed,
    }
}

fn domain_from_row(row: &sqlx::postgres::PgRow) -> Domain {
    Domain {
        id: row.get("id"),
        host: row.get("host"),
        status: status_from_str(row.get::<String, _>("status").as_str()),
        robots_raw: row.get("robots_raw"),
        robots_fetched_at: row.get("robots_fetched_at"),
        crawl_delay_ms: row.get::<i64, _>("crawl_delay_ms") as u64,
        priority: row.get("priority"),
        error_count: row.get("error_count"),
        last_crawled_at: row.get("last_crawled_at"),
    }
}

fn page_from_row(row: &sqlx::postgres::PgRow) -> Page {
    Page {
        id: row.get("id"),
        domain_id: row.get("domain_id"),
        normalized_url: row.get("normalized_url"),
        http_status: row.get::<i32, _>("http_status") as u16,
        content_hash: row.get("content_hash"),
        title: row.get("title"),
        description: row.get("description"),
        text_content: row.get("text_content"),
        meta: row.get("meta"),
        lang: row.get("lang"),
        category: row.get("category"),
        etag: row.get("etag"),
        last_modified: row.get("last_modified"),
        last_fetched_at: row.get("last_fetched_at"),
    }
}

fn queue_item_from_row(row: &sqlx::postgres::PgRow) -> CrawlQueueItem {
    CrawlQueueItem {
        id: row.get("id"),
        domain_id: row.get("domain_id"),
        url: row.get("url"),
        priority: row.get("priority"),
        scheduled_at: row.get("scheduled_at"),
        attempts: row.get::<i32, _>("attempts") as u32,
        reason: reason_from_str(row.get::<String, _>("reason").as_str()),
    }
}

#[async_trait]
impl CrawlStore for PostgresStore {
    async fn create_domain(&self, host: &str, priority: i32) -> Result<Domain> {
        let row = sqlx::query(
            "INSERT INTO domains (host, priority) VALUES ($1, $2)
             ON CONFLICT (host) DO UPDATE SET host = EXCLUDED.host
             RETURNING id, host, status, robots_raw, robots_fetched_at, crawl_delay_ms, priority, error_count, last_crawled_at",
        )
        .bind(host)
        .bind(priority)
        .fetch_one(&self.pool)
        .await?;
        Ok(domain_from_row(&row))
    }

    async fn get_domain(&self, host: &str) -> Result<Option<Domain>> {
        let row = sqlx::query(
            "SELECT id, host, status, robots_raw, robots_fetched_at, crawl_delay_ms, priority, error_count, last_crawled_at
             FROM domains WHERE host = $1",
        )
        .bind(host)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(domain_from_row))
    }

    async fn update_domain(&self, domain: &Domain) -> Result<()> {
        sqlx::query(
            "UPDATE domains SET status = $2, robots_raw = $3, robots_fetched_at = $4,
                crawl_delay_ms = $5, priority = $6, error_count = $7, last_crawled_at = $8
             WHERE id = $1",
        )
        .bind(domain.id)
        .bind(status_to_str(domain.status))
        .bind(&domain.robots_raw)
        .bind(domain.robots_fetched_at)
        .bind(domain.crawl_delay_ms as i64)
        .bind(domain.priority)
        .bind(domain.error_count)
        .bind(domain.last_crawled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_domains(&self) -> Result<Vec<Domain>> {
        let rows = sqlx::query(
            "SELECT id, host, status, robots_raw, robots_fetched_at, crawl_delay_ms, priority, error_count, last_crawled_at
             FROM domains ORDER BY host",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(domain_from_row).collect())
    }

    async fn create_page(&self, page: &NewPage) -> Result<PageUpsertResult> {
        let mut tx = self.pool.begin().await?;

        let previous_hash: Option<String> = sqlx::query_scalar(
            "SELECT content_hash FROM pages WHERE normalized_url = $1 FOR UPDATE",
        )
        .bind(&page.normalized_url)
        .fetch_optional(&mut *tx)
        .await?;
        let content_changed = previous_hash.as_deref() != Some(page.content_hash.as_str());

        let row = sqlx::query(
            "INSERT INTO pages (domain_id, normalized_url, http_status, content_hash, title, description, text_content, meta, lang, category, etag, last_modified, last_fetched_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
             ON CONFLICT (normalized_url) DO UPDATE SET
                http_status = EXCLUDED.http_status,
                title = CASE WHEN pages.content_hash = EXCLUDED.content_hash THEN pages.title ELSE EXCLUDED.title END,
                description = CASE WHEN pages.content_hash = EXCLUDED.content_hash THEN pages.description ELSE EXCLUDED.description END,
                text_content = CASE WHEN pages.content_hash = EXCLUDED.content_hash THEN pages.text_content ELSE EXCLUDED.text_content END,
                meta = CASE WHEN pages.content_hash = EXCLUDED.content_hash THEN pages.meta ELSE EXCLUDED.meta END,
                category = CASE WHEN pages.content_hash = EXCLUDED.content_hash THEN pages.category ELSE EXCLUDED.category END,
                content_hash = EXCLUDED.content_hash,
                etag = EXCLUDED.etag,
                last_modified = EXCLUDED.last_modified,
                last_fetched_at = NOW()
             RETURNING id",
        )
        .bind(page.domain_id)
        .bind(&page.normalized_url)
        .bind(page.http_status as i32)
        .bind(&page.content_hash)
        .bind(&page.title)
        .bind(&page.description)
        .bind(&page.text_content)
        .bind(&page.meta)
        .bind(&page.lang)
        .bind(&page.category)
        .bind(&page.etag)
        .bind(&page.last_modified)
        .fetch_one(&mut *tx)
        .await?;

        let page_id: i64 = row.get("id");
        tx.commit().await?;

        Ok(PageUpsertResult {
            page_id,
            content_changed,
        })
    }

    async fn get_page(&self, normalized_url: &str) -> Result<Option<Page>> {
        let row = sqlx::query(
            "SELECT id, domain_id, normalized_url, http_status, content_hash, title, description, text_content, meta, lang, category, etag, last_modified, last_fetched_at
             FROM pages WHERE normalized_url = $1",
        )
        .bind(normalized_url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(page_from_row))
    }

    async fn update_page(&self, page: &Page) -> Result<()> {
        sqlx::query(
            "UPDATE pages SET http_status = $2, content_hash = $3, title = $4, description = $5,
                text_content = $6, meta = $7, lang = $8, category = $9, etag = $10, last_modified = $11, last_fetched_at = $12
             WHERE id = $1",
        )
        .bind(page.id)
        .bind(page.http_status as i32)
        .bind(&page.content_hash)
        .bind(&page.title)
        .bind(&page.description)
        .bind(&page.text_content)
        .bind(&page.meta)
        .bind(&page.lang)
        .bind(&page.category)
        .bind(&page.etag)
        .bind(&page.last_modified)
        .bind(page.last_fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_to_crawl_queue(&self, item: &NewQueueItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO crawl_queue (domain_id, url, priority, reason) VALUES ($1, $2, $3, $4)
             ON CONFLICT (url) DO NOTHING",
        )
        .bind(item.domain_id)
        .bind(&item.url)
        .bind(item.priority)
        .bind(reason_to_str(item.reason))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_batch_to_crawl_queue(&self, items: &[NewQueueItem]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let domain_ids: Vec<i64> = items.iter().map(|i| i.domain_id).collect();
        let urls: Vec<String> = items.iter().map(|i| i.url.clone()).collect();
        let priorities: Vec<i32> = items.iter().map(|i| i.priority).collect();
        let reasons: Vec<String> = items
            .iter()
            .map(|i| reason_to_str(i.reason).to_string())
            .collect();

        sqlx::query(
            "INSERT INTO crawl_queue (domain_id, url, priority, reason)
             SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::int[], $4::text[])
             ON CONFLICT (url) DO NOTHING",
        )
        .bind(&domain_ids)
        .bind(&urls)
        .bind(&priorities)
        .bind(&reasons)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_next_crawl_items(&self, limit: i64) -> Result<Vec<CrawlQueueItem>> {
        let rows = sqlx::query(
            "SELECT id, domain_id, url, priority, scheduled_at, attempts, reason
             FROM crawl_queue
             WHERE scheduled_at <= now()
             ORDER BY priority DESC, scheduled_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(queue_item_from_row).collect())
    }

    async fn increment_attempts(
        &self,
        id: i64,
        next_scheduled_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE crawl_queue SET attempts = attempts + 1, scheduled_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(next_scheduled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_item(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM crawl_queue WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn defer_item(&self, id: i64, next_scheduled_at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        sqlx::query("UPDATE crawl_queue SET scheduled_at = $2 WHERE id = $1")
            .bind(id)
            .bind(next_scheduled_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query("SELECT COUNT(*) AS pending, COALESCE(SUM(attempts), 0) AS total_attempts FROM crawl_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(QueueStats {
            pending: row.get("pending"),
            total_attempts: row.get("total_attempts"),
        })
    }

    async fn save_links(&self, links: &[Link]) -> Result<()> {
        if links.is_empty() {
            return Ok(());
        }
        let from_ids: Vec<i64> = links.iter().map(|l| l.from_page_id).collect();
        let to_urls: Vec<String> = links.iter().map(|l| l.to_url.clone()).collect();
        let nofollows: Vec<bool> = links.iter().map(|l| l.nofollow).collect();

        sqlx::query(
            "INSERT INTO links (from_page_id, to_url, nofollow)
             SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::bool[])
             ON CONFLICT (from_page_id, to_url) DO NOTHING",
        )
        .bind(&from_ids)
        .bind(&to_urls)
        .bind(&nofollows)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_links_from_page(&self, page_id: i64) -> Result<Vec<Link>> {
        let rows = sqlx::query(
            "SELECT from_page_id, to_url, nofollow, discovered_at FROM links WHERE from_page_id = $1",
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| Link {
                from_page_id: row.get("from_page_id"),
                to_url: row.get("to_url"),
                nofollow: row.get("nofollow"),
                discovered_at: row.get("discovered_at"),
            })
            .collect())
    }

    async fn create_fetch_log(&self, log: &FetchLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO fetch_logs (page_id, url, started_at, finished_at, bytes, duration_ms, http_status, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(log.page_id)
        .bind(&log.url)
        .bind(log.started_at)
        .bind(log.finished_at)
        .bind(log.bytes as i64)
        .bind(log.duration_ms as i64)
        .bind(log.http_status.map(|s| s as i32))
        .bind(&log.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_recent_fetch_logs(&self, limit: i64) -> Result<Vec<FetchLog>> {
        let rows = sqlx::query(
            "SELECT page_id, url, started_at, finished_at, bytes, duration_ms, http_status, error
             FROM fetch_logs ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| FetchLog {
                page_id: row.get("page_id"),
                url: row.get("url"),
                started_at: row.get("started_at"),
                finished_at: row.get("finished_at"),
                bytes: row.get::<i64, _>("bytes") as usize,
                duration_ms: row.get::<i64, _>("duration_ms") as u64,
                http_status: row.get::<Option<i32>, _>("http_status").map(|s| s as u16),
                error: row.get("error"),
            })
            .collect())
    }

    async fn get_fetch_stats(&self) -> Result<FetchStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE error IS NOT NULL) AS errors,
                    COALESCE(AVG(duration_ms), 0) AS avg_duration_ms
             FROM fetch_logs",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(FetchStats {
            total: row.get("total"),
            errors: row.get("errors"),
            avg_duration_ms: row.get::<f64, _>("avg_duration_ms"),
        })
    }

    /// Logged but never fails the crawl — the search index is a
    /// best-effort collaborator, not part of the storage transaction.
    async fn index_page_content(&self, page_id: i64, payload: &IndexPayload) -> Result<()> {
        tracing::debug!(
            page_id,
            category = %payload.category,
            title = ?payload.title,
            "indexed page content"
        );
        let _ = &payload.text_content;
        let _ = &payload.meta;
        Ok(())
    }
}
