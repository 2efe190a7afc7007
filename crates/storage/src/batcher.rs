use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crawlcore_types::{FetchLog, Link};
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::store::{CrawlStore, IndexPayload, NewQueueItem, PageUpsertResult};

struct Buffer<T> {
    items: VecDeque<T>,
    first_enqueued_at: Option<Instant>,
}

impl<T> Default for Buffer<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            first_enqueued_at: None,
        }
    }
}

impl<T> Buffer<T> {
    fn push(&mut self, item: T) {
        if self.items.is_empty() {
            self.first_enqueued_at = Some(Instant::now());
        }
        self.items.push_back(item);
    }

    fn push_front_all(&mut self, items: Vec<T>) {
        for item in items.into_iter().rev() {
            self.items.push_front(item);
        }
        if self.first_enqueued_at.is_none() && !self.items.is_empty() {
            self.first_enqueued_at = Some(Instant::now());
        }
    }

    /// Clears the timer alongside draining the buffer — a size-triggered
    /// flush resets the window rather than leaving a stale deadline behind.
    fn drain(&mut self) -> Vec<T> {
        self.first_enqueued_at = None;
        self.items.drain(..).collect()
    }

    fn is_due(&self, batch_size: usize, flush_interval: Duration) -> bool {
        if self.items.len() >= batch_size {
            return true;
        }
        match self.first_enqueued_at {
            Some(t) => t.elapsed() >= flush_interval,
            None => false,
        }
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Buffers queue/link/fetch-log appends in memory, flushing on size or a
/// timer. Flush errors re-push items to the front of the buffer so the next
/// cycle retries them — no item is silently dropped.
pub struct Batcher {
    store: Arc<dyn CrawlStore>,
    batch_size: usize,
    flush_interval: Duration,
    queue_buf: Mutex<Buffer<NewQueueItem>>,
    link_buf: Mutex<Buffer<Link>>,
    log_buf: Mutex<Buffer<FetchLog>>,
}

impl Batcher {
    pub fn new(store: Arc<dyn CrawlStore>, batch_size: usize, flush_interval_ms: u64) -> Self {
        Self {
            store,
            batch_size,
            flush_interval: Duration::from_millis(flush_interval_ms),
            queue_buf: Mutex::new(Buffer::default()),
            link_buf: Mutex::new(Buffer::default()),
            log_buf: Mutex::new(Buffer::default()),
        }
    }

    pub async fn enqueue_batch(&self, items: Vec<NewQueueItem>) {
        let mut buf = self.queue_buf.lock().await;
        for item in items {
            buf.push(item);
        }
        if buf.is_due(self.batch_size, self.flush_interval) {
            let batch = buf.drain();
            drop(buf);
            self.flush_queue(batch).await;
        }
    }

    pub async fn save_links(&self, links: Vec<Link>) {
        let mut buf = self.link_buf.lock().await;
        for link in links {
            buf.push(link);
        }
        if buf.is_due(self.batch_size, self.flush_interval) {
            let batch = buf.drain();
            drop(buf);
            self.flush_links(batch).await;
        }
    }

    pub async fn save_fetch_logs(&self, logs: Vec<FetchLog>) {
        let mut buf = self.log_buf.lock().await;
        for log in logs {
            buf.push(log);
        }
        if buf.is_due(self.batch_size, self.flush_interval) {
            let batch = buf.drain();
            drop(buf);
            self.flush_logs(batch).await;
        }
    }

    /// Runs once per `flushIntervalMs`-ish tick from the caller's timer loop:
    /// flush whichever buffers have reached their 5 s window.
    pub async fn tick(&self) {
        {
            let mut buf = self.queue_buf.lock().await;
            if buf.is_due(self.batch_size, self.flush_interval) && !buf.is_empty() {
                let batch = buf.drain();
                drop(buf);
                self.flush_queue(batch).await;
            }
        }
        {
            let mut buf = self.link_buf.lock().await;
            if buf.is_due(self.batch_size, self.flush_interval) && !buf.is_empty() {
                let batch = buf.drain();
                drop(buf);
                self.flush_links(batch).await;
            }
        }
        {
            let mut buf = self.log_buf.lock().await;
            if buf.is_due(self.batch_size, self.flush_interval) && !buf.is_empty() {
                let batch = buf.drain();
                drop(buf);
                self.flush_logs(batch).await;
            }
        }
    }

    /// Flushes all buffers regardless of size/timer readiness. Called on
    /// graceful shutdown.
    pub async fn flush_all(&self) {
        let queue_batch = { self.queue_buf.lock().await.drain() };
        if !queue_batch.is_empty() {
            self.flush_queue(queue_batch).await;
        }
        let link_batch = { self.link_buf.lock().await.drain() };
        if !link_batch.is_empty() {
            self.flush_links(link_batch).await;
        }
        let log_batch = { self.log_buf.lock().await.drain() };
        if !log_batch.is_empty() {
            self.flush_logs(log_batch).await;
        }
    }

    async fn flush_queue(&self, batch: Vec<NewQueueItem>) {
        if let Err(e) = self.store.add_batch_to_crawl_queue(&batch).await {
            error!(error = %e, count = batch.len(), "queue flush failed, re-buffering");
            self.queue_buf.lock().await.push_front_all(batch);
        }
    }

    async fn flush_links(&self, batch: Vec<Link>) {
        if let Err(e) = self.store.save_links(&batch).await {
            error!(error = %e, count = batch.len(), "link flush failed, re-buffering");
            self.link_buf.lock().await.push_front_all(batch);
        }
    }

    async fn flush_logs(&self, batch: Vec<FetchLog>) {
        for log in &batch {
            if let Err(e) = self.store.create_fetch_log(log).await {
                error!(error = %e, url = %log.url, "fetch log write failed, re-buffering");
                self.log_buf.lock().await.push_front_all(vec![log.clone()]);
                return;
            }
        }
    }

    /// Direct, unbuffered page upsert (page.pageId uniqueness + content-hash
    /// compare happen in the store). Triggers the `IndexPageContent`
    /// best-effort write contract when a page is new or its content changed.
    pub async fn upsert_page_and_index(
        &self,
        page: &crate::store::NewPage,
    ) -> anyhow::Result<PageUpsertResult> {
        let result = self.store.create_page(page).await?;
        if result.content_changed {
            let payload = IndexPayload {
                title: page.title.clone(),
                description: page.description.clone(),
                text_content: page.text_content.clone(),
                category: page.category.clone(),
                meta: page.meta.clone(),
            };
            if let Err(e) = self.store.index_page_content(result.page_id, &payload).await {
                warn!(error = %e, page_id = result.page_id, "index write failed, not failing crawl");
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crawlcore_types::{CrawlQueueItem, Domain, FetchLog, Page};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingStore {
        queue_flushes: AtomicUsize,
        queue_items_seen: AtomicUsize,
        fail_next_queue_flush: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl CrawlStore for CountingStore {
        async fn create_domain(&self, _host: &str, _priority: i32) -> anyhow::Result<Domain> {
            unimplemented!()
        }
        async fn get_domain(&self, _host: &str) -> anyhow::Result<Option<Domain>> {
            unimplemented!()
        }
        async fn update_domain(&self, _domain: &Domain) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn list_domains(&self) -> anyhow::Result<Vec<Domain>> {
            unimplemented!()
        }
        async fn create_page(&self, _page: &crate::store::NewPage) -> anyhow::Result<PageUpsertResult> {
            unimplemented!()
        }
        async fn get_page(&self, _normalized_url: &str) -> anyhow::Result<Option<Page>> {
            unimplemented!()
        }
        async fn update_page(&self, _page: &Page) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn add_to_crawl_queue(&self, _item: &NewQueueItem) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn add_batch_to_crawl_queue(&self, items: &[NewQueueItem]) -> anyhow::Result<()> {
            if self.fail_next_queue_flush.swap(false, Ordering::SeqCst) {
                anyhow::bail!("simulated failure");
            }
            self.queue_flushes.fetch_add(1, Ordering::SeqCst);
            self.queue_items_seen.fetch_add(items.len(), Ordering::SeqCst);
            Ok(())
        }
        async fn get_next_crawl_items(&self, _limit: i64) -> anyhow::Result<Vec<CrawlQueueItem>> {
            unimplemented!()
        }
        async fn increment_attempts(
            &self,
            _id: i64,
            _next_scheduled_at: chrono::DateTime<chrono::Utc>,
        ) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn remove_item(&self, _id: i64) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn defer_item(
            &self,
            _id: i64,
            _next_scheduled_at: chrono::DateTime<chrono::Utc>,
        ) -> anyhow::Result<()> {
            unimplemented!()
        }
        async fn get_queue_stats(&self) -> anyhow::Result<crate::store::QueueStats> {
            unimplemented!()
        }
        async fn save_links(&self, _links: &[Link]) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_links_from_page(&self, _page_id: i64) -> anyhow::Result<Vec<Link>> {
            unimplemented!()
        }
        async fn create_fetch_log(&self, _log: &FetchLog) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_recent_fetch_logs(&self, _limit: i64) -> anyhow::Result<Vec<FetchLog>> {
            unimplemented!()
        }
        async fn get_fetch_stats(&self) -> anyhow::Result<crate::store::FetchStats> {
            unimplemented!()
        }
        async fn index_page_content(&self, _page_id: i64, _payload: &IndexPayload) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn item(url: &str) -> NewQueueItem {
        NewQueueItem {
            domain_id: 1,
            url: url.to_string(),
            priority: 50,
            reason: crawlcore_types::QueueReason::Link,
        }
    }

    #[tokio::test]
    async fn flushes_when_batch_size_reached() {
        let store = Arc::new(CountingStore::default());
        let batcher = Batcher::new(store.clone(), 3, 5_000);
        batcher
            .enqueue_batch(vec![item("a"), item("b"), item("c")])
            .await;
        assert_eq!(store.queue_flushes.load(Ordering::SeqCst), 1);
        assert_eq!(store.queue_items_seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_flush_below_batch_size_without_timer() {
        let store = Arc::new(CountingStore::default());
        let batcher = Batcher::new(store.clone(), 10, 60_000);
        batcher.enqueue_batch(vec![item("a")]).await;
        assert_eq!(store.queue_flushes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn flush_all_drains_partial_buffer() {
        let store = Arc::new(CountingStore::default());
        let batcher = Batcher::new(store.clone(), 50, 60_000);
        batcher.enqueue_batch(vec![item("a"), item("b")]).await;
        assert_eq!(store.queue_flushes.load(Ordering::SeqCst), 0);
        batcher.flush_all().await;
        assert_eq!(store.queue_flushes.load(Ordering::SeqCst), 1);
        assert_eq!(store.queue_items_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_flush_re_buffers_items_for_retry() {
        let store = Arc::new(CountingStore::default());
        store.fail_next_queue_flush.store(true, Ordering::SeqCst);
        let batcher = Batcher::new(store.clone(), 2, 60_000);
        batcher.enqueue_batch(vec![item("a"), item("b")]).await;
        assert_eq!(store.queue_flushes.load(Ordering::SeqCst), 0);

        batcher.flush_all().await;
        assert_eq!(store.queue_flushes.load(Ordering::SeqCst), 1);
        assert_eq!(store.queue_items_seen.load(Ordering::SeqCst), 2);
    }
}
