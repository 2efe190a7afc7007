use std::sync::Arc;

use crawlcore_types::DomainState;
use dashmap::DashMap;
use tokio::sync::Mutex;

/// Per-host live scheduler records, created lazily on first queue inspection
/// for a host and kept for the process lifetime.
#[derive(Default)]
pub struct DomainStateMap {
    inner: DashMap<String, Arc<Mutex<DomainState>>>,
}

impl DomainStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, host: &str, crawl_delay_ms: u64) -> Arc<Mutex<DomainState>> {
        self.inner
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainState::new(host.to_string(), crawl_delay_ms))))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reuses_the_same_state_for_a_host() {
        let map = DomainStateMap::new();
        let a = map.get_or_create("example.com", 1000);
        let b = map.get_or_create("example.com", 2000);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn different_hosts_get_independent_state() {
        let map = DomainStateMap::new();
        let a = map.get_or_create("a.example.com", 1000);
        let b = map.get_or_create("b.example.com", 1000);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(map.len(), 2);
    }
}
