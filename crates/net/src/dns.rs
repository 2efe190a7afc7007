use std::time::{Duration, Instant};

use crawlcore_types::CrawlError;
use dashmap::DashMap;
use tracing::debug;

const TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
struct CacheEntry {
    reachable: bool,
    reason: Option<String>,
    fetched_at: Instant,
}

/// Caches the reachability of a host for `TTL`, including negative results:
/// a host that just failed to resolve stays cached as unreachable for the
/// full TTL instead of being re-resolved on every scheduler tick.
pub struct DnsCache {
    entries: DashMap<String, CacheEntry>,
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Resolves `host`, consulting (and populating) the TTL cache. Returns
    /// `Ok(())` if the host has at least one address, `Err(CrawlError::Dns)`
    /// otherwise — callers treat the error as a one-cycle-deferred fetch
    /// failure rather than counting it against the domain's error streak.
    pub async fn resolve(&self, host: &str) -> Result<(), CrawlError> {
        if let Some(entry) = self.entries.get(host) {
            if entry.fetched_at.elapsed() < TTL {
                return if entry.reachable {
                    Ok(())
                } else {
                    Err(CrawlError::Dns {
                        host: host.to_string(),
                        reason: entry.reason.clone().unwrap_or_default(),
                    })
                };
            }
        }

        let lookup = tokio::net::lookup_host((host, 80)).await;
        let (reachable, reason) = match lookup {
            Ok(mut addrs) => {
                if addrs.next().is_some() {
                    (true, None)
                } else {
                    (false, Some("no addresses returned".to_string()))
                }
            }
            Err(e) => (false, Some(e.to_string())),
        };

        if !reachable {
            debug!(host, reason = ?reason, "dns resolution failed, caching negative result");
        }

        self.entries.insert(
            host.to_string(),
            CacheEntry {
                reachable,
                reason: reason.clone(),
                fetched_at: Instant::now(),
            },
        );

        if reachable {
            Ok(())
        } else {
            Err(CrawlError::Dns {
                host: host.to_string(),
                reason: reason.unwrap_or_default(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caches_negative_result_for_unresolvable_host() {
        let cache = DnsCache::new();
        let first = cache.resolve("this-host-does-not-exist.invalid").await;
        assert!(first.is_err());
        // Second call must hit the cache, not perform another lookup; we
        // can't observe the lookup directly, but it must still be an error
        // with the same reason and not panic/hang on a repeated syscall.
        let second = cache.resolve("this-host-does-not-exist.invalid").await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn resolves_a_real_host() {
        let cache = DnsCache::new();
        assert!(cache.resolve("localhost").await.is_ok());
    }
}
