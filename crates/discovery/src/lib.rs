use std::collections::HashMap;

use crawlcore_net::Robots;
use crawlcore_types::{config::DiscoveryConfig, DiscoveredUrl, DiscoverySource};
use url::Url;

/// Options threaded through a single discovery pass.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub domain_filter: Option<String>,
    pub user_agent: String,
    pub config: DiscoveryConfig,
}

#[derive(Debug, Clone, Default)]
pub struct DiscoverySummary {
    pub discovered: Vec<DiscoveredUrl>,
    pub dropped: usize,
    pub errors: Vec<String>,
}

/// Dedups and ranks candidates by source precedence (`canonical > sitemap >
/// link > manual`, via `DiscoverySource`'s derived `Ord`), priority breaking
/// ties, applying the filtering chain and the per-page cap.
fn collect(candidates: Vec<DiscoveredUrl>, robots: &Robots, opts: &DiscoveryOptions) -> DiscoverySummary {
    let mut best: HashMap<String, DiscoveredUrl> = HashMap::new();
    let mut dropped = 0usize;

    for candidate in candidates {
        let normalized = match crawlcore_content::normalize(&candidate.raw_url, None) {
            Ok(n) => n,
            Err(_) => {
                dropped += 1;
                continue;
            }
        };
        if !crawlcore_content::is_web_url(&normalized) {
            dropped += 1;
            continue;
        }

        if let Some(ref filter) = opts.domain_filter {
            let host_matches = crawlcore_content::host(&normalized).as_deref() == Some(filter.as_str());
            if !host_matches {
                dropped += 1;
                continue;
            }
        }

        if candidate.priority < opts.config.min_priority {
            dropped += 1;
            continue;
        }

        let path = Url::parse(&normalized)
            .map(|u| {
                let mut p = u.path().to_string();
                if let Some(q) = u.query() {
                    p.push('?');
                    p.push_str(q);
                }
                p
            })
            .unwrap_or_else(|_| "/".to_string());
        if !robots.is_allowed(&opts.user_agent, &path) {
            dropped += 1;
            continue;
        }

        if opts.config.respect_nofollow && candidate.nofollow {
            dropped += 1;
            continue;
        }

        let entry = DiscoveredUrl {
            normalized_url: normalized.clone(),
            ..candidate
        };

        let wins = match best.get(&normalized) {
            None => true,
            Some(existing) => {
                entry.source > existing.source
                    || (entry.source == existing.source && entry.priority > existing.priority)
            }
        };
        if wins {
            best.insert(normalized, entry);
        } else {
            dropped += 1;
        }
    }

    let mut discovered: Vec<DiscoveredUrl> = best.into_values().collect();
    discovered.sort_by(|a, b| b.source.cmp(&a.source).then(b.priority.cmp(&a.priority)));

    if discovered.len() > opts.config.max_links_per_page {
        dropped += discovered.len() - opts.config.max_links_per_page;
        discovered.truncate(opts.config.max_links_per_page);
    }

    DiscoverySummary {
        discovered,
        dropped,
        errors: Vec::new(),
    }
}

/// Discover links and the canonical URL (if declared) from a fetched HTML
/// page, applying the filtering chain and per-page cap.
pub fn discover_from_html(
    html: &str,
    page_url: &Url,
    robots: &Robots,
    opts: &DiscoveryOptions,
) -> DiscoverySummary {
    let extracted = crawlcore_content::extract(html, page_url);
    let mut candidates = Vec::with_capacity(extracted.links.len() + 1);

    for link in &extracted.links {
        candidates.push(DiscoveredUrl {
            raw_url: link.url.clone(),
            normalized_url: String::new(),
            source: DiscoverySource::Link,
            source_url: page_url.to_string(),
            priority: 50,
            nofollow: link.nofollow,
            lastmod: None,
            changefreq: None,
        });
    }

    if let Some(canonical) = extracted.canonical_url.as_ref() {
        if canonical != page_url.as_str() {
            candidates.push(DiscoveredUrl {
                raw_url: canonical.clone(),
                normalized_url: String::new(),
                source: DiscoverySource::Canonical,
                source_url: page_url.to_string(),
                priority: 80,
                nofollow: false,
                lastmod: None,
                changefreq: None,
            });
        }
    }

    let mut opts = opts.clone();
    if opts.domain_filter.is_none() {
        opts.domain_filter = crawlcore_content::host(page_url.as_str());
    }
    collect(candidates, robots, &opts)
}

/// Discover URLs from one or more already-fetched sitemap documents.
/// `sitemaps` is `(sitemap_url, body, is_gzip)` per already-fetched document.
pub fn discover_from_sitemaps(
    sitemaps: &[(String, Vec<u8>, bool)],
    domain: &str,
    robots: &Robots,
    opts: &DiscoveryOptions,
) -> DiscoverySummary {
    let mut candidates = Vec::new();
    let mut errors = Vec::new();

    for (sitemap_url, body, is_gzip) in sitemaps {
        let parsed = crawlcore_content::parse_sitemap(body, *is_gzip);
        errors.extend(parsed.errors.iter().cloned());

        for entry in parsed.urls {
            candidates.push(DiscoveredUrl {
                raw_url: entry.loc,
                normalized_url: String::new(),
                source: DiscoverySource::Sitemap,
                source_url: sitemap_url.clone(),
                priority: entry.priority_score as i32,
                nofollow: false,
                lastmod: entry.lastmod,
                changefreq: entry.changefreq,
            });
        }
    }

    let domain_opts = DiscoveryOptions {
        domain_filter: Some(domain.to_string()),
        ..opts.clone()
    };
    let mut summary = collect(candidates, robots, &domain_opts);
    summary.errors.extend(errors);
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> DiscoveryOptions {
        DiscoveryOptions {
            domain_filter: None,
            user_agent: "crawlcore".to_string(),
            config: DiscoveryConfig::default(),
        }
    }

    fn permissive_robots() -> Robots {
        Robots::permissive(1000)
    }

    #[test]
    fn discovers_links_from_html() {
        let html = "<html><body><a href=\"/a\">a</a><a href=\"/b\">b</a></body></html>";
        let url = Url::parse("https://example.com/page").unwrap();
        let summary = discover_from_html(html, &url, &permissive_robots(), &opts());
        assert_eq!(summary.discovered.len(), 2);
        assert!(summary
            .discovered
            .iter()
            .all(|d| d.source == DiscoverySource::Link));
    }

    #[test]
    fn canonical_differing_from_page_url_is_emitted() {
        let html = "<html><head><link rel=\"canonical\" href=\"/canon\"></head><body></body></html>";
        let url = Url::parse("https://example.com/page").unwrap();
        let summary = discover_from_html(html, &url, &permissive_robots(), &opts());
        assert!(summary
            .discovered
            .iter()
            .any(|d| d.source == DiscoverySource::Canonical && d.normalized_url.ends_with("/canon")));
    }

    #[test]
    fn nofollow_links_dropped_when_respected() {
        let html = "<html><body><a href=\"/a\" rel=\"nofollow\">a</a></body></html>";
        let url = Url::parse("https://example.com/page").unwrap();
        let summary = discover_from_html(html, &url, &permissive_robots(), &opts());
        assert!(summary.discovered.is_empty());
        assert_eq!(summary.dropped, 1);
    }

    #[test]
    fn canonical_wins_over_link_for_same_url() {
        let candidates = vec![
            DiscoveredUrl {
                raw_url: "https://example.com/x".to_string(),
                normalized_url: String::new(),
                source: DiscoverySource::Link,
                source_url: "https://example.com/page".to_string(),
                priority: 90,
                nofollow: false,
                lastmod: None,
                changefreq: None,
            },
            DiscoveredUrl {
                raw_url: "https://example.com/x".to_string(),
                normalized_url: String::new(),
                source: DiscoverySource::Canonical,
                source_url: "https://example.com/page".to_string(),
                priority: 10,
                nofollow: false,
                lastmod: None,
                changefreq: None,
            },
        ];
        let summary = collect(candidates, &permissive_robots(), &opts());
        assert_eq!(summary.discovered.len(), 1);
        assert_eq!(summary.discovered[0].source, DiscoverySource::Canonical);
    }

    #[test]
    fn per_page_cap_truncates_and_reports_dropped() {
        let mut cfg = DiscoveryConfig::default();
        cfg.max_links_per_page = 2;
        let mut html = String::from("<html><body>");
        for i in 0..5 {
            html.push_str(&format!("<a href=\"/p{i}\">l</a>"));
        }
        html.push_str("</body></html>");
        let url = Url::parse("https://example.com/page").unwrap();
        let mut options = opts();
        options.config = cfg;
        let summary = discover_from_html(&html, &url, &permissive_robots(), &options);
        assert_eq!(summary.discovered.len(), 2);
        assert_eq!(summary.dropped, 3);
    }

    #[test]
    fn below_min_priority_is_dropped() {
        let mut cfg = DiscoveryConfig::default();
        cfg.min_priority = 60;
        let candidates = vec![DiscoveredUrl {
            raw_url: "https://example.com/low".to_string(),
            normalized_url: String::new(),
            source: DiscoverySource::Sitemap,
            source_url: "https://example.com/sitemap.xml".to_string(),
            priority: 30,
            nofollow: false,
            lastmod: None,
            changefreq: None,
        }];
        let mut options = opts();
        options.config = cfg;
        let summary = collect(candidates, &permissive_robots(), &options);
        assert!(summary.discovered.is_empty());
    }
}
