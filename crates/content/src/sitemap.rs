use std::io::Read;

use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// One `<url>` entry parsed out of a sitemap document.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapUrl {
    pub loc: String,
    pub lastmod: Option<String>,
    pub changefreq: Option<String>,
    pub priority: Option<f64>,
    /// Derived scheduling priority in [0, 100], see `priority_score`.
    pub priority_score: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SitemapResult {
    pub urls: Vec<SitemapUrl>,
    pub index_sitemaps: Vec<String>,
    pub is_index: bool,
    pub errors: Vec<String>,
}

/// Parses a sitemap document (gzip-decoded if `is_gzip` is set). Detects
/// `<sitemapindex>` vs `<urlset>` and does not itself recurse into child
/// sitemaps — the caller owns recursion depth.
pub fn parse(body: &[u8], is_gzip: bool) -> SitemapResult {
    let xml = if is_gzip {
        match gunzip(body) {
            Ok(bytes) => bytes,
            Err(e) => {
                return SitemapResult {
                    errors: vec![format!("gzip decode failed: {e}")],
                    ..Default::default()
                }
            }
        }
    } else {
        body.to_vec()
    };

    let mut result = SitemapResult::default();
    let mut reader = Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut current_loc: Option<String> = None;
    let mut current_lastmod: Option<String> = None;
    let mut current_changefreq: Option<String> = None;
    let mut current_priority: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "sitemapindex" {
                    result.is_index = true;
                }
                if name == "url" || name == "sitemap" {
                    current_loc = None;
                    current_lastmod = None;
                    current_changefreq = None;
                    current_priority = None;
                }
                path.push(name);
            }
            Ok(Event::Text(t)) => {
                let text = match t.unescape() {
                    Ok(cow) => cow.into_owned(),
                    Err(_) => continue,
                };
                match path.last().map(|s| s.as_str()) {
                    Some("loc") => current_loc = Some(text),
                    Some("lastmod") => current_lastmod = Some(text),
                    Some("changefreq") => current_changefreq = Some(text),
                    Some("priority") => current_priority = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "url" {
                    if let Some(loc) = current_loc.take() {
                        let priority = current_priority.as_deref().and_then(|p| p.parse().ok());
                        let score = priority_score(priority, current_changefreq.as_deref());
                        result.urls.push(SitemapUrl {
                            loc,
                            lastmod: current_lastmod.take(),
                            changefreq: current_changefreq.take(),
                            priority,
                            priority_score: score,
                        });
                    }
                } else if name == "sitemap" {
                    if let Some(loc) = current_loc.take() {
                        result.index_sitemaps.push(loc);
                    }
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                result.errors.push(format!("xml parse error: {e}"));
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    result
}

fn local_name(qname: &[u8]) -> String {
    let s = String::from_utf8_lossy(qname);
    s.rsplit(':').next().unwrap_or(&s).to_ascii_lowercase()
}

fn gunzip(body: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::new();
    flate2::read::GzDecoder::new(body).read_to_end(&mut out)?;
    Ok(out)
}

/// base 50, +round(priority*30), +changefreq bump, clamped to [0, 100].
pub fn priority_score(priority: Option<f64>, changefreq: Option<&str>) -> u32 {
    let mut score: f64 = 50.0;
    if let Some(p) = priority {
        score += (p * 30.0).round();
    }
    score += match changefreq.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("always") => 20.0,
        Some("hourly") => 15.0,
        Some("daily") => 10.0,
        Some("weekly") => 5.0,
        Some("monthly") => 2.0,
        Some("yearly") => -5.0,
        Some("never") => -20.0,
        _ => 0.0,
    };
    score.clamp(0.0, 100.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_score_base_case() {
        assert_eq!(priority_score(None, None), 50);
    }

    #[test]
    fn priority_score_with_priority_and_changefreq() {
        // 50 + round(0.8*30)=24 + hourly(+15) = 89
        assert_eq!(priority_score(Some(0.8), Some("hourly")), 89);
    }

    #[test]
    fn priority_score_clamps_to_range() {
        assert_eq!(priority_score(Some(1.0), Some("always")), 100);
        assert_eq!(priority_score(Some(0.0), Some("never")), 30);
        assert_eq!(priority_score(Some(-5.0), Some("never")), 0);
    }

    #[test]
    fn parses_urlset_with_url_entries() {
        let xml = br#"<?xml version="1.0"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
            <url>
                <loc>https://example.com/a</loc>
                <lastmod>2024-01-01</lastmod>
                <changefreq>daily</changefreq>
                <priority>0.5</priority>
            </url>
            <url><loc>https://example.com/b</loc></url>
        </urlset>"#;
        let result = parse(xml, false);
        assert!(!result.is_index);
        assert_eq!(result.urls.len(), 2);
        assert_eq!(result.urls[0].loc, "https://example.com/a");
        assert_eq!(result.urls[0].priority_score, 65);
        assert_eq!(result.urls[1].priority_score, 50);
    }

    #[test]
    fn parses_sitemapindex_entries() {
        let xml = br#"<sitemapindex>
            <sitemap><loc>https://example.com/sitemap1.xml</loc></sitemap>
            <sitemap><loc>https://example.com/sitemap2.xml</loc></sitemap>
        </sitemapindex>"#;
        let result = parse(xml, false);
        assert!(result.is_index);
        assert_eq!(result.index_sitemaps.len(), 2);
        assert!(result.urls.is_empty());
    }

    #[test]
    fn gzip_decode_failure_is_reported_as_error_not_panic() {
        let result = parse(b"not gzip data", true);
        assert!(!result.errors.is_empty());
        assert!(result.urls.is_empty());
    }
}
