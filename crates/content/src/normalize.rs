use once_cell::sync::Lazy;
use url::Url;

use crawlcore_types::CrawlError;

const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_content",
    "utm_term",
    "gclid",
    "fbclid",
    "ref",
    "source",
    "medium",
];

const BINARY_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".svg", ".ico", ".pdf", ".zip", ".tar",
    ".gz", ".rar", ".7z", ".exe", ".dmg", ".mp3", ".mp4", ".avi", ".mov", ".wmv", ".mkv", ".doc",
    ".docx", ".xls", ".xlsx", ".ppt", ".pptx", ".css", ".js", ".woff", ".woff2", ".ttf", ".eot",
];

static TRACKING_SET: Lazy<std::collections::HashSet<&'static str>> =
    Lazy::new(|| TRACKING_PARAMS.iter().copied().collect());

/// Resolve against `base` (if given), lowercase scheme/host, drop default
/// ports, drop the fragment, strip the closed tracking-param set, normalize
/// trailing slash, and reject non-http(s) schemes or binary extensions.
pub fn normalize(raw: &str, base: Option<&Url>) -> Result<String, CrawlError> {
    let parsed = if let Some(base) = base {
        base.join(raw)
            .map_err(|e| CrawlError::InvalidUrl(e.to_string()))?
    } else {
        Url::parse(raw).map_err(|e| CrawlError::InvalidUrl(e.to_string()))?
    };

    let mut url = parsed;

    let scheme = url.scheme().to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(CrawlError::InvalidUrl(format!("unsupported scheme: {scheme}")));
    }
    url.set_scheme(&scheme)
        .map_err(|_| CrawlError::InvalidUrl("failed to set scheme".to_string()))?;

    if let Some(host) = url.host_str() {
        let lower = host.to_ascii_lowercase();
        url.set_host(Some(&lower))
            .map_err(|e| CrawlError::InvalidUrl(e.to_string()))?;
    }

    let default_port = match scheme.as_str() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }

    url.set_fragment(None);

    if url.query().is_some() {
        let filtered: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !TRACKING_SET.contains(k.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if filtered.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(&filtered);
        }
    }

    let path = url.path().to_string();
    if path.is_empty() {
        url.set_path("/");
    } else if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let normalized = url.to_string();
    if is_binary(&normalized) {
        return Err(CrawlError::InvalidUrl(format!(
            "binary extension rejected: {normalized}"
        )));
    }

    Ok(normalized)
}

pub fn is_web_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(u) => matches!(u.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

pub fn is_binary(raw: &str) -> bool {
    let path = Url::parse(raw)
        .map(|u| u.path().to_ascii_lowercase())
        .unwrap_or_else(|_| raw.to_ascii_lowercase());
    BINARY_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

pub fn host(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

pub fn same_domain(a: &str, b: &str) -> bool {
    match (host(a), host(b)) {
        (Some(ha), Some(hb)) => ha == hb,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let once = normalize("HTTP://Example.com:80/Foo/?utm_source=x&b=2#frag", None).unwrap();
        let twice = normalize(&once, None).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn strips_tracking_params_and_default_port() {
        let normalized =
            normalize("https://example.com:443/page/?utm_campaign=a&keep=1", None).unwrap();
        assert_eq!(normalized, "https://example.com/page?keep=1");
    }

    #[test]
    fn root_path_keeps_trailing_slash() {
        let normalized = normalize("https://example.com/", None).unwrap();
        assert_eq!(normalized, "https://example.com/");
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(normalize("ftp://example.com/file", None).is_err());
        assert!(normalize("mailto:a@example.com", None).is_err());
    }

    #[test]
    fn rejects_binary_extensions() {
        assert!(normalize("https://example.com/image.jpg", None).is_err());
        assert!(is_binary("https://example.com/doc.pdf"));
        assert!(!is_binary("https://example.com/page"));
    }

    #[test]
    fn resolves_relative_against_base() {
        let base = Url::parse("https://example.com/blog/post").unwrap();
        let normalized = normalize("/a", Some(&base)).unwrap();
        assert_eq!(normalized, "https://example.com/a");
    }

    #[test]
    fn same_domain_checks_lowercase_host_only() {
        assert!(same_domain("https://Example.com/a", "https://example.com/b"));
        assert!(!same_domain("https://example.com/a", "https://other.com/b"));
    }
}
