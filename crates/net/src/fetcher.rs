use std::error::Error as _;
use std::io::Read;
use std::time::Instant;

use crawlcore_types::{CrawlError, FetchOutcome, FetchParams};
use tracing::debug;

/// Single HTTP GET with redirect capture, conditional-GET, size caps,
/// content-type allowlisting, and manual decompression (so a broken
/// encoding degrades to the raw body instead of failing the fetch).
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(pool_size: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(pool_size)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch(
        &self,
        url: &url::Url,
        etag: Option<&str>,
        last_modified: Option<&str>,
        params: &FetchParams,
    ) -> Result<FetchOutcome, CrawlError> {
        let start = Instant::now();

        let mut redirects = Vec::new();
        let mut current = url.clone();
        let mut resp = send_once(&req_for(&self.client, &current, params, etag, last_modified))
            .await?;

        // The client has redirect-following disabled so we can record the
        // chain ourselves and cap it at max_redirects explicitly.
        let mut hops: u8 = 0;
        while resp.status().is_redirection() {
            if hops >= params.max_redirects {
                break;
            }
            let location = resp
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| CrawlError::Network("redirect with no Location".to_string()))?;
            let next = current
                .join(location)
                .map_err(|e| CrawlError::InvalidUrl(e.to_string()))?;
            redirects.push(current.to_string());
            current = next;
            hops += 1;
            resp = send_once(&req_for(&self.client, &current, params, etag, last_modified))
                .await?;
        }

        let status = resp.status().as_u16();
        let headers: std::collections::HashMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
            .collect();

        if status == 304 {
            return Ok(FetchOutcome {
                final_url: current.to_string(),
                status,
                content_type: headers.get("content-type").cloned(),
                charset: "utf-8".to_string(),
                etag: headers.get("etag").cloned(),
                last_modified: headers.get("last-modified").cloned(),
                headers: headers.clone(),
                body: Vec::new(),
                redirects,
                duration_ms: start.elapsed().as_millis() as u64,
                size: 0,
                retry_after_secs: None,
            });
        }

        let retry_after_secs = headers.get("retry-after").and_then(|v| v.parse::<u64>().ok());

        if status == 429 {
            return Err(CrawlError::HttpRateLimit {
                url: current.to_string(),
                retry_after_secs,
            });
        }
        if (500..600).contains(&status) {
            return Err(CrawlError::HttpServer {
                status,
                url: current.to_string(),
            });
        }
        if (400..500).contains(&status) {
            return Err(CrawlError::HttpClient {
                status,
                url: current.to_string(),
            });
        }

        let content_type = headers.get("content-type").cloned();
        if let Some(ref ct) = content_type {
            let mime = ct.split(';').next().unwrap_or(ct).trim();
            if !params
                .allowed_content_type_prefixes
                .iter()
                .any(|p| mime.eq_ignore_ascii_case(p))
            {
                return Err(CrawlError::UnsupportedContentType(mime.to_string()));
            }
        }

        if let Some(len) = resp.content_length() {
            if len as usize > params.max_bytes {
                return Err(CrawlError::PayloadTooLarge {
                    size: len as usize,
                    max: params.max_bytes,
                });
            }
        }

        let raw_body = resp
            .bytes()
            .await
            .map_err(|e| CrawlError::Network(e.to_string()))?;

        if raw_body.len() > params.max_bytes {
            return Err(CrawlError::PayloadTooLarge {
                size: raw_body.len(),
                max: params.max_bytes,
            });
        }

        let content_encoding = headers.get("content-encoding").cloned();
        let body = decompress(&raw_body, content_encoding.as_deref());

        let charset = content_type
            .as_deref()
            .and_then(extract_charset)
            .unwrap_or_else(|| "utf-8".to_string());

        debug!(url = %current, status, bytes = body.len(), "fetched");

        Ok(FetchOutcome {
            final_url: current.to_string(),
            status,
            headers: headers.clone(),
            content_type,
            charset,
            etag: headers.get("etag").cloned(),
            last_modified: headers.get("last-modified").cloned(),
            size: body.len(),
            body,
            redirects,
            duration_ms: start.elapsed().as_millis() as u64,
            retry_after_secs,
        })
    }
}

/// Builds the request for a single hop of the redirect chain.
fn req_for(
    client: &reqwest::Client,
    url: &url::Url,
    params: &FetchParams,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> reqwest::RequestBuilder {
    let mut req = client
        .get(url.clone())
        .header("User-Agent", &params.user_agent)
        .header(
            "Accept",
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        )
        .header("Accept-Encoding", "gzip, deflate, br")
        .timeout(params.timeout);
    if let Some(etag) = etag {
        req = req.header("If-None-Match", etag);
    }
    if let Some(last_modified) = last_modified {
        req = req.header("If-Modified-Since", last_modified);
    }
    req
}

async fn send_once(req: &reqwest::RequestBuilder) -> Result<reqwest::Response, CrawlError> {
    req.try_clone()
        .expect("GET requests are always cloneable")
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                CrawlError::Timeout(30)
            } else if let Some(host) = dns_failure_host(&e) {
                CrawlError::Dns { host, reason: e.to_string() }
            } else {
                CrawlError::Network(e.to_string())
            }
        })
}

/// `reqwest`/hyper fold DNS resolution failures into a generic connect
/// error; the only signal is "dns error" in the source chain's Display.
/// Returns the request's host so the scheduler can defer just that domain.
fn dns_failure_host(e: &reqwest::Error) -> Option<String> {
    if !e.is_connect() {
        return None;
    }
    let mut source = e.source();
    while let Some(s) = source {
        if s.to_string().to_ascii_lowercase().contains("dns error") {
            return e.url().and_then(|u| u.host_str()).map(str::to_string);
        }
        source = s.source();
    }
    None
}

/// Decompress gzip/deflate/brotli; on any decode error, fall back to the
/// raw bytes rather than failing the fetch.
fn decompress(body: &[u8], content_encoding: Option<&str>) -> Vec<u8> {
    match content_encoding.map(|s| s.to_ascii_lowercase()) {
        Some(ref enc) if enc == "gzip" => {
            let mut out = Vec::new();
            let mut decoder = flate2::read::GzDecoder::new(body);
            match decoder.read_to_end(&mut out) {
                Ok(_) => out,
                Err(_) => body.to_vec(),
            }
        }
        Some(ref enc) if enc == "deflate" => {
            let mut out = Vec::new();
            let mut decoder = flate2::read::DeflateDecoder::new(body);
            match decoder.read_to_end(&mut out) {
                Ok(_) => out,
                Err(_) => body.to_vec(),
            }
        }
        Some(ref enc) if enc == "br" => {
            let mut out = Vec::new();
            match brotli::Decompressor::new(body, 4096).read_to_end(&mut out) {
                Ok(_) => out,
                Err(_) => body.to_vec(),
            }
        }
        _ => body.to_vec(),
    }
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .find_map(|param| {
            let param = param.trim();
            param
                .strip_prefix("charset=")
                .map(|c| c.trim_matches('"').to_ascii_lowercase())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_charset_from_content_type() {
        assert_eq!(
            extract_charset("text/html; charset=iso-8859-1"),
            Some("iso-8859-1".to_string())
        );
        assert_eq!(extract_charset("text/html"), None);
    }

    #[test]
    fn decompress_falls_back_to_raw_on_bad_gzip() {
        let garbage = b"not actually gzip data";
        let out = decompress(garbage, Some("gzip"));
        assert_eq!(out, garbage);
    }

    #[test]
    fn decompress_passes_through_when_no_encoding() {
        let body = b"plain text";
        let out = decompress(body, None);
        assert_eq!(out, body);
    }
}
