use std::collections::HashMap;

use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;

use crawlcore_types::{ExtractedContent, ExtractedLink};

const NOISE_SELECTORS: &[&str] = &[
    "script",
    "style",
    "nav",
    "header",
    "footer",
    ".sidebar",
    ".advertisement",
    ".cookie-banner",
    ".social-share",
    ".comments",
    ".related-posts",
    "[role=banner]",
    "[role=navigation]",
    "[role=complementary]",
    ".popup",
    ".modal",
];

const MAX_TITLE_LEN: usize = 200;
const MAX_DESCRIPTION_LEN: usize = 300;
const MAX_TEXT_LEN: usize = 10_000;
const MAX_LINKS: usize = 100;

/// Pure function: HTML string + base URL -> title/description/text/links/
/// meta/hash. No I/O; any missing piece degrades to an empty value rather
/// than an error.
pub fn extract(html: &str, base_url: &Url) -> ExtractedContent {
    let document = Html::parse_document(html);
    let noise_node_ids = collect_noise_node_ids(&document);

    let title = extract_title(&document, &noise_node_ids);
    let description = extract_description(&document, &noise_node_ids);
    let lang = extract_lang(&document);
    let meta = extract_meta(&document);
    let links = extract_links(&document, base_url);
    let text_content = extract_text(&document, &noise_node_ids);

    let hash_input = format!("{}{}", title.clone().unwrap_or_default(), text_content);
    let mut hasher = Sha256::new();
    hasher.update(hash_input.as_bytes());
    let content_hash = format!("{:x}", hasher.finalize());

    let canonical_url = select_one(&document, "link[rel=canonical]")
        .and_then(|el| el.value().attr("href"))
        .and_then(|href| base_url.join(href).ok())
        .map(|u| u.to_string());

    ExtractedContent {
        title,
        description,
        lang,
        meta,
        links,
        text_content,
        content_hash,
        canonical_url,
    }
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn select_one<'a>(document: &'a Html, sel: &str) -> Option<ElementRef<'a>> {
    selector(sel).and_then(|s| document.select(&s).next())
}

/// IDs of nodes under a noise subtree, computed once so text/title/
/// description extraction can skip them without re-walking the tree per call.
fn collect_noise_node_ids(document: &Html) -> std::collections::HashSet<ego_tree::NodeId> {
    let mut ids = std::collections::HashSet::new();
    for sel_str in NOISE_SELECTORS {
        if let Some(sel) = selector(sel_str) {
            for el in document.select(&sel) {
                for descendant in el.descendants() {
                    ids.insert(descendant.id());
                }
            }
        }
    }
    ids
}

fn node_is_noise(el: &ElementRef, noise: &std::collections::HashSet<ego_tree::NodeId>) -> bool {
    noise.contains(&el.id())
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

fn extract_title(
    document: &Html,
    noise: &std::collections::HashSet<ego_tree::NodeId>,
) -> Option<String> {
    let from_tag = select_one(document, "title")
        .filter(|el| !node_is_noise(el, noise))
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty());

    let from_h1 = || {
        select_one(document, "h1")
            .filter(|el| !node_is_noise(el, noise))
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    };

    let from_og = || meta_content(document, "property", "og:title");
    let from_twitter = || meta_content(document, "name", "twitter:title");

    from_tag
        .or_else(from_h1)
        .or_else(from_og)
        .or_else(from_twitter)
        .map(|t| truncate_chars(&t, MAX_TITLE_LEN))
}

fn extract_description(
    document: &Html,
    noise: &std::collections::HashSet<ego_tree::NodeId>,
) -> Option<String> {
    let from_meta = meta_content(document, "name", "description");
    let from_og = || meta_content(document, "property", "og:description");
    let from_twitter = || meta_content(document, "name", "twitter:description");
    let from_p = || {
        selector("p").and_then(|sel| {
            document
                .select(&sel)
                .find(|el| !node_is_noise(el, noise))
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
        })
    };

    from_meta
        .or_else(from_og)
        .or_else(from_twitter)
        .or_else(from_p)
        .map(|d| truncate_chars(&d, MAX_DESCRIPTION_LEN))
}

fn meta_content(document: &Html, attr: &str, value: &str) -> Option<String> {
    let sel = selector(&format!("meta[{attr}='{value}']"))?;
    document
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn extract_lang(document: &Html) -> Option<String> {
    select_one(document, "html")
        .and_then(|el| el.value().attr("lang").map(|s| s.to_string()))
        .or_else(|| meta_content(document, "http-equiv", "content-language"))
}

fn extract_meta(document: &Html) -> HashMap<String, serde_json::Value> {
    let mut meta = HashMap::new();

    if let Some(sel) = selector("meta[name], meta[property]") {
        for el in document.select(&sel) {
            let key = el
                .value()
                .attr("name")
                .or_else(|| el.value().attr("property"));
            if let (Some(key), Some(content)) = (key, el.value().attr("content")) {
                meta.insert(key.to_string(), serde_json::Value::String(content.to_string()));
            }
        }
    }

    if let Some(sel) = selector("script[type='application/ld+json']") {
        let mut structured = Vec::new();
        for el in document.select(&sel) {
            let text = el.text().collect::<String>();
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                structured.push(value);
            }
        }
        if !structured.is_empty() {
            meta.insert(
                "structuredData".to_string(),
                serde_json::Value::Array(structured),
            );
        }
    }

    meta
}

fn extract_links(document: &Html, base_url: &Url) -> Vec<ExtractedLink> {
    let mut links = Vec::new();
    let Some(sel) = selector("a[href], link[rel=canonical], area[href], base[href]") else {
        return links;
    };

    for el in document.select(&sel) {
        if links.len() >= MAX_LINKS {
            break;
        }
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let trimmed = href.trim();
        if trimmed.is_empty()
            || trimmed.starts_with('#')
            || trimmed.starts_with("javascript:")
            || trimmed.starts_with("mailto:")
            || trimmed.starts_with("tel:")
        {
            continue;
        }
        let Ok(absolute) = base_url.join(trimmed) else {
            continue;
        };
        let rel = el.value().attr("rel").map(|s| s.to_string());
        let nofollow = rel
            .as_deref()
            .map(|r| r.split_whitespace().any(|tok| tok.eq_ignore_ascii_case("nofollow")))
            .unwrap_or(false);
        links.push(ExtractedLink {
            url: absolute.to_string(),
            nofollow,
            rel,
        });
    }

    links
}

fn extract_text(document: &Html, noise: &std::collections::HashSet<ego_tree::NodeId>) -> String {
    let Some(body_sel) = selector("body") else {
        return String::new();
    };
    let Some(body) = document.select(&body_sel).next() else {
        return String::new();
    };

    // scraper's `.text()` iterator doesn't expose the owning element, so walk
    // text nodes directly and skip any whose parent fell under a noise subtree.
    let mut collected = String::new();
    for node in body.descendants() {
        if let Some(text_node) = node.value().as_text() {
            if let Some(parent) = node.parent() {
                if noise.contains(&parent.id()) {
                    continue;
                }
            }
            collected.push_str(text_node);
            collected.push(' ');
        }
    }

    let normalized = collected.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&normalized, MAX_TEXT_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/page").unwrap()
    }

    #[test]
    fn extracts_title_from_title_tag_first() {
        let html = "<html><head><title>Hi</title></head><body><h1>Other</h1></body></html>";
        let result = extract(html, &base());
        assert_eq!(result.title.as_deref(), Some("Hi"));
    }

    #[test]
    fn falls_back_to_h1_then_og_title() {
        let html = "<html><body><h1>Heading</h1></body></html>";
        let result = extract(html, &base());
        assert_eq!(result.title.as_deref(), Some("Heading"));

        let html_og = "<html><head><meta property=\"og:title\" content=\"OG\"></head><body></body></html>";
        let result_og = extract(html_og, &base());
        assert_eq!(result_og.title.as_deref(), Some("OG"));
    }

    #[test]
    fn title_longer_than_200_is_truncated() {
        let long = "x".repeat(250);
        let html = format!("<html><head><title>{long}</title></head><body></body></html>");
        let result = extract(&html, &base());
        assert_eq!(result.title.unwrap().chars().count(), 200);
    }

    #[test]
    fn body_text_truncated_to_10000_chars() {
        let long = "word ".repeat(5000);
        let html = format!("<html><body><p>{long}</p></body></html>");
        let result = extract(&html, &base());
        assert!(result.text_content.chars().count() <= MAX_TEXT_LEN);
    }

    #[test]
    fn links_capped_at_100() {
        let mut body = String::new();
        for i in 0..150 {
            body.push_str(&format!("<a href=\"/p{i}\">l</a>"));
        }
        let html = format!("<html><body>{body}</body></html>");
        let result = extract(&html, &base());
        assert_eq!(result.links.len(), 100);
    }

    #[test]
    fn noise_subtrees_are_excluded_from_text() {
        let html = "<html><body><nav>Nav text here</nav><p>Real content</p></body></html>";
        let result = extract(html, &base());
        assert!(result.text_content.contains("Real content"));
        assert!(!result.text_content.contains("Nav text here"));
    }

    #[test]
    fn content_hash_is_function_of_title_and_text_only() {
        let html_a = "<html><head><title>T</title></head><body><p>Body</p></body></html>";
        let html_b = "<html data-extra=\"ignored\"><head><title>T</title></head><body><p>Body</p></body></html>";
        let a = extract(html_a, &base());
        let b = extract(html_b, &base());
        assert_eq!(a.content_hash, b.content_hash);
    }

    #[test]
    fn drops_fragment_javascript_mailto_tel_links() {
        let html = r##"<html><body>
            <a href="#top">a</a>
            <a href="javascript:void(0)">b</a>
            <a href="mailto:x@example.com">c</a>
            <a href="tel:+1234">d</a>
            <a href="/ok">e</a>
        </body></html>"##;
        let result = extract(html, &base());
        assert_eq!(result.links.len(), 1);
        assert_eq!(result.links[0].url, "https://example.com/ok");
    }

    #[test]
    fn canonical_link_is_absolutized() {
        let html = "<html><head><link rel=\"canonical\" href=\"/canon\"></head><body></body></html>";
        let result = extract(html, &base());
        assert_eq!(
            result.canonical_url.as_deref(),
            Some("https://example.com/canon")
        );
    }
}
