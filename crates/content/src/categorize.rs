use once_cell::sync::Lazy;

use crawlcore_types::Category;

struct CategoryDef {
    category: Category,
    keywords: &'static [&'static str],
    domain_patterns: &'static [&'static str],
}

static CATEGORY_DEFS: Lazy<Vec<CategoryDef>> = Lazy::new(|| {
    vec![
        CategoryDef {
            category: Category::Shopping,
            keywords: &[
                "add to cart", "checkout", "shopping cart", "free shipping", "buy now",
                "in stock", "out of stock", "price", "discount", "coupon", "sale", "order now",
            ],
            domain_patterns: &["shop", "store", "buy"],
        },
        CategoryDef {
            category: Category::Companies,
            keywords: &[
                "about us", "our team", "careers", "investor relations", "press release",
                "headquarters", "leadership", "board of directors", "annual report",
            ],
            domain_patterns: &["corp", "inc", "group", "holdings"],
        },
        CategoryDef {
            category: Category::News,
            keywords: &[
                "breaking news", "published", "reporter", "correspondent", "editorial",
                "subscribe", "newsletter", "latest news", "byline", "opinion",
            ],
            domain_patterns: &["news", "times", "post", "herald", "tribune"],
        },
        CategoryDef {
            category: Category::Saas,
            keywords: &[
                "free trial", "pricing plans", "sign up free", "api documentation",
                "dashboard", "integrations", "subscription", "onboarding", "workspace",
            ],
            domain_patterns: &["app", "io", "hq"],
        },
        CategoryDef {
            category: Category::Cloud,
            keywords: &[
                "cloud computing", "infrastructure", "kubernetes", "data center", "compute",
                "serverless", "scalability", "uptime sla", "availability zone", "load balancer",
            ],
            domain_patterns: &["cloud", "host", "infra"],
        },
        CategoryDef {
            category: Category::Web3,
            keywords: &[
                "blockchain", "cryptocurrency", "smart contract", "decentralized", "wallet",
                "token", "defi", "nft", "web3", "dao",
            ],
            domain_patterns: &["chain", "token", "coin", "dao"],
        },
    ]
});

/// Scored outcome of classifying a page against the closed keyword sets.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryResult {
    pub category: Category,
    pub confidence: f64,
}

/// Pure rule-based categorizer. `host` is the page's domain; `oracle_hint`
/// is an optional externally-supplied category to nudge the winner.
pub fn categorize(
    title: &str,
    description: &str,
    text_content: &str,
    host: &str,
    oracle_hint: Option<Category>,
) -> CategoryResult {
    let haystack = format!(
        "{} {} {}",
        title.to_ascii_lowercase(),
        description.to_ascii_lowercase(),
        text_content.to_ascii_lowercase()
    );
    let host_lower = host.to_ascii_lowercase();

    let mut best: Option<(Category, f64)> = None;

    for def in CATEGORY_DEFS.iter() {
        let matches = def.keywords.iter().filter(|kw| haystack.contains(*kw)).count();
        let mut score = (0.1 * matches as f64).min(1.0);

        if def.domain_patterns.iter().any(|p| host_lower.contains(p)) {
            let exact_tld_match = def.domain_patterns.iter().any(|p| {
                host_lower == format!("{p}.com")
                    || host_lower == format!("{p}.org")
                    || host_lower == format!("{p}.io")
            });
            score += if exact_tld_match { 0.5 } else { 0.3 };
        }

        if oracle_hint == Some(def.category) {
            score += 0.4;
        }

        score = score.min(1.0);

        if best.as_ref().map(|(_, s)| score > *s).unwrap_or(true) {
            best = Some((def.category, score));
        }
    }

    match best {
        Some((category, score)) if score > 0.1 => CategoryResult {
            category,
            confidence: score.min(0.95),
        },
        _ => CategoryResult {
            category: Category::General,
            confidence: 0.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_general_with_no_signal() {
        let result = categorize("", "", "", "example.com", None);
        assert_eq!(result.category, Category::General);
    }

    #[test]
    fn shopping_keywords_push_score_above_threshold() {
        let text = "Add to cart. Free shipping. Buy now. In stock. Price drop, Discount, Coupon.";
        let result = categorize("Store", "", text, "example.com", None);
        assert_eq!(result.category, Category::Shopping);
        assert!(result.confidence > 0.1);
    }

    #[test]
    fn domain_substring_bonus_applies() {
        let result = categorize("", "", "", "myshop.net", None);
        assert_eq!(result.category, Category::Shopping);
    }

    #[test]
    fn exact_tld_domain_match_gets_larger_bonus() {
        let exact = categorize("", "", "", "shop.com", None);
        let substring = categorize("", "", "", "bigshop.net", None);
        assert!(exact.confidence > substring.confidence);
    }

    #[test]
    fn oracle_hint_adds_bonus_to_its_category() {
        let without_hint = categorize("plain text page", "", "", "example.com", None);
        let with_hint = categorize(
            "plain text page",
            "",
            "",
            "example.com",
            Some(Category::Web3),
        );
        assert_eq!(with_hint.category, Category::Web3);
        assert!(without_hint.category == Category::General);
    }

    #[test]
    fn confidence_is_clamped_to_095() {
        let text = CATEGORY_DEFS[0]
            .keywords
            .iter()
            .map(|k| format!("{k} {k} {k}"))
            .collect::<Vec<_>>()
            .join(" ");
        let result = categorize("", "", &text, "shop.com", Some(Category::Shopping));
        assert!(result.confidence <= 0.95);
    }
}
