use crawlcore_types::Category;

/// One row of the default seed table: `(host, category, priority)`.
pub struct SeedSpec {
    pub host: &'static str,
    pub category: Category,
    pub priority: i32,
}

/// Used only when the operator does not pass `--seeds`/`--seed`. Seeding is
/// idempotent — existing hosts are skipped, see `Orchestrator::seed`.
pub const DEFAULT_SEEDS: &[SeedSpec] = &[
    SeedSpec { host: "en.wikipedia.org", category: Category::General, priority: 80 },
    SeedSpec { host: "www.bbc.com", category: Category::News, priority: 70 },
    SeedSpec { host: "www.reuters.com", category: Category::News, priority: 70 },
    SeedSpec { host: "news.ycombinator.com", category: Category::General, priority: 60 },
    SeedSpec { host: "www.amazon.com", category: Category::Shopping, priority: 60 },
    SeedSpec { host: "www.etsy.com", category: Category::Shopping, priority: 50 },
    SeedSpec { host: "stripe.com", category: Category::Saas, priority: 60 },
    SeedSpec { host: "www.salesforce.com", category: Category::Saas, priority: 55 },
    SeedSpec { host: "aws.amazon.com", category: Category::Cloud, priority: 60 },
    SeedSpec { host: "cloud.google.com", category: Category::Cloud, priority: 55 },
    SeedSpec { host: "ethereum.org", category: Category::Web3, priority: 50 },
    SeedSpec { host: "www.coindesk.com", category: Category::Web3, priority: 45 },
    SeedSpec { host: "www.crunchbase.com", category: Category::Companies, priority: 55 },
    SeedSpec { host: "www.sec.gov", category: Category::Companies, priority: 50 },
];
