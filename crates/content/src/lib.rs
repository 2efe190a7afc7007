pub mod categorize;
pub mod extract;
pub mod normalize;
pub mod sitemap;

pub use categorize::{categorize, CategoryResult};
pub use extract::extract;
pub use normalize::{host, is_binary, is_web_url, normalize, same_domain};
pub use sitemap::{parse as parse_sitemap, priority_score, SitemapResult, SitemapUrl};
