pub mod dns;
pub mod fetcher;
pub mod robots;

pub use dns::DnsCache;
pub use fetcher::Fetcher;
pub use robots::{Robots, RobotsCache};
