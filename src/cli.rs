use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "crawlcore", about = "Polite, continuously running web crawler")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start crawling, seeding the queue first if it's empty
    Crawl {
        /// Seed URLs (comma-separated or file path), overriding the default seed table
        #[arg(short, long)]
        seeds: Option<String>,

        /// Single seed URL
        #[arg(long)]
        seed: Option<String>,

        /// Override discovery.maxDepth for this run
        #[arg(short, long)]
        depth: Option<u32>,
    },
    /// Print queue stats, per-domain counts, and the current health rubric
    Status,
    /// Operator action: reset a blocked/error domain so it is scheduled again
    UnblockDomain {
        /// Host to unblock, e.g. "example.com"
        host: String,
    },
}
