pub mod batcher;
pub mod store;

pub use batcher::Batcher;
pub use store::{
    CrawlStore, FetchStats, IndexPayload, NewPage, NewQueueItem, PageUpsertResult, PostgresStore,
    QueueStats,
};
