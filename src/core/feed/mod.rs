pub mod cache;
pub mod fetcher;
pub mod normalize;
pub mod parser;
pub mod types;

pub use cache::{FeedCache, FeedSnapshot};
pub use fetcher::{FeedError, FeedFetcher};
pub use types::Article;
