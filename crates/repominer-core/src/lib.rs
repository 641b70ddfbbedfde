// Harvesting logic: collect candidates, enrich them, write them out
pub mod aggregator;
pub mod collector;
pub mod config;
pub mod database;
pub mod detect;
pub mod error;
pub mod models;
pub mod profiles;
pub mod sink;
pub mod tree;

pub use aggregator::{EnrichingSink, RepoAggregator};
pub use collector::{CollectSummary, Collector, PageCursor, SearchQuery, StopReason};
pub use config::Config;
pub use database::{DatabaseDetector, KeywordMap};
pub use error::Error;
pub use profiles::ProfileExtractor;
pub use sink::{CsvReader, CsvSink, RecordSink};
pub use tree::{PathFilter, TreeWalker};

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
