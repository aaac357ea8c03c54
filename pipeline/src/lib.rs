//! Fetches GitHub Actions workflow runs into a local cache and indexes the cache
//! into Elasticsearch.
//!
//! The two halves never talk to each other: [`fetch::Fetcher`] only writes to the
//! [`common::LocalCache`] and [`index::Indexer`] only reads from it.

pub mod bulk;
pub mod config;
pub mod error;
pub mod fetch;
pub mod github;
mod http;
pub mod index;

pub use bulk::{BulkOutcome, BulkResult, BulkSink, Document, ElasticClient};
pub use config::Config;
pub use error::{FetchError, HttpError, IndexError};
pub use fetch::Fetcher;
pub use github::{ActionsApi, GithubClient, RateLimit, RateLimits, Repo, RunFilter};
pub use index::{IndexSummary, Indexer};
