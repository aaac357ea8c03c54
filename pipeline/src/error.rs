use common::{CacheError, RunId, WorkflowId};

use crate::bulk::BulkResult;

/// Failure talking to GitHub or Elasticsearch.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with status {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid url {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request cancelled")]
    Cancelled,
}

impl HttpError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HttpError::Cancelled)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The listing itself broke; `fetched` holds the runs saved before it did.
    #[error("listing workflow runs for workflow {workflow_id} (page {page}): {source}")]
    Listing {
        workflow_id: WorkflowId,
        page: u32,
        fetched: Vec<RunId>,
        #[source]
        source: HttpError,
    },

    #[error("listing runs without jobs for workflow {workflow_id}: {source}")]
    Cache {
        workflow_id: WorkflowId,
        #[source]
        source: CacheError,
    },

    #[error("fetch cancelled")]
    Cancelled { fetched: Vec<RunId> },
}

impl FetchError {
    /// Run IDs persisted before the failure.
    pub fn fetched(&self) -> &[RunId] {
        match self {
            FetchError::Listing { fetched, .. } | FetchError::Cancelled { fetched } => fetched,
            FetchError::Cache { .. } => &[],
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("indexing {index}: submitting batch: {source}")]
    Submit {
        index: &'static str,
        partial: BulkResult,
        #[source]
        source: HttpError,
    },

    #[error("indexing {index}: encoding document {id}: {source}")]
    Encode {
        index: &'static str,
        id: String,
        partial: BulkResult,
        #[source]
        source: serde_json::Error,
    },

    #[error("indexing {index}: producer task failed: {source}")]
    Producer {
        index: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl IndexError {
    /// Counts accumulated before the pass was aborted.
    pub fn partial(&self) -> BulkResult {
        match self {
            IndexError::Submit { partial, .. } | IndexError::Encode { partial, .. } => *partial,
            IndexError::Producer { .. } => BulkResult::default(),
        }
    }
}
