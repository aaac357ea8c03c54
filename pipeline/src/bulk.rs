use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::ElasticsearchConfig;
use crate::error::{HttpError, IndexError};
use crate::http::{body_excerpt, cancellable};

/// Documents per bulk request.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// A document addressed by id; re-submitting the same id overwrites it.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

impl std::fmt::Display for BulkResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={} successful={} failed={}",
            self.total, self.successful, self.failed
        )
    }
}

/// What the engine reported for one bulk request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    pub failed: usize,
}

/// Where rendered NDJSON payloads go. Implementations only do I/O; batching and
/// encoding happen in [`bulk_index`].
#[async_trait]
pub trait BulkSink: Send + Sync {
    async fn submit(&self, payload: String) -> Result<BulkOutcome, HttpError>;
}

#[derive(Serialize)]
struct ActionLine<'a> {
    index: ActionMeta<'a>,
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// Appends the action line and the body line of one document.
pub fn encode_document(buf: &mut String, index: &str, doc: &Document) -> Result<(), serde_json::Error> {
    let action = serde_json::to_string(&ActionLine {
        index: ActionMeta { index, id: &doc.id },
    })?;
    let body = serde_json::to_string(&doc.body)?;
    buf.push_str(&action);
    buf.push('\n');
    buf.push_str(&body);
    buf.push('\n');
    Ok(())
}

/// Drains `docs` into `sink`, one request every `batch_size` documents plus a
/// final one for the remainder.
///
/// Returns when the sender side is closed and the last batch is submitted. The
/// first failing request aborts the pass; the error carries the counts so far.
pub async fn bulk_index<S>(
    sink: &S,
    index: &'static str,
    mut docs: mpsc::Receiver<Document>,
    batch_size: usize,
) -> Result<BulkResult, IndexError>
where
    S: BulkSink + ?Sized,
{
    let batch_size = batch_size.max(1);
    let mut buf = String::new();
    let mut pending = 0usize;
    let mut result = BulkResult::default();

    while let Some(doc) = docs.recv().await {
        if let Err(source) = encode_document(&mut buf, index, &doc) {
            result.successful = result.total.saturating_sub(result.failed);
            return Err(IndexError::Encode {
                index,
                id: doc.id,
                partial: result,
                source,
            });
        }
        result.total += 1;
        pending += 1;

        if pending == batch_size {
            flush(sink, index, &mut buf, pending, &mut result).await?;
            pending = 0;
        }
    }

    if !buf.is_empty() {
        flush(sink, index, &mut buf, pending, &mut result).await?;
    }

    result.successful = result.total.saturating_sub(result.failed);
    Ok(result)
}

async fn flush<S>(
    sink: &S,
    index: &'static str,
    buf: &mut String,
    documents: usize,
    result: &mut BulkResult,
) -> Result<(), IndexError>
where
    S: BulkSink + ?Sized,
{
    match sink.submit(std::mem::take(buf)).await {
        Ok(outcome) => {
            // A batch cannot reject more documents than it carried
            result.failed += outcome.failed.min(documents);
            log::debug!("Flushed batch to {}: {}", index, result);
            Ok(())
        }
        Err(source) => {
            result.successful = result.total.saturating_sub(result.failed);
            Err(IndexError::Submit {
                index,
                partial: *result,
                source,
            })
        }
    }
}

/// Outcome of an accepted request. A body that is not JSON is logged and the
/// batch taken as accepted, since the engine already answered with success.
fn outcome_from_body(url: &str, body: &str) -> BulkOutcome {
    match serde_json::from_str::<Value>(body) {
        Ok(body) => parse_bulk_response(&body),
        Err(e) => {
            log::warn!("Unreadable bulk response from {}, counting batch as indexed: {}", url, e);
            BulkOutcome::default()
        }
    }
}

/// Counts rejected items in a `_bulk` response body.
pub fn parse_bulk_response(body: &Value) -> BulkOutcome {
    if body.get("errors").and_then(Value::as_bool) != Some(true) {
        return BulkOutcome::default();
    }

    let mut failed = 0;
    let mut first_reason = None;
    let items = body.get("items").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
    for item in items {
        // Each item is keyed by its action: {"index": {...}}
        let Some(result) = item.as_object().and_then(|o| o.values().next()) else {
            continue;
        };
        let status = result.get("status").and_then(Value::as_u64).unwrap_or(0);
        let error = result.get("error");
        if error.is_some() || !(200..300).contains(&status) {
            failed += 1;
            if first_reason.is_none() {
                first_reason = error
                    .and_then(|e| e.get("reason"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| Some(format!("status {}", status)));
            }
        }
    }

    if let Some(reason) = first_reason {
        log::warn!("Bulk request rejected {} documents, first reason: {}", failed, reason);
    }
    BulkOutcome { failed }
}

/// Elasticsearch `_bulk` endpoint with basic auth.
pub struct ElasticClient {
    http: reqwest::Client,
    bulk_url: String,
    username: String,
    password: String,
    cancel: CancellationToken,
}

impl ElasticClient {
    pub fn new(
        url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Self, HttpError> {
        url::Url::parse(url).map_err(|source| HttpError::Url {
            url: url.to_string(),
            source,
        })?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| HttpError::Transport {
                url: url.to_string(),
                source,
            })?;

        Ok(Self {
            http,
            bulk_url: format!("{}/_bulk", url.trim_end_matches('/')),
            username: username.into(),
            password: password.into(),
            cancel,
        })
    }

    pub fn from_config(config: &ElasticsearchConfig, cancel: CancellationToken) -> anyhow::Result<Self> {
        config.validate()?;
        let client = Self::new(
            config.url.as_deref().unwrap_or_default(),
            config.username.clone().unwrap_or_default(),
            config.password.clone().unwrap_or_default(),
            Duration::from_secs(config.timeout_secs),
            cancel,
        )
        .context("Failed to create Elasticsearch client")?;
        Ok(client)
    }

    pub fn bulk_url(&self) -> &str {
        &self.bulk_url
    }
}

#[async_trait]
impl BulkSink for ElasticClient {
    async fn submit(&self, payload: String) -> Result<BulkOutcome, HttpError> {
        let request = self
            .http
            .post(&self.bulk_url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .basic_auth(&self.username, Some(&self.password))
            .body(payload);

        let response = cancellable(&self.cancel, request.send())
            .await?
            .map_err(|source| HttpError::Transport {
                url: self.bulk_url.clone(),
                source,
            })?;

        let status = response.status();
        log::debug!("POST {}: {}", self.bulk_url, status);
        if !status.is_success() {
            let body = body_excerpt(&self.cancel, response).await;
            return Err(HttpError::Status {
                url: self.bulk_url.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let body = cancellable(&self.cancel, response.text())
            .await?
            .map_err(|source| HttpError::Transport {
                url: self.bulk_url.clone(),
                source,
            })?;
        Ok(outcome_from_body(&self.bulk_url, &body))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every payload; optionally fails the n-th submission (1-based).
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub payloads: Mutex<Vec<String>>,
        pub fail_on: Option<usize>,
        pub rejected_per_batch: usize,
    }

    impl RecordingSink {
        pub fn documents(&self) -> Vec<(String, Value)> {
            let payloads = self.payloads.lock().unwrap();
            let lines: Vec<&str> = payloads.iter().flat_map(|p| p.lines()).collect();
            lines
                .chunks(2)
                .map(|pair| {
                    let action: Value = serde_json::from_str(pair[0]).unwrap();
                    let id = action["index"]["_id"].as_str().unwrap().to_string();
                    (id, serde_json::from_str(pair[1]).unwrap())
                })
                .collect()
        }

        pub fn flushes(&self) -> usize {
            self.payloads.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BulkSink for RecordingSink {
        async fn submit(&self, payload: String) -> Result<BulkOutcome, HttpError> {
            let mut payloads = self.payloads.lock().unwrap();
            payloads.push(payload);
            if self.fail_on == Some(payloads.len()) {
                return Err(HttpError::Status {
                    url: "http://localhost:9200/_bulk".into(),
                    status: 413,
                    body: "request entity too large".into(),
                });
            }
            Ok(BulkOutcome {
                failed: self.rejected_per_batch,
            })
        }
    }

    fn doc(id: usize) -> Document {
        Document {
            id: id.to_string(),
            body: json!({"n": id}),
        }
    }

    async fn run(sink: &RecordingSink, count: usize, batch_size: usize) -> Result<BulkResult, IndexError> {
        let (tx, rx) = mpsc::channel(16);
        let producer = tokio::spawn(async move {
            for i in 0..count {
                if tx.send(doc(i)).await.is_err() {
                    break;
                }
            }
        });
        let result = bulk_index(sink, "runs", rx, batch_size).await;
        producer.await.unwrap();
        result
    }

    #[test]
    fn test_encode_document_lines() {
        let mut buf = String::new();
        encode_document(&mut buf, "steps", &Document { id: "12-3".into(), body: json!({"name": "Checkout"}) }).unwrap();
        assert_eq!(
            buf,
            "{\"index\":{\"_index\":\"steps\",\"_id\":\"12-3\"}}\n{\"name\":\"Checkout\"}\n"
        );
    }

    #[tokio::test]
    async fn test_full_batches_flush_exactly() {
        let sink = RecordingSink::default();
        let result = run(&sink, 1000, 500).await.unwrap();
        assert_eq!(sink.flushes(), 2);
        assert_eq!(result, BulkResult { total: 1000, successful: 1000, failed: 0 });
    }

    #[tokio::test]
    async fn test_single_document_uses_final_flush() {
        let sink = RecordingSink::default();
        let result = run(&sink, 1, 500).await.unwrap();
        assert_eq!(sink.flushes(), 1);
        assert_eq!(result.total, 1);
        assert_eq!(sink.documents(), vec![("0".to_string(), json!({"n": 0}))]);
    }

    #[tokio::test]
    async fn test_remainder_is_flushed() {
        let sink = RecordingSink::default();
        let result = run(&sink, 7, 3).await.unwrap();
        assert_eq!(sink.flushes(), 3);
        assert_eq!(result.total, 7);
        assert_eq!(sink.documents().len(), 7);
    }

    #[tokio::test]
    async fn test_empty_stream_sends_nothing() {
        let sink = RecordingSink::default();
        let result = run(&sink, 0, 500).await.unwrap();
        assert_eq!(sink.flushes(), 0);
        assert_eq!(result, BulkResult::default());
    }

    #[tokio::test]
    async fn test_failed_flush_returns_partial_result() {
        let sink = RecordingSink {
            fail_on: Some(2),
            ..Default::default()
        };
        let err = run(&sink, 10, 3).await.unwrap_err();
        assert!(matches!(err, IndexError::Submit { index: "runs", .. }));
        assert_eq!(err.partial(), BulkResult { total: 6, successful: 6, failed: 0 });
        assert_eq!(sink.flushes(), 2);
    }

    #[tokio::test]
    async fn test_rejected_items_are_counted() {
        let sink = RecordingSink {
            rejected_per_batch: 1,
            ..Default::default()
        };
        let result = run(&sink, 5, 2).await.unwrap();
        assert_eq!(result, BulkResult { total: 5, successful: 2, failed: 3 });
    }

    #[tokio::test]
    async fn test_rejections_capped_at_batch_size() {
        let sink = RecordingSink {
            rejected_per_batch: 10,
            ..Default::default()
        };
        let result = run(&sink, 3, 500).await.unwrap();
        assert_eq!(result, BulkResult { total: 3, successful: 0, failed: 3 });
    }

    #[test]
    fn test_unreadable_success_body_counts_as_indexed() {
        let url = "http://localhost:9200/_bulk";
        assert_eq!(outcome_from_body(url, "<html>gateway</html>"), BulkOutcome::default());
        assert_eq!(outcome_from_body(url, ""), BulkOutcome::default());

        let rejected = r#"{"errors":true,"items":[{"index":{"status":400,"error":{"reason":"bad"}}}]}"#;
        assert_eq!(outcome_from_body(url, rejected).failed, 1);
    }

    #[test]
    fn test_parse_bulk_response() {
        let ok = json!({"took": 3, "errors": false, "items": [{"index": {"status": 201}}]});
        assert_eq!(parse_bulk_response(&ok).failed, 0);

        let partial = json!({
            "errors": true,
            "items": [
                {"index": {"_id": "1", "status": 201}},
                {"index": {"_id": "2", "status": 400, "error": {"type": "mapper_parsing_exception", "reason": "failed to parse"}}},
                {"index": {"_id": "3", "status": 429}}
            ]
        });
        assert_eq!(parse_bulk_response(&partial).failed, 2);
    }

    #[test]
    fn test_client_bulk_url() {
        let client = ElasticClient::new(
            "https://es.example.com:9200/",
            "elastic",
            "secret",
            Duration::from_secs(5),
            CancellationToken::new(),
        )
        .unwrap();
        assert_eq!(client.bulk_url(), "https://es.example.com:9200/_bulk");
        assert!(ElasticClient::new("not a url", "u", "p", Duration::from_secs(5), CancellationToken::new()).is_err());
    }
}
