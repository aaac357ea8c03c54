use common::{
    compute_run_duration, FieldsExt, JobSet, JobTimings, LocalCache, RecordKind, RunId, StoredRecord,
    WorkflowId, JOBS_INDEX, RUNS_INDEX, STEPS_INDEX,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::bulk::{bulk_index, BulkResult, BulkSink, Document, DEFAULT_BATCH_SIZE};
use crate::config::IndexingConfig;
use crate::error::IndexError;

type Transform = fn(&LocalCache, WorkflowId, &StoredRecord) -> Vec<Document>;

/// Results of the three passes of [`Indexer::index_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub runs: BulkResult,
    pub jobs: BulkResult,
    pub steps: BulkResult,
}

/// Streams cached records into the search engine.
///
/// Each pass runs a blocking producer that walks the cache and turns records into
/// documents, and the bulk consumer on the calling task. They are joined by a
/// bounded channel: the producer blocks while the channel is full, and closing
/// it (end of the walk) makes the consumer submit its last batch and return.
pub struct Indexer<S> {
    cache: LocalCache,
    sink: S,
    batch_size: usize,
    channel_capacity: usize,
}

impl<S: BulkSink> Indexer<S> {
    pub fn new(cache: LocalCache, sink: S) -> Self {
        Self {
            cache,
            sink,
            batch_size: DEFAULT_BATCH_SIZE,
            channel_capacity: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_config(mut self, config: &IndexingConfig) -> Self {
        self.batch_size = config.batch_size.max(1);
        self.channel_capacity = config.channel_capacity.max(1);
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Indexes every cached run, enriched with job timing when its jobs are cached.
    pub async fn index_runs(&self, workflow_id: WorkflowId) -> Result<BulkResult, IndexError> {
        self.index(workflow_id, RecordKind::Run, RUNS_INDEX, run_documents).await
    }

    /// Indexes every cached job as its own document.
    pub async fn index_jobs(&self, workflow_id: WorkflowId) -> Result<BulkResult, IndexError> {
        self.index(workflow_id, RecordKind::JobsForRun, JOBS_INDEX, job_documents).await
    }

    /// Indexes every step of every cached job, carrying its job and run fields.
    pub async fn index_steps(&self, workflow_id: WorkflowId) -> Result<BulkResult, IndexError> {
        self.index(workflow_id, RecordKind::JobsForRun, STEPS_INDEX, step_documents).await
    }

    /// Runs, then jobs, then steps. The first failing pass stops the rest.
    pub async fn index_all(&self, workflow_id: WorkflowId) -> Result<IndexSummary, IndexError> {
        let runs = self.index_runs(workflow_id).await?;
        let jobs = self.index_jobs(workflow_id).await?;
        let steps = self.index_steps(workflow_id).await?;
        Ok(IndexSummary { runs, jobs, steps })
    }

    async fn index(
        &self,
        workflow_id: WorkflowId,
        kind: RecordKind,
        index: &'static str,
        transform: Transform,
    ) -> Result<BulkResult, IndexError> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let cache = self.cache.clone();

        let producer = tokio::task::spawn_blocking(move || {
            for record in cache.iter(workflow_id, kind) {
                let record = match record {
                    Ok(record) => record,
                    Err(e) => {
                        log::warn!("Error reading {} record: {}", kind, e);
                        continue;
                    }
                };
                for doc in transform(&cache, workflow_id, &record) {
                    // Receiver dropped: the consumer gave up, stop reading.
                    if tx.blocking_send(doc).is_err() {
                        return;
                    }
                }
            }
        });

        let result = bulk_index(&self.sink, index, rx, self.batch_size).await;
        let joined = producer.await;

        let result = result?;
        joined.map_err(|source| IndexError::Producer { index, source })?;
        log::info!("Indexed {}: {}", index, result);
        Ok(result)
    }
}

fn decode_object(record: &StoredRecord) -> Option<Map<String, Value>> {
    match serde_json::from_slice(&record.bytes) {
        Ok(map) => Some(map),
        Err(e) => {
            log::warn!("Error decoding {:?}: {}", record.path, e);
            None
        }
    }
}

fn decode_job_set(record: &StoredRecord) -> Option<JobSet> {
    match serde_json::from_slice(&record.bytes) {
        Ok(set) => Some(set),
        Err(e) => {
            log::warn!("Error decoding jobs in {:?}: {}", record.path, e);
            None
        }
    }
}

fn run_documents(cache: &LocalCache, workflow_id: WorkflowId, record: &StoredRecord) -> Vec<Document> {
    let Some(mut run) = decode_object(record) else {
        return Vec::new();
    };
    let Some(run_id) = run.get_u64("id").map(RunId) else {
        log::warn!("Run in {:?} is missing its id field, skipping", record.path);
        return Vec::new();
    };

    match cache.load(workflow_id, run_id, RecordKind::JobsForRun) {
        Ok(bytes) => match serde_json::from_slice::<JobTimings>(&bytes) {
            Ok(jobs) => {
                if let Some(duration) = compute_run_duration(Some(&jobs)) {
                    duration.insert_into(&mut run);
                }
            }
            Err(e) => log::warn!("Error decoding jobs of run #{}, indexing without timing: {}", run_id, e),
        },
        Err(e) if e.is_not_found() => log::debug!("No jobs cached for run #{}", run_id),
        Err(e) => log::warn!("Error loading jobs of run #{}, indexing without timing: {}", run_id, e),
    }

    vec![Document {
        id: run_id.to_string(),
        body: Value::Object(run),
    }]
}

fn job_documents(_cache: &LocalCache, _workflow_id: WorkflowId, record: &StoredRecord) -> Vec<Document> {
    let Some(set) = decode_job_set(record) else {
        return Vec::new();
    };
    set.jobs
        .into_iter()
        .filter_map(|job| {
            let id = job.as_object()?.get_u64("id")?;
            Some(Document {
                id: id.to_string(),
                body: job,
            })
        })
        .collect()
}

/// Job and run fields copied onto each step of a job.
#[derive(Debug, Clone, Default, PartialEq)]
struct StepContext {
    job_id: u64,
    job_name: String,
    job_url: String,
    job_html_url: String,
    run_id: u64,
    run_url: String,
    run_html_url: String,
    run_attempt: u64,
    head_sha: String,
}

impl StepContext {
    fn from_job(job: &Map<String, Value>) -> Self {
        let text = |key: &str| job.get_str(key).unwrap_or_default().to_string();
        let run_url = text("run_url");
        Self {
            job_id: job.get_u64("id").unwrap_or_default(),
            job_name: text("name"),
            job_url: text("url"),
            job_html_url: text("html_url"),
            run_id: job.get_u64("run_id").unwrap_or_default(),
            run_html_url: run_html_url(&run_url),
            run_url,
            run_attempt: job.get_u64("run_attempt").unwrap_or_default(),
            head_sha: text("head_sha"),
        }
    }

    fn apply(&self, step: &mut Map<String, Value>) {
        step.insert("job_id".into(), self.job_id.into());
        step.insert("job_name".into(), self.job_name.clone().into());
        step.insert("job_url".into(), self.job_url.clone().into());
        step.insert("job_html_url".into(), self.job_html_url.clone().into());
        step.insert("run_id".into(), self.run_id.into());
        step.insert("run_url".into(), self.run_url.clone().into());
        step.insert("run_html_url".into(), self.run_html_url.clone().into());
        step.insert("run_attempt".into(), self.run_attempt.into());
        step.insert("head_sha".into(), self.head_sha.clone().into());
    }
}

/// Maps an API run URL to the browsable one.
///
/// `https://api.github.com/repos/o/r/actions/runs/9` -> `https://github.com/o/r/actions/runs/9`,
/// and `https://host/api/v3/repos/...` -> `https://host/...` for GitHub Enterprise.
/// Anything else is returned unchanged.
fn run_html_url(run_url: &str) -> String {
    if let Some(rest) = run_url.strip_prefix("https://api.github.com/repos/") {
        return format!("https://github.com/{}", rest);
    }
    if let Some((host, rest)) = run_url.split_once("/api/v3/repos/") {
        return format!("{}/{}", host, rest);
    }
    run_url.to_string()
}

fn step_number(step: &Map<String, Value>) -> String {
    match step.get("number") {
        Some(Value::Number(n)) => match n.as_u64() {
            Some(n) => n.to_string(),
            None => n.as_f64().map(|f| f.to_string()).unwrap_or_else(|| n.to_string()),
        },
        Some(Value::String(s)) => s.clone(),
        _ => "0".to_string(),
    }
}

fn step_documents(_cache: &LocalCache, _workflow_id: WorkflowId, record: &StoredRecord) -> Vec<Document> {
    let Some(set) = decode_job_set(record) else {
        return Vec::new();
    };

    let mut docs = Vec::new();
    for job in &set.jobs {
        let Some(job) = job.as_object() else {
            continue;
        };
        let Some(steps) = job.get_array("steps") else {
            continue;
        };
        let context = StepContext::from_job(job);

        for step in steps {
            let Some(step) = step.as_object() else {
                continue;
            };
            let mut body = step.clone();
            let number = step_number(&body);
            context.apply(&mut body);
            docs.push(Document {
                id: format!("{}-{}", context.job_id, number),
                body: Value::Object(body),
            });
        }
    }
    docs
}
