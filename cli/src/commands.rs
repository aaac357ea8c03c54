use std::path::Path;

use anyhow::Context;
use comfy_table::Table;
use common::{LocalCache, RecordKind, WorkflowId};
use gham_pipeline::config::Config;
use gham_pipeline::{
    BulkResult, ElasticClient, FetchError, Fetcher, GithubClient, IndexError, IndexSummary, Indexer,
    RateLimits, Repo, RunFilter,
};
use tokio_util::sync::CancellationToken;

use crate::{FetchArgs, IndexArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexTarget {
    Runs,
    Jobs,
    Steps,
    All,
}

fn open_cache(dir: &Path) -> anyhow::Result<LocalCache> {
    let dir = dir
        .canonicalize()
        .with_context(|| format!("Invalid cache directory: {:?}", dir))?;
    let cache = LocalCache::open(&dir).with_context(|| format!("Failed to open cache at {:?}", dir))?;
    Ok(cache)
}

fn fetcher(config: &Config, cancel: CancellationToken, dir: &Path) -> anyhow::Result<Fetcher<GithubClient>> {
    let cache = open_cache(dir)?;
    let client = GithubClient::new(&config.github, cancel).context("Failed to create GitHub client")?;
    Ok(Fetcher::new(client, cache).with_per_page(config.github.per_page))
}

fn report_fetch_error(err: FetchError) -> anyhow::Error {
    let fetched = err.fetched();
    if !fetched.is_empty() {
        log::warn!("{} runs were stored before the failure", fetched.len());
    }
    anyhow::Error::new(err).context("Fetch failed")
}

pub async fn fetch_runs(
    config: &Config,
    cancel: CancellationToken,
    args: &FetchArgs,
    created: Option<String>,
    with_jobs: bool,
) -> anyhow::Result<()> {
    let fetcher = fetcher(config, cancel, &args.destination)?;
    let repo = Repo::new(&args.owner, &args.repo);
    let filter = RunFilter::from_config(&config.github, created);

    log::info!("Fetching runs of workflow {} in {}", args.workflow_id, repo);
    let fetched = fetcher
        .fetch_runs(&repo, args.workflow_id, &filter)
        .await
        .map_err(report_fetch_error)?;
    println!("Fetched {} new runs of workflow {}", fetched.len(), args.workflow_id);

    if with_jobs && !fetched.is_empty() {
        fetcher
            .fetch_jobs(&repo, args.workflow_id, &fetched)
            .await
            .map_err(report_fetch_error)?;
    }
    Ok(())
}

pub async fn fetch_jobs(config: &Config, cancel: CancellationToken, args: &FetchArgs) -> anyhow::Result<()> {
    let fetcher = fetcher(config, cancel, &args.destination)?;
    let repo = Repo::new(&args.owner, &args.repo);

    fetcher
        .fetch_missing_jobs(&repo, args.workflow_id)
        .await
        .map_err(report_fetch_error)
}

pub async fn index(
    config: &Config,
    cancel: CancellationToken,
    target: IndexTarget,
    args: &IndexArgs,
) -> anyhow::Result<()> {
    let mut es_config = config.elasticsearch.clone();
    if let Some(url) = &args.url {
        es_config.url = Some(url.clone());
    }
    let client = ElasticClient::from_config(&es_config, cancel)?;
    let cache = open_cache(&args.source)?;
    let indexer = Indexer::new(cache, client).with_config(&config.indexing);

    let workflow_id = args.workflow_id;
    let summary = match target {
        IndexTarget::Runs => indexer.index_runs(workflow_id).await.map(|runs| IndexSummary {
            runs,
            ..IndexSummary::default()
        }),
        IndexTarget::Jobs => indexer.index_jobs(workflow_id).await.map(|jobs| IndexSummary {
            jobs,
            ..IndexSummary::default()
        }),
        IndexTarget::Steps => indexer.index_steps(workflow_id).await.map(|steps| IndexSummary {
            steps,
            ..IndexSummary::default()
        }),
        IndexTarget::All => indexer.index_all(workflow_id).await,
    };

    let summary = summary.map_err(|err: IndexError| {
        log::warn!("Indexed before the failure: {}", err.partial());
        anyhow::Error::new(err).context(format!("Indexing workflow {} failed", workflow_id))
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary_table(target, &summary));
    }
    Ok(())
}

fn summary_table(target: IndexTarget, summary: &IndexSummary) -> Table {
    let rows: Vec<(&str, &BulkResult)> = match target {
        IndexTarget::Runs => vec![(common::RUNS_INDEX, &summary.runs)],
        IndexTarget::Jobs => vec![(common::JOBS_INDEX, &summary.jobs)],
        IndexTarget::Steps => vec![(common::STEPS_INDEX, &summary.steps)],
        IndexTarget::All => vec![
            (common::RUNS_INDEX, &summary.runs),
            (common::JOBS_INDEX, &summary.jobs),
            (common::STEPS_INDEX, &summary.steps),
        ],
    };

    let mut table = Table::new();
    table.set_header(vec!["Index", "Total", "Successful", "Failed"]);
    for (index, result) in rows {
        table.add_row(vec![
            index.to_string(),
            result.total.to_string(),
            result.successful.to_string(),
            result.failed.to_string(),
        ]);
    }
    table
}

pub async fn rate_limit(config: &Config, cancel: CancellationToken) -> anyhow::Result<()> {
    use gham_pipeline::ActionsApi;

    let client = GithubClient::new(&config.github, cancel).context("Failed to create GitHub client")?;
    let limits = client.rate_limits().await.context("Failed to query the rate limit")?;
    println!("{}", rate_limit_table(&limits));
    Ok(())
}

fn rate_limit_table(limits: &RateLimits) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Resource", "Used", "Remaining", "Limit", "Resets at"]);
    for (resource, limit) in limits {
        let reset = limit
            .reset_at()
            .map(|at| at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            resource.clone(),
            limit.used.to_string(),
            limit.remaining.to_string(),
            limit.limit.to_string(),
            reset,
        ]);
    }
    table
}

pub fn cache_status(source: &Path, workflow_id: WorkflowId) -> anyhow::Result<()> {
    let cache = open_cache(source)?;
    let runs = cache.stored_run_ids(workflow_id, RecordKind::Run)?;
    let jobs = cache.stored_run_ids(workflow_id, RecordKind::JobsForRun)?;
    let missing = cache.run_ids_without_jobs(workflow_id)?;

    let mut table = Table::new();
    table.set_header(vec!["Workflow", "Runs", "Job sets", "Runs without jobs"]);
    table.add_row(vec![
        workflow_id.to_string(),
        runs.len().to_string(),
        jobs.len().to_string(),
        missing.len().to_string(),
    ]);
    println!("{}", table);

    if let (Some(first), Some(last)) = (runs.first(), runs.last()) {
        println!("Stored run IDs range from {} to {}", first, last);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::RunId;
    use gham_pipeline::RateLimit;

    #[test]
    fn test_summary_table_rows_follow_target() {
        let summary = IndexSummary {
            runs: BulkResult { total: 3, successful: 3, failed: 0 },
            ..IndexSummary::default()
        };
        assert_eq!(summary_table(IndexTarget::Runs, &summary).row_iter().count(), 1);
        assert_eq!(summary_table(IndexTarget::All, &summary).row_iter().count(), 3);
    }

    #[test]
    fn test_rate_limit_table_lists_resources() {
        let mut limits = RateLimits::new();
        limits.insert("core".into(), RateLimit { limit: 60, used: 1, remaining: 59, reset: 0 });
        limits.insert("search".into(), RateLimit { limit: 10, used: 0, remaining: 10, reset: 0 });

        let rendered = rate_limit_table(&limits).to_string();
        assert!(rendered.contains("core"));
        assert!(rendered.contains("59"));
    }

    #[test]
    fn test_cache_status_on_empty_cache() {
        let dir = tempfile::tempdir().unwrap();
        cache_status(dir.path(), WorkflowId(1)).unwrap();
    }

    #[test]
    fn test_open_cache_rejects_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_cache(&dir.path().join("missing")).is_err());

        let cache = open_cache(dir.path()).unwrap();
        cache
            .save(WorkflowId(1), RunId(2), RecordKind::Run, b"{}")
            .unwrap();
        assert!(cache.exists(WorkflowId(1), RunId(2), RecordKind::Run));
    }
}
