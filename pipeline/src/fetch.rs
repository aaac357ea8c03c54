use common::{FieldsExt, JobSet, LocalCache, RecordKind, RunId, WorkflowId};
use serde_json::Value;

use crate::error::{FetchError, HttpError};
use crate::github::{ActionsApi, Repo, RunFilter};

/// Upstream page size for both listings.
pub const PER_PAGE: u32 = 100;

#[derive(Debug, thiserror::Error)]
enum RunJobsError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error("encoding jobs: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Cache(#[from] common::CacheError),
}

/// Copies workflow runs and their jobs from the Actions API into the local cache.
///
/// Only records missing from the cache are fetched, so repeated invocations pick up
/// where the previous one stopped.
pub struct Fetcher<A> {
    api: A,
    cache: LocalCache,
    per_page: u32,
}

impl<A: ActionsApi> Fetcher<A> {
    pub fn new(api: A, cache: LocalCache) -> Self {
        Self {
            api,
            cache,
            per_page: PER_PAGE,
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Pages through the run listing and stores every run not yet cached.
    ///
    /// Returns the IDs of the runs stored by this call. A run that cannot be
    /// stored is logged and skipped; a failing listing aborts with the IDs stored
    /// so far attached to the error.
    pub async fn fetch_runs(
        &self,
        repo: &Repo,
        workflow_id: WorkflowId,
        filter: &RunFilter,
    ) -> Result<Vec<RunId>, FetchError> {
        let mut fetched = Vec::new();
        let mut page = 1;

        loop {
            let listing = match self
                .api
                .list_workflow_runs(repo, workflow_id, filter, page, self.per_page)
                .await
            {
                Ok(listing) => listing,
                Err(e) if e.is_cancelled() => return Err(FetchError::Cancelled { fetched }),
                Err(source) => {
                    return Err(FetchError::Listing {
                        workflow_id,
                        page,
                        fetched,
                        source,
                    })
                }
            };

            for run in &listing.items {
                if let Some(run_id) = self.store_run(workflow_id, run) {
                    fetched.push(run_id);
                }
            }

            match listing.next_page {
                Some(next) if next > page => page = next,
                Some(next) => {
                    log::warn!("Listing for workflow {} pointed back to page {} from page {}, stopping", workflow_id, next, page);
                    break;
                }
                None => break,
            }
        }

        log::info!("Fetched {} new runs of workflow {} in {}", fetched.len(), workflow_id, repo);
        Ok(fetched)
    }

    fn store_run(&self, workflow_id: WorkflowId, run: &Value) -> Option<RunId> {
        let Some(run_id) = run.as_object().and_then(|r| r.get_u64("id")).map(RunId) else {
            log::warn!("Skipping run without id in workflow {}", workflow_id);
            return None;
        };
        log::debug!("Processing run #{}", run_id);

        if self.cache.exists(workflow_id, run_id, RecordKind::Run) {
            log::debug!(
                "Run #{} already exists in {:?}",
                run_id,
                self.cache.path(workflow_id, run_id, RecordKind::Run)
            );
            return None;
        }

        let data = match serde_json::to_vec(run) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("Failed to encode run #{}: {}", run_id, e);
                return None;
            }
        };
        if let Err(e) = self.cache.save(workflow_id, run_id, RecordKind::Run, &data) {
            log::warn!("Failed to save run #{}: {}", run_id, e);
            return None;
        }
        Some(run_id)
    }

    /// Fetches and stores the complete job list of each run.
    ///
    /// An existing jobs record for a run is replaced. Failures are per run: they
    /// are logged and the next run is attempted. Only cancellation stops the loop.
    pub async fn fetch_jobs(
        &self,
        repo: &Repo,
        workflow_id: WorkflowId,
        run_ids: &[RunId],
    ) -> Result<(), FetchError> {
        let mut stored = 0usize;
        for &run_id in run_ids {
            match self.fetch_jobs_for_run(repo, workflow_id, run_id).await {
                Ok(count) => {
                    log::info!("Fetched {} jobs for run #{}", count, run_id);
                    stored += 1;
                }
                Err(RunJobsError::Http(e)) if e.is_cancelled() => {
                    return Err(FetchError::Cancelled { fetched: Vec::new() })
                }
                Err(e) => log::warn!("Failed to fetch jobs for run #{}: {}", run_id, e),
            }
        }
        log::info!("Stored jobs for {} of {} runs of workflow {}", stored, run_ids.len(), workflow_id);
        Ok(())
    }

    async fn fetch_jobs_for_run(
        &self,
        repo: &Repo,
        workflow_id: WorkflowId,
        run_id: RunId,
    ) -> Result<usize, RunJobsError> {
        log::info!("Fetching jobs for run #{}", run_id);
        let mut jobs = Vec::new();
        let mut page = 1;

        loop {
            let listing = self
                .api
                .list_jobs_for_run(repo, run_id, page, self.per_page)
                .await?;
            jobs.extend(listing.items);
            match listing.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        let count = jobs.len();
        let data = serde_json::to_vec(&JobSet::new(jobs))?;
        self.cache
            .save(workflow_id, run_id, RecordKind::JobsForRun, &data)?;
        Ok(count)
    }

    /// Backfills jobs for every cached run that has none yet.
    pub async fn fetch_missing_jobs(
        &self,
        repo: &Repo,
        workflow_id: WorkflowId,
    ) -> Result<(), FetchError> {
        let missing = self
            .cache
            .run_ids_without_jobs(workflow_id)
            .map_err(|source| FetchError::Cache {
                workflow_id,
                source,
            })?;

        if missing.is_empty() {
            log::info!("No runs without jobs found for workflow {}", workflow_id);
            return Ok(());
        }

        log::info!("Fetching jobs for {} runs", missing.len());
        let run_ids: Vec<RunId> = missing.into_iter().collect();
        self.fetch_jobs(repo, workflow_id, &run_ids).await
    }
}
