use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::record::{JobTiming, JobTimings};

/// Earliest job start and latest job completion of a run, with the jobs they came from.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RunDuration {
    pub jobs_started_at: String,
    pub jobs_started_at_id: u64,
    pub jobs_started_at_name: String,
    pub jobs_started_at_url: String,
    pub jobs_started_at_html_url: String,

    pub jobs_completed_at: String,
    pub jobs_completed_at_id: u64,
    pub jobs_completed_at_name: String,
    pub jobs_completed_at_url: String,
    pub jobs_completed_at_html_url: String,
}

impl RunDuration {
    fn set_start(&mut self, job: &JobTiming, started_at: &str) {
        self.jobs_started_at = started_at.to_string();
        self.jobs_started_at_id = job.id;
        self.jobs_started_at_name = job.name.clone().unwrap_or_default();
        self.jobs_started_at_url = job.url.clone().unwrap_or_default();
        self.jobs_started_at_html_url = job.html_url.clone().unwrap_or_default();
    }

    fn set_completion(&mut self, job: &JobTiming, completed_at: &str) {
        self.jobs_completed_at = completed_at.to_string();
        self.jobs_completed_at_id = job.id;
        self.jobs_completed_at_name = job.name.clone().unwrap_or_default();
        self.jobs_completed_at_url = job.url.clone().unwrap_or_default();
        self.jobs_completed_at_html_url = job.html_url.clone().unwrap_or_default();
    }

    /// Splices the ten `jobs_*` fields into a run document.
    pub fn insert_into(&self, run: &mut Map<String, Value>) {
        run.insert("jobs_started_at".into(), self.jobs_started_at.clone().into());
        run.insert("jobs_started_at_id".into(), self.jobs_started_at_id.into());
        run.insert("jobs_started_at_name".into(), self.jobs_started_at_name.clone().into());
        run.insert("jobs_started_at_url".into(), self.jobs_started_at_url.clone().into());
        run.insert("jobs_started_at_html_url".into(), self.jobs_started_at_html_url.clone().into());
        run.insert("jobs_completed_at".into(), self.jobs_completed_at.clone().into());
        run.insert("jobs_completed_at_id".into(), self.jobs_completed_at_id.into());
        run.insert("jobs_completed_at_name".into(), self.jobs_completed_at_name.clone().into());
        run.insert("jobs_completed_at_url".into(), self.jobs_completed_at_url.clone().into());
        run.insert("jobs_completed_at_html_url".into(), self.jobs_completed_at_html_url.clone().into());
    }
}

fn parse_timestamp(raw: Option<&str>) -> Option<(DateTime<FixedOffset>, &str)> {
    let raw = raw?;
    DateTime::parse_from_rfc3339(raw).ok().map(|ts| (ts, raw))
}

/// Computes the timing summary of a run from its jobs.
///
/// Jobs whose start or completion does not parse as RFC 3339 are ignored on both
/// sides. Ties keep the job seen first. Returns `None` only for a missing or empty
/// job set; when no job has both timestamps the summary is left at its defaults.
pub fn compute_run_duration(jobs: Option<&JobTimings>) -> Option<RunDuration> {
    let jobs = jobs?;
    if jobs.jobs.is_empty() {
        return None;
    }

    let mut result = RunDuration::default();
    let mut earliest_start: Option<DateTime<FixedOffset>> = None;
    let mut latest_completion: Option<DateTime<FixedOffset>> = None;

    for job in &jobs.jobs {
        let Some((started, started_raw)) = parse_timestamp(job.started_at.as_deref()) else {
            continue;
        };
        let Some((completed, completed_raw)) = parse_timestamp(job.completed_at.as_deref()) else {
            continue;
        };

        if earliest_start.map_or(true, |current| started < current) {
            earliest_start = Some(started);
            result.set_start(job, started_raw);
        }

        if latest_completion.map_or(true, |current| completed > current) {
            latest_completion = Some(completed);
            result.set_completion(job, completed_raw);
        }
    }

    Some(result)
}
