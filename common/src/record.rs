use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two kinds of payload kept per run in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Run,
    JobsForRun,
}

impl RecordKind {
    /// Directory name under `workflows/<id>/` holding records of this kind.
    pub fn dir_name(self) -> &'static str {
        match self {
            RecordKind::Run => "runs",
            RecordKind::JobsForRun => "jobs",
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Run => write!(f, "run"),
            RecordKind::JobsForRun => write!(f, "jobs"),
        }
    }
}

/// Envelope persisted for the jobs of one run: `{"total_count": n, "jobs": [...]}`.
///
/// Jobs are kept as raw JSON so the cache stores exactly what upstream returned.
/// `total_count` defaults to zero when reading envelopes written without it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSet {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub jobs: Vec<Value>,
}

impl JobSet {
    pub fn new(jobs: Vec<Value>) -> Self {
        Self {
            total_count: jobs.len() as u64,
            jobs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// The subset of a job needed to compute run timing.
///
/// Upstream may send null for any of the strings; in-progress jobs always carry a
/// null `completed_at`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct JobTiming {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

/// Typed view of a jobs envelope used by the enricher.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobTimings {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub jobs: Vec<JobTiming>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_set_counts_jobs() {
        let set = JobSet::new(vec![json!({"id": 1}), json!({"id": 2})]);
        assert_eq!(set.total_count, 2);
        let bytes = serde_json::to_string(&set).unwrap();
        assert_eq!(bytes, r#"{"total_count":2,"jobs":[{"id":1},{"id":2}]}"#);
    }

    #[test]
    fn test_job_set_without_total_count() {
        let set: JobSet = serde_json::from_str(r#"{"jobs":[{"id":7}]}"#).unwrap();
        assert_eq!(set.total_count, 0);
        assert_eq!(set.jobs.len(), 1);
    }

    #[test]
    fn test_job_timing_tolerates_nulls() {
        let timings: JobTimings = serde_json::from_value(json!({
            "total_count": 1,
            "jobs": [{"id": 5, "name": "build", "started_at": "2021-10-12T01:56:28Z", "completed_at": null}]
        }))
        .unwrap();
        assert_eq!(timings.jobs[0].id, 5);
        assert_eq!(timings.jobs[0].completed_at, None);
        assert_eq!(timings.jobs[0].url, None);
    }

    #[test]
    fn test_kind_dir_names() {
        assert_eq!(RecordKind::Run.dir_name(), "runs");
        assert_eq!(RecordKind::JobsForRun.dir_name(), "jobs");
    }
}
