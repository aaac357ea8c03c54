pub mod duration;
pub mod fields;
pub mod ids;
pub mod record;
pub mod store;

pub use duration::{compute_run_duration, RunDuration};
pub use fields::FieldsExt;
pub use ids::{RunId, WorkflowId};
pub use record::{JobSet, JobTiming, JobTimings, RecordKind};
pub use store::{CacheError, LocalCache, RecordIter, StoredRecord};

// Index names the documents are written to
pub const RUNS_INDEX: &str = "runs";
pub const JOBS_INDEX: &str = "jobs";
pub const STEPS_INDEX: &str = "steps";

// Config lookup: system-wide first, then the per-user fallback
pub const DEFAULT_CONFIG_PATH: &str = "/etc/gham/config.yaml";
pub const USER_CONFIG_PATH: &str = "~/.config/gham/config.yaml";
