use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::ids::{RunId, WorkflowId};
use crate::record::RecordKind;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("invalid cache directory {path:?}: {source}")]
    InvalidBase {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?} must be a directory")]
    NotADirectory { path: PathBuf },

    #[error("{kind} record for run {run_id} of workflow {workflow_id} not found at {path:?}")]
    NotFound {
        workflow_id: WorkflowId,
        run_id: RunId,
        kind: RecordKind,
        path: PathBuf,
    },

    #[error("{action} {path:?}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }

    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File-backed cache of raw upstream payloads.
///
/// Layout: `<base>/workflows/<workflow id>/<runs|jobs>/<run id>.json`. The layout is
/// shared with previously fetched caches and must not change.
///
/// The cache assumes a single writer process. Presence of a file is the only
/// bookkeeping: a run is "fetched" once its file exists.
#[derive(Debug, Clone)]
pub struct LocalCache {
    base: PathBuf,
}

impl LocalCache {
    /// Opens a cache rooted at an existing directory.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let base = base.into();
        let meta = fs::metadata(&base).map_err(|source| CacheError::InvalidBase {
            path: base.clone(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(CacheError::NotADirectory { path: base });
        }
        Ok(Self { base })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn kind_dir(&self, workflow_id: WorkflowId, kind: RecordKind) -> PathBuf {
        self.base
            .join("workflows")
            .join(workflow_id.to_string())
            .join(kind.dir_name())
    }

    pub fn path(&self, workflow_id: WorkflowId, run_id: RunId, kind: RecordKind) -> PathBuf {
        self.kind_dir(workflow_id, kind)
            .join(format!("{}.json", run_id))
    }

    pub fn exists(&self, workflow_id: WorkflowId, run_id: RunId, kind: RecordKind) -> bool {
        self.path(workflow_id, run_id, kind).is_file()
    }

    /// Writes a record, creating parent directories as needed.
    ///
    /// The blob is written to a sibling temp file and renamed into place, so a
    /// crash never leaves a truncated `<run id>.json` behind.
    pub fn save(
        &self,
        workflow_id: WorkflowId,
        run_id: RunId,
        kind: RecordKind,
        bytes: &[u8],
    ) -> Result<(), CacheError> {
        let path = self.path(workflow_id, run_id, kind);
        let dir = self.kind_dir(workflow_id, kind);
        fs::create_dir_all(&dir).map_err(|e| CacheError::io("creating directory", &dir, e))?;

        let tmp = dir.join(format!("{}.json.tmp", run_id));
        fs::write(&tmp, bytes).map_err(|e| CacheError::io("writing", &tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::io("renaming into", &path, e));
        }
        log::debug!("saved {} record for run {} at {:?}", kind, run_id, path);
        Ok(())
    }

    pub fn load(
        &self,
        workflow_id: WorkflowId,
        run_id: RunId,
        kind: RecordKind,
    ) -> Result<Vec<u8>, CacheError> {
        let path = self.path(workflow_id, run_id, kind);
        fs::read(&path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                CacheError::NotFound {
                    workflow_id,
                    run_id,
                    kind,
                    path,
                }
            } else {
                CacheError::io("reading", &path, source)
            }
        })
    }

    /// Lazily walks every stored record of one kind. Nothing is read until the
    /// first call to `next`, and each call to `iter` lists the directory afresh.
    pub fn iter(&self, workflow_id: WorkflowId, kind: RecordKind) -> RecordIter {
        RecordIter {
            dir: self.kind_dir(workflow_id, kind),
            state: IterState::Pending,
        }
    }

    /// Run IDs that have a record of the given kind.
    pub fn stored_run_ids(
        &self,
        workflow_id: WorkflowId,
        kind: RecordKind,
    ) -> Result<BTreeSet<RunId>, CacheError> {
        let dir = self.kind_dir(workflow_id, kind);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(CacheError::io("reading directory", &dir, e)),
        };

        let mut ids = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io("reading directory", &dir, e))?;
            let path = entry.path();
            if !is_record_file(&path) {
                continue;
            }
            let parsed = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<RunId>().ok());
            if let Some(id) = parsed {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Stored runs that still lack a jobs record.
    pub fn run_ids_without_jobs(&self, workflow_id: WorkflowId) -> Result<BTreeSet<RunId>, CacheError> {
        let runs = self.stored_run_ids(workflow_id, RecordKind::Run)?;
        let jobs = self.stored_run_ids(workflow_id, RecordKind::JobsForRun)?;
        Ok(runs.difference(&jobs).copied().collect())
    }
}

fn is_record_file(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json")
}

/// One record read from the cache, with the file it came from.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

enum IterState {
    Pending,
    Reading(fs::ReadDir),
    Done,
}

/// Iterator over the records of one kind for a workflow.
///
/// Per-entry failures are yielded inline and the walk goes on with the next
/// entry. A missing directory yields nothing; an unreadable one yields a single
/// error. Order follows the directory listing and is not guaranteed.
pub struct RecordIter {
    dir: PathBuf,
    state: IterState,
}

impl Iterator for RecordIter {
    type Item = Result<StoredRecord, CacheError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match &mut self.state {
                IterState::Done => return None,
                IterState::Pending => match fs::read_dir(&self.dir) {
                    Ok(entries) => self.state = IterState::Reading(entries),
                    Err(e) if e.kind() == ErrorKind::NotFound => {
                        self.state = IterState::Done;
                        return None;
                    }
                    Err(e) => {
                        self.state = IterState::Done;
                        return Some(Err(CacheError::io("reading directory", &self.dir, e)));
                    }
                },
                IterState::Reading(entries) => {
                    let entry = match entries.next() {
                        None => {
                            self.state = IterState::Done;
                            return None;
                        }
                        Some(Err(e)) => {
                            return Some(Err(CacheError::io("reading directory", &self.dir, e)))
                        }
                        Some(Ok(entry)) => entry,
                    };
                    let path = entry.path();
                    if !is_record_file(&path) {
                        continue;
                    }
                    return Some(match fs::read(&path) {
                        Ok(bytes) => Ok(StoredRecord { path, bytes }),
                        Err(e) => Err(CacheError::io("reading", &path, e)),
                    });
                }
            }
        }
    }
}
