//! In-memory job table
//!
//! Tracks live stage executions for the status endpoint. Jobs are ephemeral
//! - completion state survives only through the artifact store.

use kproc_common::{FileId, Job, StageKind};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Clone, Default)]
pub struct JobTable {
    inner: Arc<RwLock<HashMap<(FileId, StageKind), Job>>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the job for a (file, stage) pair
    pub fn upsert(&self, job: Job) {
        let mut map = self.inner.write().expect("job table poisoned");
        map.insert((job.file_id, job.stage), job);
    }

    /// Apply a mutation to an existing job, if present
    pub fn update<F: FnOnce(&mut Job)>(&self, file_id: FileId, stage: StageKind, f: F) {
        let mut map = self.inner.write().expect("job table poisoned");
        if let Some(job) = map.get_mut(&(file_id, stage)) {
            f(job);
        }
    }

    pub fn get(&self, file_id: FileId, stage: StageKind) -> Option<Job> {
        self.inner
            .read()
            .expect("job table poisoned")
            .get(&(file_id, stage))
            .cloned()
    }

    /// All jobs for one file
    pub fn for_file(&self, file_id: FileId) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .inner
            .read()
            .expect("job table poisoned")
            .values()
            .filter(|j| j.file_id == file_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.stage.as_str());
        jobs
    }

    /// Drop all jobs for a file (delete endpoint)
    pub fn remove_file(&self, file_id: FileId) {
        self.inner
            .write()
            .expect("job table poisoned")
            .retain(|(id, _), _| *id != file_id);
    }
}
