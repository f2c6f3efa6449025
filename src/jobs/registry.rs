use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::jobs::array::JobArray;
use crate::jobs::job::Job;

const DEFAULT_MAX_JOBS: usize = 10_000;

/// A job whose lock is held. Dropping the guard unlocks the job.
pub type LockedJob = OwnedMutexGuard<Job>;

/// An array whose lock is held.
pub type LockedArray = OwnedMutexGuard<JobArray>;

/// Authoritative in-memory table of jobs and job arrays.
///
/// Every job and every array sits behind its own lock. Lookups return the
/// object already locked. When both are needed the array is locked first
/// and member jobs are locked one at a time under it.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<Mutex<Job>>>>,
    arrays: RwLock<HashMap<String, Arc<Mutex<JobArray>>>>,
    max_jobs: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            arrays: RwLock::new(HashMap::new()),
            max_jobs,
        }
    }

    /// Add a job. Returns false if the registry is at capacity or the id is taken.
    pub async fn add_job(&self, job: Job) -> bool {
        let mut jobs = self.jobs.write().await;
        if jobs.len() >= self.max_jobs || jobs.contains_key(&job.id) {
            return false;
        }
        jobs.insert(job.id.clone(), Arc::new(Mutex::new(job)));
        true
    }

    pub async fn add_array(&self, array: JobArray) {
        self.arrays
            .write()
            .await
            .insert(array.id.clone(), Arc::new(Mutex::new(array)));
    }

    /// Resolve and lock a job. Waits for any current holder of the lock.
    ///
    /// Returns `None` if the job was removed while the lock was awaited.
    pub async fn find_job(&self, id: &str) -> Option<LockedJob> {
        lock_registered(&self.jobs, id).await
    }

    /// Resolve and lock a job array.
    pub async fn get_array(&self, id: &str) -> Option<LockedArray> {
        lock_registered(&self.arrays, id).await
    }

    /// Remove a job from the table. A holder of its lock keeps a valid guard
    /// but later lookups by id fail.
    pub async fn remove_job(&self, id: &str) -> bool {
        self.jobs.write().await.remove(id).is_some()
    }

    /// Clone of a job's current record, for inspection.
    pub async fn snapshot(&self, id: &str) -> Option<Job> {
        self.find_job(id).await.map(|job| job.clone())
    }

    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

/// Lock the entry for `id`, then check it is still the registered one.
async fn lock_registered<T>(
    table: &RwLock<HashMap<String, Arc<Mutex<T>>>>,
    id: &str,
) -> Option<OwnedMutexGuard<T>> {
    let handle = table.read().await.get(id).cloned()?;
    let guard = handle.clone().lock_owned().await;
    match table.read().await.get(id) {
        Some(current) if Arc::ptr_eq(current, &handle) => Some(guard),
        _ => None,
    }
}
