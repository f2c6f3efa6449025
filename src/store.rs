use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{BatchError, Result};
use crate::jobs::Job;

/// How much of a job record a save writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Fixed-size state only (state, flags)
    Quick,
    /// The whole record including attributes
    Full,
}

/// Durable storage for job records.
pub trait JobStore: Send + Sync {
    fn save(&self, job: &Job, mode: SaveMode) -> Result<()>;
}

/// Keeps the latest copy of each job and a log of saves.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    saves: Mutex<Vec<(String, SaveMode)>>,
    jobs: Mutex<std::collections::HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every save issued so far, in order.
    pub fn saves(&self) -> Vec<(String, SaveMode)> {
        self.saves.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn saves_for(&self, job_id: &str) -> Vec<SaveMode> {
        self.saves()
            .into_iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, mode)| mode)
            .collect()
    }

    pub fn load(&self, job_id: &str) -> Option<Job> {
        self.jobs.lock().ok()?.get(job_id).cloned()
    }
}

impl JobStore for MemoryJobStore {
    fn save(&self, job: &Job, mode: SaveMode) -> Result<()> {
        self.saves
            .lock()
            .map_err(|_| BatchError::Persistence("save log poisoned".to_string()))?
            .push((job.id.clone(), mode));
        self.jobs
            .lock()
            .map_err(|_| BatchError::Persistence("job table poisoned".to_string()))?
            .insert(job.id.clone(), job.clone());
        Ok(())
    }
}

/// Writes each job as `<dir>/<id>.JB` in JSON.
///
/// Saves go to a temporary file that is renamed over the old record, so a
/// crash mid-write leaves the previous copy intact.
#[derive(Debug, Clone)]
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, job_id: &str) -> PathBuf {
        let name: String = job_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.JB", name))
    }

    pub fn load(&self, job_id: &str) -> Result<Job> {
        let path = self.path_for(job_id);
        let data = std::fs::read(&path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

impl JobStore for FileJobStore {
    fn save(&self, job: &Job, mode: SaveMode) -> Result<()> {
        let path = self.path_for(&job.id);
        let tmp = path.with_extension("JB.tmp");
        let data = serde_json::to_vec_pretty(job)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        tracing::trace!(job_id = %job.id, ?mode, path = %path.display(), "Job saved");
        Ok(())
    }
}
