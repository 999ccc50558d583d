//! Long-lived jobs keyed by task id.
//!
//! A trigger source that fires by task id goes through the registry so the
//! same `Job` (and its in-flight guard) sees every trigger for that task.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::JobError;
use crate::job::{Job, JobDeps};

/// Registry of jobs, one per task.
pub struct JobRegistry {
    deps: JobDeps,
    jobs: RwLock<HashMap<i64, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new(deps: JobDeps) -> Self {
        Self {
            deps,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Get the job for a task, loading the definition on first use.
    pub async fn load(&self, task_id: i64) -> Result<Arc<Job>, JobError> {
        if let Some(job) = self.jobs.read().await.get(&task_id) {
            return Ok(Arc::clone(job));
        }

        let task = self
            .deps
            .tasks
            .get_task(task_id)
            .await
            .map_err(|source| JobError::Load {
                id: task_id,
                source,
            })?
            .ok_or(JobError::TaskNotFound { id: task_id })?;
        let job = Arc::new(Job::from_task(task, self.deps.clone())?);

        // Another caller may have loaded it while we were reading the store.
        let mut jobs = self.jobs.write().await;
        let job = jobs.entry(task_id).or_insert(job);
        tracing::debug!(task_id, "Job registered");
        Ok(Arc::clone(job))
    }

    /// Fire a run in the background.
    pub async fn trigger(&self, task_id: i64) -> Result<JoinHandle<()>, JobError> {
        let job = self.load(task_id).await?;
        Ok(tokio::spawn(async move { job.run().await }))
    }

    /// Forget a job, e.g. after its definition changed. Runs in progress finish.
    pub async fn remove(&self, task_id: i64) -> Option<Arc<Job>> {
        self.jobs.write().await.remove(&task_id)
    }

    /// Number of registered jobs.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}
