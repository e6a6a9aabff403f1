//! In-process job manager: a thread-per-job model where each submitted job
//! runs on its own `std::thread::Builder::spawn`'d worker, with state
//! guarded by `parking_lot::Mutex` (see `throttle::CallingThrottle` for the
//! same preference elsewhere in this crate).

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rand::distr::Alphanumeric;
use rand::Rng;

use crate::catalog::{self, CatalogPool};
use crate::progress::{CancelCheck, ProgressUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

/// In-memory job record.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub job_type: &'static str,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    pub error: Option<String>,
    pub db_job_id: Option<String>,
}

struct JobHandle {
    record: JobRecord,
    cancel_requested: Arc<AtomicBool>,
}

/// A process-wide singleton in the original; here an explicit instance the
/// binary constructs once and shares via `Arc`.
pub struct JobManager {
    jobs: Mutex<HashMap<String, JobHandle>>,
    catalog: CatalogPool,
}

fn random_job_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}

impl JobManager {
    pub fn new(catalog: CatalogPool) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            catalog,
        })
    }

    /// Submits a download job: allocates an id, creates the persistent
    /// `download_jobs` row, and spawns a worker thread that runs `task`.
    pub fn submit_download<F>(self: &Arc<Self>, doc_id: &str, library: &str, manifest_url: &str, task: F) -> String
    where
        F: FnOnce(crate::progress::ProgressCallback, CancelCheck) -> anyhow::Result<()> + Send + 'static,
    {
        let job_id = random_job_id();
        let cancel_requested = Arc::new(AtomicBool::new(false));

        {
            let mut jobs = self.jobs.lock();
            jobs.insert(
                job_id.clone(),
                JobHandle {
                    record: JobRecord {
                        id: job_id.clone(),
                        job_type: "download",
                        status: JobStatus::Pending,
                        progress: 0.0,
                        message: "Initializing...".to_string(),
                        error: None,
                        db_job_id: Some(job_id.clone()),
                    },
                    cancel_requested: cancel_requested.clone(),
                },
            );
        }

        if let Err(error) = catalog::create_download_job(&self.catalog, &job_id, doc_id, library, manifest_url) {
            tracing::error!(%error, job_id, "failed to record download job in catalog");
        }

        let manager = Arc::clone(self);
        let worker_job_id = job_id.clone();
        thread::Builder::new()
            .name(format!("download-job-{job_id}"))
            .spawn(move || manager.run_worker(worker_job_id, cancel_requested, task))
            .expect("spawning a job worker thread should not fail under normal OS conditions");

        job_id
    }

    fn run_worker<F>(self: Arc<Self>, job_id: String, cancel_requested: Arc<AtomicBool>, task: F)
    where
        F: FnOnce(crate::progress::ProgressCallback, CancelCheck) -> anyhow::Result<()> + Send + 'static,
    {
        self.mark_running(&job_id);

        let progress_manager = Arc::clone(&self);
        let progress_job_id = job_id.clone();
        let progress_callback: crate::progress::ProgressCallback = Box::new(move |update: ProgressUpdate| {
            progress_manager.on_progress(&progress_job_id, update);
        });

        let cancel_flag = cancel_requested.clone();
        let should_cancel: CancelCheck = Box::new(move || cancel_flag.load(Ordering::Relaxed));

        // A thread-per-job model needs an explicit panic guard, unlike
        // Python's threading.Thread which already isolates panics from
        // poisoning shared state; parking_lot::Mutex itself never poisons,
        // but the catalog writes below assume the task ran to a clean
        // Result rather than unwinding through them.
        let outcome = catch_unwind(AssertUnwindSafe(|| task(progress_callback, should_cancel)));

        match outcome {
            // The task itself returns cleanly once it stops scheduling further
            // work after a cancellation request; a clean return does not by
            // itself mean the job finished its intended work, so the
            // cancellation flag — not the task's Ok(()) — decides the final
            // status.
            Ok(Ok(())) if cancel_requested.load(Ordering::Relaxed) => self.mark_cancelled(&job_id),
            Ok(Ok(())) => self.mark_completed(&job_id),
            Ok(Err(error)) => {
                tracing::error!(job_id, %error, "download job failed");
                self.mark_failed(&job_id, &error.to_string());
            }
            Err(panic) => {
                let message = panic_message(&panic);
                tracing::error!(job_id, message, "download job panicked");
                self.mark_failed(&job_id, &message);
            }
        }

        self.finalize_incomplete_download(&job_id, &cancel_requested);
    }

    fn mark_running(&self, job_id: &str) {
        let mut jobs = self.jobs.lock();
        if let Some(handle) = jobs.get_mut(job_id) {
            handle.record.status = JobStatus::Running;
        }
        drop(jobs);
        if let Err(error) = catalog::mark_job_running(&self.catalog, job_id) {
            tracing::debug!(%error, job_id, "failed to mark job running in catalog");
        }
    }

    fn on_progress(&self, job_id: &str, update: ProgressUpdate) {
        {
            let mut jobs = self.jobs.lock();
            if let Some(handle) = jobs.get_mut(job_id) {
                handle.record.progress = update.fraction();
                handle.record.message = update
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("Processing {}/{}", update.current, update.total));
            }
        }
        if let Err(error) =
            catalog::update_job_progress(&self.catalog, job_id, update.current as i64, update.total as i64)
        {
            tracing::debug!(%error, job_id, "failed to update job progress in catalog");
        }
    }

    fn mark_completed(&self, job_id: &str) {
        {
            let mut jobs = self.jobs.lock();
            if let Some(handle) = jobs.get_mut(job_id) {
                handle.record.status = JobStatus::Completed;
                handle.record.progress = 1.0;
                handle.record.message = "Done".to_string();
            }
        }
        if let Err(error) = catalog::mark_job_completed(&self.catalog, job_id) {
            tracing::error!(%error, job_id, "failed to mark job completed in catalog");
        }
    }

    fn mark_cancelled(&self, job_id: &str) {
        {
            let mut jobs = self.jobs.lock();
            if let Some(handle) = jobs.get_mut(job_id) {
                handle.record.status = JobStatus::Cancelled;
                handle.record.message = "Cancelled by user".to_string();
            }
        }
        if let Err(error) = catalog::mark_job_cancelled(&self.catalog, job_id) {
            tracing::error!(%error, job_id, "failed to mark job cancelled in catalog");
        }
    }

    fn mark_failed(&self, job_id: &str, message: &str) {
        let mut jobs = self.jobs.lock();
        if let Some(handle) = jobs.get_mut(job_id) {
            handle.record.status = JobStatus::Failed;
            handle.record.error = Some(message.to_string());
            handle.record.message = format!("Error: {message}");
        }
    }

    /// The worker wrapper's `finally` branch: writes a
    /// last-chance catalog update with "Cancelled by user" if cancellation
    /// was requested and the job did not finish cleanly.
    fn finalize_incomplete_download(&self, job_id: &str, cancel_requested: &AtomicBool) {
        let status = {
            let jobs = self.jobs.lock();
            jobs.get(job_id).map(|handle| handle.record.status)
        };
        if matches!(status, Some(JobStatus::Completed) | Some(JobStatus::Cancelled)) {
            return;
        }

        let result = if cancel_requested.load(Ordering::Relaxed) {
            catalog::mark_job_cancelled(&self.catalog, job_id)
        } else {
            let message = {
                let jobs = self.jobs.lock();
                jobs.get(job_id)
                    .and_then(|handle| handle.record.error.clone())
                    .unwrap_or_else(|| "unknown error".to_string())
            };
            catalog::mark_job_error(&self.catalog, job_id, &message)
        };
        if let Err(error) = result {
            tracing::error!(%error, job_id, "failed to write final job state to catalog");
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.lock().get(job_id).map(|handle| handle.record.clone())
    }

    pub fn list(&self, active_only: bool) -> Vec<JobRecord> {
        self.jobs
            .lock()
            .values()
            .filter(|handle| !active_only || matches!(handle.record.status, JobStatus::Pending | JobStatus::Running))
            .map(|handle| handle.record.clone())
            .collect()
    }

    /// Sets `cancel_requested=true` on the first matching entry by either
    /// in-memory id or `db_job_id`.
    pub fn request_cancel(&self, id_or_db_id: &str) -> bool {
        let jobs = self.jobs.lock();
        let handle = jobs.get(id_or_db_id).or_else(|| {
            jobs.values()
                .find(|handle| handle.record.db_job_id.as_deref() == Some(id_or_db_id))
        });
        match handle {
            Some(handle) => {
                handle.cancel_requested.store(true, Ordering::Relaxed);
                if let Err(error) = catalog::mark_job_cancelling(&self.catalog, &handle.record.id) {
                    tracing::debug!(%error, "failed to mark job cancelling in catalog");
                }
                true
            }
            None => false,
        }
    }

    pub fn is_cancel_requested(&self, job_id: &str) -> bool {
        self.jobs
            .lock()
            .get(job_id)
            .map(|handle| handle.cancel_requested.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
