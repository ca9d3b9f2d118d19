use super::{Pipeline, PipelineError};
use crate::db::models::JobStatus;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Outcome of [`JobQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// The job is already queued or running; nothing was scheduled.
    AlreadyQueued,
}

type FinishHook = dyn Fn(i64, &Result<JobStatus, PipelineError>) + Send + Sync;

/// Ids currently queued or running, plus a condvar signalled on removal.
#[derive(Default)]
struct InFlight {
    ids: Mutex<HashSet<i64>>,
    idle: Condvar,
}

impl InFlight {
    // The set stays consistent even if a holder panicked, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.ids.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Removes its id from the in-flight set when dropped, including on panic.
struct InFlightGuard {
    in_flight: Arc<InFlight>,
    job_id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut ids = self.in_flight.lock();
        ids.remove(&self.job_id);
        if ids.is_empty() {
            self.in_flight.idle.notify_all();
        }
    }
}

/// Fixed pool of pipeline workers.
///
/// Enqueueing never blocks the caller. A job id is run by at most one worker
/// at a time.
pub struct JobQueue {
    pool: rayon::ThreadPool,
    pipeline: Arc<Pipeline>,
    in_flight: Arc<InFlight>,
    on_finish: Option<Arc<FinishHook>>,
}

impl JobQueue {
    pub fn new(pipeline: Arc<Pipeline>, workers: usize) -> Result<Self, QueueError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("stemforge-worker-{i}"))
            .panic_handler(|_| log::error!("Pipeline worker panicked"))
            .build()?;
        log::debug!("Job queue started with {} workers", workers.max(1));
        Ok(Self {
            pool,
            pipeline,
            in_flight: Arc::new(InFlight::default()),
            on_finish: None,
        })
    }

    /// Called on the worker thread after each run.
    pub fn on_finish(
        mut self,
        hook: impl Fn(i64, &Result<JobStatus, PipelineError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_finish = Some(Arc::new(hook));
        self
    }

    pub fn enqueue(&self, job_id: i64, input: PathBuf, high_quality: bool) -> Enqueued {
        if !self.in_flight.lock().insert(job_id) {
            log::warn!("Job {} is already queued, ignoring", job_id);
            return Enqueued::AlreadyQueued;
        }

        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            job_id,
        };
        let pipeline = self.pipeline.clone();
        let on_finish = self.on_finish.clone();

        self.pool.spawn(move || {
            let _guard = guard;
            let result = pipeline.start(job_id, &input, high_quality);
            if let Err(e) = &result {
                log::error!("Job {} could not be run: {}", job_id, e);
            }
            if let Some(hook) = on_finish {
                hook(job_id, &result);
            }
        });

        log::debug!("Job {} queued", job_id);
        Enqueued::Queued
    }

    /// Number of jobs queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Block until every queued job has finished.
    pub fn wait_idle(&self) {
        let mut ids = self.in_flight.lock();
        while !ids.is_empty() {
            ids = self
                .in_flight
                .idle
                .wait(ids)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}
