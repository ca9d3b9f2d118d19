//! Job orchestration: the multi-pass separation state machine.
//!
//! A run moves a job `pending -> processing -> completed | failed`, writing
//! progress checkpoints along the way:
//!
//! | checkpoint            | progress |
//! |-----------------------|----------|
//! | processing started    | 0.10     |
//! | base model loaded     | 0.20     |
//! | base pass complete    | 0.60     |
//! | refinement complete   | 0.85     |
//! | completed             | 1.00     |
//!
//! Final stems are committed in the same write that marks the job completed,
//! so a reader never sees a completed job without its stems.
//!
//! Entering `processing` is a conditional store update, so two workers
//! (threads or processes sharing the database) never run the same job. A
//! `processing` job is only taken over after its stale window has passed
//! without a write.

pub mod queue;

use crate::config::EngineConfig;
use crate::db::models::{Job, JobStatus, JobUpdate};
use crate::db::DbError;
use crate::separation::{EngineFactory, PassRunner, SeparationError};
use crate::stems::classify::{classify_base, classify_refinement, RefinementRoles};
use crate::stems::{Stem, StemMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use queue::{Enqueued, JobQueue};

const PROGRESS_STARTED: f64 = 0.1;
const PROGRESS_LOADED: f64 = 0.2;
const PROGRESS_BASE_DONE: f64 = 0.6;
const PROGRESS_REFINED: f64 = 0.85;

/// Persistent job records as the orchestrator sees them.
pub trait JobStore: Send + Sync {
    fn get_job(&self, id: i64) -> Result<Option<Job>, DbError>;

    /// Move a pending (or stale processing) job to processing for `owner`,
    /// optionally raising its progress. `false` if someone else holds it or
    /// it is already terminal.
    fn claim_job(
        &self,
        id: i64,
        owner: &str,
        progress: Option<f64>,
        stale_after_secs: u64,
    ) -> Result<bool, DbError>;

    /// Atomic partial update. Unknown ids are an error.
    fn update_job(&self, id: i64, update: &JobUpdate) -> Result<(), DbError>;
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Job store error: {0}")]
    Store(#[from] DbError),
    #[error("Job {0} not found")]
    JobNotFound(i64),
    #[error("input file not found")]
    InputMissing,
    #[error(transparent)]
    Separation(#[from] SeparationError),
}

/// Runs jobs through base separation, optional vocal refinement and stem
/// assembly.
pub struct Pipeline {
    store: Arc<dyn JobStore>,
    factory: Arc<dyn EngineFactory>,
    base_model: String,
    vocal_model: String,
    roles: RefinementRoles,
    stems_dir: PathBuf,
    owner: String,
    stale_after_secs: u64,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        factory: Arc<dyn EngineFactory>,
        engine: &EngineConfig,
        stems_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            factory,
            base_model: engine.base_model.clone(),
            vocal_model: engine.vocal_model.clone(),
            roles: engine.refinement_roles(),
            stems_dir,
            owner: format!("pid {}", std::process::id()),
            stale_after_secs: engine.stale_window(),
        }
    }

    /// Directory a job's base-pass outputs are written to.
    pub fn job_dir(&self, job_id: i64) -> PathBuf {
        self.stems_dir.join(job_id.to_string())
    }

    /// Run one job to a terminal state and return that state.
    ///
    /// Separation failures end up recorded on the job and are not returned
    /// as errors. `Err` means the job could not be run or a store write
    /// failed; in the latter case the job keeps its last committed state.
    /// A job held by another live run is left alone and its current status
    /// (normally `Processing`) is returned.
    pub fn start(
        &self,
        job_id: i64,
        input: &Path,
        high_quality: bool,
    ) -> Result<JobStatus, PipelineError> {
        let job = self
            .store
            .get_job(job_id)?
            .ok_or(PipelineError::JobNotFound(job_id))?;

        if job.status.is_terminal() {
            log::info!("Job {} already {}, nothing to do", job_id, job.status);
            return Ok(job.status);
        }

        let input_present = input.is_file();
        let mut progress = Checkpoints::new(job_id, job.progress);
        let started = if input_present {
            progress.claim(PROGRESS_STARTED)
        } else {
            None
        };
        if !self
            .store
            .claim_job(job_id, &self.owner, started, self.stale_after_secs)?
        {
            let current = self
                .store
                .get_job(job_id)?
                .ok_or(PipelineError::JobNotFound(job_id))?;
            log::info!(
                "Job {} is held by {}, skipping",
                job_id,
                current.claimed_by.as_deref().unwrap_or("another run")
            );
            return Ok(current.status);
        }
        if job.status == JobStatus::Processing {
            log::warn!(
                "Job {} was abandoned by {}, resuming",
                job_id,
                job.claimed_by.as_deref().unwrap_or("an earlier run")
            );
        }

        if !input_present {
            log::error!("Job {}: input file not found: {}", job_id, input.display());
            self.store
                .update_job(job_id, &JobUpdate::fail(PipelineError::InputMissing.to_string()))?;
            return Ok(JobStatus::Failed);
        }
        log::info!("Job {}: processing {}", job_id, input.display());

        match self.separate(job_id, input, high_quality, &mut progress) {
            Ok(stems) => {
                let names: Vec<&'static str> = stems.iter().map(|(s, _)| s.name()).collect();
                self.store.update_job(job_id, &JobUpdate::complete(stems))?;
                log::info!("Job {}: completed with {}", job_id, names.join(", "));
                Ok(JobStatus::Completed)
            }
            Err(PipelineError::Store(e)) => {
                log::error!("Job {}: store write failed, aborting run: {}", job_id, e);
                Err(PipelineError::Store(e))
            }
            Err(e) => {
                log::error!("Job {}: failed: {}", job_id, e);
                self.store.update_job(job_id, &JobUpdate::fail(e.to_string()))?;
                Ok(JobStatus::Failed)
            }
        }
    }

    fn separate(
        &self,
        job_id: i64,
        input: &Path,
        high_quality: bool,
        progress: &mut Checkpoints,
    ) -> Result<StemMap, PipelineError> {
        let runner = PassRunner::new(self.factory.as_ref());
        let job_dir = self.job_dir(job_id);

        let base_pass = runner.load(&self.base_model)?;
        progress.advance(self.store.as_ref(), PROGRESS_LOADED)?;
        let outputs = base_pass.run(input, &job_dir)?;
        progress.advance(self.store.as_ref(), PROGRESS_BASE_DONE)?;

        let base = classify_base(&outputs);
        if !base.discarded.is_empty() {
            log::debug!("Job {}: discarded {} base outputs", job_id, base.discarded.len());
        }
        let mut stems = base.instruments;

        let mut lead = None;
        match (&base.vocals, high_quality) {
            (Some(vocals), true) => {
                let outputs = runner.run_pass(vocals, &self.vocal_model, &job_dir.join("vocals"))?;
                let refined = classify_refinement(&outputs, &self.roles);
                progress.advance(self.store.as_ref(), PROGRESS_REFINED)?;

                if refined.lead.is_none() {
                    log::warn!("Job {}: refinement produced no lead vocal, using base vocals", job_id);
                }
                lead = refined.lead;
                if let Some(backing) = refined.backing {
                    stems.insert(Stem::BackingVocals, backing);
                }
            }
            (None, true) => {
                log::info!("Job {}: no vocal output, skipping refinement", job_id);
            }
            _ => {}
        }

        if let Some(lead) = lead.or(base.vocals) {
            stems.insert(Stem::LeadVocals, lead);
        }
        Ok(stems)
    }
}

/// Progress writes for one run. Values at or below the last written
/// checkpoint are never sent.
struct Checkpoints {
    job_id: i64,
    last: f64,
}

impl Checkpoints {
    fn new(job_id: i64, stored: f64) -> Self {
        Self { job_id, last: stored }
    }

    /// Reserve `value` if it moves progress forward.
    fn claim(&mut self, value: f64) -> Option<f64> {
        if value > self.last {
            self.last = value;
            Some(value)
        } else {
            None
        }
    }

    fn advance(&mut self, store: &dyn JobStore, value: f64) -> Result<(), PipelineError> {
        if let Some(p) = self.claim(value) {
            store.update_job(self.job_id, &JobUpdate::progress(p))?;
            log::debug!("Job {}: progress {:.2}", self.job_id, p);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::models::NewJob;
    use crate::db::Database;
    use crate::separation::SeparationEngine;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub(crate) const BASE: &str = "base-6s";
    pub(crate) const VOCAL: &str = "vocal-karaoke";

    /// Per-model behavior: file names to write, or an error message.
    type Script = HashMap<&'static str, Result<Vec<&'static str>, &'static str>>;

    struct ScriptedEngine {
        script: Arc<Script>,
        calls: Arc<Mutex<Vec<(String, PathBuf)>>>,
        model: Option<&'static str>,
    }

    impl SeparationEngine for ScriptedEngine {
        fn load(&mut self, model: &str) -> Result<(), SeparationError> {
            let (name, _) = self.script.get_key_value(model).ok_or_else(|| {
                SeparationError::ModelLoad {
                    model: model.to_string(),
                    message: "unknown model".to_string(),
                }
            })?;
            self.model = Some(*name);
            Ok(())
        }

        fn separate(&mut self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, SeparationError> {
            let model = self.model.ok_or(SeparationError::NoModel)?;
            self.calls
                .lock()
                .unwrap()
                .push((model.to_string(), input.to_path_buf()));
            match &self.script[model] {
                Ok(names) => names
                    .iter()
                    .map(|n| -> Result<PathBuf, SeparationError> {
                        let p = output_dir.join(n);
                        std::fs::write(&p, b"stem")?;
                        Ok(p)
                    })
                    .collect(),
                Err(message) => Err(SeparationError::Engine {
                    input: input.display().to_string(),
                    message: message.to_string(),
                }),
            }
        }
    }

    pub(crate) struct ScriptedFactory {
        script: Arc<Script>,
        pub(crate) calls: Arc<Mutex<Vec<(String, PathBuf)>>>,
        pub(crate) created: AtomicUsize,
    }

    impl ScriptedFactory {
        pub(crate) fn new(script: Script) -> Self {
            Self {
                script: Arc::new(script),
                calls: Default::default(),
                created: AtomicUsize::new(0),
            }
        }

        pub(crate) fn base_only(names: Vec<&'static str>) -> Self {
            Self::new(HashMap::from([(BASE, Ok(names))]))
        }

        pub(crate) fn models_run(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
        }
    }

    impl EngineFactory for ScriptedFactory {
        fn create(&self) -> Result<Box<dyn SeparationEngine>, SeparationError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedEngine {
                script: self.script.clone(),
                calls: self.calls.clone(),
                model: None,
            }))
        }
    }

    /// Wraps the database and records every update.
    struct RecordingStore {
        db: Database,
        writes: Mutex<Vec<JobUpdate>>,
        fail_after: Option<usize>,
    }

    impl RecordingStore {
        fn new(fail_after: Option<usize>) -> Self {
            Self {
                db: Database::open_in_memory().unwrap(),
                writes: Mutex::new(Vec::new()),
                fail_after,
            }
        }

        fn progress_writes(&self) -> Vec<f64> {
            self.writes.lock().unwrap().iter().filter_map(|w| w.progress).collect()
        }
    }

    impl JobStore for RecordingStore {
        fn get_job(&self, id: i64) -> Result<Option<Job>, DbError> {
            self.db.get_job(id)
        }

        fn claim_job(
            &self,
            id: i64,
            owner: &str,
            progress: Option<f64>,
            stale_after_secs: u64,
        ) -> Result<bool, DbError> {
            let mut writes = self.writes.lock().unwrap();
            if self.fail_after.is_some_and(|n| writes.len() >= n) {
                return Err(DbError::Migration("disk full".into()));
            }
            let claimed = self.db.claim_job(id, owner, progress, stale_after_secs)?;
            if claimed {
                writes.push(JobUpdate {
                    status: Some(JobStatus::Processing),
                    progress,
                    ..Default::default()
                });
            }
            Ok(claimed)
        }

        fn update_job(&self, id: i64, update: &JobUpdate) -> Result<(), DbError> {
            let mut writes = self.writes.lock().unwrap();
            if self.fail_after.is_some_and(|n| writes.len() >= n) {
                return Err(DbError::Migration("disk full".into()));
            }
            writes.push(update.clone());
            self.db.update_job(id, update)
        }
    }

    pub(crate) fn engine_config() -> EngineConfig {
        EngineConfig {
            base_model: BASE.to_string(),
            vocal_model: VOCAL.to_string(),
            ..EngineConfig::default()
        }
    }

    pub(crate) struct Fixture {
        pub(crate) dir: tempfile::TempDir,
        pub(crate) input: PathBuf,
    }

    pub(crate) fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("song.wav");
        std::fs::write(&input, b"RIFF").unwrap();
        Fixture { dir, input }
    }

    pub(crate) fn pipeline(store: Arc<dyn JobStore>, factory: Arc<ScriptedFactory>, fx: &Fixture) -> Pipeline {
        Pipeline::new(store, factory, &engine_config(), fx.dir.path().join("stems"))
    }

    pub(crate) fn create_job(db: &Database, fx: &Fixture) -> i64 {
        db.create_job(&NewJob {
            filename: "song.wav".to_string(),
            input_path: fx.input.clone(),
            high_quality: false,
        })
        .unwrap()
    }

    /// Backdate the job's last write so its processing claim looks abandoned.
    pub(crate) fn abandon(db: &Database, id: i64) {
        db.conn()
            .unwrap()
            .execute(
                "UPDATE jobs SET updated_at = datetime('now', '-1 days') WHERE id = ?1",
                rusqlite::params![id],
            )
            .unwrap();
    }

    fn stem_file(job: &Job, stem: Stem) -> Option<String> {
        job.stems
            .as_ref()?
            .get(stem)
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    #[test]
    fn test_basic_run_maps_vocals_and_drums() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::base_only(vec!["song_(Vocals).wav", "song_(Drums).wav"]));
        let id = create_job(&db, &fx);

        let status = pipeline(db.clone(), factory.clone(), &fx)
            .start(id, &fx.input, false)
            .unwrap();
        assert_eq!(status, JobStatus::Completed);

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 1.0);
        let stems = job.stems.as_ref().unwrap();
        assert_eq!(stems.len(), 2);
        assert_eq!(stem_file(&job, Stem::LeadVocals).as_deref(), Some("song_(Vocals).wav"));
        assert_eq!(stem_file(&job, Stem::Drums).as_deref(), Some("song_(Drums).wav"));
        assert!(stems.iter().all(|(_, p)| p.starts_with(fx.dir.path().join("stems").join(id.to_string()))));
        assert_eq!(factory.models_run(), vec![BASE]);
    }

    #[test]
    fn test_missing_input_fails_without_engine() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::base_only(vec!["song_(Vocals).wav"]));
        let id = create_job(&db, &fx);

        let missing = fx.dir.path().join("gone.wav");
        let status = pipeline(db.clone(), factory.clone(), &fx)
            .start(id, &missing, true)
            .unwrap();
        assert_eq!(status, JobStatus::Failed);

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.error.as_deref(), Some("input file not found"));
        assert_eq!(job.progress, 0.0);
        assert!(job.stems.is_none());
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_refinement_splits_lead_and_backing() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::new(HashMap::from([
            (BASE, Ok(vec!["song_(Vocals).wav", "song_(Bass).wav"])),
            (VOCAL, Ok(vec!["song_(Vocals)_(Vocals).wav", "song_(Vocals)_(Instrumental).wav"])),
        ])));
        let id = create_job(&db, &fx);

        pipeline(db.clone(), factory.clone(), &fx)
            .start(id, &fx.input, true)
            .unwrap();

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(
            stem_file(&job, Stem::LeadVocals).as_deref(),
            Some("song_(Vocals)_(Vocals).wav")
        );
        assert_eq!(
            stem_file(&job, Stem::BackingVocals).as_deref(),
            Some("song_(Vocals)_(Instrumental).wav")
        );
        assert_eq!(stem_file(&job, Stem::Bass).as_deref(), Some("song_(Bass).wav"));

        // refinement ran on the base vocal output, into the vocals subdirectory
        let calls = factory.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].1.file_name().unwrap(), "song_(Vocals).wav");
        let lead = job.stems.as_ref().unwrap().get(Stem::LeadVocals).unwrap();
        assert!(lead.parent().unwrap().ends_with("vocals"));
    }

    #[test]
    fn test_refinement_without_lead_falls_back_to_base_vocals() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::new(HashMap::from([
            (BASE, Ok(vec!["song_(Vocals).wav"])),
            (VOCAL, Ok(vec!["song_(Vocals)_(Instrumental).wav"])),
        ])));
        let id = create_job(&db, &fx);

        pipeline(db.clone(), factory, &fx).start(id, &fx.input, true).unwrap();

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(stem_file(&job, Stem::LeadVocals).as_deref(), Some("song_(Vocals).wav"));
        assert_eq!(
            stem_file(&job, Stem::BackingVocals).as_deref(),
            Some("song_(Vocals)_(Instrumental).wav")
        );
    }

    #[test]
    fn test_high_quality_without_vocals_skips_refinement() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::base_only(vec!["song_(Drums).wav", "song_(Piano).wav"]));
        let id = create_job(&db, &fx);

        let status = pipeline(db.clone(), factory.clone(), &fx)
            .start(id, &fx.input, true)
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(factory.models_run(), vec![BASE]);

        let job = db.get_job(id).unwrap().unwrap();
        let stems = job.stems.unwrap();
        assert!(!stems.contains(Stem::LeadVocals));
        assert!(!stems.contains(Stem::BackingVocals));
        assert_eq!(stems.len(), 2);
    }

    #[test]
    fn test_unmatched_outputs_are_dropped() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::base_only(vec!["song_(Vocals).wav", "song_(Karaoke).wav"]));
        let id = create_job(&db, &fx);

        pipeline(db.clone(), factory, &fx).start(id, &fx.input, false).unwrap();
        let stems = db.get_job(id).unwrap().unwrap().stems.unwrap();
        assert_eq!(stems.len(), 1);
        assert!(stems.contains(Stem::LeadVocals));
    }

    #[test]
    fn test_base_engine_failure_marks_failed() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::new(HashMap::from([(BASE, Err("CUDA out of memory"))])));
        let id = create_job(&db, &fx);

        let status = pipeline(db.clone(), factory, &fx).start(id, &fx.input, false).unwrap();
        assert_eq!(status, JobStatus::Failed);

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("CUDA out of memory"));
        assert!(job.stems.is_none());
        assert_eq!(job.progress, PROGRESS_LOADED);
    }

    #[test]
    fn test_refinement_failure_marks_failed() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::new(HashMap::from([
            (BASE, Ok(vec!["song_(Vocals).wav"])),
            (VOCAL, Err("bad checkpoint")),
        ])));
        let id = create_job(&db, &fx);

        pipeline(db.clone(), factory, &fx).start(id, &fx.input, true).unwrap();
        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.stems.is_none());
        assert_eq!(job.progress, PROGRESS_BASE_DONE);
    }

    #[test]
    fn test_model_load_failure_marks_failed() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        // script has no entry for the base model
        let factory = Arc::new(ScriptedFactory::new(HashMap::from([(VOCAL, Ok(vec![]))])));
        let id = create_job(&db, &fx);

        pipeline(db.clone(), factory, &fx).start(id, &fx.input, false).unwrap();
        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains(BASE));
        assert_eq!(job.progress, PROGRESS_STARTED);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let fx = fixture();
        let store = Arc::new(RecordingStore::new(None));
        let factory = Arc::new(ScriptedFactory::new(HashMap::from([
            (BASE, Ok(vec!["song_(Vocals).wav"])),
            (VOCAL, Ok(vec!["v_(Vocals).wav"])),
        ])));
        let id = create_job(&store.db, &fx);

        pipeline(store.clone(), factory, &fx).start(id, &fx.input, true).unwrap();
        assert_eq!(store.progress_writes(), vec![0.1, 0.2, 0.6, 0.85, 1.0]);

        let writes = store.writes.lock().unwrap();
        assert_eq!(writes.first().unwrap().status, Some(JobStatus::Processing));
        let last = writes.last().unwrap();
        assert_eq!(last.status, Some(JobStatus::Completed));
        assert!(last.stems.is_some());
    }

    #[test]
    fn test_resumed_job_never_lowers_progress() {
        let fx = fixture();
        let store = Arc::new(RecordingStore::new(None));
        let factory = Arc::new(ScriptedFactory::base_only(vec!["song_(Drums).wav"]));
        let id = create_job(&store.db, &fx);
        // left behind by a crashed run after the base pass
        assert!(store.db.claim_job(id, "pid 1", Some(PROGRESS_BASE_DONE), 60).unwrap());
        abandon(&store.db, id);

        let status = pipeline(store.clone(), factory, &fx).start(id, &fx.input, false).unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(store.progress_writes(), vec![1.0]);
        let job = store.db.get_job(id).unwrap().unwrap();
        assert_eq!(job.claimed_by, Some(format!("pid {}", std::process::id())));
    }

    #[test]
    fn test_job_held_by_live_run_is_left_alone() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::base_only(vec!["song_(Drums).wav"]));
        let id = create_job(&db, &fx);
        assert!(db.claim_job(id, "pid 1", Some(PROGRESS_STARTED), 60).unwrap());

        let status = pipeline(db.clone(), factory.clone(), &fx)
            .start(id, &fx.input, false)
            .unwrap();
        assert_eq!(status, JobStatus::Processing);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);

        let job = db.get_job(id).unwrap().unwrap();
        assert_eq!(job.claimed_by.as_deref(), Some("pid 1"));
        assert_eq!(job.progress, PROGRESS_STARTED);
    }

    #[test]
    fn test_store_failure_aborts_run() {
        let fx = fixture();
        // start write succeeds, the first checkpoint fails
        let store = Arc::new(RecordingStore::new(Some(1)));
        let factory = Arc::new(ScriptedFactory::base_only(vec!["song_(Vocals).wav"]));
        let id = create_job(&store.db, &fx);

        let result = pipeline(store.clone(), factory.clone(), &fx).start(id, &fx.input, false);
        assert!(matches!(result, Err(PipelineError::Store(_))));

        let job = store.db.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, PROGRESS_STARTED);
        assert!(factory.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_terminal_job_is_not_rerun() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::base_only(vec!["song_(Vocals).wav"]));
        let id = create_job(&db, &fx);
        let p = pipeline(db.clone(), factory.clone(), &fx);

        assert_eq!(p.start(id, &fx.input, false).unwrap(), JobStatus::Completed);
        let before = db.get_job(id).unwrap().unwrap();
        assert_eq!(p.start(id, &fx.input, false).unwrap(), JobStatus::Completed);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert_eq!(db.get_job(id).unwrap().unwrap().updated_at, before.updated_at);
    }

    #[test]
    fn test_unknown_job() {
        let fx = fixture();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let factory = Arc::new(ScriptedFactory::base_only(vec![]));
        let result = pipeline(db, factory, &fx).start(404, &fx.input, false);
        assert!(matches!(result, Err(PipelineError::JobNotFound(404))));
    }
}
