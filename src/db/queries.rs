use super::models::{Job, JobStatus, JobUpdate, NewJob};
use super::{Database, DbError, Result};
use crate::chords::ChordEvent;
use crate::pipeline::JobStore;
use crate::stems::StemMap;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::path::PathBuf;

const JOB_COLUMNS: &str = "id, filename, input_path, status, progress, stems, error_message,
     chords, created_at, updated_at, high_quality, claimed_by";

/// Raw column values, decoded into a [`Job`] outside the row closure so JSON
/// errors can be reported against the job id.
struct JobRow {
    id: i64,
    filename: String,
    input_path: String,
    status: String,
    progress: f64,
    stems: Option<String>,
    error: Option<String>,
    chords: Option<String>,
    created_at: String,
    updated_at: String,
    high_quality: bool,
    claimed_by: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            filename: row.get(1)?,
            input_path: row.get(2)?,
            status: row.get(3)?,
            progress: row.get(4)?,
            stems: row.get(5)?,
            error: row.get(6)?,
            chords: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            high_quality: row.get(10)?,
            claimed_by: row.get(11)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let id = self.id;
        let corrupt = |message: String| DbError::Corrupt { id, message };

        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        let stems = self
            .stems
            .as_deref()
            .map(StemMap::from_json)
            .transpose()
            .map_err(|e| corrupt(format!("stems: {e}")))?;
        let chords = self
            .chords
            .as_deref()
            .map(serde_json::from_str::<Vec<ChordEvent>>)
            .transpose()
            .map_err(|e| corrupt(format!("chords: {e}")))?;

        Ok(Job {
            id,
            filename: self.filename,
            input_path: PathBuf::from(self.input_path),
            high_quality: self.high_quality,
            status,
            progress: self.progress,
            stems,
            error: self.error,
            chords,
            claimed_by: self.claimed_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl Database {
    /// Insert a new pending job. Returns the job id.
    pub fn create_job(&self, job: &NewJob) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO jobs (filename, input_path, high_quality, status, progress)
             VALUES (?1, ?2, ?3, 'pending', 0.0)",
            params![job.filename, job.input_path.to_string_lossy(), job.high_quality],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_job(&self, id: i64) -> Result<Option<Job>> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                JobRow::from_row,
            )
            .optional()?
        };
        row.map(JobRow::into_job).transpose()
    }

    /// Atomically take a job for `owner`: pending -> processing.
    ///
    /// A job already in processing is only taken over once it has gone
    /// `stale_after_secs` without a write, so a live run elsewhere is never
    /// joined. `progress` (if any) is written in the same statement.
    /// Returns `false` when the job was not claimable.
    pub fn claim_job(
        &self,
        id: i64,
        owner: &str,
        progress: Option<f64>,
        stale_after_secs: u64,
    ) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE jobs
             SET status = 'processing',
                 claimed_by = ?2,
                 progress = MAX(progress, COALESCE(?3, progress)),
                 updated_at = datetime('now')
             WHERE id = ?1
               AND (status = 'pending'
                    OR (status = 'processing' AND updated_at <= datetime('now', ?4)))",
            params![id, owner, progress, stale_modifier(stale_after_secs)],
        )?;
        Ok(changed == 1)
    }

    /// Apply a partial update in one statement.
    ///
    /// Progress is clamped with `MAX` so a late or out-of-order write can
    /// never move it backwards.
    pub fn update_job(&self, id: i64, update: &JobUpdate) -> Result<()> {
        let mut sets: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = update.status {
            values.push(Value::Text(status.as_str().to_string()));
            sets.push(format!("status = ?{}", values.len()));
        }
        if let Some(progress) = update.progress {
            values.push(Value::Real(progress.clamp(0.0, 1.0)));
            sets.push(format!("progress = MAX(progress, ?{})", values.len()));
        }
        if let Some(stems) = &update.stems {
            values.push(Value::Text(stems.to_json()));
            sets.push(format!("stems = ?{}", values.len()));
        }
        if let Some(error) = &update.error {
            values.push(Value::Text(error.clone()));
            sets.push(format!("error_message = ?{}", values.len()));
        }
        sets.push("updated_at = datetime('now')".to_string());

        values.push(Value::Integer(id));
        let sql = format!(
            "UPDATE jobs SET {} WHERE id = ?{}",
            sets.join(", "),
            values.len()
        );

        let changed = self.conn()?.execute(&sql, params_from_iter(values))?;
        if changed == 0 {
            return Err(DbError::JobNotFound(id));
        }
        Ok(())
    }

    /// Most recent jobs first.
    pub fn list_jobs(&self, limit: usize) -> Result<Vec<Job>> {
        self.query_jobs(
            &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id DESC LIMIT ?1"),
            params![limit as i64],
        )
    }

    /// Jobs a worker should pick up: pending, plus processing jobs with no
    /// write for `stale_after_secs` (left behind by an interrupted run).
    pub fn get_runnable_jobs(&self, stale_after_secs: u64) -> Result<Vec<Job>> {
        self.query_jobs(
            &format!(
                "SELECT {JOB_COLUMNS} FROM jobs
                 WHERE status = 'pending'
                    OR (status = 'processing' AND updated_at <= datetime('now', ?1))
                 ORDER BY id"
            ),
            params![stale_modifier(stale_after_secs)],
        )
    }

    /// Persist a chord sequence on a job. Independent of the pipeline columns.
    pub fn store_chords(&self, id: i64, chords: &[ChordEvent]) -> Result<()> {
        let json = serde_json::to_string(chords).map_err(|e| DbError::Corrupt {
            id,
            message: format!("chords: {e}"),
        })?;
        let changed = self.conn()?.execute(
            "UPDATE jobs SET chords = ?1, updated_at = datetime('now') WHERE id = ?2",
            params![json, id],
        )?;
        if changed == 0 {
            return Err(DbError::JobNotFound(id));
        }
        Ok(())
    }

    fn query_jobs<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Job>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(sql)?;
            stmt.query_map(params, JobRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

/// SQLite date modifier, e.g. `-3600 seconds`.
fn stale_modifier(secs: u64) -> String {
    format!("-{secs} seconds")
}

impl JobStore for Database {
    fn get_job(&self, id: i64) -> Result<Option<Job>> {
        Database::get_job(self, id)
    }

    fn claim_job(
        &self,
        id: i64,
        owner: &str,
        progress: Option<f64>,
        stale_after_secs: u64,
    ) -> Result<bool> {
        Database::claim_job(self, id, owner, progress, stale_after_secs)
    }

    fn update_job(&self, id: i64, update: &JobUpdate) -> Result<()> {
        Database::update_job(self, id, update)
    }
}
