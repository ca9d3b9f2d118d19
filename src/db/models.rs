use crate::chords::ChordEvent;
use crate::stems::StemMap;
use std::fmt;
use std::path::PathBuf;

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Completed and failed jobs are never written again by the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data for creating a job (ingest).
pub struct NewJob {
    /// Name the file was submitted under.
    pub filename: String,
    /// Where the stored upload lives.
    pub input_path: PathBuf,
    /// Run the vocal refinement pass.
    pub high_quality: bool,
}

/// A job row read from the database.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: i64,
    pub filename: String,
    pub input_path: PathBuf,
    pub high_quality: bool,
    pub status: JobStatus,
    pub progress: f64,
    /// Present only once the job completed.
    pub stems: Option<StemMap>,
    pub error: Option<String>,
    pub chords: Option<Vec<ChordEvent>>,
    /// Worker that last claimed the job.
    pub claimed_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Atomic partial update of a job. Fields left `None` are not touched.
#[derive(Debug, Default, Clone)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f64>,
    pub stems: Option<StemMap>,
    pub error: Option<String>,
}

impl JobUpdate {
    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    /// Terminal success: status, final stems and progress 1.0 together.
    pub fn complete(stems: StemMap) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            progress: Some(1.0),
            stems: Some(stems),
            error: None,
        }
    }

    /// Terminal failure. Progress and stems are left as they were.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error: Some(error.into()),
            ..Self::default()
        }
    }
}
