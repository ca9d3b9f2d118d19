use crate::db::models::{Job, JobStatus};
use crate::stems::Stem;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Job {id} is {status}, only completed jobs can be exported")]
    NotCompleted { id: i64, status: JobStatus },
    #[error("Unknown stem name: {0}")]
    UnknownStem(String),
    #[error("Stem file missing: {0}")]
    MissingFile(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// `Other Instruments` -> `Other_Instruments`
fn file_label(stem: Stem) -> String {
    stem.name().replace(' ', "_")
}

/// Copy a completed job's stems into `dest` as
/// `<upload stem>_<Stem_Name><ext>`. `filter` restricts the export to the
/// named canonical stems. Returns the files written.
pub fn export_stems(
    job: &Job,
    dest: &Path,
    filter: Option<&[String]>,
) -> Result<Vec<PathBuf>, ExportError> {
    if job.status != JobStatus::Completed {
        return Err(ExportError::NotCompleted {
            id: job.id,
            status: job.status,
        });
    }

    let wanted: Option<Vec<Stem>> = filter
        .map(|names| {
            names
                .iter()
                .map(|n| Stem::from_name(n).ok_or_else(|| ExportError::UnknownStem(n.clone())))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    let base = Path::new(&job.filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("job_{}", job.id));

    let Some(stems) = &job.stems else {
        log::warn!("Job {} completed without stems", job.id);
        return Ok(Vec::new());
    };

    let selected: Vec<(Stem, &Path)> = stems
        .iter()
        .filter(|(s, _)| wanted.as_ref().is_none_or(|w| w.contains(s)))
        .collect();
    for (_, src) in &selected {
        if !src.is_file() {
            return Err(ExportError::MissingFile(src.to_path_buf()));
        }
    }

    std::fs::create_dir_all(dest)?;
    let mut written = Vec::with_capacity(selected.len());
    for (stem, src) in selected {
        let ext = src
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let target = dest.join(format!("{}_{}{}", base, file_label(stem), ext));
        std::fs::copy(src, &target)?;
        log::debug!("Exported {} -> {}", src.display(), target.display());
        written.push(target);
    }

    log::info!("Exported {} stems for job {}", written.len(), job.id);
    Ok(written)
}
