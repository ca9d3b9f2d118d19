use crate::db::models::NewJob;
use crate::db::{Database, DbError};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Upload formats accepted for separation.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac"];

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("Unsupported file type '{0}' (allowed: mp3, wav, ogg, flac)")]
    UnsupportedExtension(String),
    #[error("File is {size} bytes, limit is {max}")]
    TooLarge { size: u64, max: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

/// Lowercased extension if it is one we accept.
pub fn allowed_extension(path: &Path) -> Result<String, IngestError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(IngestError::UnsupportedExtension(ext))
    }
}

/// Validate `source`, store a copy under `uploads_dir` and create a pending
/// job for it. `high_quality` is recorded on the job and honoured whenever
/// it is run. Returns the new job id.
pub fn submit(
    db: &Database,
    source: &Path,
    uploads_dir: &Path,
    max_bytes: u64,
    high_quality: bool,
) -> Result<i64, IngestError> {
    let ext = allowed_extension(source)?;

    let meta = match std::fs::metadata(source) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Err(IngestError::NotFound(source.to_path_buf())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(IngestError::NotFound(source.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    if meta.len() > max_bytes {
        return Err(IngestError::TooLarge {
            size: meta.len(),
            max: max_bytes,
        });
    }

    std::fs::create_dir_all(uploads_dir)?;
    let (stored, mut dest) = create_upload_file(uploads_dir, &ext)?;
    let mut src = File::open(source)?;
    if let Err(e) = io::copy(&mut src, &mut dest) {
        std::fs::remove_file(&stored).ok();
        return Err(e.into());
    }

    let filename = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("upload.{ext}"));
    let id = match db.create_job(&NewJob {
        filename,
        input_path: stored.clone(),
        high_quality,
    }) {
        Ok(id) => id,
        Err(e) => {
            std::fs::remove_file(&stored).ok();
            return Err(e.into());
        }
    };

    log::info!(
        "Job {}: stored {} as {}",
        id,
        source.display(),
        stored.display()
    );
    Ok(id)
}

/// Create `<uuid>.<ext>` in `dir`.
fn create_upload_file(dir: &Path, ext: &str) -> io::Result<(PathBuf, File)> {
    loop {
        let path = dir.join(format!("{}.{ext}", Uuid::new_v4()));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}
