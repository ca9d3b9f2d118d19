use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use stemforge::chords::ChordRecognizer;
use stemforge::config::AppConfig;
use stemforge::db::models::{Job, JobStatus};
use stemforge::db::Database;
use stemforge::pipeline::{Enqueued, JobQueue, Pipeline};
use stemforge::separation::CommandEngineFactory;
use stemforge::stems::Stem;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "stemforge", version, about = "Stem separation jobs and chord recognition")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store an audio file and create a separation job for it
    Submit {
        /// Audio file (mp3, wav, ogg, flac)
        file: PathBuf,

        /// Split vocals into lead and backing with a second pass
        #[arg(long)]
        high_quality: bool,

        /// Only create the job; run it later with `process`
        #[arg(long)]
        no_wait: bool,
    },

    /// Run every pending job (and processing jobs abandoned by a crash)
    Process {
        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Show one job
    Status {
        id: i64,
    },

    /// List recent jobs
    Jobs {
        /// Number of results
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Detect chord changes in an audio file or a job's stem
    Chords {
        /// Audio file to analyze
        #[arg(conflicts_with = "job", required_unless_present = "job")]
        file: Option<PathBuf>,

        /// Analyze a stem of this job instead
        #[arg(long, requires = "stem")]
        job: Option<i64>,

        /// Stem to analyze, e.g. "Piano" or "Other Instruments"
        #[arg(long)]
        stem: Option<String>,

        /// Store the result on the job
        #[arg(long, requires = "job")]
        save: bool,
    },

    /// Copy a completed job's stems into a directory
    Export {
        id: i64,

        /// Destination directory
        dest: PathBuf,

        /// Only these stems (comma separated canonical names)
        #[arg(long, value_delimiter = ',')]
        stems: Option<Vec<String>>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(stemforge::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Arc::new(Database::open(&db_path).context("Failed to open database")?);

    match cli.command {
        Commands::Submit {
            file,
            high_quality,
            no_wait,
        } => {
            let id = stemforge::ingest::submit(
                &db,
                &file,
                &config.uploads_dir(),
                config.max_upload_bytes(),
                high_quality,
            )
            .with_context(|| format!("Failed to submit {}", file.display()))?;
            println!("Job {} created", id);

            if !no_wait {
                let job = fetch_job(&db, id)?;
                let status = build_pipeline(&db, &config)
                    .start(id, &job.input_path, job.high_quality)
                    .context("Pipeline run failed")?;
                println!("Job {} {}", id, status);
                print_job(&fetch_job(&db, id)?);
            }
        }

        Commands::Process { jobs } => {
            let runnable = db
                .get_runnable_jobs(config.engine.stale_window())
                .context("Failed to list jobs")?;
            if runnable.is_empty() {
                println!("No jobs to process");
                return Ok(());
            }

            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            log::info!("Processing {} jobs with {} workers", runnable.len(), workers);

            let pb = ProgressBar::new(runnable.len() as u64);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
            );

            let completed = Arc::new(AtomicU64::new(0));
            let failed = Arc::new(AtomicU64::new(0));
            let skipped = Arc::new(AtomicU64::new(0));
            let queue = {
                let pb = pb.clone();
                let completed = completed.clone();
                let failed = failed.clone();
                let skipped = skipped.clone();
                JobQueue::new(Arc::new(build_pipeline(&db, &config)), workers)
                    .context("Failed to start workers")?
                    .on_finish(move |_, result| {
                        match result {
                            Ok(JobStatus::Completed) => completed.fetch_add(1, Ordering::Relaxed),
                            // held by another process
                            Ok(JobStatus::Processing | JobStatus::Pending) => {
                                skipped.fetch_add(1, Ordering::Relaxed)
                            }
                            _ => failed.fetch_add(1, Ordering::Relaxed),
                        };
                        pb.inc(1);
                        pb.set_message(format!(
                            "{} completed, {} failed",
                            completed.load(Ordering::Relaxed),
                            failed.load(Ordering::Relaxed)
                        ));
                    })
            };

            for job in runnable {
                if queue.enqueue(job.id, job.input_path, job.high_quality) == Enqueued::AlreadyQueued {
                    pb.inc(1);
                }
            }
            queue.wait_idle();

            let completed = completed.load(Ordering::Relaxed);
            let failed = failed.load(Ordering::Relaxed);
            let skipped = skipped.load(Ordering::Relaxed);
            pb.finish_with_message(format!("Done: {} completed, {} failed", completed, failed));
            println!(
                "Processing complete: {} completed, {} failed, {} skipped (running elsewhere)",
                completed, failed, skipped
            );
        }

        Commands::Status { id } => {
            print_job(&fetch_job(&db, id)?);
        }

        Commands::Jobs { limit } => {
            let jobs = db.list_jobs(limit).context("Failed to list jobs")?;
            if jobs.is_empty() {
                println!("No jobs");
                return Ok(());
            }
            print_job_table(&jobs);
        }

        Commands::Chords {
            file,
            job,
            stem,
            save,
        } => {
            let path = match (file, job) {
                (Some(file), _) => file,
                (None, Some(id)) => {
                    let name = stem.as_deref().unwrap_or_default();
                    let stem = Stem::from_name(name)
                        .with_context(|| format!("Unknown stem '{}'", name))?;
                    let job = fetch_job(&db, id)?;
                    job.stems
                        .as_ref()
                        .and_then(|s| s.get(stem))
                        .map(|p| p.to_path_buf())
                        .with_context(|| format!("Job {} has no {} stem", id, stem))?
                }
                (None, None) => anyhow::bail!("Pass a file or --job with --stem"),
            };

            let recognizer = ChordRecognizer::new();
            let events = recognizer
                .detect_chords_in_file(&path)
                .with_context(|| format!("Chord detection failed for {}", path.display()))?;

            println!("{:>8}  {}", "Time", "Chord");
            println!("{}", "-".repeat(20));
            for e in &events {
                println!("{:>8.2}  {}", e.time, e.chord);
            }

            if save {
                if let Some(id) = job {
                    db.store_chords(id, &events).context("Failed to store chords")?;
                    println!("Saved {} chord changes to job {}", events.len(), id);
                }
            }
        }

        Commands::Export { id, dest, stems } => {
            let job = fetch_job(&db, id)?;
            let written = stemforge::export::export_stems(&job, &dest, stems.as_deref())
                .with_context(|| format!("Failed to export job {}", id))?;
            for path in &written {
                println!("{}", path.display());
            }
            println!("Exported {} stems", written.len());
        }
    }

    Ok(())
}

fn build_pipeline(db: &Arc<Database>, config: &AppConfig) -> Pipeline {
    Pipeline::new(
        db.clone(),
        Arc::new(CommandEngineFactory::new(config.engine.clone())),
        &config.engine,
        config.stems_dir(),
    )
}

fn fetch_job(db: &Database, id: i64) -> Result<Job> {
    db.get_job(id)
        .context("Failed to read job")?
        .with_context(|| format!("Job {} not found", id))
}

/// Print one job with its stems and error.
fn print_job(job: &Job) {
    println!("Job {}: {}", job.id, job.filename);
    println!("  Status:   {}", job.status);
    println!("  Progress: {:.0}%", job.progress * 100.0);
    println!("  Quality:  {}", if job.high_quality { "high" } else { "standard" });
    if let Some(owner) = &job.claimed_by {
        println!("  Worker:   {}", owner);
    }
    println!("  Created:  {}", job.created_at);
    println!("  Updated:  {}", job.updated_at);
    if let Some(error) = &job.error {
        println!("  Error:    {}", error);
    }
    if let Some(stems) = &job.stems {
        println!("  Stems:");
        for (stem, path) in stems.iter() {
            println!("    {:<18} {}", stem.name(), path.display());
        }
    }
    if let Some(chords) = &job.chords {
        println!("  Chords:   {} changes", chords.len());
    }
}

/// Print a table of jobs.
fn print_job_table(jobs: &[Job]) {
    println!(
        "{:>5}  {:<30} {:<10} {:>5}  {:>5}  {}",
        "Id", "File", "Status", "Pct", "Stems", "Updated"
    );
    println!("{}", "-".repeat(80));

    for j in jobs {
        // Truncate long names
        let name: String = if j.filename.chars().count() > 30 {
            format!("{}...", j.filename.chars().take(27).collect::<String>())
        } else {
            j.filename.clone()
        };

        println!(
            "{:>5}  {:<30} {:<10} {:>4.0}%  {:>5}  {}",
            j.id,
            name,
            j.status.as_str(),
            j.progress * 100.0,
            j.stems.as_ref().map_or(0, |s| s.len()),
            j.updated_at,
        );
    }
}
