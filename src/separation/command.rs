use super::{EngineFactory, SeparationEngine, SeparationError};
use crate::config::EngineConfig;
use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Separation engine backed by an external separator executable.
///
/// The argument template may use `{input}`, `{model}` and `{output_dir}`.
/// After a successful run every regular file under the output directory is
/// reported as an output. On unix the separator leads its own process
/// group, and a timeout kills the whole group.
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    model: Option<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            model: None,
        }
    }

    fn render_args(&self, input: &Path, model: &str, output_dir: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output_dir = output_dir.to_string_lossy();
        self.args
            .iter()
            .map(|a| {
                a.replace("{input}", &input)
                    .replace("{model}", model)
                    .replace("{output_dir}", &output_dir)
            })
            .collect()
    }

    /// Wait for the child, killing it once the timeout elapses.
    fn wait_with_timeout(
        &self,
        child: &mut Child,
        input: &Path,
    ) -> Result<std::process::ExitStatus, SeparationError> {
        let Some(limit) = self.timeout else {
            return Ok(child.wait()?);
        };

        let started = Instant::now();
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if started.elapsed() >= limit {
                log::warn!("Separator exceeded {}s, killing it", limit.as_secs());
                kill_group(child);
                child.wait().ok();
                return Err(SeparationError::Timeout {
                    input: input.display().to_string(),
                    secs: limit.as_secs(),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl SeparationEngine for CommandEngine {
    fn load(&mut self, model: &str) -> Result<(), SeparationError> {
        if model.trim().is_empty() {
            return Err(SeparationError::ModelLoad {
                model: model.to_string(),
                message: "empty model identifier".to_string(),
            });
        }
        // Model files are resolved by the separator itself at run time.
        self.model = Some(model.to_string());
        Ok(())
    }

    fn separate(&mut self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, SeparationError> {
        let model = self.model.as_deref().ok_or(SeparationError::NoModel)?;
        let args = self.render_args(input, model, output_dir);
        log::debug!("Running {} {}", self.program, args.join(" "));

        let mut command = Command::new(&self.program);
        command.args(&args).stdout(Stdio::null()).stderr(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| SeparationError::Engine {
                input: input.display().to_string(),
                message: format!("failed to start {}: {}", self.program, e),
            })?;

        // Drain stderr on a side thread so a chatty separator cannot fill the pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buf = String::new();
                stderr.read_to_string(&mut buf).ok();
                buf
            })
        });

        let status = self.wait_with_timeout(&mut child, input)?;
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            return Err(SeparationError::Engine {
                input: input.display().to_string(),
                message: format!("{} exited with {}: {}", self.program, status, stderr.trim()),
            });
        }

        Ok(collect_outputs(output_dir))
    }
}

/// Kill the child and everything in its process group.
#[cfg(unix)]
fn kill_group(child: &mut Child) {
    let pgid = child.id() as libc::pid_t;
    // SAFETY: kill(2) takes no pointers; a negative pid addresses the group
    // the child leads.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } != 0 {
        log::debug!("killpg({}) failed: {}", pgid, std::io::Error::last_os_error());
        child.kill().ok();
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
    child.kill().ok();
}

/// Every regular file under `dir`, sorted by path.
pub fn collect_outputs(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Builds a [`CommandEngine`] per pass from the engine config.
pub struct CommandEngineFactory {
    config: EngineConfig,
}

impl CommandEngineFactory {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for CommandEngineFactory {
    fn create(&self) -> Result<Box<dyn SeparationEngine>, SeparationError> {
        Ok(Box::new(CommandEngine::new(
            self.config.program.clone(),
            self.config.args.clone(),
            self.config.pass_timeout_secs.map(Duration::from_secs),
        )))
    }
}
