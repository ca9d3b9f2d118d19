use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::stems::classify::RefinementRoles;

/// Application configuration loaded from TOML config file.
/// All fields have defaults, so the config file is optional.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Root for uploads and stems (overrides XDG data dir).
    pub data_dir: Option<PathBuf>,
    /// Number of pipeline workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Largest accepted upload, in megabytes.
    pub max_upload_mb: u64,
    /// Separation engine settings.
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            data_dir: None,
            workers: 0,
            max_upload_mb: 50,
            engine: EngineConfig::default(),
        }
    }
}

/// External separator configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Separator executable.
    pub program: String,
    /// Argument template; `{input}`, `{model}`, `{output_dir}` are substituted.
    pub args: Vec<String>,
    /// Six-stem model used for the base pass.
    pub base_model: String,
    /// Vocal/backing model used for the refinement pass.
    pub vocal_model: String,
    /// File-stem suffix of the refinement's lead vocal output.
    pub lead_suffix: String,
    /// File-stem suffix of the refinement's backing (residual) output.
    pub backing_suffix: String,
    /// Kill a pass that runs longer than this. None = no limit.
    pub pass_timeout_secs: Option<u64>,
    /// A processing job with no store write for this long is considered
    /// abandoned and may be taken over by another run. Must exceed the
    /// longest single pass.
    pub stale_after_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let roles = RefinementRoles::default();
        Self {
            program: "audio-separator".to_string(),
            args: vec![
                "{input}".to_string(),
                "--model_filename".to_string(),
                "{model}".to_string(),
                "--output_dir".to_string(),
                "{output_dir}".to_string(),
                "--output_format".to_string(),
                "WAV".to_string(),
            ],
            base_model: "htdemucs_6s.yaml".to_string(),
            vocal_model: "mel_band_roformer_karaoke_aufr33_viperx_sdr_10.1956.ckpt".to_string(),
            lead_suffix: roles.lead_suffix,
            backing_suffix: roles.backing_suffix,
            pass_timeout_secs: None,
            stale_after_secs: 6 * 60 * 60,
        }
    }
}

impl EngineConfig {
    /// Stale window in seconds, never shorter than twice the pass timeout.
    pub fn stale_window(&self) -> u64 {
        let floor = self.pass_timeout_secs.map_or(0, |t| t.saturating_mul(2));
        self.stale_after_secs.max(floor)
    }

    pub fn refinement_roles(&self) -> RefinementRoles {
        RefinementRoles {
            lead_suffix: self.lead_suffix.clone(),
            backing_suffix: self.backing_suffix.clone(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/stemforge/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }

    /// Root data directory: config override, else XDG data dir.
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.resolve_data_dir().join("uploads")
    }

    pub fn stems_dir(&self) -> PathBuf {
        self.resolve_data_dir().join("stems")
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", crate::APP_NAME)
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("stemforge.db")
    } else {
        // Fallback: current directory
        PathBuf::from("stemforge.db")
    }
}
