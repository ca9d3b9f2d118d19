//! Separation engine contract and the single-pass runner.
//!
//! An engine is an opaque capability: load a named model, run it on one
//! input, report the files it wrote. Each pass gets a fresh engine from an
//! [`EngineFactory`] and drops it when the pass ends, so nothing a model
//! allocates outlives the pass or leaks into another job.

pub mod command;

use std::path::{Path, PathBuf};
use thiserror::Error;

pub use command::{CommandEngine, CommandEngineFactory};

#[derive(Error, Debug)]
pub enum SeparationError {
    #[error("Failed to load model {model}: {message}")]
    ModelLoad { model: String, message: String },
    #[error("Separation failed for {input}: {message}")]
    Engine { input: String, message: String },
    #[error("Separation timed out after {secs}s for {input}")]
    Timeout { input: String, secs: u64 },
    #[error("No model loaded")]
    NoModel,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One separation engine instance.
pub trait SeparationEngine {
    /// Select the model subsequent `separate` calls use.
    fn load(&mut self, model: &str) -> Result<(), SeparationError>;

    /// Run the loaded model on `input`, writing under `output_dir`.
    /// Blocking. Returns every file produced.
    fn separate(&mut self, input: &Path, output_dir: &Path)
        -> Result<Vec<PathBuf>, SeparationError>;
}

/// Creates engine instances, one per pass.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn SeparationEngine>, SeparationError>;
}

/// Runs separation passes against engines from a factory.
pub struct PassRunner<'a> {
    factory: &'a dyn EngineFactory,
}

impl<'a> PassRunner<'a> {
    pub fn new(factory: &'a dyn EngineFactory) -> Self {
        Self { factory }
    }

    /// Create an engine and load `model` into it.
    pub fn load(&self, model: &str) -> Result<LoadedPass, SeparationError> {
        let mut engine = self.factory.create()?;
        engine.load(model)?;
        log::debug!("Model loaded: {}", model);
        Ok(LoadedPass {
            engine,
            model: model.to_string(),
        })
    }

    /// Load `model` and run it on `input` in one step.
    pub fn run_pass(
        &self,
        input: &Path,
        model: &str,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, SeparationError> {
        self.load(model)?.run(input, output_dir)
    }
}

/// An engine with a model loaded, ready for exactly one run.
pub struct LoadedPass {
    engine: Box<dyn SeparationEngine>,
    model: String,
}

impl LoadedPass {
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run the pass. Consumes the engine; it is released when this returns.
    pub fn run(mut self, input: &Path, output_dir: &Path) -> Result<Vec<PathBuf>, SeparationError> {
        std::fs::create_dir_all(output_dir)?;
        log::info!(
            "Separating {} with {} into {}",
            input.display(),
            self.model,
            output_dir.display()
        );
        let outputs = self.engine.separate(input, output_dir)?;
        log::info!("Pass {} produced {} outputs", self.model, outputs.len());
        Ok(outputs)
    }
}
