//! The Job Runner contract.
//!
//! A runner turns a job's input artifact into an output artifact by invoking
//! an external tool. [`process::ProcessRunner`] spawns a subprocess from an
//! argument template; the default template runs the GPU model in Docker.

pub mod process;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::job::{JobId, ModelVariant};
use crate::paths::JobPaths;

/// Model artifact used for [`ModelVariant::HalfMetre`] unless overridden.
pub const DEFAULT_HALF_METRE_MODEL: &str = "/min/modell/DitchNet_05m.h5";

/// Model artifact used for [`ModelVariant::OneMetre`] unless overridden.
pub const DEFAULT_ONE_METRE_MODEL: &str = "/min/modell/DitchNet_1m.h5";

/// Fixed mapping from model variant to the model artifact the runner loads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    models: HashMap<ModelVariant, String>,
}

impl ModelCatalog {
    pub fn new(half_metre: impl Into<String>, one_metre: impl Into<String>) -> Self {
        let models = HashMap::from([
            (ModelVariant::HalfMetre, half_metre.into()),
            (ModelVariant::OneMetre, one_metre.into()),
        ]);
        Self { models }
    }

    pub fn model_for(&self, variant: ModelVariant) -> &str {
        self.models
            .get(&variant)
            .map(String::as_str)
            .unwrap_or(DEFAULT_HALF_METRE_MODEL)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_HALF_METRE_MODEL, DEFAULT_ONE_METRE_MODEL)
    }
}

/// One invocation of the external tool.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub job_id: JobId,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_file: PathBuf,
    pub working_dir: PathBuf,
    /// Model artifact path resolved from the job's variant.
    pub model: String,
    /// Wall-clock limit after which the process is killed.
    pub timeout: Duration,
}

impl RunRequest {
    pub fn for_job(paths: &JobPaths, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            job_id: paths.id,
            input_dir: paths.input_dir.clone(),
            output_dir: paths.output_dir.clone(),
            output_file: paths.output_file.clone(),
            working_dir: paths.temp_dir.clone(),
            model: model.into(),
            timeout,
        }
    }
}

/// What a finished (or killed) invocation looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Process exit code; `None` if it was terminated by a signal.
    pub exit_code: Option<i32>,
    /// The timeout fired and the process was (or was attempted to be) killed.
    pub timed_out: bool,
    /// The output artifact existed once the process was gone.
    pub output_present: bool,
    /// Combined stdout and stderr, truncated.
    pub output: String,
    pub duration: Duration,
}

impl RunReport {
    /// The process exited with status 0 before the timeout.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Failures that prevented the tool from running to an exit status.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Invokes the external processing tool for one job.
///
/// Implementations must honour [`RunRequest::timeout`] and must not leave
/// the external process running once `run` returns.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, request: RunRequest) -> Result<RunReport, RunnerError>;
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "exit code {code}")?,
            None => write!(f, "terminated by signal")?,
        }
        if self.timed_out {
            write!(f, " after timeout")?;
        }
        write!(f, " in {}ms", self.duration.as_millis())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_maps_each_variant() {
        let catalog = ModelCatalog::default();
        assert_eq!(catalog.model_for(ModelVariant::HalfMetre), DEFAULT_HALF_METRE_MODEL);
        assert_eq!(catalog.model_for(ModelVariant::OneMetre), DEFAULT_ONE_METRE_MODEL);

        let custom = ModelCatalog::new("/m/a.h5", "/m/b.h5");
        assert_eq!(custom.model_for(ModelVariant::OneMetre), "/m/b.h5");
    }

    #[test]
    fn report_display() {
        let report = RunReport {
            exit_code: None,
            timed_out: true,
            output_present: false,
            output: String::new(),
            duration: Duration::from_millis(1500),
        };
        assert_eq!(report.to_string(), "terminated by signal after timeout in 1500ms");
        assert!(!report.succeeded());
    }
}
