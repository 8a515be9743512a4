use std::time::Duration;

use ditchnet_core::paths::StorageRoot;
use ditchnet_core::runner::process::{DEFAULT_ARGS, DEFAULT_PROGRAM, DEFAULT_STOP_ARGS};
use ditchnet_core::runner::{ModelCatalog, DEFAULT_HALF_METRE_MODEL, DEFAULT_ONE_METRE_MODEL};

/// Raised when an environment variable holds an unusable value.
#[derive(Debug, thiserror::Error)]
#[error("{var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: &'static str,
}

/// Scheduler configuration, built once at startup and passed by reference
/// into the dispatcher, supervisor and reclaimer.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Root folder holding one sub-folder per job.
    pub storage_root: StorageRoot,
    /// Pause between dispatcher cycles.
    pub poll_interval: Duration,
    /// Upper bound on concurrently running jobs.
    pub max_concurrent_jobs: usize,
    /// Wall-clock limit for a single runner invocation.
    pub job_timeout: Duration,
    /// Minimum age of a terminal job before the reclaimer deletes it.
    pub retention: Duration,
    /// Pause between reclaimer sweeps.
    pub reclaim_interval: Duration,
    /// External tool executable.
    pub runner_program: String,
    /// Whitespace-separated argument template for the external tool.
    pub runner_args: String,
    /// Template run with `runner_program` after a timeout kill; empty disables.
    pub runner_stop_args: String,
    pub models: ModelCatalog,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            storage_root: StorageRoot::new("./data/jobs"),
            poll_interval: Duration::from_secs(5),
            max_concurrent_jobs: 1,
            job_timeout: Duration::from_secs(60 * 60),
            retention: Duration::from_secs(2 * 3600),
            reclaim_interval: Duration::from_secs(2 * 3600),
            runner_program: DEFAULT_PROGRAM.into(),
            runner_args: DEFAULT_ARGS.into(),
            runner_stop_args: DEFAULT_STOP_ARGS.into(),
            models: ModelCatalog::default(),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                       |
    /// |-------------------------|-------------------------------|
    /// | `FILE_STORAGE_PATH`     | `./data/jobs`                 |
    /// | `POLL_INTERVAL_SECS`    | `5`                           |
    /// | `MAX_CONCURRENT_JOBS`   | `1`                           |
    /// | `JOB_TIMEOUT_MINS`      | `60`                          |
    /// | `RETENTION_HOURS`       | `2`                           |
    /// | `RECLAIM_INTERVAL_SECS` | `7200`                        |
    /// | `RUNNER_PROGRAM`        | `docker`                      |
    /// | `RUNNER_ARGS`           | GPU docker invocation         |
    /// | `RUNNER_STOP_ARGS`      | `kill ditchnet-{job_id}`      |
    /// | `MODEL_1_PATH`          | `/min/modell/DitchNet_05m.h5` |
    /// | `MODEL_2_PATH`          | `/min/modell/DitchNet_1m.h5`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let storage_root = lookup("FILE_STORAGE_PATH")
            .map(StorageRoot::new)
            .unwrap_or(defaults.storage_root);

        let poll_interval = Duration::from_secs(positive(&lookup, "POLL_INTERVAL_SECS", 5)?);
        let max_concurrent_jobs = positive(&lookup, "MAX_CONCURRENT_JOBS", 1)? as usize;
        let job_timeout = Duration::from_secs(positive(&lookup, "JOB_TIMEOUT_MINS", 60)? * 60);
        let retention = Duration::from_secs(positive(&lookup, "RETENTION_HOURS", 2)? * 3600);
        let reclaim_interval =
            Duration::from_secs(positive(&lookup, "RECLAIM_INTERVAL_SECS", 7200)?);

        let runner_program = lookup("RUNNER_PROGRAM").unwrap_or(defaults.runner_program);
        let runner_args = lookup("RUNNER_ARGS").unwrap_or(defaults.runner_args);
        let runner_stop_args = lookup("RUNNER_STOP_ARGS").unwrap_or(defaults.runner_stop_args);

        let models = ModelCatalog::new(
            lookup("MODEL_1_PATH").unwrap_or_else(|| DEFAULT_HALF_METRE_MODEL.into()),
            lookup("MODEL_2_PATH").unwrap_or_else(|| DEFAULT_ONE_METRE_MODEL.into()),
        );

        Ok(Self {
            storage_root,
            poll_interval,
            max_concurrent_jobs,
            job_timeout,
            retention,
            reclaim_interval,
            runner_program,
            runner_args,
            runner_stop_args,
            models,
        })
    }
}

/// Parse a strictly positive integer, falling back to `default` when unset.
fn positive(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value) = lookup(var) else {
        return Ok(default);
    };
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError {
            var,
            value,
            reason: "must be greater than zero",
        }),
        Ok(n) => Ok(n),
        Err(_) => Err(ConfigError {
            var,
            value,
            reason: "must be a positive integer",
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use ditchnet_core::job::ModelVariant;

    use super::*;

    fn from(vars: &[(&str, &str)]) -> Result<SchedulerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SchedulerConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = from(&[]).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_jobs, 1);
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert_eq!(config.retention, Duration::from_secs(7200));
        assert_eq!(config.runner_program, "docker");
        assert!(config.runner_args.contains("--name ditchnet-{job_id}"));
        assert_eq!(config.runner_stop_args, "kill ditchnet-{job_id}");
        assert_eq!(
            config.models.model_for(ModelVariant::OneMetre),
            DEFAULT_ONE_METRE_MODEL
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = from(&[
            ("FILE_STORAGE_PATH", "/srv/ditchnet"),
            ("MAX_CONCURRENT_JOBS", "3"),
            ("JOB_TIMEOUT_MINS", "10"),
            ("RETENTION_HOURS", "24"),
            ("MODEL_2_PATH", "/models/1m.h5"),
            ("RUNNER_STOP_ARGS", ""),
        ])
        .unwrap();
        assert_eq!(config.storage_root.path().to_str(), Some("/srv/ditchnet"));
        assert_eq!(config.max_concurrent_jobs, 3);
        assert_eq!(config.job_timeout, Duration::from_secs(600));
        assert_eq!(config.retention, Duration::from_secs(24 * 3600));
        assert_eq!(config.models.model_for(ModelVariant::OneMetre), "/models/1m.h5");
        assert_eq!(config.runner_stop_args, "");
    }

    #[test]
    fn zero_and_garbage_are_rejected() {
        let err = from(&[("MAX_CONCURRENT_JOBS", "0")]).unwrap_err();
        assert_eq!(err.var, "MAX_CONCURRENT_JOBS");

        let err = from(&[("JOB_TIMEOUT_MINS", "soon")]).unwrap_err();
        assert_eq!(err.var, "JOB_TIMEOUT_MINS");
        assert!(err.to_string().contains("soon"));
    }
}
