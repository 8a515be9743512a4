//! Subprocess-backed [`JobRunner`].
//!
//! The command line is an argument template; the placeholders `{job_id}`,
//! `{input_dir}`, `{output_dir}`, `{temp_dir}` and `{model}` are substituted
//! per job. The child is raced against the request timeout and killed when
//! the timeout wins.
//!
//! Killing the `docker` client does not stop the container it started, so a
//! timed-out run is followed by a stop command built from a second template
//! (by default `docker kill ditchnet-{job_id}`, matching the `--name` in the
//! run template).

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::{JobRunner, RunReport, RunRequest, RunnerError};

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// How long to wait for the child to be reaped, and for its output pipes to
/// drain, once it has exited or been killed.
const REAP_GRACE: Duration = Duration::from_secs(5);

/// Default executable.
pub const DEFAULT_PROGRAM: &str = "docker";

/// Default argument template: run the DitchNet image on all GPUs with the
/// job's folders mounted into the container.
pub const DEFAULT_ARGS: &str = "run --rm -t --init --name ditchnet-{job_id} --gpus=all \
    -v {input_dir}:/min/input \
    -v {output_dir}:/min/output \
    -v {temp_dir}:/min/temp_dir \
    ditchnet python /min/modell/script.py /min/input/ /min/output/ \
    --temp_dir=/min/temp_dir/ --model={model}";

/// Default stop template, run with the same program after a timeout.
pub const DEFAULT_STOP_ARGS: &str = "kill ditchnet-{job_id}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRunner {
    program: String,
    args: Vec<String>,
    /// Empty when nothing outlives the killed child.
    stop_args: Vec<String>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stop_args: Vec::new(),
        }
    }

    /// Build a runner from a whitespace-separated argument template.
    pub fn from_template(program: impl Into<String>, template: &str) -> Self {
        Self::new(program, split_template(template))
    }

    /// Arguments passed to the same program after a timeout kill.
    pub fn with_stop_args(mut self, stop_args: Vec<String>) -> Self {
        self.stop_args = stop_args;
        self
    }

    /// [`with_stop_args`](Self::with_stop_args) from a whitespace-separated
    /// template. An empty template disables the stop step.
    pub fn with_stop_template(self, template: &str) -> Self {
        self.with_stop_args(split_template(template))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// The concrete argument list for one request.
    pub fn expand_args(&self, request: &RunRequest) -> Vec<String> {
        expand(&self.args, request)
    }

    /// The concrete stop command arguments for one request.
    pub fn expand_stop_args(&self, request: &RunRequest) -> Vec<String> {
        expand(&self.stop_args, request)
    }

    /// Run the stop command for a timed-out request. Failures are logged.
    async fn stop(&self, request: &RunRequest) {
        if self.stop_args.is_empty() {
            return;
        }
        let mut cmd = Command::new(&self.program);
        cmd.args(self.expand_stop_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(REAP_GRACE, cmd.status()).await {
            Ok(Ok(status)) if status.success() => {
                tracing::info!(job_id = %request.job_id, "Stopped timed-out job");
            }
            Ok(Ok(status)) => {
                tracing::warn!(
                    job_id = %request.job_id,
                    exit_code = ?status.code(),
                    "Stop command exited unsuccessfully",
                );
            }
            Ok(Err(e)) => {
                tracing::error!(job_id = %request.job_id, error = %e, "Failed to run stop command");
            }
            Err(_elapsed) => {
                tracing::error!(job_id = %request.job_id, "Stop command timed out");
            }
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::from_template(DEFAULT_PROGRAM, DEFAULT_ARGS).with_stop_template(DEFAULT_STOP_ARGS)
    }
}

#[async_trait]
impl JobRunner for ProcessRunner {
    async fn run(&self, request: RunRequest) -> Result<RunReport, RunnerError> {
        let mut cmd = Command::new(&self.program);
        // The child dies with this future.
        cmd.args(self.expand_args(&request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stdout_task = tokio::spawn(read_stream(child.stdout.take()));
        let stderr_task = tokio::spawn(read_stream(child.stderr.take()));

        let (exit_code, timed_out) =
            match tokio::time::timeout(request.timeout, child.wait()).await {
                Ok(status) => (status.map_err(RunnerError::Wait)?.code(), false),
                Err(_elapsed) => {
                    tracing::warn!(
                        program = %self.program,
                        timeout_secs = request.timeout.as_secs(),
                        "Process exceeded its timeout, killing it",
                    );
                    if let Err(e) = child.kill().await {
                        // The run is still classified; `kill_on_drop` fires again on drop.
                        tracing::error!(program = %self.program, error = %e, "Failed to kill process");
                    }
                    let status = tokio::time::timeout(REAP_GRACE, child.wait())
                        .await
                        .ok()
                        .and_then(Result::ok);
                    self.stop(&request).await;
                    (status.and_then(|s| s.code()), true)
                }
            };

        let stdout = join_stream(stdout_task).await;
        let stderr = join_stream(stderr_task).await;
        let mut output = String::from_utf8_lossy(&stdout).into_owned();
        if !stderr.is_empty() {
            if !output.is_empty() && !output.ends_with('\n') {
                output.push('\n');
            }
            output.push_str(&String::from_utf8_lossy(&stderr));
        }

        let output_present = tokio::fs::try_exists(&request.output_file)
            .await
            .unwrap_or(false);

        Ok(RunReport {
            exit_code,
            timed_out,
            output_present,
            output,
            duration: start.elapsed(),
        })
    }
}

fn split_template(template: &str) -> Vec<String> {
    template.split_whitespace().map(str::to_owned).collect()
}

fn expand(template: &[String], request: &RunRequest) -> Vec<String> {
    let job_id = request.job_id.to_string();
    let input_dir = display(&request.input_dir);
    let output_dir = display(&request.output_dir);
    let temp_dir = display(&request.working_dir);
    template
        .iter()
        .map(|arg| {
            arg.replace("{job_id}", &job_id)
                .replace("{input_dir}", &input_dir)
                .replace("{output_dir}", &output_dir)
                .replace("{temp_dir}", &temp_dir)
                .replace("{model}", &request.model)
        })
        .collect()
}

fn display(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Read an entire output stream into a byte buffer, capped at [`MAX_OUTPUT_BYTES`].
///
/// A read error keeps whatever arrived before it.
async fn read_stream<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut h) = handle {
        if let Err(e) = (&mut h)
            .take(MAX_OUTPUT_BYTES as u64)
            .read_to_end(&mut buf)
            .await
        {
            tracing::debug!(error = %e, captured = buf.len(), "Failed reading process output");
        }
    }
    buf
}

/// Collect a reader task, giving up if a leftover grandchild keeps the pipe open.
async fn join_stream(task: JoinHandle<Vec<u8>>) -> Vec<u8> {
    let abort = task.abort_handle();
    match tokio::time::timeout(REAP_GRACE, task).await {
        Ok(Ok(buf)) => buf,
        _ => {
            abort.abort();
            Vec::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use crate::paths::StorageRoot;
    use assert_matches::assert_matches;

    fn sh(script: &str) -> ProcessRunner {
        ProcessRunner::new("sh", vec!["-c".into(), script.into()])
    }

    async fn request(root: &Path, timeout: Duration) -> RunRequest {
        let paths = StorageRoot::new(root).job(JobId::new());
        paths.prepare().await.unwrap();
        tokio::fs::write(&paths.input_file, b"II*\0raster").await.unwrap();
        RunRequest::for_job(&paths, "/models/test.h5", timeout)
    }

    #[test]
    fn default_template_mounts_job_folders() {
        let paths = StorageRoot::new("/data").job(JobId::new());
        let req = RunRequest::for_job(&paths, "/min/modell/DitchNet_1m.h5", Duration::from_secs(60));
        let args = ProcessRunner::default().expand_args(&req);

        assert_eq!(args[0], "run");
        assert!(args.contains(&"--gpus=all".to_string()));
        assert!(args.contains(&format!("{}:/min/input", paths.input_dir.display())));
        assert!(args.contains(&format!("{}:/min/output", paths.output_dir.display())));
        assert!(args.contains(&format!("{}:/min/temp_dir", paths.temp_dir.display())));
        assert_eq!(args.last().unwrap(), "--model=/min/modell/DitchNet_1m.h5");
    }

    #[test]
    fn default_stop_command_targets_the_named_container() {
        let paths = StorageRoot::new("/data").job(JobId::new());
        let req = RunRequest::for_job(&paths, "/min/modell/DitchNet_1m.h5", Duration::from_secs(60));
        let runner = ProcessRunner::default();
        let container = format!("ditchnet-{}", paths.id);

        assert!(runner.expand_args(&req).contains(&container));
        assert_eq!(runner.expand_stop_args(&req), vec!["kill".to_string(), container]);
    }

    #[tokio::test]
    async fn copies_input_to_output() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_secs(10)).await;
        let runner = sh("cp {input_dir}/target.tif {output_dir}/target.tif && echo done {model}");

        let report = runner.run(req).await.unwrap();
        assert_eq!(report.exit_code, Some(0));
        assert!(!report.timed_out);
        assert!(report.output_present);
        assert!(report.succeeded());
        assert!(report.output.contains("done /models/test.h5"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_not_raised() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_secs(10)).await;

        let report = sh("echo boom >&2; exit 3").run(req).await.unwrap();
        assert_eq!(report.exit_code, Some(3));
        assert!(!report.output_present);
        assert!(report.output.contains("boom"));
    }

    #[tokio::test]
    async fn hung_process_is_killed_at_timeout() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_millis(200)).await;

        let report = sh("exec sleep 30").run(req).await.unwrap();
        assert!(report.timed_out);
        assert!(!report.output_present);
        assert!(report.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn timed_out_run_is_followed_by_the_stop_command() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_millis(200)).await;
        let marker = req.working_dir.join("stopped");
        let job_id = req.job_id;
        let runner = sh("exec sleep 30").with_stop_args(vec![
            "-c".into(),
            "echo {job_id} > {temp_dir}/stopped".into(),
        ]);

        let report = runner.run(req).await.unwrap();
        assert!(report.timed_out);
        let stopped = tokio::fs::read_to_string(&marker).await.unwrap();
        assert_eq!(stopped.trim(), job_id.to_string());
    }

    #[tokio::test]
    async fn clean_exit_skips_the_stop_command() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_secs(10)).await;
        let marker = req.working_dir.join("stopped");
        let runner = sh("true").with_stop_args(vec![
            "-c".into(),
            "touch {temp_dir}/stopped".into(),
        ]);

        let report = runner.run(req).await.unwrap();
        assert!(report.succeeded());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_secs(1)).await;
        let runner = ProcessRunner::new("/nonexistent/ditchnet-tool", vec![]);

        assert_matches!(runner.run(req).await, Err(RunnerError::Spawn { .. }));
    }
}
