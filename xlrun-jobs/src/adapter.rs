//! Execution adapter: runs one job's routine and reports its exit code.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use serde_json::Value;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use xlrun_config::{Config, ConfigError, RoutineMode};
use xlrun_job_queue::{async_trait, ExecutionError, ExecutionErrorKind, Job, JobProgress, JobRunner};

use crate::inputs::{DirectoryInputs, InputResolver};
use crate::routine::RoutineRegistry;

/// Lines buffered between the pipe readers and the log writer.
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Append-only handle to a job's log file. Every write is flushed.
struct JobLog {
    file: File,
}

impl JobLog {
    async fn open(path: &Path) -> Result<Self, ExecutionError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(ExecutionError::io)?;
        Ok(Self { file })
    }

    async fn write(&mut self, text: &str) -> Result<(), ExecutionError> {
        self.file
            .write_all(text.as_bytes())
            .await
            .map_err(ExecutionError::io)?;
        self.file.flush().await.map_err(ExecutionError::io)
    }

    async fn close(mut self) {
        if let Err(e) = self.file.flush().await {
            debug!(%e, "final job log flush failed");
        }
    }
}

/// Runs the configured routine for each job handed over by the worker.
pub struct ExecutionAdapter {
    mode: RoutineMode,
    routines: Arc<RoutineRegistry>,
    inputs: Arc<dyn InputResolver>,
}

impl fmt::Debug for ExecutionAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionAdapter")
            .field("mode", &self.mode)
            .field("routines", &self.routines)
            .finish_non_exhaustive()
    }
}

impl ExecutionAdapter {
    pub fn new(mode: RoutineMode, routines: RoutineRegistry, inputs: Arc<dyn InputResolver>) -> Self {
        Self {
            mode,
            routines: Arc::new(routines),
            inputs,
        }
    }

    /// Adapter for the configured entrypoint, reading inputs from the session directories.
    ///
    /// Fails when the entrypoint is not a valid command line.
    pub fn from_config(config: &Config, routines: RoutineRegistry) -> Result<Self, ConfigError> {
        let inputs = DirectoryInputs::new(&config.storage.data_dir, &config.runner.allowed_extensions);
        Ok(Self::new(config.routine_mode()?, routines, Arc::new(inputs)))
    }

    #[inline]
    pub fn mode(&self) -> &RoutineMode {
        &self.mode
    }

    async fn execute(
        &self,
        job: &Job,
        progress: &JobProgress,
        log: &mut JobLog,
    ) -> Result<i32, ExecutionError> {
        log.write(&format!("=== Job {} ===\n", job.id)).await?;
        let inputs = self.inputs.resolve(job.session_id).await?;
        let names: Vec<String> = inputs
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        log.write(&format!("Inputs: {}\n", names.join(", "))).await?;
        progress.report(25, "running entrypoint").await;

        let code = match &self.mode {
            RoutineMode::InProcess(id) => self.run_in_process(id, job, inputs, progress).await?,
            RoutineMode::Subprocess(argv) => {
                progress.report(50, "executing subprocess").await;
                run_subprocess(argv, job, &inputs, log).await?
            }
        };

        progress.report(90, "post-processing").await;
        Ok(code)
    }

    async fn run_in_process(
        &self,
        id: &str,
        job: &Job,
        inputs: Vec<PathBuf>,
        progress: &JobProgress,
    ) -> Result<i32, ExecutionError> {
        progress.report(35, format!("importing routine {id}")).await;
        let routine = self.routines.get(id).ok_or_else(|| {
            ExecutionError::new(
                ExecutionErrorKind::RoutineLookup,
                format!("no routine registered as `{id}`"),
            )
        })?;

        let prepare = Arc::clone(&routine);
        tokio::task::spawn_blocking(move || prepare.prepare())
            .await
            .map_err(join_error)?
            .map_err(|e| ExecutionError::new(ExecutionErrorKind::RoutinePrepare, e.to_string()))?;

        progress.report(50, "executing").await;
        let output_dir = job.work_dir().to_path_buf();
        let options = job.options.clone();
        tokio::task::spawn_blocking(move || routine.run(&inputs, &output_dir, &options))
            .await
            .map_err(join_error)?
            .map_err(|e| ExecutionError::new(ExecutionErrorKind::RoutineFailed, e.to_string()))
    }
}

fn join_error(err: tokio::task::JoinError) -> ExecutionError {
    let reason = if err.is_panic() {
        let payload = err.into_panic();
        payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string())
    } else {
        err.to_string()
    };
    ExecutionError::new(ExecutionErrorKind::Panicked, reason)
}

/// Full argv for a subprocess job: the configured command plus the job arguments.
pub fn subprocess_argv(command: &[String], job: &Job, inputs: &[PathBuf]) -> Vec<String> {
    let inputs_json = Value::Array(
        inputs
            .iter()
            .map(|p| Value::String(p.display().to_string()))
            .collect(),
    );
    let mut argv = command.to_vec();
    argv.extend([
        "--inputs".to_string(),
        inputs_json.to_string(),
        "--out".to_string(),
        job.work_dir().display().to_string(),
        "--options".to_string(),
        Value::Object(job.options.clone()).to_string(),
    ]);
    argv
}

/// Forward every line from `reader` to `tx`, replacing invalid UTF-8.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).split(b'\n');
    loop {
        match lines.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes).trim_end_matches('\r').to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(%e, "stopped reading child output");
                break;
            }
        }
    }
}

/// Spawn the routine process and copy its output into the job log until it exits.
///
/// stdout and stderr are read by separate tasks feeding one channel. Lines keep
/// their order within each stream; the interleaving between the two streams is
/// arrival order at the channel and may differ from what a terminal would show.
async fn run_subprocess(
    command: &[String],
    job: &Job,
    inputs: &[PathBuf],
    log: &mut JobLog,
) -> Result<i32, ExecutionError> {
    if command.is_empty() {
        return Err(ExecutionError::new(
            ExecutionErrorKind::Launch,
            "empty subprocess command",
        ));
    }
    let argv = subprocess_argv(command, job, inputs);
    let (program, args) = argv.split_at(1);
    let program = &program[0];

    info!(job_id = %job.id, %program, "spawning routine process");
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            ExecutionError::new(ExecutionErrorKind::Launch, format!("cannot start `{program}`: {e}"))
        })?;

    let (tx, mut rx) = mpsc::channel::<String>(OUTPUT_CHANNEL_CAPACITY);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, tx.clone()));
    }
    drop(tx);

    // Closes once both pipes hit EOF. Output is drained even after a log failure
    // so the child never blocks on a full pipe.
    let mut log_error = None;
    while let Some(line) = rx.recv().await {
        if log_error.is_none() {
            if let Err(e) = log.write(&format!("{line}\n")).await {
                log_error = Some(e);
            }
        }
    }

    let status = child.wait().await.map_err(|e| {
        ExecutionError::new(ExecutionErrorKind::Launch, format!("waiting for `{program}`: {e}"))
    })?;
    if let Some(e) = log_error {
        return Err(e);
    }
    status.code().ok_or_else(|| {
        ExecutionError::new(
            ExecutionErrorKind::RoutineFailed,
            format!("`{program}` terminated without an exit code ({status})"),
        )
    })
}

#[async_trait]
impl JobRunner for ExecutionAdapter {
    async fn run(&self, job: &Job, progress: &JobProgress) -> Result<i32, ExecutionError> {
        tokio::fs::create_dir_all(job.work_dir())
            .await
            .map_err(ExecutionError::io)?;
        let mut log = JobLog::open(job.log_path()).await?;

        let result = self.execute(job, progress, &mut log).await;
        match &result {
            Ok(code) => debug!(job_id = %job.id, exit_code = code, "routine returned"),
            Err(e) => {
                warn!(job_id = %job.id, kind = %e.kind(), error = %e, "routine execution failed");
                if let Err(log_err) = log.write(&format!("\n[ERROR] {e}\n")).await {
                    debug!(job_id = %job.id, error = %log_err, "could not record failure in job log");
                }
            }
        }
        log.close().await;
        result
    }
}
