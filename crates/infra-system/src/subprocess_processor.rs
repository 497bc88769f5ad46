// Subprocess processor
// One child process per job: job JSON on stdin, result on stdout
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use queuedeck_core::domain::Job;
use queuedeck_core::port::{ExecutionError, Processor, ProgressReporter};

/// Stdout lines starting with this marker carry a progress value
pub const PROGRESS_MARKER: &str = "::progress ";

/// Time between SIGTERM and SIGKILL when a job overruns its timeout
const GRACEFUL_KILL_TIMEOUT: Duration = Duration::from_secs(5);
const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Command a queue runs for each job
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProcessorConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Parent environment variables passed through; everything else is cleared
    #[serde(default)]
    pub env_allowlist: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ProcessorConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Spawns an isolated child process for every job
pub struct SubprocessProcessor {
    config: ProcessorConfig,
}

/// Collected output of a finished child
struct RunOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

impl SubprocessProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Keep only allow-listed variables
    fn filter_env<I>(&self, vars: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter(|(k, _)| self.config.env_allowlist.contains(k))
            .collect()
    }

    fn spawn(&self) -> Result<Child, ExecutionError> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .env_clear()
            .envs(self.filter_env(std::env::vars()))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command
            .spawn()
            .map_err(|e| ExecutionError::SpawnFailed(format!("{}: {}", self.config.command, e)))
    }

    /// Feed stdin, stream stdout and wait for exit
    async fn run(
        child: &mut Child,
        input: Vec<u8>,
        progress: &dyn ProgressReporter,
    ) -> Result<RunOutput, ExecutionError> {
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecutionError::IoError("stdout not captured".to_string()))?;
        let stderr = child.stderr.take();

        // Children that ignore stdin close the pipe early; that is not an error
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            }
        });
        let stderr_reader = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut output = Vec::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ExecutionError::IoError(e.to_string()))?
        {
            match line.strip_prefix(PROGRESS_MARKER) {
                Some(raw) => {
                    let value = parse_value(raw.trim());
                    if let Err(e) = progress.report(value).await {
                        warn!(error = %e, "Failed to record job progress");
                    }
                }
                None => output.push(line),
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ExecutionError::IoError(e.to_string()))?;
        let _ = writer.await;
        let stderr = stderr_reader.await.unwrap_or_default();

        Ok(RunOutput {
            status,
            stdout: output.join("\n"),
            stderr,
        })
    }

    /// SIGTERM first, SIGKILL if the child is still around after the grace period
    async fn kill_graceful(child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            info!(pid, "Sending SIGTERM to overrunning job");
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                let deadline = tokio::time::Instant::now() + GRACEFUL_KILL_TIMEOUT;
                while tokio::time::Instant::now() < deadline {
                    tokio::time::sleep(KILL_POLL_INTERVAL).await;
                    if matches!(child.try_wait(), Ok(Some(_))) {
                        info!(pid, "Job process exited after SIGTERM");
                        return;
                    }
                }
                warn!(pid, "Job process ignored SIGTERM, sending SIGKILL");
            }
        }

        if let Err(e) = child.kill().await {
            warn!(error = %e, "Failed to kill job process");
        }
    }
}

/// JSON when it parses, otherwise the raw text
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn result_value(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        Value::Null
    } else {
        parse_value(trimmed)
    }
}

#[async_trait]
impl Processor for SubprocessProcessor {
    async fn process(
        &self,
        job: &Job,
        progress: &dyn ProgressReporter,
    ) -> Result<Value, ExecutionError> {
        let input = serde_json::to_vec(job)
            .map_err(|e| ExecutionError::InvalidPayload(e.to_string()))?;
        let mut child = self.spawn()?;

        info!(
            queue = %job.queue,
            job_id = %job.id,
            command = %self.config.command,
            pid = ?child.id(),
            "Starting job process"
        );

        let output = match self.config.timeout_ms {
            Some(timeout_ms) => {
                let limit = Duration::from_millis(timeout_ms);
                match tokio::time::timeout(limit, Self::run(&mut child, input, progress)).await {
                    Ok(result) => result?,
                    Err(_) => {
                        Self::kill_graceful(&mut child).await;
                        return Err(ExecutionError::Timeout(timeout_ms));
                    }
                }
            }
            None => Self::run(&mut child, input, progress).await?,
        };

        debug!(job_id = %job.id, status = %output.status, "Job process exited");

        if output.status.success() {
            Ok(result_value(&output.stdout))
        } else {
            let stderr = output.stderr.trim();
            let reason = if stderr.is_empty() {
                match output.status.code() {
                    Some(code) => format!("process exited with code {}", code),
                    None => "process terminated by signal".to_string(),
                }
            } else {
                stderr.to_string()
            };
            Err(ExecutionError::Failed(reason))
        }
    }
}
