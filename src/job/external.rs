//! External raster engine backend
//!
//! Spawns the engine with a stdin→stdout argument list and streams the
//! source body through it into the staging file. The engine's stderr goes to
//! the debug log only.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};

use super::{JobError, SourceClient, SourceInfo, TransformExecutor};
use crate::command::{build_args, TransformCommand};
use crate::options::{FileTargets, TransformOptions};

pub struct ExternalEngine {
    convert_command: String,
}

impl ExternalEngine {
    pub fn new(convert_command: impl Into<String>) -> Self {
        Self {
            convert_command: convert_command.into(),
        }
    }

    pub fn convert_command(&self) -> &str {
        &self.convert_command
    }
}

#[async_trait]
impl TransformExecutor for ExternalEngine {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn transform(
        &self,
        source: &SourceClient,
        options: &TransformOptions,
        _info: &SourceInfo,
        destination: &Path,
    ) -> Result<(), JobError> {
        let args = build_args(options, &FileTargets::stdio(), &self.convert_command);
        tracing::info!(
            variant = TransformCommand::select(options).name(),
            command = %args.join(" "),
            "Engine command"
        );

        let mut child = Command::new(&self.convert_command)
            .args(&args[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                JobError::engine(format!("failed to spawn {}: {}", self.convert_command, e))
            })?;

        let (stdin, stdout, stderr) = match (
            child.stdin.take(),
            child.stdout.take(),
            child.stderr.take(),
        ) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.kill().await;
                return Err(JobError::engine("engine stdio unavailable"));
            }
        };

        let body = match source.open(options.url()).await {
            Ok(body) => body,
            Err(e) => {
                // Never leave the engine waiting on an input that will not come
                let _ = child.kill().await;
                return Err(e);
            }
        };

        let (fed, written, ()) = tokio::join!(
            feed_stdin(body, stdin),
            write_stdout(stdout, destination),
            log_stderr(stderr),
        );

        let status = child
            .wait()
            .await
            .map_err(|e| JobError::engine(format!("failed to wait for engine: {}", e)))?;

        if !status.success() {
            tracing::warn!(code = ?status.code(), "Engine exited with failure");
            return Err(JobError::engine(format!("engine exited with {}", status)));
        }

        written?;
        let bytes_in = fed?;
        tracing::debug!(bytes_in, "Engine finished");
        Ok(())
    }
}

async fn feed_stdin<S>(body: S, mut stdin: ChildStdin) -> Result<u64, JobError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    let mut body = Box::pin(body);
    let mut total = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| JobError::engine(format!("source stream error: {}", e)))?;
        stdin
            .write_all(&chunk)
            .await
            .map_err(|e| JobError::engine(format!("engine input error: {}", e)))?;
        total += chunk.len() as u64;
    }

    stdin
        .shutdown()
        .await
        .map_err(|e| JobError::engine(format!("engine input error: {}", e)))?;
    Ok(total)
}

async fn write_stdout(mut stdout: ChildStdout, destination: &Path) -> Result<u64, JobError> {
    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| JobError::write_failure(e.to_string()))?;

    let copied = tokio::io::copy(&mut stdout, &mut file)
        .await
        .map_err(|e| JobError::write_failure(e.to_string()))?;

    file.flush()
        .await
        .map_err(|e| JobError::write_failure(e.to_string()))?;
    Ok(copied)
}

async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(line = %line, "Engine stderr");
    }
}
