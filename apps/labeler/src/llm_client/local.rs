//! Local backend: runs an inference CLI (e.g. `ollama run <model>`) once per
//! prompt, writing the prompt to stdin and reading the completion from stdout.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{BackendError, BackendKind, CompletionBackend, GenerationParams};

/// Subprocess-backed generation client.
#[derive(Debug, Clone)]
pub struct LocalProcessClient {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl LocalProcessClient {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run(&self, prompt: &str) -> Result<std::process::Output, BackendError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // stdout/stderr are drained while the prompt is still being written;
        // a child that echoes its input would otherwise fill the pipe and stall.
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            stdin.write_all(prompt.as_bytes()).await?;
            // Dropping stdin at the end of this block gives the child EOF.
            stdin.shutdown().await
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        match fed {
            // A process that exits without reading stdin closes the pipe early;
            // its exit status decides the outcome.
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(e) => return Err(BackendError::Spawn(e)),
        }
        Ok(output?)
    }
}

#[async_trait]
impl CompletionBackend for LocalProcessClient {
    async fn complete(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let started = Instant::now();
        let output = tokio::time::timeout(self.timeout, self.run(prompt))
            .await
            .map_err(|_| BackendError::Timeout(self.timeout))??;

        // Inference CLIs do not promise UTF-8 output.
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(BackendError::ProcessFailed {
                code: output.status.code(),
                stderr,
            });
        }

        if stdout.is_empty() && !stderr.is_empty() {
            return Err(BackendError::ProcessFailed {
                code: output.status.code(),
                stderr,
            });
        }

        if !stderr.is_empty() {
            debug!("{} stderr: {}", self.program, stderr);
        }
        debug!(
            "Local call to {} finished in {}ms",
            self.program,
            started.elapsed().as_millis()
        );

        Ok(stdout)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::LocalProcess
    }
}
