//! Labeling Orchestrator — fans every input record out to the generation
//! backend through a bounded worker pool and persists labels as they arrive.
//!
//! Flow per record: parse line → build_prompt → backend.complete (with
//! optional retries) → extract → LabeledRecord → sink.
//!
//! Only a missing/unreadable input file or an unwritable sink stops the run.
//! Every other failure stays inside its task: it is logged, counted, and the
//! record is left out of the output.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::errors::LabelError;
use crate::labeling::extractor::extract;
use crate::labeling::pool::{available_parallelism, size_pool, JobOutcome, WorkerPool};
use crate::labeling::progress::{format_mm_ss, ProgressState};
use crate::labeling::prompts::build_prompt;
use crate::labeling::sink::{load_labeled_inputs, OutputSink, PersistMode};
use crate::llm_client::{BackendError, CompletionBackend, GenerationParams};
use crate::models::record::{InputRecord, LabeledRecord};

/// First retry delay; doubles on every further attempt.
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct LabelingOptions {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Backend-safe concurrency ceiling.
    pub max_workers: usize,
    pub persist_mode: PersistMode,
    /// Skip records whose `input` is already in the output file.
    pub resume: bool,
    /// Extra attempts for a task whose backend call failed.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl LabelingOptions {
    pub fn new(input_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: output_path.into(),
            max_workers: 4,
            persist_mode: PersistMode::Incremental,
            resume: false,
            max_retries: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

/// A record that did not make it into the output.
#[derive(Debug, Clone, Serialize)]
pub struct FailedTask {
    pub line: usize,
    pub error: String,
}

impl fmt::Display for FailedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.error)
    }
}

/// End-of-run report.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub skipped: usize,
    pub succeeded: usize,
    /// Successes whose completion could not be parsed and were kept as raw text.
    pub raw_fallbacks: usize,
    pub failed: usize,
    pub workers: usize,
    pub elapsed: Duration,
    pub output_path: PathBuf,
    pub failures: Vec<FailedTask>,
}

pub struct Orchestrator {
    backend: Arc<dyn CompletionBackend>,
    params: Arc<GenerationParams>,
    options: LabelingOptions,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        params: GenerationParams,
        options: LabelingOptions,
    ) -> Self {
        Self {
            backend,
            params: Arc::new(params),
            options,
        }
    }

    /// Runs one labeling batch to completion.
    pub async fn run(&self) -> Result<RunSummary, LabelError> {
        let opts = &self.options;
        let lines = read_input_lines(&opts.input_path).await?;
        let (lines, skipped) = self.skip_already_labeled(lines).await?;

        let workers = size_pool(opts.max_workers, available_parallelism());
        info!(
            "Labeling {} records with {} workers ({} backend, {} persistence)",
            lines.len(),
            workers,
            self.backend.kind().as_str(),
            opts.persist_mode.as_str()
        );
        if skipped > 0 {
            info!("Skipping {skipped} records already present in the output");
        }

        let mut sink = OutputSink::open(&opts.output_path, opts.persist_mode).await?;
        let mut progress = ProgressState::new(lines.len());
        let mut failures = Vec::new();
        let mut raw_fallbacks = 0;

        let mut pool = WorkerPool::new(workers);
        for (line_no, line) in lines {
            let backend = Arc::clone(&self.backend);
            let params = Arc::clone(&self.params);
            let max_retries = opts.max_retries;
            let backoff = opts.retry_backoff;
            pool.submit(line_no, async move {
                label_line(line_no, line, backend.as_ref(), &params, max_retries, backoff).await
            });
        }

        while let Some((line_no, outcome)) = pool.next_completed().await {
            let result = match outcome {
                JobOutcome::Finished(result) => result,
                JobOutcome::Panicked(reason) => Err(LabelError::TaskPanicked(reason)),
            };

            match result {
                Ok(record) => {
                    if !record.output.is_structured() {
                        raw_fallbacks += 1;
                        warn!("Line {line_no}: completion was not valid JSON, kept raw output");
                    } else if !record.output.matches_schema() {
                        debug!("Line {line_no}: label keys differ from the expected schema");
                    }
                    // A sink failure is fatal; dropping the pool aborts in-flight tasks.
                    sink.write(record).await?;
                    progress.record_success();
                    info!("{}", progress.progress_line());
                    debug!("Throughput {:.2} tasks/s", progress.throughput());
                }
                // Tasks never raise Input/Output; should one surface, it stops the run.
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("Failed to label record on line {line_no}: {e}");
                    progress.record_failure();
                    failures.push(FailedTask {
                        line: line_no,
                        error: e.to_string(),
                    });
                }
            }
        }

        sink.finish().await?;

        failures.sort_by_key(|f| f.line);
        let summary = RunSummary {
            total: progress.total(),
            skipped,
            succeeded: progress.succeeded(),
            raw_fallbacks,
            failed: progress.failed(),
            workers,
            elapsed: progress.elapsed(),
            output_path: opts.output_path.clone(),
            failures,
        };

        info!(
            "Labeling finished in {}: {} succeeded, {} failed, {} skipped",
            format_mm_ss(summary.elapsed),
            summary.succeeded,
            summary.failed,
            summary.skipped
        );

        Ok(summary)
    }

    async fn skip_already_labeled(
        &self,
        lines: Vec<InputLine>,
    ) -> Result<(Vec<InputLine>, usize), LabelError> {
        if !self.options.resume {
            return Ok((lines, 0));
        }
        if self.options.persist_mode == PersistMode::Batch {
            warn!("Resume is ignored in batch mode; the output file will be replaced");
            return Ok((lines, 0));
        }

        let done = load_labeled_inputs(&self.options.output_path).await?;
        if done.is_empty() {
            return Ok((lines, 0));
        }

        let before = lines.len();
        let pending: Vec<_> = lines
            .into_iter()
            .filter(|(_, line)| match line.as_deref().map(InputRecord::from_line) {
                Ok(Ok(record)) => !done.contains(&record.input),
                // Unreadable lines go through so they are reported as failures.
                _ => true,
            })
            .collect();
        let skipped = before - pending.len();
        Ok((pending, skipped))
    }
}

/// 1-based line number and the decoded line, or why it could not be decoded.
type InputLine = (usize, Result<String, String>);

/// Reads the input JSONL. Blank lines are not records and are dropped here;
/// line numbers stay 1-based positions in the file. Lines are decoded one at a
/// time so a stray non-UTF-8 byte fails only its own record.
async fn read_input_lines(path: &Path) -> Result<Vec<InputLine>, LabelError> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|source| LabelError::Input {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(content
        .split(|&b| b == b'\n')
        .enumerate()
        .map(|(idx, raw)| {
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let decoded = String::from_utf8(raw.to_vec())
                .map_err(|e| format!("line is not valid UTF-8 ({})", e.utf8_error()));
            (idx + 1, decoded)
        })
        .filter(|(_, line)| !matches!(line, Ok(text) if text.trim().is_empty()))
        .collect())
}

/// One task: everything that can go wrong for a single record ends up in the
/// returned error.
async fn label_line(
    line_no: usize,
    line: Result<String, String>,
    backend: &dyn CompletionBackend,
    params: &GenerationParams,
    max_retries: u32,
    backoff: Duration,
) -> Result<LabeledRecord, LabelError> {
    let line = line.map_err(|reason| LabelError::Record {
        line: line_no,
        reason,
    })?;
    let record = InputRecord::from_line(&line).map_err(|e| LabelError::Record {
        line: line_no,
        reason: e.to_string(),
    })?;

    let prompt = build_prompt(&record.input);
    let completion =
        complete_with_retry(line_no, &prompt, backend, params, max_retries, backoff).await?;

    Ok(LabeledRecord::new(record, extract(&completion)))
}

async fn complete_with_retry(
    line_no: usize,
    prompt: &str,
    backend: &dyn CompletionBackend,
    params: &GenerationParams,
    max_retries: u32,
    backoff: Duration,
) -> Result<String, BackendError> {
    let mut attempt = 0;
    loop {
        match backend.complete(prompt, params).await {
            Ok(text) => return Ok(text),
            Err(e) if attempt < max_retries => {
                // Exponential backoff: backoff, 2*backoff, 4*backoff, ...
                let delay = backoff.saturating_mul(1 << attempt.min(16));
                warn!(
                    "Backend call for line {} failed (attempt {}/{}): {}; retrying after {}ms",
                    line_no,
                    attempt + 1,
                    max_retries + 1,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
