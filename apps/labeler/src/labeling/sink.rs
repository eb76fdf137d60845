//! Output sink for labeled records.
//!
//! `Incremental` appends and flushes one JSONL line per completed record, so a
//! crash loses only work still in flight. `Batch` buffers everything and
//! replaces the output file atomically once the run finishes.
//!
//! Only the orchestrator's drain loop writes to the sink, so appends are
//! serialized without a lock.

use std::collections::HashSet;
use std::io::{SeekFrom, Write};
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

use crate::errors::LabelError;
use crate::models::record::LabeledRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    Incremental,
    Batch,
}

impl PersistMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PersistMode::Incremental => "incremental",
            PersistMode::Batch => "batch",
        }
    }
}

pub struct OutputSink {
    path: PathBuf,
    mode: PersistMode,
    buffer: Vec<LabeledRecord>,
    written: usize,
}

impl OutputSink {
    /// Prepares the sink. In incremental mode the output file is created if it
    /// does not exist yet; existing content is kept and appended to. A last
    /// line left unterminated by an interrupted run is closed off first so the
    /// next record starts on its own line.
    pub async fn open(path: impl Into<PathBuf>, mode: PersistMode) -> Result<Self, LabelError> {
        let path = path.into();
        if mode == PersistMode::Incremental {
            let mut file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(&path)
                .await?;
            if ends_mid_line(&mut file).await? {
                warn!(
                    "{} ends with an incomplete line; starting new records on a fresh line",
                    path.display()
                );
                file.write_all(b"\n").await?;
                file.flush().await?;
                file.sync_data().await?;
            }
        }
        Ok(Self {
            path,
            mode,
            buffer: Vec::new(),
            written: 0,
        })
    }

    pub async fn write(&mut self, record: LabeledRecord) -> Result<(), LabelError> {
        match self.mode {
            PersistMode::Incremental => {
                let line = to_jsonl_line(&record)?;
                let mut file = OpenOptions::new().append(true).open(&self.path).await?;
                // One write call per line keeps each record contiguous.
                file.write_all(line.as_bytes()).await?;
                file.flush().await?;
                file.sync_data().await?;
            }
            PersistMode::Batch => self.buffer.push(record),
        }
        self.written += 1;
        Ok(())
    }

    /// Finalizes the sink and returns how many records it accepted. Batch mode
    /// writes the buffered records to a temp file next to the target and
    /// renames it into place.
    pub async fn finish(self) -> Result<usize, LabelError> {
        if self.mode == PersistMode::Incremental {
            return Ok(self.written);
        }

        let OutputSink {
            path,
            buffer,
            written,
            ..
        } = self;

        let mut lines = String::new();
        for record in &buffer {
            lines.push_str(&to_jsonl_line(record)?);
        }

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(lines.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| LabelError::Output(std::io::Error::other(e)))??;

        Ok(written)
    }
}

async fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    if file.metadata().await?.len() == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

fn to_jsonl_line(record: &LabeledRecord) -> Result<String, LabelError> {
    let mut line = serde_json::to_string(record).map_err(std::io::Error::from)?;
    line.push('\n');
    Ok(line)
}

/// `input` values already present in an output file from an earlier run.
/// A missing file yields an empty set; unparseable lines are skipped.
pub async fn load_labeled_inputs(path: &Path) -> Result<HashSet<String>, LabelError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
        Err(e) => return Err(LabelError::Output(e)),
    };

    let mut inputs = HashSet::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => {
                if let Some(input) = value.get("input").and_then(|v| v.as_str()) {
                    inputs.insert(input.to_string());
                }
            }
            Err(e) => warn!(
                "Ignoring unreadable line {} in {}: {}",
                idx + 1,
                path.display(),
                e
            ),
        }
    }
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::{InputRecord, LabelOutput};

    fn record(input: &str) -> LabeledRecord {
        LabeledRecord::new(
            InputRecord::from_line(&serde_json::json!({ "input": input }).to_string()).unwrap(),
            LabelOutput::Raw {
                raw_output: format!("label for {input}"),
            },
        )
    }

    fn read_lines(path: &Path) -> Vec<serde_json::Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_incremental_persists_each_record_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut sink = OutputSink::open(&path, PersistMode::Incremental).await.unwrap();
        assert!(path.exists(), "incremental sink creates the file up front");

        sink.write(record("a")).await.unwrap();
        assert_eq!(read_lines(&path).len(), 1);
        sink.write(record("b")).await.unwrap();

        // Dropping without finish() stands in for a crash after two records.
        drop(sink);
        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["input"], "a");
        assert_eq!(lines[1]["input"], "b");
    }

    #[tokio::test]
    async fn test_incremental_appends_to_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        std::fs::write(&path, "{\"input\":\"old\",\"output\":{\"raw_output\":\"\"}}\n").unwrap();

        let mut sink = OutputSink::open(&path, PersistMode::Incremental).await.unwrap();
        sink.write(record("new")).await.unwrap();
        assert_eq!(sink.finish().await.unwrap(), 1);

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["input"], "old");
        assert_eq!(lines[1]["input"], "new");
    }

    #[tokio::test]
    async fn test_incremental_closes_off_torn_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        std::fs::write(&path, r#"{"input":"old","output":{"gra"#).unwrap();

        let mut sink = OutputSink::open(&path, PersistMode::Incremental).await.unwrap();
        sink.write(record("new")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"input":"old","output":{"gra"#);
        let latest: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(latest["input"], "new");

        let inputs = load_labeled_inputs(&path).await.unwrap();
        assert_eq!(inputs.len(), 1);
        assert!(inputs.contains("new"));
    }

    #[tokio::test]
    async fn test_reopening_intact_output_adds_no_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut sink = OutputSink::open(&path, PersistMode::Incremental).await.unwrap();
        sink.write(record("a")).await.unwrap();
        drop(sink);

        let mut sink = OutputSink::open(&path, PersistMode::Incremental).await.unwrap();
        sink.write(record("b")).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("\n\n"));
        assert_eq!(read_lines(&path).len(), 2);
    }

    #[tokio::test]
    async fn test_batch_writes_nothing_until_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut sink = OutputSink::open(&path, PersistMode::Batch).await.unwrap();
        sink.write(record("a")).await.unwrap();
        sink.write(record("b")).await.unwrap();
        assert!(!path.exists());

        assert_eq!(sink.finish().await.unwrap(), 2);
        assert_eq!(read_lines(&path).len(), 2);
    }

    #[tokio::test]
    async fn test_batch_replaces_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        std::fs::write(&path, "stale\nstale\nstale\n").unwrap();

        let mut sink = OutputSink::open(&path, PersistMode::Batch).await.unwrap();
        sink.write(record("fresh")).await.unwrap();
        sink.finish().await.unwrap();

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["input"], "fresh");
    }

    #[tokio::test]
    async fn test_unicode_is_written_unescaped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut sink = OutputSink::open(&path, PersistMode::Incremental).await.unwrap();
        sink.write(record("Zoë — Ingénieure")).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("Zoë — Ingénieure"));
    }

    #[tokio::test]
    async fn test_load_labeled_inputs_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        std::fs::write(
            &path,
            "{\"input\":\"one\",\"output\":{}}\n{\"input\":\"tw\n\n{\"input\":\"three\",\"output\":{}}\n",
        )
        .unwrap();

        let inputs = load_labeled_inputs(&path).await.unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(inputs.contains("one"));
        assert!(inputs.contains("three"));
    }

    #[tokio::test]
    async fn test_load_labeled_inputs_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inputs = load_labeled_inputs(&dir.path().join("absent.jsonl"))
            .await
            .unwrap();
        assert!(inputs.is_empty());
    }
}
