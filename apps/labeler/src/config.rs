use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::labeling::sink::PersistMode;
use crate::llm_client::BackendKind;

const DEFAULT_INPUT_FILE: &str = "training_data.jsonl";
const DEFAULT_OUTPUT_FILE: &str = "training_data_labeled.jsonl";
const DEFAULT_REMOTE_MODEL: &str = "gpt-4.1-mini";
const DEFAULT_LOCAL_MODEL: &str = "llama3.1:8b";
const DEFAULT_API_URL: &str = "https://api.openai.com/v1/responses";
const DEFAULT_LOCAL_COMMAND: &str = "ollama";
const DEFAULT_LOCAL_ARGS: &str = "run {model}";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 400;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Labeling run configuration loaded from environment variables.
/// Fails at startup if a variable required by the chosen backend is missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub backend: BackendKind,
    pub model: String,
    pub max_output_tokens: u32,
    /// Backend-safe worker ceiling. Actual pool size is further capped by
    /// available parallelism.
    pub max_workers: usize,
    pub timeout: Duration,
    pub persist_mode: PersistMode,
    pub resume: bool,
    pub max_retries: u32,
    pub api_key: Option<String>,
    pub api_url: String,
    pub local_command: String,
    pub local_args: Vec<String>,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let backend = match optional_env("LABEL_BACKEND").as_deref() {
            None | Some("remote") => BackendKind::Remote,
            Some("local") => BackendKind::LocalProcess,
            Some(other) => bail!("LABEL_BACKEND must be 'remote' or 'local', got '{other}'"),
        };

        let persist_mode = match optional_env("LABEL_PERSIST_MODE").as_deref() {
            None | Some("incremental") => PersistMode::Incremental,
            Some("batch") => PersistMode::Batch,
            Some(other) => {
                bail!("LABEL_PERSIST_MODE must be 'incremental' or 'batch', got '{other}'")
            }
        };

        let model = optional_env("LABEL_MODEL").unwrap_or_else(|| {
            match backend {
                BackendKind::Remote => DEFAULT_REMOTE_MODEL,
                BackendKind::LocalProcess => DEFAULT_LOCAL_MODEL,
            }
            .to_string()
        });

        let api_key = match backend {
            BackendKind::Remote => Some(require_env("OPENAI_API_KEY")?),
            BackendKind::LocalProcess => optional_env("OPENAI_API_KEY"),
        };

        let local_args = optional_env("LABEL_LOCAL_ARGS")
            .unwrap_or_else(|| DEFAULT_LOCAL_ARGS.to_string())
            .split_whitespace()
            .map(|arg| arg.replace("{model}", &model))
            .collect();

        Ok(Config {
            input_path: optional_env("LABEL_INPUT_FILE")
                .unwrap_or_else(|| DEFAULT_INPUT_FILE.to_string())
                .into(),
            output_path: optional_env("LABEL_OUTPUT_FILE")
                .unwrap_or_else(|| DEFAULT_OUTPUT_FILE.to_string())
                .into(),
            backend,
            model,
            max_output_tokens: parse_env("LABEL_MAX_OUTPUT_TOKENS", DEFAULT_MAX_OUTPUT_TOKENS)?,
            max_workers: parse_env("LABEL_MAX_WORKERS", backend.default_worker_ceiling())?,
            timeout: Duration::from_secs(parse_env("LABEL_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
            persist_mode,
            resume: parse_env("LABEL_RESUME", false)?,
            max_retries: parse_env("LABEL_MAX_RETRIES", 0)?,
            api_key,
            api_url: optional_env("LABEL_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            local_command: optional_env("LABEL_LOCAL_COMMAND")
                .unwrap_or_else(|| DEFAULT_LOCAL_COMMAND.to_string()),
            local_args,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
