/// LLM Client — the single point of entry for every text-generation call made
/// by the labeler.
///
/// ARCHITECTURAL RULE: No other module may talk to a generation backend
/// directly. Labeling code depends on `CompletionBackend` only.
///
/// Two interchangeable variants sit behind the trait: an HTTP API (`remote`)
/// and a local inference process fed over stdin (`local`). Neither retries;
/// retry policy belongs to the orchestrator.
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod local;
pub mod prompts;
pub mod remote;

pub use local::LocalProcessClient;
pub use remote::RemoteClient;

/// Temperature used for every labeling call. Fixed so labels are reproducible.
pub const TEMPERATURE: f32 = 0.0;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn local inference process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Local inference process failed (exit code {code:?}): {stderr}")]
    ProcessFailed { code: Option<i32>, stderr: String },

    #[error("Response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Backend returned empty completion")]
    EmptyCompletion,
}

/// Which backend family a client talks to. Drives the default worker ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Remote,
    LocalProcess,
}

impl BackendKind {
    /// Safe concurrency ceiling when none is configured. Remote APIs are bound
    /// by rate limits; a local model shares one accelerator and must stay low.
    pub fn default_worker_ceiling(self) -> usize {
        match self {
            BackendKind::Remote => 4,
            BackendKind::LocalProcess => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Remote => "remote",
            BackendKind::LocalProcess => "local",
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerationParams {
    pub fn new(model: impl Into<String>, max_output_tokens: u32) -> Self {
        Self {
            model: model.into(),
            temperature: TEMPERATURE,
            max_output_tokens,
        }
    }
}

/// A text-generation backend. Returns the raw completion text for one prompt.
///
/// Implementations enforce their own timeout and surface it as
/// `BackendError::Timeout`.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, prompt: &str, params: &GenerationParams)
        -> Result<String, BackendError>;

    fn kind(&self) -> BackendKind;
}

/// The labeler's generation client, one variant per backend family.
pub enum LlmClient {
    Remote(RemoteClient),
    LocalProcess(LocalProcessClient),
}

#[async_trait]
impl CompletionBackend for LlmClient {
    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        match self {
            LlmClient::Remote(client) => client.complete(prompt, params).await,
            LlmClient::LocalProcess(client) => client.complete(prompt, params).await,
        }
    }

    fn kind(&self) -> BackendKind {
        match self {
            LlmClient::Remote(_) => BackendKind::Remote,
            LlmClient::LocalProcess(_) => BackendKind::LocalProcess,
        }
    }
}
