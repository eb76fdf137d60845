//! Remote backend: one POST per prompt to a Responses-style generation API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{BackendError, BackendKind, CompletionBackend, GenerationParams};

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: &'a str,
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
pub struct ResponsesResponse {
    /// Convenience field some gateways populate directly.
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl ResponsesResponse {
    /// Concatenated `output_text` parts of every message item.
    pub fn text(&self) -> Option<String> {
        if let Some(text) = self.output_text.as_deref() {
            return Some(text.to_string());
        }

        let parts: Vec<&str> = self
            .output
            .iter()
            .filter(|item| item.item_type == "message")
            .flat_map(|item| item.content.iter())
            .filter(|part| part.part_type == "output_text")
            .filter_map(|part| part.text.as_deref())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.concat())
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// HTTP client for the remote generation API.
#[derive(Clone)]
pub struct RemoteClient {
    client: Client,
    api_url: String,
    api_key: String,
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(api_url: String, api_key: String, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            api_url,
            api_key,
            timeout,
        })
    }

    /// Makes a single call to the API. Any transport, status, or decode
    /// failure is returned to the caller as-is.
    pub async fn call(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<ResponsesResponse, BackendError> {
        let request_body = ResponsesRequest {
            model: &params.model,
            input: prompt,
            temperature: params.temperature,
            max_output_tokens: params.max_output_tokens,
        };

        let started = Instant::now();
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(BackendError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await.map_err(|e| self.classify(e))?;
        let parsed: ResponsesResponse = serde_json::from_str(&body)?;

        if let Some(usage) = &parsed.usage {
            debug!(
                "Remote call succeeded in {}ms: input_tokens={}, output_tokens={}",
                started.elapsed().as_millis(),
                usage.input_tokens,
                usage.output_tokens
            );
        }

        Ok(parsed)
    }

    fn classify(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Http(err)
        }
    }
}

#[async_trait]
impl CompletionBackend for RemoteClient {
    async fn complete(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, BackendError> {
        let response = self.call(prompt, params).await?;
        let text = response.text().ok_or(BackendError::EmptyCompletion)?;
        Ok(text.trim().to_string())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn params() -> GenerationParams {
        GenerationParams::new("gpt-4.1-mini", 400)
    }

    fn client_for(server: &MockServer, timeout: Duration) -> RemoteClient {
        RemoteClient::new(
            format!("{}/v1/responses", server.uri()),
            "sk-test".to_string(),
            timeout,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_complete_sends_fixed_temperature_and_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-4.1-mini",
                "input": "label this",
                "temperature": 0.0,
                "max_output_tokens": 400
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": [{
                    "type": "message",
                    "content": [{"type": "output_text", "text": "  {\"grammar\":\"good\"}\n"}]
                }],
                "usage": {"input_tokens": 12, "output_tokens": 5}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let text = client.complete("label this", &params()).await.unwrap();
        assert_eq!(text, r#"{"grammar":"good"}"#);
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"error": {"message": "invalid api key"}})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let err = client.complete("x", &params()).await.unwrap_err();
        match err {
            BackendError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "invalid api key");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let err = client.complete("x", &params()).await.unwrap_err();
        assert!(matches!(err, BackendError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_slow_response_becomes_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"output_text": "late"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_millis(50));
        let err = client.complete("x", &params()).await.unwrap_err();
        assert!(matches!(err, BackendError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_response_without_text_is_empty_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"output": []})))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let err = client.complete("x", &params()).await.unwrap_err();
        assert!(matches!(err, BackendError::EmptyCompletion));
    }

    #[test]
    fn test_text_prefers_output_text_shortcut() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "output_text": "direct",
            "output": [{"type": "message", "content": [{"type": "output_text", "text": "nested"}]}]
        }))
        .unwrap();
        assert_eq!(response.text().as_deref(), Some("direct"));
    }

    #[test]
    fn test_text_skips_non_message_items() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "output": [
                {"type": "reasoning", "content": [{"type": "output_text", "text": "hidden"}]},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "{\"a\":"},
                    {"type": "output_text", "text": "1}"}
                ]}
            ]
        }))
        .unwrap();
        assert_eq!(response.text().as_deref(), Some("{\"a\":1}"));
    }
}
