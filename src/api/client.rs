use thiserror::Error;

use crate::api::stream::CompletionStream;
use crate::api::{CompletionRequest, CompletionResponse, TokenizeRequest, TokenizeResponse};
use crate::utils::url::construct_api_url;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("Inference server is not reachable at {url}: {source}")]
    UpstreamUnavailable {
        url: String,
        source: reqwest::Error,
    },
    #[error("Error from inference server (HTTP {status}): {message}")]
    UpstreamError { status: u16, message: String },
    /// The server reported a failure inside an otherwise healthy stream.
    #[error("Inference server aborted the stream: {0}")]
    StreamError(String),
    #[error("Received a malformed stream event: {0}")]
    MalformedEvent(String),
    #[error("Connection to inference server was interrupted: {0}")]
    Interrupted(reqwest::Error),
    #[error("Could not decode inference server response: {0}")]
    Decode(#[from] serde_json::Error),
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .or_else(|| value.get("error").and_then(|v| v.as_str()))
        .or_else(|| value.get("message").and_then(|v| v.as_str()))
        .map(collapse_whitespace)
}

/// One-line description of an upstream error body: the JSON error message
/// when there is one, otherwise the body itself.
pub(crate) fn format_api_error(error_text: &str) -> String {
    let summary = serde_json::from_str::<serde_json::Value>(error_text.trim())
        .ok()
        .and_then(|value| extract_error_summary(&value))
        .unwrap_or_else(|| collapse_whitespace(error_text));
    if summary.is_empty() {
        "<empty response>".to_string()
    } else {
        summary
    }
}

/// The inference calls the generation pipeline needs.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError>;

    async fn stream(&self, request: CompletionRequest)
        -> Result<CompletionStream, CompletionError>;

    async fn count_tokens(&self, text: &str) -> Result<usize, CompletionError>;
}

/// HTTP client for a llama.cpp server's native API.
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    base_url: String,
}

impl CompletionClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<reqwest::Response, CompletionError> {
        let url = construct_api_url(&self.base_url, endpoint);
        tracing::debug!(%url, "POST to inference server");
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|source| CompletionError::UpstreamUnavailable { url, source })?;
        ensure_success(response).await
    }

    /// Single-shot completion. `request.stream` is forced off.
    pub async fn complete(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        request.stream = false;
        let response = self.post_json("completion", &request).await?;
        let body = response.text().await.map_err(CompletionError::Interrupted)?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Streaming completion. `request.stream` is forced on.
    pub async fn stream(
        &self,
        mut request: CompletionRequest,
    ) -> Result<CompletionStream, CompletionError> {
        request.stream = true;
        let response = self.post_json("completion", &request).await?;
        Ok(CompletionStream::from_response(response))
    }

    /// Number of tokens `text` occupies in the loaded model's vocabulary.
    pub async fn tokenize(&self, text: &str) -> Result<usize, CompletionError> {
        let response = self
            .post_json("tokenize", &TokenizeRequest { content: text })
            .await?;
        let body = response.text().await.map_err(CompletionError::Interrupted)?;
        let parsed: TokenizeResponse = serde_json::from_str(&body)?;
        Ok(parsed.tokens.len())
    }

    /// `Ok(true)` once the model is loaded, `Ok(false)` while it is still
    /// loading (the server answers 503 until then).
    pub async fn health(&self) -> Result<bool, CompletionError> {
        let url = construct_api_url(&self.base_url, "health");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| CompletionError::UpstreamUnavailable { url, source })?;
        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Ok(false);
        }
        ensure_success(response).await.map(|_| true)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, CompletionError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    Err(CompletionError::UpstreamError {
        status,
        message: format_api_error(&error_text),
    })
}

#[async_trait::async_trait]
impl CompletionBackend for CompletionClient {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CompletionError> {
        CompletionClient::complete(self, request).await
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionStream, CompletionError> {
        CompletionClient::stream(self, request).await
    }

    async fn count_tokens(&self, text: &str) -> Result<usize, CompletionError> {
        self.tokenize(text).await
    }
}
