//! Wire types and HTTP client for the llama.cpp server's native endpoints.

use serde::{Deserialize, Serialize};

pub mod client;
pub mod stream;

pub use client::{CompletionBackend, CompletionClient, CompletionError};
pub use stream::{CompletionStream, StreamEvent};

/// Sampling knobs understood by `/completion`.
///
/// Unset fields are left out of the body so the server applies its own
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tfs_z: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typical_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat_last_n: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub penalize_nl: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat_tau: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mirostat_eta: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub prompt: String,
    pub n_predict: i32,
    pub stream: bool,
    pub cache_prompt: bool,
    #[serde(flatten)]
    pub sampling: SamplingParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// GBNF grammar restricting the output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grammar: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, n_predict: i32) -> Self {
        Self {
            prompt: prompt.into(),
            n_predict,
            stream: false,
            cache_prompt: false,
            sampling: SamplingParams::default(),
            seed: None,
            grammar: None,
            stop: Vec::new(),
        }
    }
}

/// Non-streaming `/completion` response. Only the fields we act on are kept.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub stop: bool,
}

/// One `data:` frame of a streaming `/completion` response.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChunk {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub stop: bool,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct TokenizeRequest<'a> {
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct TokenizeResponse {
    #[serde(default)]
    pub tokens: Vec<serde_json::Value>,
}
