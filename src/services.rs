//! Thin capability calls against the backend.
//!
//! Each function assembles one [`BackendRequest`] and hands it to the
//! [`Transport`]. None of them translate anything: callers pass backend-shaped
//! requests and get backend-shaped responses.

use crate::error::Result;
use crate::sse::SseStream;
use crate::transport::{BackendRequest, Transport};
use crate::translate::openai_types::{ChatCompletionRequest, ChatCompletionResponse};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub const CHAT_COMPLETIONS_PATH: &str = "chat/completions";
pub const EMBEDDINGS_PATH: &str = "embeddings";
pub const IMAGE_GENERATIONS_PATH: &str = "images/generations";
pub const SPEECH_PATH: &str = "audio/speech";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub model: String,
    /// A string, an array of strings, or token arrays.
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    #[serde(default)]
    pub object: String,
    pub data: Vec<Embedding>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub usage: Option<EmbeddingUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    #[serde(default)]
    pub object: String,
    pub embedding: Vec<f64>,
    #[serde(default)]
    pub index: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EmbeddingUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub created: u64,
    pub data: Vec<ImageData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechRequest {
    pub model: String,
    pub input: String,
    pub voice: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
}

pub async fn chat_completion(
    transport: &Transport,
    request: &ChatCompletionRequest,
    cancel: &CancellationToken,
) -> Result<ChatCompletionResponse> {
    let request = BackendRequest::post_json(CHAT_COMPLETIONS_PATH, request)?;
    transport.execute_json(&request, cancel).await
}

pub async fn chat_completion_stream(
    transport: &Transport,
    request: &ChatCompletionRequest,
    cancel: &CancellationToken,
) -> Result<SseStream> {
    let request = BackendRequest::post_json(CHAT_COMPLETIONS_PATH, request)?;
    transport.execute_stream(&request, cancel).await
}

pub async fn create_embeddings(
    transport: &Transport,
    request: &EmbeddingRequest,
    cancel: &CancellationToken,
) -> Result<EmbeddingResponse> {
    let request = BackendRequest::post_json(EMBEDDINGS_PATH, request)?;
    transport.execute_json(&request, cancel).await
}

pub async fn generate_image(
    transport: &Transport,
    request: &ImageGenerationRequest,
    cancel: &CancellationToken,
) -> Result<ImageResponse> {
    let request = BackendRequest::post_json(IMAGE_GENERATIONS_PATH, request)?;
    transport.execute_json(&request, cancel).await
}

/// Synthesize speech; the backend answers with raw audio bytes.
pub async fn create_speech(
    transport: &Transport,
    request: &SpeechRequest,
    cancel: &CancellationToken,
) -> Result<Bytes> {
    let request = BackendRequest::post_json(SPEECH_PATH, request)?;
    Ok(transport.execute(&request, cancel).await?.body)
}
