//! Turning extracted document text into structured records via an AI provider.
//!
//! Both adapters issue HTTP requests directly to the provider and insist on a JSON object
//! in the reply. Anything else is reported as a [`StructuringError`]; there is no retry at
//! this layer.

use crate::config::{Config, StructurerProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Instructions sent to the provider when `STRUCTURER_PROMPT` is not set.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You extract structured data from shipping and port \
documents such as Statements of Facts. Read the document text supplied by the user and reply \
with a single JSON object describing it. Use concise camelCase keys, keep timestamps exactly as \
written, and put chronological operations in an `events` array where each entry has `event`, \
`start` and `end` keys. Reply with JSON only, without commentary or Markdown.";

/// A structured record produced from one document.
pub type Record = Map<String, Value>;

/// Errors surfaced while structuring document text.
#[derive(Debug, Error)]
pub enum StructuringError {
    /// Provider could not be reached or the client could not be built.
    #[error("Structuring provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to structure document: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded as JSON.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Provider returned valid JSON that is not an object.
    #[error("Provider returned a JSON {0} instead of an object")]
    NotAnObject(&'static str),
}

/// Interface implemented by structuring providers.
#[async_trait]
pub trait Structurer: Send + Sync {
    /// Produce a structured record from raw document text.
    async fn structure(&self, text: &str) -> Result<Record, StructuringError>;
}

/// Build the structurer selected by configuration.
pub fn build_structurer(config: &Config) -> Result<Arc<dyn Structurer>, StructuringError> {
    let http = build_http_client()?;
    let prompt = config
        .structurer_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

    let structurer: Arc<dyn Structurer> = match config.structurer_provider {
        StructurerProvider::Ollama => Arc::new(OllamaStructurer {
            http,
            base_url: config.ollama_url.clone(),
            model: config.structurer_model.clone(),
            prompt,
        }),
        StructurerProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                StructuringError::ProviderUnavailable("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAiStructurer {
                http,
                base_url: config.openai_base_url.clone(),
                api_key,
                model: config.structurer_model.clone(),
                prompt,
            })
        }
    };

    tracing::info!(
        provider = ?config.structurer_provider,
        model = %config.structurer_model,
        "Structurer initialized"
    );
    Ok(structurer)
}

fn build_http_client() -> Result<Client, StructuringError> {
    Client::builder()
        .user_agent("sof-extract/structurer")
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|error| {
            StructuringError::ProviderUnavailable(format!("failed to build HTTP client: {error}"))
        })
}

/// Decode a provider reply into a record, tolerating Markdown code fences.
pub fn parse_record(raw: &str) -> Result<Record, StructuringError> {
    let body = strip_code_fence(raw.trim());
    let value: Value = serde_json::from_str(body).map_err(|error| {
        StructuringError::InvalidResponse(format!("reply is not valid JSON: {error}"))
    })?;

    match value {
        Value::Object(record) => Ok(record),
        Value::Array(_) => Err(StructuringError::NotAnObject("array")),
        Value::String(_) => Err(StructuringError::NotAnObject("string")),
        Value::Number(_) => Err(StructuringError::NotAnObject("number")),
        Value::Bool(_) => Err(StructuringError::NotAnObject("boolean")),
        Value::Null => Err(StructuringError::NotAnObject("null")),
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    // A language tag can only sit on an opening fence that has its own line.
    match rest.split_once('\n') {
        Some((tag, body)) if !tag.trim_start().starts_with(['{', '[']) => body.trim(),
        _ => rest.trim(),
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{path}", base_url.trim_end_matches('/'))
}

async fn error_for_status(response: reqwest::Response) -> StructuringError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    StructuringError::GenerationFailed(format!("provider returned {status}: {body}"))
}

struct OllamaStructurer {
    http: Client,
    base_url: String,
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl Structurer for OllamaStructurer {
    async fn structure(&self, text: &str) -> Result<Record, StructuringError> {
        let url = endpoint(&self.base_url, "api/generate");
        let payload = json!({
            "model": self.model,
            "system": self.prompt,
            "prompt": text,
            "stream": false,
            "format": "json",
            "options": { "temperature": 0.0 }
        });

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                StructuringError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StructuringError::ProviderUnavailable(format!(
                "Ollama endpoint {url} returned 404"
            )));
        }
        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            StructuringError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;
        if !body.done {
            return Err(StructuringError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        parse_record(&body.response)
    }
}

struct OpenAiStructurer {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Structurer for OpenAiStructurer {
    async fn structure(&self, text: &str) -> Result<Record, StructuringError> {
        let payload = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": self.prompt },
                { "role": "user", "content": text }
            ]
        });

        let response = self
            .http
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                StructuringError::ProviderUnavailable(format!(
                    "failed to reach {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            return Err(error_for_status(response).await);
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|error| {
            StructuringError::InvalidResponse(format!(
                "failed to decode chat completion response: {error}"
            ))
        })?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                StructuringError::InvalidResponse("chat completion contained no content".into())
            })?;

        parse_record(&content)
    }
}
