//! Inference provider port and the HTTP implementation.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;

use arbiter_core::config::InferenceConfig;

#[derive(Clone, Debug, PartialEq)]
pub struct PromptSpec {
    pub system: Option<String>,
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("provider rate limit hit (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("provider failure: {0}")]
    Provider(String),
}

impl InferenceError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Provider(_) => "provider",
        }
    }
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn complete(&self, spec: &PromptSpec) -> Result<String, InferenceError>;
}

/// OpenAI-compatible `chat/completions` client.
pub struct HttpInferenceProvider {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpInferenceProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<SecretString>,
    ) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .user_agent(concat!("arbiter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|error| InferenceError::Provider(format!("http client setup failed: {error}")))?;
        Ok(Self { client, base_url: base_url.into(), api_key })
    }

    pub fn from_config(config: &InferenceConfig) -> Result<Self, InferenceError> {
        Self::new(config.base_url.clone(), config.api_key.clone())
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl InferenceProvider for HttpInferenceProvider {
    async fn complete(&self, spec: &PromptSpec) -> Result<String, InferenceError> {
        let mut builder = self.client.post(self.endpoint()).json(&request_body(spec));
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key.expose_secret());
        }

        let response = builder
            .send()
            .await
            .map_err(|error| InferenceError::Provider(format!("transport error: {error}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            return Err(InferenceError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Provider(format!(
                "HTTP {}: {}",
                status.as_u16(),
                truncate(&body, 200)
            )));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| InferenceError::Provider(format!("invalid response body: {error}")))?;

        completion_text(&payload)
            .ok_or_else(|| InferenceError::Provider("response carried no completion text".into()))
    }
}

fn request_body(spec: &PromptSpec) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = &spec.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": spec.prompt }));

    json!({
        "model": spec.model,
        "messages": messages,
        "max_tokens": spec.max_tokens,
        "temperature": spec.temperature,
    })
}

fn completion_text(payload: &Value) -> Option<String> {
    payload
        .pointer("/choices/0/message/content")
        .or_else(|| payload.pointer("/choices/0/text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Only the delta-seconds form is understood; HTTP dates yield `None`.
fn parse_retry_after(raw: &str) -> Option<u64> {
    let trimmed = raw.trim();
    trimmed
        .parse::<u64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().filter(|secs| *secs >= 0.0).map(|secs| secs.ceil() as u64))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
