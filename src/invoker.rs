// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The boundary between the pipeline engine and an AI service.
//!
//! The engine only ever sees [`AiInvoker`]: a prompt goes in, a
//! success/response/error triple comes out. [`HttpInvoker`] is the concrete
//! implementation used by the CLI and talks to any OpenAI-compatible
//! `/chat/completions` endpoint (OpenAI, Ollama, vLLM, LM Studio, ...).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::InvokerSettings;
use crate::error::ProviderError;

/// Per-call options passed to an invoker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvokeOptions {
    /// Model override; `None` means the invoker's default model
    pub model: Option<String>,

    /// Deadline the engine is enforcing for this call
    pub timeout_ms: Option<u64>,
}

impl InvokeOptions {
    pub fn new(model: Option<String>, timeout_ms: Option<u64>) -> Self {
        Self { model, timeout_ms }
    }
}

/// Outcome of a single AI call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeResult {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InvokeResult {
    /// A successful call with response text.
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: Some(response.into()),
            error: None,
        }
    }

    /// A failed call.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.into()),
        }
    }

    /// Error message, with a generic fallback when the invoker gave none.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "AI invocation failed".to_string())
    }
}

/// An opaque async AI function.
///
/// Implementations report failures through [`InvokeResult::failure`] rather
/// than panicking; the engine wraps every call with its own timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiInvoker: Send + Sync {
    async fn invoke(&self, prompt: &str, options: InvokeOptions) -> InvokeResult;
}

// ============================================================================
// HTTP Invoker
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Invoker for OpenAI-compatible chat completion endpoints.
pub struct HttpInvoker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: Option<u32>,
}

impl HttpInvoker {
    /// Create an invoker for a base URL and default model.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_tokens: None,
        })
    }

    /// Create an invoker from resolved settings.
    ///
    /// The API key is read from the environment variable named by the
    /// settings, if any. A missing variable is an error because the endpoint
    /// was explicitly configured to need one.
    pub fn from_settings(settings: &InvokerSettings) -> Result<Self, ProviderError> {
        let api_key = match &settings.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                ProviderError::NotConfigured(format!("Environment variable {} is not set", var))
            })?),
            None => None,
        };

        let mut invoker = Self::new(&settings.base_url, &settings.model, api_key)?;
        invoker.max_tokens = settings.max_tokens;
        Ok(invoker)
    }

    /// Default model used when a call does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn send(&self, prompt: &str, options: &InvokeOptions) -> Result<String, ProviderError> {
        let model = options.model.clone().unwrap_or_else(|| self.model.clone());
        let request = ChatRequest {
            model: model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: Some(prompt.to_string()),
            }],
            max_tokens: self.max_tokens,
            stream: false,
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("content-type", "application/json");

        if let Some(ref api_key) = self.api_key {
            req = req.header("authorization", format!("Bearer {}", api_key));
        }
        if let Some(ms) = options.timeout_ms {
            req = req.timeout(Duration::from_millis(ms));
        }

        tracing::debug!(model = %model, prompt_len = prompt.len(), "Sending chat request");

        let response = req.json(&request).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(options.timeout_ms.unwrap_or_default())
            } else {
                ProviderError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::handle_error_response(status.as_u16(), &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::ParseError("Response contained no message content".to_string()))
    }

    fn handle_error_response(status_code: u16, body: &str) -> ProviderError {
        match serde_json::from_str::<ApiError>(body) {
            Ok(error) => match error.error.error_type.as_deref() {
                Some("authentication_error") | Some("invalid_api_key") => {
                    ProviderError::AuthError(error.error.message)
                }
                Some("rate_limit_error") | Some("rate_limit_exceeded") => {
                    ProviderError::RateLimited(error.error.message)
                }
                _ => ProviderError::api(error.error.message, status_code),
            },
            Err(_) => ProviderError::api(body.to_string(), status_code),
        }
    }
}

#[async_trait]
impl AiInvoker for HttpInvoker {
    async fn invoke(&self, prompt: &str, options: InvokeOptions) -> InvokeResult {
        let start = Instant::now();
        let result = self.send(prompt, &options).await;
        let elapsed = start.elapsed().as_millis();

        match result {
            Ok(text) => {
                tracing::debug!(elapsed_ms = %elapsed, "Chat request completed");
                InvokeResult::ok(text)
            }
            Err(e) => {
                tracing::warn!(elapsed_ms = %elapsed, "Chat request failed: {}", e);
                InvokeResult::failure(e.to_string())
            }
        }
    }
}
