//! Backend trait and the Gemini implementation.
//!
//! The [`Backend`] trait abstracts over model vendors, translating between
//! the normalized [`LlmRequest`]/[`LlmResponse`] pair and the vendor's HTTP
//! API. The gateway owns prompting, retries, and output typing; backends
//! only move bytes.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::task::TaskKind;
use crate::error::Result;
use crate::PipelineError;

/// A normalized model request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Which catalogue entry this call belongs to (for logging/routing).
    pub task: TaskKind,
    /// Optional system instructions.
    pub system_prompt: Option<String>,
    /// The user prompt text.
    pub prompt: String,
    /// Sampling temperature, 0.0-1.0.
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Per-call timeout.
    pub timeout: Duration,
}

/// A normalized model response.
#[derive(Debug)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,
    /// HTTP status code (for diagnostics/logging).
    pub status: u16,
    /// Provider-specific metadata (token counts, timing, model info).
    pub metadata: Option<Value>,
}

/// Abstraction over model vendors.
///
/// Object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a non-streaming model call.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Backend for the Gemini `generateContent` API.
///
/// Requests JSON output via `responseMimeType` so the gateway's fence
/// stripping is a fallback rather than the common path.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    api_key: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "gemini-2.5-flash".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_body(request: &LlmRequest) -> Value {
        let mut contents = Vec::new();
        if let Some(ref system) = request.system_prompt {
            contents.push(json!({
                "role": "user",
                "parts": [{"text": system}],
            }));
        }
        contents.push(json!({
            "role": "user",
            "parts": [{"text": request.prompt}],
        }));

        json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
                "responseMimeType": "application/json",
            },
        })
    }

    fn extract_text(body: &Value) -> Option<String> {
        let parts = body
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .as_array()?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        );

        let resp = client
            .post(&url)
            .timeout(request.timeout)
            .json(&Self::build_body(request))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = resp.json().await?;
        let text = Self::extract_text(&body).ok_or_else(|| {
            PipelineError::MalformedOutput("response contained no candidate text".into())
        })?;

        Ok(LlmResponse {
            text,
            status: status.as_u16(),
            metadata: body.get("usageMetadata").cloned(),
        })
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        LlmRequest {
            task: TaskKind::InterviewSimulation,
            system_prompt: None,
            prompt: "hello".into(),
            temperature: 0.7,
            max_tokens: 2048,
            timeout: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_build_body_shape() {
        let body = GeminiBackend::build_body(&request());
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert_eq!(body["generationConfig"]["temperature"], 0.7);
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn test_build_body_with_system_prompt() {
        let mut req = request();
        req.system_prompt = Some("You are a researcher".into());
        let body = GeminiBackend::build_body(&req);
        assert_eq!(body["contents"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_extract_text_concatenates_parts() {
        let body = json!({
            "candidates": [{
                "content": {"parts": [{"text": "{\"a\":"}, {"text": " 1}"}]}
            }]
        });
        assert_eq!(GeminiBackend::extract_text(&body).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_text_missing_candidates() {
        assert!(GeminiBackend::extract_text(&json!({})).is_none());
    }
}
