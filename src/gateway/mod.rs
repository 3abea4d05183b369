//! Typed model-call gateway.
//!
//! [`LlmGateway`] is the single abstraction the pipeline uses to talk to the
//! model vendor. Each call names a [`TaskKind`] from the closed catalogue and
//! a target output type; the gateway renders the HTTP call through a
//! [`Backend`], coerces the response into JSON (stripping markdown fences if
//! needed), validates it against the declared schema, and retries transient
//! failures with exponential backoff. The final retry runs at temperature
//! 0.0 to maximise structural compliance.
//!
//! ```text
//! caller ──► LlmGateway::invoke::<T>(kind, prompt, opts)
//!                 │ render LlmRequest
//!                 ▼
//!             Backend::complete()  ──► vendor HTTP API
//!                 │ text
//!                 ▼
//!             parsing::parse_typed::<T>() ──► T or retry
//! ```

pub mod backend;
pub mod backoff;
pub mod mock;
pub mod task;

pub use backend::{Backend, GeminiBackend, LlmRequest, LlmResponse};
pub use backoff::BackoffConfig;
pub use mock::MockBackend;
pub use task::TaskKind;

use reqwest::Client;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::parsing;
use crate::PipelineError;

/// Shared cancellation flag checked at every suspension point.
pub type CancelFlag = Arc<AtomicBool>;

/// Per-call options.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Sampling temperature, 0.0-1.0.
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Per-call timeout. Default: 300 seconds.
    pub timeout: Duration,
    /// Retries after the initial attempt. Default: 2.
    pub max_retries: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 8192,
            timeout: Duration::from_secs(300),
            max_retries: 2,
        }
    }
}

impl CallOptions {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

struct GatewayInner {
    backend: Arc<dyn Backend>,
    client: Client,
    base_url: String,
    backoff: BackoffConfig,
}

/// Single typed-call abstraction over the model vendor.
///
/// Cheap to clone; clones share the backend and HTTP client. Use
/// [`with_cancellation`](LlmGateway::with_cancellation) to derive a handle
/// scoped to one pipeline run.
#[derive(Clone)]
pub struct LlmGateway {
    inner: Arc<GatewayInner>,
    cancellation: Option<CancelFlag>,
}

impl LlmGateway {
    pub fn new(backend: Arc<dyn Backend>, base_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                backend,
                client: Client::new(),
                base_url: base_url.into(),
                backoff: BackoffConfig::default(),
            }),
            cancellation: None,
        }
    }

    /// Override the backoff configuration (mainly for tests).
    pub fn with_backoff(self, backoff: BackoffConfig) -> Self {
        let inner = GatewayInner {
            backend: self.inner.backend.clone(),
            client: self.inner.client.clone(),
            base_url: self.inner.base_url.clone(),
            backoff,
        };
        Self {
            inner: Arc::new(inner),
            cancellation: self.cancellation,
        }
    }

    /// Derive a handle that honours the given cancellation flag.
    pub fn with_cancellation(&self, cancel: CancelFlag) -> Self {
        Self {
            inner: self.inner.clone(),
            cancellation: Some(cancel),
        }
    }

    /// Backend name, for logging.
    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Return an error if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Invoke the model and parse the response into `T`.
    ///
    /// Transport errors, retryable upstream statuses, and malformed output
    /// are retried up to `opts.max_retries` times with exponential backoff.
    /// After a malformed response, and always on the final attempt, the
    /// temperature is forced to 0.0.
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        kind: TaskKind,
        prompt: &str,
        opts: &CallOptions,
    ) -> Result<T> {
        self.invoke_with_system::<T>(kind, None, prompt, opts).await
    }

    /// Like [`invoke`](Self::invoke) with an explicit system prompt.
    pub async fn invoke_with_system<T: DeserializeOwned>(
        &self,
        kind: TaskKind,
        system_prompt: Option<&str>,
        prompt: &str,
        opts: &CallOptions,
    ) -> Result<T> {
        self.check_cancelled()?;

        let mut force_zero_temperature = false;
        let mut last_error: Option<PipelineError> = None;

        for attempt in 0..=opts.max_retries {
            if attempt > 0 {
                let delay = self.inner.backoff.delay_for_attempt(attempt - 1);
                tracing::warn!(
                    task = %kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
                    "retrying model call"
                );
                tokio::time::sleep(delay).await;
                self.check_cancelled()?;
            }

            // the last retry always runs cold; a lone attempt keeps the
            // caller's temperature
            let is_final_retry = opts.max_retries > 0 && attempt == opts.max_retries;
            let temperature = if force_zero_temperature || is_final_retry {
                0.0
            } else {
                opts.temperature
            };

            let request = LlmRequest {
                task: kind,
                system_prompt: system_prompt.map(|s| s.to_string()),
                prompt: prompt.to_string(),
                temperature,
                max_tokens: opts.max_tokens,
                timeout: opts.timeout,
            };

            let outcome = self
                .inner
                .backend
                .complete(&self.inner.client, &self.inner.base_url, &request)
                .await
                .and_then(|response| parsing::parse_typed::<T>(&response.text));

            match outcome {
                Ok(value) => return Ok(value),
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(err) if attempt < opts.max_retries && err.is_retryable() => {
                    if err.is_malformed() {
                        force_zero_temperature = true;
                    }
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error
            .unwrap_or_else(|| PipelineError::Internal("retry loop exited unexpectedly".into())))
    }
}

impl std::fmt::Debug for LlmGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGateway")
            .field("backend", &self.inner.backend.name())
            .field("base_url", &self.inner.base_url)
            .field("has_cancellation", &self.cancellation.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Reply {
        answer: String,
    }

    fn gateway(mock: MockBackend) -> LlmGateway {
        LlmGateway::new(Arc::new(mock), "http://unused").with_backoff(BackoffConfig {
            initial_delay: Duration::from_millis(1),
            jitter_max: Duration::ZERO,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_invoke_parses_typed_output() {
        let gw = gateway(MockBackend::fixed(r#"{"answer": "42"}"#));
        let reply: Reply = gw
            .invoke(TaskKind::SingleResponse, "q", &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.answer, "42");
    }

    #[tokio::test]
    async fn test_invoke_strips_fences() {
        let gw = gateway(MockBackend::fixed("```json\n{\"answer\": \"ok\"}\n```"));
        let reply: Reply = gw
            .invoke(TaskKind::SingleResponse, "q", &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.answer, "ok");
    }

    #[tokio::test]
    async fn test_invoke_retries_malformed_then_succeeds() {
        let mock = MockBackend::new()
            .on_task(TaskKind::SingleResponse, "not json at all")
            .on_task(TaskKind::SingleResponse, r#"{"answer": "second try"}"#);
        let gw = gateway(mock);
        let reply: Reply = gw
            .invoke(TaskKind::SingleResponse, "q", &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(reply.answer, "second try");
    }

    #[tokio::test]
    async fn test_invoke_exhausts_retries() {
        let gw = gateway(MockBackend::fixed("still not json"));
        let err = gw
            .invoke::<Reply>(
                TaskKind::SingleResponse,
                "q",
                &CallOptions::default().with_max_retries(1),
            )
            .await
            .unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_invoke_does_not_retry_with_zero_budget() {
        let mock = MockBackend::new()
            .on_task(TaskKind::SingleResponse, "garbage")
            .on_task(TaskKind::SingleResponse, r#"{"answer": "never seen"}"#);
        let gw = gateway(mock);
        let err = gw
            .invoke::<Reply>(
                TaskKind::SingleResponse,
                "q",
                &CallOptions::default().with_max_retries(0),
            )
            .await
            .unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_invoke_surfaces_cancellation() {
        let cancel: CancelFlag = Arc::new(AtomicBool::new(true));
        let gw = gateway(MockBackend::fixed(r#"{"answer": "x"}"#)).with_cancellation(cancel);
        let err = gw
            .invoke::<Reply>(TaskKind::SingleResponse, "q", &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test]
    async fn test_upstream_error_not_retried_when_fatal() {
        let mock = MockBackend::new().failing_task(TaskKind::SingleResponse, 401);
        let gw = gateway(mock);
        let err = gw
            .invoke::<Reply>(TaskKind::SingleResponse, "q", &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Upstream { status: 401, .. }));
    }
}
