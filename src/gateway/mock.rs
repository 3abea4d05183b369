//! Mock backend for testing without a live model vendor.
//!
//! [`MockBackend`] serves canned responses, optionally routed per task kind,
//! with failure injection, artificial latency, and in-flight instrumentation
//! so concurrency bounds can be asserted in tests.

use async_trait::async_trait;
use reqwest::Client;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::backend::{Backend, LlmRequest, LlmResponse};
use super::task::TaskKind;
use crate::error::Result;
use crate::PipelineError;

/// A test backend that returns canned responses.
///
/// Responses registered for a specific [`TaskKind`] are consumed in order;
/// when a task's queue holds one remaining response it is repeated
/// indefinitely. Tasks with no registered responses fall back to the
/// round-robin default sequence.
#[derive(Default)]
pub struct MockBackend {
    by_task: Mutex<HashMap<TaskKind, VecDeque<String>>>,
    fallback: Mutex<VecDeque<String>>,
    failing_tasks: Mutex<HashMap<TaskKind, u16>>,
    latency: Option<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        let mock = Self::new();
        mock.fallback.lock().unwrap().push_back(response.into());
        mock
    }

    /// Queue a response for a specific task kind.
    pub fn on_task(self, kind: TaskKind, response: impl Into<String>) -> Self {
        self.by_task
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(response.into());
        self
    }

    /// Append to the round-robin default sequence.
    pub fn with_fallback(self, response: impl Into<String>) -> Self {
        self.fallback.lock().unwrap().push_back(response.into());
        self
    }

    /// Make every call for `kind` fail with the given upstream status.
    pub fn failing_task(self, kind: TaskKind, status: u16) -> Self {
        self.failing_tasks.lock().unwrap().insert(kind, status);
        self
    }

    /// Sleep this long inside every call, so the semaphore bound is
    /// observable.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Highest number of calls that were simultaneously in flight.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Total number of calls served (including failures).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn next_response(&self, kind: TaskKind) -> Result<String> {
        if let Some(queue) = self.by_task.lock().unwrap().get_mut(&kind) {
            if queue.len() > 1 {
                if let Some(front) = queue.pop_front() {
                    return Ok(front);
                }
            }
            if let Some(front) = queue.front() {
                return Ok(front.clone());
            }
        }

        let mut fallback = self.fallback.lock().unwrap();
        if let Some(front) = fallback.pop_front() {
            fallback.push_back(front.clone());
            return Ok(front);
        }

        Err(PipelineError::Internal(format!(
            "mock backend has no response registered for task '{}'",
            kind
        )))
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let result = {
            let failing = self.failing_tasks.lock().unwrap().get(&request.task).copied();
            match failing {
                Some(status) => Err(PipelineError::Upstream {
                    status,
                    body: format!("mock failure for task '{}'", request.task),
                }),
                None => self.next_response(request.task).map(|text| LlmResponse {
                    text,
                    status: 200,
                    metadata: None,
                }),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: TaskKind) -> LlmRequest {
        LlmRequest {
            task: kind,
            system_prompt: None,
            prompt: "test".into(),
            temperature: 0.7,
            max_tokens: 2048,
            timeout: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn test_fixed_response() {
        let mock = MockBackend::fixed("hello");
        let client = Client::new();
        let resp = mock
            .complete(&client, "http://unused", &request(TaskKind::SingleResponse))
            .await
            .unwrap();
        assert_eq!(resp.text, "hello");
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn test_per_task_routing_consumes_in_order() {
        let mock = MockBackend::new()
            .on_task(TaskKind::InterviewSimulation, "first")
            .on_task(TaskKind::InterviewSimulation, "second");
        let client = Client::new();
        let req = request(TaskKind::InterviewSimulation);

        let r1 = mock.complete(&client, "", &req).await.unwrap();
        let r2 = mock.complete(&client, "", &req).await.unwrap();
        let r3 = mock.complete(&client, "", &req).await.unwrap();
        assert_eq!(r1.text, "first");
        assert_eq!(r2.text, "second");
        // last response repeats once the queue is drained
        assert_eq!(r3.text, "second");
    }

    #[tokio::test]
    async fn test_failing_task() {
        let mock = MockBackend::fixed("ok").failing_task(TaskKind::ThemeExtraction, 503);
        let client = Client::new();
        let err = mock
            .complete(&client, "", &request(TaskKind::ThemeExtraction))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Upstream { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_unregistered_task_errors() {
        let mock = MockBackend::new();
        let client = Client::new();
        let err = mock
            .complete(&client, "", &request(TaskKind::PersonaBatch))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
    }
}
