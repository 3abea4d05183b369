//! Stage 2: bounded-concurrency interview fanout.
//!
//! Personas are generated per stakeholder, then every persona gets exactly
//! one interview task. Tasks are created eagerly, but a counting semaphore
//! caps how many can be suspended on model I/O at once. Results arrive in
//! completion order; callers that need persona order must reconcile by
//! `person_id`.
//!
//! A failed interview (after all retries) does not fail the stage: it is
//! logged, counted, and excluded from the output. The stage fails only when
//! zero interviews complete.

pub mod persona;

pub use persona::PersonaGenerator;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::cache::InterviewCache;
use crate::config::SimulationConfig;
use crate::error::Result;
use crate::gateway::{CallOptions, LlmGateway, TaskKind};
use crate::types::{
    BusinessBrief, Interview, InterviewResponse, Persona, Stakeholder, StakeholderBuckets,
};
use crate::PipelineError;

/// Advisory progress callback: `(message, completed, total, failed)`.
///
/// Invocations may interleave arbitrarily across tasks; callers must
/// tolerate out-of-order updates.
pub type ProgressCallback = Arc<dyn Fn(&str, usize, usize, usize) + Send + Sync>;

/// Attempts per interview, including the initial call.
const INTERVIEW_ATTEMPTS: u32 = 3;

/// Base delay for the per-interview retry backoff.
const RETRY_BASE_DELAY_SECS: f64 = 1.0;

#[derive(Debug, Deserialize)]
struct RawInterview {
    #[serde(default)]
    responses: Vec<InterviewResponse>,
    #[serde(default)]
    overall_sentiment: String,
    #[serde(default)]
    key_themes: Vec<String>,
}

/// Stage 2 worker: persona generation plus interview execution.
pub struct InterviewFanout {
    gateway: LlmGateway,
    cache: Arc<InterviewCache>,
}

impl InterviewFanout {
    pub fn new(gateway: LlmGateway, cache: Arc<InterviewCache>) -> Self {
        Self { gateway, cache }
    }

    /// Generate personas and run one interview per persona.
    ///
    /// The output interview list is ordered by task completion, not by
    /// persona generation order.
    pub async fn run(
        &self,
        stakeholders: &StakeholderBuckets,
        brief: &BusinessBrief,
        config: &SimulationConfig,
        progress: Option<ProgressCallback>,
    ) -> Result<(Vec<Persona>, Vec<Interview>)> {
        let mut generator = PersonaGenerator::new(self.gateway.clone());
        let personas = generator.generate_all(stakeholders, brief, config).await?;
        tracing::info!(count = personas.len(), "personas ready for interviews");

        let lookup: HashMap<&str, &Stakeholder> = stakeholders
            .all()
            .map(|s| (s.name.as_str(), s))
            .collect();

        let mut pairs: Vec<(Persona, Stakeholder)> = Vec::new();
        for persona in &personas {
            match lookup.get(persona.stakeholder_type.as_str()) {
                Some(stakeholder) => pairs.push((persona.clone(), (*stakeholder).clone())),
                None => tracing::warn!(
                    persona = %persona.name,
                    stakeholder_type = %persona.stakeholder_type,
                    "no stakeholder found for persona"
                ),
            }
        }

        if pairs.is_empty() {
            return Err(PipelineError::StageFailed {
                stage: "interview_fanout".into(),
                message: "no valid personas to interview".into(),
            });
        }

        let semaphore = Arc::new(Semaphore::new(config.concurrency_bound()));
        let total = pairs.len();
        let mut tasks = FuturesUnordered::new();
        for (persona, stakeholder) in pairs {
            // Stop scheduling new tasks once cancellation is requested.
            self.gateway.check_cancelled()?;
            let semaphore = semaphore.clone();
            tasks.push(async move {
                let name = persona.name.clone();
                let result = self
                    .interview_one(persona, stakeholder, brief, config, semaphore)
                    .await;
                (name, result)
            });
        }

        let mut interviews = Vec::new();
        let mut failed = 0usize;
        while let Some((name, result)) = tasks.next().await {
            match result {
                Ok(interview) => {
                    interviews.push(interview);
                    if let Some(ref callback) = progress {
                        callback(
                            &format!("Completed interview with {}", name),
                            interviews.len(),
                            total,
                            failed,
                        );
                    }
                }
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(err) => {
                    failed += 1;
                    tracing::error!(persona = %name, error = %err, "interview failed");
                    if let Some(ref callback) = progress {
                        callback(&format!("Failed: {}", name), interviews.len(), total, failed);
                    }
                }
            }
        }

        tracing::info!(
            successful = interviews.len(),
            failed,
            "interview fanout finished"
        );

        if interviews.is_empty() {
            return Err(PipelineError::StageFailed {
                stage: "interview_fanout".into(),
                message: format!("all {} interviews failed", total),
            });
        }

        Ok((personas, interviews))
    }

    /// Run one interview under the concurrency bound.
    ///
    /// Protocol: acquire semaphore, consult the cache, on miss call the
    /// model with up to [`INTERVIEW_ATTEMPTS`] attempts (exponential backoff
    /// plus jitter in [0,1); temperature forced to 0.0 after malformed
    /// output), stamp identity and derived duration, store in the cache.
    async fn interview_one(
        &self,
        persona: Persona,
        stakeholder: Stakeholder,
        brief: &BusinessBrief,
        config: &SimulationConfig,
        semaphore: Arc<Semaphore>,
    ) -> Result<Interview> {
        let _permit = semaphore
            .acquire()
            .await
            .map_err(|_| PipelineError::Internal("interview semaphore closed".into()))?;
        self.gateway.check_cancelled()?;

        let fingerprint = InterviewCache::fingerprint(
            &persona.id,
            &stakeholder.id,
            &brief.business_idea,
            config.temperature,
            config.response_style.as_str(),
        );
        if let Some(hit) = self.cache.get(&fingerprint) {
            tracing::info!(persona = %persona.name, "using cached interview");
            return Ok(hit);
        }

        let prompt = build_interview_prompt(&persona, &stakeholder, brief, config);
        let mut force_zero_temperature = false;
        let mut last_error: Option<PipelineError> = None;

        for attempt in 0..INTERVIEW_ATTEMPTS {
            if attempt > 0 {
                let delay = RETRY_BASE_DELAY_SECS * 2f64.powi(attempt as i32 - 1) + fastrand::f64();
                tracing::warn!(
                    persona = %persona.name,
                    attempt = attempt + 1,
                    delay_secs = delay,
                    "retrying interview"
                );
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                self.gateway.check_cancelled()?;
            }

            let temperature = if force_zero_temperature {
                0.0
            } else {
                config.temperature
            };
            let opts = CallOptions::default()
                .with_temperature(temperature)
                .with_max_retries(0);

            match self
                .gateway
                .invoke::<RawInterview>(TaskKind::InterviewSimulation, &prompt, &opts)
                .await
            {
                Ok(raw) => {
                    let interview = Interview {
                        person_id: persona.id.clone(),
                        stakeholder_type: persona.stakeholder_type.clone(),
                        duration_minutes: derive_duration(&raw.responses),
                        responses: raw.responses,
                        overall_sentiment: raw.overall_sentiment,
                        key_themes: raw.key_themes,
                    };
                    self.cache.insert(fingerprint, interview.clone());
                    tracing::info!(
                        persona = %persona.name,
                        responses = interview.responses.len(),
                        "interview completed"
                    );
                    return Ok(interview);
                }
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(err) => {
                    if err.is_malformed() {
                        force_zero_temperature = true;
                    }
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PipelineError::Internal("interview retry loop exhausted".into())))
    }
}

/// Derive a plausible interview duration from the response transcript.
///
/// Two minutes per question plus a per-response length bucket, plus a
/// uniform variation in [-5, 10], floored at 10 minutes.
fn derive_duration(responses: &[InterviewResponse]) -> u32 {
    let mut minutes = responses.len() as i64 * 2;
    for response in responses {
        let words = response.response.split_whitespace().count();
        minutes += if words > 100 {
            3
        } else if words > 50 {
            2
        } else {
            1
        };
    }
    minutes += fastrand::i64(-5..=10);
    minutes.max(10) as u32
}

fn build_interview_prompt(
    persona: &Persona,
    stakeholder: &Stakeholder,
    brief: &BusinessBrief,
    config: &SimulationConfig,
) -> String {
    let questions: Vec<String> = stakeholder
        .questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}", i + 1, q))
        .collect();

    format!(
        r#"Simulate a customer research interview with the following persona:

PERSONA DETAILS:
- Name: {name}
- Age: {age}
- Background: {background}
- Motivations: {motivations}
- Pain Points: {pain_points}
- Communication Style: {style}
- Demographics: {demographics}

BUSINESS CONTEXT:
- Business Idea: {idea}
- Target Customer: {customer}
- Problem: {problem}

INTERVIEW QUESTIONS:
{questions}

SIMULATION STYLE: {response_style}

Instructions:
1. Answer each question as {name} would, staying completely in character
2. Use their communication style and background to inform responses
3. Include natural human elements like personal examples, hesitations, and tangents
4. Show genuine emotions and reactions based on their motivations and pain points
5. Include specific, concrete details that make responses feel authentic

For each response also identify the sentiment (positive, negative, neutral, mixed), key insights, and any natural follow-up questions.

Return JSON: {{"responses": [{{"question": "...", "response": "...", "sentiment": "...", "key_insights": ["..."], "follow_up_questions": ["..."]}}], "overall_sentiment": "...", "key_themes": ["..."]}}"#,
        name = persona.name,
        age = persona.age,
        background = persona.background,
        motivations = persona.motivations.join(", "),
        pain_points = persona.pain_points.join(", "),
        style = persona.communication_style,
        demographics = persona.demographic_details,
        idea = brief.business_idea,
        customer = brief.target_customer,
        problem = brief.problem,
        questions = questions.join("\n"),
        response_style = config.response_style.as_str(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{BackoffConfig, MockBackend};
    use std::sync::Mutex;

    fn brief() -> BusinessBrief {
        BusinessBrief {
            business_idea: "AI research automation".into(),
            target_customer: "EU SaaS PMs".into(),
            problem: "manual research is slow".into(),
            industry: None,
            location: None,
        }
    }

    fn buckets() -> StakeholderBuckets {
        StakeholderBuckets {
            primary: vec![Stakeholder {
                id: "primary_0".into(),
                name: "Founding PM".into(),
                description: "Owns discovery".into(),
                questions: vec!["How do you research today?".into()],
            }],
            secondary: vec![Stakeholder {
                id: "secondary_0".into(),
                name: "IT Lead".into(),
                description: "Gatekeeper".into(),
                questions: vec!["What tools do you approve?".into()],
            }],
        }
    }

    const PERSONA_BATCH: &str = r#"[
        {"name": "Sarah Chen, Senior PM", "age": 34, "background": "SaaS",
         "motivations": ["speed"], "pain_points": ["manual work"],
         "communication_style": "direct", "demographic_details": "Berlin"},
        {"name": "Tom Weber, Product Lead", "age": 41, "background": "B2B",
         "motivations": ["evidence"], "pain_points": ["stale data"],
         "communication_style": "analytical", "demographic_details": "Munich"}
    ]"#;

    const INTERVIEW: &str = r#"{
        "responses": [
            {"question": "How do you research today?",
             "response": "Honestly, it's mostly spreadsheets and gut feel. We tried a few tools but nothing stuck.",
             "sentiment": "negative", "key_insights": ["manual workflow dominates"]}
        ],
        "overall_sentiment": "mixed",
        "key_themes": ["tooling gaps"]
    }"#;

    fn fanout(mock: MockBackend) -> (InterviewFanout, Arc<InterviewCache>) {
        let cache = Arc::new(InterviewCache::new());
        let gateway = LlmGateway::new(Arc::new(mock), "http://unused").with_backoff(
            BackoffConfig {
                initial_delay: Duration::from_millis(1),
                jitter_max: Duration::ZERO,
                ..Default::default()
            },
        );
        (InterviewFanout::new(gateway, cache.clone()), cache)
    }

    fn config(people: u32, max_concurrent: usize) -> SimulationConfig {
        SimulationConfig {
            people_per_stakeholder: people,
            max_concurrent,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_one_interview_per_persona() {
        let mock = MockBackend::new()
            .on_task(TaskKind::PersonaBatch, PERSONA_BATCH)
            .on_task(TaskKind::InterviewSimulation, INTERVIEW);
        let (fanout, _cache) = fanout(mock);

        let (personas, interviews) = fanout
            .run(&buckets(), &brief(), &config(2, 12), None)
            .await
            .unwrap();

        // 2 stakeholders x 2 people each
        assert_eq!(personas.len(), 4);
        assert_eq!(interviews.len(), 4);

        // every interview references a known persona, with the parent
        // stakeholder's name attached
        for interview in &interviews {
            let persona = personas
                .iter()
                .find(|p| p.id == interview.person_id)
                .expect("interview references unknown persona");
            assert_eq!(interview.stakeholder_type, persona.stakeholder_type);
            assert!(interview.duration_minutes >= 10);
        }
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let mock = MockBackend::new()
            .on_task(TaskKind::PersonaBatch, PERSONA_BATCH)
            .on_task(TaskKind::InterviewSimulation, INTERVIEW)
            .with_latency(Duration::from_millis(25));
        let cache = Arc::new(InterviewCache::new());
        let mock = Arc::new(mock);
        let gateway = LlmGateway::new(mock.clone(), "http://unused");
        let fanout = InterviewFanout::new(gateway, cache);

        fanout
            .run(&buckets(), &brief(), &config(2, 2), None)
            .await
            .unwrap();

        // persona batches run sequentially, so the peak comes from the
        // interview fanout
        assert!(
            mock.peak_in_flight() <= 2,
            "peak in-flight {} exceeded bound",
            mock.peak_in_flight()
        );
    }

    #[tokio::test]
    async fn test_results_are_cached() {
        let mock = MockBackend::new()
            .on_task(TaskKind::PersonaBatch, PERSONA_BATCH)
            .on_task(TaskKind::InterviewSimulation, INTERVIEW);
        let (fanout, cache) = fanout(mock);

        let (_, interviews) = fanout
            .run(&buckets(), &brief(), &config(2, 12), None)
            .await
            .unwrap();
        assert_eq!(cache.len(), interviews.len());
    }

    #[tokio::test]
    async fn test_malformed_interview_retried_then_cached() {
        let mock = MockBackend::new()
            .on_task(TaskKind::PersonaBatch, PERSONA_BATCH)
            .on_task(TaskKind::InterviewSimulation, "definitely not json")
            .on_task(TaskKind::InterviewSimulation, INTERVIEW);
        let (fanout, cache) = fanout(mock);

        let single_bucket = StakeholderBuckets {
            primary: vec![buckets().primary[0].clone()],
            secondary: Vec::new(),
        };
        let (_, interviews) = fanout
            .run(&single_bucket, &brief(), &config(1, 12), None)
            .await
            .unwrap();
        assert_eq!(interviews.len(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_callback_sees_every_terminal_event() {
        let mock = MockBackend::new()
            .on_task(TaskKind::PersonaBatch, PERSONA_BATCH)
            .on_task(TaskKind::InterviewSimulation, INTERVIEW);
        let (fanout, _) = fanout(mock);

        let events: Arc<Mutex<Vec<(usize, usize, usize)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let callback: ProgressCallback = Arc::new(move |_msg, completed, total, failed| {
            sink.lock().unwrap().push((completed, total, failed));
        });

        fanout
            .run(&buckets(), &brief(), &config(2, 12), Some(callback))
            .await
            .unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|(_, total, _)| *total == 4));
        assert_eq!(events.last().unwrap().0, 4);
    }

    #[tokio::test]
    async fn test_zero_personas_fails_stage() {
        let mock = MockBackend::new().on_task(TaskKind::PersonaBatch, "garbage");
        let (fanout, _) = fanout(mock);
        let err = fanout
            .run(&buckets(), &brief(), &config(2, 12), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StageFailed { .. }));
    }

    #[test]
    fn test_derive_duration_floor() {
        // Zero responses: 0 base + variation in [-5, 10] floored at 10.
        for _ in 0..50 {
            assert!(derive_duration(&[]) >= 10);
        }
    }

    #[test]
    fn test_derive_duration_buckets() {
        let short = InterviewResponse {
            question: "q".into(),
            response: "short answer".into(),
            sentiment: "neutral".into(),
            key_insights: Vec::new(),
            follow_up_questions: None,
        };
        let long = InterviewResponse {
            response: "word ".repeat(120),
            ..short.clone()
        };
        // 2 responses: base 4, buckets 1 + 3 = 8, variation >= -5 => >= 10 floor
        for _ in 0..50 {
            let d = derive_duration(&[short.clone(), long.clone()]);
            assert!((10..=18).contains(&d), "duration {} out of range", d);
        }
    }
}
