//! Synthetic interviewee generation, one batch call per stakeholder.
//!
//! Ids are minted locally and `stakeholder_type` carries the stakeholder's
//! human-readable name. Names already used within the same stakeholder key
//! are fed back to the model as "do not reuse"; collisions across different
//! stakeholders are permitted.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::gateway::{CallOptions, LlmGateway, TaskKind};
use crate::types::{BusinessBrief, Persona, Stakeholder, StakeholderBuckets};

#[derive(Debug, Deserialize)]
struct RawPersona {
    name: String,
    #[serde(default)]
    age: u32,
    #[serde(default)]
    background: String,
    #[serde(default)]
    motivations: Vec<String>,
    #[serde(default)]
    pain_points: Vec<String>,
    #[serde(default)]
    communication_style: String,
    #[serde(default)]
    demographic_details: String,
}

/// Persona generator scoped to one simulation run.
pub struct PersonaGenerator {
    gateway: LlmGateway,
    used_names: HashMap<String, BTreeSet<String>>,
}

impl PersonaGenerator {
    pub fn new(gateway: LlmGateway) -> Self {
        Self {
            gateway,
            used_names: HashMap::new(),
        }
    }

    /// Generate personas for every stakeholder across both buckets.
    ///
    /// A stakeholder whose generation fails (after the simplified-prompt
    /// retry) is logged and skipped; the remaining stakeholders still get
    /// their personas.
    pub async fn generate_all(
        &mut self,
        stakeholders: &StakeholderBuckets,
        brief: &BusinessBrief,
        config: &SimulationConfig,
    ) -> Result<Vec<Persona>> {
        self.used_names.clear();
        let mut all = Vec::new();

        for stakeholder in stakeholders.all() {
            self.gateway.check_cancelled()?;
            match self.generate_for(stakeholder, brief, config).await {
                Ok(personas) => {
                    tracing::info!(
                        stakeholder = %stakeholder.name,
                        count = personas.len(),
                        "personas generated"
                    );
                    all.extend(personas);
                }
                Err(err) if matches!(err, crate::PipelineError::Cancelled) => return Err(err),
                Err(err) => {
                    tracing::error!(
                        stakeholder = %stakeholder.name,
                        error = %err,
                        "persona generation failed for stakeholder"
                    );
                }
            }
        }

        Ok(all)
    }

    /// Generate `people_per_stakeholder` personas for one stakeholder.
    ///
    /// On malformed output the call is retried once with a simplified
    /// prompt before the stakeholder is failed.
    pub async fn generate_for(
        &mut self,
        stakeholder: &Stakeholder,
        brief: &BusinessBrief,
        config: &SimulationConfig,
    ) -> Result<Vec<Persona>> {
        // Structured output is fragile at high temperature; batch calls run cold.
        let opts = CallOptions::default()
            .with_temperature(0.0)
            .with_max_retries(0);

        let stakeholder_key = format!("{}_{}", stakeholder.name, stakeholder.description);
        let prompt = self.build_prompt(stakeholder, &stakeholder_key, brief, config);

        let raw: Vec<RawPersona> = match self
            .gateway
            .invoke(TaskKind::PersonaBatch, &prompt, &opts)
            .await
        {
            Ok(raw) => raw,
            Err(err) if err.is_malformed() => {
                tracing::warn!(
                    stakeholder = %stakeholder.name,
                    error = %err,
                    "persona batch malformed, retrying with simplified prompt"
                );
                let simple = simplified_prompt(stakeholder, brief, config);
                self.gateway
                    .invoke(TaskKind::PersonaBatch, &simple, &opts)
                    .await?
            }
            Err(err) => return Err(err),
        };

        if raw.len() != config.people_per_stakeholder as usize {
            tracing::warn!(
                stakeholder = %stakeholder.name,
                expected = config.people_per_stakeholder,
                got = raw.len(),
                "unexpected persona count from model"
            );
        }

        let used = self.used_names.entry(stakeholder_key).or_default();
        let personas = raw
            .into_iter()
            .map(|person| {
                used.insert(person.name.clone());
                Persona {
                    id: Uuid::new_v4().to_string(),
                    name: person.name,
                    age: person.age,
                    background: person.background,
                    motivations: person.motivations,
                    pain_points: person.pain_points,
                    communication_style: person.communication_style,
                    stakeholder_type: stakeholder.name.clone(),
                    demographic_details: person.demographic_details,
                }
            })
            .collect();

        Ok(personas)
    }

    fn build_prompt(
        &self,
        stakeholder: &Stakeholder,
        stakeholder_key: &str,
        brief: &BusinessBrief,
        config: &SimulationConfig,
    ) -> String {
        let used_names_text = match self.used_names.get(stakeholder_key) {
            Some(names) if !names.is_empty() => format!(
                "\n\nIMPORTANT: Do NOT use these names (already used for {}): {}",
                stakeholder.name,
                names.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
            _ => String::new(),
        };

        let question_preview: Vec<&str> = stakeholder
            .questions
            .iter()
            .take(3)
            .map(|q| q.as_str())
            .collect();

        format!(
            r#"Generate {count} realistic individual people for the following context:

BUSINESS CONTEXT:
- Business Idea: {idea}
- Target Customer: {customer}
- Problem Being Solved: {problem}
- Industry: {industry}

STAKEHOLDER TYPE:
- Name: {name}
- Description: {description}
- Questions They'll Be Asked: {questions}{ellipsis}

SIMULATION STYLE: {style}

Create diverse individual people that would realistically be in this stakeholder category. Each person must:
1. Have a realistic name, age, and background
2. Include specific motivations related to this business context
3. Have authentic pain points that connect to the problem being solved
4. Display a distinct communication style
5. Include relevant demographic details (job, location, experience)

Each persona must have a UNIQUE name within this stakeholder category. Format names as "FirstName LastName, Position/Title".

Return a JSON array of objects with keys: name, age, background, motivations, pain_points, communication_style, demographic_details.{used}"#,
            count = config.people_per_stakeholder,
            idea = brief.business_idea,
            customer = brief.target_customer,
            problem = brief.problem,
            industry = brief.industry.as_deref().unwrap_or("general"),
            name = stakeholder.name,
            description = stakeholder.description,
            questions = question_preview.join(", "),
            ellipsis = if stakeholder.questions.len() > 3 { "..." } else { "" },
            style = config.response_style.as_str(),
            used = used_names_text,
        )
    }
}

fn simplified_prompt(
    stakeholder: &Stakeholder,
    brief: &BusinessBrief,
    config: &SimulationConfig,
) -> String {
    format!(
        r#"Generate {} realistic individual people for:
Stakeholder: {}
Business: {}
Target Customer: {}
Problem: {}

Keep responses concise and realistic. Return a JSON array of objects with keys: name, age, background, motivations, pain_points, communication_style, demographic_details."#,
        config.people_per_stakeholder,
        stakeholder.name,
        brief.business_idea,
        brief.target_customer,
        brief.problem,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{BackoffConfig, MockBackend};
    use std::sync::Arc;
    use std::time::Duration;

    fn brief() -> BusinessBrief {
        BusinessBrief {
            business_idea: "AI research automation".into(),
            target_customer: "EU SaaS PMs".into(),
            problem: "manual research is slow".into(),
            industry: None,
            location: None,
        }
    }

    fn stakeholder(name: &str) -> Stakeholder {
        Stakeholder {
            id: "primary_0".into(),
            name: name.into(),
            description: "role".into(),
            questions: vec!["q1".into(), "q2".into()],
        }
    }

    fn generator(mock: MockBackend) -> PersonaGenerator {
        let gateway = LlmGateway::new(Arc::new(mock), "http://unused").with_backoff(
            BackoffConfig {
                initial_delay: Duration::from_millis(1),
                jitter_max: Duration::ZERO,
                ..Default::default()
            },
        );
        PersonaGenerator::new(gateway)
    }

    const BATCH: &str = r#"[
        {"name": "Sarah Chen, Senior PM", "age": 34, "background": "8 years in SaaS",
         "motivations": ["ship faster"], "pain_points": ["slow research"],
         "communication_style": "direct", "demographic_details": "Berlin, tech"},
        {"name": "Tom Weber, Product Lead", "age": 41, "background": "ex-consultant",
         "motivations": ["evidence-based decisions"], "pain_points": ["stale data"],
         "communication_style": "analytical", "demographic_details": "Munich, B2B"}
    ]"#;

    #[tokio::test]
    async fn test_generate_mints_ids_and_stakeholder_name() {
        let mut generator = generator(MockBackend::fixed(BATCH));
        let config = SimulationConfig {
            people_per_stakeholder: 2,
            ..Default::default()
        };
        let personas = generator
            .generate_for(&stakeholder("Founding PM"), &brief(), &config)
            .await
            .unwrap();

        assert_eq!(personas.len(), 2);
        assert_ne!(personas[0].id, personas[1].id);
        assert!(Uuid::parse_str(&personas[0].id).is_ok());
        assert!(personas.iter().all(|p| p.stakeholder_type == "Founding PM"));
    }

    #[tokio::test]
    async fn test_used_names_fed_back_into_prompt() {
        let mut generator = generator(MockBackend::fixed(BATCH));
        let config = SimulationConfig {
            people_per_stakeholder: 2,
            ..Default::default()
        };
        let target = stakeholder("Founding PM");
        generator
            .generate_for(&target, &brief(), &config)
            .await
            .unwrap();

        let key = format!("{}_{}", target.name, target.description);
        let prompt = generator.build_prompt(&target, &key, &brief(), &config);
        assert!(prompt.contains("Do NOT use these names"));
        assert!(prompt.contains("Sarah Chen, Senior PM"));
    }

    #[tokio::test]
    async fn test_malformed_batch_retried_with_simplified_prompt() {
        let mock = MockBackend::new()
            .on_task(TaskKind::PersonaBatch, "not a json array")
            .on_task(TaskKind::PersonaBatch, BATCH);
        let mut generator = generator(mock);
        let config = SimulationConfig {
            people_per_stakeholder: 2,
            ..Default::default()
        };
        let personas = generator
            .generate_for(&stakeholder("Founding PM"), &brief(), &config)
            .await
            .unwrap();
        assert_eq!(personas.len(), 2);
    }

    #[tokio::test]
    async fn test_generate_all_skips_failed_stakeholder() {
        // Both calls (initial + simplified retry) stay malformed, so the
        // stakeholder contributes nothing but the run continues.
        let mock = MockBackend::new().on_task(TaskKind::PersonaBatch, "garbage");
        let mut generator = generator(mock);
        let buckets = StakeholderBuckets {
            primary: vec![stakeholder("Founding PM")],
            secondary: Vec::new(),
        };
        let personas = generator
            .generate_all(&buckets, &brief(), &SimulationConfig::default())
            .await
            .unwrap();
        assert!(personas.is_empty());
    }
}
