//! Stage 1: business brief -> structured stakeholder questionnaire.
//!
//! One model call produces a raw document with per-phase question groups.
//! The builder flattens the phases in fixed order (problem discovery,
//! solution validation, follow-up), drops blank strings, and assigns stable
//! bucket-prefixed ids. Malformed model output is a fatal stage failure; no
//! partial questionnaire is emitted.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;
use crate::gateway::{CallOptions, LlmGateway, TaskKind};
use crate::types::{BusinessBrief, Questionnaire, Stakeholder, StakeholderBuckets};

/// Per-phase question groups as the model emits them.
#[derive(Debug, Default, Deserialize)]
struct RawQuestionPhases {
    #[serde(default, alias = "problemDiscovery")]
    problem_discovery: Vec<String>,
    #[serde(default, alias = "solutionValidation")]
    solution_validation: Vec<String>,
    #[serde(default, alias = "followUp")]
    follow_up: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawStakeholder {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    questions: RawQuestionPhases,
}

#[derive(Debug, Deserialize)]
struct RawQuestionnaire {
    #[serde(default, alias = "primaryStakeholders")]
    primary_stakeholders: Vec<RawStakeholder>,
    #[serde(default, alias = "secondaryStakeholders")]
    secondary_stakeholders: Vec<RawStakeholder>,
    #[serde(default, alias = "timeEstimate")]
    time_estimate: Option<Value>,
}

/// Stage 1 worker.
#[derive(Clone)]
pub struct QuestionnaireBuilder {
    gateway: LlmGateway,
}

impl QuestionnaireBuilder {
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    /// Build a questionnaire from a business brief.
    pub async fn build(&self, brief: &BusinessBrief) -> Result<Questionnaire> {
        brief.validate()?;

        let prompt = build_prompt(brief);
        let opts = CallOptions::default().with_temperature(0.3);
        let raw: RawQuestionnaire = self
            .gateway
            .invoke(TaskKind::QuestionnaireBuild, &prompt, &opts)
            .await?;

        let stakeholders = StakeholderBuckets {
            primary: flatten_bucket(&raw.primary_stakeholders, "primary"),
            secondary: flatten_bucket(&raw.secondary_stakeholders, "secondary"),
        };

        let time_estimate = raw.time_estimate.unwrap_or_else(|| {
            json!({"totalQuestions": stakeholders.total_questions()})
        });

        tracing::info!(
            primary = stakeholders.primary.len(),
            secondary = stakeholders.secondary.len(),
            questions = stakeholders.total_questions(),
            "questionnaire built"
        );

        Ok(Questionnaire {
            stakeholders,
            time_estimate,
        })
    }
}

/// Flatten one bucket, merging phases in fixed order and skipping blanks.
fn flatten_bucket(raw: &[RawStakeholder], bucket: &str) -> Vec<Stakeholder> {
    raw.iter()
        .enumerate()
        .map(|(position, item)| {
            let questions: Vec<String> = item
                .questions
                .problem_discovery
                .iter()
                .chain(item.questions.solution_validation.iter())
                .chain(item.questions.follow_up.iter())
                .filter(|q| !q.trim().is_empty())
                .map(|q| q.trim().to_string())
                .collect();

            Stakeholder {
                id: format!("{}_{}", bucket, item.index.unwrap_or(position)),
                name: item
                    .name
                    .clone()
                    .unwrap_or_else(|| "Unknown stakeholder".to_string()),
                description: item.description.clone().unwrap_or_default(),
                questions,
            }
        })
        .collect()
}

fn build_prompt(brief: &BusinessBrief) -> String {
    format!(
        r#"Design a stakeholder research questionnaire for the following business context.

BUSINESS CONTEXT:
- Business Idea: {}
- Target Customer: {}
- Problem: {}
- Industry: {}
- Location: {}

REQUIREMENTS:
1. Identify 2-3 PRIMARY stakeholders (direct users or buyers) and 1-2 SECONDARY stakeholders (influencers, gatekeepers, adjacent roles).
2. For each stakeholder provide a short name, a one-line description, and three question groups: problemDiscovery, solutionValidation, followUp.
3. Questions must be open-ended and specific to this stakeholder's relationship with the business.

Return JSON in this exact shape:
{{
  "primaryStakeholders": [
    {{
      "index": 0,
      "name": "Stakeholder name",
      "description": "One-line description of their role",
      "questions": {{
        "problemDiscovery": ["question 1", "question 2"],
        "solutionValidation": ["question 3"],
        "followUp": ["question 4"]
      }}
    }}
  ],
  "secondaryStakeholders": [ ... same shape ... ],
  "timeEstimate": {{"totalQuestions": 12, "estimatedMinutes": 30}}
}}"#,
        brief.business_idea,
        brief.target_customer,
        brief.problem,
        brief.industry.as_deref().unwrap_or("general"),
        brief.location.as_deref().unwrap_or("unspecified"),
    )
}
