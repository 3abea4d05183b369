//! Domain model shared across pipeline stages.
//!
//! Everything here is serde-serializable: the same structs travel over the
//! HTTP boundary and into JSON-valued storage columns. Timestamps are UTC
//! RFC-3339 via chrono.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::PipelineError;

// ---------------------------------------------------------------------------
// Business brief and questionnaire
// ---------------------------------------------------------------------------

/// The short business brief a client posts to start a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessBrief {
    pub business_idea: String,
    pub target_customer: String,
    pub problem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl BusinessBrief {
    /// The first three fields are required and non-empty.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("business_idea", &self.business_idea),
            ("target_customer", &self.target_customer),
            ("problem", &self.problem),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::InvalidInput(format!(
                    "{} is required and must be non-empty",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// A role in the questionnaire; the parent of synthetic personas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stakeholder {
    /// Bucket-prefixed positional id, e.g. `primary_0`.
    pub id: String,
    pub name: String,
    pub description: String,
    /// Flat, ordered question list (phase identity discarded after merge).
    pub questions: Vec<String>,
}

/// The two ordered stakeholder buckets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StakeholderBuckets {
    #[serde(default)]
    pub primary: Vec<Stakeholder>,
    #[serde(default)]
    pub secondary: Vec<Stakeholder>,
}

impl StakeholderBuckets {
    /// Iterate over all stakeholders, primary bucket first.
    pub fn all(&self) -> impl Iterator<Item = &Stakeholder> {
        self.primary.iter().chain(self.secondary.iter())
    }

    pub fn total(&self) -> usize {
        self.primary.len() + self.secondary.len()
    }

    pub fn total_questions(&self) -> usize {
        self.all().map(|s| s.questions.len()).sum()
    }
}

/// Stage 1 output: the structured stakeholder questionnaire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Questionnaire {
    pub stakeholders: StakeholderBuckets,
    #[serde(rename = "timeEstimate", default)]
    pub time_estimate: Value,
}

// ---------------------------------------------------------------------------
// Personas and interviews
// ---------------------------------------------------------------------------

/// A synthetic interviewee generated for one stakeholder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    /// Fresh UUID minted locally, never by the model.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub age: u32,
    #[serde(default)]
    pub background: String,
    #[serde(default)]
    pub motivations: Vec<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
    #[serde(default)]
    pub communication_style: String,
    /// The *name* of the parent stakeholder, kept human-readable.
    #[serde(default)]
    pub stakeholder_type: String,
    #[serde(default)]
    pub demographic_details: String,
}

/// One question/answer pair inside an interview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewResponse {
    pub question: String,
    pub response: String,
    #[serde(default)]
    pub sentiment: String,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up_questions: Option<Vec<String>>,
}

/// The model-produced Q&A transcript for one persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interview {
    #[serde(default)]
    pub person_id: String,
    #[serde(default)]
    pub stakeholder_type: String,
    #[serde(default)]
    pub responses: Vec<InterviewResponse>,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub overall_sentiment: String,
    #[serde(default)]
    pub key_themes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Simulation record
// ---------------------------------------------------------------------------

/// Lifecycle status of a simulation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SimulationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationStatus::Pending => "pending",
            SimulationStatus::Running => "running",
            SimulationStatus::Completed => "completed",
            SimulationStatus::Failed => "failed",
        }
    }
}

/// Deterministic aggregation over a finished simulation's interviews.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationInsights {
    pub overall_sentiment: String,
    pub key_themes: Vec<String>,
    pub stakeholder_priorities: BTreeMap<String, Vec<String>>,
    pub potential_risks: Vec<String>,
    pub opportunities: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Durable record of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub simulation_id: String,
    pub user_id: String,
    pub status: SimulationStatus,
    pub business_context: BusinessBrief,
    pub questions_data: Questionnaire,
    pub config: SimulationConfig,
    #[serde(default)]
    pub personas: Vec<Persona>,
    #[serde(default)]
    pub interviews: Vec<Interview>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<SimulationInsights>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_data: Option<Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SimulationRecord {
    /// The analysis-ready transcript stored by the simulation stage, if any.
    pub fn analysis_ready_text(&self) -> Option<&str> {
        self.formatted_data
            .as_ref()
            .and_then(|d| d.get("analysis_ready_text"))
            .and_then(|t| t.as_str())
            .filter(|t| !t.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Analysis envelope
// ---------------------------------------------------------------------------

/// A theme extracted from the interview corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub name: String,
    #[serde(default)]
    pub frequency: f64,
    #[serde(default)]
    pub sentiment: f64,
    #[serde(default)]
    pub statements: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub definition: String,
}

/// A cross-stakeholder pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub frequency: f64,
}

/// Sentiment distribution over the whole corpus. Sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SentimentOverview {
    pub positive: f64,
    pub neutral: f64,
    pub negative: f64,
}

impl Default for SentimentOverview {
    fn default() -> Self {
        Self {
            positive: 0.33,
            neutral: 0.34,
            negative: 0.33,
        }
    }
}

impl SentimentOverview {
    /// Normalise the distribution to sum to 1.0; falls back to the default
    /// split when the components are all zero or negative.
    pub fn normalized(self) -> Self {
        let sum = self.positive + self.neutral + self.negative;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            positive: self.positive / sum,
            neutral: self.neutral / sum,
            negative: self.negative / sum,
        }
    }
}

/// One categorised sentiment finding with verbatim statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentDetail {
    pub category: String,
    /// Score in [-1, 1].
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub statements: Vec<String>,
}

/// A trait value with its confidence and verbatim supporting quotes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedTrait {
    pub value: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
}

pub(crate) fn default_confidence() -> f64 {
    0.7
}

/// Demographics decomposed into structured sub-fields by keyword routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredDemographics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_level: Option<AttributedTrait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<AttributedTrait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<AttributedTrait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub professional_context: Option<AttributedTrait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<AttributedTrait>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

impl StructuredDemographics {
    pub fn field_count(&self) -> usize {
        [
            self.experience_level.is_some(),
            self.industry.is_some(),
            self.location.is_some(),
            self.professional_context.is_some(),
            self.roles.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// Canonical persona record produced by analysis post-processing.
///
/// Traits that fail validation are dropped, not defaulted, so every field
/// that is present carries real evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaProfile {
    pub name: String,
    #[serde(default)]
    pub archetype: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demographics: Option<StructuredDemographics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goals_and_motivations: Option<AttributedTrait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills_and_expertise: Option<AttributedTrait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenges_and_frustrations: Option<AttributedTrait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_and_desires: Option<AttributedTrait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technology_and_tools: Option<AttributedTrait>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_quotes: Option<AttributedTrait>,
    #[serde(default = "default_confidence")]
    pub overall_confidence: f64,
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Influence scores in [0, 1] for one detected stakeholder.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InfluenceMetrics {
    #[serde(default)]
    pub decision_power: f64,
    #[serde(default)]
    pub technical_influence: f64,
    #[serde(default)]
    pub budget_influence: f64,
}

impl InfluenceMetrics {
    pub fn clamped(self) -> Self {
        Self {
            decision_power: self.decision_power.clamp(0.0, 1.0),
            technical_influence: self.technical_influence.clamp(0.0, 1.0),
            budget_influence: self.budget_influence.clamp(0.0, 1.0),
        }
    }
}

/// A stakeholder-like entity the analysis identified in the corpus
/// (distinct from the questionnaire's stakeholders).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedStakeholder {
    pub stakeholder_id: String,
    #[serde(default)]
    pub stakeholder_type: String,
    #[serde(default = "default_confidence")]
    pub confidence_score: f64,
    #[serde(default)]
    pub demographic_profile: Value,
    #[serde(default)]
    pub individual_insights: Value,
    #[serde(default)]
    pub influence_metrics: InfluenceMetrics,
    #[serde(default)]
    pub authentic_evidence: Value,
}

/// Stakeholder intelligence aggregate produced by the analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StakeholderIntelligence {
    #[serde(default)]
    pub detected_stakeholders: Vec<DetectedStakeholder>,
    #[serde(default)]
    pub cross_stakeholder_patterns: Value,
    #[serde(default)]
    pub multi_stakeholder_summary: Value,
    #[serde(default)]
    pub processing_metadata: Value,
}

/// An actionable insight synthesised from the accumulated artefacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub business_impact: String,
}

/// The full analytical report persisted in the analysis row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub file_name: String,
    pub file_size: usize,
    #[serde(default)]
    pub themes: Vec<Theme>,
    #[serde(default)]
    pub enhanced_themes: Vec<Theme>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub enhanced_patterns: Vec<Pattern>,
    #[serde(default)]
    pub sentiment_overview: SentimentOverview,
    #[serde(default)]
    pub sentiment_details: Vec<SentimentDetail>,
    #[serde(default)]
    pub personas: Vec<PersonaProfile>,
    #[serde(default)]
    pub enhanced_personas: Vec<PersonaProfile>,
    #[serde(default)]
    pub insights: Vec<Insight>,
    #[serde(default)]
    pub enhanced_insights: Vec<Insight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stakeholder_intelligence: Option<StakeholderIntelligence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DetailedAnalysis {
    /// An empty, completed envelope for the given corpus size.
    pub fn empty(file_size: usize) -> Self {
        Self {
            id: None,
            status: "completed".into(),
            created_at: Utc::now(),
            file_name: "simulation_analysis.txt".into(),
            file_size,
            themes: Vec::new(),
            enhanced_themes: Vec::new(),
            patterns: Vec::new(),
            enhanced_patterns: Vec::new(),
            sentiment_overview: SentimentOverview::default(),
            sentiment_details: Vec::new(),
            personas: Vec::new(),
            enhanced_personas: Vec::new(),
            insights: Vec::new(),
            enhanced_insights: Vec::new(),
            stakeholder_intelligence: None,
            error: None,
        }
    }
}

/// Durable analysis row (envelope plus provenance columns).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Integer surrogate key assigned by the store.
    pub analysis_id: i64,
    /// Soft reference; null when the source was direct text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_id: Option<String>,
    pub status: String,
    pub results: DetailedAnalysis,
    pub llm_provider: String,
    pub llm_model: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Dataset (stage 4 output)
// ---------------------------------------------------------------------------

/// Provenance attached to every exported persona.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetPersonaMetadata {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_id: Option<String>,
}

/// Frontend view of one persona inside the exported dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetPersona {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub archetype: String,
    pub demographics: AttributedTrait,
    pub goals_and_motivations: AttributedTrait,
    pub challenges_and_frustrations: AttributedTrait,
    pub key_quotes: AttributedTrait,
    pub overall_confidence: f64,
    #[serde(default)]
    pub patterns: Vec<String>,
    pub metadata: DatasetPersonaMetadata,
}

/// Dataset-level quality metrics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DatasetQuality {
    pub interview_count: usize,
    /// Number of distinct non-empty stakeholder types across interviews.
    pub stakeholder_coverage: usize,
    /// Mean of persona `overall_confidence`, or 0 for empty input.
    pub avg_persona_quality: f64,
}

/// The stage-4 output consumed by external clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaDataset {
    pub scope_id: String,
    pub scope_name: String,
    pub description: String,
    pub personas: Vec<DatasetPersona>,
    pub interviews: Vec<Interview>,
    pub analysis: DetailedAnalysis,
    #[serde(default)]
    pub simulation_people: Vec<Persona>,
    pub quality: DatasetQuality,
}

// ---------------------------------------------------------------------------
// Pipeline run, trace, job status
// ---------------------------------------------------------------------------

/// Status of one recorded stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

/// Structured record of one stage's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTrace {
    pub stage_name: String,
    pub status: StageStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    #[serde(default)]
    pub outputs: serde_json::Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal classification of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Partial,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Partial | RunStatus::Failed
        )
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "partial" => Some(RunStatus::Partial),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Envelope returned by the stage orchestrator: the trace is always present,
/// the dataset only when the final export stage succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<PersonaDataset>,
    pub execution_trace: Vec<StageTrace>,
    pub total_duration_seconds: f64,
    pub status: RunStatus,
}

/// Scalar counts extracted from a finished trace for quick access.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunCounts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questionnaire_stakeholder_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interview_count: Option<i64>,
}

/// Background job status served to polling clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

/// Durable record of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunRecord {
    pub job_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub business_context: BusinessBrief,
    #[serde(default)]
    pub execution_trace: Vec<StageTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<PersonaDataset>,
    #[serde(default)]
    pub counts: RunCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Lightweight run view for list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunSummary {
    pub job_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_idea: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_customer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questionnaire_stakeholder_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interview_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&PipelineRunRecord> for PipelineRunSummary {
    fn from(record: &PipelineRunRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            status: record.status,
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            duration_seconds: record.duration_seconds,
            business_idea: Some(record.business_context.business_idea.clone()),
            target_customer: Some(record.business_context.target_customer.clone()),
            industry: record.business_context.industry.clone(),
            location: record.business_context.location.clone(),
            questionnaire_stakeholder_count: record.counts.questionnaire_stakeholder_count,
            persona_count: record.counts.persona_count,
            interview_count: record.counts.interview_count,
            error: record.error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_brief_validation() {
        let brief = BusinessBrief {
            business_idea: "AI research automation".into(),
            target_customer: "EU SaaS PMs".into(),
            problem: "manual research is slow".into(),
            industry: None,
            location: None,
        };
        assert!(brief.validate().is_ok());

        let empty = BusinessBrief {
            business_idea: "  ".into(),
            ..brief
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_sentiment_overview_normalizes() {
        let overview = SentimentOverview {
            positive: 2.0,
            neutral: 1.0,
            negative: 1.0,
        }
        .normalized();
        let sum = overview.positive + overview.neutral + overview.negative;
        assert!((sum - 1.0).abs() < 1e-9);
        assert!((overview.positive - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_sentiment_overview_zero_falls_back_to_default() {
        let overview = SentimentOverview {
            positive: 0.0,
            neutral: 0.0,
            negative: 0.0,
        }
        .normalized();
        assert_eq!(overview, SentimentOverview::default());
    }

    #[test]
    fn test_default_sentiment_split() {
        let d = SentimentOverview::default();
        let sum = d.positive + d.neutral + d.negative;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_influence_metrics_clamped() {
        let metrics = InfluenceMetrics {
            decision_power: 1.5,
            technical_influence: -0.3,
            budget_influence: 0.5,
        }
        .clamped();
        assert_eq!(metrics.decision_power, 1.0);
        assert_eq!(metrics.technical_influence, 0.0);
        assert_eq!(metrics.budget_influence, 0.5);
    }

    #[test]
    fn test_buckets_iteration_order() {
        let buckets = StakeholderBuckets {
            primary: vec![Stakeholder {
                id: "primary_0".into(),
                name: "PM".into(),
                description: "".into(),
                questions: vec!["q1".into()],
            }],
            secondary: vec![Stakeholder {
                id: "secondary_0".into(),
                name: "IT".into(),
                description: "".into(),
                questions: vec!["q2".into(), "q3".into()],
            }],
        };
        let names: Vec<&str> = buckets.all().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["PM", "IT"]);
        assert_eq!(buckets.total(), 2);
        assert_eq!(buckets.total_questions(), 3);
    }

    #[test]
    fn test_run_status_roundtrip() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Partial,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert!(RunStatus::parse("bogus").is_none());
        assert!(RunStatus::Partial.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_questionnaire_serde_time_estimate_key() {
        let q = Questionnaire {
            stakeholders: StakeholderBuckets::default(),
            time_estimate: serde_json::json!({"totalQuestions": 5}),
        };
        let json = serde_json::to_value(&q).unwrap();
        assert!(json.get("timeEstimate").is_some());
    }

    #[test]
    fn test_interview_defaults_on_deserialize() {
        let interview: Interview = serde_json::from_str(
            r#"{"responses": [{"question": "q", "response": "a"}], "overall_sentiment": "positive"}"#,
        )
        .unwrap();
        assert_eq!(interview.responses.len(), 1);
        assert!(interview.person_id.is_empty());
        assert_eq!(interview.duration_minutes, 0);
    }
}
