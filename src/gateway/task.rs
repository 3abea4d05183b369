//! Closed catalogue of model call kinds.
//!
//! Every gateway invocation names one of these kinds; dispatch is on the
//! enum, never on strings, so a typo cannot silently route to the wrong
//! output schema.

use serde::{Deserialize, Serialize};

/// One entry in the fixed catalogue of typed model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Business brief -> structured stakeholder questionnaire.
    QuestionnaireBuild,
    /// One stakeholder -> a batch of synthetic personas.
    PersonaBatch,
    /// One persona + question list -> a full interview transcript.
    InterviewSimulation,
    /// Interview corpus -> themes.
    ThemeExtraction,
    /// Interview corpus -> cross-stakeholder patterns.
    PatternDetection,
    /// Interview corpus -> stakeholder intelligence.
    StakeholderAnalysis,
    /// Interview corpus -> sentiment distribution and details.
    SentimentAnalysis,
    /// Interview corpus -> analytical personas.
    PersonaSynthesis,
    /// Accumulated artefacts -> actionable insights.
    InsightSynthesis,
    /// Free-form single response (utility calls).
    SingleResponse,
}

impl TaskKind {
    /// Stable identifier for logging.
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::QuestionnaireBuild => "questionnaire_build",
            TaskKind::PersonaBatch => "persona_batch",
            TaskKind::InterviewSimulation => "interview_simulation",
            TaskKind::ThemeExtraction => "theme_extraction",
            TaskKind::PatternDetection => "pattern_detection",
            TaskKind::StakeholderAnalysis => "stakeholder_analysis",
            TaskKind::SentimentAnalysis => "sentiment_analysis",
            TaskKind::PersonaSynthesis => "persona_synthesis",
            TaskKind::InsightSynthesis => "insight_synthesis",
            TaskKind::SingleResponse => "single_response",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
