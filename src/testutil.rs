//! Canned model responses and helpers shared across unit tests.

use std::sync::Arc;
use std::time::Duration;

use crate::gateway::{BackoffConfig, LlmGateway, MockBackend, TaskKind};
use crate::types::BusinessBrief;

pub(crate) const QUESTIONNAIRE: &str = r#"{
    "primaryStakeholders": [{
        "name": "Founding PM",
        "description": "Owns discovery and roadmap decisions",
        "questions": {
            "problemDiscovery": ["How do you discover problems today?"],
            "solutionValidation": ["Would automated research help?"],
            "followUp": ["Anything else we should know?"]
        }
    }],
    "secondaryStakeholders": [{
        "name": "IT Lead",
        "description": "Approves new tooling",
        "questions": {
            "problemDiscovery": ["What tools do you approve?"],
            "followUp": ["What blocks adoption?"]
        }
    }],
    "timeEstimate": {"totalQuestions": 5, "estimatedMinutes": 15}
}"#;

pub(crate) const PERSONA_BATCH: &str = r#"[
    {"name": "Sarah Chen, Senior PM", "age": 34, "background": "8 years in SaaS product",
     "motivations": ["ship faster"], "pain_points": ["slow research cycles"],
     "communication_style": "direct", "demographic_details": "Berlin, B2B SaaS"},
    {"name": "Tom Weber, Product Lead", "age": 41, "background": "ex-consultant",
     "motivations": ["evidence-based decisions"], "pain_points": ["stale data"],
     "communication_style": "analytical", "demographic_details": "Munich, enterprise"}
]"#;

pub(crate) const INTERVIEW: &str = r#"{
    "responses": [
        {"question": "How do you discover problems today?",
         "response": "Honestly, it's mostly spreadsheets and gut feel. We tried a few tools but nothing stuck, and the research backlog keeps growing.",
         "sentiment": "negative",
         "key_insights": ["manual workflow dominates"],
         "follow_up_questions": ["What tools did you try?"]}
    ],
    "overall_sentiment": "mixed",
    "key_themes": ["tooling gaps", "research debt"]
}"#;

pub(crate) const THEMES: &str = r#"{
    "themes": [{"name": "Research Debt", "frequency": 0.8, "sentiment": -0.3,
                "statements": ["the research backlog keeps growing"],
                "keywords": ["backlog"], "definition": "Accumulated unanswered research questions"}],
    "enhanced_themes": []
}"#;

pub(crate) const PATTERNS: &str = r#"{
    "patterns": [{"type": "Cross-Stakeholder Consensus",
                  "description": "Everyone wants automation",
                  "evidence": ["nothing stuck"], "confidence": 0.9, "frequency": 0.7}],
    "enhanced_patterns": []
}"#;

pub(crate) const STAKEHOLDERS: &str = r#"{
    "stakeholder_intelligence": {
        "detected_stakeholders": [{
            "stakeholder_id": "PM_Sarah",
            "stakeholder_type": "primary_customer",
            "confidence_score": 0.95,
            "demographic_profile": {"role": "PM"},
            "individual_insights": {"primary_concern": "speed"},
            "influence_metrics": {"decision_power": 0.7, "technical_influence": 0.5, "budget_influence": 0.2},
            "authentic_evidence": {"quotes_evidence": ["the research backlog keeps growing"]}
        }],
        "cross_stakeholder_patterns": {"consensus_areas": []},
        "multi_stakeholder_summary": {"total_stakeholders": 1},
        "processing_metadata": {}
    }
}"#;

pub(crate) const SENTIMENT: &str = r#"{
    "sentiment_overview": {"positive": 0.2, "neutral": 0.3, "negative": 0.5},
    "sentiment_details": [{"category": "Process Frustration", "score": -0.7,
                           "statements": ["the research backlog keeps growing"]}]
}"#;

pub(crate) const ANALYSIS_PERSONAS: &str = r#"{
    "personas": [{
        "name": "The Overloaded PM",
        "description": "Product manager drowning in manual research",
        "overall_confidence": 0.85,
        "goals_and_motivations": {
            "value": "Wants research answers without the manual grind",
            "confidence": 0.9,
            "evidence": ["the research backlog keeps growing every sprint"]
        },
        "key_quotes": ["We tried a few tools but nothing stuck"]
    }],
    "enhanced_personas": []
}"#;

pub(crate) const INSIGHTS: &str = r#"{
    "insights": [{"title": "Automation Appetite",
                  "description": "Stakeholders are primed for research automation",
                  "confidence": 0.9, "evidence": ["nothing stuck"],
                  "business_impact": "Lead with time savings"}],
    "enhanced_insights": []
}"#;

/// A mock with every pipeline task registered.
pub(crate) fn full_mock() -> MockBackend {
    MockBackend::new()
        .on_task(TaskKind::QuestionnaireBuild, QUESTIONNAIRE)
        .on_task(TaskKind::PersonaBatch, PERSONA_BATCH)
        .on_task(TaskKind::InterviewSimulation, INTERVIEW)
        .on_task(TaskKind::ThemeExtraction, THEMES)
        .on_task(TaskKind::PatternDetection, PATTERNS)
        .on_task(TaskKind::StakeholderAnalysis, STAKEHOLDERS)
        .on_task(TaskKind::SentimentAnalysis, SENTIMENT)
        .on_task(TaskKind::PersonaSynthesis, ANALYSIS_PERSONAS)
        .on_task(TaskKind::InsightSynthesis, INSIGHTS)
}

/// Gateway with millisecond backoff so retry paths stay fast in tests.
pub(crate) fn fast_gateway(mock: MockBackend) -> LlmGateway {
    LlmGateway::new(Arc::new(mock), "http://unused").with_backoff(BackoffConfig {
        initial_delay: Duration::from_millis(1),
        jitter_max: Duration::ZERO,
        ..Default::default()
    })
}

pub(crate) fn brief() -> BusinessBrief {
    BusinessBrief {
        business_idea: "AI research automation".into(),
        target_customer: "EU SaaS PMs".into(),
        problem: "manual research is slow".into(),
        industry: Some("SaaS".into()),
        location: Some("Berlin".into()),
    }
}
