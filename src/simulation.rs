//! Simulation stage: record lifecycle, fanout, insights, formatted data.
//!
//! Wraps the interview fanout with persistence: the simulation row is
//! created up front, results (including the analysis-ready transcript and
//! aggregated insights) are written on success, and failures mark the row
//! failed. Once terminal, the record is immutable.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::fanout::{InterviewFanout, ProgressCallback};
use crate::store::Repository;
use crate::types::{
    BusinessBrief, Interview, Persona, Questionnaire, SimulationInsights, SimulationRecord,
    SimulationStatus,
};

/// Default owner for runs created without an authenticated user.
const DEFAULT_USER: &str = "anonymous";

/// Stage 2 worker with persistence.
pub struct SimulationRunner {
    fanout: InterviewFanout,
    store: Arc<dyn Repository>,
}

impl SimulationRunner {
    pub fn new(fanout: InterviewFanout, store: Arc<dyn Repository>) -> Self {
        Self { fanout, store }
    }

    /// Run a full simulation and persist the record.
    pub async fn run(
        &self,
        questionnaire: &Questionnaire,
        brief: &BusinessBrief,
        config: &SimulationConfig,
        user_id: Option<&str>,
        progress: Option<ProgressCallback>,
    ) -> Result<SimulationRecord> {
        brief.validate()?;
        config.validate()?;

        let simulation_id = Uuid::new_v4().to_string();
        let mut record = SimulationRecord {
            simulation_id: simulation_id.clone(),
            user_id: user_id.unwrap_or(DEFAULT_USER).to_string(),
            status: SimulationStatus::Running,
            business_context: brief.clone(),
            questions_data: questionnaire.clone(),
            config: config.clone(),
            personas: Vec::new(),
            interviews: Vec::new(),
            insights: None,
            formatted_data: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
            error: None,
        };
        self.store.create_simulation(&record).await?;
        tracing::info!(simulation_id = %simulation_id, "simulation started");

        let outcome = self
            .fanout
            .run(&questionnaire.stakeholders, brief, config, progress)
            .await;

        let (personas, interviews) = match outcome {
            Ok(result) => result,
            Err(err) => {
                if let Err(db_err) = self
                    .store
                    .mark_simulation_failed(&simulation_id, &err.to_string())
                    .await
                {
                    tracing::error!(
                        simulation_id = %simulation_id,
                        error = %db_err,
                        "failed to mark simulation failed"
                    );
                }
                return Err(err);
            }
        };

        let insights = if config.include_insights {
            Some(aggregate_insights(&interviews))
        } else {
            None
        };

        let transcript = analysis_transcript(&personas, &interviews);
        let formatted = json!({
            "analysis_ready_text": transcript,
            "metadata": {
                "simulation_id": simulation_id,
                "total_personas": personas.len(),
                "total_interviews": interviews.len(),
            },
        });

        self.store
            .update_simulation_results(
                &simulation_id,
                &personas,
                &interviews,
                insights.as_ref(),
                Some(&formatted),
            )
            .await?;

        record.status = SimulationStatus::Completed;
        record.personas = personas;
        record.interviews = interviews;
        record.insights = insights;
        record.formatted_data = Some(formatted);
        record.completed_at = Some(chrono::Utc::now());

        tracing::info!(
            simulation_id = %simulation_id,
            personas = record.personas.len(),
            interviews = record.interviews.len(),
            "simulation completed"
        );
        Ok(record)
    }
}

/// Render the stakeholder-aware transcript the analysis stage consumes.
pub fn analysis_transcript(personas: &[Persona], interviews: &[Interview]) -> String {
    let mut parts: Vec<String> = Vec::new();

    for (number, interview) in interviews.iter().enumerate() {
        let speaker = personas
            .iter()
            .find(|p| p.id == interview.person_id)
            .map(|p| p.name.as_str())
            .unwrap_or("Unknown");

        parts.push(format!("--- INTERVIEW {} ---", number + 1));
        parts.push(format!("Stakeholder: {}", interview.stakeholder_type));
        parts.push(format!("Speaker: {}", speaker));
        parts.push(format!("Overall Sentiment: {}", interview.overall_sentiment));
        if !interview.key_themes.is_empty() {
            parts.push(format!("Key Themes: {}", interview.key_themes.join(", ")));
        }
        parts.push(String::new());

        for (i, response) in interview.responses.iter().enumerate() {
            parts.push(format!("Q{}: {}", i + 1, response.question));
            parts.push(format!("A{}: {}", i + 1, response.response));
            parts.push(String::new());
        }
    }

    parts.join("\n")
}

/// Aggregate deterministic insights from a finished interview set.
pub fn aggregate_insights(interviews: &[Interview]) -> SimulationInsights {
    let mut sentiment_counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut themes: Vec<String> = Vec::new();
    let mut priorities: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut negative = false;
    let mut positive = false;

    for interview in interviews {
        *sentiment_counts
            .entry(interview.overall_sentiment.as_str())
            .or_default() += 1;
        for theme in &interview.key_themes {
            if !themes.contains(theme) {
                themes.push(theme.clone());
            }
        }
        match interview.overall_sentiment.as_str() {
            "negative" | "mixed" => negative = true,
            "positive" => positive = true,
            _ => {}
        }

        let bucket = priorities
            .entry(interview.stakeholder_type.clone())
            .or_default();
        for response in &interview.responses {
            bucket.extend(response.key_insights.iter().cloned());
        }
    }

    let overall_sentiment = sentiment_counts
        .iter()
        .max_by_key(|(_, count)| **count)
        .map(|(sentiment, _)| sentiment.to_string())
        .unwrap_or_else(|| "neutral".to_string());

    themes.truncate(10);

    let mut recommendations = Vec::new();
    let mut risks = Vec::new();
    let mut opportunities = Vec::new();
    if negative {
        recommendations.push("Address the most common concerns raised by stakeholders".to_string());
        risks.push("Stakeholder concerns about value proposition".to_string());
        risks.push("Potential adoption barriers identified".to_string());
    }
    if positive {
        recommendations
            .push("Leverage the positive aspects that stakeholders appreciate".to_string());
        opportunities.push("Strong stakeholder interest in core features".to_string());
        opportunities.push("Potential for market expansion".to_string());
    }
    recommendations.extend([
        "Consider conducting follow-up interviews with real customers".to_string(),
        "Validate simulation insights with actual market research".to_string(),
        "Use these insights to refine your business model".to_string(),
    ]);

    SimulationInsights {
        overall_sentiment,
        key_themes: themes,
        stakeholder_priorities: priorities,
        potential_risks: risks,
        opportunities,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InterviewResponse;

    fn interview(sentiment: &str, stakeholder: &str, themes: &[&str]) -> Interview {
        Interview {
            person_id: "p-1".into(),
            stakeholder_type: stakeholder.into(),
            responses: vec![InterviewResponse {
                question: "How do you research today?".into(),
                response: "Spreadsheets mostly.".into(),
                sentiment: sentiment.into(),
                key_insights: vec!["manual workflow".into()],
                follow_up_questions: None,
            }],
            duration_minutes: 12,
            overall_sentiment: sentiment.into(),
            key_themes: themes.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_transcript_format() {
        let personas = vec![Persona {
            id: "p-1".into(),
            name: "Sarah Chen, Senior PM".into(),
            age: 34,
            background: "SaaS".into(),
            motivations: Vec::new(),
            pain_points: Vec::new(),
            communication_style: "direct".into(),
            stakeholder_type: "Founding PM".into(),
            demographic_details: "Berlin".into(),
        }];
        let interviews = vec![interview("mixed", "Founding PM", &["tooling"])];

        let transcript = analysis_transcript(&personas, &interviews);
        assert!(transcript.contains("--- INTERVIEW 1 ---"));
        assert!(transcript.contains("Stakeholder: Founding PM"));
        assert!(transcript.contains("Speaker: Sarah Chen, Senior PM"));
        assert!(transcript.contains("Q1: How do you research today?"));
        assert!(transcript.contains("A1: Spreadsheets mostly."));
    }

    #[test]
    fn test_transcript_unknown_speaker() {
        let interviews = vec![interview("neutral", "IT Lead", &[])];
        let transcript = analysis_transcript(&[], &interviews);
        assert!(transcript.contains("Speaker: Unknown"));
    }

    #[test]
    fn test_insights_majority_sentiment_and_theme_cap() {
        let mut interviews = vec![
            interview("negative", "PM", &["a", "b"]),
            interview("negative", "PM", &["c"]),
            interview("positive", "IT", &["d"]),
        ];
        // add many themes to exercise the cap
        interviews.push(interview(
            "neutral",
            "PM",
            &["e", "f", "g", "h", "i", "j", "k", "l"],
        ));

        let insights = aggregate_insights(&interviews);
        assert_eq!(insights.overall_sentiment, "negative");
        assert_eq!(insights.key_themes.len(), 10);
        assert!(insights
            .potential_risks
            .contains(&"Potential adoption barriers identified".to_string()));
        assert!(insights
            .opportunities
            .contains(&"Strong stakeholder interest in core features".to_string()));
        assert_eq!(insights.stakeholder_priorities["PM"].len(), 3);
    }

    #[test]
    fn test_insights_empty_input() {
        let insights = aggregate_insights(&[]);
        assert_eq!(insights.overall_sentiment, "neutral");
        assert!(insights.key_themes.is_empty());
        assert_eq!(insights.recommendations.len(), 3);
    }
}
