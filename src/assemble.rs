//! Stage 4: assemble the exported persona dataset.
//!
//! Loads the analysis envelope, recovers the originating simulation when it
//! still exists (a missing simulation is tolerated), picks the richest
//! persona source, wraps the frontend traits, and computes dataset-level
//! quality metrics.

use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::store::Repository;
use crate::types::{
    AttributedTrait, DatasetPersona, DatasetPersonaMetadata, DatasetQuality, PersonaDataset,
    PersonaProfile, StructuredDemographics,
};
use crate::PipelineError;

/// Stage 4 worker.
pub struct DatasetAssembler {
    store: Arc<dyn Repository>,
}

impl DatasetAssembler {
    pub fn new(store: Arc<dyn Repository>) -> Self {
        Self { store }
    }

    /// Assemble the dataset for a persisted analysis.
    pub async fn assemble(&self, analysis_id: i64) -> Result<PersonaDataset> {
        let record = self
            .store
            .get_analysis(analysis_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("analysis {}", analysis_id)))?;

        let mut analysis = record.results;
        analysis.id = Some(analysis_id.to_string());
        let simulation_id = record.simulation_id;

        let mut interviews = Vec::new();
        let mut simulation_people = Vec::new();
        if let Some(ref sim_id) = simulation_id {
            match self.store.get_simulation(sim_id).await? {
                Some(simulation) => {
                    interviews = simulation.interviews;
                    simulation_people = simulation.personas;
                }
                None => tracing::warn!(
                    simulation_id = %sim_id,
                    analysis_id,
                    "simulation referenced by analysis could not be loaded"
                ),
            }
        }

        let sources: &[PersonaProfile] = if analysis.enhanced_personas.is_empty() {
            &analysis.personas
        } else {
            &analysis.enhanced_personas
        };

        let personas: Vec<DatasetPersona> = sources
            .iter()
            .map(|profile| {
                to_dataset_persona(profile, analysis_id, simulation_id.as_deref())
            })
            .collect();

        let interview_count = interviews.len();
        let stakeholder_coverage = interviews
            .iter()
            .map(|i| i.stakeholder_type.as_str())
            .filter(|t| !t.is_empty())
            .collect::<BTreeSet<_>>()
            .len();
        let avg_persona_quality = if personas.is_empty() {
            0.0
        } else {
            personas.iter().map(|p| p.overall_confidence).sum::<f64>() / personas.len() as f64
        };

        let description = match simulation_id.as_deref() {
            Some(sim_id) => format!(
                "Persona dataset generated from analysis {} (simulation {})",
                analysis_id, sim_id
            ),
            None => format!("Persona dataset generated from analysis {}", analysis_id),
        };

        Ok(PersonaDataset {
            scope_id: Uuid::new_v4().to_string(),
            scope_name: format!("Persona Scope {}", analysis_id),
            description,
            personas,
            interviews,
            analysis,
            simulation_people,
            quality: DatasetQuality {
                interview_count,
                stakeholder_coverage,
                avg_persona_quality,
            },
        })
    }
}

fn to_dataset_persona(
    profile: &PersonaProfile,
    analysis_id: i64,
    simulation_id: Option<&str>,
) -> DatasetPersona {
    DatasetPersona {
        name: profile.name.clone(),
        description: if profile.description.is_empty() {
            profile.name.clone()
        } else {
            profile.description.clone()
        },
        archetype: profile.archetype.clone(),
        demographics: profile
            .demographics
            .as_ref()
            .map(demographics_view)
            .unwrap_or_else(empty_trait),
        goals_and_motivations: profile
            .goals_and_motivations
            .clone()
            .unwrap_or_else(empty_trait),
        challenges_and_frustrations: profile
            .challenges_and_frustrations
            .clone()
            .unwrap_or_else(empty_trait),
        key_quotes: profile.key_quotes.clone().unwrap_or_else(empty_trait),
        overall_confidence: profile.overall_confidence,
        patterns: profile.patterns.clone(),
        metadata: DatasetPersonaMetadata {
            source: "persona_pipeline".into(),
            analysis_id: Some(analysis_id.to_string()),
            simulation_id: simulation_id.map(|s| s.to_string()),
        },
    }
}

fn empty_trait() -> AttributedTrait {
    AttributedTrait {
        value: String::new(),
        confidence: 0.7,
        evidence: Vec::new(),
    }
}

/// Collapse structured demographics into one frontend trait.
fn demographics_view(demographics: &StructuredDemographics) -> AttributedTrait {
    let fields = [
        &demographics.professional_context,
        &demographics.experience_level,
        &demographics.industry,
        &demographics.location,
        &demographics.roles,
    ];

    let value = fields
        .iter()
        .filter_map(|f| f.as_ref())
        .map(|t| t.value.as_str())
        .next()
        .unwrap_or_default()
        .to_string();

    let mut evidence: Vec<String> = Vec::new();
    for field in fields.iter().filter_map(|f| f.as_ref()) {
        for quote in &field.evidence {
            if !evidence.contains(quote) {
                evidence.push(quote.clone());
            }
        }
    }
    evidence.truncate(5);

    AttributedTrait {
        value,
        confidence: demographics.confidence,
        evidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{DetailedAnalysis, Interview};

    fn profile(name: &str, confidence: f64) -> PersonaProfile {
        PersonaProfile {
            name: name.into(),
            archetype: "Professional".into(),
            description: format!("{} description", name),
            demographics: None,
            goals_and_motivations: Some(AttributedTrait {
                value: "Wants to automate the boring parts".into(),
                confidence: 0.9,
                evidence: vec!["I spend most of my week on manual work".into()],
            }),
            skills_and_expertise: None,
            challenges_and_frustrations: None,
            needs_and_desires: None,
            technology_and_tools: None,
            key_quotes: None,
            overall_confidence: confidence,
            patterns: Vec::new(),
        }
    }

    fn interview(stakeholder: &str) -> Interview {
        Interview {
            person_id: "p-1".into(),
            stakeholder_type: stakeholder.into(),
            responses: Vec::new(),
            duration_minutes: 12,
            overall_sentiment: "neutral".into(),
            key_themes: Vec::new(),
        }
    }

    async fn store_with_analysis(
        personas: Vec<PersonaProfile>,
        enhanced: Vec<PersonaProfile>,
        simulation_id: Option<&str>,
    ) -> (Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let mut envelope = DetailedAnalysis::empty(100);
        envelope.personas = personas;
        envelope.enhanced_personas = enhanced;
        let id = store
            .insert_analysis(
                simulation_id,
                &envelope,
                "gemini",
                "gemini-2.5-flash",
                "completed",
                None,
            )
            .await
            .unwrap();
        (store, id)
    }

    #[tokio::test]
    async fn test_missing_analysis_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let assembler = DatasetAssembler::new(store);
        let err = assembler.assemble(99).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_missing_simulation_tolerated() {
        let (store, id) =
            store_with_analysis(vec![profile("P1", 0.8)], Vec::new(), Some("gone-sim")).await;
        let dataset = DatasetAssembler::new(store).assemble(id).await.unwrap();
        assert!(dataset.interviews.is_empty());
        assert!(dataset.simulation_people.is_empty());
        assert_eq!(dataset.personas.len(), 1);
        assert_eq!(dataset.quality.interview_count, 0);
    }

    #[tokio::test]
    async fn test_enhanced_personas_preferred() {
        let (store, id) = store_with_analysis(
            vec![profile("Base", 0.5)],
            vec![profile("Enhanced", 0.9)],
            None,
        )
        .await;
        let dataset = DatasetAssembler::new(store).assemble(id).await.unwrap();
        assert_eq!(dataset.personas.len(), 1);
        assert_eq!(dataset.personas[0].name, "Enhanced");
    }

    #[tokio::test]
    async fn test_quality_metrics() {
        let (store, id) = store_with_analysis(
            vec![profile("P1", 0.6), profile("P2", 0.8)],
            Vec::new(),
            Some("sim-1"),
        )
        .await;
        // simulate a stored simulation with interviews across two stakeholders
        let record = crate::types::SimulationRecord {
            simulation_id: "sim-1".into(),
            user_id: "u".into(),
            status: crate::types::SimulationStatus::Completed,
            business_context: crate::types::BusinessBrief {
                business_idea: "idea".into(),
                target_customer: "c".into(),
                problem: "p".into(),
                industry: None,
                location: None,
            },
            questions_data: crate::types::Questionnaire {
                stakeholders: Default::default(),
                time_estimate: serde_json::Value::Null,
            },
            config: crate::config::SimulationConfig::default(),
            personas: Vec::new(),
            interviews: vec![interview("PM"), interview("PM"), interview("IT")],
            insights: None,
            formatted_data: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
            error: None,
        };
        store.create_simulation(&record).await.unwrap();

        let dataset = DatasetAssembler::new(store).assemble(id).await.unwrap();
        assert_eq!(dataset.quality.interview_count, 3);
        assert_eq!(dataset.quality.stakeholder_coverage, 2);
        assert!((dataset.quality.avg_persona_quality - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_metadata_attached() {
        let (store, id) =
            store_with_analysis(vec![profile("P1", 0.8)], Vec::new(), Some("sim-9")).await;
        let dataset = DatasetAssembler::new(store).assemble(id).await.unwrap();
        let metadata = &dataset.personas[0].metadata;
        assert_eq!(metadata.source, "persona_pipeline");
        assert_eq!(metadata.analysis_id.as_deref(), Some(id.to_string().as_str()));
        assert_eq!(metadata.simulation_id.as_deref(), Some("sim-9"));
        assert!(Uuid::parse_str(&dataset.scope_id).is_ok());
    }
}
