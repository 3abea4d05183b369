//! The four-stage pipeline orchestrator.
//!
//! Drives questionnaire generation, simulation, analysis, and dataset
//! export strictly in order. Each stage worker returns a result; the
//! orchestrator pattern-matches the outcome into a [`StageTrace`] entry and
//! never re-raises. A stage whose predecessor did not complete is recorded
//! as skipped. The final status classifies the trace: `completed` when every
//! stage completed and a dataset exists, `partial` when at least one did,
//! `failed` otherwise.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::analysis::{AnalysisPipeline, AnalysisStage};
use crate::assemble::DatasetAssembler;
use crate::cache::InterviewCache;
use crate::config::SimulationConfig;
use crate::fanout::InterviewFanout;
use crate::gateway::{CancelFlag, LlmGateway};
use crate::questionnaire::QuestionnaireBuilder;
use crate::simulation::SimulationRunner;
use crate::store::Repository;
use crate::types::{
    BusinessBrief, ExecutionResult, PersonaDataset, RunCounts, RunStatus, StageStatus, StageTrace,
};

pub const STAGE_QUESTIONNAIRE: &str = "questionnaire_generation";
pub const STAGE_SIMULATION: &str = "simulation";
pub const STAGE_ANALYSIS: &str = "analysis";
pub const STAGE_EXPORT: &str = "persona_dataset_export";

/// Outcome of one stage, produced by pattern-matching the worker result.
enum StageOutcome {
    Completed(Map<String, Value>),
    Failed(String),
    Skipped(String),
}

/// Scalar identifiers extracted from a finished run.
#[derive(Debug, Clone, Default)]
pub struct RunArtifacts {
    pub counts: RunCounts,
    pub simulation_id: Option<String>,
    pub analysis_id: Option<i64>,
}

/// Builds stage workers wired to one gateway/store/cache set.
///
/// The factory exists so every pipeline run can get an orchestrator whose
/// gateway honours that run's cancellation flag; the underlying HTTP
/// client, cache, and store are shared.
pub struct OrchestratorFactory {
    gateway: LlmGateway,
    store: Arc<dyn Repository>,
    cache: Arc<InterviewCache>,
}

impl OrchestratorFactory {
    pub fn new(gateway: LlmGateway, store: Arc<dyn Repository>, cache: Arc<InterviewCache>) -> Self {
        Self {
            gateway,
            store,
            cache,
        }
    }

    pub fn store(&self) -> Arc<dyn Repository> {
        self.store.clone()
    }

    /// Build an orchestrator, optionally scoped to a cancellation flag.
    pub fn build(&self, cancel: Option<CancelFlag>) -> StageOrchestrator {
        let gateway = match cancel {
            Some(flag) => self.gateway.with_cancellation(flag),
            None => self.gateway.clone(),
        };
        StageOrchestrator::new(
            QuestionnaireBuilder::new(gateway.clone()),
            SimulationRunner::new(
                InterviewFanout::new(gateway.clone(), self.cache.clone()),
                self.store.clone(),
            ),
            AnalysisStage::new(AnalysisPipeline::new(gateway), self.store.clone()),
            DatasetAssembler::new(self.store.clone()),
        )
    }
}

/// Stage orchestrator: owns the four stage workers.
pub struct StageOrchestrator {
    questionnaire: QuestionnaireBuilder,
    simulation: SimulationRunner,
    analysis: AnalysisStage,
    assembler: DatasetAssembler,
}

impl StageOrchestrator {
    pub fn new(
        questionnaire: QuestionnaireBuilder,
        simulation: SimulationRunner,
        analysis: AnalysisStage,
        assembler: DatasetAssembler,
    ) -> Self {
        Self {
            questionnaire,
            simulation,
            analysis,
            assembler,
        }
    }

    pub fn questionnaire(&self) -> &QuestionnaireBuilder {
        &self.questionnaire
    }

    pub fn simulation(&self) -> &SimulationRunner {
        &self.simulation
    }

    pub fn analysis(&self) -> &AnalysisStage {
        &self.analysis
    }

    pub fn assembler(&self) -> &DatasetAssembler {
        &self.assembler
    }

    /// Run all four stages and return the trace plus dataset, regardless of
    /// terminal status.
    pub async fn execute(
        &self,
        pipeline_id: &str,
        brief: &BusinessBrief,
        config: &SimulationConfig,
        user_id: Option<&str>,
    ) -> (ExecutionResult, RunArtifacts) {
        let pipeline_started = Utc::now();
        let mut trace: Vec<StageTrace> = Vec::new();
        let mut artifacts = RunArtifacts::default();
        let mut dataset: Option<PersonaDataset> = None;

        // --- Stage 1: questionnaire generation ---
        tracing::info!(pipeline_id, stage = STAGE_QUESTIONNAIRE, "stage started");
        let started = Utc::now();
        let mut questionnaire = None;
        let outcome = match self.questionnaire.build(brief).await {
            Ok(built) => {
                let primary = built.stakeholders.primary.len();
                let secondary = built.stakeholders.secondary.len();
                let total_questions = built.stakeholders.total_questions();
                artifacts.counts.questionnaire_stakeholder_count =
                    Some((primary + secondary) as i64);
                let outputs = to_outputs(json!({
                    "primary_stakeholder_count": primary,
                    "secondary_stakeholder_count": secondary,
                    "total_stakeholder_count": primary + secondary,
                    "total_question_count": total_questions,
                }));
                questionnaire = Some(built);
                StageOutcome::Completed(outputs)
            }
            Err(err) => StageOutcome::Failed(err.to_string()),
        };
        record_stage(&mut trace, STAGE_QUESTIONNAIRE, started, outcome);

        // --- Stage 2: simulation ---
        tracing::info!(pipeline_id, stage = STAGE_SIMULATION, "stage started");
        let started = Utc::now();
        let mut simulation = None;
        let outcome = match (&questionnaire, previous_completed(&trace)) {
            (Some(built), true) => {
                match self
                    .simulation
                    .run(built, brief, config, user_id, None)
                    .await
                {
                    Ok(record) => {
                        artifacts.simulation_id = Some(record.simulation_id.clone());
                        artifacts.counts.persona_count = Some(record.personas.len() as i64);
                        artifacts.counts.interview_count = Some(record.interviews.len() as i64);
                        let outputs = to_outputs(json!({
                            "simulation_id": record.simulation_id,
                            "total_personas": record.personas.len(),
                            "total_interviews": record.interviews.len(),
                        }));
                        simulation = Some(record);
                        StageOutcome::Completed(outputs)
                    }
                    Err(err) => StageOutcome::Failed(err.to_string()),
                }
            }
            _ => StageOutcome::Skipped(skip_message(STAGE_QUESTIONNAIRE)),
        };
        record_stage(&mut trace, STAGE_SIMULATION, started, outcome);

        // --- Stage 3: analysis ---
        tracing::info!(pipeline_id, stage = STAGE_ANALYSIS, "stage started");
        let started = Utc::now();
        let mut analysis = None;
        let outcome = match (&simulation, previous_completed(&trace)) {
            (Some(record), true) => {
                match self.analysis.run_for_simulation(&record.simulation_id).await {
                    Ok(stored) => {
                        artifacts.analysis_id = Some(stored.analysis_id);
                        let outputs = to_outputs(json!({
                            "analysis_id": stored.analysis_id,
                            "persona_count": stored.results.personas.len(),
                            "theme_count": stored.results.themes.len(),
                        }));
                        analysis = Some(stored);
                        StageOutcome::Completed(outputs)
                    }
                    Err(err) => StageOutcome::Failed(err.to_string()),
                }
            }
            _ => StageOutcome::Skipped(skip_message(STAGE_SIMULATION)),
        };
        record_stage(&mut trace, STAGE_ANALYSIS, started, outcome);

        // --- Stage 4: persona dataset export ---
        tracing::info!(pipeline_id, stage = STAGE_EXPORT, "stage started");
        let started = Utc::now();
        let outcome = match (&analysis, previous_completed(&trace)) {
            (Some(stored), true) => match self.assembler.assemble(stored.analysis_id).await {
                Ok(assembled) => {
                    let outputs = to_outputs(json!({
                        "scope_id": assembled.scope_id,
                        "persona_count": assembled.personas.len(),
                        "interview_count": assembled.interviews.len(),
                        "quality": assembled.quality,
                    }));
                    dataset = Some(assembled);
                    StageOutcome::Completed(outputs)
                }
                Err(err) => StageOutcome::Failed(err.to_string()),
            },
            _ => StageOutcome::Skipped(skip_message(STAGE_ANALYSIS)),
        };
        record_stage(&mut trace, STAGE_EXPORT, started, outcome);

        // --- Final envelope ---
        let status = classify(&trace, dataset.is_some());
        let total_duration_seconds =
            (Utc::now() - pipeline_started).num_milliseconds() as f64 / 1000.0;

        tracing::info!(
            pipeline_id,
            status = status.as_str(),
            total_duration_seconds,
            "pipeline finished"
        );

        (
            ExecutionResult {
                dataset,
                execution_trace: trace,
                total_duration_seconds,
                status,
            },
            artifacts,
        )
    }
}

fn to_outputs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn skip_message(previous_stage: &str) -> String {
    format!("Skipped because {} did not complete.", previous_stage)
}

fn previous_completed(trace: &[StageTrace]) -> bool {
    trace
        .last()
        .map(|entry| entry.status == StageStatus::Completed)
        .unwrap_or(false)
}

fn record_stage(
    trace: &mut Vec<StageTrace>,
    stage_name: &str,
    started_at: DateTime<Utc>,
    outcome: StageOutcome,
) {
    let completed_at = Utc::now();
    let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
    let (status, outputs, error) = match outcome {
        StageOutcome::Completed(outputs) => (StageStatus::Completed, outputs, None),
        StageOutcome::Failed(message) => {
            tracing::error!(stage = stage_name, error = %message, "stage failed");
            (StageStatus::Failed, Map::new(), Some(message))
        }
        StageOutcome::Skipped(message) => (StageStatus::Skipped, Map::new(), Some(message)),
    };
    trace.push(StageTrace {
        stage_name: stage_name.to_string(),
        status,
        started_at,
        completed_at,
        duration_seconds,
        outputs,
        error,
    });
}

/// Classify a finished trace.
pub fn classify(trace: &[StageTrace], has_dataset: bool) -> RunStatus {
    let all_completed = trace
        .iter()
        .all(|entry| entry.status == StageStatus::Completed);
    let any_completed = trace
        .iter()
        .any(|entry| entry.status == StageStatus::Completed);

    if all_completed && has_dataset {
        RunStatus::Completed
    } else if any_completed {
        RunStatus::Partial
    } else {
        RunStatus::Failed
    }
}
