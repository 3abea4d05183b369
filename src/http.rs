//! HTTP surface for the pipeline.
//!
//! Thin handlers over the stage workers and the job registry; every domain
//! error maps to a status code through one [`IntoResponse`] adapter. The
//! layer depends strictly downward: handlers -> registry/orchestrator ->
//! workers -> gateway/store.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::SimulationConfig;
use crate::orchestrator::StageOrchestrator;
use crate::registry::{JobRegistry, RunPage};
use crate::types::{
    BusinessBrief, DetailedAnalysis, JobStatus, PersonaDataset, PipelineRunRecord, Questionnaire,
    RunStatus, SimulationRecord,
};
use crate::PipelineError;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub orchestrator: Arc<StageOrchestrator>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/questionnaires", post(generate_questionnaire))
        .route("/simulations", post(run_simulation))
        .route("/analysis", post(run_analysis))
        .route("/exports/persona-dataset", post(export_persona_dataset))
        .route("/pipeline/run-async", post(create_pipeline_job))
        .route("/pipeline/jobs/:job_id", get(get_pipeline_job))
        .route("/pipeline/runs", get(list_pipeline_runs))
        .route("/pipeline/runs/:job_id", get(get_pipeline_run_detail))
        .with_state(state)
}

/// Domain error wrapped for the HTTP boundary.
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::MalformedOutput(_)
            | PipelineError::Json(_)
            | PipelineError::Upstream { .. }
            | PipelineError::Request(_) => StatusCode::BAD_GATEWAY,
            PipelineError::StageFailed { .. }
            | PipelineError::Cancelled
            | PipelineError::Storage(_)
            | PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({"error": self.0.to_string()}));
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct QuestionnaireRequest {
    business_context: BusinessBrief,
}

#[derive(Debug, Serialize)]
struct QuestionnaireResponse {
    business_context: BusinessBrief,
    questions_data: Questionnaire,
    metadata: Value,
}

async fn generate_questionnaire(
    State(state): State<AppState>,
    Json(request): Json<QuestionnaireRequest>,
) -> ApiResult<Json<QuestionnaireResponse>> {
    let questions_data = state
        .orchestrator
        .questionnaire()
        .build(&request.business_context)
        .await?;
    Ok(Json(QuestionnaireResponse {
        business_context: request.business_context,
        questions_data,
        metadata: json!({"format_version": "v3"}),
    }))
}

#[derive(Debug, Deserialize)]
struct SimulationRequest {
    questions_data: Questionnaire,
    business_context: BusinessBrief,
    #[serde(default)]
    config: SimulationConfig,
}

async fn run_simulation(
    State(state): State<AppState>,
    Json(request): Json<SimulationRequest>,
) -> ApiResult<Json<SimulationRecord>> {
    let record = state
        .orchestrator
        .simulation()
        .run(
            &request.questions_data,
            &request.business_context,
            &request.config,
            None,
            None,
        )
        .await
        .map_err(simulation_error)?;
    Ok(Json(record))
}

/// A simulation that starts but cannot complete is an internal failure,
/// not a gateway one, as far as this route's contract goes.
fn simulation_error(err: PipelineError) -> ApiError {
    match err {
        PipelineError::InvalidInput(_) => ApiError(err),
        PipelineError::StageFailed { stage, message } => {
            ApiError(PipelineError::StageFailed { stage, message })
        }
        other => ApiError(PipelineError::Internal(other.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct AnalysisQuery {
    simulation_id: String,
}

async fn run_analysis(
    State(state): State<AppState>,
    Query(query): Query<AnalysisQuery>,
) -> ApiResult<Json<DetailedAnalysis>> {
    let record = state
        .orchestrator
        .analysis()
        .run_for_simulation(&query.simulation_id)
        .await?;
    Ok(Json(record.results))
}

#[derive(Debug, Deserialize)]
struct ExportRequest {
    #[serde(default)]
    analysis_id: Option<Value>,
    #[allow(dead_code)]
    #[serde(default)]
    include_visual_assets: Option<bool>,
}

/// Analysis ids travel as either a JSON number or a stringified integer.
fn parse_analysis_id(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

async fn export_persona_dataset(
    State(state): State<AppState>,
    Json(request): Json<ExportRequest>,
) -> ApiResult<Json<PersonaDataset>> {
    let analysis_id = request
        .analysis_id
        .as_ref()
        .and_then(parse_analysis_id)
        .ok_or_else(|| {
            PipelineError::InvalidInput(
                "analysis_id is required to export a persona dataset".into(),
            )
        })?;
    let dataset = state.orchestrator.assembler().assemble(analysis_id).await?;
    Ok(Json(dataset))
}

async fn create_pipeline_job(
    State(state): State<AppState>,
    Json(brief): Json<BusinessBrief>,
) -> ApiResult<Json<JobStatus>> {
    let status = state
        .registry
        .submit(brief, SimulationConfig::from_env(), None)
        .await?;
    Ok(Json(status))
}

async fn get_pipeline_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(state.registry.get(&job_id).await?))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_pipeline_runs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<RunPage>> {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(raw) => Some(RunStatus::parse(raw).ok_or_else(|| {
            PipelineError::InvalidInput(format!("unknown status filter '{}'", raw))
        })?),
    };
    let page = state
        .registry
        .list(status, query.limit, query.offset.unwrap_or(0))
        .await?;
    Ok(Json(page))
}

async fn get_pipeline_run_detail(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<PipelineRunRecord>> {
    Ok(Json(state.registry.get_detail(&job_id).await?))
}
