//! Durable storage for simulations, analyses, and pipeline runs.
//!
//! The pipeline core depends only on the [`Repository`] trait. The SQLite
//! implementation backs the server binary; [`MemoryStore`] backs tests and
//! degraded operation. Each write is a single unit of work; no multi-row
//! atomic semantics are required by the core.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::Result;
use crate::types::{
    AnalysisRecord, BusinessBrief, DetailedAnalysis, Interview, Persona, PersonaDataset,
    PipelineRunRecord, RunCounts, RunStatus, SimulationInsights, SimulationRecord, StageTrace,
};

/// Result columns written back to a pipeline run after the orchestrator
/// finishes.
#[derive(Debug, Clone)]
pub struct RunResults<'a> {
    pub execution_trace: &'a [StageTrace],
    pub total_duration_seconds: f64,
    pub dataset: Option<&'a PersonaDataset>,
    pub counts: RunCounts,
    pub simulation_id: Option<&'a str>,
    pub analysis_id: Option<i64>,
}

/// Minimal storage contract the pipeline core depends on.
///
/// Implementations must tolerate the absence of an underlying table:
/// reads return "not found" / empty rather than failing the process.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- simulations ---

    async fn create_simulation(&self, record: &SimulationRecord) -> Result<()>;

    /// Store fanout results and mark the simulation completed.
    async fn update_simulation_results(
        &self,
        simulation_id: &str,
        personas: &[Persona],
        interviews: &[Interview],
        insights: Option<&SimulationInsights>,
        formatted_data: Option<&Value>,
    ) -> Result<()>;

    /// Mark a simulation failed. Terminal; the record is immutable after.
    async fn mark_simulation_failed(&self, simulation_id: &str, error: &str) -> Result<()>;

    async fn get_simulation(&self, simulation_id: &str) -> Result<Option<SimulationRecord>>;

    async fn list_completed_simulations(&self) -> Result<Vec<SimulationRecord>>;

    // --- analyses ---

    /// Insert an analysis envelope and return its integer surrogate key.
    async fn insert_analysis(
        &self,
        simulation_id: Option<&str>,
        results: &DetailedAnalysis,
        llm_provider: &str,
        llm_model: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<i64>;

    async fn get_analysis(&self, analysis_id: i64) -> Result<Option<AnalysisRecord>>;

    // --- pipeline runs ---

    async fn create_run(
        &self,
        job_id: &str,
        business_context: &BusinessBrief,
        user_id: Option<&str>,
    ) -> Result<()>;

    /// Advance the run's lifecycle. `duration_seconds` is derived from the
    /// stored `started_at` when `completed_at` is supplied.
    async fn update_run_status(
        &self,
        job_id: &str,
        status: RunStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> Result<()>;

    async fn update_run_results(&self, job_id: &str, results: RunResults<'_>) -> Result<()>;

    async fn get_run(&self, job_id: &str) -> Result<Option<PipelineRunRecord>>;

    /// Newest-first page of runs, optionally filtered by owner and status.
    async fn list_runs(
        &self,
        user_id: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PipelineRunRecord>>;

    async fn count_runs(&self, user_id: Option<&str>, status: Option<RunStatus>)
        -> Result<usize>;
}
