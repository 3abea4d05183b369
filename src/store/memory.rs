//! In-memory repository for tests and degraded operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{Repository, RunResults};
use crate::error::Result;
use crate::types::{
    AnalysisRecord, BusinessBrief, DetailedAnalysis, Interview, Persona, PipelineRunRecord,
    RunStatus, SimulationInsights, SimulationRecord, SimulationStatus,
};
use crate::PipelineError;

/// Repository backed by process memory. State dies with the process.
#[derive(Default)]
pub struct MemoryStore {
    simulations: Mutex<HashMap<String, SimulationRecord>>,
    analyses: Mutex<Vec<AnalysisRecord>>,
    runs: Mutex<HashMap<String, PipelineRunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>> {
        mutex
            .lock()
            .map_err(|_| PipelineError::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn create_simulation(&self, record: &SimulationRecord) -> Result<()> {
        Self::lock(&self.simulations)?.insert(record.simulation_id.clone(), record.clone());
        Ok(())
    }

    async fn update_simulation_results(
        &self,
        simulation_id: &str,
        personas: &[Persona],
        interviews: &[Interview],
        insights: Option<&SimulationInsights>,
        formatted_data: Option<&Value>,
    ) -> Result<()> {
        let mut simulations = Self::lock(&self.simulations)?;
        let record = simulations.get_mut(simulation_id).ok_or_else(|| {
            PipelineError::NotFound(format!("simulation {}", simulation_id))
        })?;
        record.personas = personas.to_vec();
        record.interviews = interviews.to_vec();
        record.insights = insights.cloned();
        record.formatted_data = formatted_data.cloned();
        record.status = SimulationStatus::Completed;
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_simulation_failed(&self, simulation_id: &str, error: &str) -> Result<()> {
        let mut simulations = Self::lock(&self.simulations)?;
        let record = simulations.get_mut(simulation_id).ok_or_else(|| {
            PipelineError::NotFound(format!("simulation {}", simulation_id))
        })?;
        record.status = SimulationStatus::Failed;
        record.error = Some(error.to_string());
        record.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_simulation(&self, simulation_id: &str) -> Result<Option<SimulationRecord>> {
        Ok(Self::lock(&self.simulations)?.get(simulation_id).cloned())
    }

    async fn list_completed_simulations(&self) -> Result<Vec<SimulationRecord>> {
        let mut completed: Vec<SimulationRecord> = Self::lock(&self.simulations)?
            .values()
            .filter(|s| s.status == SimulationStatus::Completed)
            .cloned()
            .collect();
        completed.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(completed)
    }

    async fn insert_analysis(
        &self,
        simulation_id: Option<&str>,
        results: &DetailedAnalysis,
        llm_provider: &str,
        llm_model: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<i64> {
        let mut analyses = Self::lock(&self.analyses)?;
        let analysis_id = analyses.len() as i64 + 1;
        analyses.push(AnalysisRecord {
            analysis_id,
            simulation_id: simulation_id.map(|s| s.to_string()),
            status: status.to_string(),
            results: results.clone(),
            llm_provider: llm_provider.to_string(),
            llm_model: llm_model.to_string(),
            created_at: Utc::now(),
            error: error.map(|e| e.to_string()),
        });
        Ok(analysis_id)
    }

    async fn get_analysis(&self, analysis_id: i64) -> Result<Option<AnalysisRecord>> {
        Ok(Self::lock(&self.analyses)?
            .iter()
            .find(|a| a.analysis_id == analysis_id)
            .cloned())
    }

    async fn create_run(
        &self,
        job_id: &str,
        business_context: &BusinessBrief,
        user_id: Option<&str>,
    ) -> Result<()> {
        let record = PipelineRunRecord {
            job_id: job_id.to_string(),
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            business_context: business_context.clone(),
            execution_trace: Vec::new(),
            total_duration_seconds: None,
            dataset: None,
            counts: Default::default(),
            simulation_id: None,
            analysis_id: None,
            error: None,
            user_id: user_id.map(|u| u.to_string()),
        };
        Self::lock(&self.runs)?.insert(job_id.to_string(), record);
        Ok(())
    }

    async fn update_run_status(
        &self,
        job_id: &str,
        status: RunStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> Result<()> {
        let mut runs = Self::lock(&self.runs)?;
        let record = runs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::NotFound(format!("pipeline run {}", job_id)))?;
        record.status = status;
        if let Some(started) = started_at {
            record.started_at = Some(started);
        }
        if let Some(completed) = completed_at {
            record.completed_at = Some(completed);
            if let Some(started) = record.started_at {
                record.duration_seconds =
                    Some((completed - started).num_milliseconds() as f64 / 1000.0);
            }
        }
        if let Some(err) = error {
            record.error = Some(err.to_string());
        }
        Ok(())
    }

    async fn update_run_results(&self, job_id: &str, results: RunResults<'_>) -> Result<()> {
        let mut runs = Self::lock(&self.runs)?;
        let record = runs
            .get_mut(job_id)
            .ok_or_else(|| PipelineError::NotFound(format!("pipeline run {}", job_id)))?;
        record.execution_trace = results.execution_trace.to_vec();
        record.total_duration_seconds = Some(results.total_duration_seconds);
        record.dataset = results.dataset.cloned();
        record.counts = results.counts;
        record.simulation_id = results.simulation_id.map(|s| s.to_string());
        record.analysis_id = results.analysis_id;
        Ok(())
    }

    async fn get_run(&self, job_id: &str) -> Result<Option<PipelineRunRecord>> {
        Ok(Self::lock(&self.runs)?.get(job_id).cloned())
    }

    async fn list_runs(
        &self,
        user_id: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PipelineRunRecord>> {
        let mut runs: Vec<PipelineRunRecord> = Self::lock(&self.runs)?
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| user_id.map_or(true, |u| r.user_id.as_deref() == Some(u)))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_runs(
        &self,
        user_id: Option<&str>,
        status: Option<RunStatus>,
    ) -> Result<usize> {
        Ok(Self::lock(&self.runs)?
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .filter(|r| user_id.map_or(true, |u| r.user_id.as_deref() == Some(u)))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::types::{Questionnaire, StakeholderBuckets};

    fn brief() -> BusinessBrief {
        BusinessBrief {
            business_idea: "AI research automation".into(),
            target_customer: "EU SaaS PMs".into(),
            problem: "manual research is slow".into(),
            industry: None,
            location: None,
        }
    }

    fn simulation(id: &str) -> SimulationRecord {
        SimulationRecord {
            simulation_id: id.into(),
            user_id: "user-1".into(),
            status: SimulationStatus::Running,
            business_context: brief(),
            questions_data: Questionnaire {
                stakeholders: StakeholderBuckets::default(),
                time_estimate: Value::Null,
            },
            config: SimulationConfig::default(),
            personas: Vec::new(),
            interviews: Vec::new(),
            insights: None,
            formatted_data: None,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_simulation_lifecycle() {
        let store = MemoryStore::new();
        store.create_simulation(&simulation("sim-1")).await.unwrap();

        store
            .update_simulation_results("sim-1", &[], &[], None, None)
            .await
            .unwrap();

        let record = store.get_simulation("sim-1").await.unwrap().unwrap();
        assert_eq!(record.status, SimulationStatus::Completed);
        assert!(record.completed_at.is_some());
        assert_eq!(store.list_completed_simulations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_simulation_failed() {
        let store = MemoryStore::new();
        store.create_simulation(&simulation("sim-1")).await.unwrap();
        store
            .mark_simulation_failed("sim-1", "model unavailable")
            .await
            .unwrap();

        let record = store.get_simulation("sim-1").await.unwrap().unwrap();
        assert_eq!(record.status, SimulationStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("model unavailable"));
    }

    #[tokio::test]
    async fn test_analysis_ids_are_sequential() {
        let store = MemoryStore::new();
        let envelope = DetailedAnalysis::empty(100);
        let id1 = store
            .insert_analysis(Some("sim-1"), &envelope, "gemini", "gemini-2.5-flash", "completed", None)
            .await
            .unwrap();
        let id2 = store
            .insert_analysis(None, &envelope, "gemini", "gemini-2.5-flash", "completed", None)
            .await
            .unwrap();
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);

        let record = store.get_analysis(id1).await.unwrap().unwrap();
        assert_eq!(record.simulation_id.as_deref(), Some("sim-1"));
        assert!(store.get_analysis(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_duration_derived_from_started_at() {
        let store = MemoryStore::new();
        store.create_run("job-1", &brief(), None).await.unwrap();

        let started = Utc::now();
        store
            .update_run_status("job-1", RunStatus::Running, Some(started), None, None)
            .await
            .unwrap();
        let completed = started + chrono::Duration::seconds(90);
        store
            .update_run_status("job-1", RunStatus::Completed, None, Some(completed), None)
            .await
            .unwrap();

        let record = store.get_run("job-1").await.unwrap().unwrap();
        assert_eq!(record.duration_seconds, Some(90.0));
    }

    #[tokio::test]
    async fn test_list_runs_filters_and_pages() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .create_run(&format!("job-{}", i), &brief(), None)
                .await
                .unwrap();
        }
        store
            .update_run_status("job-0", RunStatus::Failed, None, None, Some("boom"))
            .await
            .unwrap();

        assert_eq!(store.count_runs(None, None).await.unwrap(), 5);
        assert_eq!(store.count_runs(None, Some(RunStatus::Failed)).await.unwrap(), 1);
        assert_eq!(
            store.list_runs(None, None, 2, 0).await.unwrap().len(),
            2,
            "limit respected"
        );
        assert_eq!(store.list_runs(None, None, 10, 4).await.unwrap().len(), 1);
    }
}
