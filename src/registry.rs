//! Background pipeline jobs: creation, supervision, polling, history.
//!
//! The registry creates the persisted run row in `pending`, spawns a
//! supervised background task for the orchestrator, and mirrors lifecycle
//! into a volatile in-memory map for fast polling. The repository stays
//! authoritative: a registry restart loses the mirror but not the jobs.
//! Jobs are independent and never serialized against each other.

use chrono::Utc;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::orchestrator::OrchestratorFactory;
use crate::store::{Repository, RunResults};
use crate::types::{
    BusinessBrief, ExecutionResult, JobStatus, PipelineRunRecord, PipelineRunSummary, RunStatus,
    StageStatus,
};
use crate::PipelineError;

/// Hard cap for list pagination.
pub const MAX_PAGE_SIZE: usize = 100;
/// Page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Holds background task handles so they are not dropped mid-flight.
///
/// Each task removes its own handle on completion; a sweep on spawn reaps
/// anything that finished before its handle was registered.
#[derive(Default)]
struct TaskSupervisor {
    tasks: DashMap<String, JoinHandle<()>>,
}

impl TaskSupervisor {
    fn spawn<F>(self: Arc<Self>, job_id: String, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let supervisor = Arc::clone(&self);
        let id = job_id.clone();
        let handle = tokio::spawn(async move {
            future.await;
            supervisor.tasks.remove(&id);
        });
        if !handle.is_finished() {
            self.tasks.insert(job_id, handle);
        }
        self.tasks.retain(|_, handle| !handle.is_finished());
    }

    fn active_count(&self) -> usize {
        self.tasks.len()
    }
}

/// A paged listing of historical runs.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RunPage {
    pub runs: Vec<PipelineRunSummary>,
    pub total: usize,
    pub limit: usize,
    pub offset: usize,
}

/// Creates and tracks background pipeline jobs.
pub struct JobRegistry {
    factory: Arc<OrchestratorFactory>,
    store: Arc<dyn Repository>,
    jobs: Arc<DashMap<String, JobStatus>>,
    cancellations: Arc<DashMap<String, Arc<AtomicBool>>>,
    supervisor: Arc<TaskSupervisor>,
}

impl JobRegistry {
    pub fn new(factory: Arc<OrchestratorFactory>) -> Self {
        let store = factory.store();
        Self {
            factory,
            store,
            jobs: Arc::new(DashMap::new()),
            cancellations: Arc::new(DashMap::new()),
            supervisor: Arc::new(TaskSupervisor::default()),
        }
    }

    /// Create a run row in `pending` and spawn the background task.
    pub async fn submit(
        &self,
        brief: BusinessBrief,
        config: SimulationConfig,
        user_id: Option<String>,
    ) -> Result<JobStatus> {
        brief.validate()?;
        config.validate()?;

        let job_id = Uuid::new_v4().to_string();
        self.store
            .create_run(&job_id, &brief, user_id.as_deref())
            .await?;

        let status = JobStatus {
            job_id: job_id.clone(),
            status: RunStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            result: None,
        };
        self.jobs.insert(job_id.clone(), status.clone());

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancellations.insert(job_id.clone(), cancel.clone());

        let job = JobContext {
            orchestrator_factory: self.factory.clone(),
            store: self.store.clone(),
            jobs: self.jobs.clone(),
            cancellations: self.cancellations.clone(),
            job_id: job_id.clone(),
            cancel,
            brief,
            config,
            user_id,
        };
        Arc::clone(&self.supervisor).spawn(job_id, job.run());

        Ok(status)
    }

    /// Request cancellation of a running job. Advisory: the run stops at the
    /// next suspension point and terminates as `failed`.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.cancellations.get(job_id) {
            Some(flag) => {
                flag.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Number of background tasks currently held by the supervisor.
    pub fn active_jobs(&self) -> usize {
        self.supervisor.active_count()
    }

    /// Poll one job: in-memory first, repository on miss.
    pub async fn get(&self, job_id: &str) -> Result<JobStatus> {
        if let Some(status) = self.jobs.get(job_id) {
            return Ok(status.clone());
        }

        let record = self
            .store
            .get_run(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("pipeline job {}", job_id)))?;
        Ok(job_status_from_record(record))
    }

    /// Full run detail including trace and dataset.
    pub async fn get_detail(&self, job_id: &str) -> Result<PipelineRunRecord> {
        self.store
            .get_run(job_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("pipeline run {}", job_id)))
    }

    /// Paged history. `limit` is clamped to [`MAX_PAGE_SIZE`].
    pub async fn list(
        &self,
        status: Option<RunStatus>,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<RunPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
        let records = self.store.list_runs(None, status, limit, offset).await?;
        let total = self.store.count_runs(None, status).await?;
        Ok(RunPage {
            runs: records.iter().map(PipelineRunSummary::from).collect(),
            total,
            limit,
            offset,
        })
    }

    #[cfg(test)]
    fn clear_memory_mirror(&self) {
        self.jobs.clear();
    }
}

/// Reconstruct a polling view from the persisted record.
fn job_status_from_record(record: PipelineRunRecord) -> JobStatus {
    let result = if record.status == RunStatus::Completed && record.dataset.is_some() {
        Some(ExecutionResult {
            dataset: record.dataset,
            execution_trace: record.execution_trace,
            total_duration_seconds: record.total_duration_seconds.unwrap_or(0.0),
            status: record.status,
        })
    } else {
        None
    };

    JobStatus {
        job_id: record.job_id,
        status: record.status,
        created_at: record.created_at,
        started_at: record.started_at,
        completed_at: record.completed_at,
        error: record.error,
        result,
    }
}

/// Everything one background job needs, bundled for the spawned task.
struct JobContext {
    orchestrator_factory: Arc<OrchestratorFactory>,
    store: Arc<dyn Repository>,
    jobs: Arc<DashMap<String, JobStatus>>,
    cancellations: Arc<DashMap<String, Arc<AtomicBool>>>,
    job_id: String,
    cancel: Arc<AtomicBool>,
    brief: BusinessBrief,
    config: SimulationConfig,
    user_id: Option<String>,
}

impl JobContext {
    /// Lifecycle writes around one orchestrator run.
    async fn run(self) {
        tracing::info!(job_id = %self.job_id, "pipeline job started");
        let started_at = Utc::now();
        if let Some(mut entry) = self.jobs.get_mut(&self.job_id) {
            entry.status = RunStatus::Running;
            entry.started_at = Some(started_at);
        }
        if let Err(err) = self
            .store
            .update_run_status(&self.job_id, RunStatus::Running, Some(started_at), None, None)
            .await
        {
            tracing::error!(job_id = %self.job_id, error = %err, "failed to mark run running");
        }

        let orchestrator = self.orchestrator_factory.build(Some(self.cancel.clone()));
        let (result, artifacts) = orchestrator
            .execute(
                &self.job_id,
                &self.brief,
                &self.config,
                self.user_id.as_deref(),
            )
            .await;

        let completed_at = Utc::now();
        // a cancelled run is always terminal-failed with a distinguishable
        // error, whatever the trace classification says
        let cancelled = self.cancel.load(Ordering::Relaxed);
        let status = if cancelled {
            RunStatus::Failed
        } else {
            result.status
        };
        // a failed or partial run carries the first failed stage's error
        let error = if cancelled {
            Some("pipeline run was cancelled".to_string())
        } else {
            match status {
                RunStatus::Completed => None,
                _ => result
                    .execution_trace
                    .iter()
                    .find(|t| t.status == StageStatus::Failed)
                    .and_then(|t| t.error.clone()),
            }
        };

        let persisted: Result<()> = async {
            self.store
                .update_run_status(
                    &self.job_id,
                    status,
                    None,
                    Some(completed_at),
                    error.as_deref(),
                )
                .await?;
            self.store
                .update_run_results(
                    &self.job_id,
                    RunResults {
                        execution_trace: &result.execution_trace,
                        total_duration_seconds: result.total_duration_seconds,
                        dataset: result.dataset.as_ref(),
                        counts: artifacts.counts,
                        simulation_id: artifacts.simulation_id.as_deref(),
                        analysis_id: artifacts.analysis_id,
                    },
                )
                .await?;
            Ok(())
        }
        .await;
        if let Err(err) = persisted {
            tracing::error!(job_id = %self.job_id, error = %err, "failed to persist run results");
        }

        if let Some(mut entry) = self.jobs.get_mut(&self.job_id) {
            entry.status = status;
            entry.completed_at = Some(completed_at);
            entry.error = error;
            entry.result = Some(result);
        }
        self.cancellations.remove(&self.job_id);

        tracing::info!(job_id = %self.job_id, "pipeline job finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InterviewCache;
    use crate::gateway::{MockBackend, TaskKind};
    use crate::store::MemoryStore;
    use crate::testutil;
    use std::time::Duration;

    fn registry(mock: MockBackend) -> (JobRegistry, Arc<MemoryStore>) {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let factory = Arc::new(OrchestratorFactory::new(
            testutil::fast_gateway(mock),
            store.clone(),
            Arc::new(InterviewCache::new()),
        ));
        (JobRegistry::new(factory), store)
    }

    fn config() -> SimulationConfig {
        SimulationConfig {
            people_per_stakeholder: 2,
            ..Default::default()
        }
    }

    async fn wait_terminal(registry: &JobRegistry, job_id: &str) -> JobStatus {
        for _ in 0..200 {
            let status = registry.get(job_id).await.unwrap();
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("job {} did not reach a terminal status", job_id);
    }

    #[tokio::test]
    async fn test_submit_returns_pending_and_read_after_write() {
        let (registry, _) = registry(testutil::full_mock());
        let status = registry
            .submit(testutil::brief(), config(), None)
            .await
            .unwrap();
        assert_eq!(status.status, RunStatus::Pending);

        // read-after-write: the job is immediately visible
        let polled = registry.get(&status.job_id).await.unwrap();
        assert!(matches!(
            polled.status,
            RunStatus::Pending | RunStatus::Running | RunStatus::Completed
        ));
    }

    #[tokio::test]
    async fn test_job_runs_to_completion_and_persists() {
        let (registry, store) = registry(testutil::full_mock());
        let submitted = registry
            .submit(testutil::brief(), config(), None)
            .await
            .unwrap();

        let status = wait_terminal(&registry, &submitted.job_id).await;
        assert_eq!(status.status, RunStatus::Completed);
        let result = status.result.expect("completed job carries result");
        assert_eq!(result.execution_trace.len(), 4);
        assert!(result.dataset.is_some());

        // repository is authoritative
        let record = store.get_run(&submitted.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert!(record.started_at.is_some());
        assert!(record.completed_at.is_some());
        assert_eq!(record.counts.persona_count, Some(4));
        assert_eq!(record.counts.interview_count, Some(4));
        assert!(record.dataset.is_some());
    }

    #[tokio::test]
    async fn test_get_falls_back_to_store_on_memory_miss() {
        let (registry, _) = registry(testutil::full_mock());
        let submitted = registry
            .submit(testutil::brief(), config(), None)
            .await
            .unwrap();
        wait_terminal(&registry, &submitted.job_id).await;

        // simulate a restart by clearing the mirror
        registry.clear_memory_mirror();
        let status = registry.get(&submitted.job_id).await.unwrap();
        assert_eq!(status.status, RunStatus::Completed);
        assert!(status.result.is_some(), "result reconstructed from store");
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let (registry, _) = registry(testutil::full_mock());
        let err = registry.get("missing").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
        let err = registry.get_detail("missing").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_clamps_limit() {
        let (registry, _) = registry(testutil::full_mock());
        let page = registry.list(None, Some(500), 0).await.unwrap();
        assert_eq!(page.limit, MAX_PAGE_SIZE);
        let page = registry.list(None, None, 0).await.unwrap();
        assert_eq!(page.limit, DEFAULT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn test_failed_pipeline_marks_run_failed_with_error() {
        let mock = MockBackend::new().on_task(TaskKind::QuestionnaireBuild, "garbage");
        let (registry, store) = registry(mock);
        let submitted = registry
            .submit(testutil::brief(), config(), None)
            .await
            .unwrap();

        let status = wait_terminal(&registry, &submitted.job_id).await;
        assert_eq!(status.status, RunStatus::Failed);
        assert!(status.error.is_some());
        assert!(status.result.is_none());

        let record = store.get_run(&submitted.job_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        // the partial trace is still persisted for debugging
        assert_eq!(record.execution_trace.len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_brief_rejected_before_spawn() {
        let (registry, _) = registry(testutil::full_mock());
        let mut brief = testutil::brief();
        brief.business_idea = " ".into();
        let err = registry.submit(brief, config(), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_are_independent() {
        let (registry, _) = registry(testutil::full_mock());
        let a = registry
            .submit(testutil::brief(), config(), None)
            .await
            .unwrap();
        let b = registry
            .submit(testutil::brief(), config(), None)
            .await
            .unwrap();
        assert_ne!(a.job_id, b.job_id);

        let a = wait_terminal(&registry, &a.job_id).await;
        let b = wait_terminal(&registry, &b.job_id).await;
        assert_eq!(a.status, RunStatus::Completed);
        assert_eq!(b.status, RunStatus::Completed);

        let dataset_a = a.result.unwrap().dataset.unwrap();
        let dataset_b = b.result.unwrap().dataset.unwrap();
        assert_ne!(dataset_a.scope_id, dataset_b.scope_id);
    }

    #[tokio::test]
    async fn test_cancelled_job_terminates_failed() {
        // latency gives the cancel a window before the first stage finishes
        let mock = testutil::full_mock().with_latency(Duration::from_millis(100));
        let (registry, _) = registry(mock);
        let submitted = registry
            .submit(testutil::brief(), config(), None)
            .await
            .unwrap();
        assert!(registry.cancel(&submitted.job_id));

        let status = wait_terminal(&registry, &submitted.job_id).await;
        assert_eq!(status.status, RunStatus::Failed);
        assert!(status
            .error
            .as_deref()
            .map(|e| e.contains("cancelled"))
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_returns_false() {
        let (registry, _) = registry(testutil::full_mock());
        assert!(!registry.cancel("missing"));
    }
}
