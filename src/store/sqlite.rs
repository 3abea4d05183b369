//! SQLite-backed repository.
//!
//! JSON-valued columns store nested structures verbatim; timestamps are UTC
//! RFC-3339 text. Queries run on the blocking pool behind a shared
//! connection. When a table is missing (partial deployment, fresh volume),
//! reads degrade to "not found" instead of failing the process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{Repository, RunResults};
use crate::error::Result;
use crate::types::{
    AnalysisRecord, BusinessBrief, DetailedAnalysis, Interview, Persona, PipelineRunRecord,
    RunCounts, RunStatus, SimulationInsights, SimulationRecord, SimulationStatus,
};
use crate::PipelineError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS simulations (
    simulation_id   TEXT PRIMARY KEY,
    user_id         TEXT NOT NULL,
    status          TEXT NOT NULL,
    business_context TEXT NOT NULL,
    questions_data  TEXT NOT NULL,
    config          TEXT NOT NULL,
    personas        TEXT,
    interviews      TEXT,
    insights        TEXT,
    formatted_data  TEXT,
    created_at      TEXT NOT NULL,
    completed_at    TEXT,
    error           TEXT
);
CREATE TABLE IF NOT EXISTS analysis_results (
    analysis_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    simulation_id   TEXT,
    status          TEXT NOT NULL,
    results         TEXT NOT NULL,
    llm_provider    TEXT NOT NULL,
    llm_model       TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    error           TEXT
);
CREATE TABLE IF NOT EXISTS pipeline_runs (
    job_id          TEXT PRIMARY KEY,
    status          TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    started_at      TEXT,
    completed_at    TEXT,
    duration_seconds REAL,
    business_context TEXT NOT NULL,
    execution_trace TEXT,
    total_duration_seconds REAL,
    dataset         TEXT,
    questionnaire_stakeholder_count INTEGER,
    simulation_id   TEXT,
    analysis_id     INTEGER,
    persona_count   INTEGER,
    interview_count INTEGER,
    error           TEXT,
    user_id         TEXT
);
";

/// Repository backed by a single SQLite database file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating tables if needed) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database (tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| PipelineError::Storage("connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| PipelineError::Internal(format!("blocking task panicked: {}", e)))?
    }
}

fn is_missing_table(err: &rusqlite::Error) -> bool {
    err.to_string().contains("no such table")
}

/// Map a read error to the degraded fallback when the table is absent.
fn degraded<T>(err: rusqlite::Error, fallback: T) -> Result<T> {
    if is_missing_table(&err) {
        tracing::warn!(error = %err, "table missing; serving degraded read");
        Ok(fallback)
    } else {
        Err(err.into())
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

fn from_json_opt<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PipelineError::Storage(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_ts_opt(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_ts(&r)).transpose()
}

fn parse_run_status(raw: &str) -> Result<RunStatus> {
    RunStatus::parse(raw)
        .ok_or_else(|| PipelineError::Storage(format!("unknown run status '{}'", raw)))
}

/// Raw column values for one `pipeline_runs` row.
struct RunRow {
    job_id: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_seconds: Option<f64>,
    business_context: String,
    execution_trace: Option<String>,
    total_duration_seconds: Option<f64>,
    dataset: Option<String>,
    questionnaire_stakeholder_count: Option<i64>,
    simulation_id: Option<String>,
    analysis_id: Option<i64>,
    persona_count: Option<i64>,
    interview_count: Option<i64>,
    error: Option<String>,
    user_id: Option<String>,
}

const RUN_COLUMNS: &str = "job_id, status, created_at, started_at, completed_at, \
     duration_seconds, business_context, execution_trace, total_duration_seconds, dataset, \
     questionnaire_stakeholder_count, simulation_id, analysis_id, persona_count, \
     interview_count, error, user_id";

fn read_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        job_id: row.get(0)?,
        status: row.get(1)?,
        created_at: row.get(2)?,
        started_at: row.get(3)?,
        completed_at: row.get(4)?,
        duration_seconds: row.get(5)?,
        business_context: row.get(6)?,
        execution_trace: row.get(7)?,
        total_duration_seconds: row.get(8)?,
        dataset: row.get(9)?,
        questionnaire_stakeholder_count: row.get(10)?,
        simulation_id: row.get(11)?,
        analysis_id: row.get(12)?,
        persona_count: row.get(13)?,
        interview_count: row.get(14)?,
        error: row.get(15)?,
        user_id: row.get(16)?,
    })
}

fn run_from_row(row: RunRow) -> Result<PipelineRunRecord> {
    Ok(PipelineRunRecord {
        job_id: row.job_id,
        status: parse_run_status(&row.status)?,
        created_at: parse_ts(&row.created_at)?,
        started_at: parse_ts_opt(row.started_at)?,
        completed_at: parse_ts_opt(row.completed_at)?,
        duration_seconds: row.duration_seconds,
        business_context: from_json(&row.business_context)?,
        execution_trace: from_json_opt(row.execution_trace)?.unwrap_or_default(),
        total_duration_seconds: row.total_duration_seconds,
        dataset: from_json_opt(row.dataset)?,
        counts: RunCounts {
            questionnaire_stakeholder_count: row.questionnaire_stakeholder_count,
            persona_count: row.persona_count,
            interview_count: row.interview_count,
        },
        simulation_id: row.simulation_id,
        analysis_id: row.analysis_id,
        error: row.error,
        user_id: row.user_id,
    })
}

/// Raw column values for one `simulations` row.
struct SimulationRow {
    simulation_id: String,
    user_id: String,
    status: String,
    business_context: String,
    questions_data: String,
    config: String,
    personas: Option<String>,
    interviews: Option<String>,
    insights: Option<String>,
    formatted_data: Option<String>,
    created_at: String,
    completed_at: Option<String>,
    error: Option<String>,
}

const SIMULATION_COLUMNS: &str = "simulation_id, user_id, status, business_context, \
     questions_data, config, personas, interviews, insights, formatted_data, created_at, \
     completed_at, error";

fn read_simulation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SimulationRow> {
    Ok(SimulationRow {
        simulation_id: row.get(0)?,
        user_id: row.get(1)?,
        status: row.get(2)?,
        business_context: row.get(3)?,
        questions_data: row.get(4)?,
        config: row.get(5)?,
        personas: row.get(6)?,
        interviews: row.get(7)?,
        insights: row.get(8)?,
        formatted_data: row.get(9)?,
        created_at: row.get(10)?,
        completed_at: row.get(11)?,
        error: row.get(12)?,
    })
}

fn simulation_from_row(row: SimulationRow) -> Result<SimulationRecord> {
    let status = match row.status.as_str() {
        "pending" => SimulationStatus::Pending,
        "running" => SimulationStatus::Running,
        "completed" => SimulationStatus::Completed,
        "failed" => SimulationStatus::Failed,
        other => {
            return Err(PipelineError::Storage(format!(
                "unknown simulation status '{}'",
                other
            )))
        }
    };
    Ok(SimulationRecord {
        simulation_id: row.simulation_id,
        user_id: row.user_id,
        status,
        business_context: from_json(&row.business_context)?,
        questions_data: from_json(&row.questions_data)?,
        config: from_json(&row.config)?,
        personas: from_json_opt(row.personas)?.unwrap_or_default(),
        interviews: from_json_opt(row.interviews)?.unwrap_or_default(),
        insights: from_json_opt(row.insights)?,
        formatted_data: from_json_opt(row.formatted_data)?,
        created_at: parse_ts(&row.created_at)?,
        completed_at: parse_ts_opt(row.completed_at)?,
        error: row.error,
    })
}

#[async_trait]
impl Repository for SqliteStore {
    async fn create_simulation(&self, record: &SimulationRecord) -> Result<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO simulations (simulation_id, user_id, status, business_context, \
                 questions_data, config, personas, interviews, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.simulation_id,
                    record.user_id,
                    record.status.as_str(),
                    to_json(&record.business_context)?,
                    to_json(&record.questions_data)?,
                    to_json(&record.config)?,
                    to_json(&record.personas)?,
                    to_json(&record.interviews)?,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_simulation_results(
        &self,
        simulation_id: &str,
        personas: &[Persona],
        interviews: &[Interview],
        insights: Option<&SimulationInsights>,
        formatted_data: Option<&Value>,
    ) -> Result<()> {
        let simulation_id = simulation_id.to_string();
        let personas = personas.to_vec();
        let interviews = interviews.to_vec();
        let insights = insights.cloned();
        let formatted_data = formatted_data.cloned();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE simulations SET personas = ?1, interviews = ?2, insights = ?3, \
                 formatted_data = ?4, status = 'completed', completed_at = ?5 \
                 WHERE simulation_id = ?6",
                params![
                    to_json(&personas)?,
                    to_json(&interviews)?,
                    insights.as_ref().map(|i| to_json(i)).transpose()?,
                    formatted_data.as_ref().map(|f| to_json(f)).transpose()?,
                    Utc::now().to_rfc3339(),
                    simulation_id,
                ],
            )?;
            if updated == 0 {
                return Err(PipelineError::NotFound(format!(
                    "simulation {}",
                    simulation_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn mark_simulation_failed(&self, simulation_id: &str, error: &str) -> Result<()> {
        let simulation_id = simulation_id.to_string();
        let error = error.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE simulations SET status = 'failed', error = ?1, completed_at = ?2 \
                 WHERE simulation_id = ?3",
                params![error, Utc::now().to_rfc3339(), simulation_id],
            )?;
            if updated == 0 {
                return Err(PipelineError::NotFound(format!(
                    "simulation {}",
                    simulation_id
                )));
            }
            Ok(())
        })
        .await
    }

    async fn get_simulation(&self, simulation_id: &str) -> Result<Option<SimulationRecord>> {
        let simulation_id = simulation_id.to_string();
        self.with_conn(move |conn| {
            let query = format!(
                "SELECT {} FROM simulations WHERE simulation_id = ?1",
                SIMULATION_COLUMNS
            );
            let row = match conn
                .query_row(&query, params![simulation_id], read_simulation_row)
                .optional()
            {
                Ok(row) => row,
                Err(err) => return degraded(err, None),
            };
            row.map(simulation_from_row).transpose()
        })
        .await
    }

    async fn list_completed_simulations(&self) -> Result<Vec<SimulationRecord>> {
        self.with_conn(move |conn| {
            let query = format!(
                "SELECT {} FROM simulations WHERE status = 'completed' ORDER BY created_at DESC",
                SIMULATION_COLUMNS
            );
            let mut statement = match conn.prepare(&query) {
                Ok(statement) => statement,
                Err(err) => return degraded(err, Vec::new()),
            };
            let rows = statement.query_map([], read_simulation_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(simulation_from_row(row?)?);
            }
            Ok(records)
        })
        .await
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
        let simulation_id = simulation_id.map(|s| s.to_string());
        let results = results.clone();
        let llm_provider = llm_provider.to_string();
        let llm_model = llm_model.to_string();
        let status = status.to_string();
        let error = error.map(|e| e.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO analysis_results (simulation_id, status, results, llm_provider, \
                 llm_model, created_at, error) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    simulation_id,
                    status,
                    to_json(&results)?,
                    llm_provider,
                    llm_model,
                    Utc::now().to_rfc3339(),
                    error,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn get_analysis(&self, analysis_id: i64) -> Result<Option<AnalysisRecord>> {
        self.with_conn(move |conn| {
            let row = match conn
                .query_row(
                    "SELECT analysis_id, simulation_id, status, results, llm_provider, \
                     llm_model, created_at, error FROM analysis_results WHERE analysis_id = ?1",
                    params![analysis_id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, Option<String>>(7)?,
                        ))
                    },
                )
                .optional()
            {
                Ok(row) => row,
                Err(err) => return degraded(err, None),
            };

            row.map(
                |(analysis_id, simulation_id, status, results, provider, model, created, error)| {
                    Ok(AnalysisRecord {
                        analysis_id,
                        simulation_id,
                        status,
                        results: from_json(&results)?,
                        llm_provider: provider,
                        llm_model: model,
                        created_at: parse_ts(&created)?,
                        error,
                    })
                },
            )
            .transpose()
        })
        .await
    }

    async fn create_run(
        &self,
        job_id: &str,
        business_context: &BusinessBrief,
        user_id: Option<&str>,
    ) -> Result<()> {
        let job_id = job_id.to_string();
        let business_context = business_context.clone();
        let user_id = user_id.map(|u| u.to_string());
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO pipeline_runs (job_id, status, created_at, business_context, user_id) \
                 VALUES (?1, 'pending', ?2, ?3, ?4)",
                params![
                    job_id,
                    Utc::now().to_rfc3339(),
                    to_json(&business_context)?,
                    user_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn update_run_status(
        &self,
        job_id: &str,
        status: RunStatus,
        started_at: Option<DateTime<Utc>>,
        completed_at: Option<DateTime<Utc>>,
        error: Option<&str>,
    ) -> Result<()> {
        let job_id = job_id.to_string();
        let error = error.map(|e| e.to_string());
        self.with_conn(move |conn| {
            if let Some(started) = started_at {
                conn.execute(
                    "UPDATE pipeline_runs SET started_at = ?1 WHERE job_id = ?2",
                    params![started.to_rfc3339(), job_id],
                )?;
            }

            let mut duration: Option<f64> = None;
            if let Some(completed) = completed_at {
                let started: Option<String> = conn
                    .query_row(
                        "SELECT started_at FROM pipeline_runs WHERE job_id = ?1",
                        params![job_id],
                        |row| row.get(0),
                    )
                    .optional()?
                    .flatten();
                if let Some(started) = started {
                    let started = parse_ts(&started)?;
                    duration = Some((completed - started).num_milliseconds() as f64 / 1000.0);
                }
            }

            let updated = conn.execute(
                "UPDATE pipeline_runs SET status = ?1, \
                 completed_at = COALESCE(?2, completed_at), \
                 duration_seconds = COALESCE(?3, duration_seconds), \
                 error = COALESCE(?4, error) \
                 WHERE job_id = ?5",
                params![
                    status.as_str(),
                    completed_at.map(|c| c.to_rfc3339()),
                    duration,
                    error,
                    job_id,
                ],
            )?;
            if updated == 0 {
                return Err(PipelineError::NotFound(format!("pipeline run {}", job_id)));
            }
            Ok(())
        })
        .await
    }

    async fn update_run_results(&self, job_id: &str, results: RunResults<'_>) -> Result<()> {
        let job_id = job_id.to_string();
        let trace = results.execution_trace.to_vec();
        let total = results.total_duration_seconds;
        let dataset = results.dataset.cloned();
        let counts = results.counts;
        let simulation_id = results.simulation_id.map(|s| s.to_string());
        let analysis_id = results.analysis_id;
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE pipeline_runs SET execution_trace = ?1, total_duration_seconds = ?2, \
                 dataset = ?3, questionnaire_stakeholder_count = ?4, simulation_id = ?5, \
                 analysis_id = ?6, persona_count = ?7, interview_count = ?8 WHERE job_id = ?9",
                params![
                    to_json(&trace)?,
                    total,
                    dataset.as_ref().map(|d| to_json(d)).transpose()?,
                    counts.questionnaire_stakeholder_count,
                    simulation_id,
                    analysis_id,
                    counts.persona_count,
                    counts.interview_count,
                    job_id,
                ],
            )?;
            if updated == 0 {
                return Err(PipelineError::NotFound(format!("pipeline run {}", job_id)));
            }
            Ok(())
        })
        .await
    }

    async fn get_run(&self, job_id: &str) -> Result<Option<PipelineRunRecord>> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            let query = format!("SELECT {} FROM pipeline_runs WHERE job_id = ?1", RUN_COLUMNS);
            let row = match conn.query_row(&query, params![job_id], read_run_row).optional() {
                Ok(row) => row,
                Err(err) => return degraded(err, None),
            };
            row.map(run_from_row).transpose()
        })
        .await
    }

    async fn list_runs(
        &self,
        user_id: Option<&str>,
        status: Option<RunStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PipelineRunRecord>> {
        let user_id = user_id.map(|u| u.to_string());
        let status = status.map(|s| s.as_str().to_string());
        self.with_conn(move |conn| {
            let query = format!(
                "SELECT {} FROM pipeline_runs WHERE (?1 IS NULL OR user_id = ?1) \
                 AND (?2 IS NULL OR status = ?2) \
                 ORDER BY created_at DESC LIMIT ?3 OFFSET ?4",
                RUN_COLUMNS
            );
            let mut statement = match conn.prepare(&query) {
                Ok(statement) => statement,
                Err(err) => return degraded(err, Vec::new()),
            };
            let rows = statement.query_map(
                params![user_id, status, limit as i64, offset as i64],
                read_run_row,
            )?;
            let mut records = Vec::new();
            for row in rows {
                records.push(run_from_row(row?)?);
            }
            Ok(records)
        })
        .await
    }

    async fn count_runs(
        &self,
        user_id: Option<&str>,
        status: Option<RunStatus>,
    ) -> Result<usize> {
        let user_id = user_id.map(|u| u.to_string());
        let status = status.map(|s| s.as_str().to_string());
        self.with_conn(move |conn| {
            let count: std::result::Result<i64, rusqlite::Error> = conn.query_row(
                "SELECT COUNT(*) FROM pipeline_runs WHERE (?1 IS NULL OR user_id = ?1) \
                 AND (?2 IS NULL OR status = ?2)",
                params![user_id, status],
                |row| row.get(0),
            );
            match count {
                Ok(count) => Ok(count as usize),
                Err(err) => degraded(err, 0),
            }
        })
        .await
    }
}
