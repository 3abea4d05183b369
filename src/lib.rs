//! # Persona Pipeline
//!
//! A four-stage synthetic-research pipeline that turns a short business
//! brief into a persona dataset:
//!
//! 1. **Questionnaire generation** — brief -> stakeholder questionnaire
//!    ([`questionnaire::QuestionnaireBuilder`]).
//! 2. **Simulation** — synthetic interviewees plus one interview each under
//!    bounded concurrency, with retries and caching
//!    ([`fanout::InterviewFanout`], [`simulation::SimulationRunner`]).
//! 3. **Analysis** — a fixed sequence of typed model calls over the
//!    interview corpus ([`analysis::AnalysisPipeline`]).
//! 4. **Export** — dataset assembly with quality metrics
//!    ([`assemble::DatasetAssembler`]).
//!
//! The [`orchestrator::StageOrchestrator`] drives the stages sequentially
//! and records a per-stage trace; the [`registry::JobRegistry`] runs whole
//! pipelines as supervised background jobs that clients poll over HTTP
//! ([`http::router`]). All model access goes through one typed gateway
//! ([`gateway::LlmGateway`]) so the pipeline logic never touches vendor
//! APIs directly.
//!
//! ## Quick start
//!
//! ```no_run
//! use persona_pipeline::cache::InterviewCache;
//! use persona_pipeline::config::SimulationConfig;
//! use persona_pipeline::gateway::{GeminiBackend, LlmGateway};
//! use persona_pipeline::orchestrator::OrchestratorFactory;
//! use persona_pipeline::registry::JobRegistry;
//! use persona_pipeline::store::SqliteStore;
//! use persona_pipeline::types::BusinessBrief;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = Arc::new(GeminiBackend::new("api-key"));
//!     let gateway = LlmGateway::new(backend, "https://generativelanguage.googleapis.com");
//!     let store = Arc::new(SqliteStore::open("pipeline.db")?);
//!     let factory = Arc::new(OrchestratorFactory::new(
//!         gateway,
//!         store,
//!         Arc::new(InterviewCache::new()),
//!     ));
//!     let registry = JobRegistry::new(factory);
//!
//!     let brief = BusinessBrief {
//!         business_idea: "AI research automation".into(),
//!         target_customer: "EU SaaS PMs".into(),
//!         problem: "manual research is slow".into(),
//!         industry: None,
//!         location: None,
//!     };
//!     let job = registry.submit(brief, SimulationConfig::default(), None).await?;
//!     println!("job {} submitted", job.job_id);
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod assemble;
pub mod cache;
pub mod config;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod http;
pub mod orchestrator;
pub mod parsing;
pub mod questionnaire;
pub mod registry;
pub mod simulation;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{PipelineError, Result};
